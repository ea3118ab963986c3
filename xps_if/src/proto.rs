//! # Wire protocol codec
//!
//! The controller speaks an ASCII remote-procedure protocol on its command
//! socket. A request is a single call of the form `Name(arg1,arg2,...)`;
//! commands which return values embed output placeholders (`double *`,
//! `char *`, ...) in the argument list. The response is
//! `<code>,<payload>,EndOfAPI` where a code of zero is success and negative
//! codes are vendor errors.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Terminator appended by the controller to every response.
pub const RESPONSE_SUFFIX: &str = ",EndOfAPI";

// ------------------------------------------------------------------------------------------------
// ENUMERATIONS
// ------------------------------------------------------------------------------------------------

/// Possible codec errors.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Response is missing the EndOfAPI terminator")]
    MissingTerminator,

    #[error("Could not parse `{0}` as a response code")]
    InvalidCode(String),

    #[error("Expected {expected} output field(s), found {found}")]
    MissingOutputs { expected: usize, found: usize },

    #[error("Could not parse `{value}` as {kind}")]
    InvalidOutput { value: String, kind: OutputKind },
}

/// The type of an output parameter of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Bool,
    Char,
    Double,
    Int,
    Short,
    UnsignedShort,
}

/// A single parsed output field.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// A decoded controller response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Vendor response code, zero on success.
    pub code: i32,

    /// Everything between the code and the terminator.
    pub payload: String,
}

/// The output parameter list of a command.
///
/// Renders as the placeholder list embedded in the request (`int *,double *`)
/// and parses the corresponding response payload into typed fields.
#[derive(Debug, Clone, Copy)]
pub struct Outputs(pub &'static [OutputKind]);

/// Vendor error code to description table, built from an `ErrorListGet`
/// payload at connect time.
#[derive(Debug, Clone, Default)]
pub struct ErrorTable(HashMap<i32, String>);

// ------------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// ------------------------------------------------------------------------------------------------

impl Response {
    /// Check whether a receive buffer holds a complete response.
    pub fn is_complete(raw: &str) -> bool {
        raw.contains(RESPONSE_SUFFIX)
    }

    /// Decode a raw receive buffer into code and payload.
    pub fn decode(raw: &str) -> Result<Self, ProtoError> {
        let end = match raw.find(RESPONSE_SUFFIX) {
            Some(i) => i,
            None => return Err(ProtoError::MissingTerminator),
        };
        let body = &raw[..end];

        // The payload may itself contain commas, split on the first one only
        let (code_str, payload) = match body.find(',') {
            Some(i) => (&body[..i], &body[i + 1..]),
            None => (body, ""),
        };

        let code = code_str
            .trim()
            .parse::<i32>()
            .map_err(|_| ProtoError::InvalidCode(code_str.to_string()))?;

        Ok(Response {
            code,
            payload: payload.to_string(),
        })
    }
}

impl OutputKind {
    /// The placeholder rendered into a request for this output.
    pub fn placeholder(&self) -> &'static str {
        match self {
            OutputKind::Bool => "bool *",
            OutputKind::Char => "char *",
            OutputKind::Double => "double *",
            OutputKind::Int => "int *",
            OutputKind::Short => "short *",
            OutputKind::UnsignedShort => "unsigned short *",
        }
    }

    fn parse(&self, value: &str) -> Result<Field, ProtoError> {
        let invalid = || ProtoError::InvalidOutput {
            value: value.to_string(),
            kind: *self,
        };

        match self {
            OutputKind::Char => Ok(Field::Str(value.to_string())),
            OutputKind::Bool => Ok(Field::Bool(value.trim() != "0")),
            OutputKind::Double => value
                .trim()
                .parse::<f64>()
                .map(Field::Double)
                .map_err(|_| invalid()),
            OutputKind::Int | OutputKind::Short | OutputKind::UnsignedShort => value
                .trim()
                .parse::<i64>()
                .map(Field::Int)
                .map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.placeholder())
    }
}

impl Outputs {
    /// Parse a response payload into one field per declared output.
    ///
    /// The final field takes the remainder of the payload, so a trailing
    /// `char *` output may contain commas.
    pub fn parse(&self, payload: &str) -> Result<Vec<Field>, ProtoError> {
        let parts: Vec<&str> = payload.splitn(self.0.len(), ',').collect();

        if parts.len() < self.0.len() {
            return Err(ProtoError::MissingOutputs {
                expected: self.0.len(),
                found: parts.len(),
            });
        }

        self.0
            .iter()
            .zip(parts.iter())
            .map(|(kind, part)| kind.parse(*part))
            .collect()
    }
}

impl fmt::Display for Outputs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for kind in self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", kind)?;
            first = false;
        }
        Ok(())
    }
}

impl Field {
    /// The field value as a float, if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Field::Double(d) => Some(*d),
            Field::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// The field value as an integer, if it is one.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Field::Int(i) => Some(*i as i32),
            _ => None,
        }
    }

    /// The field value as a string, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl ErrorTable {
    /// Build the table from an `ErrorListGet` payload.
    ///
    /// The listing is `;`-separated entries of the form
    /// `Error<code>: <description>`. Entries which do not follow the form are
    /// skipped.
    pub fn from_listing(listing: &str) -> Self {
        let mut table = HashMap::new();

        for entry in listing.split(';') {
            let (code_str, message) = match entry.find(':') {
                Some(i) => (&entry[..i], &entry[i + 1..]),
                None => continue,
            };

            let code = match code_str.replace("Error", "").trim().parse::<i32>() {
                Ok(c) => c,
                Err(_) => continue,
            };

            table.insert(code, message.trim().to_string());
        }

        ErrorTable(table)
    }

    /// Human readable description for a vendor code.
    pub fn describe(&self, code: i32) -> &str {
        self.0
            .get(&code)
            .map(String::as_str)
            .unwrap_or("unknown error")
    }

    /// Number of known codes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Render `n` output placeholders of one kind, for commands whose output
/// arity is only known at runtime (position reads over a whole group).
pub fn placeholders(kind: OutputKind, n: usize) -> String {
    let mut out = String::new();
    for i in 0..n {
        if i > 0 {
            out.push(',');
        }
        out.push_str(kind.placeholder());
    }
    out
}

/// Parse a payload of exactly `n` comma separated doubles.
pub fn parse_doubles(payload: &str, n: usize) -> Result<Vec<f64>, ProtoError> {
    let parts: Vec<&str> = payload.splitn(n, ',').collect();

    if parts.len() < n {
        return Err(ProtoError::MissingOutputs {
            expected: n,
            found: parts.len(),
        });
    }

    parts
        .iter()
        .map(|p| {
            p.trim().parse::<f64>().map_err(|_| ProtoError::InvalidOutput {
                value: p.to_string(),
                kind: OutputKind::Double,
            })
        })
        .collect()
}

/// Encode command text as latin-1 bytes.
///
/// The controllers are not UTF-8 clean; characters outside latin-1 are
/// replaced with `?`.
pub fn encode_latin1(s: &str) -> Vec<u8> {
    s.chars()
        .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
        .collect()
}

/// Decode latin-1 bytes received from the controller.
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_response() {
        let resp = Response::decode("0,2.5000,EndOfAPI").unwrap();
        assert_eq!(resp.code, 0);
        assert_eq!(resp.payload, "2.5000");

        // Empty payload
        let resp = Response::decode("0,,EndOfAPI").unwrap();
        assert_eq!(resp.code, 0);
        assert_eq!(resp.payload, "");

        // Payload containing commas is kept whole
        let resp = Response::decode("-17,1.0,2.0,3.0,EndOfAPI").unwrap();
        assert_eq!(resp.code, -17);
        assert_eq!(resp.payload, "1.0,2.0,3.0");

        assert!(matches!(
            Response::decode("0,partial"),
            Err(ProtoError::MissingTerminator)
        ));
        assert!(matches!(
            Response::decode("nonsense,EndOfAPI"),
            Err(ProtoError::InvalidCode(_))
        ));
    }

    #[test]
    fn test_is_complete() {
        assert!(!Response::is_complete("0,1.0"));
        assert!(Response::is_complete("0,1.0,EndOfAPI"));
    }

    #[test]
    fn test_outputs_render() {
        let outputs = Outputs(&[OutputKind::Int, OutputKind::Double, OutputKind::Char]);
        assert_eq!(outputs.to_string(), "int *,double *,char *");

        assert_eq!(
            Outputs(&[OutputKind::UnsignedShort]).to_string(),
            "unsigned short *"
        );
    }

    #[test]
    fn test_outputs_parse() {
        let outputs = Outputs(&[OutputKind::Int, OutputKind::Double]);
        let fields = outputs.parse("11,0.25").unwrap();
        assert_eq!(fields[0].as_i32(), Some(11));
        assert_eq!(fields[1].as_f64(), Some(0.25));

        // Trailing char output swallows remaining commas
        let outputs = Outputs(&[OutputKind::Int, OutputKind::Char]);
        let fields = outputs.parse("0,XPS-C8 x.y.z, extras").unwrap();
        assert_eq!(fields[1].as_str(), Some("XPS-C8 x.y.z, extras"));

        let outputs = Outputs(&[OutputKind::Double, OutputKind::Double]);
        assert!(matches!(
            outputs.parse("1.0"),
            Err(ProtoError::MissingOutputs {
                expected: 2,
                found: 1
            })
        ));
        assert!(matches!(
            outputs.parse("1.0,spam"),
            Err(ProtoError::InvalidOutput { .. })
        ));
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders(OutputKind::Double, 3),
            "double *,double *,double *"
        );
        assert_eq!(placeholders(OutputKind::Double, 0), "");
    }

    #[test]
    fn test_parse_doubles() {
        assert_eq!(
            parse_doubles("1.0, -2.5,3", 3).unwrap(),
            vec![1.0, -2.5, 3.0]
        );
        assert!(parse_doubles("1.0", 2).is_err());
        assert!(parse_doubles("1.0,spam", 2).is_err());
    }

    #[test]
    fn test_error_table() {
        let listing = "Error0: Successful command;\
                       Error-5: Not allowed due to a positioner error;\
                       Error-22: Group state must be READY;\
                       garbage entry";
        let table = ErrorTable::from_listing(listing);

        assert_eq!(table.len(), 3);
        assert_eq!(table.describe(-22), "Group state must be READY");
        assert_eq!(table.describe(-999), "unknown error");
    }

    #[test]
    fn test_latin1_round_trip() {
        let text = "GroupMoveAbsolute(Group1,10.5)";
        assert_eq!(decode_latin1(&encode_latin1(text)), text);

        // Latin-1 high bytes survive the round trip
        let bytes = vec![0x47, 0xe9, 0xff];
        assert_eq!(encode_latin1(&decode_latin1(&bytes)), bytes);
    }
}
