//! # Command socket
//!
//! Blocking TCP transport to the controller's command port. One request is in
//! flight at a time; a response is complete once the `EndOfAPI` terminator
//! arrives.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;
use xps_if::proto::{self, ProtoError, Response};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// The controller's command port.
pub const COMMAND_PORT: u16 = 5001;

/// Read timeout applied while waiting for a response. Motion commands
/// (homing, trajectory execution) block until the motion completes, so this
/// is a backstop, not a latency bound.
const RESPONSE_TIMEOUT_S: u64 = 3600;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("Could not resolve `{0}`")]
    AddressResolution(String),

    #[error("Could not connect to {0}: {1}")]
    CouldNotConnect(String, std::io::Error),

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("The controller closed the connection")]
    ConnectionClosed,

    #[error("Malformed response: {0}")]
    Proto(#[from] ProtoError),
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A connected command socket.
pub struct XpsSocket {
    stream: TcpStream,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl XpsSocket {
    /// Connect to a controller's command socket.
    ///
    /// `connect_timeout` bounds the TCP connect only; once connected,
    /// responses are waited on for up to an hour since motion commands do not
    /// reply until the motion is done.
    pub fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, SocketError> {
        let endpoint = format!("{}:{}", host, port);

        let addr = endpoint
            .to_socket_addrs()
            .map_err(|_| SocketError::AddressResolution(endpoint.clone()))?
            .next()
            .ok_or_else(|| SocketError::AddressResolution(endpoint.clone()))?;

        let stream = TcpStream::connect_timeout(&addr, connect_timeout)
            .map_err(|e| SocketError::CouldNotConnect(endpoint, e))?;

        stream.set_read_timeout(Some(Duration::from_secs(RESPONSE_TIMEOUT_S)))?;

        Ok(Self { stream })
    }

    /// Send a command and block until its response arrives.
    pub fn request(&mut self, command: &str) -> Result<Response, SocketError> {
        trace!("-> {}", command);

        self.stream.write_all(&proto::encode_latin1(command))?;

        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];

        loop {
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(SocketError::ConnectionClosed);
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = proto::decode_latin1(&buf);
            if Response::is_complete(&text) {
                trace!("<- {}", text.trim_end());
                return Ok(Response::decode(&text)?);
            }
        }
    }
}
