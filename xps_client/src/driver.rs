//! # Command driver
//!
//! Typed wrappers over the vendor command set. The driver is generic over a
//! [`Transport`] so the command layer can be exercised against a scripted
//! transport in tests; on a live system the transport is an
//! [`XpsSocket`](crate::socket::XpsSocket).
//!
//! Method names follow the vendor command names; only the subset of the
//! command set the client needs is wrapped.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xps_if::proto::{
    self, ErrorTable, Field, OutputKind, Outputs, ProtoError, Response,
};

use crate::socket::{SocketError, XpsSocket};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A request/response channel to a controller.
pub trait Transport {
    fn request(&mut self, command: &str) -> Result<Response, SocketError>;
}

impl Transport for XpsSocket {
    fn request(&mut self, command: &str) -> Result<Response, SocketError> {
        XpsSocket::request(self, command)
    }
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Malformed response: {0}")]
    Proto(#[from] ProtoError),

    #[error("{description} [Error {code}]")]
    Controller { code: i32, description: String },
}

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// SGamma motion profile parameters of one positioner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SGammaParameters {
    pub velocity: f64,
    pub acceleration: f64,
    pub min_jerk_time_s: f64,
    pub max_jerk_time_s: f64,
}

/// PIDFF velocity corrector parameters of one positioner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidffVelocity {
    pub closed_loop: bool,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub ks: f64,
    pub integration_time_s: f64,
    pub derivative_filter_cutoff_hz: f64,
    pub gkp: f64,
    pub gki: f64,
    pub gkd: f64,
    pub kform: f64,
    pub feed_forward_gain: f64,
}

/// The typed command driver.
pub struct XpsDriver<T> {
    transport: T,
    errors: ErrorTable,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T: Transport> XpsDriver<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            errors: ErrorTable::default(),
        }
    }

    /// Fetch the controller's error listing, used to describe failed
    /// commands. Called once after connecting.
    pub fn load_error_table(&mut self) -> Result<(), DriverError> {
        let listing = self.command("ErrorListGet(char *)")?;
        self.errors = ErrorTable::from_listing(&listing);
        Ok(())
    }

    /// Human readable description of a vendor error code.
    pub fn describe_error(&self, code: i32) -> &str {
        self.errors.describe(code)
    }

    /// Ask the controller itself to describe an error code.
    pub fn error_string(&mut self, code: i32) -> Result<String, DriverError> {
        self.command(&format!("ErrorStringGet({},char *)", code))
    }

    /// Send a raw command, failing on a non-zero response code.
    pub fn command(&mut self, command: &str) -> Result<String, DriverError> {
        let response = self.transport.request(command)?;
        if response.code != 0 {
            return Err(self.controller_error(response.code));
        }
        Ok(response.payload)
    }

    /// Send a raw command and return the response whatever its code.
    ///
    /// Used where a non-zero code is flow control rather than failure, such
    /// as the chunked gathering reads.
    pub fn command_unchecked(&mut self, command: &str) -> Result<Response, DriverError> {
        Ok(self.transport.request(command)?)
    }

    // ---- SESSION ----

    pub fn login(&mut self, username: &str, password: &str) -> Result<(), DriverError> {
        self.command(&format!("Login({},{})", username, password))
            .map(|_| ())
    }

    pub fn firmware_version(&mut self) -> Result<String, DriverError> {
        self.command("FirmwareVersionGet(char *)")
    }

    /// XPS-D controllers report their real version here rather than in the
    /// firmware string.
    pub fn installer_version(&mut self) -> Result<String, DriverError> {
        self.command("InstallerVersionGet(char *)")
    }

    /// Seconds since the controller powered on.
    pub fn elapsed_time(&mut self) -> Result<f64, DriverError> {
        self.query_f64("ElapsedTimeGet(double *)")
    }

    pub fn reboot(&mut self) -> Result<(), DriverError> {
        self.command("Reboot()").map(|_| ())
    }

    pub fn close_all_other_sockets(&mut self) -> Result<(), DriverError> {
        self.command("CloseAllOtherSockets()").map(|_| ())
    }

    pub fn clean_tmp_folder(&mut self) -> Result<(), DriverError> {
        self.command("CleanTmpFolder()").map(|_| ())
    }

    pub fn clean_core_dump_folder(&mut self) -> Result<(), DriverError> {
        self.command("CleanCoreDumpFolder()").map(|_| ())
    }

    // ---- GROUPS ----

    pub fn group_initialize(&mut self, group: &str) -> Result<(), DriverError> {
        self.command(&format!("GroupInitialize({})", group)).map(|_| ())
    }

    pub fn group_initialize_with_encoder_calibration(
        &mut self,
        group: &str,
    ) -> Result<(), DriverError> {
        self.command(&format!("GroupInitializeWithEncoderCalibration({})", group))
            .map(|_| ())
    }

    pub fn group_home_search(&mut self, group: &str) -> Result<(), DriverError> {
        self.command(&format!("GroupHomeSearch({})", group)).map(|_| ())
    }

    pub fn group_kill(&mut self, group: &str) -> Result<(), DriverError> {
        self.command(&format!("GroupKill({})", group)).map(|_| ())
    }

    pub fn group_motion_enable(&mut self, group: &str) -> Result<(), DriverError> {
        self.command(&format!("GroupMotionEnable({})", group)).map(|_| ())
    }

    pub fn group_motion_disable(&mut self, group: &str) -> Result<(), DriverError> {
        self.command(&format!("GroupMotionDisable({})", group)).map(|_| ())
    }

    pub fn group_move_abort(&mut self, group: &str) -> Result<(), DriverError> {
        self.command(&format!("GroupMoveAbort({})", group)).map(|_| ())
    }

    pub fn group_move_absolute(
        &mut self,
        group: &str,
        targets: &[f64],
    ) -> Result<(), DriverError> {
        self.command(&format!("GroupMoveAbsolute({},{})", group, join_floats(targets)))
            .map(|_| ())
    }

    pub fn group_move_relative(
        &mut self,
        group: &str,
        displacements: &[f64],
    ) -> Result<(), DriverError> {
        self.command(&format!(
            "GroupMoveRelative({},{})",
            group,
            join_floats(displacements)
        ))
        .map(|_| ())
    }

    pub fn group_status(&mut self, group: &str) -> Result<i32, DriverError> {
        self.query_i32(&format!("GroupStatusGet({},int *)", group))
    }

    pub fn group_status_string(&mut self, status: i32) -> Result<String, DriverError> {
        self.command(&format!("GroupStatusStringGet({},char *)", status))
    }

    /// Current position of every positioner in a group.
    pub fn group_position_current(
        &mut self,
        group: &str,
        num_positioners: usize,
    ) -> Result<Vec<f64>, DriverError> {
        let payload = self.command(&format!(
            "GroupPositionCurrentGet({},{})",
            group,
            proto::placeholders(OutputKind::Double, num_positioners)
        ))?;
        Ok(proto::parse_doubles(&payload, num_positioners)?)
    }

    // ---- POSITIONERS ----

    pub fn positioner_error(&mut self, positioner: &str) -> Result<i32, DriverError> {
        self.query_i32(&format!("PositionerErrorGet({},int *)", positioner))
    }

    pub fn positioner_error_string(&mut self, code: i32) -> Result<String, DriverError> {
        self.command(&format!("PositionerErrorStringGet({},char *)", code))
    }

    pub fn positioner_hardware_status(&mut self, positioner: &str) -> Result<i32, DriverError> {
        self.query_i32(&format!("PositionerHardwareStatusGet({},int *)", positioner))
    }

    pub fn positioner_hardware_status_string(
        &mut self,
        status: i32,
    ) -> Result<String, DriverError> {
        self.command(&format!("PositionerHardwareStatusStringGet({},char *)", status))
    }

    /// Hardware maximum velocity and acceleration of a positioner's stage.
    pub fn positioner_max_velocity_and_acceleration(
        &mut self,
        positioner: &str,
    ) -> Result<(f64, f64), DriverError> {
        let payload = self.command(&format!(
            "PositionerMaximumVelocityAndAccelerationGet({},{})",
            positioner,
            proto::placeholders(OutputKind::Double, 2)
        ))?;
        let values = proto::parse_doubles(&payload, 2)?;
        Ok((values[0], values[1]))
    }

    /// User travel limits (low, high) of a positioner.
    pub fn positioner_user_travel_limits(
        &mut self,
        positioner: &str,
    ) -> Result<(f64, f64), DriverError> {
        let payload = self.command(&format!(
            "PositionerUserTravelLimitsGet({},{})",
            positioner,
            proto::placeholders(OutputKind::Double, 2)
        ))?;
        let values = proto::parse_doubles(&payload, 2)?;
        Ok((values[0], values[1]))
    }

    pub fn sgamma_parameters(
        &mut self,
        positioner: &str,
    ) -> Result<SGammaParameters, DriverError> {
        let payload = self.command(&format!(
            "PositionerSGammaParametersGet({},{})",
            positioner,
            proto::placeholders(OutputKind::Double, 4)
        ))?;
        let v = proto::parse_doubles(&payload, 4)?;
        Ok(SGammaParameters {
            velocity: v[0],
            acceleration: v[1],
            min_jerk_time_s: v[2],
            max_jerk_time_s: v[3],
        })
    }

    pub fn set_sgamma_parameters(
        &mut self,
        positioner: &str,
        params: &SGammaParameters,
    ) -> Result<(), DriverError> {
        self.command(&format!(
            "PositionerSGammaParametersSet({},{},{},{},{})",
            positioner,
            params.velocity,
            params.acceleration,
            params.min_jerk_time_s,
            params.max_jerk_time_s
        ))
        .map(|_| ())
    }

    pub fn corrector_pidff_velocity(
        &mut self,
        positioner: &str,
    ) -> Result<PidffVelocity, DriverError> {
        const OUTPUTS: Outputs = Outputs(&[
            OutputKind::Bool,
            OutputKind::Double,
            OutputKind::Double,
            OutputKind::Double,
            OutputKind::Double,
            OutputKind::Double,
            OutputKind::Double,
            OutputKind::Double,
            OutputKind::Double,
            OutputKind::Double,
            OutputKind::Double,
            OutputKind::Double,
        ]);

        let payload = self.command(&format!(
            "PositionerCorrectorPIDFFVelocityGet({},{})",
            positioner, OUTPUTS
        ))?;
        let fields = OUTPUTS.parse(&payload)?;

        let f = |i: usize| fields[i].as_f64().unwrap_or(0.0);

        Ok(PidffVelocity {
            closed_loop: matches!(fields[0], Field::Bool(true)),
            kp: f(1),
            ki: f(2),
            kd: f(3),
            ks: f(4),
            integration_time_s: f(5),
            derivative_filter_cutoff_hz: f(6),
            gkp: f(7),
            gki: f(8),
            gkd: f(9),
            kform: f(10),
            feed_forward_gain: f(11),
        })
    }

    pub fn set_corrector_pidff_velocity(
        &mut self,
        positioner: &str,
        params: &PidffVelocity,
    ) -> Result<(), DriverError> {
        self.command(&format!(
            "PositionerCorrectorPIDFFVelocitySet({},{},{},{},{},{},{},{},{},{},{},{},{})",
            positioner,
            params.closed_loop as i32,
            params.kp,
            params.ki,
            params.kd,
            params.ks,
            params.integration_time_s,
            params.derivative_filter_cutoff_hz,
            params.gkp,
            params.gki,
            params.gkd,
            params.kform,
            params.feed_forward_gain
        ))
        .map(|_| ())
    }

    // ---- GATHERING ----

    pub fn gathering_reset(&mut self) -> Result<(), DriverError> {
        self.command("GatheringReset()").map(|_| ())
    }

    pub fn gathering_configuration_set(&mut self, outputs: &[String]) -> Result<(), DriverError> {
        self.command(&format!("GatheringConfigurationSet({})", outputs.join(",")))
            .map(|_| ())
    }

    /// Current and maximum sample counts of the gathering buffer.
    pub fn gathering_current_number(&mut self) -> Result<(i32, i32), DriverError> {
        const OUTPUTS: Outputs = Outputs(&[OutputKind::Int, OutputKind::Int]);
        let payload = self.command(&format!("GatheringCurrentNumberGet({})", OUTPUTS))?;
        let fields = OUTPUTS.parse(&payload)?;
        Ok((
            fields[0].as_i32().unwrap_or(0),
            fields[1].as_i32().unwrap_or(0),
        ))
    }

    /// Read gathering lines, returning the raw response: the controller
    /// answers a negative code when the requested window is too large.
    pub fn gathering_data_multiple_lines(
        &mut self,
        start: usize,
        count: usize,
    ) -> Result<Response, DriverError> {
        self.command_unchecked(&format!(
            "GatheringDataMultipleLinesGet({},{},char *)",
            start, count
        ))
    }

    pub fn gathering_stop(&mut self) -> Result<(), DriverError> {
        self.command("GatheringStop()").map(|_| ())
    }

    // ---- PVT ----

    pub fn pvt_pulse_output_set(
        &mut self,
        group: &str,
        start_element: usize,
        end_element: usize,
        time_interval_s: f64,
    ) -> Result<(), DriverError> {
        self.command(&format!(
            "MultipleAxesPVTPulseOutputSet({},{},{},{})",
            group, start_element, end_element, time_interval_s
        ))
        .map(|_| ())
    }

    pub fn pvt_verification(&mut self, group: &str, file: &str) -> Result<(), DriverError> {
        self.command(&format!("MultipleAxesPVTVerification({},{})", group, file))
            .map(|_| ())
    }

    pub fn pvt_execution(
        &mut self,
        group: &str,
        file: &str,
        execution_number: usize,
    ) -> Result<(), DriverError> {
        self.command(&format!(
            "MultipleAxesPVTExecution({},{},{})",
            group, file, execution_number
        ))
        .map(|_| ())
    }

    // ---- EVENTS ----

    /// Configure event triggers; each entry is an event name plus its four
    /// parameters.
    pub fn event_trigger_set(
        &mut self,
        events: &[(&str, [&str; 4])],
    ) -> Result<(), DriverError> {
        self.command(&format!(
            "EventExtendedConfigurationTriggerSet({})",
            join_events(events)
        ))
        .map(|_| ())
    }

    /// Configure event actions; each entry is an action name plus its four
    /// parameters.
    pub fn event_action_set(
        &mut self,
        actions: &[(&str, [&str; 4])],
    ) -> Result<(), DriverError> {
        self.command(&format!(
            "EventExtendedConfigurationActionSet({})",
            join_events(actions)
        ))
        .map(|_| ())
    }

    /// Start the configured event, returning its id.
    pub fn event_start(&mut self) -> Result<i32, DriverError> {
        self.query_i32("EventExtendedStart(int *)")
    }

    pub fn event_remove(&mut self, id: i32) -> Result<(), DriverError> {
        self.command(&format!("EventExtendedRemove({})", id)).map(|_| ())
    }

    // ---- TCL ----

    pub fn tcl_script_execute(
        &mut self,
        file: &str,
        task: &str,
        arguments: &str,
    ) -> Result<(), DriverError> {
        self.command(&format!("TCLScriptExecute({},{},{})", file, task, arguments))
            .map(|_| ())
    }

    pub fn tcl_script_kill(&mut self, task: &str) -> Result<(), DriverError> {
        self.command(&format!("TCLScriptKill({})", task)).map(|_| ())
    }

    // ---- PRIVATE ----

    fn controller_error(&self, code: i32) -> DriverError {
        DriverError::Controller {
            code,
            description: self.errors.describe(code).to_string(),
        }
    }

    fn query_f64(&mut self, command: &str) -> Result<f64, DriverError> {
        let payload = self.command(command)?;
        Ok(proto::parse_doubles(&payload, 1)?[0])
    }

    fn query_i32(&mut self, command: &str) -> Result<i32, DriverError> {
        let payload = self.command(command)?;
        payload
            .trim()
            .parse::<i32>()
            .map_err(|_| {
                DriverError::Proto(ProtoError::InvalidOutput {
                    value: payload.clone(),
                    kind: OutputKind::Int,
                })
            })
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn join_floats(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn join_events(entries: &[(&str, [&str; 4])]) -> String {
    entries
        .iter()
        .map(|(name, params)| format!("{},{}", name, params.join(",")))
        .collect::<Vec<_>>()
        .join(",")
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;

    /// Transport fed from a script of expected (command, response) pairs.
    struct ScriptedTransport {
        script: VecDeque<(String, String)>,
    }

    impl ScriptedTransport {
        fn new(script: &[(&str, &str)]) -> Self {
            Self {
                script: script
                    .iter()
                    .map(|(c, r)| (c.to_string(), r.to_string()))
                    .collect(),
            }
        }

        fn finished(&self) -> bool {
            self.script.is_empty()
        }
    }

    impl Transport for ScriptedTransport {
        fn request(&mut self, command: &str) -> Result<Response, SocketError> {
            let (expected, reply) = self
                .script
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected command: {}", command));
            assert_eq!(command, expected);
            Ok(Response::decode(&reply).unwrap())
        }
    }

    fn driver(script: &[(&str, &str)]) -> XpsDriver<ScriptedTransport> {
        XpsDriver::new(ScriptedTransport::new(script))
    }

    #[test]
    fn test_session_commands() {
        let mut d = driver(&[
            ("Login(Administrator,Administrator)", "0,,EndOfAPI"),
            ("FirmwareVersionGet(char *)", "0,XPS-C8 V2.6.0,EndOfAPI"),
            ("ElapsedTimeGet(double *)", "0,12345.5,EndOfAPI"),
        ]);

        d.login("Administrator", "Administrator").unwrap();
        assert_eq!(d.firmware_version().unwrap(), "XPS-C8 V2.6.0");
        assert_eq!(d.elapsed_time().unwrap(), 12345.5);
        assert!(d.transport.finished());
    }

    #[test]
    fn test_group_commands() {
        let mut d = driver(&[
            ("GroupStatusGet(FineXY,int *)", "0,12,EndOfAPI"),
            (
                "GroupStatusStringGet(12,char *)",
                "0,Ready state from motion,EndOfAPI",
            ),
            ("GroupMoveAbsolute(FineXY,1.5,-0.25)", "0,,EndOfAPI"),
            (
                "GroupPositionCurrentGet(FineXY,double *,double *)",
                "0,1.5,-0.25,EndOfAPI",
            ),
        ]);

        assert_eq!(d.group_status("FineXY").unwrap(), 12);
        assert_eq!(
            d.group_status_string(12).unwrap(),
            "Ready state from motion"
        );
        d.group_move_absolute("FineXY", &[1.5, -0.25]).unwrap();
        assert_eq!(
            d.group_position_current("FineXY", 2).unwrap(),
            vec![1.5, -0.25]
        );
        assert!(d.transport.finished());
    }

    #[test]
    fn test_positioner_queries() {
        let mut d = driver(&[
            (
                "PositionerMaximumVelocityAndAccelerationGet(FineXY.X,double *,double *)",
                "0,300,2400,EndOfAPI",
            ),
            (
                "PositionerSGammaParametersGet(FineXY.X,double *,double *,double *,double *)",
                "0,20,80,0.015,0.03,EndOfAPI",
            ),
            (
                "PositionerSGammaParametersSet(FineXY.X,10,80,0.015,0.03)",
                "0,,EndOfAPI",
            ),
        ]);

        assert_eq!(
            d.positioner_max_velocity_and_acceleration("FineXY.X").unwrap(),
            (300.0, 2400.0)
        );

        let mut sgamma = d.sgamma_parameters("FineXY.X").unwrap();
        assert_eq!(sgamma.velocity, 20.0);
        assert_eq!(sgamma.max_jerk_time_s, 0.03);

        sgamma.velocity = 10.0;
        d.set_sgamma_parameters("FineXY.X", &sgamma).unwrap();
        assert!(d.transport.finished());
    }

    #[test]
    fn test_pidff_velocity_round_trip() {
        let mut d = driver(&[
            (
                "PositionerCorrectorPIDFFVelocityGet(FineXY.X,bool *,double *,double *,double *,\
                 double *,double *,double *,double *,double *,double *,double *,double *)",
                "0,1,0.5,0.1,0,0,0.25,100,0,0,0,1,0.9,EndOfAPI",
            ),
            (
                "PositionerCorrectorPIDFFVelocitySet(FineXY.X,1,0.7,0.1,0,0,0.25,100,0,0,0,1,0.9)",
                "0,,EndOfAPI",
            ),
        ]);

        let mut tuning = d.corrector_pidff_velocity("FineXY.X").unwrap();
        assert!(tuning.closed_loop);
        assert_eq!(tuning.kp, 0.5);
        assert_eq!(tuning.feed_forward_gain, 0.9);

        tuning.kp = 0.7;
        d.set_corrector_pidff_velocity("FineXY.X", &tuning).unwrap();
        assert!(d.transport.finished());
    }

    #[test]
    fn test_controller_error_description() {
        let mut d = driver(&[
            (
                "ErrorListGet(char *)",
                "0,Error0: Success;Error-22: Group state must be READY,EndOfAPI",
            ),
            ("GroupHomeSearch(FineXY)", "-22,,EndOfAPI"),
            (
                "ErrorStringGet(-22,char *)",
                "0,Group state must be READY,EndOfAPI",
            ),
        ]);

        d.load_error_table().unwrap();

        match d.group_home_search("FineXY") {
            Err(DriverError::Controller { code, description }) => {
                assert_eq!(code, -22);
                assert_eq!(description, "Group state must be READY");
            }
            other => panic!("expected controller error, got {:?}", other),
        }

        // The controller's own description matches the cached table
        assert_eq!(d.error_string(-22).unwrap(), "Group state must be READY");
        assert!(d.transport.finished());
    }

    #[test]
    fn test_gathering_and_events() {
        let mut d = driver(&[
            ("GatheringReset()", "0,,EndOfAPI"),
            (
                "GatheringConfigurationSet(FineXY.X.CurrentPosition,FineXY.X.SetpointPosition)",
                "0,,EndOfAPI",
            ),
            ("GatheringCurrentNumberGet(int *,int *)", "0,128,1000000,EndOfAPI"),
            (
                "GatheringDataMultipleLinesGet(0,128,char *)",
                "-17,,EndOfAPI",
            ),
            (
                "EventExtendedConfigurationTriggerSet(Always,0,0,0,0,\
                 FineXY.PVT.TrajectoryPulse,0,0,0,0)",
                "0,,EndOfAPI",
            ),
            (
                "EventExtendedConfigurationActionSet(GatheringOneData,,,,)",
                "0,,EndOfAPI",
            ),
            ("EventExtendedStart(int *)", "0,3,EndOfAPI"),
            ("EventExtendedRemove(3)", "0,,EndOfAPI"),
        ]);

        d.gathering_reset().unwrap();
        d.gathering_configuration_set(&[
            "FineXY.X.CurrentPosition".to_string(),
            "FineXY.X.SetpointPosition".to_string(),
        ])
        .unwrap();
        assert_eq!(d.gathering_current_number().unwrap(), (128, 1000000));

        // Oversized reads surface the vendor code instead of failing
        let response = d.gathering_data_multiple_lines(0, 128).unwrap();
        assert_eq!(response.code, -17);

        d.event_trigger_set(&[
            ("Always", ["0", "0", "0", "0"]),
            ("FineXY.PVT.TrajectoryPulse", ["0", "0", "0", "0"]),
        ])
        .unwrap();
        d.event_action_set(&[("GatheringOneData", ["", "", "", ""])])
            .unwrap();
        assert_eq!(d.event_start().unwrap(), 3);
        d.event_remove(3).unwrap();
        assert!(d.transport.finished());
    }
}
