//! # Controller client
//!
//! [`NewportXps`] owns the command connection, the remote file store and the
//! group/stage configuration read from the controller at connect time. All
//! operations are synchronous: one request is in flight at a time and motion
//! commands return when the controller reports the motion done.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use chrono::Local;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

// Internal
use crate::driver::{DriverError, PidffVelocity, SGammaParameters, Transport, XpsDriver};
use crate::remote::{
    FtpStore, RemoteError, RemoteStore, SftpStore, CONFIG_DIR, SCRIPT_DIR, TRAJECTORY_DIR,
};
use crate::socket::{SocketError, XpsSocket, COMMAND_PORT};
use xps_if::config::{ConfigError, SystemConfig};
use xps_if::traj::{self, AxisLimits, LineScanParams, TrajError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Header written at the top of saved gathering files.
const GATHER_HEADER: &str = "# XPS Gathering Data\n#--------------";

/// Timestamp format used in status reports.
const REPORT_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// How long to wait for the gathering buffer to fill before giving up.
const GATHER_POLL_TIMEOUT_S: u64 = 5;

/// Number of extended event slots cleared when selecting a trajectory group.
const NUM_EVENT_SLOTS: i32 = 64;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Client errors.
#[derive(Debug, Error)]
pub enum XpsError {
    #[error("Socket error: {0}")]
    Socket(#[from] SocketError),

    #[error("Login failed for {0}")]
    LoginFailed(String),

    #[error("{action}: {source}")]
    Command {
        action: String,
        #[source]
        source: DriverError,
    },

    #[error("Group '{0}' not found")]
    UnknownGroup(String),

    #[error("Stage '{0}' not found")]
    UnknownStage(String),

    #[error("Stage '{0}' has no known velocity/acceleration limits")]
    MissingStageLimits(String),

    #[error("'{group}' cannot be a trajectory group, must be one of: {pvt_capable}")]
    NotPvtCapable { group: String, pvt_capable: String },

    #[error("No trajectory group defined")]
    NoTrajectoryGroup,

    #[error("Cannot find trajectory named '{0}'")]
    UnknownTrajectory(String),

    #[error("Trajectory '{0}' has not been uploaded")]
    TrajectoryNotUploaded(String),

    #[error("Trajectory must be armed before running")]
    NotArmed,

    #[error("Reconnect timed out after {0:.1} s")]
    ReconnectTimeout(f64),

    #[error("Gathering read failed: {0}")]
    Gathering(String),

    #[error("Remote file error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Could not parse system.ini: {0}")]
    Config(#[from] ConfigError),

    #[error("Trajectory error: {0}")]
    Traj(#[from] TrajError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Controller generation, detected from the firmware version string.
///
/// The generation decides the file transfer protocol and the remote
/// filesystem root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Generation {
    C,
    Q,
    D,
}

/// State of the trajectory arm/run/gather cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrajState {
    Idle,
    Arming,
    Armed,
    Running,
    Complete,
    Writing,
    Reading,
}

/// The shape of a defined trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrajKind {
    /// Constant velocity line scan; start/stop per trajectory axis, extended
    /// by the ramp offsets
    Line { start: Vec<f64>, stop: Vec<f64> },

    /// Array trajectory; start position per group positioner, `None` for
    /// ride-along axes
    Array { start: BTreeMap<String, Option<f64>> },
}

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

/// Connection settings, loadable from a TOML parameter file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XpsSettings {
    /// Controller host name or address
    pub host: String,

    /// Command socket port
    pub port: u16,

    pub username: String,
    pub password: String,

    /// TCP connect timeout in seconds
    pub connect_timeout_s: f64,

    /// Data recorded per trajectory axis by the gathering engine
    pub gather_outputs: Vec<String>,
}

/// A defined trajectory, ready to arm once uploaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trajectory {
    pub kind: TrajKind,

    /// Axes the trajectory moves (line scans list the scanned axis only)
    pub axes: Vec<String>,

    pub pixel_time_s: f64,
    pub npulses: usize,
    pub nsegments: usize,
    pub uploaded: bool,

    /// Rendered trajectory file contents
    pub buffer: String,
}

/// Optional overrides applied on top of a positioner's current PIDFF
/// velocity tuning.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TuningUpdate {
    /// Closed loop status, enabled when not given
    pub closed_loop: Option<bool>,
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    pub kd: Option<f64>,
    pub ks: Option<f64>,
    pub integration_time_s: Option<f64>,
    pub derivative_filter_cutoff_hz: Option<f64>,
    pub gkp: Option<f64>,
    pub gki: Option<f64>,
    pub gkd: Option<f64>,
    pub kform: Option<f64>,
    pub feed_forward_gain: Option<f64>,
}

/// A connected Newport XPS controller.
///
/// Generic over the command transport so the client logic can be exercised
/// against a scripted transport; a live client always uses an [`XpsSocket`].
pub struct NewportXps<T = XpsSocket> {
    settings: XpsSettings,
    driver: XpsDriver<T>,
    remote: Box<dyn RemoteStore>,

    firmware_version: String,
    generation: Generation,

    config: SystemConfig,

    traj_group: Option<String>,
    traj_state: TrajState,
    traj_file: Option<String>,
    trajectories: BTreeMap<String, Trajectory>,

    gather_titles: String,
    ngathered: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for XpsSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: COMMAND_PORT,
            username: "Administrator".to_string(),
            password: "Administrator".to_string(),
            connect_timeout_s: 10.0,
            gather_outputs: vec![
                "CurrentPosition".to_string(),
                "SetpointPosition".to_string(),
            ],
        }
    }
}

impl XpsSettings {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..Default::default()
        }
    }
}

impl Generation {
    /// Detect the generation from a firmware version string.
    pub fn detect(firmware: &str) -> Self {
        if ["XPS-D", "HXP-D", "XPS-RL"].iter().any(|m| firmware.contains(m)) {
            Generation::D
        } else if firmware.contains("XPS-C") {
            Generation::C
        } else {
            Generation::Q
        }
    }

    /// Root of the controller's served filesystem.
    pub fn remote_root(&self) -> &'static str {
        match self {
            Generation::C => "/Admin",
            _ => "",
        }
    }

    /// Whether the controller serves SFTP rather than FTP.
    pub fn uses_sftp(&self) -> bool {
        matches!(self, Generation::D)
    }
}

impl NewportXps {
    // ---- CONNECTION ----

    /// Connect and log in to a controller, read its `system.ini` and query
    /// the stage limits.
    pub fn connect(settings: XpsSettings) -> Result<Self, XpsError> {
        let socket = XpsSocket::connect(
            &settings.host,
            settings.port,
            Duration::from_secs_f64(settings.connect_timeout_s),
        )?;

        let mut driver = XpsDriver::new(socket);

        driver
            .load_error_table()
            .map_err(command_error("Reading controller error list"))?;

        driver
            .login(&settings.username, &settings.password)
            .map_err(|_| XpsError::LoginFailed(settings.host.clone()))?;

        let mut firmware_version = driver
            .firmware_version()
            .map_err(command_error("Reading firmware version"))?;

        let generation = Generation::detect(&firmware_version);

        // XPS-D reports its real version through the installer string
        if generation == Generation::D {
            firmware_version = driver
                .installer_version()
                .map_err(command_error("Reading installer version"))?;
        }

        let root = generation.remote_root();
        let remote: Box<dyn RemoteStore> = if generation.uses_sftp() {
            Box::new(SftpStore::new(
                &settings.host,
                &settings.username,
                &settings.password,
                root,
            ))
        } else {
            Box::new(FtpStore::new(
                &settings.host,
                &settings.username,
                &settings.password,
                root,
            ))
        };

        info!(
            "Connected to {} ({:?} generation, firmware: {})",
            settings.host, generation, firmware_version
        );

        let mut client = Self {
            settings,
            driver,
            remote,
            firmware_version,
            generation,
            config: SystemConfig::default(),
            traj_group: None,
            traj_state: TrajState::Idle,
            traj_file: None,
            trajectories: BTreeMap::new(),
            gather_titles: String::new(),
            ngathered: 0,
        };

        client.refresh_system_config()?;

        Ok(client)
    }

    /// Reboot the controller, optionally waiting for it to come back and
    /// reconnecting.
    pub fn reboot(&mut self, reconnect: bool, timeout: Duration) -> Result<(), XpsError> {
        if let Err(e) = self.driver.close_all_other_sockets() {
            warn!("Could not close other controller sockets: {}", e);
        }

        self.driver.reboot().map_err(command_error("Reboot"))?;

        self.config = SystemConfig::default();
        self.traj_group = None;

        if !reconnect {
            return Ok(());
        }

        info!("Waiting for {} to come back", self.settings.host);
        thread::sleep(Duration::from_secs(5));

        let connect_timeout = Duration::from_secs_f64(self.settings.connect_timeout_s);
        let deadline = Instant::now() + timeout;

        loop {
            thread::sleep(Duration::from_secs(5));

            match XpsSocket::connect(&self.settings.host, self.settings.port, connect_timeout) {
                Ok(_probe) => break,
                Err(e) => debug!("Controller not back yet: {}", e),
            }

            if Instant::now() > deadline {
                return Err(XpsError::ReconnectTimeout(timeout.as_secs_f64()));
            }
        }

        *self = NewportXps::connect(self.settings.clone())?;
        Ok(())
    }
}

impl<T: Transport> NewportXps<T> {
    /// Re-read `system.ini` and the per-stage limits from the controller.
    ///
    /// If exactly one PVT capable group exists it is selected as the
    /// trajectory group.
    pub fn refresh_system_config(&mut self) -> Result<(), XpsError> {
        let text = self.remote.get_text(CONFIG_DIR, "system.ini")?;
        let mut config = SystemConfig::parse(&text)?;

        for (name, stage) in config.stages.iter_mut() {
            match self.driver.positioner_max_velocity_and_acceleration(name) {
                Ok((velocity, acceleration)) => {
                    stage.max_velocity = Some(velocity);
                    stage.max_acceleration = Some(acceleration / 3.0);
                }
                Err(e) => warn!("Could not read max velocity/acceleration for {}: {}", name, e),
            }

            match self.driver.positioner_user_travel_limits(name) {
                Ok((low, high)) => {
                    stage.low_limit = Some(low);
                    stage.high_limit = Some(high);
                }
                Err(e) => warn!("Could not read travel limits for {}: {}", name, e),
            }
        }

        debug!(
            "system.ini: {} group(s), {} stage(s)",
            config.groups.len(),
            config.stages.len()
        );

        self.config = config;

        let pvt_groups: Vec<String> = self
            .config
            .pvt_groups()
            .iter()
            .map(|g| g.to_string())
            .collect();
        if let [only] = &pvt_groups[..] {
            let group = only.clone();
            self.set_trajectory_group(&group, false)?;
        }

        Ok(())
    }

    // ---- ACCESSORS ----

    pub fn firmware_version(&self) -> &str {
        &self.firmware_version
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The cached group/stage configuration.
    pub fn system_config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn trajectory_group(&self) -> Option<&str> {
        self.traj_group.as_deref()
    }

    pub fn traj_state(&self) -> TrajState {
        self.traj_state
    }

    pub fn trajectories(&self) -> &BTreeMap<String, Trajectory> {
        &self.trajectories
    }

    /// Number of pulses read back by the last gathering save.
    pub fn num_gathered(&self) -> usize {
        self.ngathered
    }

    // ---- STATUS ----

    /// Printable status report: controller identity, uptime and per
    /// group/stage status.
    pub fn status_report(&mut self) -> Result<String, XpsError> {
        let uptime = self
            .driver
            .elapsed_time()
            .map_err(command_error("Reading elapsed time"))?;

        let now = Local::now();
        let boot_time = now - chrono::Duration::milliseconds((uptime * 1000.0) as i64);

        let mut out = vec![
            format!("# XPS host:         {}", self.settings.host),
            format!("# Firmware:         {}", self.firmware_version),
            format!("# Current Time:     {}", now.format(REPORT_TIME_FORMAT)),
            format!("# Last Reboot:      {}", boot_time.format(REPORT_TIME_FORMAT)),
            format!(
                "# Trajectory Group: {}",
                self.traj_group.as_deref().unwrap_or("None")
            ),
            "# Groups and Stages".to_string(),
        ];

        let hardware = self.hardware_status()?;
        let errors = self.positioner_errors()?;

        for (group_name, status) in self.group_status()? {
            let group = match self.config.groups.get(&group_name) {
                Some(g) => g.clone(),
                None => continue,
            };

            out.push(format!(
                "{} ({}), Status: {}",
                group_name, group.category, status
            ));

            for positioner in &group.positioners {
                let stage_name = format!("{}.{}", group_name, positioner);
                let stage_type = self
                    .config
                    .stages
                    .get(&stage_name)
                    .map(|s| s.stage_type.as_str())
                    .unwrap_or("unknown");

                out.push(format!("# {} ({})", stage_name, stage_type));
                out.push(format!(
                    "      Hardware Status: {}",
                    hardware.get(&stage_name).map(String::as_str).unwrap_or("")
                ));
                out.push(format!(
                    "      Positioner Errors: {}",
                    errors.get(&stage_name).map(String::as_str).unwrap_or("")
                ));
            }
        }

        Ok(out.join("\n"))
    }

    /// Status string of every group.
    pub fn group_status(&mut self) -> Result<BTreeMap<String, String>, XpsError> {
        let mut out = BTreeMap::new();

        for group in self.group_names() {
            let status = self
                .driver
                .group_status(&group)
                .map_err(command_error(format!("GroupStatus '{}'", group)))?;
            let text = self
                .driver
                .group_status_string(status)
                .map_err(command_error(format!("GroupStatusString '{}'", status)))?;
            out.insert(group, text);
        }

        Ok(out)
    }

    /// Hardware status string of every stage.
    pub fn hardware_status(&mut self) -> Result<BTreeMap<String, String>, XpsError> {
        let mut out = BTreeMap::new();

        for stage in self.stage_names() {
            let status = self
                .driver
                .positioner_hardware_status(&stage)
                .map_err(command_error(format!("HardwareStatus '{}'", stage)))?;
            let text = self
                .driver
                .positioner_hardware_status_string(status)
                .map_err(command_error(format!("HardwareStatusString '{}'", status)))?;
            out.insert(stage, text);
        }

        Ok(out)
    }

    /// Positioner error string of every stage; an empty error reads as `OK`.
    pub fn positioner_errors(&mut self) -> Result<BTreeMap<String, String>, XpsError> {
        let mut out = BTreeMap::new();

        for stage in self.stage_names() {
            let code = self
                .driver
                .positioner_error(&stage)
                .map_err(command_error(format!("PositionerError '{}'", stage)))?;
            let mut text = self
                .driver
                .positioner_error_string(code)
                .map_err(command_error(format!("PositionerErrorString '{}'", code)))?;
            if text.is_empty() {
                text = "OK".to_string();
            }
            out.insert(stage, text);
        }

        Ok(out)
    }

    // ---- GROUP OPERATIONS ----

    /// Initialise one group, or all groups when `group` is `None`.
    pub fn initialize_group(
        &mut self,
        group: Option<&str>,
        with_encoder: bool,
        home: bool,
    ) -> Result<(), XpsError> {
        if with_encoder {
            self.group_action(group, "Initialising", |d, g| {
                d.group_initialize_with_encoder_calibration(g)
            })?;
        } else {
            self.group_action(group, "Initialising", |d, g| d.group_initialize(g))?;
        }

        if home {
            self.home_group(group)?;
        }

        Ok(())
    }

    /// Initialise every group, tolerating groups that are already
    /// initialised.
    pub fn initialize_all_groups(&mut self) -> Result<(), XpsError> {
        for group in self.group_names() {
            if let Err(e) = self.initialize_group(Some(&group), true, false) {
                warn!(
                    "Could not initialise '{}' (already initialised?): {}",
                    group, e
                );
            }
        }
        Ok(())
    }

    /// Home one group, or all groups when `group` is `None`.
    pub fn home_group(&mut self, group: Option<&str>) -> Result<(), XpsError> {
        self.group_action(group, "Homing", |d, g| d.group_home_search(g))
    }

    /// Home every group.
    pub fn home_all_groups(&mut self) -> Result<(), XpsError> {
        self.home_group(None)
    }

    /// Kill one group, or all groups when `group` is `None`.
    pub fn kill_group(&mut self, group: Option<&str>) -> Result<(), XpsError> {
        self.group_action(group, "Killing", |d, g| d.group_kill(g))
    }

    /// Enable motion on one group, or all groups when `group` is `None`.
    pub fn enable_group(&mut self, group: Option<&str>) -> Result<(), XpsError> {
        self.group_action(group, "Enabling", |d, g| d.group_motion_enable(g))
    }

    /// Disable motion on one group, or all groups when `group` is `None`.
    pub fn disable_group(&mut self, group: Option<&str>) -> Result<(), XpsError> {
        self.group_action(group, "Disabling", |d, g| d.group_motion_disable(g))
    }

    /// Abort the motion of a group, defaulting to the trajectory group.
    pub fn abort_group(&mut self, group: Option<&str>) -> Result<(), XpsError> {
        let group = self.group_or_trajectory(group)?;
        self.driver
            .group_move_abort(&group)
            .map_err(command_error(format!("Aborting group '{}'", group)))
    }

    /// Move a group to the supplied per-positioner targets; positioners not
    /// named hold their current position.
    ///
    /// Target keys match positioner names case-insensitively.
    pub fn move_group(
        &mut self,
        group: Option<&str>,
        targets: &BTreeMap<String, f64>,
    ) -> Result<(), XpsError> {
        let group = self.group_or_trajectory(group)?;
        let positioners = match self.config.groups.get(&group) {
            Some(g) => g.positioners.clone(),
            None => return Err(XpsError::UnknownGroup(group)),
        };

        let current = self
            .driver
            .group_position_current(&group, positioners.len())
            .map_err(command_error(format!("Reading position of '{}'", group)))?;

        let values: Vec<f64> = positioners
            .iter()
            .zip(current.iter())
            .map(|(name, held)| {
                targets
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| *v)
                    .unwrap_or(*held)
            })
            .collect();

        self.driver
            .group_move_absolute(&group, &values)
            .map_err(command_error(format!("Moving group '{}'", group)))
    }

    // ---- STAGE OPERATIONS ----

    /// Move a stage to a position, optionally relative to the current one.
    pub fn move_stage(&mut self, stage: &str, value: f64, relative: bool) -> Result<(), XpsError> {
        self.check_stage(stage)?;

        let result = if relative {
            self.driver.group_move_relative(stage, &[value])
        } else {
            self.driver.group_move_absolute(stage, &[value])
        };

        result.map_err(command_error(format!("Moving stage '{}'", stage)))
    }

    /// Current position of a stage.
    pub fn stage_position(&mut self, stage: &str) -> Result<f64, XpsError> {
        self.check_stage(stage)?;

        let positions = self
            .driver
            .group_position_current(stage, 1)
            .map_err(command_error(format!("Reading position of '{}'", stage)))?;

        Ok(positions[0])
    }

    /// Set the motion velocity of a stage, leaving unspecified SGamma
    /// parameters at their current values.
    pub fn set_velocity(
        &mut self,
        stage: &str,
        velocity: f64,
        acceleration: Option<f64>,
        min_jerk_time_s: Option<f64>,
        max_jerk_time_s: Option<f64>,
    ) -> Result<(), XpsError> {
        self.check_stage(stage)?;

        let current = self
            .driver
            .sgamma_parameters(stage)
            .map_err(command_error(format!("Reading SGamma of '{}'", stage)))?;

        let params = SGammaParameters {
            velocity,
            acceleration: acceleration.unwrap_or(current.acceleration),
            min_jerk_time_s: min_jerk_time_s.unwrap_or(current.min_jerk_time_s),
            max_jerk_time_s: max_jerk_time_s.unwrap_or(current.max_jerk_time_s),
        };

        self.driver
            .set_sgamma_parameters(stage, &params)
            .map_err(command_error(format!("Setting SGamma of '{}'", stage)))
    }

    /// Current PIDFF velocity tuning of a stage.
    pub fn tuning(&mut self, stage: &str) -> Result<PidffVelocity, XpsError> {
        self.check_stage(stage)?;
        self.driver
            .corrector_pidff_velocity(stage)
            .map_err(command_error(format!("Reading tuning of '{}'", stage)))
    }

    /// Update the PIDFF velocity tuning of a stage, applying only the given
    /// fields on top of the current parameters.
    pub fn set_tuning(&mut self, stage: &str, update: &TuningUpdate) -> Result<(), XpsError> {
        self.check_stage(stage)?;

        let current = self
            .driver
            .corrector_pidff_velocity(stage)
            .map_err(command_error(format!("Reading tuning of '{}'", stage)))?;

        let params = apply_tuning(&current, update);

        self.driver
            .set_corrector_pidff_velocity(stage, &params)
            .map_err(command_error(format!("Setting tuning of '{}'", stage)))
    }

    // ---- CONFIGURATION FILES ----

    /// Download `system.ini` to a local file.
    pub fn save_system_ini(&mut self, path: &Path) -> Result<(), XpsError> {
        let text = self.remote.get_text(CONFIG_DIR, "system.ini")?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Download `stages.ini` to a local file.
    pub fn save_stages_ini(&mut self, path: &Path) -> Result<(), XpsError> {
        let text = self.remote.get_text(CONFIG_DIR, "stages.ini")?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Upload new `system.ini` contents.
    pub fn upload_system_ini(&mut self, text: &str) -> Result<(), XpsError> {
        self.remote.put_text(CONFIG_DIR, "system.ini", text)?;
        Ok(())
    }

    /// Upload new `stages.ini` contents.
    pub fn upload_stages_ini(&mut self, text: &str) -> Result<(), XpsError> {
        self.remote.put_text(CONFIG_DIR, "stages.ini", text)?;
        Ok(())
    }

    // ---- SCRIPTS ----

    /// List the TCL scripts on the controller.
    pub fn list_scripts(&mut self) -> Result<Vec<String>, XpsError> {
        Ok(self.remote.list(SCRIPT_DIR)?)
    }

    /// Read a TCL script's contents.
    pub fn read_script(&mut self, name: &str) -> Result<String, XpsError> {
        Ok(self.remote.get_text(SCRIPT_DIR, name)?)
    }

    /// Download a TCL script to a local file.
    pub fn download_script(&mut self, name: &str, path: &Path) -> Result<(), XpsError> {
        let text = self.remote.get_text(SCRIPT_DIR, name)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Upload a TCL script.
    pub fn upload_script(&mut self, name: &str, text: &str) -> Result<(), XpsError> {
        self.remote.put_text(SCRIPT_DIR, name, text)?;
        Ok(())
    }

    /// Delete a TCL script from the controller.
    pub fn delete_script(&mut self, name: &str) -> Result<(), XpsError> {
        self.remote.delete(SCRIPT_DIR, name)?;
        Ok(())
    }

    /// Execute a TCL script under a named task.
    pub fn execute_script(
        &mut self,
        script: &str,
        task: &str,
        arguments: &str,
    ) -> Result<(), XpsError> {
        self.driver
            .tcl_script_execute(script, task, arguments)
            .map_err(command_error(format!("Executing script '{}'", script)))
    }

    // ---- TRAJECTORIES ----

    /// Select the group used for upcoming trajectories. The group must be
    /// PVT capable (a `Multiple*` category).
    ///
    /// With `reenable` the group's motion is cycled off and on first. All
    /// extended event slots are cleared.
    pub fn set_trajectory_group(&mut self, group: &str, reenable: bool) -> Result<(), XpsError> {
        let valid = self
            .config
            .groups
            .get(group)
            .map(|g| g.is_pvt_capable())
            .unwrap_or(false);

        if !valid {
            return Err(XpsError::NotPvtCapable {
                group: group.to_string(),
                pvt_capable: self.config.pvt_groups().join(", "),
            });
        }

        self.traj_group = Some(group.to_string());

        if reenable {
            if let Err(e) = self.disable_group(Some(group)) {
                debug!("Could not disable '{}' before re-enabling: {}", group, e);
            }

            thread::sleep(Duration::from_millis(100));

            if let Err(e) = self.enable_group(Some(group)) {
                warn!("Could not enable trajectory group '{}': {}", group, e);
                return Ok(());
            }
        }

        for slot in 0..NUM_EVENT_SLOTS {
            self.driver.event_remove(slot).ok();
        }

        Ok(())
    }

    /// Define matching forward and backward line-scan trajectories for one
    /// axis of the trajectory group, stored as `forward` and `backward`.
    ///
    /// The axis name is matched against the group's positioners ignoring
    /// case. With `upload` the rendered files are pushed to the controller.
    pub fn define_line_trajectories(
        &mut self,
        axis: &str,
        group: Option<&str>,
        params: &LineScanParams,
        upload: bool,
    ) -> Result<(), XpsError> {
        if let Some(g) = group {
            self.set_trajectory_group(g, false)?;
        }

        let traj_group = self.traj_group.clone().ok_or(XpsError::NoTrajectoryGroup)?;
        let positioners = self.config.group_stages(&traj_group);

        // Resolve the axis against the group's stages, tolerating case
        let stage_name = positioners
            .iter()
            .find(|s| {
                s.rsplit('.')
                    .next()
                    .map(|p| p.eq_ignore_ascii_case(axis))
                    .unwrap_or(false)
            })
            .cloned()
            .ok_or_else(|| XpsError::UnknownStage(format!("{}.{}", traj_group, axis)))?;
        let scan_axis = stage_name
            .rsplit('.')
            .next()
            .unwrap_or(axis)
            .to_string();

        let limits = self.stage_limits(&stage_name)?;

        let axes = match self.config.groups.get(&traj_group) {
            Some(g) => g.positioners.clone(),
            None => return Err(XpsError::UnknownGroup(traj_group)),
        };

        let scan = traj::build_line_scan(&axes, &scan_axis, params, &limits)?;

        let forward = Trajectory {
            kind: TrajKind::Line {
                start: vec![scan.start],
                stop: vec![scan.stop],
            },
            axes: vec![scan_axis.clone()],
            pixel_time_s: scan.pixel_time_s,
            npulses: scan.npulses,
            nsegments: scan.nsegments,
            uploaded: false,
            buffer: scan.forward.render(),
        };
        let backward = Trajectory {
            kind: TrajKind::Line {
                start: vec![scan.stop],
                stop: vec![scan.start],
            },
            axes: vec![scan_axis],
            pixel_time_s: scan.pixel_time_s,
            npulses: scan.npulses,
            nsegments: scan.nsegments,
            uploaded: false,
            buffer: scan.backward.render(),
        };

        self.trajectories.insert("forward".to_string(), forward);
        self.trajectories.insert("backward".to_string(), backward);

        if upload {
            for name in ["forward", "backward"].iter() {
                let buffer = self.trajectories[*name].buffer.clone();
                self.upload_trajectory(&format!("{}.trj", name), &buffer)?;
                if let Some(t) = self.trajectories.get_mut(*name) {
                    t.uploaded = true;
                }
            }
        }

        Ok(())
    }

    /// Define a trajectory through per-positioner position arrays, stored
    /// under `name` and uploaded as `{name}.trj`.
    ///
    /// Position keys may carry the `Group.` prefix. Positioners not given
    /// ride along at zero displacement.
    pub fn define_array_trajectory(
        &mut self,
        name: &str,
        positions: &BTreeMap<String, Vec<f64>>,
        segment_time_s: f64,
        max_accels: &BTreeMap<String, f64>,
        upload: bool,
    ) -> Result<(), XpsError> {
        let traj_group = self.traj_group.clone().ok_or(XpsError::NoTrajectoryGroup)?;

        let axes = match self.config.groups.get(&traj_group) {
            Some(g) => g.positioners.clone(),
            None => return Err(XpsError::UnknownGroup(traj_group)),
        };

        // Strip the group prefix off any fully qualified keys
        let prefix = format!("{}.", traj_group);
        let bare: BTreeMap<String, Vec<f64>> = positions
            .iter()
            .map(|(k, v)| {
                let key = k.strip_prefix(&prefix).unwrap_or(k);
                (key.to_string(), v.clone())
            })
            .collect();

        // Stage limits for every axis that moves
        let mut limits = BTreeMap::new();
        for axis in &axes {
            if !bare.contains_key(axis) {
                continue;
            }
            let stage_name = format!("{}.{}", traj_group, axis);
            limits.insert(axis.clone(), self.stage_limits(&stage_name)?);
        }

        let built = traj::build_array_traj(&axes, &bare, segment_time_s, &limits, max_accels)?;

        let trajectory = Trajectory {
            kind: TrajKind::Array { start: built.start },
            axes,
            pixel_time_s: built.pixel_time_s,
            npulses: built.npulses,
            nsegments: built.nsegments,
            uploaded: false,
            buffer: built.file.render(),
        };

        let buffer = trajectory.buffer.clone();
        self.trajectories.insert(name.to_string(), trajectory);

        if upload {
            self.upload_trajectory(&format!("{}.trj", name), &buffer)?;
            if let Some(t) = self.trajectories.get_mut(name) {
                t.uploaded = true;
            }
        }

        Ok(())
    }

    /// Upload a trajectory file to the controller.
    pub fn upload_trajectory(&mut self, filename: &str, text: &str) -> Result<(), XpsError> {
        self.remote.put_text(TRAJECTORY_DIR, filename, text)?;
        Ok(())
    }

    /// Download a trajectory file to a local file of the same name.
    pub fn download_trajectory(&mut self, filename: &str, path: &Path) -> Result<(), XpsError> {
        let text = self.remote.get_text(TRAJECTORY_DIR, filename)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Move the trajectory group to the start position of a named
    /// trajectory.
    pub fn move_to_trajectory_start(&mut self, name: &str) -> Result<(), XpsError> {
        let traj_group = self.traj_group.clone().ok_or(XpsError::NoTrajectoryGroup)?;
        let trajectory = self
            .trajectories
            .get(name)
            .cloned()
            .ok_or_else(|| XpsError::UnknownTrajectory(name.to_string()))?;

        match trajectory.kind {
            TrajKind::Line { start, .. } => {
                for (position, axis) in start.iter().zip(trajectory.axes.iter()) {
                    self.move_stage(&format!("{}.{}", traj_group, axis), *position, false)?;
                }
            }
            TrajKind::Array { start } => {
                for (axis, position) in start {
                    if let Some(p) = position {
                        self.move_stage(&format!("{}.{}", traj_group, axis), p, false)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Prepare an uploaded trajectory for execution: configure gathering on
    /// the trajectory axes, set the pulse output window and verify the file.
    pub fn arm_trajectory(&mut self, name: &str, move_to_start: bool) -> Result<(), XpsError> {
        let traj_group = self.traj_group.clone().ok_or(XpsError::NoTrajectoryGroup)?;

        let trajectory = self
            .trajectories
            .get(name)
            .cloned()
            .ok_or_else(|| XpsError::UnknownTrajectory(name.to_string()))?;

        if !trajectory.uploaded {
            return Err(XpsError::TrajectoryNotUploaded(name.to_string()));
        }

        self.traj_state = TrajState::Arming;
        let traj_file = format!("{}.trj", name);

        if move_to_start {
            self.move_to_trajectory_start(name)?;
        }

        let outputs = gather_outputs(&traj_group, &trajectory.axes, &self.settings.gather_outputs);
        self.gather_titles = gather_titles(&outputs);

        self.driver
            .gathering_reset()
            .map_err(command_error("GatheringReset"))?;
        self.driver
            .gathering_configuration_set(&outputs)
            .map_err(command_error("GatheringConfigurationSet"))?;

        if let Err(e) = self.driver.pvt_pulse_output_set(
            &traj_group,
            2,
            trajectory.nsegments,
            trajectory.pixel_time_s,
        ) {
            warn!("PVT pulse output set failed: {}", e);
        }

        if let Err(e) = self.driver.pvt_verification(&traj_group, &traj_file) {
            warn!("PVT verification failed: {}", e);
        }

        self.traj_file = Some(traj_file);
        self.traj_state = TrajState::Armed;

        Ok(())
    }

    /// Run an armed trajectory, gathering one sample per trajectory pulse,
    /// and optionally save the gathering data to `output_file`.
    ///
    /// If the named trajectory is not armed yet it is armed first (moving to
    /// its start position). Returns the number of gathered pulses.
    pub fn run_trajectory(
        &mut self,
        name: &str,
        save: bool,
        clean_core_dumps: bool,
        output_file: &Path,
    ) -> Result<usize, XpsError> {
        // XPS-D fills its tmp folder during PVT execution
        if self.generation == Generation::D {
            if let Err(e) = self.driver.clean_tmp_folder() {
                warn!("Could not clean controller tmp folder: {}", e);
            }
            if clean_core_dumps {
                if let Err(e) = self.driver.clean_core_dump_folder() {
                    warn!("Could not clean controller core dump folder: {}", e);
                }
            }
        }

        if self.trajectories.contains_key(name) && self.traj_state != TrajState::Armed {
            self.arm_trajectory(name, true)?;
        }

        if self.traj_state != TrajState::Armed {
            return Err(XpsError::NotArmed);
        }

        let traj_group = self.traj_group.clone().ok_or(XpsError::NoTrajectoryGroup)?;
        let traj_file = self
            .traj_file
            .clone()
            .ok_or_else(|| XpsError::UnknownTrajectory(name.to_string()))?;

        let pulse_event = format!("{}.PVT.TrajectoryPulse", traj_group);
        self.driver
            .event_trigger_set(&[
                ("Always", ["0", "0", "0", "0"]),
                (pulse_event.as_str(), ["0", "0", "0", "0"]),
            ])
            .map_err(command_error("EventExtendedConfigurationTriggerSet"))?;

        self.driver
            .event_action_set(&[("GatheringOneData", ["", "", "", ""])])
            .map_err(command_error("EventExtendedConfigurationActionSet"))?;

        let event_id = self
            .driver
            .event_start()
            .map_err(command_error("EventExtendedStart"))?;

        self.traj_state = TrajState::Running;

        if let Err(e) = self.driver.pvt_execution(&traj_group, &traj_file, 1) {
            warn!("PVT execution failed: {}", e);
        }

        self.driver.event_remove(event_id).ok();
        self.driver.gathering_stop().ok();

        self.traj_state = TrajState::Complete;

        let mut npulses = 0;
        if save {
            npulses = self.read_and_save(output_file)?;
        }

        self.traj_state = TrajState::Idle;
        Ok(npulses)
    }

    // ---- GATHERING ----

    /// Read the gathering buffer and save it to `path`. Returns the number
    /// of pulses read.
    pub fn read_and_save(&mut self, path: &Path) -> Result<usize, XpsError> {
        self.ngathered = 0;

        let (npulses, buffer) = self.read_gathering()?;
        if npulses < 1 {
            return Ok(0);
        }

        self.save_gathering_file(path, &buffer)?;
        self.ngathered = npulses;

        Ok(npulses)
    }

    /// Read the whole gathering buffer from the controller.
    ///
    /// Waits briefly for samples to appear; a buffer the controller refuses
    /// to send at once is re-read in chunks.
    pub fn read_gathering(&mut self) -> Result<(usize, String), XpsError> {
        self.traj_state = TrajState::Reading;

        let deadline = Instant::now() + Duration::from_secs(GATHER_POLL_TIMEOUT_S);
        let npulses: usize;

        loop {
            match self.driver.gathering_current_number() {
                Ok((n, _max)) if n >= 1 => {
                    npulses = n as usize;
                    break;
                }
                Ok(_) => (),
                Err(e) => debug!("Gathering size read failed, will retry: {}", e),
            }

            if Instant::now() > deadline {
                warn!(
                    "Failed to get gathering size after {} seconds, returning 0 points",
                    GATHER_POLL_TIMEOUT_S
                );
                self.traj_state = TrajState::Idle;
                return Ok((0, " \n".to_string()));
            }

            thread::sleep(Duration::from_millis(50));
        }

        let response = self
            .driver
            .gathering_data_multiple_lines(0, npulses)
            .map_err(command_error("GatheringDataMultipleLinesGet"))?;

        let raw = if response.code < 0 {
            // Buffer too long for one read, fall back to chunks
            self.read_gathering_chunked(npulses)?
        } else if response.code != 0 {
            return Err(XpsError::Gathering(format!(
                "{} [Error {}]",
                self.driver.describe_error(response.code),
                response.code
            )));
        } else {
            response.payload
        };

        self.traj_state = TrajState::Idle;
        Ok((npulses, normalize_gathering(&raw)))
    }

    /// Write a previously read gathering buffer to a file, prefixed by the
    /// configured output titles.
    pub fn save_gathering_file(&mut self, path: &Path, buffer: &str) -> Result<(), XpsError> {
        self.traj_state = TrajState::Writing;

        let mut text = self.gather_titles.clone();
        text.push_str(buffer);
        std::fs::write(path, text)?;

        debug!(
            "Wrote {} lines, {} bytes to {:?}",
            buffer.lines().count(),
            buffer.len(),
            path
        );

        self.traj_state = TrajState::Idle;
        Ok(())
    }

    // ---- PRIVATE ----

    fn group_names(&self) -> Vec<String> {
        self.config.groups.keys().cloned().collect()
    }

    fn stage_names(&self) -> Vec<String> {
        self.config.stages.keys().cloned().collect()
    }

    fn check_stage(&self, stage: &str) -> Result<(), XpsError> {
        if self.config.stages.contains_key(stage) {
            Ok(())
        } else {
            Err(XpsError::UnknownStage(stage.to_string()))
        }
    }

    fn stage_limits(&self, stage: &str) -> Result<AxisLimits, XpsError> {
        let config = self
            .config
            .stages
            .get(stage)
            .ok_or_else(|| XpsError::UnknownStage(stage.to_string()))?;

        match (config.max_velocity, config.max_acceleration) {
            (Some(max_velocity), Some(max_acceleration)) => Ok(AxisLimits {
                max_velocity,
                max_acceleration,
            }),
            _ => Err(XpsError::MissingStageLimits(stage.to_string())),
        }
    }

    /// Resolve an optional group name, falling back to the trajectory group.
    fn group_or_trajectory(&self, group: Option<&str>) -> Result<String, XpsError> {
        match group {
            Some(g) if self.config.groups.contains_key(g) => Ok(g.to_string()),
            _ => self.traj_group.clone().ok_or(XpsError::NoTrajectoryGroup),
        }
    }

    /// Chunked gathering read for buffers the controller refuses to send in
    /// one response, growing the chunk count until a read succeeds.
    fn read_gathering_chunked(&mut self, npulses: usize) -> Result<String, XpsError> {
        let mut nchunks = 3;
        let mut nx = npulses.saturating_sub(2) / nchunks;
        let first;

        loop {
            thread::sleep(Duration::from_millis(50));

            let response = self
                .driver
                .gathering_data_multiple_lines(0, nx)
                .map_err(command_error("GatheringDataMultipleLinesGet"))?;

            if response.code == 0 {
                first = response.payload;
                break;
            }

            nchunks += 2;
            nx = npulses.saturating_sub(2) / nchunks;

            if nchunks > 10 {
                return Err(XpsError::Gathering(
                    "controller refused chunked reads".to_string(),
                ));
            }
        }

        let mut parts = vec![first];
        for chunk in 1..nchunks {
            let response = self
                .driver
                .gathering_data_multiple_lines(chunk * nx, nx)
                .map_err(command_error("GatheringDataMultipleLinesGet"))?;
            parts.push(response.payload);
        }

        let response = self
            .driver
            .gathering_data_multiple_lines(nchunks * nx, npulses - nchunks * nx)
            .map_err(command_error("GatheringDataMultipleLinesGet"))?;
        parts.push(response.payload);

        Ok(parts.concat())
    }

    /// Apply a driver call to one group, or every group when `group` is
    /// `None`.
    fn group_action<F>(
        &mut self,
        group: Option<&str>,
        action: &str,
        mut call: F,
    ) -> Result<(), XpsError>
    where
        F: FnMut(&mut XpsDriver<T>, &str) -> Result<(), DriverError>,
    {
        let groups = match group {
            Some(g) if self.config.groups.contains_key(g) => vec![g.to_string()],
            Some(g) => return Err(XpsError::UnknownGroup(g.to_string())),
            None => self.group_names(),
        };

        for g in groups {
            call(&mut self.driver, &g)
                .map_err(command_error(format!("{} group '{}'", action, g)))?;
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn command_error<S: Into<String>>(action: S) -> impl FnOnce(DriverError) -> XpsError {
    let action = action.into();
    move |source| XpsError::Command { action, source }
}

/// Fully qualified gathering mnemonics for a trajectory.
fn gather_outputs(group: &str, axes: &[String], outputs: &[String]) -> Vec<String> {
    let mut full = Vec::with_capacity(axes.len() * outputs.len());
    for output in outputs {
        for axis in axes {
            full.push(format!("{}.{}.{}", group, axis, output));
        }
    }
    full
}

/// Header block naming the gathered outputs.
fn gather_titles(outputs: &[String]) -> String {
    format!("{}\n#{}\n", GATHER_HEADER, outputs.join(" "))
}

/// The controller separates gathering fields with `;` and pads with `\r` and
/// `\t`; normalise to spaces.
fn normalize_gathering(buffer: &str) -> String {
    buffer
        .chars()
        .map(|c| match c {
            ';' | '\r' | '\t' => ' ',
            other => other,
        })
        .collect()
}

/// Apply a [`TuningUpdate`] on top of current PIDFF parameters. Closed loop
/// control is enabled unless the update says otherwise.
fn apply_tuning(current: &PidffVelocity, update: &TuningUpdate) -> PidffVelocity {
    PidffVelocity {
        closed_loop: update.closed_loop.unwrap_or(true),
        kp: update.kp.unwrap_or(current.kp),
        ki: update.ki.unwrap_or(current.ki),
        kd: update.kd.unwrap_or(current.kd),
        ks: update.ks.unwrap_or(current.ks),
        integration_time_s: update.integration_time_s.unwrap_or(current.integration_time_s),
        derivative_filter_cutoff_hz: update
            .derivative_filter_cutoff_hz
            .unwrap_or(current.derivative_filter_cutoff_hz),
        gkp: update.gkp.unwrap_or(current.gkp),
        gki: update.gki.unwrap_or(current.gki),
        gkd: update.gkd.unwrap_or(current.gkd),
        kform: update.kform.unwrap_or(current.kform),
        feed_forward_gain: update.feed_forward_gain.unwrap_or(current.feed_forward_gain),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::VecDeque;
    use xps_if::config::{GroupConfig, StageConfig};
    use xps_if::proto::Response;

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

    /// Remote store stub for tests that never touch the filesystem.
    struct NoRemote;

    impl RemoteStore for NoRemote {
        fn list(&mut self, _dir: &str) -> Result<Vec<String>, RemoteError> {
            Ok(Vec::new())
        }

        fn get_text(&mut self, _dir: &str, _name: &str) -> Result<String, RemoteError> {
            Ok(String::new())
        }

        fn put_text(&mut self, _dir: &str, _name: &str, _text: &str) -> Result<(), RemoteError> {
            Ok(())
        }

        fn delete(&mut self, _dir: &str, _name: &str) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    /// One `MultipleAxesInUse` group of two stages.
    fn test_config() -> SystemConfig {
        let mut config = SystemConfig::default();
        config.groups.insert(
            "FineXY".to_string(),
            GroupConfig {
                category: "MultipleAxesInUse".to_string(),
                positioners: vec!["X".to_string(), "Y".to_string()],
            },
        );
        for name in ["FineXY.X", "FineXY.Y"].iter() {
            config.stages.insert(
                name.to_string(),
                StageConfig {
                    stage_type: "XMS50".to_string(),
                    ..Default::default()
                },
            );
        }
        config
    }

    fn client(script: &[(&str, &str)]) -> NewportXps<ScriptedTransport> {
        NewportXps {
            settings: XpsSettings::new("xps-test"),
            driver: XpsDriver::new(ScriptedTransport::new(script)),
            remote: Box::new(NoRemote),
            firmware_version: "XPS-C8 Firmware V2.6.0".to_string(),
            generation: Generation::C,
            config: test_config(),
            traj_group: Some("FineXY".to_string()),
            traj_state: TrajState::Idle,
            traj_file: None,
            trajectories: BTreeMap::new(),
            gather_titles: String::new(),
            ngathered: 0,
        }
    }

    #[test]
    fn test_status_report() {
        let mut c = client(&[
            ("ElapsedTimeGet(double *)", "0,3600.0,EndOfAPI"),
            ("PositionerHardwareStatusGet(FineXY.X,int *)", "0,0,EndOfAPI"),
            (
                "PositionerHardwareStatusStringGet(0,char *)",
                "0,First driver powered on,EndOfAPI",
            ),
            ("PositionerHardwareStatusGet(FineXY.Y,int *)", "0,0,EndOfAPI"),
            (
                "PositionerHardwareStatusStringGet(0,char *)",
                "0,First driver powered on,EndOfAPI",
            ),
            ("PositionerErrorGet(FineXY.X,int *)", "0,0,EndOfAPI"),
            ("PositionerErrorStringGet(0,char *)", "0,,EndOfAPI"),
            ("PositionerErrorGet(FineXY.Y,int *)", "0,0,EndOfAPI"),
            ("PositionerErrorStringGet(0,char *)", "0,,EndOfAPI"),
            ("GroupStatusGet(FineXY,int *)", "0,12,EndOfAPI"),
            (
                "GroupStatusStringGet(12,char *)",
                "0,Ready state from motion,EndOfAPI",
            ),
        ]);

        let report = c.status_report().unwrap();

        assert!(report.contains("# XPS host:         xps-test"));
        assert!(report.contains("# Firmware:         XPS-C8 Firmware V2.6.0"));
        assert!(report.contains("# Trajectory Group: FineXY"));
        assert!(report.contains("FineXY (MultipleAxesInUse), Status: Ready state from motion"));
        assert!(report.contains("# FineXY.X (XMS50)"));
        assert!(report.contains("      Hardware Status: First driver powered on"));

        // Empty positioner error strings read as OK
        assert!(report.contains("      Positioner Errors: OK"));
    }

    #[test]
    fn test_move_group_fills_missing_axes() {
        let mut c = client(&[
            (
                "GroupPositionCurrentGet(FineXY,double *,double *)",
                "0,1,2,EndOfAPI",
            ),
            ("GroupMoveAbsolute(FineXY,5,2)", "0,,EndOfAPI"),
        ]);

        // Only X is named (ignoring case); Y holds its current position
        let mut targets = BTreeMap::new();
        targets.insert("x".to_string(), 5.0);
        c.move_group(None, &targets).unwrap();
    }

    #[test]
    fn test_arm_trajectory() {
        let mut c = client(&[
            ("GatheringReset()", "0,,EndOfAPI"),
            (
                "GatheringConfigurationSet(FineXY.X.CurrentPosition,FineXY.X.SetpointPosition)",
                "0,,EndOfAPI",
            ),
            ("MultipleAxesPVTPulseOutputSet(FineXY,2,3,0.01)", "0,,EndOfAPI"),
            ("MultipleAxesPVTVerification(FineXY,scan.trj)", "0,,EndOfAPI"),
        ]);

        c.trajectories.insert(
            "scan".to_string(),
            Trajectory {
                kind: TrajKind::Line {
                    start: vec![-0.1],
                    stop: vec![1.1],
                },
                axes: vec!["X".to_string()],
                pixel_time_s: 0.01,
                npulses: 1002,
                nsegments: 3,
                uploaded: true,
                buffer: String::new(),
            },
        );

        c.arm_trajectory("scan", false).unwrap();

        assert_eq!(c.traj_state(), TrajState::Armed);
        assert_eq!(c.traj_file.as_deref(), Some("scan.trj"));
        assert!(c
            .gather_titles
            .ends_with("#FineXY.X.CurrentPosition FineXY.X.SetpointPosition\n"));

        // A trajectory that was never uploaded cannot be armed
        let mut c = client(&[]);
        c.trajectories.insert(
            "scan".to_string(),
            Trajectory {
                kind: TrajKind::Line {
                    start: vec![-0.1],
                    stop: vec![1.1],
                },
                axes: vec!["X".to_string()],
                pixel_time_s: 0.01,
                npulses: 1002,
                nsegments: 3,
                uploaded: false,
                buffer: String::new(),
            },
        );
        assert!(matches!(
            c.arm_trajectory("scan", false),
            Err(XpsError::TrajectoryNotUploaded(_))
        ));
    }

    #[test]
    fn test_generation_detect() {
        assert_eq!(
            Generation::detect("XPS-C8 Firmware V2.6.0"),
            Generation::C
        );
        assert_eq!(Generation::detect("XPS-Q8 Firmware V1.0"), Generation::Q);
        assert_eq!(Generation::detect("XPS-D 1.2.3"), Generation::D);
        assert_eq!(Generation::detect("HXP-D something"), Generation::D);
        assert_eq!(Generation::detect("XPS-RL x.y"), Generation::D);

        assert_eq!(Generation::C.remote_root(), "/Admin");
        assert_eq!(Generation::D.remote_root(), "");
        assert!(Generation::D.uses_sftp());
        assert!(!Generation::Q.uses_sftp());
    }

    #[test]
    fn test_gather_outputs_and_titles() {
        let outputs = gather_outputs(
            "FineXY",
            &["X".to_string()],
            &[
                "CurrentPosition".to_string(),
                "SetpointPosition".to_string(),
            ],
        );
        assert_eq!(
            outputs,
            vec![
                "FineXY.X.CurrentPosition".to_string(),
                "FineXY.X.SetpointPosition".to_string()
            ]
        );

        let titles = gather_titles(&outputs);
        assert!(titles.starts_with("# XPS Gathering Data\n"));
        assert!(titles.ends_with("#FineXY.X.CurrentPosition FineXY.X.SetpointPosition\n"));
    }

    #[test]
    fn test_normalize_gathering() {
        assert_eq!(
            normalize_gathering("1.0;2.0\t3.0\r\n4.0"),
            "1.0 2.0 3.0 \n4.0"
        );
    }

    #[test]
    fn test_apply_tuning() {
        let current = PidffVelocity {
            closed_loop: false,
            kp: 0.5,
            ki: 0.1,
            kd: 0.0,
            ks: 0.0,
            integration_time_s: 0.25,
            derivative_filter_cutoff_hz: 100.0,
            gkp: 0.0,
            gki: 0.0,
            gkd: 0.0,
            kform: 1.0,
            feed_forward_gain: 0.9,
        };

        let update = TuningUpdate {
            kp: Some(0.8),
            ..Default::default()
        };
        let applied = apply_tuning(&current, &update);

        // Closed loop defaults on, the named field changes, the rest hold
        assert!(applied.closed_loop);
        assert_eq!(applied.kp, 0.8);
        assert_eq!(applied.ki, 0.1);
        assert_eq!(applied.feed_forward_gain, 0.9);

        let update = TuningUpdate {
            closed_loop: Some(false),
            feed_forward_gain: Some(1.0),
            ..Default::default()
        };
        let applied = apply_tuning(&current, &update);
        assert!(!applied.closed_loop);
        assert_eq!(applied.feed_forward_gain, 1.0);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = XpsSettings::new("xps-a.example.org");
        assert_eq!(settings.host, "xps-a.example.org");
        assert_eq!(settings.port, COMMAND_PORT);
        assert_eq!(settings.username, "Administrator");
        assert_eq!(
            settings.gather_outputs,
            vec!["CurrentPosition", "SetpointPosition"]
        );
    }
}
