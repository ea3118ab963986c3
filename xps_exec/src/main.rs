//! # XPS Command Line Executable
//!
//! Simple interaction with Newport XPS motion controllers: status and group
//! reporting, group initialisation and homing, reboot, and round tripping of
//! the controller's `system.ini`/`stages.ini` configuration files.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use log::info;
use structopt::StructOpt;
use std::path::PathBuf;
use std::time::Duration;

// Internal
use util::logger::{logger_init, LevelFilter};
use xps_client::xps_if::proto::decode_latin1;
use xps_client::{NewportXps, XpsSettings};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// How long to wait for a rebooted controller to come back.
const REBOOT_TIMEOUT_S: u64 = 120;

// ------------------------------------------------------------------------------------------------
// DATA STRUCTURES
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(
    name = "xps",
    about = "Command line interaction with Newport XPS motion controllers"
)]
struct Opt {
    /// Controller host name or IP address
    host: String,

    /// TOML settings file providing credentials and gathering outputs
    #[structopt(short, long, parse(from_os_str))]
    params: Option<PathBuf>,

    /// Controller account user name
    #[structopt(short, long)]
    username: Option<String>,

    /// Controller account password
    #[structopt(short = "w", long)]
    password: Option<String>,

    /// Command socket port
    #[structopt(long)]
    port: Option<u16>,

    /// Log debug and trace records
    #[structopt(short, long)]
    verbose: bool,

    /// Mirror the log into this file
    #[structopt(long, parse(from_os_str))]
    log_file: Option<PathBuf>,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Print status and configuration of the controller
    Status,

    /// Print the groups and their positioners
    Groups,

    /// Initialise a group by name
    Initialize { group: String },

    /// Initialise every group
    InitializeAll,

    /// Home a group by name
    Home { group: String },

    /// Home every group
    HomeAll,

    /// Reboot the controller and wait for it to come back
    Reboot,

    /// Download system.ini, by default to `system_<host>.ini`
    GetSystemIni {
        #[structopt(parse(from_os_str))]
        file: Option<PathBuf>,
    },

    /// Upload system.ini from a file
    PutSystemIni {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
    },

    /// Download stages.ini, by default to `stages_<host>.ini`
    GetStagesIni {
        #[structopt(parse(from_os_str))]
        file: Option<PathBuf>,
    },

    /// Upload stages.ini from a file
    PutStagesIni {
        #[structopt(parse(from_os_str))]
        file: PathBuf,
    },
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    let min_level = if opt.verbose {
        LevelFilter::Trace
    } else {
        LevelFilter::Info
    };

    logger_init(min_level, opt.log_file.as_deref()).wrap_err("Failed to initialise logging")?;

    // ---- LOAD PARAMETERS ----

    // A settings file provides the base values, command line flags override
    let mut settings: XpsSettings = match &opt.params {
        Some(path) => util::params::load(path).wrap_err("Could not load the settings file")?,
        None => XpsSettings::default(),
    };

    settings.host = opt.host.clone();
    if let Some(username) = opt.username.clone() {
        settings.username = username;
    }
    if let Some(password) = opt.password.clone() {
        settings.password = password;
    }
    if let Some(port) = opt.port {
        settings.port = port;
    }

    // ---- CONNECT ----

    let mut xps = NewportXps::connect(settings)
        .wrap_err_with(|| format!("Cannot connect to the XPS at {}", opt.host))?;

    // ---- RUN THE COMMAND ----

    match opt.command {
        Command::Status => {
            let report = xps.status_report().wrap_err("Could not read status")?;
            println!("{}", report);
        }

        Command::Groups => {
            println!("{:<20} {:<32} {}", "Group Name", "Positioners", "Category");
            for (name, group) in &xps.system_config().groups {
                println!(
                    "{:<20} {:<32} {}",
                    name,
                    group.positioners.join(", "),
                    group.category
                );
            }
        }

        Command::Initialize { group } => {
            check_group(&xps, &group)?;
            xps.initialize_group(Some(&group), true, false)
                .wrap_err_with(|| format!("Could not initialise '{}'", group))?;
            info!("Group '{}' initialised", group);
        }

        Command::InitializeAll => {
            xps.initialize_all_groups()
                .wrap_err("Could not initialise all groups")?;
            info!("All groups initialised");
        }

        Command::Home { group } => {
            check_group(&xps, &group)?;
            xps.home_group(Some(&group))
                .wrap_err_with(|| format!("Could not home '{}'", group))?;
            info!("Group '{}' homed", group);
        }

        Command::HomeAll => {
            xps.home_all_groups().wrap_err("Could not home all groups")?;
            info!("All groups homed");
        }

        Command::Reboot => {
            info!("Rebooting {}", opt.host);
            xps.reboot(true, Duration::from_secs(REBOOT_TIMEOUT_S))
                .wrap_err("Reboot failed")?;
            info!("Controller is back");
        }

        Command::GetSystemIni { file } => {
            let file = file.unwrap_or_else(|| PathBuf::from(format!("system_{}.ini", opt.host)));
            xps.save_system_ini(&file)
                .wrap_err("Could not download system.ini")?;
            info!("Saved system.ini to {:?}", file);
        }

        Command::PutSystemIni { file } => {
            let text = read_ini_file(&file)?;
            xps.upload_system_ini(&text)
                .wrap_err("Could not upload system.ini")?;
            info!("Uploaded {:?} as system.ini", file);
        }

        Command::GetStagesIni { file } => {
            let file = file.unwrap_or_else(|| PathBuf::from(format!("stages_{}.ini", opt.host)));
            xps.save_stages_ini(&file)
                .wrap_err("Could not download stages.ini")?;
            info!("Saved stages.ini to {:?}", file);
        }

        Command::PutStagesIni { file } => {
            let text = read_ini_file(&file)?;
            xps.upload_stages_ini(&text)
                .wrap_err("Could not upload stages.ini")?;
            info!("Uploaded {:?} as stages.ini", file);
        }
    }

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Check a group name exists before acting on it, listing the valid names.
fn check_group(xps: &NewportXps, group: &str) -> Result<()> {
    if xps.system_config().groups.contains_key(group) {
        return Ok(());
    }

    let known: Vec<&str> = xps
        .system_config()
        .groups
        .keys()
        .map(|k| k.as_str())
        .collect();

    Err(eyre!(
        "'{}' is not a valid group name, expected one of: {}",
        group,
        known.join(", ")
    ))
}

/// Read a local ini file. The vendor files are latin-1, not UTF-8.
fn read_ini_file(path: &PathBuf) -> Result<String> {
    let bytes =
        std::fs::read(path).wrap_err_with(|| format!("Could not read {:?}", path))?;
    Ok(decode_latin1(&bytes))
}
