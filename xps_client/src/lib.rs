//! # Newport XPS client library
//!
//! Synchronous client for Newport XPS motion controllers. The controller is
//! driven over its ASCII command socket; configuration and trajectory files
//! move over FTP (generations C and Q) or SFTP (generation D).
//!
//! [`NewportXps`] is the entry point: it owns the command connection, the
//! remote file store and the cached group/stage configuration read from the
//! controller's `system.ini` at connect time.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command socket transport
pub mod socket;

/// Typed wrappers over the vendor command set
pub mod driver;

/// FTP/SFTP access to the controller's filesystem
pub mod remote;

/// High level controller client
pub mod controller;

// ------------------------------------------------------------------------------------------------
// RE-EXPORTS
// ------------------------------------------------------------------------------------------------

pub use controller::{
    Generation, NewportXps, TrajKind, TrajState, Trajectory, TuningUpdate, XpsError, XpsSettings,
};
pub use xps_if;
