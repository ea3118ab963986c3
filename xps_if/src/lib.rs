//! # XPS interface crate.
//!
//! Provides the vendor protocol definitions shared between the client library
//! and the executables: the socket command codec, the `system.ini`
//! configuration model and the PVT trajectory file format.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Socket command/response codec
pub mod proto;

/// `system.ini` configuration model
pub mod config;

/// PVT trajectory file construction
pub mod traj;
