//! Backends module - External process and file system integrations
//!
//! Provides:
//! - generator: Running the external cache generator
//! - watch: File system watches on used files (notify)

pub mod generator;
pub mod watch;
