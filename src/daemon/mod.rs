//! Daemon module - The menu-cached service
//!
//! Provides:
//! - registry: Per-fingerprint records, debounced invalidation, idle eviction
//! - reactor: The event and service seam the registry runs on
//! - server: tokio socket server driving the registry

pub mod reactor;
pub mod registry;
pub mod server;

pub use registry::{Registry, RegistryConfig};
pub use server::{run, DaemonConfig};
