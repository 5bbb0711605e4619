//! Core module - Shared building blocks
//!
//! This module provides:
//! - Error types for cache, protocol, generator and client failures
//! - Environment capture (XDG variables and language)
//! - Path conventions for cache files, sockets and helper executables
//! - Common utilities

pub mod env;
pub mod error;
pub mod paths;
pub mod util;
