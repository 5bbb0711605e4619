//! Error taxonomy shared by the client and the daemon

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Failure to load a cache file
#[derive(Debug, Error)]
pub enum CacheError {
    /// The file could not be opened or read. Callers treat this as "not cached".
    #[error("cannot read cache file {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The format version is outside the supported window. Never partially read.
    #[error("unsupported cache format version {found:?}")]
    VersionMismatch { found: String },

    /// A header line was missing where the format requires one
    #[error("malformed cache header at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: &'static str },
}

/// Malformed wire message
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unknown command in line {0:?}")]
    UnknownCommand(String),

    #[error("register request has {0} fields, expected 8 or 9")]
    MalformedRegister(usize),

    #[error("invalid fingerprint {0:?}")]
    BadFingerprint(String),
}

/// Failure of the external generator
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("failed to run generator {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot create output directory {path:?}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("generator exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("generator output is unusable: {0}")]
    Unreadable(#[from] CacheError),
}

/// Client-side failure
#[derive(Debug, Error)]
pub enum ClientError {
    /// No daemon answered on the socket, even after trying to start one
    #[error("cannot connect to menu-cached at {socket:?}: {source}")]
    DaemonUnavailable {
        socket: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The daemon connection broke and could not be re-established
    #[error("connection to menu-cached lost: {0}")]
    ConnectionLost(#[source] io::Error),

    /// No reply or reload notice within the configured time
    #[error("timed out waiting for menu {menu:?}")]
    Timeout { menu: String },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}
