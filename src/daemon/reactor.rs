//! Reactor seam between the registry and the event loop
//!
//! The registry never touches sockets, timers or watches directly. It asks a
//! [`Reactor`] for them and is fed [`Event`]s back, which keeps it a plain
//! state machine that tests can drive by hand.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::meta::UsedFile;
use crate::protocol::{Fingerprint, Message};

pub use crate::backends::watch::WatchId;

/// Client connection handle
pub type ConnId = u64;

/// Timer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// What a timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Debounced regeneration after file changes
    Reload,
    /// Idle eviction of a record without subscribers
    Evict,
}

/// Services the registry needs from its event loop
pub trait Reactor {
    /// Queue a message to a connection. Sending to a closed connection is a no-op.
    fn send(&mut self, conn: ConnId, message: &Message);

    /// Fire [`Event::Timer`] for `fingerprint` once `after` has elapsed
    fn start_timer(&mut self, after: Duration, fingerprint: &Fingerprint, kind: TimerKind) -> TimerId;

    /// Cancel a timer. Cancelling a fired or unknown timer is a no-op.
    fn cancel_timer(&mut self, id: TimerId);

    /// Watch a manifest entry; changes arrive as [`Event::FileChanged`]
    fn add_watch(&mut self, fingerprint: &Fingerprint, entry: &UsedFile) -> Option<WatchId>;

    fn remove_watch(&mut self, id: WatchId);
}

/// Input to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A line received from a client, without its newline
    Line { conn: ConnId, line: String },
    /// A client hung up or errored
    Closed { conn: ConnId },
    Timer {
        id: TimerId,
        fingerprint: Fingerprint,
        kind: TimerKind,
    },
    FileChanged {
        watch: WatchId,
        fingerprint: Fingerprint,
        path: PathBuf,
    },
}
