//! Per-process table of live caches and the shared daemon connection

use std::collections::HashMap;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::client::connection::Connection;
use crate::client::handle::{Cache, CacheInner};
use crate::client::ClientConfig;
use crate::core::error::ClientError;
use crate::protocol::{Fingerprint, Message, RegisterRequest};

struct Entry {
    cache: Weak<CacheInner>,
    request: RegisterRequest,
}

pub(crate) struct ClientState {
    pub(crate) config: ClientConfig,
    conn: Option<Connection>,
    /// Set once reconnecting gave up; no further registrations are attempted
    failed: bool,
    entries: HashMap<Fingerprint, Entry>,
}

impl ClientState {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            conn: None,
            failed: false,
            entries: HashMap::new(),
        }
    }

    pub fn request_for(&self, menu: &str) -> RegisterRequest {
        RegisterRequest::new(menu, self.config.language.clone(), self.config.env.clone())
    }

    /// Live cache for a fingerprint
    pub fn live(&self, fingerprint: &Fingerprint) -> Option<Cache> {
        self.entries
            .get(fingerprint)
            .and_then(|entry| entry.cache.upgrade())
            .map(Cache::from_inner)
    }

    pub fn insert(&mut self, inner: &Rc<CacheInner>, request: RegisterRequest) {
        self.entries.insert(
            request.fingerprint(),
            Entry {
                cache: Rc::downgrade(inner),
                request,
            },
        );
    }

    pub fn live_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.cache.strong_count() > 0)
            .count()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        self.conn.as_ref().map(|conn| conn.as_raw_fd())
    }

    fn connection(&mut self) -> Result<&mut Connection, ClientError> {
        if self.failed {
            return Err(ClientError::ConnectionLost(io::Error::new(
                io::ErrorKind::NotConnected,
                "gave up reconnecting to menu-cached",
            )));
        }
        if self.conn.is_none() {
            self.conn = Some(Connection::connect(&self.config)?);
        }
        match self.conn.as_mut() {
            Some(conn) => Ok(conn),
            None => Err(ClientError::ConnectionLost(io::Error::from(
                io::ErrorKind::NotConnected,
            ))),
        }
    }

    /// Send a registration, reconnecting once if the connection broke
    pub fn register(&mut self, request: &RegisterRequest) -> Result<(), ClientError> {
        let message = Message::Register(request.clone());
        let sent = self.connection()?.send(&message);
        if let Err(e) = sent {
            tracing::debug!(error = %e, "send failed, reconnecting");
            self.reconnect()?;
            self.connection()?
                .send(&message)
                .map_err(ClientError::ConnectionLost)?;
        }
        Ok(())
    }

    /// Reconnect and register every live cache again
    fn reconnect(&mut self) -> Result<(), ClientError> {
        self.conn = None;
        let mut conn = match Connection::connect(&self.config) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "cannot reconnect to menu-cached");
                self.failed = true;
                return Err(e);
            }
        };

        self.entries.retain(|_, entry| entry.cache.strong_count() > 0);
        for (fingerprint, entry) in &self.entries {
            tracing::debug!(fingerprint = %fingerprint, "re-registering");
            if let Err(e) = conn.send(&Message::Register(entry.request.clone())) {
                self.failed = true;
                return Err(ClientError::ConnectionLost(e));
            }
        }
        self.conn = Some(conn);
        Ok(())
    }

    /// Forget a cache that is being dropped and tell the daemon
    pub fn release(&mut self, fingerprint: &Fingerprint) {
        if self.entries.remove(fingerprint).is_none() {
            return;
        }
        if let Some(conn) = self.conn.as_mut() {
            if let Err(e) = conn.send(&Message::Unregister(fingerprint.clone())) {
                tracing::debug!(fingerprint = %fingerprint, error = %e, "unregister failed");
            }
        }
        self.entries.retain(|_, entry| entry.cache.strong_count() > 0);
        if self.entries.is_empty() {
            tracing::debug!("last cache released, closing connection");
            self.conn = None;
        }
    }

    /// Read pending reload notices. Waits up to `timeout` for the first one.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<Vec<Fingerprint>, ClientError> {
        let mut reloads = Vec::new();
        let result = match self.conn.as_mut() {
            Some(conn) => drain(conn, timeout, &mut reloads),
            None => return Ok(reloads),
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "connection to menu-cached lost");
            // Re-registering makes the daemon send a fresh notice for every cache
            self.reconnect()?;
        }
        Ok(reloads)
    }
}

fn drain(conn: &mut Connection, timeout: Option<Duration>, reloads: &mut Vec<Fingerprint>) -> io::Result<()> {
    let mut wait = timeout;
    while let Some(line) = conn.read_line(wait)? {
        match Message::parse(&line) {
            Ok(Message::Reload(fingerprint)) => {
                if !reloads.contains(&fingerprint) {
                    reloads.push(fingerprint);
                }
            }
            Ok(other) => tracing::debug!(message = ?other, "ignoring message from daemon"),
            Err(e) => tracing::warn!(error = %e, "bad message from daemon"),
        }
        wait = None;
    }
    Ok(())
}
