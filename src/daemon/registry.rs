//! Daemon registry - One record per fingerprint
//!
//! Records move through `Fresh -> PendingReload -> Regenerating -> Fresh`.
//! File changes arm a debounce timer that is re-armed by every further
//! change; when it fires the generator runs, the watch set is synced with the
//! new manifest and every subscriber receives one `REL`.
//! A record created from a cache file that was already up to date starts
//! out pending, with one refresh scheduled.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backends::generator::{GenerateJob, Generator};
use crate::cache::meta::UsedFile;
use crate::cache::reader::read_used_files;
use crate::cache::store::fresh_header;
use crate::core::error::GeneratorError;
use crate::core::util::is_readable;
use crate::daemon::reactor::{ConnId, Event, Reactor, TimerId, TimerKind, WatchId};
use crate::protocol::{Fingerprint, Message, RegisterRequest};

/// File name suffixes whose changes inside a watched directory matter
pub const RELEVANT_SUFFIXES: [&str; 2] = [".desktop", ".directory"];

/// Timing of the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Quiet period after the last file change before regenerating
    pub debounce: Duration,
    /// How long a record without subscribers is kept
    pub idle_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// Invalidation state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Fresh,
    PendingReload,
    Regenerating,
}

/// Daemon side state of one cache
#[derive(Debug)]
pub struct CacheRecord {
    pub fingerprint: Fingerprint,
    pub request: RegisterRequest,
    pub cache_file: PathBuf,
    state: RecordState,
    watches: Vec<(UsedFile, WatchId)>,
    /// One entry per registration, a connection may appear more than once
    subscribers: Vec<ConnId>,
    reload_timer: Option<TimerId>,
    evict_timer: Option<TimerId>,
}

impl CacheRecord {
    pub fn state(&self) -> RecordState {
        self.state
    }

    pub fn subscribers(&self) -> &[ConnId] {
        &self.subscribers
    }

    /// Manifest entries currently watched
    pub fn watched(&self) -> impl Iterator<Item = &UsedFile> {
        self.watches.iter().map(|(entry, _)| entry)
    }

    pub fn is_evicting(&self) -> bool {
        self.evict_timer.is_some()
    }

    fn job(&self, force: bool) -> GenerateJob {
        GenerateJob {
            menu: self.request.menu.clone(),
            lang: self.request.lang.clone(),
            output: self.cache_file.clone(),
            env: self.request.env.clone(),
            force,
        }
    }

    fn remove_subscriber(&mut self, conn: ConnId) -> bool {
        match self.subscribers.iter().position(|c| *c == conn) {
            Some(pos) => {
                self.subscribers.remove(pos);
                true
            }
            None => false,
        }
    }

    fn arm_eviction(&mut self, reactor: &mut dyn Reactor, idle_timeout: Duration) {
        if let Some(old) = self.evict_timer.take() {
            reactor.cancel_timer(old);
        }
        tracing::debug!(fingerprint = %self.fingerprint, "no subscribers left, arming eviction");
        self.evict_timer = Some(reactor.start_timer(idle_timeout, &self.fingerprint, TimerKind::Evict));
    }

    /// Make the watch set match `used`
    fn sync_watches(&mut self, reactor: &mut dyn Reactor, used: Vec<UsedFile>) {
        let (kept, removed): (Vec<_>, Vec<_>) = std::mem::take(&mut self.watches)
            .into_iter()
            .partition(|(entry, _)| used.contains(entry));
        for (entry, id) in removed {
            tracing::debug!(fingerprint = %self.fingerprint, path = %entry.path().display(), "dropping watch");
            reactor.remove_watch(id);
        }
        self.watches = kept;

        for entry in used {
            if self.watches.iter().any(|(watched, _)| *watched == entry) {
                continue;
            }
            if let Some(id) = reactor.add_watch(&self.fingerprint, &entry) {
                self.watches.push((entry, id));
            }
        }
    }

    fn release(&mut self, reactor: &mut dyn Reactor) {
        for (_, id) in self.watches.drain(..) {
            reactor.remove_watch(id);
        }
        for timer in [self.reload_timer.take(), self.evict_timer.take()].into_iter().flatten() {
            reactor.cancel_timer(timer);
        }
    }

    /// Send `REL` once to every distinct subscriber
    fn broadcast_reload(&self, reactor: &mut dyn Reactor) {
        let message = Message::Reload(self.fingerprint.clone());
        let mut notified: Vec<ConnId> = Vec::with_capacity(self.subscribers.len());
        for conn in &self.subscribers {
            if !notified.contains(conn) {
                reactor.send(*conn, &message);
                notified.push(*conn);
            }
        }
    }
}

/// Run the generator and read back the manifest it wrote
fn regenerate(
    generator: &mut dyn Generator,
    record: &CacheRecord,
    force: bool,
) -> Result<Vec<UsedFile>, GeneratorError> {
    generator.generate(&record.job(force))?;
    Ok(read_used_files(&record.cache_file)?)
}

/// Whether a change of `path` seen by the watch on `entry` invalidates the cache
pub fn is_relevant_change(entry: &UsedFile, path: &Path) -> bool {
    if !entry.is_dir() {
        return path == entry.path();
    }
    if path == entry.path() {
        return true;
    }
    path.starts_with(entry.path())
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| RELEVANT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
}

/// All records of the daemon
pub struct Registry {
    generator: Box<dyn Generator>,
    config: RegistryConfig,
    records: HashMap<Fingerprint, CacheRecord>,
}

impl Registry {
    pub fn new(generator: Box<dyn Generator>, config: RegistryConfig) -> Self {
        Self {
            generator,
            config,
            records: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn record(&self, fingerprint: &Fingerprint) -> Option<&CacheRecord> {
        self.records.get(fingerprint)
    }

    /// Feed one event
    pub fn handle(&mut self, reactor: &mut dyn Reactor, event: Event) {
        match event {
            Event::Line { conn, line } => match Message::parse(&line) {
                Ok(Message::Register(request)) => self.register(reactor, conn, request),
                Ok(Message::Unregister(fingerprint)) => self.unregister(reactor, conn, &fingerprint),
                Ok(Message::Reload(fingerprint)) => {
                    tracing::warn!(conn, fingerprint = %fingerprint, "ignoring reload notice from a client");
                }
                Err(e) => tracing::warn!(conn, error = %e, "bad request"),
            },
            Event::Closed { conn } => self.connection_closed(reactor, conn),
            Event::Timer {
                id,
                fingerprint,
                kind,
            } => self.timer_fired(reactor, id, &fingerprint, kind),
            Event::FileChanged {
                watch,
                fingerprint,
                path,
            } => self.file_changed(reactor, watch, &fingerprint, &path),
        }
    }

    /// Subscribe `conn` to a cache, creating the record on first use. The
    /// client always gets a `REL` back, which doubles as the acknowledgement.
    pub fn register(&mut self, reactor: &mut dyn Reactor, conn: ConnId, request: RegisterRequest) {
        let fingerprint = request.fingerprint();
        let debounce = self.config.debounce;

        match self.records.get_mut(&fingerprint) {
            Some(record) => {
                if !is_readable(&record.cache_file) {
                    tracing::info!(fingerprint = %fingerprint, "cache file vanished, regenerating");
                    match regenerate(self.generator.as_mut(), record, true) {
                        Ok(used) => record.sync_watches(reactor, used),
                        Err(e) => tracing::warn!(fingerprint = %fingerprint, error = %e, "regeneration failed"),
                    }
                }
                if let Some(timer) = record.evict_timer.take() {
                    tracing::debug!(fingerprint = %fingerprint, "eviction cancelled");
                    reactor.cancel_timer(timer);
                }
                record.subscribers.push(conn);
            }
            None => {
                let mut record = CacheRecord {
                    fingerprint: fingerprint.clone(),
                    cache_file: request.cache_file(),
                    request,
                    state: RecordState::Fresh,
                    watches: Vec::new(),
                    subscribers: vec![conn],
                    reload_timer: None,
                    evict_timer: None,
                };

                let used = match fresh_header(&record.cache_file) {
                    Some(header) => {
                        // The mtime check can miss changes; regenerate once later anyway
                        tracing::debug!(fingerprint = %fingerprint, "cache file is up to date, scheduling a refresh");
                        record.state = RecordState::PendingReload;
                        record.reload_timer =
                            Some(reactor.start_timer(debounce, &fingerprint, TimerKind::Reload));
                        header.existing_used_files()
                    }
                    None => match regenerate(self.generator.as_mut(), &record, false) {
                        Ok(used) => used,
                        Err(e) => {
                            tracing::warn!(fingerprint = %fingerprint, error = %e, "generation failed");
                            Vec::new()
                        }
                    },
                };
                record.sync_watches(reactor, used);

                tracing::info!(
                    fingerprint = %fingerprint,
                    menu = %record.request.menu,
                    lang = %record.request.lang,
                    watches = record.watches.len(),
                    "new cache record"
                );
                self.records.insert(fingerprint.clone(), record);
            }
        }

        reactor.send(conn, &Message::Reload(fingerprint));
    }

    /// Drop one registration of `conn`
    pub fn unregister(&mut self, reactor: &mut dyn Reactor, conn: ConnId, fingerprint: &Fingerprint) {
        let idle_timeout = self.config.idle_timeout;
        let Some(record) = self.records.get_mut(fingerprint) else {
            tracing::debug!(conn, fingerprint = %fingerprint, "unregister for unknown cache");
            return;
        };
        if !record.remove_subscriber(conn) {
            tracing::debug!(conn, fingerprint = %fingerprint, "unregister from a non-subscriber");
            return;
        }
        if record.subscribers.is_empty() {
            record.arm_eviction(reactor, idle_timeout);
        }
    }

    /// Forget every registration of a closed connection
    pub fn connection_closed(&mut self, reactor: &mut dyn Reactor, conn: ConnId) {
        let idle_timeout = self.config.idle_timeout;
        for record in self.records.values_mut() {
            let before = record.subscribers.len();
            record.subscribers.retain(|c| *c != conn);
            if before > 0 && record.subscribers.is_empty() {
                record.arm_eviction(reactor, idle_timeout);
            }
        }
    }

    /// A watched path changed
    pub fn file_changed(
        &mut self,
        reactor: &mut dyn Reactor,
        watch: WatchId,
        fingerprint: &Fingerprint,
        path: &Path,
    ) {
        let debounce = self.config.debounce;
        let Some(record) = self.records.get_mut(fingerprint) else {
            return;
        };
        let Some((entry, _)) = record.watches.iter().find(|(_, id)| *id == watch) else {
            return;
        };
        if !is_relevant_change(entry, path) {
            return;
        }

        if let Some(timer) = record.reload_timer.take() {
            reactor.cancel_timer(timer);
        }
        if record.state == RecordState::Fresh {
            tracing::debug!(fingerprint = %fingerprint, path = %path.display(), "change detected");
        }
        record.state = RecordState::PendingReload;
        record.reload_timer = Some(reactor.start_timer(debounce, fingerprint, TimerKind::Reload));
    }

    pub fn timer_fired(
        &mut self,
        reactor: &mut dyn Reactor,
        id: TimerId,
        fingerprint: &Fingerprint,
        kind: TimerKind,
    ) {
        let Some(record) = self.records.get_mut(fingerprint) else {
            return;
        };

        match kind {
            TimerKind::Reload => {
                if record.reload_timer != Some(id) {
                    return;
                }
                record.reload_timer = None;
                record.state = RecordState::Regenerating;

                match regenerate(self.generator.as_mut(), record, true) {
                    Ok(used) => {
                        record.sync_watches(reactor, used);
                        record.state = RecordState::Fresh;
                        tracing::info!(fingerprint = %fingerprint, "cache regenerated");
                        record.broadcast_reload(reactor);
                    }
                    Err(e) => {
                        record.state = RecordState::PendingReload;
                        tracing::warn!(fingerprint = %fingerprint, error = %e, "regeneration failed");
                    }
                }
            }
            TimerKind::Evict => {
                if record.evict_timer != Some(id) {
                    return;
                }
                record.evict_timer = None;
                if record.subscribers.is_empty() {
                    self.evict(reactor, fingerprint);
                }
            }
        }
    }

    /// Release a record and everything it holds
    pub fn evict(&mut self, reactor: &mut dyn Reactor, fingerprint: &Fingerprint) {
        if let Some(mut record) = self.records.remove(fingerprint) {
            record.release(reactor);
            tracing::info!(fingerprint = %fingerprint, "cache record evicted");
        }
    }

    /// Release everything, e.g. on shutdown
    pub fn clear(&mut self, reactor: &mut dyn Reactor) {
        for (_, mut record) in self.records.drain() {
            record.release(reactor);
        }
    }
}
