//! Daemon server loop
//!
//! A single-threaded tokio runtime owns the registry. Connection readers,
//! timers and the file watcher run as tasks or callbacks that only forward
//! [`Event`]s over a channel; all state changes happen in the main loop.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

use crate::backends::generator::ProcessGenerator;
use crate::backends::watch::FsWatcher;
use crate::cache::meta::UsedFile;
use crate::core::paths::{default_generator_path, default_socket_path};
use crate::daemon::reactor::{ConnId, Event, Reactor, TimerId, TimerKind, WatchId};
use crate::daemon::registry::{Registry, RegistryConfig};
use crate::protocol::{Fingerprint, Message};

/// Daemon settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub generator: PathBuf,
    pub debounce: Duration,
    pub idle_timeout: Duration,
    /// Exit once the last record has been evicted
    pub exit_when_idle: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let registry = RegistryConfig::default();
        Self {
            socket_path: default_socket_path(),
            generator: default_generator_path(),
            debounce: registry.debounce,
            idle_timeout: registry.idle_timeout,
            exit_when_idle: true,
        }
    }
}

impl DaemonConfig {
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            debounce: self.debounce,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// Run the daemon until it is idle or signalled
pub fn run(config: DaemonConfig) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    runtime.block_on(serve(config))
}

/// Bind the daemon socket. Returns None when a live daemon already serves it.
pub fn bind_socket(path: &Path) -> Result<Option<UnixListener>> {
    if std::fs::symlink_metadata(path).is_ok() {
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Ok(None);
        }
        tracing::debug!(socket = %path.display(), "removing stale socket");
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove stale socket: {}", path.display()))?;
    }

    let listener = match UnixListener::bind(path) {
        Ok(listener) => listener,
        // Lost a race against another daemon
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to bind socket: {}", path.display()))
        }
    };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to set socket permissions: {}", path.display()))?;
    Ok(Some(listener))
}

/// Serve clients on the configured socket
pub async fn serve(config: DaemonConfig) -> Result<()> {
    let Some(listener) = bind_socket(&config.socket_path)? else {
        tracing::info!(socket = %config.socket_path.display(), "menu-cached is already running");
        return Ok(());
    };
    tracing::info!(
        socket = %config.socket_path.display(),
        generator = %config.generator.display(),
        "listening"
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let (fs_tx, mut fs_rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
    let watcher = FsWatcher::new(move |res: notify::Result<notify::Event>| {
        let _ = fs_tx.send(res);
    })
    .context("Failed to create filesystem watcher")?;

    let mut reactor = TokioReactor::new(event_tx, watcher);
    let mut registry = Registry::new(
        Box::new(ProcessGenerator::new(&config.generator)),
        config.registry_config(),
    );
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut next_conn: ConnId = 0;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    next_conn += 1;
                    tracing::debug!(conn = next_conn, "client connected");
                    reactor.attach(next_conn, stream);
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },

            Some(event) = event_rx.recv() => {
                let evicting = matches!(event, Event::Timer { kind: TimerKind::Evict, .. });
                match &event {
                    Event::Closed { conn } => {
                        tracing::debug!(conn = *conn, "client closed");
                        reactor.detach(*conn);
                    }
                    Event::Timer { id, .. } => reactor.timer_done(*id),
                    _ => {}
                }
                registry.handle(&mut reactor, event);

                if evicting && registry.is_empty() && config.exit_when_idle {
                    tracing::info!("no caches left, exiting");
                    break;
                }
            }

            Some(result) = fs_rx.recv() => match result {
                Ok(fs_event) => {
                    for hit in reactor.watcher.route(&fs_event) {
                        registry.handle(
                            &mut reactor,
                            Event::FileChanged {
                                watch: hit.watch,
                                fingerprint: hit.fingerprint,
                                path: hit.path,
                            },
                        );
                    }
                }
                Err(e) => tracing::warn!(error = %e, "watch error"),
            },

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }

            _ = sigterm.recv() => {
                tracing::info!("terminated");
                break;
            }
        }
    }

    registry.clear(&mut reactor);
    drop(listener);
    if let Err(e) = std::fs::remove_file(&config.socket_path) {
        tracing::debug!(error = %e, "socket already removed");
    }
    Ok(())
}

/// Reactor backed by tokio tasks and a notify watcher
struct TokioReactor {
    events: UnboundedSender<Event>,
    writers: HashMap<ConnId, UnboundedSender<String>>,
    timers: HashMap<TimerId, JoinHandle<()>>,
    next_timer: u64,
    watcher: FsWatcher,
}

impl TokioReactor {
    fn new(events: UnboundedSender<Event>, watcher: FsWatcher) -> Self {
        Self {
            events,
            writers: HashMap::new(),
            timers: HashMap::new(),
            next_timer: 0,
            watcher,
        }
    }

    /// Start reader and writer tasks for a new connection
    fn attach(&mut self, conn: ConnId, stream: UnixStream) {
        let (read_half, mut write_half) = stream.into_split();

        let events = self.events.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if events.send(Event::Line { conn, line }).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(conn, error = %e, "read failed");
                        break;
                    }
                }
            }
            let _ = events.send(Event::Closed { conn });
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    tracing::debug!(conn, error = %e, "write failed");
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });
        self.writers.insert(conn, tx);
    }

    fn detach(&mut self, conn: ConnId) {
        self.writers.remove(&conn);
    }

    fn timer_done(&mut self, id: TimerId) {
        self.timers.remove(&id);
    }
}

impl Reactor for TokioReactor {
    fn send(&mut self, conn: ConnId, message: &Message) {
        if let Some(tx) = self.writers.get(&conn) {
            let _ = tx.send(message.to_line());
        }
    }

    fn start_timer(&mut self, after: Duration, fingerprint: &Fingerprint, kind: TimerKind) -> TimerId {
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        let events = self.events.clone();
        let fingerprint = fingerprint.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(Event::Timer {
                id,
                fingerprint,
                kind,
            });
        });
        self.timers.insert(id, handle);
        id
    }

    fn cancel_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
    }

    fn add_watch(&mut self, fingerprint: &Fingerprint, entry: &UsedFile) -> Option<WatchId> {
        self.watcher.add(fingerprint.clone(), entry)
    }

    fn remove_watch(&mut self, id: WatchId) {
        self.watcher.remove(id);
    }
}
