//! Client module - Access to menu caches through menu-cached
//!
//! A [`Client`] owns the process-wide table of live caches and the daemon
//! connection. Everything here is single threaded: handles are `Rc` based and
//! reload notices are only processed inside [`Client::dispatch`],
//! [`Client::wait_and_dispatch`] and [`Client::lookup_sync`].

mod connection;
mod handle;
mod registry;

pub use handle::{Cache, NotifyToken};

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::core::env::{current_language, XdgEnv};
use crate::core::error::ClientError;
use crate::core::paths::{default_daemon_path, default_socket_path};
use handle::CacheInner;
use registry::ClientState;

/// Client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub socket_path: PathBuf,
    /// Daemon started when nothing listens on the socket
    pub daemon_path: PathBuf,
    pub connect_retries: u32,
    pub connect_backoff: Duration,
    /// Write timeout for requests
    pub register_timeout: Duration,
    /// How long [`Client::lookup_sync`] waits for the first reload notice
    pub sync_timeout: Duration,
    pub env: XdgEnv,
    pub language: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let socket_path = std::env::var_os("MENU_CACHED_SOCKET")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_socket_path);
        Self::for_socket(socket_path)
    }
}

impl ClientConfig {
    /// Defaults from the environment with an explicit socket path
    pub fn for_socket(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            daemon_path: default_daemon_path(),
            connect_retries: 25,
            connect_backoff: Duration::from_millis(50),
            register_timeout: Duration::from_secs(5),
            sync_timeout: Duration::from_secs(30),
            env: XdgEnv::from_env(),
            language: current_language(),
        }
    }
}

/// Entry point for looking up menu caches
#[derive(Clone)]
pub struct Client {
    shared: Rc<RefCell<ClientState>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Client {
    /// Create a client. Nothing connects until the first lookup.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            shared: Rc::new(RefCell::new(ClientState::new(config))),
        }
    }

    /// Return the live cache for `menu`, or register it with the daemon.
    ///
    /// A new cache is loaded from disk when a file already exists; otherwise
    /// it stays empty until the daemon's first reload notice is dispatched.
    pub fn lookup(&self, menu: &str) -> Result<Cache, ClientError> {
        let request = self.shared.borrow().request_for(menu);
        let fingerprint = request.fingerprint();
        if let Some(cache) = self.shared.borrow().live(&fingerprint) {
            return Ok(cache);
        }

        self.shared.borrow_mut().register(&request)?;
        let inner = Rc::new(CacheInner::new(Rc::clone(&self.shared), &request));
        self.shared.borrow_mut().insert(&inner, request);
        let cache = Cache::from_inner(inner);

        if let Err(e) = cache.reload() {
            tracing::debug!(fingerprint = %fingerprint, error = %e, "no usable cache file yet");
        }
        Ok(cache)
    }

    /// Like [`Client::lookup`], but wait for the daemon to announce the cache
    /// and return it loaded
    pub fn lookup_sync(&self, menu: &str) -> Result<Cache, ClientError> {
        let cache = self.lookup(menu)?;
        let timeout = self.shared.borrow().config.sync_timeout;
        let deadline = Instant::now() + timeout;

        while !cache.is_notified() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout {
                    menu: menu.to_string(),
                });
            }
            self.wait_and_dispatch(remaining)?;
        }
        if !cache.is_loaded() {
            cache.reload()?;
        }
        Ok(cache)
    }

    /// Process pending reload notices without blocking. Returns the number
    /// of caches reloaded.
    pub fn dispatch(&self) -> Result<usize, ClientError> {
        self.process(None)
    }

    /// Wait up to `timeout` for reload notices and process them
    pub fn wait_and_dispatch(&self, timeout: Duration) -> Result<usize, ClientError> {
        self.process(Some(timeout))
    }

    fn process(&self, timeout: Option<Duration>) -> Result<usize, ClientError> {
        let fingerprints = self.shared.borrow_mut().poll(timeout)?;

        let mut reloaded = 0;
        for fingerprint in fingerprints {
            let Some(cache) = self.shared.borrow().live(&fingerprint) else {
                continue;
            };
            cache.mark_notified();
            match cache.reload() {
                Ok(()) => reloaded += 1,
                Err(e) => tracing::warn!(fingerprint = %fingerprint, error = %e, "reload failed"),
            }
        }
        Ok(reloaded)
    }

    /// Daemon socket descriptor, for polling from a host event loop
    pub fn as_raw_fd(&self) -> Option<RawFd> {
        self.shared.borrow().raw_fd()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.borrow().is_connected()
    }

    /// Number of live caches
    pub fn cache_count(&self) -> usize {
        self.shared.borrow().live_count()
    }

    /// Whether `cache` was handed out by this client
    pub fn owns(&self, cache: &Cache) -> bool {
        self.shared
            .borrow()
            .live(cache.fingerprint())
            .is_some_and(|live| Rc::ptr_eq(live.inner(), cache.inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::meta::UsedFile;
    use crate::cache::model::{MenuItem, MenuTree};
    use crate::cache::store::write_cache_atomic;
    use crate::protocol::{Message, RegisterRequest};
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::Path;
    use std::sync::mpsc;
    use std::thread;

    /// Minimal daemon: answers every REG with REL after writing the cache
    /// file, and reports every received line
    fn fake_daemon(listener: UnixListener, seen: mpsc::Sender<String>) {
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let seen = seen.clone();
                thread::spawn(move || serve(stream, seen));
            }
        });
    }

    fn serve(stream: UnixStream, seen: mpsc::Sender<String>) {
        let mut writer = stream.try_clone().unwrap();
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            let _ = seen.send(line.clone());
            if let Ok(Message::Register(req)) = Message::parse(&line) {
                write_menu(&req);
                let reply = Message::Reload(req.fingerprint()).to_line();
                if writer.write_all(reply.as_bytes()).is_err() {
                    break;
                }
            }
        }
    }

    fn write_menu(req: &RegisterRequest) {
        let mut tree = MenuTree::new(vec![UsedFile::directory("/")]);
        let root = tree.set_root(MenuItem::directory("Applications")).unwrap();
        tree.add_child(root, MenuItem::separator()).unwrap();
        write_cache_atomic(&req.cache_file(), &req.menu, &tree, &[]).unwrap();
    }

    fn config(dir: &Path) -> ClientConfig {
        ClientConfig {
            daemon_path: dir.join("no-such-daemon"),
            connect_retries: 3,
            connect_backoff: Duration::from_millis(5),
            sync_timeout: Duration::from_secs(5),
            env: XdgEnv {
                cache_home: dir.join("cache").display().to_string(),
                ..Default::default()
            },
            language: "C".to_string(),
            ..ClientConfig::for_socket(dir.join("sock"))
        }
    }

    fn start(dir: &Path) -> (Client, mpsc::Receiver<String>) {
        let listener = UnixListener::bind(dir.join("sock")).unwrap();
        let (tx, rx) = mpsc::channel();
        fake_daemon(listener, tx);
        (Client::new(config(dir)), rx)
    }

    #[test]
    fn test_lookup_sync_loads_tree() {
        let temp = tempfile::tempdir().unwrap();
        let (client, seen) = start(temp.path());

        let cache = client.lookup_sync("applications.menu").unwrap();
        assert!(cache.is_loaded());
        let root = cache.root_dir().unwrap();
        assert_eq!(cache.tree().item(root).unwrap().id(), Some("Applications"));
        assert!(seen.recv().unwrap().starts_with("REG:applications.menu\tC\t"));
        assert!(client.is_connected());
        assert!(client.as_raw_fd().is_some());
    }

    #[test]
    fn test_lookup_reuses_live_cache() {
        let temp = tempfile::tempdir().unwrap();
        let (client, seen) = start(temp.path());

        let a = client.lookup("applications.menu").unwrap();
        let b = client.lookup("applications.menu").unwrap();
        assert_eq!(a.ref_count(), 2);
        assert!(client.owns(&b));
        assert_eq!(client.cache_count(), 1);

        seen.recv().unwrap();
        assert!(seen.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_last_drop_unregisters_and_disconnects() {
        let temp = tempfile::tempdir().unwrap();
        let (client, seen) = start(temp.path());

        let a = client.lookup_sync("applications.menu").unwrap();
        let fp = a.fingerprint().clone();
        let b = a.clone();
        drop(a);
        assert!(client.is_connected());
        drop(b);

        assert!(!client.is_connected());
        assert_eq!(client.cache_count(), 0);
        seen.recv().unwrap();
        assert_eq!(seen.recv().unwrap(), format!("UNR:{}", fp));
    }

    #[test]
    fn test_reload_notice_fires_callbacks_once() {
        let temp = tempfile::tempdir().unwrap();
        let (client, _seen) = start(temp.path());
        let cache = client.lookup("applications.menu").unwrap();

        let fired = Rc::new(std::cell::Cell::new(0));
        let f = Rc::clone(&fired);
        cache.add_reload_notify(move |_| f.set(f.get() + 1));

        let deadline = Instant::now() + Duration::from_secs(5);
        while fired.get() == 0 && Instant::now() < deadline {
            client.wait_and_dispatch(Duration::from_millis(100)).unwrap();
        }
        assert_eq!(fired.get(), 1);
        assert_eq!(client.dispatch().unwrap(), 0);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_daemon_unavailable() {
        let temp = tempfile::tempdir().unwrap();
        let client = Client::new(config(temp.path()));
        match client.lookup("applications.menu") {
            Err(ClientError::DaemonUnavailable { socket, .. }) => {
                assert_eq!(socket, temp.path().join("sock"));
            }
            other => panic!("expected unavailable daemon, got {:?}", other),
        }
        assert_eq!(client.cache_count(), 0);
    }

    #[test]
    fn test_reconnect_reregisters_live_caches() {
        let temp = tempfile::tempdir().unwrap();
        let sock = temp.path().join("sock");

        // First daemon accepts one connection and hangs up after the reply
        let listener = UnixListener::bind(&sock).unwrap();
        let client = Client::new(config(temp.path()));
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).unwrap();
            if let Ok(Message::Register(req)) = Message::parse(&line) {
                write_menu(&req);
                writer
                    .write_all(Message::Reload(req.fingerprint()).to_line().as_bytes())
                    .unwrap();
            }
        });
        let cache = client.lookup_sync("applications.menu").unwrap();
        handle.join().unwrap();
        std::fs::remove_file(&sock).unwrap();

        // A second daemon takes over the socket
        let (tx, seen) = mpsc::channel();
        fake_daemon(UnixListener::bind(&sock).unwrap(), tx);

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut line = None;
        while line.is_none() && Instant::now() < deadline {
            client.wait_and_dispatch(Duration::from_millis(50)).unwrap();
            line = seen.try_recv().ok();
        }
        assert_eq!(
            line.unwrap(),
            Message::Register(RegisterRequest::new(
                "applications.menu",
                "C",
                config(temp.path()).env
            ))
            .to_line()
            .trim_end()
        );
        assert!(cache.is_loaded());
    }
}
