//! Daemon connection
//!
//! A blocking unix stream with a line buffer. Connecting starts the daemon
//! when nobody is listening yet, then retries with a fixed backoff.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::client::ClientConfig;
use crate::core::error::ClientError;
use crate::protocol::Message;

pub(crate) struct Connection {
    stream: UnixStream,
    buf: Vec<u8>,
}

impl Connection {
    /// Connect to the daemon, starting it after the first refused attempt
    pub fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
        let attempts = config.connect_retries.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            match UnixStream::connect(&config.socket_path) {
                Ok(stream) => {
                    stream
                        .set_write_timeout(Some(config.register_timeout))
                        .map_err(ClientError::ConnectionLost)?;
                    tracing::debug!(socket = %config.socket_path.display(), attempt, "connected to menu-cached");
                    return Ok(Self {
                        stream,
                        buf: Vec::new(),
                    });
                }
                Err(e) => {
                    if attempt == 0 {
                        spawn_daemon(config);
                    }
                    last_error = Some(e);
                    std::thread::sleep(config.connect_backoff);
                }
            }
        }

        Err(ClientError::DaemonUnavailable {
            socket: config.socket_path.clone(),
            source: last_error.unwrap_or_else(|| io::Error::from(io::ErrorKind::NotConnected)),
        })
    }

    pub fn send(&mut self, message: &Message) -> io::Result<()> {
        self.stream.set_nonblocking(false)?;
        self.stream.write_all(message.to_line().as_bytes())
    }

    /// Next complete line without its newline.
    ///
    /// With no timeout this never blocks. Returns None when no full line
    /// arrived in time, and an error once the daemon hung up.
    pub fn read_line(&mut self, timeout: Option<Duration>) -> io::Result<Option<String>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                return Ok(Some(String::from_utf8_lossy(&line[..pos]).into_owned()));
            }

            match deadline {
                None => self.stream.set_nonblocking(true)?,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(None);
                    }
                    self.stream.set_nonblocking(false)?;
                    self.stream.set_read_timeout(Some(remaining))?;
                }
            }

            let mut chunk = [0u8; 512];
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "menu-cached closed the connection",
                    ))
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Start the daemon detached from our process group. The child is reaped in
/// the background so it never lingers as a zombie.
fn spawn_daemon(config: &ClientConfig) {
    let mut cmd = Command::new(&config.daemon_path);
    cmd.arg(&config.socket_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);

    match cmd.spawn() {
        Ok(mut child) => {
            tracing::debug!(daemon = %config.daemon_path.display(), pid = child.id(), "started menu-cached");
            std::thread::spawn(move || {
                let _ = child.wait();
            });
        }
        Err(e) => {
            tracing::warn!(daemon = %config.daemon_path.display(), error = %e, "cannot start menu-cached");
        }
    }
}
