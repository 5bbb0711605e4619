//! CLI module - Command-line interface of the menu-cached daemon

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use menu_cache::core::paths::{default_generator_path, default_socket_path};
use menu_cache::daemon::{self, DaemonConfig};

/// Longest path a unix socket address can hold (sun_path minus the NUL)
const MAX_SOCKET_PATH: usize = 107;

/// menu-cached - serve cached application menus to local clients.
#[derive(Parser, Debug)]
#[command(name = "menu-cached")]
#[command(
    author,
    version,
    about,
    long_about = r#"menu-cached keeps one cache file per distinct (menu, language, environment)
request, regenerates it with the menu generator when its sources change, and
tells every subscribed client when a new version is ready.

Clients normally start the daemon themselves. Running it by hand is useful
for debugging:

    menu-cached --verbose
    menu-cached /tmp/.menu-cached-test --no-exit-when-idle
    MENU_CACHED_LOG=menu_cache=trace menu-cached
"#
)]
pub struct Cli {
    /// Socket path to listen on.
    #[arg(
        value_name = "SOCKET",
        long_help = "Socket path to listen on.\n\n\
Defaults to <tmp>/.menu-cached-<display>-<user>. If a live daemon already\n\
serves the path, this instance exits successfully without touching it."
    )]
    pub socket: Option<PathBuf>,

    /// Menu generator executable.
    #[arg(
        long,
        env = "MENU_CACHE_GEN",
        value_name = "PATH",
        long_help = "Menu generator executable.\n\n\
It is run as `<gen> -i <menu> -o <cache file> -l <lang> [-f]` with the\n\
client's XDG environment and must write a format 1.1 cache file."
    )]
    pub generator: Option<PathBuf>,

    /// Quiet period after a source change before regenerating.
    #[arg(long, default_value_t = 3000, value_name = "MS")]
    pub debounce_ms: u64,

    /// Time an unreferenced cache is kept before it is dropped.
    #[arg(long, default_value_t = 600, value_name = "SECS")]
    pub idle_timeout_secs: u64,

    /// Keep running after the last cache was dropped.
    #[arg(long)]
    pub no_exit_when_idle: bool,

    /// Verbose mode (debug logging).
    #[arg(
        short,
        long,
        long_help = "Log at debug level unless MENU_CACHED_LOG or RUST_LOG say otherwise."
    )]
    pub verbose: bool,
}

impl Cli {
    pub fn daemon_config(&self) -> Result<DaemonConfig> {
        let socket_path = self.socket.clone().unwrap_or_else(default_socket_path);
        if socket_path.as_os_str().len() > MAX_SOCKET_PATH {
            bail!("Socket path is too long: {}", socket_path.display());
        }

        Ok(DaemonConfig {
            socket_path,
            generator: self.generator.clone().unwrap_or_else(default_generator_path),
            debounce: Duration::from_millis(self.debounce_ms),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            exit_when_idle: !self.no_exit_when_idle,
        })
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = std::env::var("MENU_CACHED_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Execute the daemon
pub fn run(cli: Cli) -> Result<()> {
    let config = cli.daemon_config()?;
    init_logging(cli.verbose);
    daemon::run(config)
}
