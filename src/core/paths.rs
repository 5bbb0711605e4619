//! Path conventions
//!
//! Where cache files, the daemon socket and the helper executables live.

use std::path::{Path, PathBuf};

use crate::core::env::XdgEnv;

/// Install location of helper executables when nothing else is configured
pub const LIBEXEC_DIR: &str = "/usr/libexec/menu-cache";

/// Daemon executable name
pub const DAEMON_BIN: &str = "menu-cached";

/// Generator executable name
pub const GENERATOR_BIN: &str = "menu-cache-gen";

/// Base directory for cache files: XDG_CACHE_HOME from the captured
/// environment if set, otherwise the user's cache directory
pub fn cache_base(env: &XdgEnv) -> PathBuf {
    if !env.cache_home.is_empty() {
        return PathBuf::from(&env.cache_home);
    }
    dirs::cache_dir().unwrap_or_else(|| std::env::temp_dir().join(".cache"))
}

/// Path of the cache file for a fingerprint: `<cache base>/menus/<fingerprint>`
pub fn cache_file_path(cache_base: &Path, fingerprint: &str) -> PathBuf {
    cache_base.join("menus").join(fingerprint)
}

/// Reduce a DISPLAY value to its display part (`host:1.0` -> `host:1`)
pub fn display_name(display: Option<&str>) -> String {
    let display = match display {
        Some(d) if !d.is_empty() => d,
        _ => return ":0".to_string(),
    };

    match display.find(':') {
        Some(colon) => match display[colon..].find('.') {
            Some(dot) => display[..colon + dot].to_string(),
            None => display.to_string(),
        },
        None => display.to_string(),
    }
}

/// Current user name as reported by the environment
pub fn user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Socket path for a display and user: `<tmp>/.menu-cached-<display>-<user>`
pub fn socket_path_for(display: Option<&str>, user: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        ".menu-cached-{}-{}",
        display_name(display),
        user
    ))
}

/// Default socket path derived from DISPLAY and the user name
pub fn default_socket_path() -> PathBuf {
    let display = std::env::var("DISPLAY").ok();
    socket_path_for(display.as_deref(), &user_name())
}

/// Locate a helper executable: explicit environment override, then a sibling
/// of the running executable, then the libexec directory
pub fn helper_path(name: &str, env_var: &str) -> PathBuf {
    if let Some(path) = std::env::var_os(env_var).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }

    let sibling = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(name)));
    match sibling {
        Some(path) if path.is_file() => path,
        _ => Path::new(LIBEXEC_DIR).join(name),
    }
}

/// Daemon executable (override: MENU_CACHED_BIN)
pub fn default_daemon_path() -> PathBuf {
    helper_path(DAEMON_BIN, "MENU_CACHED_BIN")
}

/// Generator executable (override: MENU_CACHE_GEN)
pub fn default_generator_path() -> PathBuf {
    helper_path(GENERATOR_BIN, "MENU_CACHE_GEN")
}
