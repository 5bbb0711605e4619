//! Environment capture
//!
//! A cache is keyed by the menu name, the language and the XDG variables that
//! influence menu resolution. Clients capture them here and the daemon hands
//! them back to the generator.

/// XDG variables forwarded to the generator, in wire order
pub const XDG_VARS: [&str; 6] = [
    "XDG_CACHE_HOME",
    "XDG_CONFIG_DIRS",
    "XDG_MENU_PREFIX",
    "XDG_DATA_DIRS",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
];

/// Captured XDG environment. Unset variables are stored as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct XdgEnv {
    pub cache_home: String,
    pub config_dirs: String,
    pub menu_prefix: String,
    pub data_dirs: String,
    pub config_home: String,
    pub data_home: String,
}

impl XdgEnv {
    /// Capture from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Capture using an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).unwrap_or_default();
        Self {
            cache_home: get("XDG_CACHE_HOME"),
            config_dirs: get("XDG_CONFIG_DIRS"),
            menu_prefix: get("XDG_MENU_PREFIX"),
            data_dirs: get("XDG_DATA_DIRS"),
            config_home: get("XDG_CONFIG_HOME"),
            data_home: get("XDG_DATA_HOME"),
        }
    }

    /// Build from values in wire order
    pub fn from_values(values: [String; 6]) -> Self {
        let [cache_home, config_dirs, menu_prefix, data_dirs, config_home, data_home] = values;
        Self {
            cache_home,
            config_dirs,
            menu_prefix,
            data_dirs,
            config_home,
            data_home,
        }
    }

    /// Values in wire order
    pub fn values(&self) -> [&str; 6] {
        [
            &self.cache_home,
            &self.config_dirs,
            &self.menu_prefix,
            &self.data_dirs,
            &self.config_home,
            &self.data_home,
        ]
    }

    /// (variable name, value) pairs
    pub fn vars(&self) -> impl Iterator<Item = (&'static str, &str)> {
        XDG_VARS.into_iter().zip(self.values())
    }
}

/// Language of the current process
pub fn current_language() -> String {
    language_from_lookup(|name| std::env::var(name).ok())
}

/// Resolve the message language from locale variables.
///
/// The first non-empty of LANGUAGE (first `:` entry), LC_ALL, LC_MESSAGES and
/// LANG wins. The codeset part (`.UTF-8`) is dropped, a modifier is kept.
pub fn language_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> String {
    let raw = ["LANGUAGE", "LC_ALL", "LC_MESSAGES", "LANG"]
        .into_iter()
        .filter_map(|name| lookup(name))
        .map(|value| value.split(':').next().unwrap_or_default().to_string())
        .find(|value| !value.is_empty());

    match raw {
        Some(value) => strip_codeset(&value),
        None => "C".to_string(),
    }
}

fn strip_codeset(locale: &str) -> String {
    match locale.find('.') {
        Some(dot) => {
            let modifier = locale[dot..].find('@').map(|at| &locale[dot + at..]);
            format!("{}{}", &locale[..dot], modifier.unwrap_or(""))
        }
        None => locale.to_string(),
    }
}
