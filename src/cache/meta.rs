//! Cache file metadata: format version, used-files manifest, desktop names

use std::fmt;
use std::path::{Path, PathBuf};

/// Major version written and accepted
pub const FORMAT_MAJOR: u32 = 1;

/// Minor version written by this crate
pub const FORMAT_MINOR: u32 = 1;

/// Oldest minor version the reader still accepts
pub const MIN_SUPPORTED_MINOR: u32 = 1;

/// Desktop environments with a fixed show-in bit, in bit order
pub const KNOWN_DESKTOPS: [&str; 5] = ["LXDE", "GNOME", "KDE", "XFCE", "ROX"];

/// Cache format version (`MAJOR.MINOR`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatVersion {
    pub major: u32,
    pub minor: u32,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion {
        major: FORMAT_MAJOR,
        minor: FORMAT_MINOR,
    };

    /// Parse a `MAJOR.MINOR` line. Both parts need leading digits.
    pub fn parse(line: &str) -> Option<Self> {
        let (major, minor) = line.split_once('.')?;
        Some(Self {
            major: leading_u32(major)?,
            minor: leading_u32(minor)?,
        })
    }

    /// Whether the reader understands this version
    pub fn is_supported(&self) -> bool {
        self.major == FORMAT_MAJOR && (MIN_SUPPORTED_MINOR..=FORMAT_MINOR).contains(&self.minor)
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn leading_u32(s: &str) -> Option<u32> {
    let s = s.trim_start();
    let end = s
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Kind of a used-files manifest entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsedKind {
    Directory,
    File,
}

impl UsedKind {
    pub fn tag(self) -> char {
        match self {
            UsedKind::Directory => 'D',
            UsedKind::File => 'F',
        }
    }
}

/// A file or directory whose modification invalidates the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsedFile {
    pub kind: UsedKind,
    pub path: PathBuf,
}

impl UsedFile {
    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: UsedKind::Directory,
            path: path.into(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: UsedKind::File,
            path: path.into(),
        }
    }

    /// Parse a manifest line: tag character followed by the path.
    /// Any tag other than `D` denotes a file.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut chars = line.chars();
        let tag = chars.next()?;
        let path = chars.as_str();
        if path.is_empty() {
            return None;
        }
        let kind = if tag == 'D' {
            UsedKind::Directory
        } else {
            UsedKind::File
        };
        Some(Self {
            kind,
            path: PathBuf::from(path),
        })
    }

    /// Manifest line without the trailing newline
    pub fn to_line(&self) -> String {
        format!("{}{}", self.kind.tag(), self.path.display())
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn is_dir(&self) -> bool {
        self.kind == UsedKind::Directory
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Everything before the menu tree in a cache file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHeader {
    pub version: FormatVersion,
    pub menu_name: String,
    /// Manifest as written, used to resolve item directory indices
    pub used_files: Vec<UsedFile>,
    /// Desktop names beyond `KNOWN_DESKTOPS`
    pub extra_desktops: Vec<String>,
}

impl CacheHeader {
    /// Manifest entries that still exist on disk. Entries that vanished
    /// between generation and now are dropped.
    pub fn existing_used_files(&self) -> Vec<UsedFile> {
        self.used_files
            .iter()
            .filter(|entry| {
                let exists = entry.exists();
                if !exists {
                    tracing::debug!(path = %entry.path.display(), "ignoring missing used file");
                }
                exists
            })
            .cloned()
            .collect()
    }
}

/// Show-in bit for a desktop name: extra desktops from the cache header take
/// bits after the built-in ones. Unknown names yield 0.
pub fn desktop_env_flag(extra_desktops: &[String], name: &str) -> u32 {
    if let Some(i) = extra_desktops.iter().position(|de| de == name) {
        let bit = i + KNOWN_DESKTOPS.len();
        return if bit < 32 { 1 << bit } else { 0 };
    }

    KNOWN_DESKTOPS
        .iter()
        .position(|de| *de == name)
        .map(|i| 1 << i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!(
            FormatVersion::parse("1.1"),
            Some(FormatVersion { major: 1, minor: 1 })
        );
        assert_eq!(
            FormatVersion::parse("2.0beta"),
            Some(FormatVersion { major: 2, minor: 0 })
        );
        assert_eq!(FormatVersion::parse("1"), None);
        assert_eq!(FormatVersion::parse("x.1"), None);
        assert_eq!(FormatVersion::CURRENT.to_string(), "1.1");
    }

    #[test]
    fn test_version_window() {
        assert!(FormatVersion { major: 1, minor: 1 }.is_supported());
        assert!(!FormatVersion { major: 1, minor: 0 }.is_supported());
        assert!(!FormatVersion { major: 1, minor: 2 }.is_supported());
        assert!(!FormatVersion { major: 2, minor: 1 }.is_supported());
    }

    #[test]
    fn test_used_file_parse_line() {
        let dir = UsedFile::parse_line("D/usr/share/applications").unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.path(), Path::new("/usr/share/applications"));

        let file = UsedFile::parse_line("F/etc/xdg/menus/applications.menu").unwrap();
        assert_eq!(file.kind, UsedKind::File);
        assert_eq!(file.to_line(), "F/etc/xdg/menus/applications.menu");

        assert!(UsedFile::parse_line("D").is_none());
        assert!(UsedFile::parse_line("").is_none());
    }

    #[test]
    fn test_existing_used_files_drops_missing() {
        let temp = tempfile::tempdir().unwrap();
        let header = CacheHeader {
            version: FormatVersion::CURRENT,
            menu_name: "applications.menu".to_string(),
            used_files: vec![
                UsedFile::directory(temp.path()),
                UsedFile::file(temp.path().join("gone.menu")),
            ],
            extra_desktops: Vec::new(),
        };

        let existing = header.existing_used_files();
        assert_eq!(existing, vec![UsedFile::directory(temp.path())]);
    }

    #[test]
    fn test_desktop_env_flag() {
        let extra = vec!["LXQt".to_string(), "MATE".to_string()];
        assert_eq!(desktop_env_flag(&extra, "LXDE"), 1);
        assert_eq!(desktop_env_flag(&extra, "KDE"), 1 << 2);
        assert_eq!(desktop_env_flag(&extra, "LXQt"), 1 << 5);
        assert_eq!(desktop_env_flag(&extra, "MATE"), 1 << 6);
        assert_eq!(desktop_env_flag(&extra, "Unity"), 0);
    }
}
