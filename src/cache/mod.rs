//! Cache module - The serialized menu cache
//!
//! Provides:
//! - Menu tree model (directories, applications, separators)
//! - Format 1.1 reader with its permissive truncation rules
//! - Writer and freshness checks for cache files
//! - Header metadata (version, used-files manifest, desktop names)

pub mod meta;
pub mod model;
pub mod reader;
pub mod store;

pub use meta::{CacheHeader, FormatVersion, UsedFile, UsedKind};
pub use model::{AppFlags, AppInfo, ItemId, ItemKind, ItemType, MenuItem, MenuTree};
pub use reader::{read_cache_file, ParsedCache};
