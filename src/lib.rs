//! menu-cache - Shared cache of freedesktop.org application menus
//!
//! menu-cache provides:
//! - The format 1.1 cache file: reader, writer and menu tree model
//! - A client that looks up menus through the menu-cached daemon and reloads
//!   them when the daemon announces a regenerated cache
//! - The daemon engine: one record per (menu, language, environment)
//!   fingerprint, external generator runs, file watches, debounced
//!   invalidation and idle eviction
//!
//! ```no_run
//! use menu_cache::client::Client;
//!
//! let client = Client::default();
//! let cache = client.lookup_sync("applications.menu")?;
//! let tree = cache.tree();
//! for app in cache.list_all_apps() {
//!     if let Some(item) = tree.item(app) {
//!         println!("{}", item.name.as_deref().unwrap_or_default());
//!     }
//! }
//! # Ok::<(), menu_cache::core::error::ClientError>(())
//! ```

pub mod backends;
pub mod cache;
pub mod client;
pub mod core;
pub mod daemon;
pub mod protocol;

pub use cache::{AppFlags, AppInfo, ItemId, ItemKind, ItemType, MenuItem, MenuTree};
pub use client::{Cache, Client, ClientConfig};
pub use crate::core::error::{CacheError, ClientError, GeneratorError, ProtocolError};
pub use protocol::{Fingerprint, Message, RegisterRequest};
