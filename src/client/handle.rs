//! Cache handle
//!
//! A [`Cache`] is a cheap, clonable reference to one registered menu. Cloning
//! takes a reference, dropping the last clone unregisters the menu from the
//! daemon. Reloads swap the whole tree at once, so a tree obtained through
//! [`Cache::tree`] stays valid and unchanged for as long as it is held.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::cache::meta::{desktop_env_flag, UsedFile};
use crate::cache::model::{ItemId, MenuTree};
use crate::cache::reader::read_cache_file;
use crate::client::registry::ClientState;
use crate::core::error::CacheError;
use crate::protocol::{Fingerprint, RegisterRequest};

/// Handle returned by [`Cache::add_reload_notify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifyToken(u64);

type ReloadCallback = Rc<dyn Fn(&Cache)>;

#[derive(Default)]
struct Loaded {
    tree: Rc<MenuTree>,
    used_files: Vec<UsedFile>,
    extra_desktops: Vec<String>,
    loaded: bool,
}

pub(crate) struct CacheInner {
    client: Rc<RefCell<ClientState>>,
    fingerprint: Fingerprint,
    menu_name: String,
    cache_file: PathBuf,
    data: RefCell<Loaded>,
    callbacks: RefCell<Vec<(NotifyToken, ReloadCallback)>>,
    next_token: Cell<u64>,
    notified: Cell<bool>,
}

impl CacheInner {
    pub fn new(client: Rc<RefCell<ClientState>>, request: &RegisterRequest) -> Self {
        Self {
            client,
            fingerprint: request.fingerprint(),
            menu_name: request.menu.clone(),
            cache_file: request.cache_file(),
            data: RefCell::new(Loaded::default()),
            callbacks: RefCell::new(Vec::new()),
            next_token: Cell::new(0),
            notified: Cell::new(false),
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        match self.client.try_borrow_mut() {
            Ok(mut state) => state.release(&self.fingerprint),
            Err(_) => {
                tracing::warn!(fingerprint = %self.fingerprint, "cache dropped while the client was busy")
            }
        }
    }
}

/// A registered menu cache
#[derive(Clone)]
pub struct Cache {
    inner: Rc<CacheInner>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("menu_name", &self.inner.menu_name)
            .field("fingerprint", &self.inner.fingerprint)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Cache {
    pub(crate) fn from_inner(inner: Rc<CacheInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<CacheInner> {
        &self.inner
    }

    pub fn menu_name(&self) -> &str {
        &self.inner.menu_name
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.inner.fingerprint
    }

    /// Backing file, `<cache base>/menus/<fingerprint>`
    pub fn cache_file(&self) -> &Path {
        &self.inner.cache_file
    }

    /// Number of live handles to this cache
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// Whether a tree has been loaded at least once
    pub fn is_loaded(&self) -> bool {
        self.inner.data.borrow().loaded
    }

    /// Whether the daemon has announced this cache at least once
    pub fn is_notified(&self) -> bool {
        self.inner.notified.get()
    }

    pub(crate) fn mark_notified(&self) {
        self.inner.notified.set(true);
    }

    /// Re-read the backing file and notify subscribers. On failure the
    /// current tree is kept and no callback runs.
    pub fn reload(&self) -> Result<(), CacheError> {
        let parsed = read_cache_file(&self.inner.cache_file)?;
        {
            let mut data = self.inner.data.borrow_mut();
            data.used_files = parsed.header.existing_used_files();
            data.extra_desktops = parsed.header.extra_desktops;
            data.tree = Rc::new(parsed.tree);
            data.loaded = true;
        }
        tracing::debug!(fingerprint = %self.inner.fingerprint, "cache reloaded");

        let callbacks: Vec<ReloadCallback> = self
            .inner
            .callbacks
            .borrow()
            .iter()
            .map(|(_, callback)| Rc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(self);
        }
        Ok(())
    }

    /// Call `callback` after every successful reload, in registration order
    pub fn add_reload_notify<F>(&self, callback: F) -> NotifyToken
    where
        F: Fn(&Cache) + 'static,
    {
        let token = NotifyToken(self.inner.next_token.get());
        self.inner.next_token.set(token.0 + 1);
        self.inner
            .callbacks
            .borrow_mut()
            .push((token, Rc::new(callback)));
        token
    }

    /// Returns false if the token was not registered
    pub fn remove_reload_notify(&self, token: NotifyToken) -> bool {
        let mut callbacks = self.inner.callbacks.borrow_mut();
        let before = callbacks.len();
        callbacks.retain(|(t, _)| *t != token);
        callbacks.len() != before
    }

    /// Current tree. Item ids resolve only against the tree they came from.
    pub fn tree(&self) -> Rc<MenuTree> {
        Rc::clone(&self.inner.data.borrow().tree)
    }

    pub fn root_dir(&self) -> Option<ItemId> {
        self.inner.data.borrow().tree.root()
    }

    /// Resolve a `/`-separated id path in the current tree
    pub fn item_by_path(&self, path: &str) -> Option<ItemId> {
        self.inner.data.borrow().tree.item_by_path(path)
    }

    /// Applications of the current tree, depth first
    pub fn list_all_apps(&self) -> Vec<ItemId> {
        self.inner.data.borrow().tree.list_all_apps()
    }

    /// Used files of the last load that existed at load time
    pub fn used_files(&self) -> Vec<UsedFile> {
        self.inner.data.borrow().used_files.clone()
    }

    /// Show-in bit for a desktop environment name
    pub fn desktop_env_flag(&self, name: &str) -> u32 {
        desktop_env_flag(&self.inner.data.borrow().extra_desktops, name)
    }
}
