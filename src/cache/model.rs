//! Menu tree model
//!
//! A loaded cache is an arena of items. Directories own their children
//! through the arena's child lists; an item's parent link is a plain index
//! and never keeps anything alive. Every tree gets a fresh generation number,
//! so an [`ItemId`] taken from one tree does not resolve in a tree loaded
//! later.

use bitflags::bitflags;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::cache::meta::UsedFile;

static NEXT_GENERATION: AtomicU32 = AtomicU32::new(1);

/// Handle of an item inside one [`MenuTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId {
    index: u32,
    generation: u32,
}

/// Item variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Directory,
    Application,
    Separator,
}

bitflags! {
    /// Per-application flags stored in the cache
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AppFlags: u32 {
        const USE_TERMINAL = 1;
        const USE_STARTUP_NOTIFY = 1 << 1;
        const NO_DISPLAY = 1 << 2;
    }
}

/// Application payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppInfo {
    pub generic_name: Option<String>,
    pub exec: Option<String>,
    /// Not carried by format 1.1; always None for loaded caches
    pub working_dir: Option<String>,
    pub flags: AppFlags,
    /// Show-in desktop bitmask, 0 means everywhere
    pub show_in: u32,
}

impl AppInfo {
    pub fn use_terminal(&self) -> bool {
        self.flags.contains(AppFlags::USE_TERMINAL)
    }

    pub fn use_startup_notify(&self) -> bool {
        self.flags.contains(AppFlags::USE_STARTUP_NOTIFY)
    }

    /// Whether the application is shown in a desktop with the given flags
    pub fn is_visible(&self, desktop_flags: u32) -> bool {
        self.show_in == 0 || self.show_in & desktop_flags != 0
    }
}

/// Variant payload of an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    Directory { children: Vec<ItemId> },
    Application(AppInfo),
    Separator,
}

/// One node of the menu tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    /// Short identifier, unique among siblings. Separators have none.
    pub id: Option<String>,
    pub name: Option<String>,
    pub comment: Option<String>,
    pub icon: Option<String>,
    /// Basename of the source file. For applications None means "same as id".
    pub file_name: Option<String>,
    /// Index of the source directory in the cache manifest
    pub file_dir_index: Option<usize>,
    pub kind: ItemKind,
    parent: Option<ItemId>,
}

impl MenuItem {
    fn new(id: Option<String>, kind: ItemKind) -> Self {
        Self {
            id,
            name: None,
            comment: None,
            icon: None,
            file_name: None,
            file_dir_index: None,
            kind,
            parent: None,
        }
    }

    pub fn directory(id: impl Into<String>) -> Self {
        Self::new(
            Some(id.into()),
            ItemKind::Directory {
                children: Vec::new(),
            },
        )
    }

    pub fn application(id: impl Into<String>, app: AppInfo) -> Self {
        Self::new(Some(id.into()), ItemKind::Application(app))
    }

    pub fn separator() -> Self {
        Self::new(None, ItemKind::Separator)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_file(mut self, file_name: impl Into<String>, dir_index: usize) -> Self {
        self.file_name = Some(file_name.into());
        self.file_dir_index = Some(dir_index);
        self
    }

    pub fn item_type(&self) -> ItemType {
        match self.kind {
            ItemKind::Directory { .. } => ItemType::Directory,
            ItemKind::Application(_) => ItemType::Application,
            ItemKind::Separator => ItemType::Separator,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn app(&self) -> Option<&AppInfo> {
        match &self.kind {
            ItemKind::Application(app) => Some(app),
            _ => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, ItemKind::Directory { .. })
    }

    /// Source file basename; applications fall back to their id
    pub fn file_basename(&self) -> Option<&str> {
        match (&self.file_name, &self.kind) {
            (Some(name), _) => Some(name.as_str()),
            (None, ItemKind::Application(_)) => self.id.as_deref(),
            (None, _) => None,
        }
    }
}

/// A loaded menu tree
#[derive(Debug, Clone)]
pub struct MenuTree {
    generation: u32,
    items: Vec<MenuItem>,
    root: Option<ItemId>,
    sources: Vec<UsedFile>,
}

impl Default for MenuTree {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl MenuTree {
    /// Empty tree resolving directory indices against `sources`
    pub fn new(sources: Vec<UsedFile>) -> Self {
        Self {
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            items: Vec::new(),
            root: None,
            sources,
        }
    }

    /// Manifest entries the directory indices refer to
    pub fn sources(&self) -> &[UsedFile] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn insert(&mut self, mut item: MenuItem, parent: Option<ItemId>) -> ItemId {
        // Children are attached through add_child only
        if let ItemKind::Directory { children } = &mut item.kind {
            children.clear();
        }
        item.parent = parent;
        let id = ItemId {
            index: self.items.len() as u32,
            generation: self.generation,
        };
        self.items.push(item);
        id
    }

    /// Set the root directory, replacing any previous root. Returns None for
    /// anything but a directory.
    pub fn set_root(&mut self, item: MenuItem) -> Option<ItemId> {
        if !item.is_dir() {
            return None;
        }
        let id = self.insert(item, None);
        self.root = Some(id);
        Some(id)
    }

    /// Append a child to a directory. Returns None if `parent` is not a
    /// directory of this tree, or for an application without an id: that
    /// would encode as a separator.
    pub fn add_child(&mut self, parent: ItemId, item: MenuItem) -> Option<ItemId> {
        if !self.item(parent)?.is_dir() {
            return None;
        }
        if matches!(item.kind, ItemKind::Application(_)) && item.id().unwrap_or("").is_empty() {
            return None;
        }
        let id = self.insert(item, Some(parent));
        if let ItemKind::Directory { children } = &mut self.items[parent.index as usize].kind {
            children.push(id);
        }
        Some(id)
    }

    /// Root directory, if the cache held one
    pub fn root(&self) -> Option<ItemId> {
        self.root
    }

    pub fn item(&self, id: ItemId) -> Option<&MenuItem> {
        if id.generation != self.generation {
            return None;
        }
        self.items.get(id.index as usize)
    }

    /// Children of a directory in file order; empty for anything else
    pub fn children(&self, dir: ItemId) -> &[ItemId] {
        match self.item(dir).map(|item| &item.kind) {
            Some(ItemKind::Directory { children }) => children.as_slice(),
            _ => &[],
        }
    }

    pub fn parent(&self, id: ItemId) -> Option<ItemId> {
        self.item(id)?.parent
    }

    /// Directory holding the item's source file
    pub fn file_dir(&self, id: ItemId) -> Option<&Path> {
        let index = self.item(id)?.file_dir_index?;
        self.sources.get(index).map(|entry| entry.path())
    }

    /// Full path of the item's source file, when both parts are known
    pub fn file_path(&self, id: ItemId) -> Option<PathBuf> {
        let basename = self.item(id)?.file_basename()?;
        Some(self.file_dir(id)?.join(basename))
    }

    /// `/`-joined id path from the root down to `id`, e.g. `/Applications/Games`
    pub fn path_from_root(&self, id: ItemId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(cur) = current {
            let item = self.item(cur)?;
            segments.push(item.id().unwrap_or(""));
            current = item.parent;
        }

        let mut path = String::new();
        for segment in segments.iter().rev() {
            path.push('/');
            path.push_str(segment);
        }
        Some(path)
    }

    /// Resolve a `/`-separated id path. The first segment must be the root's
    /// id, intermediate segments must be directories. A leading `/` is optional.
    pub fn item_by_path(&self, path: &str) -> Option<ItemId> {
        let path = path.strip_prefix('/').unwrap_or(path);
        if path.is_empty() {
            return None;
        }

        let mut segments = path.split('/');
        let root = self.root?;
        if segments.next()? != self.item(root)?.id()? {
            return None;
        }

        let mut current = root;
        for segment in segments {
            current = *self
                .children(current)
                .iter()
                .find(|child| self.item(**child).and_then(|item| item.id()) == Some(segment))?;
        }
        Some(current)
    }

    /// All applications, depth first in file order
    pub fn list_all_apps(&self) -> Vec<ItemId> {
        let mut apps = Vec::new();
        let mut pending: Vec<std::slice::Iter<'_, ItemId>> = Vec::new();
        if let Some(root) = self.root {
            pending.push(self.children(root).iter());
        }

        while let Some(children) = pending.last_mut() {
            let Some(&child) = children.next() else {
                pending.pop();
                continue;
            };
            match self.item(child).map(|item| item.item_type()) {
                Some(ItemType::Directory) => pending.push(self.children(child).iter()),
                Some(ItemType::Application) => apps.push(child),
                _ => {}
            }
        }
        apps
    }

    /// Structural equality of what the cache format carries: same shape,
    /// same field values, same child order. An empty field equals an
    /// absent one and `working_dir` is not compared.
    pub fn is_isomorphic(&self, other: &MenuTree) -> bool {
        let mut pending = match (self.root, other.root) {
            (None, None) => return true,
            (Some(a), Some(b)) => vec![(a, b)],
            _ => return false,
        };

        while let Some((a, b)) = pending.pop() {
            let (Some(left), Some(right)) = (self.item(a), other.item(b)) else {
                return false;
            };
            if !same_fields(left, right) {
                return false;
            }
            let (lc, rc) = (self.children(a), other.children(b));
            if lc.len() != rc.len() {
                return false;
            }
            pending.extend(lc.iter().copied().zip(rc.iter().copied()));
        }
        true
    }
}

fn text(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn same_fields(left: &MenuItem, right: &MenuItem) -> bool {
    let same_app = match (left.app(), right.app()) {
        (Some(l), Some(r)) => {
            text(&l.generic_name) == text(&r.generic_name)
                && text(&l.exec) == text(&r.exec)
                && l.flags == r.flags
                && l.show_in == r.show_in
        }
        (l, r) => l.is_none() && r.is_none(),
    };

    same_app
        && left.item_type() == right.item_type()
        && text(&left.id) == text(&right.id)
        && text(&left.name) == text(&right.name)
        && text(&left.comment) == text(&right.comment)
        && text(&left.icon) == text(&right.icon)
        && text(&left.file_name) == text(&right.file_name)
        && left.file_dir_index == right.file_dir_index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MenuTree {
        let mut tree = MenuTree::new(vec![UsedFile::directory("/usr/share/applications")]);
        let root = tree
            .set_root(MenuItem::directory("Applications").with_name("Applications"))
            .unwrap();
        let games = tree
            .add_child(root, MenuItem::directory("Games").with_name("Games"))
            .unwrap();
        tree.add_child(
            games,
            MenuItem::application(
                "chess.desktop",
                AppInfo {
                    exec: Some("chess".into()),
                    ..Default::default()
                },
            )
            .with_file("chess.desktop", 0),
        )
        .unwrap();
        tree.add_child(root, MenuItem::separator()).unwrap();
        tree.add_child(
            root,
            MenuItem::application("term.desktop", AppInfo::default()),
        )
        .unwrap();
        tree
    }

    #[test]
    fn test_children_and_parent() {
        let tree = sample();
        let root = tree.root().unwrap();
        let children = tree.children(root);
        assert_eq!(children.len(), 3);
        assert_eq!(tree.parent(children[0]), Some(root));
        assert_eq!(tree.parent(root), None);
        assert_eq!(
            tree.item(children[1]).unwrap().item_type(),
            ItemType::Separator
        );
    }

    #[test]
    fn test_path_from_root_and_back() {
        let tree = sample();
        let games = tree.item_by_path("/Applications/Games").unwrap();
        assert_eq!(tree.path_from_root(games).unwrap(), "/Applications/Games");
        assert_eq!(
            tree.path_from_root(tree.root().unwrap()).unwrap(),
            "/Applications"
        );

        let chess = tree.item_by_path("Applications/Games/chess.desktop").unwrap();
        assert_eq!(tree.parent(chess), Some(games));
    }

    #[test]
    fn test_item_by_path_not_found() {
        let tree = sample();
        assert!(tree.item_by_path("/Other/Games").is_none());
        assert!(tree.item_by_path("/Applications/Office").is_none());
        assert!(tree.item_by_path("/Applications/Games/nope").is_none());
        assert!(tree.item_by_path("").is_none());
        assert!(tree.item_by_path("/").is_none());
    }

    #[test]
    fn test_stale_ids_do_not_resolve() {
        let old = sample();
        let new = sample();
        let old_root = old.root().unwrap();
        assert!(new.item(old_root).is_none());
        assert!(new.children(old_root).is_empty());
    }

    #[test]
    fn test_list_all_apps_depth_first() {
        let tree = sample();
        let ids: Vec<_> = tree
            .list_all_apps()
            .into_iter()
            .map(|id| tree.item(id).unwrap().id().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["chess.desktop", "term.desktop"]);
    }

    #[test]
    fn test_file_path() {
        let tree = sample();
        let chess = tree.item_by_path("/Applications/Games/chess.desktop").unwrap();
        assert_eq!(
            tree.file_path(chess),
            Some(PathBuf::from("/usr/share/applications/chess.desktop"))
        );

        // No directory index: no path
        let term = tree.item_by_path("/Applications/term.desktop").unwrap();
        assert_eq!(tree.item(term).unwrap().file_basename(), Some("term.desktop"));
        assert_eq!(tree.file_path(term), None);
    }

    #[test]
    fn test_app_visibility() {
        let everywhere = AppInfo::default();
        assert!(everywhere.is_visible(1 << 3));

        let only_kde = AppInfo {
            show_in: 1 << 2,
            flags: AppFlags::USE_TERMINAL,
            ..Default::default()
        };
        assert!(only_kde.is_visible(1 << 2));
        assert!(!only_kde.is_visible(1 << 1));
        assert!(only_kde.use_terminal());
        assert!(!only_kde.use_startup_notify());
    }

    #[test]
    fn test_add_child_to_non_directory() {
        let mut tree = sample();
        let term = tree.item_by_path("/Applications/term.desktop").unwrap();
        assert!(tree.add_child(term, MenuItem::separator()).is_none());
    }

    #[test]
    fn test_unencodable_items_are_refused() {
        let mut tree = MenuTree::default();
        assert!(tree.set_root(MenuItem::application("a.desktop", AppInfo::default())).is_none());
        assert!(tree.set_root(MenuItem::separator()).is_none());
        assert!(tree.root().is_none());

        let root = tree.set_root(MenuItem::directory("Root")).unwrap();
        assert!(tree.add_child(root, MenuItem::application("", AppInfo::default())).is_none());
        assert!(tree.children(root).is_empty());
        // Directories may have an empty id, "+" reads back as one
        assert!(tree.add_child(root, MenuItem::directory("")).is_some());
    }

    #[test]
    fn test_empty_fields_match_absent_ones() {
        let mut left = MenuTree::default();
        left.set_root(MenuItem::directory("Root").with_comment("")).unwrap();
        let mut right = MenuTree::default();
        right.set_root(MenuItem::directory("Root")).unwrap();
        assert!(left.is_isomorphic(&right));
    }

    #[test]
    fn test_is_isomorphic() {
        assert!(sample().is_isomorphic(&sample()));

        let mut other = sample();
        let root = other.root().unwrap();
        other.add_child(root, MenuItem::separator()).unwrap();
        assert!(!sample().is_isomorphic(&other));
    }
}
