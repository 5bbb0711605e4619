//! Cache reader - Parse format 1.1 cache files
//!
//! The header is strict: a bad version is rejected outright and a truncated
//! manifest is an error. The tree body is permissive: numeric garbage decodes
//! to defaults and a node cut short at end of file is kept with its remaining
//! fields empty.

use std::fs;
use std::path::Path;
use std::str::SplitInclusive;

use crate::cache::meta::{CacheHeader, FormatVersion, UsedFile};
use crate::cache::model::{AppFlags, AppInfo, ItemKind, MenuItem, MenuTree};
use crate::core::error::CacheError;
use crate::core::util::parse_leading_int;

/// A fully parsed cache file
#[derive(Debug, Clone)]
pub struct ParsedCache {
    pub header: CacheHeader,
    pub tree: MenuTree,
}

/// Line cursor over the file contents
struct Lines<'a> {
    inner: SplitInclusive<'a, char>,
    line_no: usize,
}

impl<'a> Lines<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            inner: content.split_inclusive('\n'),
            line_no: 0,
        }
    }

    fn next_line(&mut self) -> Option<&'a str> {
        let line = self.inner.next()?;
        self.line_no += 1;
        Some(line.strip_suffix('\n').unwrap_or(line))
    }

    fn required(&mut self, reason: &'static str) -> Result<&'a str, CacheError> {
        let line_no = self.line_no + 1;
        self.next_line().ok_or(CacheError::MalformedRecord {
            line: line_no,
            reason,
        })
    }
}

/// Empty lines decode to absent
fn field(line: &str) -> Option<String> {
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}

fn read_file(path: &Path) -> Result<String, CacheError> {
    let bytes = fs::read(path).map_err(|source| CacheError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read and parse a cache file
pub fn read_cache_file(path: &Path) -> Result<ParsedCache, CacheError> {
    let content = read_file(path)?;
    parse_cache(&content)
}

/// Read only the header of a cache file
pub fn read_header(path: &Path) -> Result<CacheHeader, CacheError> {
    let content = read_file(path)?;
    parse_header(&mut Lines::new(&content))
}

/// Manifest entries of a cache file that still exist on disk
pub fn read_used_files(path: &Path) -> Result<Vec<UsedFile>, CacheError> {
    Ok(read_header(path)?.existing_used_files())
}

/// Parse cache file contents
pub fn parse_cache(content: &str) -> Result<ParsedCache, CacheError> {
    let mut lines = Lines::new(content);
    let header = parse_header(&mut lines)?;

    let mut tree = MenuTree::new(header.used_files.clone());
    read_tree(&mut lines, &mut tree);

    Ok(ParsedCache { header, tree })
}

fn parse_header(lines: &mut Lines<'_>) -> Result<CacheHeader, CacheError> {
    let raw_version = lines.next_line().unwrap_or_default();
    let version = FormatVersion::parse(raw_version)
        .filter(FormatVersion::is_supported)
        .ok_or_else(|| CacheError::VersionMismatch {
            found: raw_version.to_string(),
        })?;

    let menu_name = lines.required("missing menu name")?.to_string();

    let count = parse_leading_int(lines.required("missing used files count")?).max(0) as usize;
    let mut used_files = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let line = lines.required("truncated used files list")?;
        let entry = UsedFile::parse_line(line).ok_or(CacheError::MalformedRecord {
            line: lines.line_no,
            reason: "empty used file entry",
        })?;
        used_files.push(entry);
    }

    // A missing desktop line leaves the list empty and the tree absent
    let extra_desktops = lines
        .next_line()
        .map(|line| {
            line.split(';')
                .filter(|de| !de.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(CacheHeader {
        version,
        menu_name,
        used_files,
        extra_desktops,
    })
}

/// Read the tree body. Directories stay open on an explicit stack until
/// their child list ends: end of file, a blank line, or an unrecognized id
/// line. Only a directory can be the root.
fn read_tree(lines: &mut Lines<'_>, tree: &mut MenuTree) {
    let n_sources = tree.sources().len();
    let Some(root) = read_item(lines, n_sources).filter(MenuItem::is_dir) else {
        return;
    };
    let Some(root) = tree.set_root(root) else {
        return;
    };

    let mut open = vec![root];
    while let Some(&parent) = open.last() {
        let Some(item) = read_item(lines, n_sources) else {
            open.pop();
            continue;
        };
        let is_dir = item.is_dir();
        match tree.add_child(parent, item) {
            Some(id) if is_dir => open.push(id),
            Some(_) => {}
            None => {
                open.pop();
            }
        }
    }
}

/// Read one item without its children. None at the end of a child list.
fn read_item(lines: &mut Lines<'_>, n_sources: usize) -> Option<MenuItem> {
    let id_line = lines.next_line()?;
    let mut item = match id_line.split_at_checked(1) {
        Some(("-", "")) => MenuItem::separator(),
        Some(("-", id)) => MenuItem::application(id, AppInfo::default()),
        Some(("+", id)) => MenuItem::directory(id),
        _ => return None,
    };

    if !matches!(item.kind, ItemKind::Separator) {
        read_common_fields(lines, &mut item, n_sources);
        if let ItemKind::Application(app) = &mut item.kind {
            read_app_fields(lines, app);
        }
    }
    Some(item)
}

fn read_common_fields(lines: &mut Lines<'_>, item: &mut MenuItem, n_sources: usize) {
    let Some(name) = lines.next_line() else { return };
    item.name = field(name);
    let Some(comment) = lines.next_line() else { return };
    item.comment = field(comment);
    let Some(icon) = lines.next_line() else { return };
    item.icon = field(icon);
    let Some(file_name) = lines.next_line() else { return };
    item.file_name = field(file_name);
    let Some(index) = lines.next_line() else { return };
    let index = parse_leading_int(index);
    if (0..n_sources as i64).contains(&index) {
        item.file_dir_index = Some(index as usize);
    }
}

fn read_app_fields(lines: &mut Lines<'_>, app: &mut AppInfo) {
    let Some(generic_name) = lines.next_line() else { return };
    app.generic_name = field(generic_name);
    let Some(exec) = lines.next_line() else { return };
    app.exec = field(exec);
    let Some(flags) = lines.next_line() else { return };
    app.flags = AppFlags::from_bits_retain(parse_leading_int(flags) as u32);
    let Some(show_in) = lines.next_line() else { return };
    app.show_in = parse_leading_int(show_in) as u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::model::ItemType;

    const SAMPLE: &str = "1.1\n\
applications.menu\n\
2\n\
D/usr/share/applications\n\
F/etc/xdg/menus/applications.menu\n\
LXQt;\n\
+Applications\n\
Applications\n\
\n\
applications-other\n\
\n\
-1\n\
+Games\n\
Games\n\
Fun\n\
applications-games\n\
games.directory\n\
0\n\
-chess.desktop\n\
Chess\n\
Play chess\n\
chess\n\
\n\
0\n\
Board game\n\
chess %u\n\
3\n\
32\n\
\n\
-\n\
-term.desktop\n\
Terminal\n\
\n\
utilities-terminal\n\
\n\
9\n\
\n\
xterm\n\
1\n\
0\n";

    #[test]
    fn test_parse_sample() {
        let parsed = parse_cache(SAMPLE).unwrap();
        assert_eq!(parsed.header.menu_name, "applications.menu");
        assert_eq!(parsed.header.used_files.len(), 2);
        assert_eq!(parsed.header.extra_desktops, vec!["LXQt".to_string()]);

        let tree = &parsed.tree;
        let root = tree.root().unwrap();
        let root_item = tree.item(root).unwrap();
        assert_eq!(root_item.id(), Some("Applications"));
        assert_eq!(root_item.comment, None);
        assert_eq!(root_item.icon.as_deref(), Some("applications-other"));
        assert_eq!(root_item.file_dir_index, None);

        let children = tree.children(root);
        let types: Vec<_> = children
            .iter()
            .map(|c| tree.item(*c).unwrap().item_type())
            .collect();
        assert_eq!(
            types,
            vec![ItemType::Directory, ItemType::Separator, ItemType::Application]
        );
    }

    #[test]
    fn test_parse_app_fields() {
        let parsed = parse_cache(SAMPLE).unwrap();
        let tree = &parsed.tree;
        let chess = tree.item_by_path("/Applications/Games/chess.desktop").unwrap();
        let item = tree.item(chess).unwrap();
        let app = item.app().unwrap();
        assert_eq!(app.generic_name.as_deref(), Some("Board game"));
        assert_eq!(app.exec.as_deref(), Some("chess %u"));
        assert!(app.use_terminal());
        assert!(app.use_startup_notify());
        assert_eq!(app.show_in, 32);
        assert_eq!(item.file_basename(), Some("chess.desktop"));
        assert_eq!(
            tree.file_dir(chess),
            Some(Path::new("/usr/share/applications"))
        );

        // Out of range directory index decodes to absent
        let term = tree.item_by_path("/Applications/term.desktop").unwrap();
        assert_eq!(tree.item(term).unwrap().file_dir_index, None);
    }

    #[test]
    fn test_version_mismatch() {
        for content in ["", "2.0\nx\n0\n\n", "1.0\nx\n0\n\n", "garbage\n"] {
            match parse_cache(content) {
                Err(CacheError::VersionMismatch { .. }) => {}
                other => panic!("expected version mismatch for {:?}, got {:?}", content, other),
            }
        }
    }

    #[test]
    fn test_truncated_manifest() {
        let err = parse_cache("1.1\nmenu\n3\nD/usr/share\n").unwrap_err();
        assert!(matches!(err, CacheError::MalformedRecord { line: 5, .. }));

        let err = parse_cache("1.1\n").unwrap_err();
        assert!(matches!(err, CacheError::MalformedRecord { line: 2, .. }));
    }

    #[test]
    fn test_garbage_count_defaults_to_zero() {
        let parsed = parse_cache("1.1\nmenu\nxyz\n\n+Root\nRoot\n").unwrap();
        assert!(parsed.header.used_files.is_empty());
        let root = parsed.tree.root().unwrap();
        assert_eq!(parsed.tree.item(root).unwrap().name.as_deref(), Some("Root"));
    }

    #[test]
    fn test_missing_desktop_line_means_no_tree() {
        let parsed = parse_cache("1.1\nmenu\n0\n").unwrap();
        assert!(parsed.header.extra_desktops.is_empty());
        assert!(parsed.tree.root().is_none());
    }

    #[test]
    fn test_truncated_app_keeps_partial_node() {
        let content = "1.1\nmenu\n0\n\n+Root\nRoot\n\n\n\n-1\n-app.desktop\nApp\n";
        let parsed = parse_cache(content).unwrap();
        let tree = &parsed.tree;
        let app = tree.item_by_path("/Root/app.desktop").unwrap();
        let item = tree.item(app).unwrap();
        assert_eq!(item.name.as_deref(), Some("App"));
        assert_eq!(item.comment, None);
        assert_eq!(item.app().unwrap().exec, None);
    }

    #[test]
    fn test_unknown_id_line_ends_list() {
        let content = "1.1\nmenu\n0\n\n+Root\nRoot\n\n\n\n-1\n*bogus\n-after.desktop\n";
        let parsed = parse_cache(content).unwrap();
        let root = parsed.tree.root().unwrap();
        assert!(parsed.tree.children(root).is_empty());
    }

    #[test]
    fn test_non_directory_root_is_ignored() {
        let parsed = parse_cache("1.1\nmenu\n0\n\n-app.desktop\nApp\n").unwrap();
        assert!(parsed.tree.root().is_none());
    }

    #[test]
    fn test_empty_directories() {
        let content = "1.1\nmenu\n0\n\n+Root\n\n\n\n\n-1\n+Empty\n\n\n\n\n-1\n\n+Other\n\n\n\n\n-1\n\n\n";
        let parsed = parse_cache(content).unwrap();
        let tree = &parsed.tree;
        let root = tree.root().unwrap();
        assert_eq!(tree.children(root).len(), 2);
        let empty = tree.item_by_path("/Root/Empty").unwrap();
        assert!(tree.children(empty).is_empty());
        assert!(tree.item_by_path("/Root/Other").is_some());
    }

    #[test]
    fn test_deep_nesting_does_not_overflow() {
        let depth = 100_000;
        let mut content = String::from("1.1\nmenu\n0\n\n");
        content.push_str(&"+d\n\n\n\n\n0\n".repeat(depth));
        let parsed = parse_cache(&content).unwrap();

        let tree = &parsed.tree;
        assert_eq!(tree.len(), depth);
        let mut current = tree.root().unwrap();
        let mut levels = 1;
        while let [child] = tree.children(current) {
            current = *child;
            levels += 1;
        }
        assert_eq!(levels, depth);

        // Walking and rewriting the same tree stays iterative too
        assert!(tree.list_all_apps().is_empty());
        assert!(tree.is_isomorphic(tree));
        let mut out = Vec::new();
        crate::cache::store::write_cache(&mut out, "menu", tree, &[]).unwrap();
        assert!(parse_cache(&String::from_utf8(out).unwrap()).unwrap().tree.is_isomorphic(tree));
    }

    #[test]
    fn test_siblings_after_nested_directory() {
        let content = "1.1\nmenu\n0\n\n+Root\n\n\n\n\n-1\n+Sub\n\n\n\n\n-1\n-\n\n-after.desktop\n";
        let parsed = parse_cache(content).unwrap();
        let tree = &parsed.tree;
        let sub = tree.item_by_path("/Root/Sub").unwrap();
        assert_eq!(tree.children(sub).len(), 1);
        assert!(tree.item_by_path("/Root/after.desktop").is_some());
    }

    #[test]
    fn test_read_cache_file_unreadable() {
        let temp = tempfile::tempdir().unwrap();
        let err = read_cache_file(&temp.path().join("missing")).unwrap_err();
        assert!(matches!(err, CacheError::Unreadable { .. }));
    }

    #[test]
    fn test_read_fixture() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/applications.cache");
        let parsed = read_cache_file(&path).unwrap();
        assert_eq!(parsed.header.version, FormatVersion::CURRENT);
        assert!(!parsed.tree.list_all_apps().is_empty());
    }

    #[test]
    fn test_read_used_files_drops_missing() {
        let temp = tempfile::tempdir().unwrap();
        let cache = temp.path().join("cache");
        let content = format!(
            "1.1\nmenu\n2\nD{}\nF{}\n\n",
            temp.path().display(),
            temp.path().join("gone.menu").display()
        );
        fs::write(&cache, content).unwrap();

        let used = read_used_files(&cache).unwrap();
        assert_eq!(used, vec![UsedFile::directory(temp.path())]);
    }
}
