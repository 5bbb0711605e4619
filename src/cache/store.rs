//! Cache store - Write format 1.1 cache files and check their freshness

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::cache::meta::{CacheHeader, FormatVersion, KNOWN_DESKTOPS};
use crate::cache::model::{ItemId, ItemKind, MenuTree};
use crate::cache::reader::read_header;
use crate::core::util::get_mtime;

/// Serialize a tree. The manifest is taken from the tree's sources.
///
/// Fails with `InvalidInput` for content the format cannot carry: a raw
/// newline in any value, a `;` in a desktop name, a directory index outside
/// the manifest, an application without an id, or a root that is not a
/// directory. Checks happen while writing, so a failed write may leave a
/// partial stream behind; `write_cache_atomic` never exposes it.
pub fn write_cache<W: Write>(
    out: &mut W,
    menu_name: &str,
    tree: &MenuTree,
    extra_desktops: &[String],
) -> io::Result<()> {
    writeln!(out, "{}", FormatVersion::CURRENT)?;
    writeln!(out, "{}", line_value(menu_name)?)?;
    writeln!(out, "{}", tree.sources().len())?;
    for entry in tree.sources() {
        writeln!(out, "{}", line_value(&entry.to_line())?)?;
    }
    for de in extra_desktops
        .iter()
        .filter(|de| !de.is_empty() && !KNOWN_DESKTOPS.contains(&de.as_str()))
    {
        if de.contains(';') {
            return Err(invalid(format!("desktop name contains ';': {:?}", de)));
        }
        write!(out, "{};", line_value(de)?)?;
    }
    writeln!(out)?;

    let Some(root) = tree.root() else {
        return Ok(());
    };
    if !tree.item(root).is_some_and(|item| item.is_dir()) {
        return Err(invalid("the root must be a directory".to_string()));
    }

    // One iterator per open directory; exhausting it closes the directory
    write_item(out, tree, root)?;
    let mut open = vec![tree.children(root).iter()];
    while let Some(children) = open.last_mut() {
        match children.next() {
            Some(&child) => {
                write_item(out, tree, child)?;
                if tree.item(child).is_some_and(|item| item.is_dir()) {
                    open.push(tree.children(child).iter());
                }
            }
            None => {
                open.pop();
                writeln!(out)?;
            }
        }
    }
    Ok(())
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message)
}

/// A value that must fit on one line
fn line_value(value: &str) -> io::Result<&str> {
    if value.contains('\n') {
        return Err(invalid(format!("value contains a newline: {:?}", value)));
    }
    Ok(value)
}

fn opt_value(value: &Option<String>) -> io::Result<&str> {
    line_value(value.as_deref().unwrap_or_default())
}

/// Write the lines of one item; a directory's children follow separately
fn write_item<W: Write>(out: &mut W, tree: &MenuTree, id: ItemId) -> io::Result<()> {
    let Some(item) = tree.item(id) else {
        return Ok(());
    };
    let index = match item.file_dir_index {
        Some(i) if i >= tree.sources().len() => {
            return Err(invalid(format!("directory index {} is not in the manifest", i)));
        }
        Some(i) => i as i64,
        None => -1,
    };
    let common = |out: &mut W| -> io::Result<()> {
        writeln!(out, "{}", opt_value(&item.name)?)?;
        writeln!(out, "{}", opt_value(&item.comment)?)?;
        writeln!(out, "{}", opt_value(&item.icon)?)?;
        writeln!(out, "{}", opt_value(&item.file_name)?)?;
        writeln!(out, "{}", index)
    };

    match &item.kind {
        ItemKind::Separator => writeln!(out, "-"),
        ItemKind::Directory { .. } => {
            writeln!(out, "+{}", opt_value(&item.id)?)?;
            common(&mut *out)
        }
        ItemKind::Application(app) => {
            let app_id = opt_value(&item.id)?;
            if app_id.is_empty() {
                return Err(invalid("application without an id".to_string()));
            }
            writeln!(out, "-{}", app_id)?;
            common(&mut *out)?;
            writeln!(out, "{}", opt_value(&app.generic_name)?)?;
            writeln!(out, "{}", opt_value(&app.exec)?)?;
            writeln!(out, "{}", app.flags.bits())?;
            writeln!(out, "{}", app.show_in as i32)
        }
    }
}

/// Write a cache file through a temporary file in the same directory and
/// rename it into place, so readers never see a partial file
pub fn write_cache_atomic(
    path: &Path,
    menu_name: &str,
    tree: &MenuTree,
    extra_desktops: &[String],
) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut out = io::BufWriter::new(tmp.as_file_mut());
        write_cache(&mut out, menu_name, tree, extra_desktops)?;
        out.flush()?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Header of a cache file that is still up to date.
///
/// Returns None when the file is missing, cannot be parsed, or any used file
/// was modified after the cache file. Used files that vanished are skipped.
pub fn fresh_header(cache_file: &Path) -> Option<CacheHeader> {
    let cache_mtime = get_mtime(cache_file)?;
    let header = read_header(cache_file).ok()?;

    let stale = header.used_files.iter().find(|entry| {
        get_mtime(entry.path()).is_some_and(|mtime| mtime > cache_mtime)
    });
    if let Some(entry) = stale {
        tracing::debug!(
            cache = %cache_file.display(),
            changed = %entry.path().display(),
            "cache file is stale"
        );
        return None;
    }
    Some(header)
}
