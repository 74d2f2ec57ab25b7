//! Writing a tree into an empty work tree.
//!
//! This is the fresh-clone case only: the target holds no files, so
//! there is nothing to compare against and no conflicts to resolve. No
//! index is written.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bstr::{BStr, ByteSlice};
use git_hash::ObjectId;
use git_object::{FileMode, ObjectType, Tree};
use git_odb::ObjectDatabase;
use tracing::debug;

use crate::callbacks::{CheckoutProgress, TransferCallbacks};
use crate::Error;

struct Planned {
    /// Relative, `/`-separated, for progress reports.
    path: String,
    /// Relative filesystem path built from the raw entry names.
    rel: PathBuf,
    mode: FileMode,
    oid: ObjectId,
}

/// Materialize `tree` under `target`, reporting each file written.
/// Returns the number of files written.
pub fn checkout_tree(
    odb: &ObjectDatabase,
    tree: &ObjectId,
    target: &Path,
    callbacks: &mut dyn TransferCallbacks,
) -> Result<usize, Error> {
    let plan = plan(odb, tree)?;
    let total = plan.iter().filter(|p| p.mode != FileMode::Gitlink).count();
    let mut completed = 0;
    let mut made = HashSet::new();

    for entry in &plan {
        let path = target.join(&entry.rel);
        if let Some(parent) = entry.rel.parent() {
            make_dirs(target, parent, &mut made)?;
        }
        match entry.mode {
            FileMode::Gitlink => {
                make_dirs(target, &entry.rel, &mut made)?;
                continue;
            }
            FileMode::Symlink => {
                let link = odb.read_kind(&entry.oid, ObjectType::Blob)?;
                write_symlink(&path, &link.data)?;
            }
            mode => {
                let blob = odb.read_kind(&entry.oid, ObjectType::Blob)?;
                create_file(&path, &blob.data)?;
                set_executable(&path, mode == FileMode::Executable)?;
            }
        }
        completed += 1;
        callbacks.on_checkout(&CheckoutProgress {
            completed,
            total,
            path: entry.path.clone(),
        });
    }
    debug!(files = completed, target = %target.display(), "checkout complete");
    Ok(completed)
}

/// Create each directory of `rel` below `target`, refusing to pass
/// through anything that is not a real directory (a symlink in particular).
fn make_dirs(target: &Path, rel: &Path, made: &mut HashSet<PathBuf>) -> io::Result<()> {
    let mut dir = target.to_path_buf();
    for component in rel.components() {
        dir.push(component);
        if made.contains(&dir) {
            continue;
        }
        match fs::symlink_metadata(&dir) {
            Ok(meta) if meta.file_type().is_dir() => {}
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("refusing to check out beneath {}", dir.display()),
                ))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir(&dir)?,
            Err(e) => return Err(e),
        }
        made.insert(dir.clone());
    }
    Ok(())
}

/// Every non-tree entry in canonical order, found without recursion.
fn plan(odb: &ObjectDatabase, root: &ObjectId) -> Result<Vec<Planned>, Error> {
    enum Item {
        Tree(String, PathBuf, ObjectId),
        Entry(Planned),
    }

    let mut out = Vec::new();
    let mut stack = vec![Item::Tree(String::new(), PathBuf::new(), *root)];
    while let Some(item) = stack.pop() {
        let (prefix, dir, oid) = match item {
            Item::Entry(planned) => {
                out.push(planned);
                continue;
            }
            Item::Tree(prefix, dir, oid) => (prefix, dir, oid),
        };
        let raw = odb.read_kind(&oid, ObjectType::Tree)?;
        let tree = Tree::parse(&raw.data, odb.algorithm()).map_err(git_odb::OdbError::from)?;
        let mut seen = HashSet::new();
        for entry in &tree.entries {
            if !seen.insert(entry.name.as_slice()) {
                return Err(unsafe_entry(entry.name.as_bstr(), "duplicate name").into());
            }
        }
        for entry in tree.entries.iter().rev() {
            check_component(entry.name.as_bstr())?;
            let path = if prefix.is_empty() {
                entry.name.to_str_lossy().into_owned()
            } else {
                format!("{prefix}/{}", entry.name.to_str_lossy())
            };
            let rel = dir.join(os_name(entry.name.as_bstr())?);
            stack.push(if entry.mode.is_tree() {
                Item::Tree(path, rel, entry.oid)
            } else {
                Item::Entry(Planned {
                    path,
                    rel,
                    mode: entry.mode,
                    oid: entry.oid,
                })
            });
        }
    }
    Ok(out)
}

fn unsafe_entry(name: &BStr, reason: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("refusing to check out tree entry {name:?}: {reason}"),
    )
}

/// Tree entry names come from the remote; refuse any that would escape
/// the work tree or write into the repository.
fn check_component(name: &BStr) -> Result<(), io::Error> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.eq_ignore_ascii_case(b".git")
        || name.contains(&b'/')
        || name.contains(&b'\\')
        || name.contains(&0);
    if bad {
        return Err(unsafe_entry(name, "unsafe name"));
    }
    Ok(())
}

#[cfg(unix)]
fn os_name(name: &BStr) -> io::Result<&OsStr> {
    use std::os::unix::ffi::OsStrExt;
    Ok(OsStr::from_bytes(name))
}

#[cfg(not(unix))]
fn os_name(name: &BStr) -> io::Result<&OsStr> {
    name.to_str()
        .map(OsStr::new)
        .map_err(|_| unsafe_entry(name, "name is not valid UTF-8"))
}

/// Write a new file; `create_new` never follows a symlink already at `path`.
fn create_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(data)
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn write_symlink(path: &Path, target: &[u8]) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;
    std::os::unix::fs::symlink(std::ffi::OsStr::from_bytes(target), path)
}

#[cfg(not(unix))]
fn write_symlink(path: &Path, target: &[u8]) -> io::Result<()> {
    create_file(path, target)
}
