use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use git_hash::ObjectId;
use tracing::trace;

use crate::lock::LockFile;
use crate::packed::PackedRefs;
use crate::{RefError, RefName, Reference};

const MAX_SYMREF_DEPTH: usize = 10;

/// Files backend: loose refs under the git directory, with
/// `packed-refs` as the fallback. A loose ref shadows a packed one.
#[derive(Debug, Clone)]
pub struct RefStore {
    git_dir: PathBuf,
}

impl RefStore {
    pub fn new(git_dir: impl AsRef<Path>) -> Self {
        Self {
            git_dir: git_dir.as_ref().to_path_buf(),
        }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn loose_path(&self, name: &RefName) -> PathBuf {
        self.git_dir.join(name.as_str())
    }

    /// Look up `name` without following symbolic refs.
    pub fn find(&self, name: &RefName) -> Result<Option<Reference>, RefError> {
        if let Some(found) = self.read_loose(name)? {
            return Ok(Some(found));
        }
        Ok(PackedRefs::load(&self.git_dir)?
            .find(name)
            .map(|r| Reference::Direct {
                name: r.name.clone(),
                target: r.oid,
            }))
    }

    /// Follow symbolic refs down to an object id. `None` when the chain
    /// ends at a ref that does not exist, like HEAD in a fresh repository.
    pub fn resolve(&self, name: &RefName) -> Result<Option<ObjectId>, RefError> {
        let mut current = name.clone();
        for _ in 0..MAX_SYMREF_DEPTH {
            match self.find(&current)? {
                Some(Reference::Direct { target, .. }) => return Ok(Some(target)),
                Some(Reference::Symbolic { target, .. }) => current = target,
                None => return Ok(None),
            }
        }
        Err(RefError::SymrefLoop(name.to_string()))
    }

    /// The branch HEAD points at, if HEAD is symbolic.
    pub fn head_target(&self) -> Result<Option<RefName>, RefError> {
        Ok(match self.find(&RefName::head())? {
            Some(Reference::Symbolic { target, .. }) => Some(target),
            _ => None,
        })
    }

    /// All direct refs under `prefix` (for example `"refs/heads/"`),
    /// sorted by name. Symbolic refs such as `refs/remotes/origin/HEAD`
    /// are left out.
    pub fn list(&self, prefix: &str) -> Result<Vec<(RefName, ObjectId)>, RefError> {
        let mut found = std::collections::BTreeMap::new();
        for r in PackedRefs::load(&self.git_dir)?.iter() {
            if r.name.as_str().starts_with(prefix) {
                found.insert(r.name.clone(), r.oid);
            }
        }

        let mut stack = vec![self.git_dir.join("refs")];
        while let Some(dir) = stack.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => return Err(RefError::IoPath { path: dir, source }),
            };
            for entry in entries {
                let path = entry?.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Some(name) = self.name_for_path(&path) else {
                    continue;
                };
                if !name.as_str().starts_with(prefix) {
                    continue;
                }
                match self.read_loose(&name)? {
                    Some(Reference::Direct { target, .. }) => {
                        found.insert(name, target);
                    }
                    _ => {
                        found.remove(&name);
                    }
                }
            }
        }
        Ok(found.into_iter().collect())
    }

    /// Point `name` at `oid`, creating it if needed.
    pub fn write(&self, name: &RefName, oid: &ObjectId) -> Result<(), RefError> {
        let lock = self.lock(name)?;
        write_locked(lock, format!("{oid}\n"))
    }

    pub fn write_symbolic(&self, name: &RefName, target: &RefName) -> Result<(), RefError> {
        let lock = self.lock(name)?;
        write_locked(lock, format!("ref: {target}\n"))
    }

    /// Move `name` from `expected` to `new` atomically with respect to
    /// other writers of the same ref. `None` on either side means the ref
    /// is absent: `expected: None` creates, `new: None` deletes.
    pub fn compare_and_swap(
        &self,
        name: &RefName,
        expected: Option<ObjectId>,
        new: Option<ObjectId>,
    ) -> Result<(), RefError> {
        let lock = self.lock(name)?;
        let actual = match self.find(name)? {
            Some(Reference::Direct { target, .. }) => Some(target),
            Some(Reference::Symbolic { .. }) => {
                return Err(RefError::Parse(format!("{name} is a symbolic ref")));
            }
            None => None,
        };
        if actual != expected {
            return Err(RefError::CasFailed {
                name: name.to_string(),
                expected: describe(expected),
                actual: describe(actual),
            });
        }
        trace!(%name, old = %describe(actual), new = %describe(new), "ref update");
        match new {
            Some(oid) => write_locked(lock, format!("{oid}\n")),
            None => {
                self.remove(name)?;
                drop(lock);
                self.prune_empty_dirs(name);
                Ok(())
            }
        }
    }

    /// Remove `name` from both loose and packed storage. Deleting a ref
    /// that does not exist is not an error.
    pub fn delete(&self, name: &RefName) -> Result<(), RefError> {
        let lock = self.lock(name)?;
        self.remove(name)?;
        drop(lock);
        self.prune_empty_dirs(name);
        Ok(())
    }

    fn remove(&self, name: &RefName) -> Result<(), RefError> {
        let path = self.loose_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(RefError::IoPath { path, source }),
        }
        let mut packed = PackedRefs::load(&self.git_dir)?;
        if packed.remove(name) {
            packed.write(&self.git_dir)?;
        }
        Ok(())
    }

    fn lock(&self, name: &RefName) -> Result<LockFile, RefError> {
        let path = self.loose_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| RefError::DirectoryConflict {
                name: name.to_string(),
                source,
            })?;
        }
        if path.is_dir() {
            return Err(RefError::DirectoryConflict {
                name: name.to_string(),
                source: io::Error::from(io::ErrorKind::AlreadyExists),
            });
        }
        LockFile::acquire(&path)
    }

    fn read_loose(&self, name: &RefName) -> Result<Option<Reference>, RefError> {
        let path = self.loose_path(name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound) || path.is_dir() => return Ok(None),
            Err(source) => return Err(RefError::IoPath { path, source }),
        };
        let contents = contents.trim();
        if let Some(target) = contents.strip_prefix("ref:") {
            return Ok(Some(Reference::Symbolic {
                name: name.clone(),
                target: RefName::new(target.trim())?,
            }));
        }
        let target = ObjectId::from_hex(contents)
            .map_err(|e| RefError::Parse(format!("{name}: {e}")))?;
        Ok(Some(Reference::Direct {
            name: name.clone(),
            target,
        }))
    }

    fn name_for_path(&self, path: &Path) -> Option<RefName> {
        let relative = path.strip_prefix(&self.git_dir).ok()?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?
            .join("/");
        RefName::new(name).ok()
    }

    fn prune_empty_dirs(&self, removed: &RefName) {
        let refs_dir = self.git_dir.join("refs");
        let path = self.loose_path(removed);
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == refs_dir || !d.starts_with(&refs_dir) || fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}

fn write_locked(mut lock: LockFile, content: String) -> Result<(), RefError> {
    lock.write_all(content.as_bytes())?;
    lock.commit()
}

fn describe(oid: Option<ObjectId>) -> String {
    oid.map_or_else(|| "nothing".to_string(), |oid| oid.to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(byte: u8) -> ObjectId {
        ObjectId::from_bytes(&[byte; 20], git_hash::HashAlgorithm::Sha1).unwrap()
    }

    fn name(s: &str) -> RefName {
        RefName::new(s).unwrap()
    }

    #[test]
    fn write_resolve_through_head() {
        let dir = tempfile::tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        refs.write(&name("refs/heads/main"), &oid(1)).unwrap();
        refs.write_symbolic(&RefName::head(), &name("refs/heads/main")).unwrap();

        assert_eq!(refs.resolve(&RefName::head()).unwrap(), Some(oid(1)));
        assert_eq!(refs.head_target().unwrap(), Some(name("refs/heads/main")));
        assert_eq!(
            fs::read_to_string(dir.path().join("HEAD")).unwrap(),
            "ref: refs/heads/main\n"
        );
    }

    #[test]
    fn unborn_head_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        refs.write_symbolic(&RefName::head(), &name("refs/heads/main")).unwrap();
        assert_eq!(refs.resolve(&RefName::head()).unwrap(), None);
    }

    #[test]
    fn symref_loop_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        refs.write_symbolic(&name("refs/heads/a"), &name("refs/heads/b")).unwrap();
        refs.write_symbolic(&name("refs/heads/b"), &name("refs/heads/a")).unwrap();
        assert!(matches!(
            refs.resolve(&name("refs/heads/a")),
            Err(RefError::SymrefLoop(_))
        ));
    }

    #[test]
    fn list_merges_loose_over_packed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("packed-refs"),
            format!("{} refs/heads/main\n{} refs/tags/v1\n", oid(1), oid(2)),
        )
        .unwrap();
        let refs = RefStore::new(dir.path());
        refs.write(&name("refs/heads/main"), &oid(3)).unwrap();
        refs.write(&name("refs/heads/topic/x"), &oid(4)).unwrap();
        refs.write_symbolic(&name("refs/remotes/origin/HEAD"), &name("refs/remotes/origin/main"))
            .unwrap();

        assert_eq!(
            refs.list("refs/heads/").unwrap(),
            vec![(name("refs/heads/main"), oid(3)), (name("refs/heads/topic/x"), oid(4))]
        );
        assert_eq!(refs.list("refs/tags/").unwrap(), vec![(name("refs/tags/v1"), oid(2))]);
        assert!(refs.list("refs/remotes/").unwrap().is_empty());
    }

    #[test]
    fn compare_and_swap_checks_old_value() {
        let dir = tempfile::tempdir().unwrap();
        let refs = RefStore::new(dir.path());
        let main = name("refs/heads/main");

        refs.compare_and_swap(&main, None, Some(oid(1))).unwrap();
        assert!(matches!(
            refs.compare_and_swap(&main, None, Some(oid(2))),
            Err(RefError::CasFailed { .. })
        ));
        refs.compare_and_swap(&main, Some(oid(1)), Some(oid(2))).unwrap();
        assert_eq!(refs.resolve(&main).unwrap(), Some(oid(2)));

        refs.compare_and_swap(&main, Some(oid(2)), None).unwrap();
        assert_eq!(refs.find(&main).unwrap(), None);
        assert!(!dir.path().join("refs/heads/main.lock").exists());
    }

    #[test]
    fn delete_removes_packed_copy_and_empty_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("packed-refs"), format!("{} refs/heads/gone\n", oid(1))).unwrap();
        let refs = RefStore::new(dir.path());
        refs.write(&name("refs/heads/deep/branch"), &oid(2)).unwrap();

        refs.delete(&name("refs/heads/gone")).unwrap();
        refs.delete(&name("refs/heads/deep/branch")).unwrap();
        refs.delete(&name("refs/heads/never-existed")).unwrap();

        assert!(refs.list("refs/").unwrap().is_empty());
        assert!(!dir.path().join("refs/heads/deep").exists());
    }
}
