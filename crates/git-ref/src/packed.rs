//! The `packed-refs` file.
//!
//! ```text
//! # pack-refs with: peeled fully-peeled sorted
//! <hex-oid> <refname>
//! ^<hex-oid>        peeled target of the annotated tag above
//! ```

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use git_hash::ObjectId;

use crate::lock::LockFile;
use crate::{RefError, RefName};

const HEADER: &str = "# pack-refs with: peeled fully-peeled sorted \n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRef {
    pub name: RefName,
    pub oid: ObjectId,
    pub peeled: Option<ObjectId>,
}

#[derive(Debug, Clone, Default)]
pub struct PackedRefs {
    refs: Vec<PackedRef>,
}

impl PackedRefs {
    pub fn parse(data: &str) -> Result<Self, RefError> {
        let mut refs: Vec<PackedRef> = Vec::new();
        for (number, line) in data.lines().enumerate() {
            let bad = |reason: &str| RefError::Parse(format!("packed-refs line {}: {reason}", number + 1));
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(hex) = line.strip_prefix('^') {
                let last = refs.last_mut().ok_or_else(|| bad("peel line without a ref"))?;
                last.peeled = Some(ObjectId::from_hex(hex.trim())?);
                continue;
            }
            let (hex, name) = line.split_once(' ').ok_or_else(|| bad("missing space"))?;
            refs.push(PackedRef {
                name: RefName::new(name.trim_end())?,
                oid: ObjectId::from_hex(hex)?,
                peeled: None,
            });
        }
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { refs })
    }

    /// Load `<git_dir>/packed-refs`; a missing file is an empty set.
    pub fn load(git_dir: &Path) -> Result<Self, RefError> {
        match fs::read_to_string(git_dir.join("packed-refs")) {
            Ok(data) => Self::parse(&data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(RefError::IoPath {
                path: git_dir.join("packed-refs"),
                source: e,
            }),
        }
    }

    pub fn find(&self, name: &RefName) -> Option<&PackedRef> {
        self.refs
            .binary_search_by(|r| r.name.cmp(name))
            .ok()
            .map(|i| &self.refs[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackedRef> {
        self.refs.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub(crate) fn remove(&mut self, name: &RefName) -> bool {
        match self.refs.binary_search_by(|r| r.name.cmp(name)) {
            Ok(i) => {
                self.refs.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn write(&self, git_dir: &Path) -> Result<(), RefError> {
        let path = git_dir.join("packed-refs");
        let mut lock = LockFile::acquire(&path)?;
        let mut out = String::from(HEADER);
        for r in &self.refs {
            out.push_str(&format!("{} {}\n", r.oid, r.name));
            if let Some(peeled) = r.peeled {
                out.push_str(&format!("^{peeled}\n"));
            }
        }
        lock.write_all(out.as_bytes())
            .map_err(|source| RefError::IoPath { path, source })?;
        lock.commit()
    }
}
