use std::cmp::Ordering;

use bstr::BString;
use git_hash::{HashAlgorithm, ObjectId};

use crate::ObjectError;

/// Mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    /// 100644
    Regular,
    /// 100755
    Executable,
    /// 120000
    Symlink,
    /// 160000, a submodule commit
    Gitlink,
    /// 40000
    Tree,
    Unknown(u32),
}

impl FileMode {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0o100644 | 0o100664 => Self::Regular,
            0o100755 => Self::Executable,
            0o120000 => Self::Symlink,
            0o160000 => Self::Gitlink,
            0o040000 => Self::Tree,
            other => Self::Unknown(other),
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Gitlink => 0o160000,
            Self::Tree => 0o040000,
            Self::Unknown(v) => v,
        }
    }

    pub fn is_tree(self) -> bool {
        matches!(self, Self::Tree)
    }
}

fn parse_octal(s: &[u8]) -> Option<u32> {
    if s.is_empty() {
        return None;
    }
    s.iter().try_fold(0u32, |acc, &b| {
        if (b'0'..=b'7').contains(&b) {
            acc.checked_mul(8)?.checked_add(u32::from(b - b'0'))
        } else {
            None
        }
    })
}

/// One `<mode> <name>\0<id>` record of a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: BString,
    pub oid: ObjectId,
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    /// Git's canonical order: byte-wise on names, with directories compared
    /// as if their name ended in `/`.
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.name.as_slice(), other.name.as_slice());
        let common = a.len().min(b.len());
        a[..common].cmp(&b[..common]).then_with(|| {
            let tail = |name: &[u8], is_dir: bool| match name.get(common) {
                Some(&c) => c,
                None if is_dir => b'/',
                None => 0,
            };
            tail(a, self.mode.is_tree()).cmp(&tail(b, other.mode.is_tree()))
        })
    }
}

/// A directory listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn parse(content: &[u8], algo: HashAlgorithm) -> Result<Self, ObjectError> {
        let oid_len = algo.digest_len();
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < content.len() {
            let rest = &content[pos..];
            let space = rest.iter().position(|&b| b == b' ').ok_or(ObjectError::InvalidTreeEntry {
                offset: pos,
                reason: "missing space after mode",
            })?;
            let mode = parse_octal(&rest[..space]).map(FileMode::from_raw).ok_or(
                ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "invalid mode",
                },
            )?;
            let nul = rest.iter().position(|&b| b == 0).ok_or(ObjectError::InvalidTreeEntry {
                offset: pos,
                reason: "missing NUL after name",
            })?;
            if nul <= space + 1 {
                return Err(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "empty name",
                });
            }
            let raw_oid = rest
                .get(nul + 1..nul + 1 + oid_len)
                .ok_or(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "truncated object id",
                })?;
            entries.push(TreeEntry {
                mode,
                name: BString::from(&rest[space + 1..nul]),
                oid: ObjectId::from_bytes(raw_oid, algo)?,
            });
            pos += nul + 1 + oid_len;
        }

        Ok(Self { entries })
    }

    /// Encode the entries in canonical order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut sorted: Vec<&TreeEntry> = self.entries.iter().collect();
        sorted.sort();
        let mut out = Vec::new();
        for entry in sorted {
            out.extend_from_slice(format!("{:o} ", entry.mode.raw()).as_bytes());
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }

    /// Entries sorted canonically, as git stores them.
    pub fn sorted(mut self) -> Self {
        self.entries.sort();
        self
    }
}
