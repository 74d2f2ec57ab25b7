//! Git object payloads.
//!
//! The transfer engine stores objects as raw bytes and only decodes them
//! when it has to follow links: commits to their tree and parents, trees
//! to their entries, tags to their target. The types here decode and
//! encode those payloads in git's canonical format.

mod commit;
pub mod header;
mod signature;
mod tag;
mod tree;

pub use commit::Commit;
pub use signature::Signature;
pub use tag::Tag;
pub use tree::{FileMode, Tree, TreeEntry};

use std::fmt;

use bstr::BString;
use git_hash::{HashAlgorithm, HashError, Hasher, ObjectId};

/// Errors produced while decoding object payloads.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("invalid object type: {0}")]
    InvalidType(BString),

    #[error("invalid object header: {0}")]
    InvalidHeader(String),

    #[error("invalid tree entry at offset {offset}: {reason}")]
    InvalidTreeEntry { offset: usize, reason: &'static str },

    #[error("{kind} is missing its '{field}' header")]
    MissingField { kind: ObjectType, field: &'static str },

    #[error("invalid signature: {0}")]
    InvalidSignature(BString),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// The four kinds of git objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"blob" => Ok(Self::Blob),
            b"tree" => Ok(Self::Tree),
            b"commit" => Ok(Self::Commit),
            b"tag" => Ok(Self::Tag),
            _ => Err(ObjectError::InvalidType(BString::from(s))),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Blob(Vec<u8>),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    /// Decode a payload of a known kind. `algo` decides the width of the
    /// binary ids embedded in trees.
    pub fn parse(kind: ObjectType, content: &[u8], algo: HashAlgorithm) -> Result<Self, ObjectError> {
        Ok(match kind {
            ObjectType::Blob => Self::Blob(content.to_vec()),
            ObjectType::Tree => Self::Tree(Tree::parse(content, algo)?),
            ObjectType::Commit => Self::Commit(Commit::parse(content)?),
            ObjectType::Tag => Self::Tag(Tag::parse(content)?),
        })
    }

    pub fn kind(&self) -> ObjectType {
        match self {
            Self::Blob(_) => ObjectType::Blob,
            Self::Tree(_) => ObjectType::Tree,
            Self::Commit(_) => ObjectType::Commit,
            Self::Tag(_) => ObjectType::Tag,
        }
    }

    /// Canonical payload bytes, without the `"<kind> <len>\0"` header.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Blob(data) => data.clone(),
            Self::Tree(tree) => tree.to_bytes(),
            Self::Commit(commit) => commit.to_bytes(),
            Self::Tag(tag) => tag.to_bytes(),
        }
    }

    pub fn compute_id(&self, algo: HashAlgorithm) -> Result<ObjectId, HashError> {
        Hasher::hash_object(algo, self.kind().as_str(), &self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_type_names() {
        for kind in [ObjectType::Blob, ObjectType::Tree, ObjectType::Commit, ObjectType::Tag] {
            assert_eq!(ObjectType::from_bytes(kind.as_str().as_bytes()).unwrap(), kind);
        }
        assert!(ObjectType::from_bytes(b"note").is_err());
    }

    #[test]
    fn blob_id_matches_git() {
        let blob = Object::Blob(b"hello world\n".to_vec());
        assert_eq!(
            blob.compute_id(HashAlgorithm::Sha1).unwrap().to_hex(),
            "3b18e512dba79e4c8300dd08aeb37f8e728b8dad"
        );
    }

    #[test]
    fn empty_tree_id_matches_git() {
        let tree = Object::Tree(Tree::default());
        assert_eq!(
            tree.compute_id(HashAlgorithm::Sha1).unwrap().to_hex(),
            "4b825dc642cb6eb9a060e54bf8d69288fbee4904"
        );
    }
}
