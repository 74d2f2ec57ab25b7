//! References: names pointing at objects, or at other references.
//!
//! Only the files backend is provided. Every write goes through a
//! `<name>.lock` file that is renamed over the ref, so readers see
//! either the old or the new value and two writers of the same ref
//! never interleave.

mod error;
mod lock;
mod name;
pub mod packed;
mod store;

pub use error::RefError;
pub use name::RefName;
pub use store::RefStore;

use git_hash::ObjectId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Direct { name: RefName, target: ObjectId },
    Symbolic { name: RefName, target: RefName },
}

impl Reference {
    pub fn name(&self) -> &RefName {
        match self {
            Self::Direct { name, .. } | Self::Symbolic { name, .. } => name,
        }
    }

    pub fn target_oid(&self) -> Option<ObjectId> {
        match self {
            Self::Direct { target, .. } => Some(*target),
            Self::Symbolic { .. } => None,
        }
    }
}
