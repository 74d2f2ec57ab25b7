//! Object identity for the gitr transfer engine.
//!
//! An [`ObjectId`] is the content hash of a git object and the only key
//! used to address the object store. Both SHA-1 (with collision
//! detection) and SHA-256 repositories are supported.

mod algorithm;
mod error;
pub mod hasher;
mod oid;

pub use algorithm::HashAlgorithm;
pub use error::HashError;
pub use hasher::Hasher;
pub use oid::ObjectId;
