//! Clone, fetch and push.
//!
//! Each operation opens one connection to the remote (a `git://` socket,
//! smart HTTP round-trips, or direct access to a repository on disk),
//! reads the ref advertisement, moves objects as a single pack and then
//! updates refs. Objects land in the store only once their pack has been
//! verified and indexed; refs move only after that.
//!
//! Callers observe progress and cancel through [`TransferCallbacks`].

pub mod callbacks;
pub mod checkout;
pub mod clone;
mod connection;
pub mod fetch;
pub mod graph;
mod local;
pub mod options;
pub mod push;

pub use callbacks::{CheckoutProgress, NoCallbacks, TransferCallbacks, TransferProgress};
pub use checkout::checkout_tree;
pub use clone::clone;
pub use fetch::{fetch, FetchOutcome, RefUpdate};
pub use options::{CloneOptions, FetchOptions, PushOptions, TagMode, TransferConfig};
pub use push::{push, PushStatus, PushUpdate};

use std::io;
use std::path::PathBuf;

use git_odb::OdbError;
use git_pack::PackError;
use git_protocol::ProtocolError;
use git_ref::RefError;
use git_repository::RepoError;
use git_transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("corrupt pack: {0}")]
    CorruptPack(#[source] OdbError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("non-fast-forward update rejected: {}", .0.join(", "))]
    NonFastForward(Vec<String>),

    #[error("{} of {} ref updates failed", rejected_count(.0), .0.len())]
    PartialFailure(Vec<PushUpdate>),

    #[error("object store: {0}")]
    Store(#[source] OdbError),

    #[error(transparent)]
    Refs(#[from] RefError),

    #[error(transparent)]
    Repository(#[from] RepoError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("invalid refspec: {0}")]
    InvalidRefspec(String),

    #[error("destination path '{}' already exists and is not an empty directory", .0.display())]
    DestinationNotEmpty(PathBuf),

    #[error("remote branch {0} not found")]
    RemoteRefNotFound(String),
}

fn rejected_count(updates: &[PushUpdate]) -> usize {
    updates.iter().filter(|u| !u.status.is_accepted()).count()
}

impl From<OdbError> for Error {
    fn from(err: OdbError) -> Self {
        match err {
            OdbError::Pack(PackError::Cancelled) => Error::Cancelled,
            // Side-band errors from the remote travel through the pack
            // reader as io errors.
            OdbError::Pack(PackError::Io(e)) | OdbError::Io(e) => match ProtocolError::from_io(e) {
                ProtocolError::Io(e) => Error::Io(e),
                other => Error::Protocol(other),
            },
            other if other.is_corruption() => Error::CorruptPack(other),
            other => Error::Store(other),
        }
    }
}

impl From<PackError> for Error {
    fn from(err: PackError) -> Self {
        OdbError::Pack(err).into()
    }
}
