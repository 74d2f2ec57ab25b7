//! Client side of git's smart protocol (v0/v1).
//!
//! Everything here is pure codec and state: the byte streams come from a
//! transport and the objects go to a store, neither of which this crate
//! knows about.

pub mod advertisement;
pub mod capability;
pub mod negotiate;
pub mod pktline;
pub mod push;
pub mod refspec;
pub mod sideband;

pub use advertisement::{AdvertisedRef, Advertisement};
pub use capability::{AckMode, Capabilities, SidebandMode};
pub use negotiate::{Negotiation, NegotiationConfig, Step};
pub use refspec::RefSpec;

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("unexpected end of stream while reading {0}")]
    UnexpectedEof(&'static str),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("remote does not support '{0}'")]
    MissingCapability(&'static str),

    #[error("invalid refspec '{0}'")]
    InvalidRefSpec(String),

    #[error(transparent)]
    Hash(#[from] git_hash::HashError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Recover a protocol error that was tunneled through an
    /// [`io::Error`] by one of this crate's `Read` adapters.
    pub fn from_io(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<ProtocolError>()) {
            if let Some(inner) = err.into_inner() {
                if let Ok(protocol) = inner.downcast::<ProtocolError>() {
                    return *protocol;
                }
            }
            return ProtocolError::Protocol("lost tunneled protocol error".into());
        }
        ProtocolError::Io(err)
    }

    pub(crate) fn into_io(self) -> io::Error {
        match self {
            ProtocolError::Io(err) => err,
            other => io::Error::other(other),
        }
    }
}
