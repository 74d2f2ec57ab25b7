//! Byte transports for the smart protocol.
//!
//! A [`Transport`] delivers the remote's ref advertisement and then carries
//! request/response exchanges for negotiation, pack download and push.
//! Two schemes speak over the network:
//! - `git://`: one TCP connection, stateful, see [`tcp`]
//! - `http://` and `https://`: one GET for the advertisement and one POST
//!   per exchange, stateless, see [`http`]
//!
//! Local paths never reach this crate; the transfer layer reads their
//! stores directly.

pub mod credential;
pub mod http;
pub mod tcp;
pub mod url;

use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use git_protocol::ProtocolError;

pub use credential::{Credential, CredentialProvider, CredentialRequest, GitCredentialHelper, StaticCredentials};
pub use url::{GitUrl, Scheme};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("cannot connect to {url}: {source}")]
    Connect { url: String, source: io::Error },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("authentication failed for {0}")]
    AuthenticationFailed(String),

    #[error("{url} answered with content type {content_type:?}, not a smart git response")]
    UnexpectedContentType { url: String, content_type: String },

    #[error("{0} is a dumb HTTP server; only the smart protocol is supported")]
    DumbServer(String),

    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },

    #[error("credential helper: {0}")]
    Credential(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Server-side program a connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Serves fetch and clone.
    UploadPack,
    /// Serves push.
    ReceivePack,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }
}

/// Connection settings shared by every scheme.
#[derive(Clone)]
pub struct TransportOptions {
    pub connect_timeout: Option<Duration>,
    /// Per-read and per-write socket timeout.
    pub io_timeout: Option<Duration>,
    pub user_agent: String,
    /// Honor `http_proxy` and friends; off by default.
    pub use_env_proxy: bool,
    pub credentials: Option<Arc<dyn CredentialProvider>>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(30)),
            io_timeout: Some(Duration::from_secs(300)),
            user_agent: concat!("gitr/", env!("CARGO_PKG_VERSION")).to_string(),
            use_env_proxy: false,
            credentials: None,
        }
    }
}

impl std::fmt::Debug for TransportOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportOptions")
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("user_agent", &self.user_agent)
            .field("use_env_proxy", &self.use_env_proxy)
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}

/// A connection to one service of one remote.
///
/// `advertise` is called once, first. Each `exchange` sends a complete
/// request and returns the server's answer; the reader must be drained
/// (or dropped) before the next exchange.
pub trait Transport: Send {
    /// Raw advertisement bytes, pkt-line framed, up to and including the
    /// closing flush.
    fn advertise(&mut self) -> Result<Vec<u8>, TransportError>;

    fn exchange(&mut self, request: &[u8]) -> Result<Box<dyn Read + '_>, TransportError>;

    /// Whether each exchange reaches a server that remembers nothing of
    /// the previous one.
    fn is_stateless(&self) -> bool {
        false
    }
}

/// Open a connection to `service` at a network `url`.
pub fn connect(
    url: &GitUrl,
    service: Service,
    options: &TransportOptions,
) -> Result<Box<dyn Transport>, TransportError> {
    match url.scheme {
        Scheme::Git => Ok(Box::new(tcp::TcpTransport::connect(url, service, options)?)),
        Scheme::Http | Scheme::Https => Ok(Box::new(http::HttpTransport::new(url, service, options)?)),
        Scheme::Ssh | Scheme::File | Scheme::Local => Err(TransportError::UnsupportedScheme(url.scheme.to_string())),
    }
}
