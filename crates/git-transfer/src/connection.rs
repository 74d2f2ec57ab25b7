//! An open remote: either a wire transport or a repository on disk.

use std::io;
use std::sync::Arc;

use git_hash::HashAlgorithm;
use git_protocol::{Advertisement, ProtocolError};
use git_repository::{RepoError, Repository};
use git_transport::{CredentialProvider, GitUrl, Service, Transport, TransportError};
use tracing::debug;

use crate::options::TransferConfig;
use crate::{local, Error};

pub(crate) enum Endpoint {
    Wire(Box<dyn Transport>),
    Local(Repository),
}

pub(crate) struct Connection {
    pub endpoint: Endpoint,
    pub advertisement: Advertisement,
    /// The URL without any password, for messages and logs.
    pub url: String,
}

pub(crate) fn open(
    url: &str,
    service: Service,
    config: &TransferConfig,
    credentials: Option<Arc<dyn CredentialProvider>>,
) -> Result<Connection, Error> {
    let parsed = GitUrl::parse(url)?;
    let shown = parsed.to_string();

    if let Some(path) = parsed.local_path() {
        let repo = Repository::open(&path).map_err(|e| match e {
            RepoError::NotFound(path) => Error::Transport(TransportError::Connect {
                url: path.display().to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "not a git repository"),
            }),
            other => other.into(),
        })?;
        let advertisement = local::advertise(&repo)?;
        debug!(url = %shown, refs = advertisement.refs.len(), "opened local remote");
        return Ok(Connection {
            endpoint: Endpoint::Local(repo),
            advertisement,
            url: shown,
        });
    }

    let mut transport = git_transport::connect(&parsed, service, &config.transport_options(credentials))?;
    let raw = transport.advertise()?;
    let advertisement = Advertisement::from_bytes(&raw)?;
    debug!(
        url = %shown,
        service = service.as_str(),
        bytes = raw.len(),
        refs = advertisement.refs.len(),
        stateless = transport.is_stateless(),
        "discovered refs"
    );
    Ok(Connection {
        endpoint: Endpoint::Wire(transport),
        advertisement,
        url: shown,
    })
}

impl Connection {
    /// The remote's hash algorithm, which must match `local` when given.
    pub fn object_format(&self, local: Option<HashAlgorithm>) -> Result<HashAlgorithm, Error> {
        let remote = self.advertisement.object_format()?;
        match local {
            Some(local) if local != remote => Err(ProtocolError::Protocol(format!(
                "{} uses {remote} object ids but the local repository uses {local}",
                self.url
            ))
            .into()),
            _ => Ok(remote),
        }
    }

    /// End the conversation early. A stateful server is waiting for
    /// requests after its advertisement; a flush tells it none follow.
    pub fn finish(&mut self) -> Result<(), Error> {
        if let Endpoint::Wire(transport) = &mut self.endpoint {
            if !transport.is_stateless() {
                drop(transport.exchange(b"0000")?);
            }
        }
        Ok(())
    }
}
