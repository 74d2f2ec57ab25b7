//! Knobs for clone, fetch and push.

use std::sync::Arc;
use std::time::Duration;

use git_protocol::NegotiationConfig;
use git_transport::{CredentialProvider, TransportOptions};

/// Settings shared by every operation.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Minimum time between two transfer progress callbacks.
    pub progress_interval: Duration,
    pub connect_timeout: Option<Duration>,
    pub io_timeout: Option<Duration>,
    /// Sent as `agent=` and as the HTTP user agent.
    pub user_agent: String,
    pub max_haves: usize,
    pub initial_have_batch: usize,
    pub use_env_proxy: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        let transport = TransportOptions::default();
        let negotiation = NegotiationConfig::default();
        Self {
            progress_interval: Duration::from_millis(100),
            connect_timeout: transport.connect_timeout,
            io_timeout: transport.io_timeout,
            user_agent: transport.user_agent,
            max_haves: negotiation.max_haves,
            initial_have_batch: negotiation.initial_batch,
            use_env_proxy: false,
        }
    }
}

impl TransferConfig {
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn max_haves(mut self, max: usize) -> Self {
        self.max_haves = max;
        self
    }

    pub fn initial_have_batch(mut self, batch: usize) -> Self {
        self.initial_have_batch = batch;
        self
    }

    pub fn use_env_proxy(mut self, enabled: bool) -> Self {
        self.use_env_proxy = enabled;
        self
    }

    pub(crate) fn transport_options(&self, credentials: Option<Arc<dyn CredentialProvider>>) -> TransportOptions {
        TransportOptions {
            connect_timeout: self.connect_timeout,
            io_timeout: self.io_timeout,
            user_agent: self.user_agent.clone(),
            use_env_proxy: self.use_env_proxy,
            credentials,
        }
    }
}

/// Which tags a fetch brings along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagMode {
    /// Tags pointing into fetched history.
    #[default]
    Follow,
    /// Every advertised tag.
    All,
    None,
}

#[derive(Clone)]
pub struct CloneOptions {
    /// No work tree; branches land directly in `refs/heads`.
    pub bare: bool,
    /// Materialize HEAD's tree. Ignored for bare clones.
    pub checkout: bool,
    pub remote_name: String,
    /// Branch to check out instead of the remote's HEAD.
    pub branch: Option<String>,
    pub credentials: Option<Arc<dyn CredentialProvider>>,
    pub config: TransferConfig,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            bare: false,
            checkout: true,
            remote_name: "origin".into(),
            branch: None,
            credentials: None,
            config: TransferConfig::default(),
        }
    }
}

#[derive(Clone, Default)]
pub struct FetchOptions {
    pub credentials: Option<Arc<dyn CredentialProvider>>,
    pub tags: TagMode,
    pub config: TransferConfig,
}

#[derive(Clone, Default)]
pub struct PushOptions {
    pub credentials: Option<Arc<dyn CredentialProvider>>,
    pub config: TransferConfig,
}

macro_rules! debug_without_credentials {
    ($ty:ident { $($field:ident),* }) => {
        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    $(.field(stringify!($field), &self.$field))*
                    .field("credentials", &self.credentials.is_some())
                    .finish()
            }
        }
    };
}

debug_without_credentials!(CloneOptions { bare, checkout, remote_name, branch, config });
debug_without_credentials!(FetchOptions { tags, config });
debug_without_credentials!(PushOptions { config });
