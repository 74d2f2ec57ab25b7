pub mod clone;
pub mod fetch;
pub mod push;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use git_repository::{Config, Repository};
use git_transfer::TransferConfig;
use git_transport::{CredentialProvider, GitCredentialHelper};
use tracing::debug;

use crate::Cli;

#[derive(Subcommand)]
pub enum Commands {
    /// Clone a repository into a new directory
    Clone(clone::CloneArgs),
    /// Download objects and refs from a remote
    Fetch(fetch::FetchArgs),
    /// Update remote refs along with associated objects
    Push(push::PushArgs),
}

/// Transfer knobs shared by every command.
#[derive(Args, Debug, Clone)]
pub struct TransferArgs {
    /// Give up connecting after this many seconds
    #[arg(long, value_name = "secs")]
    connect_timeout: Option<u64>,

    /// Give up on a stalled transfer after this many seconds
    #[arg(long, value_name = "secs")]
    timeout: Option<u64>,

    /// Ignore http_proxy/https_proxy from the environment
    #[arg(long)]
    no_proxy: bool,
}

impl TransferArgs {
    pub fn config(&self) -> TransferConfig {
        let mut config = TransferConfig::default().use_env_proxy(!self.no_proxy);
        if let Some(secs) = self.connect_timeout {
            config = config.connect_timeout(Some(Duration::from_secs(secs)));
        }
        if let Some(secs) = self.timeout {
            config = config.io_timeout(Some(Duration::from_secs(secs)));
        }
        config
    }
}

pub fn open_repo() -> Result<Repository> {
    Repository::open(".").context("not a git repository")
}

/// Helpers named by `credential.helper`, falling back to `git credential`.
pub fn credentials(config: Option<&Config>) -> Arc<dyn CredentialProvider> {
    let helpers: Vec<String> = config
        .map(|c| c.get_all("credential", None, "helper").into_iter().map(str::to_string).collect())
        .unwrap_or_default();
    debug!(?helpers, "credential helpers");
    Arc::new(GitCredentialHelper::new(helpers))
}

pub fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Commands::Clone(args) => clone::run(args, &cli),
        Commands::Fetch(args) => fetch::run(args, &cli),
        Commands::Push(args) => push::run(args, &cli),
    }
}
