use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use git_transfer::CloneOptions;

use super::{credentials, TransferArgs};
use crate::progress::TerminalProgress;
use crate::Cli;

#[derive(Args)]
pub struct CloneArgs {
    /// Check out <name> instead of the remote's HEAD
    #[arg(short, long, value_name = "name")]
    branch: Option<String>,

    /// Make a bare repository
    #[arg(long)]
    bare: bool,

    /// Don't check out HEAD after cloning
    #[arg(short = 'n', long)]
    no_checkout: bool,

    /// Name the remote <name> instead of origin
    #[arg(short, long, value_name = "name", default_value = "origin")]
    origin: String,

    #[command(flatten)]
    transfer: TransferArgs,

    /// Repository URL or path
    repository: String,

    /// Destination directory
    directory: Option<PathBuf>,
}

pub fn run(args: &CloneArgs, cli: &Cli) -> Result<i32> {
    let dest = match &args.directory {
        Some(dir) => dir.clone(),
        None => infer_directory(&args.repository, args.bare)?,
    };
    if !cli.quiet {
        if args.bare {
            eprintln!("Cloning into bare repository '{}'...", dest.display());
        } else {
            eprintln!("Cloning into '{}'...", dest.display());
        }
    }

    let options = CloneOptions {
        bare: args.bare,
        checkout: !args.no_checkout,
        remote_name: args.origin.clone(),
        branch: args.branch.clone(),
        credentials: Some(credentials(None)),
        config: args.transfer.config(),
    };
    let mut progress = TerminalProgress::new(cli.quiet);
    let result = git_transfer::clone(&args.repository, &dest, &options, &mut progress);
    progress.finish();

    let repo = result?;
    if repo.head_id()?.is_none() && !cli.quiet {
        eprintln!("warning: You appear to have cloned an empty repository.");
    }
    Ok(0)
}

/// `host:path/repo.git` and `/srv/repo.git` both clone into `repo`;
/// bare clones keep the `.git` suffix.
fn infer_directory(url: &str, bare: bool) -> Result<PathBuf> {
    let last = url
        .trim_end_matches('/')
        .rsplit(|c| c == '/' || c == ':')
        .next()
        .unwrap_or(url);
    let stem = last.strip_suffix(".git").unwrap_or(last);
    let stem = if stem.is_empty() { last } else { stem };
    if stem.is_empty() || stem == ".git" {
        bail!("cannot infer a directory name from '{url}'");
    }
    Ok(PathBuf::from(if bare { format!("{stem}.git") } else { stem.to_string() }))
}
