use anyhow::Result;
use clap::Args;
use git_transfer::{FetchOptions, RefUpdate, TagMode};

use super::{credentials, open_repo, TransferArgs};
use crate::progress::TerminalProgress;
use crate::Cli;

#[derive(Args)]
pub struct FetchArgs {
    /// Fetch every tag the remote has
    #[arg(short, long, conflicts_with = "no_tags")]
    tags: bool,

    /// Don't fetch tags
    #[arg(long)]
    no_tags: bool,

    #[command(flatten)]
    transfer: TransferArgs,

    /// Remote name
    #[arg(default_value = "origin")]
    remote: String,
}

pub fn run(args: &FetchArgs, cli: &Cli) -> Result<i32> {
    let repo = open_repo()?;
    let tags = if args.tags {
        TagMode::All
    } else if args.no_tags {
        TagMode::None
    } else {
        TagMode::Follow
    };
    let options = FetchOptions {
        credentials: Some(credentials(Some(repo.config()))),
        tags,
        config: args.transfer.config(),
    };

    let mut progress = TerminalProgress::new(cli.quiet);
    let result = git_transfer::fetch(&repo, &args.remote, &options, &mut progress);
    progress.finish();
    let outcome = result?;

    if !cli.quiet {
        if let Ok(remote) = repo.remote(&args.remote) {
            if !outcome.updated.is_empty() || !outcome.rejected.is_empty() {
                eprintln!("From {}", remote.url);
            }
        }
        for update in &outcome.updated {
            eprintln!("{}", summary_line(update, false));
        }
        for update in &outcome.rejected {
            eprintln!("{}", summary_line(update, true));
        }
    }
    Ok(if outcome.rejected.is_empty() { 0 } else { 1 })
}

fn summary_line(update: &RefUpdate, rejected: bool) -> String {
    let short = |oid: &git_hash::ObjectId| oid.to_hex()[..7].to_string();
    let range = match update.old {
        Some(old) => format!("{}..{}", short(&old), short(&update.new)),
        None => "[new]".to_string(),
    };
    if rejected {
        format!(" ! {range:<17} {} (non-fast-forward)", update.name)
    } else {
        format!("   {range:<17} {}", update.name)
    }
}
