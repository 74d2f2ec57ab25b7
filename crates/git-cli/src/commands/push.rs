use anyhow::Result;
use clap::Args;
use git_transfer::{Error, PushOptions, PushUpdate};

use super::{credentials, open_repo, TransferArgs};
use crate::progress::TerminalProgress;
use crate::Cli;

#[derive(Args)]
pub struct PushArgs {
    /// Allow non-fast-forward updates for every refspec
    #[arg(short, long)]
    force: bool,

    /// Delete the named remote refs
    #[arg(short, long)]
    delete: bool,

    #[command(flatten)]
    transfer: TransferArgs,

    /// Remote name or URL
    #[arg(default_value = "origin")]
    remote: String,

    /// `[+]<src>[:<dst>]`; defaults to the current branch
    refspecs: Vec<String>,
}

pub fn run(args: &PushArgs, cli: &Cli) -> Result<i32> {
    let repo = open_repo()?;
    let mut refspecs = args.refspecs.clone();
    if refspecs.is_empty() {
        refspecs.push("HEAD".to_string());
    }
    let refspecs = expand_refspecs(&refspecs, args.force, args.delete);

    let options = PushOptions {
        credentials: Some(credentials(Some(repo.config()))),
        config: args.transfer.config(),
    };
    let mut progress = TerminalProgress::new(cli.quiet);
    let result = git_transfer::push(&repo, &args.remote, &refspecs, &options, &mut progress);
    progress.finish();

    match result {
        Ok(updates) => {
            if !cli.quiet {
                report(&updates);
            }
            Ok(0)
        }
        Err(Error::PartialFailure(updates)) => {
            if !cli.quiet {
                report(&updates);
            }
            eprintln!("error: failed to push some refs to '{}'", args.remote);
            Ok(1)
        }
        Err(Error::NonFastForward(names)) => {
            eprintln!("error: failed to push some refs to '{}'", args.remote);
            eprintln!("hint: updates were rejected for {}; fetch first or use --force", names.join(", "));
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

/// Apply `--force` and `--delete` to plain refspecs.
fn expand_refspecs(refspecs: &[String], force: bool, delete: bool) -> Vec<String> {
    refspecs
        .iter()
        .map(|spec| {
            if delete {
                format!(":{}", spec.trim_start_matches('+'))
            } else if force && !spec.starts_with('+') {
                format!("+{spec}")
            } else {
                spec.clone()
            }
        })
        .collect()
}

fn report(updates: &[PushUpdate]) {
    let mut up_to_date = true;
    for update in updates.iter().filter(|u| u.status.is_accepted() && u.old != u.new) {
        up_to_date = false;
        let line = if update.new.is_null() {
            format!(" - [deleted]         {}", update.name)
        } else if update.old.is_null() {
            format!(" * [new]             {}", update.name)
        } else {
            let old = update.old.to_hex();
            let new = update.new.to_hex();
            format!("   {}..{}  {}", &old[..7], &new[..7], update.name)
        };
        eprintln!("{line}");
    }
    if up_to_date && updates.iter().all(|u| u.status.is_accepted()) {
        eprintln!("Everything up-to-date");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_rewrite_refspecs() {
        let specs = vec!["main".to_string(), "+topic".to_string()];
        assert_eq!(expand_refspecs(&specs, true, false), ["+main", "+topic"]);
        assert_eq!(expand_refspecs(&specs, false, true), [":main", ":topic"]);
        assert_eq!(expand_refspecs(&specs, false, false), specs);
    }
}
