//! Pushing local refs to a remote.

use std::cell::RefCell;
use std::collections::HashSet;

use git_hash::ObjectId;
use git_protocol::capability::select_push;
use git_protocol::pktline::PktLineReader;
use git_protocol::push::{encode_commands, Command, ReportStatus};
use git_protocol::sideband::SidebandReader;
use git_protocol::{Advertisement, RefSpec, SidebandMode};
use git_ref::RefName;
use git_repository::{RepoError, Repository};
use git_transport::Service;
use tracing::{debug, info, warn};

use crate::callbacks::{TransferCallbacks, TransferProgress};
use crate::connection::{self, Endpoint};
use crate::options::PushOptions;
use crate::{graph, local, Error};

/// Outcome of one pushed ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushUpdate {
    /// Remote ref name.
    pub name: String,
    /// Null when the ref did not exist on the remote.
    pub old: ObjectId,
    /// Null for a deletion.
    pub new: ObjectId,
    pub status: PushStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushStatus {
    Accepted,
    Rejected(String),
}

impl PushStatus {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PushStatus::Accepted)
    }
}

/// Push `refspecs` to `remote`, a configured remote name or a URL.
///
/// Updates that are not fast-forwards are refused before anything is
/// sent unless the refspec starts with `+`. Every rejected ref is
/// reported to [`TransferCallbacks::on_push_status_error`]; if any was
/// rejected the result is [`Error::PartialFailure`] listing every ref,
/// or [`Error::NonFastForward`] when all of them were refused locally.
pub fn push<S: AsRef<str>>(
    repo: &Repository,
    remote: &str,
    refspecs: &[S],
    options: &PushOptions,
    callbacks: &mut dyn TransferCallbacks,
) -> Result<Vec<PushUpdate>, Error> {
    let (remote_name, url) = match repo.remote(remote) {
        Ok(configured) => (Some(configured.name), configured.url),
        Err(RepoError::NoSuchRemote(_)) => (None, remote.to_string()),
        Err(e) => return Err(e.into()),
    };
    let mut conn = connection::open(&url, Service::ReceivePack, &options.config, options.credentials.clone())?;
    let algo = conn.object_format(Some(repo.algorithm()))?;

    let mut updates = plan_updates(repo, &conn.advertisement, refspecs)?;
    let commands: Vec<Command> = updates
        .iter()
        .filter(|update| update.status.is_accepted() && update.old != update.new)
        .map(|update| Command {
            name: update.name.clone(),
            old: update.old,
            new: update.new,
        })
        .collect();

    let refused_locally = updates.iter().filter(|u| !u.status.is_accepted()).count();
    if refused_locally > 0 && refused_locally == updates.len() {
        conn.finish()?;
        for update in &updates {
            warn!(name = %update.name, status = ?update.status, "push refused locally");
            callbacks.on_push_status_error(update);
        }
        return Err(Error::NonFastForward(updates.into_iter().map(|u| u.name).collect()));
    }

    if commands.is_empty() {
        debug!(remote = %conn.url, "everything up to date");
        conn.finish()?;
    } else {
        let pack = if commands.iter().all(Command::is_delete) {
            None
        } else {
            let tips: Vec<ObjectId> = commands.iter().filter(|c| !c.is_delete()).map(|c| c.new).collect();
            let known: Vec<ObjectId> = conn
                .advertisement
                .refs
                .iter()
                .flat_map(|r| [Some(r.oid), r.peeled])
                .flatten()
                .filter(|oid| repo.odb().has(oid))
                .collect();
            let objects = graph::objects_to_pack(repo.odb(), &tips, &known)?;
            debug!(objects = objects.len(), "packing for push");
            Some(graph::write_pack(repo.odb(), &objects)?)
        };

        let report = {
            let callbacks = RefCell::new(&mut *callbacks);
            let progress = |p: &TransferProgress| callbacks.borrow_mut().on_transfer(p);
            match &mut conn.endpoint {
                Endpoint::Local(remote) => {
                    local::receive(remote, &commands, pack, options.config.progress_interval, progress)?
                }
                Endpoint::Wire(transport) => {
                    let deleting = commands.iter().any(Command::is_delete);
                    let caps = select_push(&conn.advertisement.capabilities, &options.config.user_agent, algo, deleting)?;
                    let mut request = encode_commands(&commands, &caps.requested)?;
                    if let Some(pack) = pack {
                        request.extend_from_slice(&pack);
                    }
                    let response = transport.exchange(&request)?;
                    match caps.sideband {
                        SidebandMode::None => ReportStatus::read(&mut PktLineReader::new(response))?,
                        SidebandMode::Band | SidebandMode::Band64k => {
                            let mut sink = |message: &str| callbacks.borrow_mut().on_remote_message(message);
                            let demux = SidebandReader::new(PktLineReader::new(response)).with_message_sink(&mut sink);
                            ReportStatus::read(&mut PktLineReader::new(demux))?
                        }
                    }
                }
            }
        };
        apply_report(&mut updates, &report);
    }

    if let Some(name) = &remote_name {
        update_tracking_refs(repo, name, &updates)?;
    }

    let mut rejected = 0;
    for update in &updates {
        if !update.status.is_accepted() {
            rejected += 1;
            warn!(name = %update.name, status = ?update.status, "ref not updated");
            callbacks.on_push_status_error(update);
        }
    }
    info!(remote = %conn.url, refs = updates.len(), rejected, "push complete");
    if rejected > 0 {
        return Err(Error::PartialFailure(updates));
    }
    Ok(updates)
}

/// Resolve refspecs against local refs and the remote's advertisement.
fn plan_updates<S: AsRef<str>>(
    repo: &Repository,
    advertisement: &Advertisement,
    refspecs: &[S],
) -> Result<Vec<PushUpdate>, Error> {
    let null = repo.algorithm().null_oid();
    let remote_oid = |name: &str| advertisement.find(name).map_or(null, |r| r.oid);
    let mut seen = HashSet::new();
    let mut updates = Vec::new();

    for spec in refspecs {
        let spec = spec.as_ref();
        let parsed = RefSpec::parse(spec).map_err(|_| Error::InvalidRefspec(spec.to_string()))?;

        let mut targets: Vec<(String, ObjectId)> = Vec::new();
        match parsed.src.as_deref() {
            None => {
                let dst = parsed.dst.as_deref().unwrap_or_default();
                targets.push((qualify(dst, "refs/heads/"), null));
            }
            Some(_) if parsed.is_glob() => {
                for (local, oid) in repo.refs().list("refs/")? {
                    if let Some(dst) = parsed.map(local.as_str()) {
                        targets.push((dst, oid));
                    }
                }
            }
            Some(src) => {
                let (local, oid) = resolve_local(repo, src)?;
                let dst = match parsed.dst.as_deref() {
                    Some(dst) if local.starts_with("refs/tags/") => qualify(dst, "refs/tags/"),
                    Some(dst) => qualify(dst, "refs/heads/"),
                    None => local,
                };
                targets.push((dst, oid));
            }
        }

        for (name, new) in targets {
            if !seen.insert(name.clone()) {
                continue;
            }
            let old = remote_oid(&name);
            let status = check_update(repo, &name, old, new, parsed.force)?;
            updates.push(PushUpdate {
                name,
                old,
                new,
                status,
            });
        }
    }
    Ok(updates)
}

fn qualify(name: &str, default_prefix: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("{default_prefix}{name}")
    }
}

/// Full name and id of the local ref `src` names: itself when fully
/// qualified (or `HEAD`), else the branch, else the tag.
fn resolve_local(repo: &Repository, src: &str) -> Result<(String, ObjectId), Error> {
    let refs = repo.refs();
    if src == "HEAD" {
        let oid = repo
            .head_id()?
            .ok_or_else(|| Error::InvalidRefspec("HEAD does not point at a commit".into()))?;
        let name = refs.head_target()?.map_or_else(|| "HEAD".to_string(), |t| t.as_str().to_string());
        return Ok((name, oid));
    }
    let candidates = if src.starts_with("refs/") {
        vec![src.to_string()]
    } else {
        vec![format!("refs/heads/{src}"), format!("refs/tags/{src}")]
    };
    for candidate in candidates {
        let name = RefName::new(candidate.as_str())?;
        if let Some(oid) = refs.resolve(&name)? {
            return Ok((candidate, oid));
        }
    }
    Err(Error::InvalidRefspec(format!("src refspec {src} does not match any local ref")))
}

/// The local verdict on one update, before the remote sees it.
fn check_update(
    repo: &Repository,
    name: &str,
    old: ObjectId,
    new: ObjectId,
    force: bool,
) -> Result<PushStatus, Error> {
    if old == new {
        return Ok(if new.is_null() {
            PushStatus::Rejected("remote ref does not exist".into())
        } else {
            PushStatus::Accepted
        });
    }
    if force || old.is_null() || new.is_null() {
        return Ok(PushStatus::Accepted);
    }
    if name.starts_with("refs/tags/") {
        return Ok(PushStatus::Rejected("already exists".into()));
    }
    if !graph::is_ancestor(repo.odb(), &old, &new)? {
        return Ok(PushStatus::Rejected("non-fast-forward".into()));
    }
    Ok(PushStatus::Accepted)
}

fn apply_report(updates: &mut [PushUpdate], report: &ReportStatus) {
    for update in updates.iter_mut() {
        if !update.status.is_accepted() || update.old == update.new {
            continue;
        }
        update.status = match (&report.unpack, report.find(&update.name)) {
            (Err(reason), _) => PushStatus::Rejected(format!("unpack failed: {reason}")),
            (Ok(()), Some(status)) => match &status.result {
                Ok(()) => PushStatus::Accepted,
                Err(reason) => PushStatus::Rejected(reason.clone()),
            },
            (Ok(()), None) => PushStatus::Rejected("remote did not report a status".into()),
        };
    }
}

/// Move `refs/remotes/<remote>/*` to match what the remote accepted.
fn update_tracking_refs(
    repo: &Repository,
    remote: &str,
    updates: &[PushUpdate],
) -> Result<(), Error> {
    let specs: Vec<RefSpec> = repo
        .remote(remote)?
        .fetch
        .iter()
        .filter_map(|s| RefSpec::parse(s).ok())
        .collect();
    for update in updates {
        if !update.status.is_accepted() {
            continue;
        }
        let Some(tracking) = specs.iter().find_map(|s| s.map(&update.name)) else {
            continue;
        };
        let name = RefName::new(tracking)?;
        if update.new.is_null() {
            repo.refs().delete(&name)?;
        } else {
            repo.refs().write(&name, &update.new)?;
        }
        debug!(%name, "updated remote-tracking ref");
    }
    Ok(())
}
