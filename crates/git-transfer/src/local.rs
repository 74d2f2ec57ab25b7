//! Remotes that are repositories on this machine. Instead of a wire
//! exchange the remote's stores are read and written directly, but
//! objects still move as a pack so ingestion behaves exactly as it does
//! for network remotes.

use std::collections::HashSet;
use std::io::Cursor;
use std::ops::ControlFlow;
use std::time::Duration;

use git_hash::ObjectId;
use git_protocol::push::{Command, RefStatus, ReportStatus};
use git_protocol::{AdvertisedRef, Advertisement, Capabilities};
use git_ref::RefName;
use git_repository::Repository;
use tracing::debug;

use crate::callbacks::TransferProgress;
use crate::graph;
use crate::Error;

/// The refs `repo` would advertise to an upload-pack client: `HEAD`
/// first, then every ref under `refs/` with annotated tags peeled.
pub(crate) fn advertise(repo: &Repository) -> Result<Advertisement, Error> {
    let odb = repo.odb();
    let mut refs = Vec::new();
    if let Some(head) = repo.head_id()? {
        refs.push(AdvertisedRef {
            name: "HEAD".into(),
            oid: head,
            peeled: None,
        });
    }
    for (name, oid) in repo.refs().list("refs/")? {
        let peeled = if name.is_tag() {
            Some(graph::peel(odb, &oid)?).filter(|target| *target != oid)
        } else {
            None
        };
        refs.push(AdvertisedRef {
            name: name.as_str().to_string(),
            oid,
            peeled,
        });
    }

    let mut capabilities = format!("object-format={}", repo.algorithm().name());
    if let Some(target) = repo.refs().head_target()? {
        capabilities.push_str(&format!(" symref=HEAD:{target}"));
    }
    Ok(Advertisement {
        refs,
        capabilities: Capabilities::parse(&capabilities),
    })
}

/// Pack the objects a fetch asking for `wants` needs, given the commits
/// it offered as `haves`. With `include_tags`, annotated tags whose
/// target is part of the pack come along, as `include-tag` does.
pub(crate) fn upload(
    remote: &Repository,
    wants: &[ObjectId],
    haves: &[ObjectId],
    include_tags: bool,
) -> Result<Vec<u8>, Error> {
    let odb = remote.odb();
    let common: Vec<ObjectId> = haves.iter().filter(|oid| odb.has(oid)).copied().collect();
    let mut objects = graph::objects_to_pack(odb, wants, &common)?;

    if include_tags {
        let packed: HashSet<ObjectId> = objects.iter().copied().collect();
        let mut tags = Vec::new();
        for (_, oid) in remote.refs().list("refs/tags/")? {
            if packed.contains(&oid) {
                continue;
            }
            let target = graph::peel(odb, &oid)?;
            if target != oid && packed.contains(&target) {
                tags.push(oid);
            }
        }
        let mut excluded = common;
        excluded.extend(packed);
        objects.extend(graph::objects_to_pack(odb, &tags, &excluded)?);
    }

    debug!(wants = wants.len(), objects = objects.len(), "packing for local fetch");
    Ok(graph::write_pack(odb, &objects)?)
}

/// Apply a push to `remote`: ingest the pack, then move each ref if it
/// still has the value the client saw.
pub(crate) fn receive(
    remote: &Repository,
    commands: &[Command],
    pack: Option<Vec<u8>>,
    progress_interval: Duration,
    progress: impl FnMut(&TransferProgress) -> ControlFlow<()>,
) -> Result<ReportStatus, Error> {
    if let Some(pack) = pack {
        if let Err(e) = remote.odb().receive_pack(Cursor::new(pack), progress_interval, progress) {
            let err = Error::from(e);
            if matches!(err, Error::Cancelled) {
                return Err(err);
            }
            return Ok(ReportStatus {
                unpack: Err(err.to_string()),
                refs: commands
                    .iter()
                    .map(|cmd| RefStatus {
                        name: cmd.name.clone(),
                        result: Err("unpacker error".into()),
                    })
                    .collect(),
            });
        }
    }

    let mut refs = Vec::with_capacity(commands.len());
    for cmd in commands {
        refs.push(RefStatus {
            name: cmd.name.clone(),
            result: apply(remote, cmd),
        });
    }
    Ok(ReportStatus { unpack: Ok(()), refs })
}

fn apply(remote: &Repository, cmd: &Command) -> Result<(), String> {
    let name = RefName::new(cmd.name.as_str()).map_err(|e| e.to_string())?;
    if !cmd.is_delete() && !remote.odb().has(&cmd.new) {
        return Err("missing necessary objects".into());
    }
    let some = |oid: ObjectId| (!oid.is_null()).then_some(oid);
    remote
        .refs()
        .compare_and_swap(&name, some(cmd.old), some(cmd.new))
        .map_err(|e| e.to_string())
}
