//! Fetching: negotiate, receive one pack, then move refs.

use std::cell::RefCell;
use std::collections::HashSet;
use std::io::{BufReader, Cursor, Read};

use git_hash::ObjectId;
use git_odb::ObjectDatabase;
use git_protocol::capability::select_fetch;
use git_protocol::pktline::PktLineReader;
use git_protocol::sideband::SidebandReader;
use git_protocol::{
    Advertisement, Negotiation, NegotiationConfig, ProtocolError, RefSpec, SidebandMode, Step,
};
use git_ref::RefName;
use git_repository::{Remote, Repository};
use git_transport::{Service, Transport};
use tracing::{debug, info, warn};

use crate::callbacks::{TransferCallbacks, TransferProgress};
use crate::connection::{self, Connection, Endpoint};
use crate::options::{FetchOptions, TagMode, TransferConfig};
use crate::{graph, local, Error};

/// A local ref a fetch moved, or refused to move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,
    /// `None` when the ref was created.
    pub old: Option<ObjectId>,
    pub new: ObjectId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    pub updated: Vec<RefUpdate>,
    /// Non-fast-forward updates the refspec did not force.
    pub rejected: Vec<RefUpdate>,
    /// Objects received in the pack.
    pub objects: usize,
}

/// Bring `repo` up to date with the configured remote `remote`.
///
/// Remote branches map through the remote's fetch refspecs; tags follow
/// `options.tags` and never overwrite an existing local tag.
pub fn fetch(
    repo: &Repository,
    remote: &str,
    options: &FetchOptions,
    callbacks: &mut dyn TransferCallbacks,
) -> Result<FetchOutcome, Error> {
    let remote = repo.remote(remote)?;
    let specs = fetch_refspecs(&remote)?;
    let mut conn = connection::open(&remote.url, Service::UploadPack, &options.config, options.credentials.clone())?;
    conn.object_format(Some(repo.algorithm()))?;

    let mut planned = Vec::new();
    for r in conn.advertisement.named_refs() {
        if let Some((dst, force)) = specs.iter().find_map(|s| s.map(&r.name).map(|dst| (dst, s.force))) {
            planned.push((dst, r.oid, force));
        }
    }
    let mut wants: Vec<ObjectId> = planned.iter().map(|(_, oid, _)| *oid).collect();
    if options.tags == TagMode::All {
        wants.extend(tag_refs(&conn.advertisement).map(|r| r.oid));
    }

    let objects = fetch_pack(
        &mut conn,
        repo,
        wants,
        options.tags != TagMode::None,
        &options.config,
        callbacks,
    )?;

    let mut outcome = FetchOutcome {
        objects,
        ..FetchOutcome::default()
    };
    for (dst, new, force) in planned {
        let name = RefName::new(dst)?;
        let old = repo.refs().find(&name)?.and_then(|r| r.target_oid());
        if old == Some(new) {
            continue;
        }
        let update = RefUpdate {
            name: name.as_str().to_string(),
            old,
            new,
        };
        let fast_forward = match old {
            None => true,
            Some(old) => graph::is_ancestor(repo.odb(), &old, &new)?,
        };
        if !fast_forward && !force {
            warn!(name = %update.name, "refusing non-fast-forward fetch update");
            outcome.rejected.push(update);
            continue;
        }
        repo.refs().compare_and_swap(&name, old, Some(new))?;
        outcome.updated.push(update);
    }
    if options.tags != TagMode::None {
        outcome.updated.extend(write_new_tags(repo, &conn.advertisement)?);
    }

    info!(
        remote = %conn.url,
        objects = outcome.objects,
        updated = outcome.updated.len(),
        rejected = outcome.rejected.len(),
        "fetch complete"
    );
    Ok(outcome)
}

fn fetch_refspecs(remote: &Remote) -> Result<Vec<RefSpec>, Error> {
    let specs = if remote.fetch.is_empty() {
        vec![Remote::default_fetch_refspec(&remote.name)]
    } else {
        remote.fetch.clone()
    };
    specs
        .iter()
        .map(|s| RefSpec::parse(s).map_err(|_| Error::InvalidRefspec(s.clone())))
        .collect()
}

pub(crate) fn tag_refs(advertisement: &Advertisement) -> impl Iterator<Item = &git_protocol::AdvertisedRef> {
    advertisement
        .named_refs()
        .filter(|r| r.name.starts_with("refs/tags/"))
}

/// Create local tags for advertised tags whose object is now present.
/// Existing tags are left alone even when the remote moved them.
pub(crate) fn write_new_tags(repo: &Repository, advertisement: &Advertisement) -> Result<Vec<RefUpdate>, Error> {
    let mut created = Vec::new();
    for r in tag_refs(advertisement) {
        let Ok(name) = RefName::new(r.name.as_str()) else {
            warn!(name = %r.name, "skipping advertised tag with an invalid name");
            continue;
        };
        if !repo.odb().has(&r.oid) || repo.refs().find(&name)?.is_some() {
            continue;
        }
        repo.refs().compare_and_swap(&name, None, Some(r.oid))?;
        created.push(RefUpdate {
            name: r.name.clone(),
            old: None,
            new: r.oid,
        });
    }
    Ok(created)
}

/// Receive the objects for `wants` that `repo` lacks. Returns how many
/// objects the pack carried; zero when nothing was missing.
pub(crate) fn fetch_pack(
    conn: &mut Connection,
    repo: &Repository,
    wants: Vec<ObjectId>,
    include_tags: bool,
    config: &TransferConfig,
    callbacks: &mut dyn TransferCallbacks,
) -> Result<usize, Error> {
    let odb = repo.odb();
    let mut seen = HashSet::new();
    let wants: Vec<ObjectId> = wants
        .into_iter()
        .filter(|oid| !oid.is_null() && seen.insert(*oid) && !odb.has(oid))
        .collect();
    if wants.is_empty() {
        debug!(remote = %conn.url, "already up to date");
        conn.finish()?;
        return Ok(0);
    }

    let mut tips: Vec<ObjectId> = repo.refs().list("refs/")?.into_iter().map(|(_, oid)| oid).collect();
    tips.extend(repo.head_id()?);
    let haves = graph::haves_by_date(odb, &tips, config.max_haves)?;

    let objects = match &mut conn.endpoint {
        Endpoint::Local(remote) => {
            let pack = local::upload(remote, &wants, &haves, include_tags)?;
            receive(odb, Cursor::new(pack), SidebandMode::None, config, callbacks)?
        }
        Endpoint::Wire(transport) => negotiate(
            transport.as_mut(),
            &conn.advertisement,
            odb,
            wants.clone(),
            haves,
            include_tags,
            config,
            callbacks,
        )?,
    };

    if let Some(missing) = wants.iter().find(|oid| !odb.has(oid)) {
        return Err(ProtocolError::Protocol(format!("{} did not send {missing}", conn.url)).into());
    }
    Ok(objects)
}

#[allow(clippy::too_many_arguments)]
fn negotiate(
    transport: &mut dyn Transport,
    advertisement: &Advertisement,
    odb: &ObjectDatabase,
    wants: Vec<ObjectId>,
    haves: Vec<ObjectId>,
    include_tags: bool,
    config: &TransferConfig,
    callbacks: &mut dyn TransferCallbacks,
) -> Result<usize, Error> {
    let mut caps = select_fetch(&advertisement.capabilities, &config.user_agent, odb.algorithm());
    if !include_tags {
        caps.requested.retain(|c| c != "include-tag");
    }
    let negotiation_config = NegotiationConfig {
        ack_mode: caps.ack_mode,
        stateless: transport.is_stateless(),
        initial_batch: config.initial_have_batch,
        max_haves: config.max_haves,
        ..NegotiationConfig::default()
    };
    let mut negotiation = Negotiation::new(negotiation_config, wants, haves, caps.requested);

    loop {
        let request = negotiation.request()?;
        let mut reader = PktLineReader::new(transport.exchange(&request)?);
        match negotiation.read_response(&mut reader)? {
            Step::Continue(next) => negotiation = next,
            Step::Finished(outcome) => {
                debug!(
                    rounds = outcome.rounds,
                    haves = outcome.haves_sent,
                    common = outcome.common.len(),
                    "negotiation finished"
                );
                return receive(odb, reader.into_inner(), caps.sideband, config, callbacks);
            }
        }
    }
}

/// Feed a pack stream into the store, demultiplexing side-band framing
/// when it was negotiated.
fn receive(
    odb: &ObjectDatabase,
    stream: impl Read,
    sideband: SidebandMode,
    config: &TransferConfig,
    callbacks: &mut dyn TransferCallbacks,
) -> Result<usize, Error> {
    let callbacks = RefCell::new(callbacks);
    let mut progress = |p: &TransferProgress| callbacks.borrow_mut().on_transfer(p);
    let received = match sideband {
        SidebandMode::None => odb.receive_pack(BufReader::new(stream), config.progress_interval, &mut progress)?,
        SidebandMode::Band | SidebandMode::Band64k => {
            let mut sink = |message: &str| callbacks.borrow_mut().on_remote_message(message);
            let demux = SidebandReader::new(PktLineReader::new(stream)).with_message_sink(&mut sink);
            odb.receive_pack(BufReader::new(demux), config.progress_interval, &mut progress)?
        }
    };
    debug!(
        objects = received.objects,
        bytes = received.progress.received_bytes,
        pack = ?received.path,
        "pack stored"
    );
    Ok(received.objects)
}
