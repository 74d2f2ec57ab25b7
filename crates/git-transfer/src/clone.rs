//! Cloning into a new repository.

use std::fs;
use std::io;
use std::path::Path;

use git_hash::ObjectId;
use git_object::{Commit, ObjectType};
use git_protocol::{Advertisement, ProtocolError};
use git_ref::RefName;
use git_repository::{InitOptions, Repository};
use git_transport::{GitUrl, Service};
use tracing::{debug, info, warn};

use crate::callbacks::TransferCallbacks;
use crate::checkout::checkout_tree;
use crate::connection;
use crate::fetch::{fetch_pack, tag_refs};
use crate::options::CloneOptions;
use crate::Error;

/// What HEAD becomes in the new repository.
#[derive(Debug, Clone, PartialEq, Eq)]
enum HeadPlan {
    /// A local branch tracking the remote branch of the same name.
    Branch { name: String, oid: ObjectId },
    Detached(ObjectId),
    /// Nothing to check out; HEAD names a branch that does not exist yet.
    Unborn(Option<String>),
}

/// Clone `url` into `path`, which must not exist or be an empty
/// directory.
///
/// On failure nothing is left behind: a directory created by the clone
/// is removed, and a pre-existing one is emptied again.
pub fn clone(
    url: &str,
    path: impl AsRef<Path>,
    options: &CloneOptions,
    callbacks: &mut dyn TransferCallbacks,
) -> Result<Repository, Error> {
    let path = path.as_ref();
    let created = prepare_destination(path)?;
    match clone_into(url, path, options, callbacks) {
        Ok(repo) => Ok(repo),
        Err(err) => {
            cleanup(path, created);
            Err(err)
        }
    }
}

fn prepare_destination(path: &Path) -> Result<bool, Error> {
    match fs::read_dir(path) {
        Ok(mut entries) => {
            if entries.next().is_some() {
                return Err(Error::DestinationNotEmpty(path.to_path_buf()));
            }
            Ok(false)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path)?;
            Ok(true)
        }
        Err(e) if path.exists() => {
            debug!(error = %e, "destination is not a readable directory");
            Err(Error::DestinationNotEmpty(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn cleanup(path: &Path, created: bool) {
    let result = if created {
        fs::remove_dir_all(path)
    } else {
        fs::read_dir(path).and_then(|entries| {
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    fs::remove_dir_all(entry.path())?;
                } else {
                    fs::remove_file(entry.path())?;
                }
            }
            Ok(())
        })
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "could not clean up after failed clone");
    }
}

fn clone_into(
    url: &str,
    path: &Path,
    options: &CloneOptions,
    callbacks: &mut dyn TransferCallbacks,
) -> Result<Repository, Error> {
    let mut conn = connection::open(url, Service::UploadPack, &options.config, options.credentials.clone())?;
    let algo = conn.object_format(None)?;
    let plan = plan_head(&conn.advertisement, options.branch.as_deref())?;
    debug!(?plan, "chose HEAD for clone");

    let mut repo = Repository::init(
        path,
        &InitOptions {
            bare: options.bare,
            hash_algorithm: algo,
            ..InitOptions::default()
        },
    )?;
    let remote = options.remote_name.as_str();
    repo.add_remote(remote, &remote_url(url)?)?;

    let mut wants: Vec<ObjectId> = conn
        .advertisement
        .named_refs()
        .filter(|r| r.name.starts_with("refs/heads/"))
        .map(|r| r.oid)
        .collect();
    wants.extend(tag_refs(&conn.advertisement).map(|r| r.oid));
    if let HeadPlan::Detached(oid) = &plan {
        wants.push(*oid);
    }
    let objects = fetch_pack(&mut conn, &repo, wants, true, &options.config, callbacks)?;

    let refs = repo.refs();
    for r in conn.advertisement.named_refs() {
        let Some(branch) = r.name.strip_prefix("refs/heads/") else { continue };
        let name = if options.bare {
            RefName::branch(branch)?
        } else {
            RefName::remote_tracking(remote, branch)?
        };
        refs.write(&name, &r.oid)?;
    }
    for r in tag_refs(&conn.advertisement) {
        refs.write(&RefName::new(r.name.as_str())?, &r.oid)?;
    }

    match &plan {
        HeadPlan::Branch { name, oid } => {
            let local = RefName::branch(name)?;
            if !options.bare {
                refs.write(&local, oid)?;
                refs.write_symbolic(
                    &RefName::remote_tracking(remote, "HEAD")?,
                    &RefName::remote_tracking(remote, name)?,
                )?;
            }
            refs.write_symbolic(&RefName::head(), &local)?;
        }
        HeadPlan::Detached(oid) => refs.write(&RefName::head(), oid)?,
        HeadPlan::Unborn(Some(name)) => refs.write_symbolic(&RefName::head(), &RefName::branch(name)?)?,
        HeadPlan::Unborn(None) => {}
    }
    if let HeadPlan::Branch { name, .. } = &plan {
        if !options.bare {
            repo.set_upstream(name, remote, &RefName::branch(name)?)?;
        }
    }

    if options.checkout {
        if let (Some(work_tree), Some(head)) = (repo.work_tree(), repo.head_id()?) {
            let raw = repo.odb().read_kind(&head, ObjectType::Commit)?;
            let commit = Commit::parse(&raw.data).map_err(git_odb::OdbError::from)?;
            checkout_tree(repo.odb(), &commit.tree, work_tree, callbacks)?;
        }
    }

    info!(
        remote = %conn.url,
        path = %path.display(),
        objects,
        bare = options.bare,
        "clone complete"
    );
    Ok(repo)
}

/// The URL to record for the remote: local paths made absolute so the
/// clone can fetch from anywhere, passwords dropped.
fn remote_url(url: &str) -> Result<String, Error> {
    let parsed = GitUrl::parse(url)?;
    Ok(match parsed.local_path() {
        Some(path) => fs::canonicalize(&path)?.display().to_string(),
        None => parsed.to_string(),
    })
}

fn plan_head(advertisement: &Advertisement, branch: Option<&str>) -> Result<HeadPlan, Error> {
    let as_branch = |full: &str, oid: ObjectId| {
        full.strip_prefix("refs/heads/").map(|name| HeadPlan::Branch {
            name: name.to_string(),
            oid,
        })
    };

    if let Some(requested) = branch {
        let short = requested.strip_prefix("refs/heads/").unwrap_or(requested);
        if let Some(found) = advertisement.find(&format!("refs/heads/{short}")) {
            return Ok(HeadPlan::Branch {
                name: short.to_string(),
                oid: found.oid,
            });
        }
        if let Some(tag) = advertisement.find(&format!("refs/tags/{short}")) {
            return Ok(HeadPlan::Detached(tag.peeled.unwrap_or(tag.oid)));
        }
        return Err(Error::RemoteRefNotFound(requested.to_string()));
    }

    if advertisement.is_empty() {
        let unborn = advertisement
            .head_symref()
            .and_then(|target| target.strip_prefix("refs/heads/"))
            .map(str::to_string);
        return Ok(HeadPlan::Unborn(unborn));
    }

    if let Some(target) = advertisement.head_symref() {
        let found = advertisement.find(target).ok_or_else(|| {
            ProtocolError::Protocol(format!("remote HEAD points to {target}, which was not advertised"))
        })?;
        return Ok(as_branch(target, found.oid).unwrap_or(HeadPlan::Detached(found.peeled.unwrap_or(found.oid))));
    }

    let Some(head) = advertisement.head() else {
        return Ok(HeadPlan::Unborn(None));
    };
    let mut candidates: Vec<&str> = advertisement
        .named_refs()
        .filter(|r| r.oid == head.oid && r.name.starts_with("refs/heads/"))
        .map(|r| r.name.as_str())
        .collect();
    candidates.sort_by_key(|name| match *name {
        "refs/heads/main" => 0,
        "refs/heads/master" => 1,
        _ => 2,
    });
    Ok(candidates
        .first()
        .and_then(|name| as_branch(name, head.oid))
        .unwrap_or(HeadPlan::Detached(head.oid)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use git_protocol::pktline::PktLineWriter;

    fn oid(n: u8) -> ObjectId {
        ObjectId::from_hex(&format!("{n:02x}").repeat(20)).unwrap()
    }

    fn advertisement(lines: &[String]) -> Advertisement {
        let mut w = PktLineWriter::new(Vec::new());
        for line in lines {
            w.write_text(line).unwrap();
        }
        w.write_flush().unwrap();
        Advertisement::from_bytes(&w.into_inner()).unwrap()
    }

    #[test]
    fn head_follows_the_symref() {
        let adv = advertisement(&[
            format!("{} HEAD\0symref=HEAD:refs/heads/dev", oid(2)),
            format!("{} refs/heads/dev", oid(2)),
            format!("{} refs/heads/main", oid(1)),
        ]);
        assert_eq!(
            plan_head(&adv, None).unwrap(),
            HeadPlan::Branch {
                name: "dev".into(),
                oid: oid(2)
            }
        );
    }

    #[test]
    fn symref_to_unadvertised_ref_is_a_protocol_error() {
        let adv = advertisement(&[
            format!("{} HEAD\0symref=HEAD:refs/heads/gone", oid(2)),
            format!("{} refs/heads/main", oid(2)),
        ]);
        assert!(matches!(plan_head(&adv, None), Err(Error::Protocol(_))));
    }

    #[test]
    fn without_symref_main_wins_then_master_then_detached() {
        let adv = advertisement(&[
            format!("{} HEAD\0multi_ack", oid(3)),
            format!("{} refs/heads/a-topic", oid(3)),
            format!("{} refs/heads/main", oid(3)),
            format!("{} refs/heads/master", oid(3)),
        ]);
        assert_eq!(
            plan_head(&adv, None).unwrap(),
            HeadPlan::Branch {
                name: "main".into(),
                oid: oid(3)
            }
        );

        let adv = advertisement(&[
            format!("{} HEAD\0multi_ack", oid(4)),
            format!("{} refs/heads/main", oid(3)),
        ]);
        assert_eq!(plan_head(&adv, None).unwrap(), HeadPlan::Detached(oid(4)));
    }

    #[test]
    fn requested_branch_must_exist() {
        let adv = advertisement(&[
            format!("{} HEAD\0symref=HEAD:refs/heads/main", oid(1)),
            format!("{} refs/heads/main", oid(1)),
            format!("{} refs/heads/topic", oid(5)),
            format!("{} refs/tags/v1", oid(6)),
            format!("{} refs/tags/v1^{{}}", oid(7)),
        ]);
        assert_eq!(
            plan_head(&adv, Some("topic")).unwrap(),
            HeadPlan::Branch {
                name: "topic".into(),
                oid: oid(5)
            }
        );
        assert_eq!(plan_head(&adv, Some("v1")).unwrap(), HeadPlan::Detached(oid(7)));
        assert!(matches!(
            plan_head(&adv, Some("nope")),
            Err(Error::RemoteRefNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn empty_remote_keeps_its_default_branch_name() {
        let adv = advertisement(&[format!(
            "{} capabilities^{{}}\0symref=HEAD:refs/heads/trunk",
            ObjectId::from_hex(&"0".repeat(40)).unwrap()
        )]);
        assert_eq!(plan_head(&adv, None).unwrap(), HeadPlan::Unborn(Some("trunk".into())));
    }

    #[test]
    fn destination_must_be_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!prepare_destination(dir.path()).unwrap());

        let fresh = dir.path().join("new");
        assert!(prepare_destination(&fresh).unwrap());
        assert!(fresh.is_dir());

        fs::write(fresh.join("file"), b"x").unwrap();
        assert!(matches!(prepare_destination(&fresh), Err(Error::DestinationNotEmpty(_))));

        cleanup(&fresh, false);
        assert!(fresh.is_dir());
        assert_eq!(fs::read_dir(&fresh).unwrap().count(), 0);
        cleanup(&fresh, true);
        assert!(!fresh.exists());
    }
}
