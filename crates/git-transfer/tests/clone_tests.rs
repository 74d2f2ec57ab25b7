mod common;

use std::fs;

use common::*;
use git_transfer::{clone, CloneOptions, Error, NoCallbacks};

fn head_target(repo: &git_repository::Repository) -> Option<String> {
    repo.refs().head_target().unwrap().map(|name| name.as_str().to_string())
}

#[test]
fn every_transport_produces_the_same_clone() {
    let ws = Workspace::new();
    let remote = sample_remote(&ws.path("srv/remote.git"));
    let git_url = format!("{}/remote.git", git_daemon(&ws.path("srv"), ServerOptions::default()));
    let http_url = format!("{}/remote.git", http_server(&ws.path("srv"), ServerOptions::default()));
    let local_url = ws.path("srv/remote.git").display().to_string();

    let mut trees = Vec::new();
    for (label, url) in [("local", local_url), ("git", git_url), ("http", http_url)] {
        let mut recorder = Recorder::default();
        let repo = clone(&url, ws.path(label), &CloneOptions::default(), &mut recorder).unwrap();

        assert_eq!(head_target(&repo).as_deref(), Some("refs/heads/main"), "{label}");
        assert_eq!(repo.head_id().unwrap(), resolve(&remote, "refs/heads/main"), "{label}");
        assert_eq!(
            ref_names(&repo, "refs/remotes/"),
            ["refs/remotes/origin/feature", "refs/remotes/origin/main"],
            "{label}"
        );
        assert_eq!(ref_names(&repo, "refs/tags/"), ["refs/tags/light", "refs/tags/v1"], "{label}");
        assert_eq!(resolve(&repo, "refs/tags/v1"), resolve(&remote, "refs/tags/v1"), "{label}");
        assert_eq!(
            repo.upstream("main"),
            Some(("origin".to_string(), "refs/heads/main".to_string())),
            "{label}"
        );

        assert!(!recorder.transfers.is_empty(), "{label}");
        assert!(recorder.transfers.last().unwrap().is_complete(), "{label}");
        assert_eq!(recorder.checkouts.len(), 3, "{label}");
        assert!(recorder.checkouts.iter().all(|c| c.total == 3), "{label}");
        if label != "local" {
            assert!(
                recorder.messages.iter().any(|m| m.contains("Counting objects")),
                "{label}: {:?}",
                recorder.messages
            );
        }

        trees.push(read_work_tree(&ws.path(label)));
    }

    assert_eq!(trees[0]["README.md"], b"hello\nworld\n");
    assert_eq!(trees[0]["src/lib.rs"], b"pub fn answer() -> u32 { 42 }\n");
    assert_eq!(trees[0].len(), 3);
    assert_eq!(trees[0], trees[1]);
    assert_eq!(trees[0], trees[2]);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(ws.path("git/scripts/run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}

#[test]
fn bare_clone_writes_branches_directly() {
    let ws = Workspace::new();
    let remote = sample_remote(&ws.path("remote.git"));
    let options = CloneOptions {
        bare: true,
        ..CloneOptions::default()
    };
    let url = ws.path("remote.git").display().to_string();
    let repo = clone(&url, ws.path("mirror.git"), &options, &mut NoCallbacks).unwrap();

    assert!(repo.is_bare());
    assert!(repo.work_tree().is_none());
    assert_eq!(ref_names(&repo, "refs/heads/"), ["refs/heads/feature", "refs/heads/main"]);
    assert!(ref_names(&repo, "refs/remotes/").is_empty());
    assert_eq!(head_target(&repo).as_deref(), Some("refs/heads/main"));
    assert_eq!(resolve(&repo, "refs/heads/feature"), resolve(&remote, "refs/heads/feature"));
    assert!(ws.path("mirror.git/HEAD").is_file());
}

#[test]
fn no_checkout_sets_head_but_writes_no_files() {
    let ws = Workspace::new();
    let remote = sample_remote(&ws.path("remote.git"));
    let options = CloneOptions {
        checkout: false,
        ..CloneOptions::default()
    };
    let mut recorder = Recorder::default();
    let url = ws.path("remote.git").display().to_string();
    let repo = clone(&url, ws.path("work"), &options, &mut recorder).unwrap();

    assert_eq!(repo.head_id().unwrap(), resolve(&remote, "refs/heads/main"));
    assert!(read_work_tree(&ws.path("work")).is_empty());
    assert!(recorder.checkouts.is_empty());
}

#[test]
fn requested_branch_becomes_head() {
    let ws = Workspace::new();
    sample_remote(&ws.path("srv/remote.git"));
    let url = format!("{}/remote.git", git_daemon(&ws.path("srv"), ServerOptions::default()));
    let options = CloneOptions {
        branch: Some("feature".into()),
        ..CloneOptions::default()
    };
    let repo = clone(&url, ws.path("work"), &options, &mut NoCallbacks).unwrap();

    assert_eq!(head_target(&repo).as_deref(), Some("refs/heads/feature"));
    assert_eq!(ref_names(&repo, "refs/heads/"), ["refs/heads/feature"]);
    assert_eq!(read_work_tree(&ws.path("work"))["README.md"], b"feature\n");
}

#[test]
fn missing_branch_fails_and_removes_the_destination() {
    let ws = Workspace::new();
    sample_remote(&ws.path("remote.git"));
    let options = CloneOptions {
        branch: Some("nope".into()),
        ..CloneOptions::default()
    };
    let url = ws.path("remote.git").display().to_string();
    let err = clone(&url, ws.path("work"), &options, &mut NoCallbacks).unwrap_err();

    assert!(matches!(err, Error::RemoteRefNotFound(ref name) if name == "nope"), "{err}");
    assert!(!ws.path("work").exists());
}

#[test]
fn all_branches_and_tags_arrive() {
    let ws = Workspace::new();
    let remote = init_bare(&ws.path("srv/many.git"));
    for i in 0..5 {
        let content = format!("topic {i}\n");
        let tip = commit(&remote, &format!("topic-{i}"), &[("file.txt", content.as_str())], "topic");
        if i % 2 == 0 {
            annotated_tag(&remote, &format!("release-{i}"), tip);
        } else {
            lightweight_tag(&remote, &format!("mark-{i}"), tip);
        }
    }
    commit(&remote, "main", &[("file.txt", "main\n")], "main");
    let url = format!("{}/many.git", http_server(&ws.path("srv"), ServerOptions::default()));

    let repo = clone(&url, ws.path("work"), &CloneOptions::default(), &mut NoCallbacks).unwrap();

    assert_eq!(ref_names(&repo, "refs/remotes/origin/").len(), 6);
    assert_eq!(ref_names(&repo, "refs/tags/").len(), 5);
    for (name, oid) in remote.refs().list("refs/").unwrap() {
        let local = name.as_str().replacen("refs/heads/", "refs/remotes/origin/", 1);
        assert_eq!(resolve(&repo, &local), Some(oid), "{name}");
    }
}

#[test]
fn empty_remote_clones_to_an_unborn_branch() {
    let ws = Workspace::new();
    init_bare(&ws.path("srv/empty.git"));

    for (i, url) in [
        ws.path("srv/empty.git").display().to_string(),
        format!("{}/empty.git", git_daemon(&ws.path("srv"), ServerOptions::default())),
        format!("{}/empty.git", http_server(&ws.path("srv"), ServerOptions::default())),
    ]
    .into_iter()
    .enumerate()
    {
        let dest = ws.path(&format!("work-{i}"));
        let repo = clone(&url, &dest, &CloneOptions::default(), &mut NoCallbacks).unwrap();
        assert_eq!(repo.head_id().unwrap(), None, "{url}");
        assert_eq!(head_target(&repo).as_deref(), Some("refs/heads/main"), "{url}");
        assert!(ref_names(&repo, "refs/").is_empty(), "{url}");
    }
}

#[test]
fn non_empty_destination_is_left_untouched() {
    let ws = Workspace::new();
    sample_remote(&ws.path("remote.git"));
    let dest = ws.path("work");
    fs::create_dir(&dest).unwrap();
    fs::write(dest.join("keep.txt"), "mine").unwrap();

    let url = ws.path("remote.git").display().to_string();
    let err = clone(&url, &dest, &CloneOptions::default(), &mut NoCallbacks).unwrap_err();

    assert!(matches!(err, Error::DestinationNotEmpty(_)), "{err}");
    assert_eq!(fs::read_to_string(dest.join("keep.txt")).unwrap(), "mine");
}

#[test]
fn cancelling_from_progress_leaves_nothing_behind() {
    let ws = Workspace::new();
    sample_remote(&ws.path("srv/remote.git"));
    let url = format!("{}/remote.git", git_daemon(&ws.path("srv"), ServerOptions::default()));
    let mut recorder = Recorder {
        cancel: true,
        ..Recorder::default()
    };

    let err = clone(&url, ws.path("work"), &CloneOptions::default(), &mut recorder).unwrap_err();

    assert!(matches!(err, Error::Cancelled), "{err}");
    assert!(!recorder.transfers.is_empty());
    assert!(recorder.checkouts.is_empty());
    assert!(!ws.path("work").exists());
}

#[test]
fn corrupt_pack_is_reported_and_cleaned_up() {
    let ws = Workspace::new();
    sample_remote(&ws.path("srv/remote.git"));
    let options = ServerOptions {
        corrupt_pack: true,
        ..ServerOptions::default()
    };
    let url = format!("{}/remote.git", git_daemon(&ws.path("srv"), options));
    let dest = ws.path("work");
    fs::create_dir(&dest).unwrap();

    let err = clone(&url, &dest, &CloneOptions::default(), &mut NoCallbacks).unwrap_err();

    assert!(matches!(err, Error::CorruptPack(_)), "{err}");
    assert!(dest.is_dir());
    assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
}

#[test]
fn clone_without_side_band() {
    let ws = Workspace::new();
    let remote = sample_remote(&ws.path("srv/remote.git"));
    let options = ServerOptions {
        sideband: false,
        ..ServerOptions::default()
    };
    let url = format!("{}/remote.git", git_daemon(&ws.path("srv"), options));
    let mut recorder = Recorder::default();

    let repo = clone(&url, ws.path("work"), &CloneOptions::default(), &mut recorder).unwrap();

    assert_eq!(repo.head_id().unwrap(), resolve(&remote, "refs/heads/main"));
    assert!(recorder.messages.is_empty());
}

#[test]
fn unknown_repository_fails_without_creating_anything() {
    let ws = Workspace::new();
    fs::create_dir(ws.path("srv")).unwrap();
    let url = format!("{}/absent.git", git_daemon(&ws.path("srv"), ServerOptions::default()));

    assert!(clone(&url, ws.path("work"), &CloneOptions::default(), &mut NoCallbacks).is_err());
    assert!(!ws.path("work").exists());

    let missing = ws.path("no-such-dir").display().to_string();
    assert!(clone(&missing, ws.path("work"), &CloneOptions::default(), &mut NoCallbacks).is_err());
    assert!(!ws.path("work").exists());
}
