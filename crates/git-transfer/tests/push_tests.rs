mod common;

use common::*;
use git_repository::Repository;
use git_transfer::{clone, fetch, push, CloneOptions, Error, FetchOptions, NoCallbacks, PushOptions, PushStatus};

const NEXT: &[(&str, &str)] = &[
    ("README.md", "hello\nworld\npushed\n"),
    ("src/lib.rs", "pub fn answer() -> u32 { 42 }\n"),
    ("scripts/run.sh", "#!/bin/sh\necho run\n"),
];

struct Setup {
    ws: Workspace,
    remote: Repository,
    urls: Vec<(&'static str, String)>,
}

fn setup(server: ServerOptions) -> Setup {
    let ws = Workspace::new();
    let remote = sample_remote(&ws.path("srv/remote.git"));
    let urls = vec![
        ("local", ws.path("srv/remote.git").display().to_string()),
        ("git", format!("{}/remote.git", git_daemon(&ws.path("srv"), server.clone()))),
        ("http", format!("{}/remote.git", http_server(&ws.path("srv"), server))),
    ];
    Setup { ws, remote, urls }
}

impl Setup {
    fn clone(&self, url: &str, dir: &str) -> Repository {
        clone(url, self.ws.path(dir), &CloneOptions::default(), &mut NoCallbacks).unwrap()
    }

    /// Put the remote's `main` back where the sample left it.
    fn reset_main(&self, to: Option<git_hash::ObjectId>) {
        let name = git_ref::RefName::branch("main").unwrap();
        let current = resolve(&self.remote, "refs/heads/main");
        self.remote.refs().compare_and_swap(&name, current, to).unwrap();
    }
}

#[test]
fn pushed_commits_can_be_fetched_back() {
    let s = setup(ServerOptions::default());
    let start = resolve(&s.remote, "refs/heads/main");

    for (label, url) in &s.urls {
        s.reset_main(start);
        let writer = s.clone(url, &format!("{label}-writer"));
        let reader = s.clone(url, &format!("{label}-reader"));
        let pushed = commit(&writer, "main", NEXT, "pushed change");

        let mut recorder = Recorder::default();
        let updates = push(&writer, "origin", &["main"], &PushOptions::default(), &mut recorder).unwrap();

        assert_eq!(updates.len(), 1, "{label}");
        assert_eq!(updates[0].name, "refs/heads/main", "{label}");
        assert_eq!(updates[0].old, start.unwrap(), "{label}");
        assert_eq!(updates[0].new, pushed, "{label}");
        assert_eq!(updates[0].status, PushStatus::Accepted, "{label}");
        assert!(recorder.push_errors.is_empty(), "{label}");
        assert_eq!(resolve(&s.remote, "refs/heads/main"), Some(pushed), "{label}");
        assert_eq!(resolve(&writer, "refs/remotes/origin/main"), Some(pushed), "{label}");
        if *label != "local" {
            assert!(recorder.messages.iter().any(|m| m.contains("processing refs")), "{label}");
        }

        let outcome = fetch(&reader, "origin", &FetchOptions::default(), &mut NoCallbacks).unwrap();
        assert_eq!(outcome.objects, 3, "{label}");
        assert_eq!(resolve(&reader, "refs/remotes/origin/main"), Some(pushed), "{label}");
    }
}

#[test]
fn diverged_push_is_refused_until_forced() {
    let s = setup(ServerOptions::default());
    let start = resolve(&s.remote, "refs/heads/main");

    for (label, url) in &s.urls {
        s.reset_main(start);
        let first = s.clone(url, &format!("{label}-first"));
        let second = s.clone(url, &format!("{label}-second"));
        let theirs = commit(&first, "main", NEXT, "theirs");
        push(&first, "origin", &["main"], &PushOptions::default(), &mut NoCallbacks).unwrap();

        let ours = commit(&second, "main", &[("README.md", "ours\n")], "ours");
        let mut recorder = Recorder::default();
        let err = push(&second, "origin", &["main"], &PushOptions::default(), &mut recorder).unwrap_err();
        match err {
            Error::NonFastForward(names) => assert_eq!(names, ["refs/heads/main"], "{label}"),
            other => panic!("{label}: unexpected {other}"),
        }
        assert_eq!(recorder.push_errors.len(), 1, "{label}");
        assert_eq!(
            recorder.push_errors[0].status,
            PushStatus::Rejected("non-fast-forward".into()),
            "{label}"
        );
        assert_eq!(resolve(&s.remote, "refs/heads/main"), Some(theirs), "{label}");

        push(&second, "origin", &["+main"], &PushOptions::default(), &mut NoCallbacks).unwrap();
        assert_eq!(resolve(&s.remote, "refs/heads/main"), Some(ours), "{label}");
    }
}

#[test]
fn declined_ref_yields_partial_failure() {
    let s = setup(ServerOptions {
        declined: vec!["refs/heads/feature".into()],
        ..ServerOptions::default()
    });
    let start_main = resolve(&s.remote, "refs/heads/main");
    let feature = resolve(&s.remote, "refs/heads/feature");

    for (label, url) in s.urls.iter().filter(|(label, _)| *label != "local") {
        s.reset_main(start_main);
        let repo = s.clone(url, label);
        let main = commit(&repo, "main", NEXT, "main work");
        let tracking = resolve(&repo, "refs/remotes/origin/feature").unwrap();
        repo.refs()
            .write(&git_ref::RefName::branch("feature").unwrap(), &tracking)
            .unwrap();
        commit(&repo, "feature", &[("README.md", "feature 2\n")], "feature work");
        let mut recorder = Recorder::default();

        let err = push(
            &repo,
            "origin",
            &["main", "refs/heads/feature:refs/heads/feature"],
            &PushOptions::default(),
            &mut recorder,
        )
        .unwrap_err();

        let Error::PartialFailure(updates) = err else {
            panic!("{label}: expected a partial failure");
        };
        assert_eq!(updates.len(), 2, "{label}");
        assert_eq!(updates[0].status, PushStatus::Accepted, "{label}");
        assert_eq!(updates[1].status, PushStatus::Rejected("hook declined".into()), "{label}");
        assert_eq!(recorder.push_errors.len(), 1, "{label}");
        assert_eq!(recorder.push_errors[0].name, "refs/heads/feature", "{label}");
        assert_eq!(resolve(&s.remote, "refs/heads/main"), Some(main), "{label}");
        assert_eq!(resolve(&s.remote, "refs/heads/feature"), feature, "{label}");
    }
}

#[test]
fn delete_and_create_remote_branches() {
    let s = setup(ServerOptions::default());
    let feature = resolve(&s.remote, "refs/heads/feature");
    let name = git_ref::RefName::branch("feature").unwrap();

    for (label, url) in &s.urls {
        if resolve(&s.remote, "refs/heads/feature").is_none() {
            s.remote.refs().compare_and_swap(&name, None, feature).unwrap();
        }
        let repo = s.clone(url, label);
        let topic = commit(&repo, &format!("topic-{label}"), &[("topic.txt", "topic\n")], "topic");

        let updates = push(
            &repo,
            "origin",
            &[":refs/heads/feature".to_string(), format!("topic-{label}")],
            &PushOptions::default(),
            &mut NoCallbacks,
        )
        .unwrap();

        assert!(updates.iter().all(|u| u.status.is_accepted()), "{label}: {updates:?}");
        assert!(updates[0].new.is_null(), "{label}");
        assert_eq!(resolve(&s.remote, "refs/heads/feature"), None, "{label}");
        assert_eq!(resolve(&repo, "refs/remotes/origin/feature"), None, "{label}");
        assert_eq!(resolve(&s.remote, &format!("refs/heads/topic-{label}")), Some(topic), "{label}");
        assert_eq!(
            resolve(&repo, &format!("refs/remotes/origin/topic-{label}")),
            Some(topic),
            "{label}"
        );
    }
}

#[test]
fn pushing_an_unchanged_ref_sends_nothing() {
    let s = setup(ServerOptions::default());
    for (label, url) in &s.urls {
        let repo = s.clone(url, label);
        let updates = push(&repo, "origin", &["main"], &PushOptions::default(), &mut NoCallbacks).unwrap();
        assert_eq!(updates.len(), 1, "{label}");
        assert_eq!(updates[0].old, updates[0].new, "{label}");
        assert!(updates[0].status.is_accepted(), "{label}");
    }
}

#[test]
fn existing_tags_are_not_moved_without_force() {
    let s = setup(ServerOptions::default());
    let (_, url) = &s.urls[1];
    let repo = s.clone(url, "work");
    let tip = commit(&repo, "main", NEXT, "newer");
    lightweight_tag(&repo, "light", tip);

    let err = push(&repo, "origin", &["refs/tags/light"], &PushOptions::default(), &mut NoCallbacks).unwrap_err();
    assert!(matches!(err, Error::NonFastForward(_)), "{err}");

    push(&repo, "origin", &["+refs/tags/light"], &PushOptions::default(), &mut NoCallbacks).unwrap();
    assert_eq!(resolve(&s.remote, "refs/tags/light"), Some(tip));
}

#[test]
fn push_to_a_url_leaves_tracking_refs_alone() {
    let s = setup(ServerOptions::default());
    let (_, url) = &s.urls[2];
    let repo = s.clone(url, "work");
    let before = resolve(&repo, "refs/remotes/origin/main");
    let pushed = commit(&repo, "main", NEXT, "by url");

    push(&repo, url, &["main"], &PushOptions::default(), &mut NoCallbacks).unwrap();

    assert_eq!(resolve(&s.remote, "refs/heads/main"), Some(pushed));
    assert_eq!(resolve(&repo, "refs/remotes/origin/main"), before);
}

#[test]
fn unknown_local_ref_is_an_invalid_refspec() {
    let s = setup(ServerOptions::default());
    let (_, url) = &s.urls[0];
    let repo = s.clone(url, "work");

    let err = push(&repo, "origin", &["no-such-branch"], &PushOptions::default(), &mut NoCallbacks).unwrap_err();
    assert!(matches!(err, Error::InvalidRefspec(_)), "{err}");
}
