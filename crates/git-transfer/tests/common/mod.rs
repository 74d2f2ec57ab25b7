//! Shared fixtures: repository builders, a recording callback, and
//! in-process `git://` and smart HTTP servers backed by repositories on
//! disk.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::error::Error as StdError;
use std::fs;
use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use bstr::ByteSlice;
use git_hash::{HashAlgorithm, ObjectId};
use git_object::{Commit, FileMode, Object, ObjectType, Signature, Tag, Tree, TreeEntry};
use git_odb::ObjectDatabase;
use git_protocol::pktline::{PktLineReader, PktLineWriter};
use git_protocol::sideband::write_band;
use git_ref::RefName;
use git_repository::{InitOptions, Repository};
use git_transfer::{graph, CheckoutProgress, PushUpdate, TransferCallbacks, TransferProgress};

type BoxError = Box<dyn StdError + Send + Sync>;

// ---------------------------------------------------------------------------
// Repositories

pub fn init_bare(path: &Path) -> Repository {
    Repository::init(path, &InitOptions { bare: true, ..InitOptions::default() }).unwrap()
}

fn write_tree(odb: &ObjectDatabase, files: &[(&str, &str)]) -> ObjectId {
    let mut dirs: BTreeMap<&str, Vec<(&str, &str)>> = BTreeMap::new();
    let mut entries = Vec::new();
    for (path, content) in files {
        match path.split_once('/') {
            Some((dir, rest)) => dirs.entry(dir).or_default().push((rest, content)),
            None => entries.push(TreeEntry {
                mode: if path.ends_with(".sh") { FileMode::Executable } else { FileMode::Regular },
                name: (*path).into(),
                oid: odb.put(ObjectType::Blob, content.as_bytes()).unwrap(),
            }),
        }
    }
    for (dir, sub) in dirs {
        entries.push(TreeEntry {
            mode: FileMode::Tree,
            name: dir.into(),
            oid: write_tree(odb, &sub),
        });
    }
    odb.put_object(&Object::Tree(Tree { entries }.sorted())).unwrap()
}

/// Commit a full snapshot of `files` on `branch`, on top of its
/// current tip.
pub fn commit(repo: &Repository, branch: &str, files: &[(&str, &str)], message: &str) -> ObjectId {
    let odb = repo.odb();
    let name = RefName::branch(branch).unwrap();
    let parent = repo.refs().resolve(&name).unwrap();
    let time = match parent {
        Some(p) => match odb.read(&p).unwrap() {
            Object::Commit(c) => c.committer.time + 60,
            _ => unreachable!(),
        },
        None => 1_700_000_000,
    };
    let sig = Signature::new("Test Author", "author@example.com", time, 0);
    let oid = odb
        .put_object(&Object::Commit(Commit {
            tree: write_tree(odb, files),
            parents: parent.into_iter().collect(),
            author: sig.clone(),
            committer: sig,
            extra_headers: Vec::new(),
            message: format!("{message}\n").into(),
        }))
        .unwrap();
    repo.refs().write(&name, &oid).unwrap();
    oid
}

pub fn lightweight_tag(repo: &Repository, name: &str, target: ObjectId) {
    repo.refs()
        .write(&RefName::new(format!("refs/tags/{name}")).unwrap(), &target)
        .unwrap();
}

pub fn annotated_tag(repo: &Repository, name: &str, target: ObjectId) -> ObjectId {
    let oid = repo
        .odb()
        .put_object(&Object::Tag(Tag {
            target,
            target_kind: ObjectType::Commit,
            name: name.into(),
            tagger: Some(Signature::new("Tagger", "tagger@example.com", 1_700_000_500, 0)),
            message: format!("release {name}\n").into(),
        }))
        .unwrap();
    lightweight_tag(repo, name, oid);
    oid
}

/// A bare remote with `main` (two commits), `feature`, and tags `v1`
/// (annotated) and `light`.
pub fn sample_remote(path: &Path) -> Repository {
    let repo = init_bare(path);
    let first = commit(&repo, "main", &[("README.md", "hello\n")], "initial");
    annotated_tag(&repo, "v1", first);
    commit(
        &repo,
        "main",
        &[
            ("README.md", "hello\nworld\n"),
            ("src/lib.rs", "pub fn answer() -> u32 { 42 }\n"),
            ("scripts/run.sh", "#!/bin/sh\necho run\n"),
        ],
        "add sources",
    );
    let feature = commit(&repo, "feature", &[("README.md", "feature\n")], "feature work");
    lightweight_tag(&repo, "light", feature);
    repo
}

/// Every file under `root` except the `.git` directory.
pub fn read_work_tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if path.file_name().is_some_and(|n| n == ".git") {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
                files.insert(rel, fs::read(&path).unwrap());
            }
        }
    }
    files
}

pub fn resolve(repo: &Repository, name: &str) -> Option<ObjectId> {
    repo.refs().resolve(&RefName::new(name).unwrap()).unwrap()
}

pub fn ref_names(repo: &Repository, prefix: &str) -> Vec<String> {
    repo.refs()
        .list(prefix)
        .unwrap()
        .into_iter()
        .map(|(name, _)| name.as_str().to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Callbacks

#[derive(Default)]
pub struct Recorder {
    pub transfers: Vec<TransferProgress>,
    pub checkouts: Vec<CheckoutProgress>,
    pub messages: Vec<String>,
    pub push_errors: Vec<PushUpdate>,
    pub cancel: bool,
}

impl TransferCallbacks for Recorder {
    fn on_transfer(&mut self, progress: &TransferProgress) -> ControlFlow<()> {
        self.transfers.push(*progress);
        if self.cancel {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn on_checkout(&mut self, progress: &CheckoutProgress) {
        self.checkouts.push(progress.clone());
    }

    fn on_remote_message(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }

    fn on_push_status_error(&mut self, update: &PushUpdate) {
        self.push_errors.push(update.clone());
    }
}

// ---------------------------------------------------------------------------
// Servers

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub sideband: bool,
    /// Flip a byte of every pack's trailing checksum.
    pub corrupt_pack: bool,
    /// Refs receive-pack refuses with "hook declined".
    pub declined: Vec<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            sideband: true,
            corrupt_pack: false,
            declined: Vec::new(),
        }
    }
}

fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Serve every repository under `root` over `git://`. Returns the base
/// URL; append `/<dir>` to address a repository.
pub fn git_daemon(root: &Path, options: ServerOptions) -> String {
    let (listener, port) = listen();
    let root = root.to_path_buf();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let root = root.clone();
            let options = options.clone();
            thread::spawn(move || {
                if let Err(e) = daemon_session(stream, &root, &options) {
                    eprintln!("git daemon: {e}");
                }
            });
        }
    });
    format!("git://127.0.0.1:{port}")
}

fn daemon_session(stream: TcpStream, root: &Path, options: &ServerOptions) -> Result<(), BoxError> {
    stream.set_read_timeout(Some(Duration::from_secs(20)))?;
    let mut input = BufReader::new(stream.try_clone()?);
    let mut output = stream;

    let request = PktLineReader::new(&mut input)
        .read_text()?
        .ok_or("empty daemon request")?;
    let command = request.split_str("\0").next().unwrap_or_default().to_str()?.to_string();
    let (service, path) = command.split_once(' ').ok_or("malformed daemon request")?;
    let repo = match Repository::open(root.join(path.trim_start_matches('/'))) {
        Ok(repo) => repo,
        Err(e) => {
            let mut out = PktLineWriter::new(&mut output);
            out.write_text(&format!("ERR {e}"))?;
            return Ok(());
        }
    };

    match service {
        "git-upload-pack" => {
            output.write_all(&advertisement(&repo, service, options.sideband)?)?;
            upload_pack(&repo, &mut input, &mut output, options, false)
        }
        "git-receive-pack" => {
            output.write_all(&advertisement(&repo, service, options.sideband)?)?;
            receive_pack(&repo, &mut input, &mut output, options)
        }
        other => Err(format!("unknown service {other}").into()),
    }
}

/// Serve every repository under `root` over smart HTTP.
pub fn http_server(root: &Path, options: ServerOptions) -> String {
    let (listener, port) = listen();
    let root = root.to_path_buf();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let root = root.clone();
            let options = options.clone();
            thread::spawn(move || {
                if let Err(e) = http_session(stream, &root, &options) {
                    eprintln!("http server: {e}");
                }
            });
        }
    });
    format!("http://127.0.0.1:{port}")
}

fn http_session(stream: TcpStream, root: &Path, options: &ServerOptions) -> Result<(), BoxError> {
    stream.set_read_timeout(Some(Duration::from_secs(20)))?;
    let mut input = BufReader::new(stream.try_clone()?);
    let mut output = stream;

    let mut request_line = String::new();
    input.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length: usize = 0;
    loop {
        let mut header = String::new();
        input.read_line(&mut header)?;
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse()?;
            }
        }
    }
    let mut body = vec![0; content_length];
    input.read_exact(&mut body)?;

    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    let (repo_path, endpoint) = path
        .rsplit_once("/info/refs")
        .map(|(repo, _)| (repo, "info/refs"))
        .or_else(|| path.rsplit_once('/'))
        .ok_or("bad path")?;
    let repo = match Repository::open(root.join(repo_path.trim_start_matches('/'))) {
        Ok(repo) => repo,
        Err(_) => return respond(&mut output, "404 Not Found", "text/plain", b"no such repository"),
    };

    match (method.as_str(), endpoint) {
        ("GET", "info/refs") => {
            let service = query.strip_prefix("service=").ok_or("dumb request")?;
            let mut out = PktLineWriter::new(Vec::new());
            out.write_text(&format!("# service={service}"))?;
            out.write_flush()?;
            let mut payload = out.into_inner();
            payload.extend(advertisement(&repo, service, options.sideband)?);
            respond(&mut output, "200 OK", &format!("application/x-{service}-advertisement"), &payload)
        }
        ("POST", "git-upload-pack") => {
            let mut payload = Vec::new();
            upload_pack(&repo, &mut Cursor::new(body), &mut payload, options, true)?;
            respond(&mut output, "200 OK", "application/x-git-upload-pack-result", &payload)
        }
        ("POST", "git-receive-pack") => {
            let mut payload = Vec::new();
            receive_pack(&repo, &mut Cursor::new(body), &mut payload, options)?;
            respond(&mut output, "200 OK", "application/x-git-receive-pack-result", &payload)
        }
        _ => respond(&mut output, "404 Not Found", "text/plain", b"unknown endpoint"),
    }
}

fn respond(out: &mut TcpStream, status: &str, content_type: &str, body: &[u8]) -> Result<(), BoxError> {
    write!(
        out,
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    out.write_all(body)?;
    out.flush()?;
    Ok(())
}

fn advertisement(repo: &Repository, service: &str, sideband: bool) -> Result<Vec<u8>, BoxError> {
    let mut caps = match service {
        "git-upload-pack" => "multi_ack_detailed thin-pack ofs-delta include-tag".to_string(),
        _ => "report-status delete-refs ofs-delta".to_string(),
    };
    if sideband {
        caps.push_str(" side-band-64k");
    }
    caps.push_str(" agent=test-server/1.0 object-format=sha1");
    if let Some(target) = repo.refs().head_target()? {
        caps.push_str(&format!(" symref=HEAD:{target}"));
    }

    let mut lines = Vec::new();
    if service == "git-upload-pack" {
        if let Some(head) = repo.head_id()? {
            lines.push(format!("{head} HEAD"));
        }
    }
    for (name, oid) in repo.refs().list("refs/")? {
        lines.push(format!("{oid} {name}"));
        if name.is_tag() {
            let peeled = graph::peel(repo.odb(), &oid)?;
            if peeled != oid {
                lines.push(format!("{peeled} {name}^{{}}"));
            }
        }
    }

    let mut out = PktLineWriter::new(Vec::new());
    if lines.is_empty() {
        let null = HashAlgorithm::Sha1.null_oid();
        out.write_text(&format!("{null} capabilities^{{}}\0{caps}"))?;
    }
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            out.write_text(&format!("{line}\0{caps}"))?;
        } else {
            out.write_text(line)?;
        }
    }
    out.write_flush()?;
    Ok(out.into_inner())
}

fn parse_oid(hex: &[u8]) -> Result<ObjectId, BoxError> {
    Ok(ObjectId::from_hex(hex.to_str()?)?)
}

fn upload_pack<R: BufRead, W: Write>(
    repo: &Repository,
    input: &mut R,
    output: &mut W,
    options: &ServerOptions,
    stateless: bool,
) -> Result<(), BoxError> {
    let mut reader = PktLineReader::new(&mut *input);
    let mut out = PktLineWriter::new(&mut *output);

    let mut wants = Vec::new();
    let mut caps: Vec<String> = Vec::new();
    while let Some(line) = reader.read_text()? {
        let rest = line.strip_prefix(b"want ").ok_or("expected want")?;
        let (hex, extra) = rest.split_once_str(" ").unwrap_or((rest, &b""[..]));
        wants.push(parse_oid(hex)?);
        if caps.is_empty() {
            caps = extra.to_str()?.split_whitespace().map(str::to_string).collect();
        }
    }
    if wants.is_empty() {
        return Ok(());
    }
    let sideband = options.sideband && caps.iter().any(|c| c == "side-band-64k");
    let include_tag = caps.iter().any(|c| c == "include-tag");

    let mut common: Vec<ObjectId> = Vec::new();
    loop {
        match reader.read_text()? {
            Some(line) if line.starts_with(b"have ") => {
                let oid = parse_oid(&line[5..])?;
                if repo.odb().has(&oid) {
                    out.write_text(&format!("ACK {oid} common"))?;
                    if !common.contains(&oid) {
                        common.push(oid);
                    }
                }
            }
            Some(line) if line == b"done" => break,
            Some(line) => return Err(format!("unexpected line {:?}", line.as_bstr()).into()),
            None => {
                if let Some(last) = common.last() {
                    out.write_text(&format!("ACK {last} ready"))?;
                }
                out.write_text("NAK")?;
                out.flush()?;
                if stateless {
                    return Ok(());
                }
            }
        }
    }
    match common.last() {
        Some(last) => out.write_text(&format!("ACK {last}"))?,
        None => out.write_text("NAK")?,
    }

    let odb = repo.odb();
    let mut objects = graph::objects_to_pack(odb, &wants, &common)?;
    if include_tag {
        let packed: HashSet<ObjectId> = objects.iter().copied().collect();
        for (_, oid) in repo.refs().list("refs/tags/")? {
            let target = graph::peel(odb, &oid)?;
            if target != oid && packed.contains(&target) && !packed.contains(&oid) {
                objects.push(oid);
            }
        }
    }
    let mut pack = graph::write_pack(odb, &objects)?;
    if options.corrupt_pack {
        if let Some(last) = pack.last_mut() {
            *last ^= 0xff;
        }
    }

    if sideband {
        write_band(&mut out, 2, format!("Counting objects: {}, done.\n", objects.len()).as_bytes())?;
        write_band(&mut out, 1, &pack)?;
        out.write_flush()?;
    } else {
        out.inner_mut().write_all(&pack)?;
    }
    out.flush()?;
    Ok(())
}

fn receive_pack<R: BufRead, W: Write>(
    repo: &Repository,
    input: &mut R,
    output: &mut W,
    options: &ServerOptions,
) -> Result<(), BoxError> {
    let mut commands = Vec::new();
    let mut caps: Vec<String> = Vec::new();
    {
        let mut reader = PktLineReader::new(&mut *input);
        while let Some(line) = reader.read_text()? {
            let (command, extra) = line.split_once_str("\0").unwrap_or((&line[..], &b""[..]));
            if caps.is_empty() {
                caps = extra.to_str()?.split_whitespace().map(str::to_string).collect();
            }
            let mut fields = command.splitn_str(3, " ");
            let old = parse_oid(fields.next().ok_or("missing old id")?)?;
            let new = parse_oid(fields.next().ok_or("missing new id")?)?;
            let name = fields.next().ok_or("missing ref")?.to_str()?.to_string();
            commands.push((old, new, name));
        }
    }
    if commands.is_empty() {
        return Ok(());
    }

    let mut unpack = Ok(());
    if commands.iter().any(|(_, new, _)| !new.is_null()) {
        if let Err(e) = repo
            .odb()
            .receive_pack(&mut *input, Duration::ZERO, |_| ControlFlow::Continue(()))
        {
            unpack = Err(e.to_string());
        }
    }

    let mut report = PktLineWriter::new(Vec::new());
    match &unpack {
        Ok(()) => report.write_text("unpack ok")?,
        Err(reason) => report.write_text(&format!("unpack {reason}"))?,
    }
    for (old, new, name) in &commands {
        let result = if unpack.is_err() {
            Err("unpacker error".to_string())
        } else if options.declined.contains(name) {
            Err("hook declined".to_string())
        } else if !new.is_null() && !repo.odb().has(new) {
            Err("missing necessary objects".to_string())
        } else {
            let some = |oid: &ObjectId| (!oid.is_null()).then_some(*oid);
            repo.refs()
                .compare_and_swap(&RefName::new(name.as_str())?, some(old), some(new))
                .map_err(|e| e.to_string())
        };
        match result {
            Ok(()) => report.write_text(&format!("ok {name}"))?,
            Err(reason) => report.write_text(&format!("ng {name} {reason}"))?,
        }
    }
    report.write_flush()?;
    let report = report.into_inner();

    let mut out = PktLineWriter::new(&mut *output);
    if options.sideband && caps.iter().any(|c| c == "side-band-64k") {
        write_band(&mut out, 2, b"processing refs\n")?;
        write_band(&mut out, 1, &report)?;
        out.write_flush()?;
    } else {
        out.inner_mut().write_all(&report)?;
    }
    out.flush()?;
    Ok(())
}

/// A scratch directory holding a served remote and room for clones.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}
