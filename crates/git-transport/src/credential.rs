//! Credential providers.
//!
//! The HTTP transport asks its provider for a username and password the
//! first time a server answers 401, and reports back whether they worked.
//! [`GitCredentialHelper`] speaks the `git credential` key=value protocol
//! to configured helpers, falling back to `git credential` itself.

use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::TransportError;

/// What a credential is requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRequest {
    pub protocol: String,
    /// `host` or `host:port`.
    pub host: String,
    pub path: Option<String>,
    /// Username already known from the URL, if any.
    pub username: Option<String>,
}

impl CredentialRequest {
    fn to_helper_input(&self, credential: Option<&Credential>) -> String {
        let mut input = format!("protocol={}\nhost={}\n", self.protocol, self.host);
        if let Some(path) = &self.path {
            input.push_str(&format!("path={path}\n"));
        }
        match credential {
            Some(c) => input.push_str(&format!("username={}\npassword={}\n", c.username, c.password)),
            None => {
                if let Some(username) = &self.username {
                    input.push_str(&format!("username={username}\n"));
                }
            }
        }
        input.push('\n');
        input
    }
}

/// Username and password. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Source of credentials, queried lazily when a server demands them.
pub trait CredentialProvider: Send + Sync {
    /// `Ok(None)` means no credential is available and the request fails
    /// with the server's 401.
    fn fill(&self, request: &CredentialRequest) -> Result<Option<Credential>, TransportError>;

    /// The credential was accepted.
    fn approve(&self, _request: &CredentialRequest, _credential: &Credential) {}

    /// The credential was refused.
    fn reject(&self, _request: &CredentialRequest, _credential: &Credential) {}
}

/// A fixed credential, for tests and for callers that already prompted.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credential);

impl CredentialProvider for StaticCredentials {
    fn fill(&self, _request: &CredentialRequest) -> Result<Option<Credential>, TransportError> {
        Ok(Some(self.0.clone()))
    }
}

/// Runs credential helpers.
///
/// Each configured helper (`credential.helper` values) is tried in order
/// with `get`; when none answers, `git credential fill` is consulted.
/// `approve` and `reject` fan out as `store` and `erase`.
#[derive(Debug, Clone, Default)]
pub struct GitCredentialHelper {
    helpers: Vec<String>,
    use_git: bool,
}

impl GitCredentialHelper {
    pub fn new(helpers: Vec<String>) -> Self {
        Self { helpers, use_git: true }
    }

    /// Only the listed helpers, without falling back to `git credential`.
    pub fn helpers_only(helpers: Vec<String>) -> Self {
        Self { helpers, use_git: false }
    }

    fn notify(&self, request: &CredentialRequest, credential: &Credential, helper_action: &str, git_action: &str) {
        let input = request.to_helper_input(Some(credential));
        for helper in &self.helpers {
            let (program, args) = resolve_helper_command(helper);
            if let Err(err) = run(&program, &args, helper_action, &input) {
                debug!(helper = %helper, action = helper_action, error = %err, "credential helper failed");
            }
        }
        if self.use_git {
            if let Err(err) = run("git", &["credential".to_string()], git_action, &input) {
                debug!(action = git_action, error = %err, "git credential failed");
            }
        }
    }
}

impl CredentialProvider for GitCredentialHelper {
    fn fill(&self, request: &CredentialRequest) -> Result<Option<Credential>, TransportError> {
        let input = request.to_helper_input(None);
        for helper in &self.helpers {
            let (program, args) = resolve_helper_command(helper);
            match run(&program, &args, "get", &input) {
                Ok(output) => {
                    if let Some(credential) = parse_helper_output(&output, request) {
                        return Ok(Some(credential));
                    }
                }
                Err(err) => debug!(helper = %helper, error = %err, "credential helper failed"),
            }
        }
        if !self.use_git {
            return Ok(None);
        }
        match run("git", &["credential".to_string()], "fill", &input) {
            Ok(output) => Ok(parse_helper_output(&output, request)),
            Err(err) => {
                debug!(error = %err, "git credential fill failed");
                Ok(None)
            }
        }
    }

    fn approve(&self, request: &CredentialRequest, credential: &Credential) {
        self.notify(request, credential, "store", "approve");
    }

    fn reject(&self, request: &CredentialRequest, credential: &Credential) {
        self.notify(request, credential, "erase", "reject");
    }
}

fn run(program: &str, args: &[String], action: &str, input: &str) -> Result<String, TransportError> {
    let mut child = Command::new(program)
        .args(args)
        .arg(action)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| TransportError::Credential(format!("cannot run {program}: {e}")))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(input.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(TransportError::Credential(format!("{program} {action} exited with {}", output.status)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_helper_output(output: &str, request: &CredentialRequest) -> Option<Credential> {
    let mut username = request.username.clone();
    let mut password = None;
    for line in output.lines() {
        if let Some(value) = line.strip_prefix("username=") {
            username = Some(value.to_string());
        } else if let Some(value) = line.strip_prefix("password=") {
            password = Some(value.to_string());
        }
    }
    Some(Credential::new(username?, password?))
}

fn resolve_helper_command(helper: &str) -> (String, Vec<String>) {
    if let Some(cmd) = helper.strip_prefix('!') {
        ("sh".to_string(), vec!["-c".to_string(), format!("{cmd} \"$@\""), cmd.to_string()])
    } else {
        let mut words = helper.split_whitespace();
        let name = words.next().unwrap_or_default();
        let program = if name.contains('/') || name.contains('\\') {
            name.to_string()
        } else {
            format!("git-credential-{name}")
        };
        (program, words.map(str::to_string).collect())
    }
}
