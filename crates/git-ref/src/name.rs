use std::fmt;

use crate::RefError;

/// A reference name checked against `git check-ref-format` rules.
///
/// Names arrive from remotes as well as from callers, so every name that
/// reaches the filesystem goes through [`RefName::new`] first: a name can
/// never escape the git directory or collide with a lock file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefName(String);

const FORBIDDEN: &[u8] = b" ~^:?*[\\";

impl RefName {
    pub fn new(name: impl Into<String>) -> Result<Self, RefError> {
        let name = name.into();
        validate(&name)?;
        Ok(Self(name))
    }

    pub fn head() -> Self {
        Self("HEAD".into())
    }

    /// `refs/heads/<branch>`
    pub fn branch(branch: &str) -> Result<Self, RefError> {
        Self::new(format!("refs/heads/{branch}"))
    }

    /// `refs/remotes/<remote>/<branch>`
    pub fn remote_tracking(remote: &str, branch: &str) -> Result<Self, RefError> {
        Self::new(format!("refs/remotes/{remote}/{branch}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `main` for `refs/heads/main`, `origin/main` for
    /// `refs/remotes/origin/main`, the full name otherwise.
    pub fn short_name(&self) -> &str {
        ["refs/heads/", "refs/tags/", "refs/remotes/"]
            .iter()
            .find_map(|prefix| self.0.strip_prefix(prefix))
            .unwrap_or(&self.0)
    }

    pub fn is_branch(&self) -> bool {
        self.0.starts_with("refs/heads/")
    }

    pub fn is_tag(&self) -> bool {
        self.0.starts_with("refs/tags/")
    }

    pub fn is_remote(&self) -> bool {
        self.0.starts_with("refs/remotes/")
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate(name: &str) -> Result<(), RefError> {
    let invalid = |reason: &str| Err(RefError::InvalidName(format!("'{name}': {reason}")));
    let bytes = name.as_bytes();

    if name.is_empty() {
        return invalid("empty");
    }
    if name == "@" {
        return invalid("'@' alone is reserved");
    }
    if let Some(b) = bytes.iter().find(|&&b| b < 0x20 || b == 0x7f) {
        return invalid(&format!("control character 0x{b:02x}"));
    }
    if let Some(&b) = bytes.iter().find(|b| FORBIDDEN.contains(b)) {
        return invalid(&format!("forbidden character '{}'", b as char));
    }
    if name.ends_with('/') || name.ends_with('.') {
        return invalid("bad trailing character");
    }
    if name.contains("..") || name.contains("@{") {
        return invalid("forbidden sequence");
    }
    for component in name.split('/') {
        if component.is_empty() {
            return invalid("empty path component");
        }
        if component.starts_with('.') || component.ends_with(".lock") {
            return invalid("component starts with '.' or ends with '.lock'");
        }
    }
    if !name.contains('/') && !name.bytes().all(|b| b.is_ascii_uppercase() || b == b'_') {
        return invalid("one-level names must be all caps, like HEAD");
    }
    Ok(())
}
