//! Refspecs: `[+]<src>[:<dst>]`, with at most one `*` per side.

use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    pub force: bool,
    /// `None` for `:<dst>`, which deletes `dst` on push.
    pub src: Option<String>,
    /// `None` when no `:` was given.
    pub dst: Option<String>,
}

impl RefSpec {
    pub fn parse(spec: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidRefSpec(spec.to_string());
        let (force, body) = match spec.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let (src, dst) = match body.split_once(':') {
            Some((src, dst)) => (src, Some(dst)),
            None => (body, None),
        };
        if dst.is_some_and(|d| d.contains(':')) || (src.is_empty() && dst.map_or(true, str::is_empty)) {
            return Err(invalid());
        }

        let side = |s: &str| -> Result<Option<String>, ProtocolError> {
            if s.is_empty() {
                return Ok(None);
            }
            if s.matches('*').count() > 1 || s.contains(char::is_whitespace) || s.contains("..") {
                return Err(invalid());
            }
            Ok(Some(s.to_string()))
        };
        let src = side(src)?;
        let dst = match dst {
            Some(d) => side(d)?,
            None => None,
        };
        let spec = Self { force, src, dst };
        let globs = [spec.src.as_deref(), spec.dst.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| s.contains('*'))
            .count();
        let sides = [spec.src.is_some(), spec.dst.is_some()].iter().filter(|s| **s).count();
        if globs != 0 && globs != sides {
            return Err(invalid());
        }
        Ok(spec)
    }

    pub fn is_glob(&self) -> bool {
        self.src.as_deref().is_some_and(|s| s.contains('*'))
    }

    pub fn is_delete(&self) -> bool {
        self.src.is_none()
    }

    /// Where `name` lands under this spec, or `None` if it does not match.
    /// Without an explicit destination a match maps to itself.
    pub fn map(&self, name: &str) -> Option<String> {
        let src = self.src.as_deref()?;
        let dst = self.dst.as_deref().unwrap_or(src);
        match src.split_once('*') {
            None => (name == src).then(|| dst.to_string()),
            Some((prefix, suffix)) => {
                let middle = name.strip_prefix(prefix)?.strip_suffix(suffix)?;
                Some(dst.replacen('*', middle, 1))
            }
        }
    }
}

impl FromStr for RefSpec {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.force {
            f.write_str("+")?;
        }
        if let Some(src) = &self.src {
            f.write_str(src)?;
        }
        if let Some(dst) = &self.dst {
            write!(f, ":{dst}")?;
        }
        Ok(())
    }
}
