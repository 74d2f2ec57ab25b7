//! Remote URLs.
//!
//! - `git://host[:port]/path`
//! - `http[s]://[user[:password]@]host[:port]/path`
//! - `file:///path`, `/path`, `./path`, `C:\path`
//! - `ssh://...` and `[user@]host:path`, recognized so they can be
//!   refused with a clear error

use std::fmt;
use std::path::PathBuf;

use crate::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Git,
    Http,
    Https,
    File,
    /// A bare filesystem path.
    Local,
    Ssh,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Git => "git",
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::File => "file",
            Scheme::Local => "local",
            Scheme::Ssh => "ssh",
        }
    }

    pub fn default_port(self) -> Option<u16> {
        match self {
            Scheme::Git => Some(9418),
            Scheme::Http => Some(80),
            Scheme::Https => Some(443),
            Scheme::Ssh => Some(22),
            Scheme::File | Scheme::Local => None,
        }
    }

    pub fn is_local(self) -> bool {
        matches!(self, Scheme::File | Scheme::Local)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed remote URL. `Display` and `Debug` never show the password.
#[derive(Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
}

impl GitUrl {
    pub fn parse(url: &str) -> Result<Self, TransportError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(TransportError::InvalidUrl("empty URL".into()));
        }
        if let Some((scheme, rest)) = url.split_once("://") {
            let scheme = match scheme {
                "git" => Scheme::Git,
                "http" => Scheme::Http,
                "https" => Scheme::Https,
                "ssh" | "git+ssh" | "ssh+git" => Scheme::Ssh,
                "file" => {
                    if rest.is_empty() {
                        return Err(TransportError::InvalidUrl(url.to_string()));
                    }
                    return Ok(Self::local(Scheme::File, rest));
                }
                other => return Err(TransportError::UnsupportedScheme(other.to_string())),
            };
            return parse_authority(scheme, rest, url);
        }

        let is_drive = url.len() >= 2 && url.as_bytes()[1] == b':' && url.as_bytes()[0].is_ascii_alphabetic();
        if is_drive || url.starts_with('/') || url.starts_with('.') || url.starts_with('\\') {
            return Ok(Self::local(Scheme::Local, url));
        }
        // scp-like `[user@]host:path`, as long as no slash precedes the colon.
        if let Some(colon) = url.find(':') {
            if !url[..colon].contains('/') {
                let (user, host) = match url[..colon].rsplit_once('@') {
                    Some((user, host)) => (Some(user.to_string()), host),
                    None => (None, &url[..colon]),
                };
                if host.is_empty() {
                    return Err(TransportError::InvalidUrl(url.to_string()));
                }
                return Ok(Self {
                    scheme: Scheme::Ssh,
                    user,
                    password: None,
                    host: Some(host.to_string()),
                    port: None,
                    path: url[colon + 1..].to_string(),
                });
            }
        }
        Ok(Self::local(Scheme::Local, url))
    }

    fn local(scheme: Scheme, path: &str) -> Self {
        Self {
            scheme,
            user: None,
            password: None,
            host: None,
            port: None,
            path: path.to_string(),
        }
    }

    /// Filesystem path of a `file://` or bare-path remote.
    pub fn local_path(&self) -> Option<PathBuf> {
        self.scheme.is_local().then(|| PathBuf::from(&self.path))
    }

    /// `host` or `host:port`, as sent in a `git://` request and used as
    /// the credential host.
    pub fn host_with_port(&self) -> String {
        let host = self.host.as_deref().unwrap_or_default();
        let host = if host.contains(':') { format!("[{host}]") } else { host.to_string() };
        match self.port {
            Some(port) => format!("{host}:{port}"),
            None => host,
        }
    }

    /// `scheme://host[:port]/path` with no userinfo and no trailing slash,
    /// the base of smart-HTTP endpoint URLs.
    pub fn http_base(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host_with_port(), self.path.trim_end_matches('/'))
    }
}

impl fmt::Display for GitUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::Local => f.write_str(&self.path),
            Scheme::File => write!(f, "file://{}", self.path),
            _ => {
                write!(f, "{}://", self.scheme)?;
                if let Some(user) = &self.user {
                    write!(f, "{user}@")?;
                }
                write!(f, "{}{}", self.host_with_port(), self.path)
            }
        }
    }
}

impl fmt::Debug for GitUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GitUrl").field(&self.to_string()).finish()
    }
}

fn parse_authority(scheme: Scheme, rest: &str, url: &str) -> Result<GitUrl, TransportError> {
    let invalid = |why: &str| TransportError::InvalidUrl(format!("{why} in {}", redact(url)));
    let (authority, path) = match rest.find('/') {
        Some(slash) => rest.split_at(slash),
        None => (rest, "/"),
    };
    let (userinfo, host_port) = match authority.rsplit_once('@') {
        Some((userinfo, host_port)) => (Some(userinfo), host_port),
        None => (None, authority),
    };
    let (user, password) = match userinfo {
        Some(info) => match info.split_once(':') {
            Some((user, password)) => (Some(percent_decode(user)), Some(percent_decode(password))),
            None => (Some(percent_decode(info)), None),
        },
        None => (None, None),
    };

    let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
        let (host, after) = bracketed.split_once(']').ok_or_else(|| invalid("unclosed IPv6 bracket"))?;
        (host, after.strip_prefix(':'))
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None),
        }
    };
    if host.is_empty() {
        return Err(invalid("empty host"));
    }
    let port = match port {
        Some("") | None => None,
        Some(p) => Some(p.parse::<u16>().map_err(|_| invalid("invalid port"))?),
    };

    Ok(GitUrl {
        scheme,
        user,
        password,
        host: Some(host.to_string()),
        port,
        path: path.to_string(),
    })
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let hex = bytes.get(i + 1..i + 3).and_then(|h| std::str::from_utf8(h).ok());
        match (bytes[i], hex.and_then(|h| u8::from_str_radix(h, 16).ok())) {
            (b'%', Some(byte)) => {
                out.push(byte);
                i += 3;
            }
            (b, _) => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// `url` with any `:password` in its userinfo replaced.
pub fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rsplit_once('@') {
        Some((userinfo, _)) if userinfo.contains(':') => {
            let user = userinfo.split(':').next().unwrap_or_default();
            let at = userinfo.len();
            format!("{scheme}://{user}:***{}", &rest[at..])
        }
        _ => url.to_string(),
    }
}
