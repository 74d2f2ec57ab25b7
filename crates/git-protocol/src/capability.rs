//! Capabilities: what the server advertises after the NUL on its first
//! ref line, and what the client asks for in return.

use git_hash::HashAlgorithm;

use crate::ProtocolError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: Vec<(String, Option<String>)>,
}

impl Capabilities {
    /// Parse a space-separated v1 capability list.
    pub fn parse(list: &str) -> Self {
        let entries = list
            .split_ascii_whitespace()
            .map(|cap| match cap.split_once('=') {
                Some((name, value)) => (name.to_string(), Some(value.to_string())),
                None => (cap.to_string(), None),
            })
            .collect();
        Self { entries }
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Value of the first `name=value` entry.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().filter(|(n, _)| n == name).find_map(|(_, v)| v.as_deref())
    }

    pub fn get_all<'a, 'n>(&'a self, name: &'n str) -> impl Iterator<Item = &'a str> + 'n
    where
        'a: 'n,
    {
        self.entries
            .iter()
            .filter(move |(n, _)| n == name)
            .filter_map(|(_, v)| v.as_deref())
    }

    /// Target of `symref=<from>:<to>` for `from`, typically `HEAD`.
    pub fn symref(&self, from: &str) -> Option<&str> {
        self.get_all("symref").find_map(|value| {
            let (source, target) = value.split_once(':')?;
            (source == from).then_some(target)
        })
    }

    /// The advertised `object-format`; servers that predate SHA-256 do
    /// not advertise one and use SHA-1.
    pub fn object_format(&self) -> Result<HashAlgorithm, ProtocolError> {
        match self.get("object-format") {
            None => Ok(HashAlgorithm::Sha1),
            Some(name) => HashAlgorithm::from_name(name)
                .ok_or_else(|| ProtocolError::Protocol(format!("unknown object-format '{name}'"))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Display for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match value {
                Some(value) => write!(f, "{name}={value}")?,
                None => f.write_str(name)?,
            }
        }
        Ok(())
    }
}

/// How the server acknowledges haves during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// One `ACK <id>` for the first common object, nothing after.
    Single,
    /// `ACK <id> continue` per common object and a `NAK` per round.
    Multi,
    /// `multi_ack_detailed`: `ACK <id> common|ready` and a `NAK` per round.
    Detailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SidebandMode {
    None,
    /// `side-band`, packets of at most 1000 bytes.
    Band,
    /// `side-band-64k`.
    Band64k,
}

/// What the client requests on its first `want` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCapabilities {
    pub ack_mode: AckMode,
    pub sideband: SidebandMode,
    pub thin_pack: bool,
    pub requested: Vec<String>,
}

pub fn select_fetch(server: &Capabilities, agent: &str, algo: HashAlgorithm) -> FetchCapabilities {
    let mut requested = Vec::new();
    let ack_mode = if server.has("multi_ack_detailed") {
        requested.push("multi_ack_detailed".to_string());
        AckMode::Detailed
    } else if server.has("multi_ack") {
        requested.push("multi_ack".to_string());
        AckMode::Multi
    } else {
        AckMode::Single
    };
    let sideband = select_sideband(server);
    match sideband {
        SidebandMode::Band64k => requested.push("side-band-64k".into()),
        SidebandMode::Band => requested.push("side-band".into()),
        SidebandMode::None => {}
    }
    let thin_pack = server.has("thin-pack");
    for cap in ["thin-pack", "ofs-delta", "include-tag"] {
        if server.has(cap) {
            requested.push(cap.to_string());
        }
    }
    if server.has("agent") {
        requested.push(format!("agent={agent}"));
    }
    if server.has("object-format") {
        requested.push(format!("object-format={}", algo.name()));
    }
    FetchCapabilities {
        ack_mode,
        sideband,
        thin_pack,
        requested,
    }
}

/// What the client requests on its first push command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushCapabilities {
    pub sideband: SidebandMode,
    pub requested: Vec<String>,
}

/// Push needs `report-status` to learn per-ref outcomes, and
/// `delete-refs` if any command deletes.
pub fn select_push(
    server: &Capabilities,
    agent: &str,
    algo: HashAlgorithm,
    deleting: bool,
) -> Result<PushCapabilities, ProtocolError> {
    if !server.has("report-status") {
        return Err(ProtocolError::MissingCapability("report-status"));
    }
    if deleting && !server.has("delete-refs") {
        return Err(ProtocolError::MissingCapability("delete-refs"));
    }
    let mut requested = vec!["report-status".to_string()];
    let sideband = select_sideband(server);
    match sideband {
        SidebandMode::Band64k => requested.push("side-band-64k".into()),
        SidebandMode::Band => requested.push("side-band".into()),
        SidebandMode::None => {}
    }
    if deleting {
        requested.push("delete-refs".into());
    }
    if server.has("ofs-delta") {
        requested.push("ofs-delta".into());
    }
    if server.has("agent") {
        requested.push(format!("agent={agent}"));
    }
    if server.has("object-format") {
        requested.push(format!("object-format={}", algo.name()));
    }
    Ok(PushCapabilities { sideband, requested })
}

fn select_sideband(caps: &Capabilities) -> SidebandMode {
    if caps.has("side-band-64k") {
        SidebandMode::Band64k
    } else if caps.has("side-band") {
        SidebandMode::Band
    } else {
        SidebandMode::None
    }
}
