//! `git-receive-pack` requests and the `report-status` answer.
//!
//! ```text
//! <old-id> <new-id> <ref>\0<capabilities>
//! <old-id> <new-id> <ref>
//! 0000
//! PACK...
//! ```
//!
//! The server answers `unpack ok` or `unpack <error>`, then one
//! `ok <ref>` or `ng <ref> <reason>` per command, then a flush.

use std::io::Read;

use bstr::ByteSlice;
use git_hash::ObjectId;
use tracing::debug;

use crate::pktline::{PktLineReader, PktLineWriter};
use crate::ProtocolError;

/// One ref update sent to the server. A null `new` deletes the ref and a
/// null `old` creates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub old: ObjectId,
    pub new: ObjectId,
}

impl Command {
    pub fn is_delete(&self) -> bool {
        self.new.is_null()
    }
}

/// Command list followed by its flush; the pack, if any, is appended by
/// the caller.
pub fn encode_commands(commands: &[Command], capabilities: &[String]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = PktLineWriter::new(Vec::new());
    for (i, cmd) in commands.iter().enumerate() {
        if i == 0 {
            out.write_text(&format!("{} {} {}\0{}", cmd.old, cmd.new, cmd.name, capabilities.join(" ")))?;
        } else {
            out.write_text(&format!("{} {} {}", cmd.old, cmd.new, cmd.name))?;
        }
    }
    out.write_flush()?;
    Ok(out.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportStatus {
    /// `Err` carries the server's reason when it could not unpack.
    pub unpack: Result<(), String>,
    pub refs: Vec<RefStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefStatus {
    pub name: String,
    /// `Err` carries the `ng` reason.
    pub result: Result<(), String>,
}

impl ReportStatus {
    pub fn read<R: Read>(reader: &mut PktLineReader<R>) -> Result<Self, ProtocolError> {
        let first = reader
            .read_text()?
            .ok_or_else(|| ProtocolError::Protocol("empty report-status".into()))?;
        let unpack = match first.strip_prefix(b"unpack ") {
            Some(b"ok") => Ok(()),
            Some(reason) => Err(reason.to_str_lossy().into_owned()),
            None => {
                return Err(ProtocolError::Protocol(format!(
                    "report-status must start with unpack, got {:?}",
                    first.as_bstr()
                )))
            }
        };

        let mut refs = Vec::new();
        while let Some(line) = reader.read_text()? {
            let line = line
                .to_str()
                .map_err(|_| ProtocolError::Protocol("non-UTF-8 ref status".into()))?;
            let status = if let Some(name) = line.strip_prefix("ok ") {
                RefStatus {
                    name: name.to_string(),
                    result: Ok(()),
                }
            } else if let Some(rest) = line.strip_prefix("ng ") {
                let (name, reason) = rest.split_once(' ').unwrap_or((rest, "failed"));
                RefStatus {
                    name: name.to_string(),
                    result: Err(reason.to_string()),
                }
            } else {
                return Err(ProtocolError::Protocol(format!("unexpected report-status line {line:?}")));
            };
            refs.push(status);
        }
        debug!(unpack_ok = unpack.is_ok(), refs = refs.len(), "read report-status");
        Ok(Self { unpack, refs })
    }

    pub fn find(&self, name: &str) -> Option<&RefStatus> {
        self.refs.iter().find(|r| r.name == name)
    }
}
