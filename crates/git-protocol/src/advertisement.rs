//! Ref discovery: the server's opening list of refs and capabilities.
//!
//! ```text
//! # service=git-upload-pack        (smart HTTP only, followed by a flush)
//! <id> HEAD\0<capabilities>
//! <id> refs/heads/main
//! <id> refs/tags/v1.0
//! <id> refs/tags/v1.0^{}           (peeled target of the tag above)
//! 0000
//! ```
//!
//! An empty repository sends a single `<null-id> capabilities^{}` line.

use std::io::Read;

use bstr::ByteSlice;
use git_hash::{HashAlgorithm, ObjectId};
use tracing::debug;

use crate::capability::Capabilities;
use crate::pktline::PktLineReader;
use crate::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedRef {
    pub name: String,
    pub oid: ObjectId,
    /// For annotated tags, the object the tag ultimately points at.
    pub peeled: Option<ObjectId>,
}

#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    /// In advertised order; `HEAD` comes first when present.
    pub refs: Vec<AdvertisedRef>,
    pub capabilities: Capabilities,
}

impl Advertisement {
    pub fn parse<R: Read>(reader: &mut PktLineReader<R>) -> Result<Self, ProtocolError> {
        let mut advertisement = Advertisement::default();
        let mut saw_capabilities = false;
        let mut algo: Option<HashAlgorithm> = None;

        loop {
            let Some(line) = reader.read_text()? else {
                if !saw_capabilities {
                    return Err(ProtocolError::Protocol(
                        "flush before any ref was advertised".into(),
                    ));
                }
                break;
            };
            if let Some(message) = line.strip_prefix(b"ERR ") {
                return Err(ProtocolError::Remote(message.to_str_lossy().into_owned()));
            }
            if !saw_capabilities {
                if line.starts_with(b"# service=") {
                    // The smart HTTP preamble is its own flush-terminated section.
                    if reader.read_text()?.is_some() {
                        return Err(ProtocolError::Protocol("service preamble not followed by flush".into()));
                    }
                    continue;
                }
                if line == b"version 1" {
                    continue;
                }
                if line.starts_with(b"version ") {
                    return Err(ProtocolError::Protocol(format!(
                        "unsupported protocol {}",
                        line.as_bstr()
                    )));
                }
            }

            let (line, caps) = match line.find_byte(0) {
                Some(nul) if !saw_capabilities => (&line[..nul], Some(&line[nul + 1..])),
                Some(_) => return Err(ProtocolError::Protocol("capabilities after the first ref".into())),
                None => (&line[..], None),
            };
            if let Some(caps) = caps {
                advertisement.capabilities = Capabilities::parse(&caps.to_str_lossy());
            }
            saw_capabilities = true;

            let (oid, name) = parse_ref_line(line)?;
            let expected = *algo.get_or_insert(oid.algorithm());
            if oid.algorithm() != expected {
                return Err(ProtocolError::Protocol(format!("mixed object id lengths at {name}")));
            }

            if name == "capabilities^{}" {
                if !oid.is_null() || !advertisement.refs.is_empty() {
                    return Err(ProtocolError::Protocol("misplaced capabilities^{} line".into()));
                }
                continue;
            }
            if let Some(base) = name.strip_suffix("^{}") {
                match advertisement.refs.last_mut() {
                    Some(last) if last.name == base => last.peeled = Some(oid),
                    _ => {
                        return Err(ProtocolError::Protocol(format!(
                            "peeled line for {base} does not follow its ref"
                        )))
                    }
                }
                continue;
            }
            advertisement.refs.push(AdvertisedRef {
                name: name.to_string(),
                oid,
                peeled: None,
            });
        }

        if let Some(algo) = algo {
            let declared = advertisement.capabilities.object_format()?;
            if declared != algo {
                return Err(ProtocolError::Protocol(format!(
                    "ids are {algo} but the server declares object-format={declared}"
                )));
            }
        }
        debug!(
            refs = advertisement.refs.len(),
            capabilities = %advertisement.capabilities,
            "parsed ref advertisement"
        );
        Ok(advertisement)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Self::parse(&mut PktLineReader::new(data))
    }

    pub fn find(&self, name: &str) -> Option<&AdvertisedRef> {
        self.refs.iter().find(|r| r.name == name)
    }

    pub fn head(&self) -> Option<&AdvertisedRef> {
        self.find("HEAD")
    }

    /// The ref `HEAD` is a symbolic ref to, per the `symref` capability.
    pub fn head_symref(&self) -> Option<&str> {
        self.capabilities.symref("HEAD")
    }

    pub fn object_format(&self) -> Result<HashAlgorithm, ProtocolError> {
        self.capabilities.object_format()
    }

    /// Refs other than `HEAD`, in advertised order.
    pub fn named_refs(&self) -> impl Iterator<Item = &AdvertisedRef> {
        self.refs.iter().filter(|r| r.name != "HEAD")
    }

    /// True for a repository that has no refs yet.
    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

fn parse_ref_line(line: &[u8]) -> Result<(ObjectId, &str), ProtocolError> {
    let bad = || ProtocolError::Protocol(format!("malformed ref line {:?}", line.as_bstr()));
    let space = line.find_byte(b' ').ok_or_else(bad)?;
    let hex = std::str::from_utf8(&line[..space]).map_err(|_| bad())?;
    let name = std::str::from_utf8(&line[space + 1..]).map_err(|_| bad())?;
    if name.is_empty() {
        return Err(bad());
    }
    Ok((ObjectId::from_hex(hex)?, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktline::PktLineWriter;

    const A: &str = "95d09f2b10159347eece71399a7e2e907ea3df4f";
    const B: &str = "1f8a2b3c4d5e6f708192a3b4c5d6e7f8091a2b3c";
    const NULL: &str = "0000000000000000000000000000000000000000";

    fn stream(lines: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut w = PktLineWriter::new(&mut buf);
        for line in lines {
            if line.is_empty() {
                w.write_flush().unwrap();
            } else {
                w.write_text(line).unwrap();
            }
        }
        buf
    }

    #[test]
    fn refs_capabilities_and_peeled_tags() {
        let data = stream(&[
            &format!("{A} HEAD\0multi_ack side-band-64k symref=HEAD:refs/heads/main agent=git/2.40"),
            &format!("{A} refs/heads/main"),
            &format!("{B} refs/tags/v1"),
            &format!("{A} refs/tags/v1^{{}}"),
            "",
        ]);
        let adv = Advertisement::from_bytes(&data).unwrap();
        assert_eq!(adv.refs.len(), 3);
        assert_eq!(adv.head().unwrap().oid.to_hex(), A);
        assert_eq!(adv.head_symref(), Some("refs/heads/main"));
        let tag = adv.find("refs/tags/v1").unwrap();
        assert_eq!(tag.oid.to_hex(), B);
        assert_eq!(tag.peeled.unwrap().to_hex(), A);
        assert_eq!(adv.named_refs().count(), 2);
        assert!(adv.capabilities.has("multi_ack"));
    }

    #[test]
    fn smart_http_preamble_is_skipped() {
        let data = stream(&["# service=git-upload-pack", "", &format!("{A} refs/heads/main\0ofs-delta"), ""]);
        let adv = Advertisement::from_bytes(&data).unwrap();
        assert_eq!(adv.refs.len(), 1);
        assert!(adv.capabilities.has("ofs-delta"));
        assert!(adv.head().is_none());
    }

    #[test]
    fn empty_repository() {
        let data = stream(&[&format!("{NULL} capabilities^{{}}\0report-status delete-refs"), ""]);
        let adv = Advertisement::from_bytes(&data).unwrap();
        assert!(adv.is_empty());
        assert!(adv.capabilities.has("delete-refs"));
    }

    #[test]
    fn premature_flush_is_an_error() {
        assert!(matches!(Advertisement::from_bytes(b"0000"), Err(ProtocolError::Protocol(_))));
        let data = stream(&["# service=git-upload-pack", "", ""]);
        assert!(matches!(Advertisement::from_bytes(&data), Err(ProtocolError::Protocol(_))));
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut data = stream(&[&format!("{A} HEAD\0ofs-delta"), ""]);
        data.truncate(data.len() - 4);
        assert!(matches!(Advertisement::from_bytes(&data), Err(ProtocolError::UnexpectedEof(_))));
    }

    #[test]
    fn malformed_lines() {
        for bad in [
            stream(&["not-a-ref-line", ""]),
            stream(&[&format!("{A}"), ""]),
            stream(&[&format!("{A} refs/tags/v1^{{}}"), ""]),
            stream(&[&format!("{A} HEAD\0a"), &format!("{B} refs/heads/x\0b"), ""]),
            stream(&["version 2", ""]),
        ] {
            assert!(Advertisement::from_bytes(&bad).is_err());
        }
    }

    #[test]
    fn remote_err_line() {
        let data = stream(&["ERR access denied"]);
        assert!(matches!(Advertisement::from_bytes(&data), Err(ProtocolError::Remote(m)) if m == "access denied"));
    }

    #[test]
    fn sha256_ids_need_a_matching_object_format() {
        let long = "ab".repeat(32);
        let data = stream(&[&format!("{long} refs/heads/main\0object-format=sha256"), ""]);
        let adv = Advertisement::from_bytes(&data).unwrap();
        assert_eq!(adv.object_format().unwrap(), HashAlgorithm::Sha256);
        assert_eq!(adv.refs[0].oid.algorithm(), HashAlgorithm::Sha256);

        let data = stream(&[&format!("{long} refs/heads/main\0ofs-delta"), ""]);
        assert!(Advertisement::from_bytes(&data).is_err());
    }
}
