use bstr::BString;
use git_hash::ObjectId;

use crate::{ObjectError, ObjectType, Signature};

/// A commit payload.
///
/// Headers the engine does not interpret (`encoding`, `gpgsig`,
/// `mergetag`, ...) are kept verbatim, continuation lines included, so
/// that re-encoding reproduces the original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub extra_headers: Vec<(BString, BString)>,
    pub message: BString,
}

impl Commit {
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut extra_headers: Vec<(BString, BString)> = Vec::new();

        let (headers, message) = split_message(content);
        for line in headers.split(|&b| b == b'\n') {
            if let Some(continuation) = line.strip_prefix(b" ") {
                if let Some((_, value)) = extra_headers.last_mut() {
                    value.push(b'\n');
                    value.extend_from_slice(continuation);
                }
                continue;
            }
            let Some(space) = line.iter().position(|&b| b == b' ') else {
                continue;
            };
            let (key, value) = (&line[..space], &line[space + 1..]);
            match key {
                b"tree" => tree = Some(parse_oid(value)?),
                b"parent" => parents.push(parse_oid(value)?),
                b"author" => author = Some(Signature::parse(value)?),
                b"committer" => committer = Some(Signature::parse(value)?),
                _ => extra_headers.push((BString::from(key), BString::from(value))),
            }
        }

        let missing = |field| ObjectError::MissingField {
            kind: ObjectType::Commit,
            field,
        };
        Ok(Self {
            tree: tree.ok_or_else(|| missing("tree"))?,
            parents,
            author: author.ok_or_else(|| missing("author"))?,
            committer: committer.ok_or_else(|| missing("committer"))?,
            extra_headers,
            message: BString::from(message),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("tree {}\n", self.tree).as_bytes());
        for parent in &self.parents {
            out.extend_from_slice(format!("parent {parent}\n").as_bytes());
        }
        out.extend_from_slice(format!("author {}\n", self.author).as_bytes());
        out.extend_from_slice(format!("committer {}\n", self.committer).as_bytes());
        for (key, value) in &self.extra_headers {
            out.extend_from_slice(key);
            out.push(b' ');
            for (i, line) in value.split(|&b| b == b'\n').enumerate() {
                if i > 0 {
                    out.extend_from_slice(b"\n ");
                }
                out.extend_from_slice(line);
            }
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}

/// Split at the first blank line. Headers come back without their final
/// newline.
pub(crate) fn split_message(content: &[u8]) -> (&[u8], &[u8]) {
    if content.starts_with(b"\n") {
        return (&[], &content[1..]);
    }
    match content.windows(2).position(|w| w == b"\n\n") {
        Some(pos) => (&content[..pos], &content[pos + 2..]),
        None => (content.strip_suffix(b"\n").unwrap_or(content), &[]),
    }
}

pub(crate) fn parse_oid(value: &[u8]) -> Result<ObjectId, ObjectError> {
    let hex = std::str::from_utf8(value)
        .map_err(|_| ObjectError::InvalidHeader("non-ASCII object id".into()))?;
    Ok(ObjectId::from_hex(hex)?)
}
