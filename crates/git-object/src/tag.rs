use bstr::BString;
use git_hash::ObjectId;

use crate::commit::{parse_oid, split_message};
use crate::{ObjectError, ObjectType, Signature};

/// An annotated tag payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub target: ObjectId,
    pub target_kind: ObjectType,
    pub name: BString,
    pub tagger: Option<Signature>,
    pub message: BString,
}

impl Tag {
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut target = None;
        let mut target_kind = None;
        let mut name = None;
        let mut tagger = None;

        let (headers, message) = split_message(content);
        for line in headers.split(|&b| b == b'\n') {
            let Some(space) = line.iter().position(|&b| b == b' ') else {
                continue;
            };
            let value = &line[space + 1..];
            match &line[..space] {
                b"object" => target = Some(parse_oid(value)?),
                b"type" => target_kind = Some(ObjectType::from_bytes(value)?),
                b"tag" => name = Some(BString::from(value)),
                b"tagger" => tagger = Some(Signature::parse(value)?),
                _ => {}
            }
        }

        let missing = |field| ObjectError::MissingField {
            kind: ObjectType::Tag,
            field,
        };
        Ok(Self {
            target: target.ok_or_else(|| missing("object"))?,
            target_kind: target_kind.ok_or_else(|| missing("type"))?,
            name: name.ok_or_else(|| missing("tag"))?,
            tagger,
            message: BString::from(message),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = format!(
            "object {}\ntype {}\ntag {}\n",
            self.target, self.target_kind, self.name
        )
        .into_bytes();
        if let Some(tagger) = &self.tagger {
            out.extend_from_slice(format!("tagger {tagger}\n").as_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }
}
