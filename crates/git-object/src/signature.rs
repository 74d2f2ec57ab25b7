use std::fmt;

use bstr::{BString, ByteSlice};

use crate::ObjectError;

/// Identity line of a commit or tag: `Name <email> <seconds> <+hhmm>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: BString,
    pub email: BString,
    /// Seconds since the Unix epoch.
    pub time: i64,
    /// Offset from UTC in minutes.
    pub offset: i32,
}

impl Signature {
    pub fn new(name: impl Into<BString>, email: impl Into<BString>, time: i64, offset: i32) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            time,
            offset,
        }
    }

    pub fn parse(line: &[u8]) -> Result<Self, ObjectError> {
        let invalid = || ObjectError::InvalidSignature(BString::from(line));
        let gt = line.iter().rposition(|&b| b == b'>').ok_or_else(invalid)?;
        let lt = line[..gt].iter().rposition(|&b| b == b'<').ok_or_else(invalid)?;

        let mut when = line[gt + 1..].trim().splitn_str(2, " ");
        let time = when
            .next()
            .and_then(|t| t.to_str().ok())
            .and_then(|t| t.parse::<i64>().ok())
            .ok_or_else(invalid)?;
        let offset = when.next().and_then(parse_offset).ok_or_else(invalid)?;

        Ok(Self {
            name: BString::from(line[..lt].trim()),
            email: BString::from(&line[lt + 1..gt]),
            time,
            offset,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

fn parse_offset(tz: &[u8]) -> Option<i32> {
    let (sign, digits) = match tz.split_first()? {
        (b'+', rest) => (1, rest),
        (b'-', rest) => (-1, rest),
        _ => return None,
    };
    if digits.len() != 4 {
        return None;
    }
    let value: i32 = digits.to_str().ok()?.parse().ok()?;
    Some(sign * ((value / 100) * 60 + value % 100))
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.offset < 0 { '-' } else { '+' };
        let abs = self.offset.abs();
        write!(
            f,
            "{} <{}> {} {}{:02}{:02}",
            self.name,
            self.email,
            self.time,
            sign,
            abs / 60,
            abs % 60
        )
    }
}
