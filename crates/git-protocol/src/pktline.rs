//! Pkt-line framing.
//!
//! Each packet starts with four hex digits giving its total length,
//! header included. Lengths below four are control packets:
//! - `0000`: flush, end of a section
//! - `0001`: delimiter
//! - `0002`: response end

use std::io::{Read, Write};

use bstr::ByteSlice;
use tracing::trace;

use crate::ProtocolError;

/// Largest payload a single packet may carry.
pub const MAX_PKT_DATA_LEN: usize = 65516;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    Data(Vec<u8>),
    Flush,
    Delimiter,
    ResponseEnd,
}

impl PktLine {
    /// Payload with one trailing newline removed; `None` for control packets.
    pub fn text(&self) -> Option<&[u8]> {
        match self {
            PktLine::Data(data) => Some(data.strip_suffix(b"\n").unwrap_or(data)),
            _ => None,
        }
    }
}

/// Reads packets straight from the inner reader, never past the end of
/// the current packet, so whatever follows (a raw pack) stays readable
/// through [`PktLineReader::into_inner`].
pub struct PktLineReader<R> {
    reader: R,
}

impl<R: Read> PktLineReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    pub fn read_pkt(&mut self) -> Result<PktLine, ProtocolError> {
        let mut len_buf = [0u8; 4];
        self.reader.read_exact(&mut len_buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ProtocolError::UnexpectedEof("pkt-line length"),
            _ => ProtocolError::from_io(e),
        })?;

        if !len_buf.iter().all(u8::is_ascii_hexdigit) {
            return Err(ProtocolError::InvalidPktLine(format!(
                "bad length prefix {:?}",
                len_buf.as_bstr()
            )));
        }
        let len = len_buf
            .iter()
            .fold(0usize, |acc, &b| (acc << 4) | (b as char).to_digit(16).unwrap_or(0) as usize);

        let pkt = match len {
            0 => PktLine::Flush,
            1 => PktLine::Delimiter,
            2 => PktLine::ResponseEnd,
            3 => return Err(ProtocolError::InvalidPktLine("length 3 is reserved".into())),
            _ => {
                let data_len = len - 4;
                if data_len > MAX_PKT_DATA_LEN {
                    return Err(ProtocolError::InvalidPktLine(format!(
                        "packet of {data_len} bytes exceeds {MAX_PKT_DATA_LEN}"
                    )));
                }
                let mut data = vec![0u8; data_len];
                self.reader.read_exact(&mut data).map_err(|e| match e.kind() {
                    std::io::ErrorKind::UnexpectedEof => ProtocolError::UnexpectedEof("pkt-line payload"),
                    _ => ProtocolError::from_io(e),
                })?;
                PktLine::Data(data)
            }
        };
        trace!(pkt = ?PktDisplay(&pkt), "<");
        Ok(pkt)
    }

    /// Next data packet with its newline stripped; `None` at a flush.
    /// A delimiter or response-end is a protocol error in v0/v1.
    pub fn read_text(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        match self.read_pkt()? {
            PktLine::Data(mut data) => {
                if data.last() == Some(&b'\n') {
                    data.pop();
                }
                Ok(Some(data))
            }
            PktLine::Flush => Ok(None),
            other => Err(ProtocolError::Protocol(format!("unexpected {other:?} packet"))),
        }
    }

    /// All data packets up to the next flush.
    pub fn read_until_flush(&mut self) -> Result<Vec<Vec<u8>>, ProtocolError> {
        let mut lines = Vec::new();
        while let Some(line) = self.read_text()? {
            lines.push(line);
        }
        Ok(lines)
    }
}

pub struct PktLineWriter<W> {
    writer: W,
}

impl<W: Write> PktLineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn write_line(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if data.len() > MAX_PKT_DATA_LEN {
            return Err(ProtocolError::InvalidPktLine(format!(
                "payload of {} bytes exceeds {MAX_PKT_DATA_LEN}",
                data.len()
            )));
        }
        trace!(line = %data.as_bstr(), ">");
        write!(self.writer, "{:04x}", data.len() + 4)?;
        self.writer.write_all(data)?;
        Ok(())
    }

    /// Write `text` as one packet, newline-terminated.
    pub fn write_text(&mut self, text: &str) -> Result<(), ProtocolError> {
        if text.ends_with('\n') {
            return self.write_line(text.as_bytes());
        }
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        self.write_line(&data)
    }

    pub fn write_flush(&mut self) -> Result<(), ProtocolError> {
        trace!("> flush");
        self.writer.write_all(b"0000")?;
        Ok(())
    }

    pub fn write_delimiter(&mut self) -> Result<(), ProtocolError> {
        self.writer.write_all(b"0001")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ProtocolError> {
        self.writer.flush()?;
        Ok(())
    }
}

struct PktDisplay<'a>(&'a PktLine);

impl std::fmt::Debug for PktDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            // Pack bytes behind a band marker are not worth printing.
            PktLine::Data(data) if data.first().is_some_and(|&b| b == 1) => {
                write!(f, "band-1 ({} bytes)", data.len() - 1)
            }
            PktLine::Data(data) => write!(f, "{:?}", data.as_bstr()),
            PktLine::Flush => f.write_str("flush"),
            PktLine::Delimiter => f.write_str("delim"),
            PktLine::ResponseEnd => f.write_str("response-end"),
        }
    }
}
