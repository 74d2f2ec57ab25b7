//! Side-band demultiplexing.
//!
//! With `side-band` or `side-band-64k` the server prefixes every packet
//! with a channel byte:
//! - 1: payload (the pack, or a pkt-line encoded report)
//! - 2: progress text for the user
//! - 3: a fatal error message

use std::io::{self, Read};

use bstr::ByteSlice;
use tracing::{trace, warn};

use crate::pktline::{PktLine, PktLineReader, PktLineWriter, MAX_PKT_DATA_LEN};
use crate::ProtocolError;

/// Callback receiving band-2 text, one packet at a time.
pub type MessageSink<'a> = &'a mut dyn FnMut(&str);

/// A [`Read`] over the band-1 payload. Reading ends at the flush that
/// closes the stream; band-2 text goes to the message sink and band 3
/// becomes an error that [`ProtocolError::from_io`] turns back into
/// [`ProtocolError::Remote`].
pub struct SidebandReader<'a, R> {
    inner: PktLineReader<R>,
    on_message: Option<MessageSink<'a>>,
    buf: Vec<u8>,
    pos: usize,
    finished: bool,
}

impl<'a, R: Read> SidebandReader<'a, R> {
    pub fn new(inner: PktLineReader<R>) -> Self {
        Self {
            inner,
            on_message: None,
            buf: Vec::new(),
            pos: 0,
            finished: false,
        }
    }

    pub fn with_message_sink(mut self, sink: MessageSink<'a>) -> Self {
        self.on_message = Some(sink);
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn into_inner(self) -> PktLineReader<R> {
        self.inner
    }

    /// Pull packets until band-1 data arrives or the stream ends.
    fn fill(&mut self) -> Result<(), ProtocolError> {
        while self.pos >= self.buf.len() && !self.finished {
            let data = match self.inner.read_pkt()? {
                PktLine::Flush => {
                    self.finished = true;
                    return Ok(());
                }
                PktLine::Data(data) => data,
                other => {
                    return Err(ProtocolError::Protocol(format!("unexpected {other:?} in side-band stream")))
                }
            };
            let Some((&band, payload)) = data.split_first() else {
                return Err(ProtocolError::Protocol("side-band packet without a channel".into()));
            };
            match band {
                1 => {
                    self.buf.clear();
                    self.buf.extend_from_slice(payload);
                    self.pos = 0;
                }
                2 => {
                    let text = payload.to_str_lossy();
                    trace!(message = %text.trim_end(), "remote");
                    if let Some(sink) = self.on_message.as_mut() {
                        sink(&*text);
                    }
                }
                3 => {
                    let message = payload.to_str_lossy().trim_end().to_string();
                    return Err(ProtocolError::Remote(message));
                }
                other => {
                    warn!(band = other, "ignoring unknown side-band channel");
                }
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for SidebandReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        self.fill().map_err(ProtocolError::into_io)?;
        let available = &self.buf[self.pos.min(self.buf.len())..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Frame `data` on `band`, splitting it to fit the packet limit.
pub fn write_band<W: io::Write>(
    writer: &mut PktLineWriter<W>,
    band: u8,
    data: &[u8],
) -> Result<(), ProtocolError> {
    let mut pkt = Vec::with_capacity(data.len().min(MAX_PKT_DATA_LEN));
    for chunk in data.chunks(MAX_PKT_DATA_LEN - 1) {
        pkt.clear();
        pkt.push(band);
        pkt.extend_from_slice(chunk);
        writer.write_line(&pkt)?;
    }
    Ok(())
}
