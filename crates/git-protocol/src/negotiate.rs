//! Want/have negotiation with `git-upload-pack`.
//!
//! A [`Negotiation`] is moved through the rounds: [`Negotiation::request`]
//! produces the bytes for the next round and [`Negotiation::read_response`]
//! consumes the server's answer, returning the state for the next round or
//! the final outcome. Once the outcome is returned, the packfile (possibly
//! side-band framed) follows on the same response stream.
//!
//! Stateless transports (smart HTTP) get the full want list and every
//! common object found so far in each request, since the server forgets
//! everything between requests.

use std::collections::{HashSet, VecDeque};
use std::io::Read;

use bstr::ByteSlice;
use git_hash::ObjectId;
use tracing::{debug, trace};

use crate::capability::AckMode;
use crate::pktline::{PktLineReader, PktLineWriter};
use crate::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationConfig {
    pub ack_mode: AckMode,
    pub stateless: bool,
    /// Haves in the first round; each later round doubles, up to `max_batch`.
    pub initial_batch: usize,
    pub max_batch: usize,
    /// Total haves sent before giving up and sending `done`.
    pub max_haves: usize,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            ack_mode: AckMode::Detailed,
            stateless: false,
            initial_batch: 16,
            max_batch: 256,
            max_haves: 2048,
        }
    }
}

#[derive(Debug)]
pub struct Negotiation {
    config: NegotiationConfig,
    wants: Vec<ObjectId>,
    capabilities: Vec<String>,
    /// Local commits still to offer, most recent first.
    candidates: VecDeque<ObjectId>,
    common: Vec<ObjectId>,
    common_set: HashSet<ObjectId>,
    batch: usize,
    haves_sent: usize,
    round: usize,
    ready: bool,
    /// The last request ended in `done`.
    sent_done: bool,
    /// A single-ack server acknowledged something in an earlier round.
    single_acked: bool,
}

/// Result of one round.
#[derive(Debug)]
pub enum Step {
    Continue(Negotiation),
    Finished(Outcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// Objects both sides have, in the order the server acknowledged them.
    pub common: Vec<ObjectId>,
    pub rounds: usize,
    pub haves_sent: usize,
}

impl Negotiation {
    /// `haves` are candidate local commits, most recent first. An empty
    /// list (a clone) negotiates in a single round.
    pub fn new(
        config: NegotiationConfig,
        wants: Vec<ObjectId>,
        haves: Vec<ObjectId>,
        capabilities: Vec<String>,
    ) -> Self {
        let batch = config.initial_batch.max(1);
        Self {
            config,
            wants,
            capabilities,
            candidates: haves.into(),
            common: Vec::new(),
            common_set: HashSet::new(),
            batch,
            haves_sent: 0,
            round: 0,
            ready: false,
            sent_done: false,
            single_acked: false,
        }
    }

    pub fn round(&self) -> usize {
        self.round
    }

    /// Bytes of the next request. The first request (and every stateless
    /// one) starts with the want list.
    pub fn request(&mut self) -> Result<Vec<u8>, ProtocolError> {
        if self.wants.is_empty() {
            return Err(ProtocolError::Protocol("negotiation without wants".into()));
        }
        self.round += 1;
        let mut out = PktLineWriter::new(Vec::new());

        if self.round == 1 || self.config.stateless {
            for (i, want) in self.wants.iter().enumerate() {
                if i == 0 && !self.capabilities.is_empty() {
                    out.write_text(&format!("want {want} {}", self.capabilities.join(" ")))?;
                } else {
                    out.write_text(&format!("want {want}"))?;
                }
            }
            out.write_flush()?;
            if self.config.stateless {
                for oid in &self.common {
                    out.write_text(&format!("have {oid}"))?;
                }
            }
        }

        let give_up = self.ready
            || self.single_acked
            || self.candidates.is_empty()
            || self.haves_sent >= self.config.max_haves;
        if give_up {
            out.write_text("done")?;
            self.sent_done = true;
        } else {
            let budget = self.batch.min(self.config.max_haves - self.haves_sent);
            let mut sent = 0;
            while sent < budget {
                let Some(oid) = self.candidates.pop_front() else { break };
                if self.common_set.contains(&oid) {
                    continue;
                }
                out.write_text(&format!("have {oid}"))?;
                sent += 1;
            }
            self.haves_sent += sent;
            self.batch = (self.batch * 2).min(self.config.max_batch.max(1));
            out.write_flush()?;
        }
        debug!(
            round = self.round,
            haves_sent = self.haves_sent,
            common = self.common.len(),
            done = self.sent_done,
            "negotiation request"
        );
        Ok(out.into_inner())
    }

    /// Consume the server's answer to the last [`request`](Self::request).
    pub fn read_response<R: Read>(mut self, reader: &mut PktLineReader<R>) -> Result<Step, ProtocolError> {
        if self.sent_done {
            self.read_final(reader)?;
            return Ok(Step::Finished(Outcome {
                common: self.common,
                rounds: self.round,
                haves_sent: self.haves_sent,
            }));
        }

        match self.config.ack_mode {
            AckMode::Single => match self.read_ack(reader)? {
                Ack::Nak => {}
                Ack::Final(oid) => {
                    self.add_common(oid);
                    self.single_acked = true;
                }
                other => return Err(unexpected(other)),
            },
            AckMode::Multi | AckMode::Detailed => loop {
                match self.read_ack(reader)? {
                    Ack::Nak => break,
                    Ack::Common(oid) | Ack::Continue(oid) => self.add_common(oid),
                    Ack::Ready(oid) => {
                        self.add_common(oid);
                        self.ready = true;
                    }
                    other @ Ack::Final(_) => return Err(unexpected(other)),
                }
            },
        }
        Ok(Step::Continue(self))
    }

    /// After `done`: acknowledgements of the last haves, then a bare
    /// `ACK <id>` or `NAK` that precedes the pack.
    fn read_final<R: Read>(&mut self, reader: &mut PktLineReader<R>) -> Result<(), ProtocolError> {
        match self.config.ack_mode {
            // A stateful single-ack server already said its one ACK.
            AckMode::Single if self.single_acked && !self.config.stateless => Ok(()),
            AckMode::Single => match self.read_ack(reader)? {
                Ack::Nak => Ok(()),
                Ack::Final(oid) => {
                    self.add_common(oid);
                    Ok(())
                }
                other => Err(unexpected(other)),
            },
            AckMode::Multi | AckMode::Detailed => loop {
                match self.read_ack(reader)? {
                    Ack::Nak => return Ok(()),
                    Ack::Final(oid) => {
                        self.add_common(oid);
                        return Ok(());
                    }
                    Ack::Common(oid) | Ack::Continue(oid) | Ack::Ready(oid) => self.add_common(oid),
                }
            },
        }
    }

    fn read_ack<R: Read>(&self, reader: &mut PktLineReader<R>) -> Result<Ack, ProtocolError> {
        let line = reader
            .read_text()?
            .ok_or_else(|| ProtocolError::Protocol("flush where an ACK or NAK was expected".into()))?;
        trace!(line = %line.as_bstr(), round = self.round, "negotiation response");
        Ack::parse(&line)
    }

    fn add_common(&mut self, oid: ObjectId) {
        if self.common_set.insert(oid) {
            self.common.push(oid);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ack {
    Nak,
    Final(ObjectId),
    Continue(ObjectId),
    Common(ObjectId),
    Ready(ObjectId),
}

impl Ack {
    fn parse(line: &[u8]) -> Result<Self, ProtocolError> {
        if line == b"NAK" {
            return Ok(Ack::Nak);
        }
        if let Some(message) = line.strip_prefix(b"ERR ") {
            return Err(ProtocolError::Remote(message.to_str_lossy().into_owned()));
        }
        let rest = line
            .strip_prefix(b"ACK ")
            .and_then(|rest| rest.to_str().ok())
            .ok_or_else(|| ProtocolError::Protocol(format!("expected ACK or NAK, got {:?}", line.as_bstr())))?;
        let (hex, status) = match rest.split_once(' ') {
            Some((hex, status)) => (hex, Some(status)),
            None => (rest, None),
        };
        let oid = ObjectId::from_hex(hex)?;
        Ok(match status {
            None => Ack::Final(oid),
            Some("continue") => Ack::Continue(oid),
            Some("common") => Ack::Common(oid),
            Some("ready") => Ack::Ready(oid),
            Some(other) => return Err(ProtocolError::Protocol(format!("unknown ACK status '{other}'"))),
        })
    }
}

fn unexpected(ack: Ack) -> ProtocolError {
    ProtocolError::Protocol(format!("unexpected {ack:?} during negotiation"))
}
