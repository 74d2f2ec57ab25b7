//! Receiving a pack stream.
//!
//! [`PackIndexer::index`] reads a pack once, front to back, from any
//! buffered reader. Every byte is copied to a caller-supplied sink (the
//! staging file of the object store) while entries are inflated into an
//! arena keyed by pack offset. The trailer is checked before any delta
//! is resolved; resolution then walks the delta forest with an explicit
//! stack, so adversarially deep chains cannot exhaust the call stack.

use std::collections::HashMap;
use std::io::{self, BufRead, Read, Write};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use flate2::{Decompress, FlushDecompress, Status};
use git_hash::{HashAlgorithm, Hasher, ObjectId};
use git_object::ObjectType;
use tracing::{debug, trace};

use crate::delta::apply_delta;
use crate::entry::EntryHeader;
use crate::index::IndexEntry;
use crate::{parse_pack_header, EntryKind, PackError, PackedObject, TransferProgress, PACK_HEADER_SIZE};

/// Supplies delta bases that a thin pack leaves out.
pub trait BaseResolver {
    fn find_base(&self, oid: &ObjectId) -> Option<PackedObject>;
}

impl<F> BaseResolver for F
where
    F: Fn(&ObjectId) -> Option<PackedObject>,
{
    fn find_base(&self, oid: &ObjectId) -> Option<PackedObject> {
        self(oid)
    }
}

/// Resolver for self-contained packs.
pub struct NoExternalBases;

impl BaseResolver for NoExternalBases {
    fn find_base(&self, _oid: &ObjectId) -> Option<PackedObject> {
        None
    }
}

/// Outcome of indexing one pack stream.
#[derive(Debug)]
pub struct IndexedPack {
    /// The verified trailer.
    pub checksum: ObjectId,
    /// Every entry of the pack, in pack order.
    pub entries: Vec<IndexEntry>,
    /// Bases taken from outside the pack; non-empty only for thin packs.
    pub external_bases: Vec<(ObjectId, PackedObject)>,
    /// Total stream length, trailer included.
    pub len: u64,
    pub progress: TransferProgress,
}

/// Configuration for receiving packs.
pub struct PackIndexer<'r> {
    algo: HashAlgorithm,
    interval: Duration,
    resolver: &'r dyn BaseResolver,
}

impl PackIndexer<'static> {
    pub fn new(algo: HashAlgorithm) -> Self {
        Self {
            algo,
            interval: Duration::from_millis(100),
            resolver: &NoExternalBases,
        }
    }
}

impl<'r> PackIndexer<'r> {
    /// Minimum time between two progress reports. Reports at the start
    /// and end of each phase are always delivered.
    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_resolver<'b>(self, resolver: &'b dyn BaseResolver) -> PackIndexer<'b> {
        PackIndexer {
            algo: self.algo,
            interval: self.interval,
            resolver,
        }
    }

    /// Consume a pack from `input`, mirroring its bytes into `sink`.
    ///
    /// `progress` returning [`ControlFlow::Break`] aborts with
    /// [`PackError::Cancelled`].
    pub fn index<R, W, P>(&self, input: R, sink: W, progress: P) -> Result<IndexedPack, PackError>
    where
        R: BufRead,
        W: Write,
        P: FnMut(&TransferProgress) -> ControlFlow<()>,
    {
        let mut reporter = Reporter {
            callback: progress,
            interval: self.interval,
            last: None,
            state: TransferProgress::default(),
        };
        let mut stream = Stream {
            reader: input,
            tee: Tee {
                sink,
                hasher: Hasher::new(self.algo),
                hashing: true,
                crc: crc32fast::Hasher::new(),
                position: 0,
            },
        };

        let mut header = [0u8; PACK_HEADER_SIZE];
        stream.read_exact(&mut header).map_err(|e| truncation(e, 0))?;
        let count = parse_pack_header(&header)?;
        debug!(objects = count, "receiving pack");
        reporter.state.total_objects = count;
        reporter.report(true)?;

        let mut slots = Vec::with_capacity(count.min(1 << 20) as usize);
        for _ in 0..count {
            let offset = stream.tee.position;
            stream.tee.crc = crc32fast::Hasher::new();
            let header = EntryHeader::read(&mut stream, offset, self.algo)?;
            let data = stream.inflate(header.size, offset)?;
            trace!(offset, kind = ?header.kind, size = header.size, "entry");
            if header.kind.is_delta() {
                reporter.state.total_deltas += 1;
            }
            slots.push(Slot {
                offset,
                crc32: stream.tee.crc.clone().finalize(),
                kind: header.kind,
                data,
                resolved: None,
                external: false,
            });
            reporter.state.received_objects += 1;
            reporter.state.received_bytes = stream.tee.position;
            reporter.report(false)?;
        }

        stream.tee.hashing = false;
        let actual = std::mem::replace(&mut stream.tee.hasher, Hasher::new(self.algo)).finalize()?;
        let mut trailer = vec![0u8; self.algo.digest_len()];
        let trailer_at = stream.tee.position;
        stream.read_exact(&mut trailer).map_err(|e| truncation(e, trailer_at))?;
        let expected = ObjectId::from_bytes(&trailer, self.algo)?;
        if expected != actual {
            return Err(PackError::ChecksumMismatch { expected, actual });
        }
        stream.tee.sink.flush()?;
        reporter.state.received_bytes = stream.tee.position;
        reporter.report(true)?;

        let len = stream.tee.position;
        let (entries, external_bases) = self.resolve(slots, &mut reporter)?;
        reporter.report(true)?;
        debug!(
            objects = entries.len(),
            deltas = reporter.state.total_deltas,
            thin_bases = external_bases.len(),
            bytes = len,
            "pack indexed"
        );

        Ok(IndexedPack {
            checksum: expected,
            entries,
            external_bases,
            len,
            progress: reporter.state,
        })
    }

    fn resolve<P>(
        &self,
        mut slots: Vec<Slot>,
        reporter: &mut Reporter<P>,
    ) -> Result<(Vec<IndexEntry>, Vec<(ObjectId, PackedObject)>), PackError>
    where
        P: FnMut(&TransferProgress) -> ControlFlow<()>,
    {
        let by_offset: HashMap<u64, usize> =
            slots.iter().enumerate().map(|(i, s)| (s.offset, i)).collect();
        let mut ofs_children: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut ref_children: HashMap<ObjectId, Vec<usize>> = HashMap::new();
        let mut stack = Vec::new();

        for i in 0..slots.len() {
            match slots[i].kind {
                EntryKind::Base(kind) => {
                    let oid = Hasher::hash_object(self.algo, kind.as_str(), &slots[i].data)?;
                    slots[i].resolved = Some((kind, oid));
                    reporter.state.indexed_objects += 1;
                    stack.push(i);
                }
                EntryKind::OfsDelta { base_offset } => {
                    let base = by_offset.get(&base_offset).ok_or_else(|| PackError::CorruptEntry {
                        offset: slots[i].offset,
                        reason: format!("no entry starts at base offset {base_offset}"),
                    })?;
                    ofs_children.entry(*base).or_default().push(i);
                }
                EntryKind::RefDelta { base } => ref_children.entry(base).or_default().push(i),
            }
        }
        stack.reverse();

        let mut external_bases = Vec::new();
        loop {
            while let Some(i) = stack.pop() {
                let Some((kind, oid)) = slots[i].resolved else {
                    continue;
                };
                let mut children = ofs_children.remove(&i).unwrap_or_default();
                children.extend(ref_children.remove(&oid).unwrap_or_default());
                let base = std::mem::take(&mut slots[i].data);

                for child in children {
                    let target = apply_delta(&base, &slots[child].data)?;
                    let child_oid = Hasher::hash_object(self.algo, kind.as_str(), &target)?;
                    slots[child].data = target;
                    slots[child].resolved = Some((kind, child_oid));
                    reporter.state.indexed_objects += 1;
                    reporter.state.indexed_deltas += 1;
                    reporter.report(false)?;
                    stack.push(child);
                }
            }

            if ref_children.is_empty() {
                break;
            }
            // Everything reachable inside the pack is resolved; the
            // remaining REF_DELTA bases must come from the store.
            let mut missing = None;
            for base in ref_children.keys() {
                match self.resolver.find_base(base) {
                    Some(object) => {
                        trace!(%base, "thin pack base from object store");
                        slots.push(Slot {
                            offset: u64::MAX,
                            crc32: 0,
                            kind: EntryKind::Base(object.kind),
                            data: object.data.clone(),
                            resolved: Some((object.kind, *base)),
                            external: true,
                        });
                        stack.push(slots.len() - 1);
                        external_bases.push((*base, object));
                    }
                    None => missing = Some(*base),
                }
            }
            if stack.is_empty() {
                if let Some(base) = missing {
                    return Err(PackError::UnresolvedDelta(base));
                }
            }
        }

        let mut entries = Vec::with_capacity(slots.len());
        for slot in slots.iter().filter(|s| !s.external) {
            let (_, oid) = slot.resolved.ok_or_else(|| PackError::CorruptEntry {
                offset: slot.offset,
                reason: "delta base never resolved".into(),
            })?;
            entries.push(IndexEntry {
                oid,
                offset: slot.offset,
                crc32: slot.crc32,
            });
        }
        Ok((entries, external_bases))
    }
}

struct Slot {
    offset: u64,
    crc32: u32,
    kind: EntryKind,
    /// Inflated payload: the delta until resolved, then the object.
    data: Vec<u8>,
    resolved: Option<(ObjectType, ObjectId)>,
    external: bool,
}

struct Reporter<P> {
    callback: P,
    interval: Duration,
    last: Option<Instant>,
    state: TransferProgress,
}

impl<P: FnMut(&TransferProgress) -> ControlFlow<()>> Reporter<P> {
    fn report(&mut self, force: bool) -> Result<(), PackError> {
        let due = self.last.map_or(true, |at| at.elapsed() >= self.interval);
        if !(force || due) {
            return Ok(());
        }
        self.last = Some(Instant::now());
        match (self.callback)(&self.state) {
            ControlFlow::Continue(()) => Ok(()),
            ControlFlow::Break(()) => {
                debug!(received = self.state.received_objects, "pack transfer cancelled by caller");
                Err(PackError::Cancelled)
            }
        }
    }
}

/// Copies consumed bytes to the sink and feeds the running digests.
struct Tee<W> {
    sink: W,
    hasher: Hasher,
    /// Cleared at the trailer, which is not part of its own digest.
    hashing: bool,
    crc: crc32fast::Hasher,
    position: u64,
}

impl<W: Write> Tee<W> {
    fn record(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.sink.write_all(bytes)?;
        if self.hashing {
            self.hasher.update(bytes);
        }
        self.crc.update(bytes);
        self.position += bytes.len() as u64;
        Ok(())
    }
}

struct Stream<R, W> {
    reader: R,
    tee: Tee<W>,
}

impl<R: BufRead, W: Write> Stream<R, W> {
    /// Inflate one zlib stream, consuming exactly its compressed bytes.
    fn inflate(&mut self, size: u64, offset: u64) -> Result<Vec<u8>, PackError> {
        let corrupt = |reason: String| PackError::CorruptEntry { offset, reason };
        let size = usize::try_from(size).map_err(|_| corrupt(format!("entry size {size} too large")))?;
        let mut out = Vec::with_capacity(size.min(1 << 24) + 1);
        let mut zlib = Decompress::new(true);

        loop {
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                return Err(PackError::Truncated(self.tee.position));
            }
            if out.len() == out.capacity() {
                out.reserve(8192);
            }
            let (in_before, out_before) = (zlib.total_in(), out.len());
            let status = zlib
                .decompress_vec(available, &mut out, FlushDecompress::None)
                .map_err(|e| corrupt(format!("zlib: {e}")))?;
            let used = (zlib.total_in() - in_before) as usize;
            self.tee.record(&available[..used])?;
            self.reader.consume(used);

            if out.len() > size {
                return Err(corrupt(format!("inflates past its declared {size} bytes")));
            }
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError if used == 0 && out.len() == out_before => {
                    return Err(corrupt("zlib stream stalled".into()));
                }
                Status::Ok | Status::BufError => {}
            }
        }

        if out.len() != size {
            return Err(corrupt(format!("inflated to {} bytes, header says {size}", out.len())));
        }
        Ok(out)
    }
}

impl<R: BufRead, W: Write> Read for Stream<R, W> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.reader.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.tee.record(&available[..n])?;
        self.reader.consume(n);
        Ok(n)
    }
}

fn truncation(err: io::Error, at: u64) -> PackError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        PackError::Truncated(at)
    } else {
        PackError::Io(err)
    }
}
