//! Committing a received pack stream to `objects/pack`.

use std::fs;
use std::io::{BufRead, BufWriter, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Duration;

use git_hash::ObjectId;
use git_pack::index::write_index;
use git_pack::indexer::PackIndexer;
use git_pack::pack::PackFile;
use git_pack::thin::complete_thin_pack;
use git_pack::TransferProgress;
use tracing::debug;

use crate::{ObjectDatabase, OdbError};

/// What a call to [`ObjectDatabase::receive_pack`] stored.
#[derive(Debug, Clone)]
pub struct ReceivedPack {
    /// The stored `.pack`, or `None` when the stream carried no objects.
    pub path: Option<PathBuf>,
    pub checksum: ObjectId,
    pub objects: usize,
    pub progress: TransferProgress,
}

impl ObjectDatabase {
    /// Index a pack stream and add it to the store as one unit.
    ///
    /// The stream is staged in a temporary file inside `objects/pack`,
    /// verified, completed if thin, and indexed. The `.pack` is then
    /// renamed into place followed by its `.idx`; the store only
    /// considers packs that have an index, so the second rename is the
    /// instant the objects become visible. Any failure, including a
    /// cancellation from `progress`, removes the staging file and
    /// leaves the store unchanged.
    pub fn receive_pack<R, P>(
        &self,
        input: R,
        progress_interval: Duration,
        progress: P,
    ) -> Result<ReceivedPack, OdbError>
    where
        R: BufRead,
        P: FnMut(&TransferProgress) -> ControlFlow<()>,
    {
        let pack_dir = self.objects_dir.join("pack");
        fs::create_dir_all(&pack_dir)?;
        let mut staged = tempfile::Builder::new()
            .prefix("tmp_pack_")
            .tempfile_in(&pack_dir)?;

        let mut indexed = PackIndexer::new(self.algo)
            .progress_interval(progress_interval)
            .with_resolver(self)
            .index(input, BufWriter::new(staged.as_file_mut()), progress)?;

        if indexed.entries.is_empty() {
            debug!("received empty pack, nothing to store");
            return Ok(ReceivedPack {
                path: None,
                checksum: indexed.checksum,
                objects: 0,
                progress: indexed.progress,
            });
        }

        complete_thin_pack(staged.as_file_mut(), &mut indexed)?;
        staged.as_file().sync_all()?;

        let stem = format!("pack-{}", indexed.checksum.to_hex());
        let pack_path = pack_dir.join(format!("{stem}.pack"));
        let idx_path = pack_dir.join(format!("{stem}.idx"));
        let objects = indexed.entries.len();
        let received = ReceivedPack {
            path: Some(pack_path.clone()),
            checksum: indexed.checksum,
            objects,
            progress: indexed.progress,
        };
        if idx_path.is_file() {
            debug!(pack = %stem, "identical pack already stored");
            // possibly written by another handle, so this one may not know it yet
            let loaded = self.packs().iter().any(|p| p.path().file_name() == pack_path.file_name());
            if !loaded {
                self.add_pack(PackFile::open(&pack_path, self.algo)?);
            }
            return Ok(received);
        }

        let mut idx = tempfile::Builder::new()
            .prefix("tmp_idx_")
            .tempfile_in(&pack_dir)?;
        idx.write_all(&write_index(&indexed.entries, &indexed.checksum)?)?;
        idx.as_file().sync_all()?;

        staged.persist(&pack_path).map_err(|e| e.error)?;
        idx.persist(&idx_path).map_err(|e| e.error)?;
        debug!(pack = %stem, objects, "pack committed to object store");

        self.add_pack(PackFile::open(&pack_path, self.algo)?);
        Ok(received)
    }
}
