//! Object database for the transfer engine.
//!
//! Objects live either loose (one compressed file each) or in packs
//! received from a remote. Both are addressed only by [`ObjectId`].
//! Writes never expose partial state: a loose object appears under its
//! final name in one rename, and a received pack becomes visible when
//! its index is renamed into place (see [`ObjectDatabase::receive_pack`]).

mod ingest;
mod loose;

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use git_hash::{HashAlgorithm, HashError, ObjectId};
use git_object::{Object, ObjectError, ObjectType};
use git_pack::indexer::BaseResolver;
use git_pack::pack::PackFile;
use git_pack::PackError;
use tracing::{debug, warn};

pub use git_pack::PackedObject as RawObject;
pub use ingest::ReceivedPack;

use loose::LooseStore;

#[derive(Debug, thiserror::Error)]
pub enum OdbError {
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    #[error("corrupt object {oid}: {reason}")]
    Corrupt { oid: ObjectId, reason: String },

    #[error("object {oid} is a {actual}, expected a {expected}")]
    UnexpectedKind {
        oid: ObjectId,
        expected: ObjectType,
        actual: ObjectType,
    },

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl OdbError {
    /// Whether the store content (or an incoming pack) is damaged, as
    /// opposed to an environmental failure.
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Corrupt { .. } | Self::Object(_) => true,
            Self::Pack(e) => e.is_corruption(),
            _ => false,
        }
    }
}

/// Loose objects plus every pack under `objects/pack`.
pub struct ObjectDatabase {
    loose: LooseStore,
    packs: RwLock<Vec<PackFile>>,
    objects_dir: PathBuf,
    algo: HashAlgorithm,
}

impl ObjectDatabase {
    /// Create the `objects/` layout (if needed) and open it.
    pub fn init(objects_dir: impl AsRef<Path>, algo: HashAlgorithm) -> Result<Self, OdbError> {
        let objects_dir = objects_dir.as_ref();
        fs::create_dir_all(objects_dir.join("pack"))?;
        fs::create_dir_all(objects_dir.join("info"))?;
        Self::open(objects_dir, algo)
    }

    pub fn open(objects_dir: impl AsRef<Path>, algo: HashAlgorithm) -> Result<Self, OdbError> {
        let objects_dir = objects_dir.as_ref().to_path_buf();
        let packs = discover_packs(&objects_dir, algo)?;
        debug!(path = %objects_dir.display(), packs = packs.len(), "opened object database");
        Ok(Self {
            loose: LooseStore::new(&objects_dir, algo),
            packs: RwLock::new(packs),
            objects_dir,
            algo,
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    pub fn path(&self) -> &Path {
        &self.objects_dir
    }

    pub fn has(&self, oid: &ObjectId) -> bool {
        self.loose.contains(oid) || self.packs().iter().any(|pack| pack.contains(oid))
    }

    /// Kind and payload of `oid`, or `None` if the store lacks it.
    pub fn try_get(&self, oid: &ObjectId) -> Result<Option<RawObject>, OdbError> {
        if let Some(object) = self.loose.read(oid)? {
            return Ok(Some(object));
        }
        for pack in self.packs().iter() {
            if let Some(object) = pack.read(oid)? {
                return Ok(Some(object));
            }
        }
        Ok(None)
    }

    pub fn get(&self, oid: &ObjectId) -> Result<RawObject, OdbError> {
        self.try_get(oid)?.ok_or(OdbError::NotFound(*oid))
    }

    /// Read and decode an object.
    pub fn read(&self, oid: &ObjectId) -> Result<Object, OdbError> {
        let raw = self.get(oid)?;
        Ok(Object::parse(raw.kind, &raw.data, self.algo)?)
    }

    /// Read an object that must be of `kind`.
    pub fn read_kind(&self, oid: &ObjectId, kind: ObjectType) -> Result<RawObject, OdbError> {
        let raw = self.get(oid)?;
        if raw.kind != kind {
            return Err(OdbError::UnexpectedKind {
                oid: *oid,
                expected: kind,
                actual: raw.kind,
            });
        }
        Ok(raw)
    }

    /// Store a payload and return its id. Storing content that is
    /// already present is a no-op returning the same id.
    pub fn put(&self, kind: ObjectType, data: &[u8]) -> Result<ObjectId, OdbError> {
        self.loose.write(kind, data)
    }

    pub fn put_object(&self, object: &Object) -> Result<ObjectId, OdbError> {
        self.put(object.kind(), &object.to_bytes())
    }

    /// Every distinct object id in the store.
    pub fn object_ids(&self) -> Result<Vec<ObjectId>, OdbError> {
        let mut seen: HashSet<ObjectId> = self.loose.object_ids()?.into_iter().collect();
        for pack in self.packs().iter() {
            seen.extend(pack.object_ids()?);
        }
        Ok(seen.into_iter().collect())
    }

    pub fn count_objects(&self) -> Result<usize, OdbError> {
        Ok(self.object_ids()?.len())
    }

    /// Re-scan `objects/pack` for packs written by other handles.
    pub fn refresh(&self) -> Result<(), OdbError> {
        let packs = discover_packs(&self.objects_dir, self.algo)?;
        *self.packs.write().unwrap_or_else(PoisonError::into_inner) = packs;
        Ok(())
    }

    fn packs(&self) -> std::sync::RwLockReadGuard<'_, Vec<PackFile>> {
        self.packs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_pack(&self, pack: PackFile) {
        self.packs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(pack);
    }
}

impl BaseResolver for ObjectDatabase {
    fn find_base(&self, oid: &ObjectId) -> Option<RawObject> {
        match self.try_get(oid) {
            Ok(found) => found,
            Err(e) => {
                warn!(%oid, error = %e, "unreadable delta base in object store");
                None
            }
        }
    }
}

/// Open every `pack-*.pack` that has its `.idx` beside it. A pack
/// without an index is an interrupted ingestion and stays invisible.
fn discover_packs(objects_dir: &Path, algo: HashAlgorithm) -> Result<Vec<PackFile>, OdbError> {
    let pack_dir = objects_dir.join("pack");
    let entries = match fs::read_dir(&pack_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_pack = path.extension().is_some_and(|ext| ext == "pack");
        if is_pack && path.with_extension("idx").is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    paths
        .into_iter()
        .map(|path| PackFile::open(&path, algo).map_err(OdbError::from))
        .collect()
}
