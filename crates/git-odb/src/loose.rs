//! One zlib-compressed file per object under `objects/xx/`.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use git_hash::{HashAlgorithm, Hasher, ObjectId};
use git_object::{header, ObjectType};
use git_pack::PackedObject;

use crate::OdbError;

pub(crate) struct LooseStore {
    objects_dir: PathBuf,
    algo: HashAlgorithm,
}

impl LooseStore {
    pub(crate) fn new(objects_dir: &Path, algo: HashAlgorithm) -> Self {
        Self {
            objects_dir: objects_dir.to_path_buf(),
            algo,
        }
    }

    fn object_path(&self, oid: &ObjectId) -> PathBuf {
        self.objects_dir.join(oid.loose_path())
    }

    pub(crate) fn contains(&self, oid: &ObjectId) -> bool {
        self.object_path(oid).is_file()
    }

    pub(crate) fn read(&self, oid: &ObjectId) -> Result<Option<PackedObject>, OdbError> {
        let compressed = match fs::read(self.object_path(oid)) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let corrupt = |reason: String| OdbError::Corrupt { oid: *oid, reason };

        let mut raw = Vec::with_capacity(compressed.len() * 2);
        ZlibDecoder::new(&compressed[..])
            .read_to_end(&mut raw)
            .map_err(|e| corrupt(format!("zlib: {e}")))?;
        let (kind, size, header_len) =
            header::parse_header(&raw).map_err(|e| corrupt(e.to_string()))?;
        if raw.len() - header_len != size {
            return Err(corrupt(format!(
                "header declares {size} bytes, file holds {}",
                raw.len() - header_len
            )));
        }
        raw.drain(..header_len);
        Ok(Some(PackedObject { kind, data: raw }))
    }

    /// Write an object unless it already exists. The file appears under
    /// its final name only once fully written.
    pub(crate) fn write(&self, kind: ObjectType, data: &[u8]) -> Result<ObjectId, OdbError> {
        let oid = Hasher::hash_object(self.algo, kind.as_str(), data)?;
        let path = self.object_path(&oid);
        if path.is_file() {
            return Ok(oid);
        }
        let dir = path.parent().unwrap_or(&self.objects_dir);
        fs::create_dir_all(dir)?;

        let tmp = tempfile::Builder::new().prefix("tmp_obj_").tempfile_in(dir)?;
        let mut encoder = ZlibEncoder::new(tmp, Compression::default());
        encoder.write_all(&header::write_header(kind, data.len()))?;
        encoder.write_all(data)?;
        let tmp = encoder.finish()?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => {}
            // Another writer stored the same content first.
            Err(_) if path.is_file() => {}
            Err(e) => return Err(e.error.into()),
        }
        Ok(oid)
    }

    pub(crate) fn object_ids(&self) -> Result<Vec<ObjectId>, OdbError> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(&self.objects_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let prefix = entry.file_name().to_string_lossy().into_owned();
            if prefix.len() != 2 || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
                continue;
            }
            for file in fs::read_dir(entry.path())? {
                let name = file?.file_name().to_string_lossy().into_owned();
                if name.len() + 2 != self.algo.hex_len() {
                    continue;
                }
                if let Ok(oid) = ObjectId::from_hex(&format!("{prefix}{name}")) {
                    ids.push(oid);
                }
            }
        }
        Ok(ids)
    }
}
