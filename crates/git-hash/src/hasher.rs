//! Streaming digest over SHA-1 (collision detecting) or SHA-256.

use std::io;

use digest::Digest;

use crate::{HashAlgorithm, HashError, ObjectId};

enum State {
    Sha1(Box<sha1_checked::Sha1>),
    Sha256(sha2::Sha256),
}

/// Incremental hasher producing an [`ObjectId`].
///
/// Also used for pack trailers, which are a plain digest of the
/// preceding bytes rather than an object hash.
pub struct Hasher {
    state: State,
}

impl Hasher {
    pub fn new(algo: HashAlgorithm) -> Self {
        let state = match algo {
            HashAlgorithm::Sha1 => State::Sha1(Box::new(sha1_checked::Sha1::new())),
            HashAlgorithm::Sha256 => State::Sha256(sha2::Sha256::new()),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            State::Sha1(h) => h.update(data),
            State::Sha256(h) => h.update(data),
        }
    }

    /// Finish the digest. Fails only when SHA-1 collision detection fires.
    pub fn finalize(self) -> Result<ObjectId, HashError> {
        match self.state {
            State::Sha1(h) => {
                let result = h.try_finalize();
                if result.has_collision() {
                    return Err(HashError::Sha1Collision);
                }
                ObjectId::from_bytes(result.hash().as_slice(), HashAlgorithm::Sha1)
            }
            State::Sha256(h) => ObjectId::from_bytes(h.finalize().as_slice(), HashAlgorithm::Sha256),
        }
    }

    pub fn digest(algo: HashAlgorithm, data: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::new(algo);
        h.update(data);
        h.finalize()
    }

    /// Object id of `data` stored as `kind`: the digest of
    /// `"<kind> <len>\0<data>"`.
    pub fn hash_object(algo: HashAlgorithm, kind: &str, data: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::new(algo);
        h.update(format!("{kind} {}\0", data.len()).as_bytes());
        h.update(data);
        h.finalize()
    }
}

impl io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
