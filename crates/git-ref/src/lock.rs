use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::RefError;

/// `<path>.lock`, created exclusively. Renamed over `<path>` on commit,
/// removed on drop otherwise.
pub(crate) struct LockFile {
    path: PathBuf,
    lock_path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl LockFile {
    pub(crate) fn acquire(path: &Path) -> Result<Self, RefError> {
        let mut lock_path = path.as_os_str().to_owned();
        lock_path.push(".lock");
        let lock_path = PathBuf::from(lock_path);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => RefError::Locked(lock_path.clone()),
                _ => RefError::IoPath {
                    path: lock_path.clone(),
                    source: e,
                },
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            lock_path,
            file: Some(file),
            committed: false,
        })
    }

    pub(crate) fn commit(mut self) -> Result<(), RefError> {
        let io_err = |source| RefError::IoPath {
            path: self.lock_path.clone(),
            source,
        };
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&self.lock_path, &self.path).map_err(io_err)?;
        self.committed = true;
        Ok(())
    }
}

impl Write for LockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}
