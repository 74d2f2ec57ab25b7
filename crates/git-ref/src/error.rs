use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum RefError {
    #[error("invalid ref name: {0}")]
    InvalidName(String),

    #[error("symbolic ref loop at {0}")]
    SymrefLoop(String),

    #[error("{name} changed concurrently: expected {expected}, found {actual}")]
    CasFailed {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("{} is locked by another writer", .0.display())]
    Locked(PathBuf),

    #[error("cannot create ref {name}: a file or directory is in the way")]
    DirectoryConflict {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed ref: {0}")]
    Parse(String),

    #[error("I/O error on {}: {source}", .path.display())]
    IoPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Hash(#[from] git_hash::HashError),
}
