use std::path::Path;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by cache groups and the persistence layer.
///
/// The enum is `Clone` so that a single coalesced load can hand the same
/// failure to every waiter; non-clonable sources are shared behind an
/// [`Arc`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("key is required")]
    EmptyKey,

    #[error("group name is required")]
    EmptyGroupName,

    #[error("no such group: {0}")]
    GroupNotFound(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("loader error: {0}")]
    Loader(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("corrupt log record: {0}")]
    Decode(String),

    #[error("remote peer {addr}: {message}")]
    Remote { addr: String, message: String },

    #[error("peer picker already registered")]
    PickerAlreadyRegistered,

    #[error("persistence is not enabled")]
    PersistenceDisabled,
}

impl Error {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Error::Io {
            path: path.display().to_string(),
            source: Arc::new(source),
        }
    }
}
