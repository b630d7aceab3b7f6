//! Error kinds surfaced by the index core (spec section 7).

use thiserror::Error;

/// Error kinds returned by master-index, zone, dispatcher, state-machine and
/// replay operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Delta list (here: per-shard capacity) has no room for a new record.
    /// Benign: the caller drops the dedup hint and moves on.
    #[error("delta list overflow")]
    Overflow,

    /// Replay re-inserted a name that was already present. Benign during replay.
    #[error("duplicate name")]
    DuplicateName,

    /// `load_index` found no saved open chapter and the caller did not permit replay.
    #[error("index not saved cleanly: open chapter missing")]
    NotSavedCleanly,

    /// A chapter-boundary or lifecycle invariant was violated.
    #[error("corrupt component: {0}")]
    CorruptComponent(String),

    /// An on-disk page failed a structural check (e.g. index-page list-number gap).
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// `LOAD` or `REBUILD` was requested but no persisted state exists.
    #[error("no index")]
    NoIndex,

    /// Allocation failure. Fatal; never triggers a rebuild attempt.
    #[error("out of memory")]
    Oom,

    /// The embedder requested teardown (`FREEING`) while replay was in progress.
    #[error("shutting down")]
    ShuttingDown,

    /// The state machine was asked to do something invalid for its current state.
    #[error("bad state: {0}")]
    BadState(String),

    /// An unknown request action code.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("(de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl IndexError {
    /// `OVERFLOW` and `DUPLICATE_NAME` are benign: callers that encounter them
    /// (in particular the replay engine and `IndexZone::search`) swallow them
    /// and continue rather than aborting the surrounding operation.
    pub fn is_benign(&self) -> bool {
        matches!(self, IndexError::Overflow | IndexError::DuplicateName)
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
