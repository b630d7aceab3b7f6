//! The exposed request record and its action/location enums (spec section 6).

use crate::name::ChunkName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Index,
    Update,
    Query,
    Delete,
}

/// Output: where a resolved record actually lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Unavailable,
    InOpenChapter,
    InDense,
    InSparse,
}

/// Opaque per-record payload the embedder attaches to a name. The core never
/// interprets the bytes; it only carries them between the caller and the
/// open chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMetadata(pub Vec<u8>);

impl RecordMetadata {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        RecordMetadata(bytes.into())
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub name: ChunkName,
    pub zone_number: u32,
    pub action: Action,
    pub update: bool,
    pub requeued: bool,
    pub new_metadata: RecordMetadata,
    pub old_metadata: RecordMetadata,
    pub location: Location,
}

impl Request {
    pub fn new(name: ChunkName, action: Action) -> Self {
        Request {
            name,
            zone_number: 0,
            action,
            update: false,
            requeued: false,
            new_metadata: RecordMetadata::default(),
            old_metadata: RecordMetadata::default(),
            location: Location::Unavailable,
        }
    }

    pub fn query(name: ChunkName) -> Self {
        Request::new(name, Action::Query)
    }

    pub fn index(name: ChunkName, metadata: RecordMetadata) -> Self {
        let mut r = Request::new(name, Action::Index);
        r.new_metadata = metadata;
        r
    }

    pub fn delete(name: ChunkName) -> Self {
        Request::new(name, Action::Delete)
    }

    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }
}
