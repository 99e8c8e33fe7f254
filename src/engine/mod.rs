//! Engine Module
//!
//! Embedded document engine consumed by the storage adapter.
//!
//! ## Responsibilities
//! - Hold documents in named collections, unique by `_id`
//! - Upsert, delete-by-query, and find-by-query
//! - Per-operation handle lifecycle (open → work → close)
//!
//! ## Implementations
//! - [`FileEngine`]: append-only record log, replayed on open
//! - [`MemoryEngine`]: shared in-process map (tests, ephemeral state)
//!
//! ## Log File Format
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Header                                               │
//! │ ┌───────────┬────────────┐                           │
//! │ │ Magic (4) │ Version(2) │                           │
//! │ └───────────┴────────────┘                           │
//! ├──────────────────────────────────────────────────────┤
//! │ Frame 1                                              │
//! │ ┌─────────┬────────────┬─────────┬────────────────┐  │
//! │ │ Len (4) │ LenCRC (4) │ CRC (4) │ bincode(LogOp) │  │
//! │ └─────────┴────────────┴─────────┴────────────────┘  │
//! ├──────────────────────────────────────────────────────┤
//! │ Frame 2 ...                                          │
//! └──────────────────────────────────────────────────────┘
//! ```

mod file;
mod memory;
mod record;

pub use file::{FileBackend, FileEngine, RecoveryResult};
pub use memory::{MemoryBackend, MemoryEngine};
pub use record::{Decoded, LogOp, FORMAT_VERSION, FRAME_HEADER_SIZE, HEADER_SIZE, MAGIC};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Primary-key field of every document
pub const ID_FIELD: &str = "_id";

/// Field holding the adapter's encoded payload
pub const CONTENT_FIELD: &str = "content";

/// A stored document: primary key plus opaque content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }

    /// Value of a named field, if the document has it
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            ID_FIELD => Some(&self.id),
            CONTENT_FIELD => Some(&self.content),
            _ => None,
        }
    }
}

/// Query predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Field equals a literal string
    Eq { field: String, value: String },
}

impl Query {
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Shorthand for an equality test on the primary key
    pub fn id(value: impl Into<String>) -> Self {
        Self::equals(ID_FIELD, value)
    }

    /// The primary key this query pins down, if it is an `_id` equality
    pub fn as_id(&self) -> Option<&str> {
        match self {
            Query::Eq { field, value } if field == ID_FIELD => Some(value),
            _ => None,
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Query::Eq { field, value } => doc.field(field) == Some(value.as_str()),
        }
    }
}

/// An open engine handle
///
/// Handles are short-lived: the adapter opens one per operation and closes it
/// before returning. Dropping a handle without `close()` must still release it.
pub trait DocumentEngine {
    /// Insert or replace the document with the same `_id`.
    /// Returns `true` when no document with that id existed.
    fn upsert(&mut self, collection: &str, doc: Document) -> Result<bool>;

    /// Delete every matching document, returning how many were removed
    fn delete(&mut self, collection: &str, query: &Query) -> Result<usize>;

    /// All matching documents, in `_id` order
    fn find(&mut self, collection: &str, query: &Query) -> Result<Vec<Document>>;

    /// Flush and release the handle
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Opens engine handles
pub trait Backend: Send + Sync {
    type Handle: DocumentEngine;

    fn open(&self) -> Result<Self::Handle>;
}
