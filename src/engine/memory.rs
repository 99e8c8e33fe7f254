//! In-memory document engine
//!
//! Every handle opened from the same [`MemoryBackend`] sees the same data.
//! Nothing is persisted.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

use super::{Backend, Document, DocumentEngine, Query};

type Collections = BTreeMap<String, BTreeMap<String, String>>;

/// Shared in-memory store. Clone-friendly via Arc.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    collections: Arc<Mutex<Collections>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Documents currently held in `collection`
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

impl Backend for MemoryBackend {
    type Handle = MemoryEngine;

    fn open(&self) -> Result<MemoryEngine> {
        Ok(MemoryEngine {
            collections: Arc::clone(&self.collections),
        })
    }
}

/// Handle on a [`MemoryBackend`]
pub struct MemoryEngine {
    collections: Arc<Mutex<Collections>>,
}

impl DocumentEngine for MemoryEngine {
    fn upsert(&mut self, collection: &str, doc: Document) -> Result<bool> {
        let previous = self
            .collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id, doc.content);
        Ok(previous.is_none())
    }

    fn delete(&mut self, collection: &str, query: &Query) -> Result<usize> {
        let mut collections = self.collections.lock();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        if let Some(id) = query.as_id() {
            return Ok(usize::from(docs.remove(id).is_some()));
        }

        let before = docs.len();
        docs.retain(|id, content| !query.matches(&Document::new(id.clone(), content.clone())));
        Ok(before - docs.len())
    }

    fn find(&mut self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let collections = self.collections.lock();
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        if let Some(id) = query.as_id() {
            return Ok(docs
                .get(id)
                .map(|content| vec![Document::new(id, content.clone())])
                .unwrap_or_default());
        }

        Ok(docs
            .iter()
            .map(|(id, content)| Document::new(id.clone(), content.clone()))
            .filter(|doc| query.matches(doc))
            .collect())
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}
