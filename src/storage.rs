//! Storage Module
//!
//! The storage adapter: batched read/write/delete of typed state over string
//! keys, with ETag-based optimistic concurrency.
//!
//! ## Responsibilities
//! - Encode values with their type discriminator, decode them back
//! - Reject writes whose ETag no longer matches the stored one
//! - Mint a fresh ETag for every versioned value written
//! - Open one engine handle per operation and always release it

use std::borrow::Borrow;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::cancel::CancellationToken;
use crate::codec;
use crate::config::Config;
use crate::engine::{Backend, Document, DocumentEngine, FileBackend, Query};
use crate::error::{Result, StoreError};
use crate::etag::ETagSource;
use crate::item::{StoreValue, ETAG_WILDCARD};

/// Collection holding every record
pub const COLLECTION: &str = "storage";

/// Keyed state storage
///
/// ## Concurrency Model: one lock, whole operation
///
/// Every read, write and delete holds `state` from before its engine handle is
/// opened until after it is closed. This makes the ETag check and the write
/// that follows it atomic with respect to every other call on this instance.
/// Share an instance between threads with `Arc`.
///
/// Only one `Storage` may use a given store file at a time.
pub struct Storage<T, B = FileBackend> {
    backend: B,

    /// Serializes all operations; owns the ETag source
    state: Mutex<ETagSource>,

    _marker: PhantomData<fn() -> T>,
}

impl<T: StoreValue> Storage<T, FileBackend> {
    /// Open a store on the file named by `config`
    pub fn open(config: Config) -> Result<Self> {
        Ok(Self::with_backend(FileBackend::new(config)?))
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified store file
    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(Config::builder().database_path(path).build())
    }

    /// Store file location
    pub fn path(&self) -> &Path {
        self.backend.path()
    }
}

impl<T: StoreValue, B: Backend> Storage<T, B> {
    pub fn with_backend(backend: B) -> Self {
        Self {
            backend,
            state: Mutex::new(ETagSource::new()),
            _marker: PhantomData,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Read the values stored under `keys`
    ///
    /// Keys with no record, or whose record holds `null`, are left out of the
    /// result.
    pub fn read<I, K>(
        &self,
        keys: I,
        cancel: Option<&CancellationToken>,
    ) -> Result<HashMap<String, T>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys = collect_keys(keys)?;
        let _guard = self.acquire(cancel)?;

        let mut engine = self.backend.open()?;
        let mut items = HashMap::with_capacity(keys.len());

        for key in keys {
            if let Some(value) = Self::load(&mut engine, &key)? {
                trace!(key = %key, "Read record");
                items.insert(key, value);
            }
        }

        engine.close()?;
        debug!(found = items.len(), "Read batch complete");
        Ok(items)
    }

    /// Write `changes`, in iteration order
    ///
    /// Steps per entry:
    /// 1. Load the stored ETag, if the stored value is versioned
    /// 2. Reject a versioned value whose ETag is set, not `"*"`, and differs
    /// 3. Stamp a fresh ETag on a copy of the value and encode it
    /// 4. Upsert
    ///
    /// The first conflict aborts the batch. Entries before it stay written.
    /// Values passed in are never modified; re-read to observe new ETags.
    pub fn write<I, K, V>(&self, changes: I, cancel: Option<&CancellationToken>) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Borrow<T>,
    {
        let changes = changes
            .into_iter()
            .map(|(key, value)| Ok((checked_key(key.as_ref())?, value)))
            .collect::<Result<Vec<_>>>()?;

        let mut tags = self.acquire(cancel)?;
        let mut engine = self.backend.open()?;
        let batch_len = changes.len();

        for (key, value) in changes {
            let value: &T = value.borrow();

            let stored = Self::load(&mut engine, &key)?
                .as_ref()
                .and_then(codec::stored_e_tag);

            if let Some((presented, stored)) = Self::conflict(value, stored) {
                warn!(key = %key, presented = %presented, stored = %stored, "ETag conflict");
                // Dropping finishes the handle; a failure there is logged, not returned
                drop(engine);
                return Err(StoreError::Conflict {
                    key,
                    presented,
                    stored,
                });
            }

            let mut value = value.clone();
            if let Some(item) = value.as_store_item_mut() {
                item.set_e_tag(Some(tags.next_tag()));
            }

            let content = codec::encode(&value)?;
            let inserted = engine.upsert(COLLECTION, Document::new(key.clone(), content))?;
            trace!(key = %key, inserted, "Wrote record");
        }

        engine.close()?;
        debug!(
            written = batch_len,
            minted = tags.minted(),
            "Write batch complete"
        );
        Ok(())
    }

    /// Delete the records stored under `keys`; missing keys are ignored
    pub fn delete<I, K>(&self, keys: I, cancel: Option<&CancellationToken>) -> Result<()>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys = collect_keys(keys)?;
        let _guard = self.acquire(cancel)?;

        let mut engine = self.backend.open()?;
        let mut removed = 0;

        for key in &keys {
            removed += engine.delete(COLLECTION, &Query::id(key.as_str()))?;
        }

        engine.close()?;
        debug!(requested = keys.len(), removed, "Delete batch complete");
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Take the operation lock, honouring cancellation on both sides of the wait
    fn acquire(&self, cancel: Option<&CancellationToken>) -> Result<MutexGuard<'_, ETagSource>> {
        check_cancelled(cancel)?;
        let guard = self.state.lock();
        check_cancelled(cancel)?;
        Ok(guard)
    }

    /// Decode the record stored under `key`, if any
    fn load(engine: &mut B::Handle, key: &str) -> Result<Option<T>> {
        let Some(doc) = engine.find(COLLECTION, &Query::id(key))?.into_iter().next() else {
            return Ok(None);
        };

        codec::decode(&doc.content).map_err(|e| match e {
            StoreError::Serialization(msg) => {
                StoreError::Serialization(format!("key {:?}: {}", key, msg))
            }
            other => other,
        })
    }

    /// `(presented, stored)` when writing `value` over `stored` must be refused
    fn conflict(value: &T, stored: Option<String>) -> Option<(String, String)> {
        let presented = value
            .as_store_item()?
            .e_tag()
            .filter(|tag| !tag.is_empty() && *tag != ETAG_WILDCARD)?;
        let stored = stored?;

        (presented != stored).then(|| (presented.to_string(), stored))
    }
}

fn check_cancelled(cancel: Option<&CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(StoreError::Cancelled),
        _ => Ok(()),
    }
}

fn checked_key(key: &str) -> Result<String> {
    if key.is_empty() {
        return Err(StoreError::InvalidArgument(
            "keys must not be empty".to_string(),
        ));
    }
    Ok(key.to_string())
}

fn collect_keys<I, K>(keys: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    keys.into_iter().map(|key| checked_key(key.as_ref())).collect()
}
