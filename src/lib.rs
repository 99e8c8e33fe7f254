//! # keystate
//!
//! Keyed application-state storage with:
//! - Batched read/write/delete over string keys
//! - Optimistic concurrency through ETags (`"*"` overwrites unconditionally)
//! - Polymorphic values: each record carries a `$type` discriminator
//! - An embedded, append-only document log on disk
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Callers (threads)                        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                      Storage<T>                              │
//! │        (one lock per call · ETag check · ETag source)        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Codec    │          │   Backend   │
//!   │ ($type JSON)│          │ open/close  │
//!   └─────────────┘          └──────┬──────┘
//!                                   │
//!                                   ▼
//!                           ┌─────────────┐
//!                           │ FileEngine  │
//!                           │ (record log)│
//!                           └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use keystate::{Storage, StoreError};
//! use serde_json::json;
//!
//! # fn main() -> keystate::Result<()> {
//! let storage: Storage<serde_json::Value> = Storage::open_path("state.db")?;
//!
//! storage.write([("user/1", json!({"$type": "Profile", "e_tag": null}))], None)?;
//!
//! let mut items = storage.read(["user/1"], None)?;
//! let profile = items.remove("user/1").unwrap();
//!
//! // A second writer holding the same ETag would now be refused
//! storage.write([("user/1", &profile)], None)?;
//! match storage.write([("user/1", &profile)], None) {
//!     Err(StoreError::Conflict { .. }) => {}
//!     other => panic!("expected conflict, got {:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod cancel;
pub mod codec;
pub mod engine;
pub mod etag;
pub mod item;
pub mod storage;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cancel::CancellationToken;
pub use config::{Config, SyncStrategy};
pub use error::{Result, StoreError};
pub use item::{StoreItem, StoreValue, ETAG_FIELD, ETAG_WILDCARD, TYPE_FIELD};
pub use storage::Storage;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of keystate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
