//! Stored value traits
//!
//! [`StoreValue`] is what the adapter stores. A value may additionally expose
//! the [`StoreItem`] capability, which carries an ETag and opts the value into
//! optimistic concurrency checks.
//!
//! ## Example
//!
//! ```
//! use keystate::{StoreItem, StoreValue};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Profile {
//!     name: String,
//! }
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Cart {
//!     #[serde(default)]
//!     e_tag: Option<String>,
//!     items: Vec<String>,
//! }
//!
//! impl StoreItem for Cart {
//!     fn e_tag(&self) -> Option<&str> {
//!         self.e_tag.as_deref()
//!     }
//!     fn set_e_tag(&mut self, e_tag: Option<String>) {
//!         self.e_tag = e_tag;
//!     }
//! }
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! #[serde(tag = "$type")]
//! enum UserState {
//!     Profile(Profile),
//!     Cart(Cart),
//! }
//!
//! impl StoreValue for UserState {
//!     fn as_store_item(&self) -> Option<&dyn StoreItem> {
//!         match self {
//!             UserState::Cart(cart) => Some(cart),
//!             UserState::Profile(_) => None,
//!         }
//!     }
//!     fn as_store_item_mut(&mut self) -> Option<&mut dyn StoreItem> {
//!         match self {
//!             UserState::Cart(cart) => Some(cart),
//!             UserState::Profile(_) => None,
//!         }
//!     }
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Discriminator field every encoded value must carry
pub const TYPE_FIELD: &str = "$type";

/// Conventional ETag field name in encoded content
pub const ETAG_FIELD: &str = "e_tag";

/// ETag that skips the conflict check and overwrites unconditionally
pub const ETAG_WILDCARD: &str = "*";

/// Capability of carrying a version token
pub trait StoreItem {
    fn e_tag(&self) -> Option<&str>;

    fn set_e_tag(&mut self, e_tag: Option<String>);
}

/// A value the storage adapter can persist
///
/// The serialized form must be a JSON object carrying a string [`TYPE_FIELD`];
/// an internally tagged enum (`#[serde(tag = "$type")]`) does this for free.
pub trait StoreValue: Serialize + DeserializeOwned + Clone {
    /// The ETag capability, when this value has one
    fn as_store_item(&self) -> Option<&dyn StoreItem> {
        None
    }

    fn as_store_item_mut(&mut self) -> Option<&mut dyn StoreItem> {
        None
    }
}

/// Untyped documents. An object holding an [`ETAG_FIELD`] key is versioned.
impl StoreItem for Value {
    fn e_tag(&self) -> Option<&str> {
        self.get(ETAG_FIELD).and_then(Value::as_str)
    }

    fn set_e_tag(&mut self, e_tag: Option<String>) {
        if let Some(object) = self.as_object_mut() {
            object.insert(
                ETAG_FIELD.to_string(),
                e_tag.map(Value::String).unwrap_or(Value::Null),
            );
        }
    }
}

impl StoreValue for Value {
    fn as_store_item(&self) -> Option<&dyn StoreItem> {
        if self.get(ETAG_FIELD).is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn as_store_item_mut(&mut self) -> Option<&mut dyn StoreItem> {
        if self.get(ETAG_FIELD).is_some() {
            Some(self)
        } else {
            None
        }
    }
}
