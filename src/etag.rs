//! ETag source
//!
//! Mints version tokens of the form `<epoch hex>-<counter>`. The epoch is the
//! owning adapter's creation time in nanoseconds, so tokens stay distinct
//! across restarts against the same store file.

use std::time::{SystemTime, UNIX_EPOCH};

/// Per-adapter token generator
#[derive(Debug)]
pub struct ETagSource {
    epoch: u64,
    counter: u64,
}

impl ETagSource {
    pub fn new() -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self::with_epoch(epoch)
    }

    pub fn with_epoch(epoch: u64) -> Self {
        Self { epoch, counter: 0 }
    }

    /// Mint the next token
    pub fn next_tag(&mut self) -> String {
        self.counter += 1;
        format!("{:x}-{}", self.epoch, self.counter)
    }

    /// Tokens minted so far
    pub fn minted(&self) -> u64 {
        self.counter
    }
}

impl Default for ETagSource {
    fn default() -> Self {
        Self::new()
    }
}
