//! Configuration for keystate
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Store file used when no location is given
pub const DEFAULT_DATABASE_FILE: &str = "keystate.db";

/// Default number of superseded log frames tolerated before compaction
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 1024;

/// Main configuration for a keystate store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Location of the store file. Parent directories are created on open.
    pub database_path: PathBuf,

    // -------------------------------------------------------------------------
    // Engine Tuning
    // -------------------------------------------------------------------------
    /// Sync strategy: when appended log frames are fsynced
    pub sync_strategy: SyncStrategy,

    /// Superseded frames allowed in the log before it is rewritten on close.
    /// Compaction also requires dead frames to outnumber live records.
    pub compaction_threshold: usize,
}

/// Log sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync after every appended frame (safest, slowest)
    EveryWrite,

    /// fsync once when the engine handle is closed
    OnClose,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_FILE),
            sync_strategy: SyncStrategy::OnClose,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration before a store is opened against it
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(StoreError::Config(
                "database_path must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the store file location
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = path.into();
        self
    }

    /// Set the log sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Set how many superseded frames trigger compaction
    pub fn compaction_threshold(mut self, frames: usize) -> Self {
        self.config.compaction_threshold = frames;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
