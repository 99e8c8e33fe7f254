//! File-backed document engine
//!
//! Every mutation is appended to a single log file as a checksummed frame.
//! Opening a handle replays the log into an ordered in-memory map, so lookups
//! never touch the disk. Closing a handle syncs the log and, when enough
//! frames have been superseded, rewrites it with only the live documents.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{info, trace, warn};

use crate::config::{Config, SyncStrategy};
use crate::error::{Result, StoreError};

use super::record::{check_header, encode_header, Decoded, LogOp, FRAME_HEADER_SIZE, HEADER_SIZE};
use super::{Backend, Document, DocumentEngine, Query};

/// Result of replaying the log when a handle is opened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of frames successfully replayed
    pub frames_replayed: u64,

    /// Bytes cut from the end of the log (partial or torn final write)
    pub bytes_truncated: u64,

    /// Whether the log was truncated
    pub was_truncated: bool,
}

type Collections = BTreeMap<String, BTreeMap<String, String>>;

/// An open handle on a store file
///
/// ## Concurrency:
/// A handle assumes it is the only one open on its file. The storage adapter
/// guarantees this by opening handles under its own lock.
pub struct FileEngine {
    /// Store file location
    path: PathBuf,

    /// Log file, positioned at the end for appends
    writer: BufWriter<File>,

    /// Replayed state: collection → (_id → content)
    collections: Collections,

    /// Frames currently in the log (header excluded)
    frame_count: usize,

    sync_strategy: SyncStrategy,
    compaction_threshold: usize,

    /// Unsynced frames pending
    dirty: bool,

    /// Set once `finish` has run
    closed: bool,

    recovery: RecoveryResult,
}

impl FileEngine {
    /// Open or create the store file named by `config`
    ///
    /// On open:
    /// 1. Create parent directories and the file if missing
    /// 2. Validate the header
    /// 3. Replay frames, truncating a partial or torn final frame
    /// 4. Position for appends
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let path = config.database_path.clone();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        // A fresh file, or one whose header write never completed
        let header = encode_header();
        if data.len() < HEADER_SIZE && header.starts_with(&data) {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header)?;
            file.sync_all()?;
            data = header.to_vec();
        }
        check_header(&data)?;

        let (collections, valid_len, recovery) = Self::replay(&data)?;

        if recovery.was_truncated {
            warn!(
                path = %path.display(),
                bytes = recovery.bytes_truncated,
                "Truncating partial frame at end of store file"
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }

        file.seek(SeekFrom::End(0))?;

        trace!(
            path = %path.display(),
            frames = recovery.frames_replayed,
            "Opened store file"
        );

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            collections,
            frame_count: recovery.frames_replayed as usize,
            sync_strategy: config.sync_strategy,
            compaction_threshold: config.compaction_threshold,
            dirty: false,
            closed: false,
            recovery,
        })
    }

    /// Replay every frame after the header
    ///
    /// Returns the state, the length of the valid prefix, and recovery stats.
    /// Only damage confined to the final frame is treated as a torn write;
    /// anything followed by more data is `Corruption`.
    fn replay(data: &[u8]) -> Result<(Collections, usize, RecoveryResult)> {
        let mut collections = Collections::new();
        let mut recovery = RecoveryResult::default();
        let mut pos = HEADER_SIZE;

        while pos < data.len() {
            match LogOp::decode(&data[pos..])? {
                Decoded::Frame(op, len) => {
                    trace!(
                        offset = pos,
                        collection = op.collection(),
                        id = op.id(),
                        "Replayed frame"
                    );
                    Self::apply(&mut collections, op);
                    recovery.frames_replayed += 1;
                    pos += len;
                }
                Decoded::Incomplete => break,
                Decoded::BadLength => {
                    if data.len() - pos < FRAME_HEADER_SIZE {
                        // Frame header itself was cut short
                        break;
                    }
                    return Err(StoreError::Corruption(format!(
                        "Length checksum mismatch in frame at offset {}",
                        pos
                    )));
                }
                Decoded::BadChecksum { frame_len } => {
                    if pos + frame_len == data.len() {
                        // Torn final write
                        break;
                    }
                    return Err(StoreError::Corruption(format!(
                        "Checksum mismatch in frame at offset {}",
                        pos
                    )));
                }
            }
        }

        if pos < data.len() {
            recovery.was_truncated = true;
            recovery.bytes_truncated = (data.len() - pos) as u64;
        }

        Ok((collections, pos, recovery))
    }

    fn apply(collections: &mut Collections, op: LogOp) {
        match op {
            LogOp::Upsert {
                collection,
                id,
                content,
            } => {
                collections.entry(collection).or_default().insert(id, content);
            }
            LogOp::Delete { collection, id } => {
                if let Some(docs) = collections.get_mut(&collection) {
                    docs.remove(&id);
                }
            }
        }
    }

    fn append(&mut self, op: &LogOp) -> Result<()> {
        let frame = op.encode()?;
        self.writer.write_all(&frame)?;
        self.frame_count += 1;

        match self.sync_strategy {
            SyncStrategy::EveryWrite => {
                self.writer.flush()?;
                self.writer.get_ref().sync_data()?;
            }
            SyncStrategy::OnClose => self.dirty = true,
        }

        Ok(())
    }

    /// Flush, sync, and compact if due. Runs at most once.
    fn finish(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.writer.flush()?;
        if self.dirty {
            self.writer.get_ref().sync_data()?;
            self.dirty = false;
        }

        let dead = self.dead_frames();
        if dead >= self.compaction_threshold && dead > self.live_count() {
            self.compact()?;
        }

        Ok(())
    }

    /// Rewrite the log with one upsert frame per live document
    fn compact(&mut self) -> Result<()> {
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".compact");
        let tmp_path = PathBuf::from(tmp_name);

        let before = self.frame_count;
        {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&encode_header())?;

            for (collection, docs) in &self.collections {
                for (id, content) in docs {
                    let op = LogOp::Upsert {
                        collection: collection.clone(),
                        id: id.clone(),
                        content: content.clone(),
                    };
                    writer.write_all(&op.encode()?)?;
                }
            }

            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)?;
        sync_parent_dir(&self.path)?;
        self.frame_count = self.live_count();

        info!(
            path = %self.path.display(),
            frames_before = before,
            frames_after = self.frame_count,
            "Compacted store file"
        );

        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Store file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What replay found when this handle was opened
    pub fn recovery(&self) -> &RecoveryResult {
        &self.recovery
    }

    /// Live documents across all collections
    pub fn live_count(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    /// Frames in the log that no longer describe a live document
    pub fn dead_frames(&self) -> usize {
        self.frame_count.saturating_sub(self.live_count())
    }
}

impl DocumentEngine for FileEngine {
    fn upsert(&mut self, collection: &str, doc: Document) -> Result<bool> {
        self.append(&LogOp::Upsert {
            collection: collection.to_string(),
            id: doc.id.clone(),
            content: doc.content.clone(),
        })?;

        let previous = self
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id, doc.content);

        Ok(previous.is_none())
    }

    fn delete(&mut self, collection: &str, query: &Query) -> Result<usize> {
        let ids: Vec<String> = self
            .find(collection, query)?
            .into_iter()
            .map(|doc| doc.id)
            .collect();

        for id in &ids {
            self.append(&LogOp::Delete {
                collection: collection.to_string(),
                id: id.clone(),
            })?;
            if let Some(docs) = self.collections.get_mut(collection) {
                docs.remove(id);
            }
        }

        Ok(ids.len())
    }

    fn find(&mut self, collection: &str, query: &Query) -> Result<Vec<Document>> {
        let Some(docs) = self.collections.get(collection) else {
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

    fn close(mut self) -> Result<()> {
        self.finish()
    }
}

impl Drop for FileEngine {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(path = %self.path.display(), error = %e, "Failed to close store file");
        }
    }
}

/// Persist a rename by syncing the directory holding `path`
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

/// Opens [`FileEngine`] handles on one store file
#[derive(Debug, Clone)]
pub struct FileBackend {
    config: Config,
}

impl FileBackend {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Store file location
    pub fn path(&self) -> &Path {
        &self.config.database_path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Backend for FileBackend {
    type Handle = FileEngine;

    fn open(&self) -> Result<FileEngine> {
        FileEngine::open(&self.config)
    }
}
