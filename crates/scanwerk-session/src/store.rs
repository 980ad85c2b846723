// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Filesystem-shaped image-block store.
//
// One directory per session holds, per block number N (zero-padded), the
// raster file, the metadata document, and optionally the raw capture, plus
// a single sentinel file that marks end-of-job with a terminal status.
// End-of-job is always derived ("no outstanding blocks AND sentinel
// present"), never tracked by a separate counter, so polling it is
// idempotent at any rate.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use scanwerk_core::error::{Result, ScanwerkError};
use scanwerk_core::types::TerminalStatus;
use scanwerk_raster::{BlockMetadata, EncodedBlock};

/// Name of the end-of-job sentinel file inside the images directory.
const SENTINEL_FILE: &str = "endofjob";

/// One registered image block and the files backing it.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub metadata: BlockMetadata,
    pub raster_path: PathBuf,
    pub meta_path: PathBuf,
    pub raw_path: Option<PathBuf>,
    /// SHA-256 fingerprint of the raster container.
    pub sha256: String,
}

/// Ordered map from block number to its artifacts, backed by one directory.
#[derive(Debug)]
pub struct ImageBlockStore {
    dir: PathBuf,
    blocks: BTreeMap<u32, BlockEntry>,
}

impl ImageBlockStore {
    /// Create an empty store, wiping any leftovers from a previous session
    /// that used the same directory.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        info!("image-block store created");
        Ok(Self {
            dir,
            blocks: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a freshly encoded block. The number only becomes visible to
    /// clients through this call, after all its files are fully written.
    pub fn register(&mut self, block: EncodedBlock) -> Result<()> {
        let number = block.number;
        let container = fs::read(&block.raster_path)?;
        let entry = BlockEntry {
            metadata: block.metadata,
            raster_path: block.raster_path,
            meta_path: block.meta_path,
            raw_path: block.raw_path,
            sha256: hash_bytes(&container),
        };
        debug!(number, sha256 = %entry.sha256, "image block registered");
        self.blocks.insert(number, entry);
        Ok(())
    }

    /// Currently available block numbers, ascending.
    pub fn numbers(&self) -> Vec<u32> {
        self.blocks.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry(&self, number: u32) -> Option<&BlockEntry> {
        self.blocks.get(&number)
    }

    /// Path of the raster file for block `number`.
    pub fn raster_path(&self, number: u32) -> Result<PathBuf> {
        self.blocks
            .get(&number)
            .map(|e| e.raster_path.clone())
            .ok_or(ScanwerkError::InvalidImageBlockNumber { number })
    }

    /// Path of the metadata document for block `number`.
    pub fn metadata_path(&self, number: u32) -> Result<PathBuf> {
        self.blocks
            .get(&number)
            .map(|e| e.meta_path.clone())
            .ok_or(ScanwerkError::InvalidImageBlockNumber { number })
    }

    /// Delete every artifact for blocks in the inclusive range, ignoring
    /// numbers that do not exist. Always succeeds.
    #[instrument(skip(self))]
    pub fn release_range(&mut self, first: u32, last: u32) {
        for number in first..=last {
            let Some(entry) = self.blocks.remove(&number) else {
                continue;
            };
            remove_quietly(&entry.raster_path);
            remove_quietly(&entry.meta_path);
            if let Some(raw) = &entry.raw_path {
                remove_quietly(raw);
            }
            debug!(number, "image block released");
        }
    }

    // -- End-of-job sentinel --------------------------------------------------

    fn sentinel_path(&self) -> PathBuf {
        self.dir.join(SENTINEL_FILE)
    }

    /// Write the sentinel with the job's terminal status.
    pub fn write_sentinel(&self, status: TerminalStatus) -> Result<()> {
        fs::write(self.sentinel_path(), status.as_str())?;
        info!(status = status.as_str(), "end-of-job sentinel written");
        Ok(())
    }

    /// Read the sentinel, if the job has ended.
    pub fn sentinel(&self) -> Option<TerminalStatus> {
        let text = fs::read_to_string(self.sentinel_path()).ok()?;
        TerminalStatus::parse(text.trim())
    }

    /// Remove a stale sentinel before a new capture run.
    pub fn clear_sentinel(&self) -> Result<()> {
        let path = self.sentinel_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Whether the job is over from the client's point of view: the capture
    /// collaborator has signalled completion and no blocks remain.
    pub fn end_of_job(&self) -> bool {
        self.blocks.is_empty() && self.sentinel().is_some()
    }

    /// Tear down the whole store: every block, the sentinel, the directory.
    #[instrument(skip_all, fields(dir = %self.dir.display()))]
    pub fn purge(&mut self) {
        self.blocks.clear();
        if self.dir.exists() {
            if let Err(err) = fs::remove_dir_all(&self.dir) {
                warn!(%err, "failed to remove images directory");
            }
        }
        info!("image-block store purged");
    }
}

/// Compute the SHA-256 of `data` as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        // Releasing is best-effort: a missing file is already released.
        warn!(path = %path.display(), %err, "could not remove block artifact");
    }
}
