// src/core/cache.rs

//! Persisted results of previous configure runs.
//!
//! One file per configuration identity (the architecture name). Each entry maps
//! a module name to the fingerprint its facts were computed under; an entry is
//! reused only while the fingerprint of the current run matches.

use crate::constants::{CACHE_FORMAT_VERSION, RESULT_CACHE_FILENAME};
use crate::core::graph::DependencyGraph;
use crate::models::Facts;
use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

const HASH_TRUNCATE_LENGTH: usize = 16; // 16 bytes = 32 hex characters

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to write result cache '{path}': {reason}")]
    Write { path: PathBuf, reason: String },
}

/// The on-disk layout.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CacheSnapshot {
    pub format_version: u32,
    /// The configuration identity the entries belong to.
    pub identity: String,
    pub entries: BTreeMap<String, CacheEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub facts: Facts,
}

/// Answer of [`ResultCache::lookup`].
#[derive(Debug, PartialEq)]
pub enum Lookup<'a> {
    Hit(&'a Facts),
    /// An entry exists but was computed under different inputs.
    Stale,
    Miss,
}

/// Computes a module's fingerprint from its name, the option values it reads
/// and the fingerprints of its dependencies.
pub fn fingerprint(module: &str, inputs: &[(String, String)], upstream: &[(&str, &str)]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(module.as_bytes());
    hasher.update(b"\0inputs\0");
    let mut inputs: Vec<&(String, String)> = inputs.iter().collect();
    inputs.sort();
    for (key, value) in inputs {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(b"\0upstream\0");
    let mut upstream = upstream.to_vec();
    upstream.sort();
    for (name, print) in upstream {
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(print.as_bytes());
        hasher.update(b"\0");
    }
    let hash = hasher.finalize();
    hex::encode(&hash.as_bytes()[..HASH_TRUNCATE_LENGTH])
}

/// The result cache of one configuration identity.
#[derive(Debug)]
pub struct ResultCache {
    path: PathBuf,
    snapshot: CacheSnapshot,
    dirty: bool,
}

impl ResultCache {
    /// An empty cache that will be saved to `dir`.
    pub fn empty(dir: &Path, identity: &str) -> Self {
        Self {
            path: dir.join(RESULT_CACHE_FILENAME),
            snapshot: CacheSnapshot {
                format_version: CACHE_FORMAT_VERSION,
                identity: identity.to_string(),
                entries: BTreeMap::new(),
            },
            dirty: false,
        }
    }

    /// Loads the cache from `dir`. Missing, corrupt or incompatible files and
    /// files written for another identity all yield an empty cache.
    pub fn open(dir: &Path, identity: &str) -> Self {
        let mut cache = Self::empty(dir, identity);
        if !cache.path.exists() {
            debug!("No result cache at '{}'", cache.path.display());
            return cache;
        }
        match read_snapshot(&cache.path) {
            Ok(snapshot) if snapshot.format_version != CACHE_FORMAT_VERSION => {
                warn!(
                    "Result cache '{}' has format version {} (expected {}); starting empty",
                    cache.path.display(),
                    snapshot.format_version,
                    CACHE_FORMAT_VERSION
                );
            }
            Ok(snapshot) if snapshot.identity != identity => {
                warn!(
                    "Result cache '{}' belongs to configuration '{}', not '{}'; starting empty",
                    cache.path.display(),
                    snapshot.identity,
                    identity
                );
            }
            Ok(snapshot) => {
                debug!(
                    "Loaded {} cached module results from '{}'",
                    snapshot.entries.len(),
                    cache.path.display()
                );
                cache.snapshot = snapshot;
            }
            Err(e) => {
                warn!(
                    "Discarding unreadable result cache '{}': {:#}",
                    cache.path.display(),
                    e
                );
            }
        }
        cache
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> &str {
        &self.snapshot.identity
    }

    pub fn len(&self) -> usize {
        self.snapshot.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.entries.is_empty()
    }

    pub fn lookup(&self, module: &str, fingerprint: &str) -> Lookup<'_> {
        match self.snapshot.entries.get(module) {
            Some(entry) if entry.fingerprint == fingerprint => Lookup::Hit(&entry.facts),
            Some(_) => Lookup::Stale,
            None => Lookup::Miss,
        }
    }

    pub fn store(&mut self, module: &str, fingerprint: &str, facts: &Facts) {
        self.snapshot.entries.insert(
            module.to_string(),
            CacheEntry {
                fingerprint: fingerprint.to_string(),
                facts: facts.clone(),
            },
        );
        self.dirty = true;
    }

    pub fn invalidate(&mut self, module: &str) -> bool {
        let removed = self.snapshot.entries.remove(module).is_some();
        self.dirty |= removed;
        removed
    }

    /// Drops the entries of `root` and of every module that transitively
    /// depends on it. Returns the affected vertices, `root` first.
    pub fn invalidate_subtree<V, F>(&mut self, graph: &DependencyGraph<V>, root: V, name_of: F) -> Vec<V>
    where
        V: Copy + Eq + std::hash::Hash + std::fmt::Debug,
        F: Fn(V) -> String,
    {
        let affected = graph.depth_first_visit(root);
        for &vertex in &affected {
            let name = name_of(vertex);
            if self.invalidate(&name) {
                debug!("Invalidated cached result of '{}'", name);
            }
        }
        affected
    }

    /// Writes the cache if anything changed since it was opened.
    pub fn save(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        write_snapshot(&self.path, &self.snapshot).map_err(|e| CacheError::Write {
            path: self.path.clone(),
            reason: format!("{:#}", e),
        })?;
        self.dirty = false;
        Ok(())
    }
}

/// Reads, decompresses and decodes a snapshot file.
fn read_snapshot(path: &Path) -> Result<CacheSnapshot> {
    let compressed_bytes = fs::read(path)
        .with_context(|| format!("Failed to read cache file at '{}'", path.display()))?;
    if compressed_bytes.is_empty() {
        return Err(anyhow!("Cache file is empty."));
    }

    log::trace!("Decompressing result cache from {} bytes.", compressed_bytes.len());
    let decompressed_bytes = lz4_flex::decompress_size_prepended(&compressed_bytes)
        .map_err(|e| anyhow!("Failed to decompress cache file: {}. It might be corrupt.", e))?;

    let (snapshot, _): (CacheSnapshot, usize) =
        bincode::serde::decode_from_slice(&decompressed_bytes, bincode::config::standard())
            .context("Failed to deserialize result cache. It was likely written by an incompatible version.")?;
    Ok(snapshot)
}

/// Encodes and compresses a snapshot, replacing the file atomically.
fn write_snapshot(path: &Path, snapshot: &CacheSnapshot) -> Result<()> {
    let parent_dir = path
        .parent()
        .ok_or_else(|| anyhow!("Cache path '{}' has no parent directory", path.display()))?;
    fs::create_dir_all(parent_dir).with_context(|| {
        format!("Failed to create cache directory '{}'", parent_dir.display())
    })?;

    let raw_bytes = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())
        .context("Failed to serialize result cache.")?;
    let compressed_bytes = lz4_flex::compress_prepend_size(&raw_bytes);
    log::trace!(
        "Compressed result cache from {} to {} bytes.",
        raw_bytes.len(),
        compressed_bytes.len()
    );

    let mut temp = tempfile::NamedTempFile::new_in(parent_dir)
        .with_context(|| format!("Failed to create a temporary file in '{}'", parent_dir.display()))?;
    temp.write_all(&compressed_bytes)
        .context("Failed to write result cache contents")?;
    temp.persist(path)
        .map_err(|e| anyhow!("Failed to move result cache into place: {}", e.error))?;
    Ok(())
}
