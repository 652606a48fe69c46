//! Append-only JSON ledger of per-file outcomes.
//!
//! The whole ledger is rewritten on every append: the new snapshot goes to a
//! temporary file in the same directory, which is then renamed over the old
//! one. A reader therefore never observes a half-written ledger.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::models::{LedgerEntry, Outcome};

/// File-backed outcome ledger.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Open (and create if missing) the ledger at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let ledger = Self { path };
        if !ledger.path.exists() {
            ledger.write_all(&[])?;
            debug!("Created empty ledger at {}", ledger.path.display());
        }
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of every entry. A missing or malformed file reads as empty.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Ledger {} unreadable, treating as empty: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        if content.trim().is_empty() {
            return Vec::new();
        }

        match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Ledger {} is malformed, treating as empty: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Append one entry and persist the full set atomically.
    pub fn record(&self, entry: LedgerEntry) -> Result<(), LedgerError> {
        debug!(
            "Ledger: {} -> {} ({})",
            entry.file_name,
            entry.outcome,
            entry.message_id
        );
        let mut entries = self.entries();
        entries.push(entry);
        self.write_all(&entries)
    }

    /// True iff any recorded entry carries `hash`.
    pub fn contains_hash(&self, hash: &str) -> bool {
        self.entries()
            .iter()
            .any(|e| e.hash.as_deref() == Some(hash))
    }

    /// `candidate` if no entry uses it, otherwise the first free `stem(n).ext`.
    pub fn next_unique_name(&self, candidate: &str) -> String {
        let entries = self.entries();
        let taken = |name: &str| entries.iter().any(|e| e.file_name == name);

        if !taken(candidate) {
            return candidate.to_string();
        }

        let (stem, ext) = split_extension(candidate);
        let mut counter = 1u64;
        loop {
            let name = format!("{stem}({counter}){ext}");
            if !taken(&name) {
                return name;
            }
            counter += 1;
        }
    }

    /// Number of entries per outcome.
    pub fn outcome_counts(&self) -> BTreeMap<Outcome, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries() {
            *counts.entry(entry.outcome).or_insert(0) += 1;
        }
        counts
    }

    fn write_all(&self, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        let io_err = |source: std::io::Error| LedgerError::Io {
            path: self.path.display().to_string(),
            source,
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let content = serde_json::to_vec_pretty(entries)?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&content).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

/// Hex SHA-256 of a file's content, streamed.
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Split `name` into stem and extension (including the dot).
///
/// A leading dot does not start an extension: `.env` has no extension.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}
