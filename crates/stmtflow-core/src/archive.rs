//! Zip archive detection and expansion.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::ArchiveError;

/// Local file header and empty-archive end-of-directory signatures.
const ZIP_SIGNATURES: [[u8; 4]; 2] = [*b"PK\x03\x04", *b"PK\x05\x06"];

/// Member present in every Office Open XML container.
const OOXML_MARKER: &str = "[Content_Types].xml";

/// Basenames of operating system metadata files.
const NOISE_FILES: [&str; 3] = [".DS_Store", "Thumbs.db", "desktop.ini"];

/// Extensions worth classifying after expansion.
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["pdf", "doc", "docx", "csv", "xls", "xlsx"];

/// Expands zip attachments into scratch directories.
#[derive(Debug, Clone, Default)]
pub struct ArchiveExpander;

impl ArchiveExpander {
    pub fn new() -> Self {
        Self
    }

    /// Detect a zip archive by its leading signature.
    ///
    /// Office documents share the zip container format but are documents, not
    /// archives, and are reported as `false`.
    pub fn is_archive(&self, path: &Path) -> bool {
        let mut header = [0u8; 4];
        let has_signature = File::open(path)
            .and_then(|mut f| f.read_exact(&mut header))
            .map(|_| ZIP_SIGNATURES.contains(&header))
            .unwrap_or(false);

        if !has_signature {
            return false;
        }

        match File::open(path).map(ZipArchive::new) {
            Ok(Ok(archive)) => !archive.file_names().any(|n| n == OOXML_MARKER),
            // Corrupt directories are still archives; expansion reports them.
            _ => true,
        }
    }

    /// Expand `path` into `dest_dir`, returning the extracted regular files.
    ///
    /// A malformed archive yields an empty list.
    pub fn expand(&self, path: &Path, dest_dir: &Path) -> Vec<PathBuf> {
        match self.try_expand(path, dest_dir) {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to expand {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Expand `path` into `dest_dir`, reporting corruption as an error.
    ///
    /// Directory entries, macOS resource forks and OS metadata files are not
    /// extracted. Members whose names would escape `dest_dir` are skipped.
    pub fn try_expand(&self, path: &Path, dest_dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
        fs::create_dir_all(dest_dir)?;
        let mut archive = ZipArchive::new(File::open(path)?)?;
        info!("Archive {} contains {} entries", path.display(), archive.len());

        let mut extracted = Vec::new();
        for index in 0..archive.len() {
            let mut member = archive.by_index(index)?;
            let name = member.name().to_string();

            if member.is_dir() {
                debug!("Skipped directory: {}", name);
                continue;
            }
            if is_noise(&name) {
                debug!("Skipped metadata file: {}", name);
                continue;
            }
            let Some(relative) = member.enclosed_name() else {
                warn!("Skipped member with unsafe path: {}", name);
                continue;
            };

            let target = dest_dir.join(relative);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            io::copy(&mut member, &mut out).map_err(|e| ArchiveError::Extract {
                name: name.clone(),
                reason: e.to_string(),
            })?;

            debug!("Extracted: {}", name);
            extracted.push(target);
        }

        info!(
            "Extracted {} files from {} ({} entries skipped)",
            extracted.len(),
            path.display(),
            archive.len() - extracted.len()
        );
        Ok(extracted)
    }

    /// Keep only files with a supported extension.
    pub fn filter_supported(&self, paths: Vec<PathBuf>) -> Vec<PathBuf> {
        paths
            .into_iter()
            .filter(|p| {
                let supported = has_supported_extension(p) && !is_noise(&p.to_string_lossy());
                if !supported {
                    warn!("Unsupported file type skipped: {}", p.display());
                }
                supported
            })
            .collect()
    }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Member names that are never user content.
fn is_noise(name: &str) -> bool {
    if name.contains("__MACOSX") {
        return true;
    }
    let basename = name.rsplit(['/', '\\']).next().unwrap_or(name);
    basename.starts_with("._") || NOISE_FILES.contains(&basename)
}
