//! The staging area: a flat directory holding uploaded chunks, plus
//! temp files for writes in flight and the assembled outputs.
//!
//! Every entry is a single path component. Chunks are named
//! `{fileName}-{index}`, in-flight writes carry the [`TEMP_PREFIX`],
//! and a merged output sits under its bare file name. All name
//! validation happens here before any path is built, so nothing an
//! HTTP client sends can escape the staging root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use splice_protocol::{
    classify_entry, is_temp_file, is_valid_file_name, is_valid_target_name, ChunkKey, EntryKind,
    TEMP_PREFIX,
};

use crate::error::{CoreError, Result};

/// Suffix source for temp file names, so concurrent writes to the same
/// chunk never share a temp path.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Handle to the staging directory. Cheap to clone; all operations are
/// stateless against the filesystem.
#[derive(Debug, Clone)]
pub struct Staging {
    root: PathBuf,
}

/// A chunk found in the staging area, with its on-disk entry name kept
/// verbatim so later opens and deletes hit exactly what was listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedEntry {
    pub name: String,
    pub index: u64,
    pub len: u64,
}

impl Staging {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the staging directory if it does not exist yet. Safe to
    /// call on every upload.
    pub async fn ensure_root(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Absolute path of a staging entry, after name validation.
    pub fn entry_path(&self, name: &str) -> Result<PathBuf> {
        if !is_valid_file_name(name) {
            return Err(CoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    /// Path of the assembled output for `file_name`. Target names must
    /// never be chunk-shaped, or the output would list as a chunk of
    /// another file.
    pub fn output_path(&self, file_name: &str) -> Result<PathBuf> {
        if !is_valid_target_name(file_name) {
            return Err(CoreError::InvalidName(file_name.to_string()));
        }
        Ok(self.root.join(file_name))
    }

    /// Fresh temp path for an in-flight write of `name`.
    pub fn temp_path_for(&self, name: &str) -> Result<PathBuf> {
        if !is_valid_file_name(name) {
            return Err(CoreError::InvalidName(name.to_string()));
        }
        let unique_id = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        Ok(self.root.join(format!("{TEMP_PREFIX}{name}.{unique_id}")))
    }

    /// Store one chunk from an in-memory buffer: temp file first, then
    /// rename into place. Overwrites any previous upload of the same
    /// chunk.
    pub async fn store_chunk(&self, chunk_name: &str, data: &[u8]) -> Result<()> {
        let Some(key) = ChunkKey::parse(chunk_name) else {
            return Err(CoreError::BadChunkName(chunk_name.to_string()));
        };
        if !is_valid_target_name(&key.file_name) {
            return Err(CoreError::InvalidName(key.file_name));
        }
        let final_path = self.entry_path(chunk_name)?;
        let temp_path = self.temp_path_for(chunk_name)?;
        self.ensure_root().await?;

        if let Err(err) = tokio::fs::write(&temp_path, data).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    /// List the staged chunks belonging to `file_name`, sorted by
    /// index. Entries of other files, temp files, and the assembled
    /// output are skipped; a malformed or duplicate entry inside this
    /// file's namespace is an error rather than a guess.
    ///
    /// A missing staging directory reads as empty.
    pub async fn list_chunks(&self, file_name: &str) -> Result<Vec<StagedEntry>> {
        if !is_valid_target_name(file_name) {
            return Err(CoreError::InvalidName(file_name.to_string()));
        }
        let root = self.root.clone();
        let file = file_name.to_string();
        tokio::task::spawn_blocking(move || scan_chunks(&root, &file))
            .await
            .map_err(|err| CoreError::TaskJoin(err.to_string()))?
    }

    /// Delete staged chunks by entry name. An already-missing entry is
    /// fine; any other failure is remembered and returned after the
    /// remaining deletes have been attempted.
    pub async fn remove_chunks<'a, I>(&self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut first_err: Option<CoreError> = None;
        for name in names {
            let path = match self.entry_path(name) {
                Ok(path) => path,
                Err(err) => {
                    first_err.get_or_insert(err);
                    continue;
                }
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(entry = name, "staged chunk already gone");
                }
                Err(err) => {
                    warn!(entry = name, error = %err, "failed to delete staged chunk");
                    let err = std::io::Error::new(
                        err.kind(),
                        format!("removing staged chunk '{name}': {err}"),
                    );
                    first_err.get_or_insert(err.into());
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Remove temp files at least `max_age` old, left behind by uploads
    /// that died mid-write. Returns how many were removed.
    pub async fn sweep_stale_temps(&self, max_age: Duration) -> Result<usize> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || sweep_temps(&root, max_age))
            .await
            .map_err(|err| CoreError::TaskJoin(err.to_string()))?
    }
}

/// Metadata for a directory entry, reading a vanished entry as absent.
/// A concurrent rename or delete can remove an entry between the
/// directory read and the stat.
fn entry_metadata(entry: &std::fs::DirEntry) -> std::io::Result<Option<std::fs::Metadata>> {
    match entry.metadata() {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn scan_chunks(root: &Path, file_name: &str) -> Result<Vec<StagedEntry>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut chunks = Vec::new();
    let mut malformed: Option<String> = None;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!(entry = ?name, "skipping non-UTF-8 staging entry");
            continue;
        };
        match classify_entry(name, file_name) {
            EntryKind::Unrelated => {}
            EntryKind::Malformed => {
                // Keep the smallest name so the report does not depend
                // on directory order.
                if malformed.as_deref().map_or(true, |seen| name < seen) {
                    malformed = Some(name.to_string());
                }
            }
            EntryKind::Chunk(index) => {
                let Some(meta) = entry_metadata(&entry)? else {
                    continue;
                };
                if !meta.is_file() {
                    warn!(entry = name, "skipping non-file staging entry");
                    continue;
                }
                chunks.push(StagedEntry {
                    name: name.to_string(),
                    index,
                    len: meta.len(),
                });
            }
        }
    }
    if let Some(name) = malformed {
        return Err(CoreError::BadChunkName(name));
    }

    // Same tie-breaking rule for the duplicate report.
    chunks.sort_by(|a, b| (a.index, a.name.as_str()).cmp(&(b.index, b.name.as_str())));
    for pair in chunks.windows(2) {
        if pair[0].index == pair[1].index {
            return Err(CoreError::DuplicateIndex {
                entry: pair[1].name.clone(),
                index: pair[1].index,
            });
        }
    }
    Ok(chunks)
}

fn sweep_temps(root: &Path, max_age: Duration) -> Result<usize> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_temp_file(name) {
            continue;
        }
        let Some(meta) = entry_metadata(&entry)? else {
            continue;
        };
        // A modified time in the future reads as fresh.
        let age = meta.modified()?.elapsed().unwrap_or(Duration::ZERO);
        if age < max_age {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(entry = name, "removed stale temp file");
                removed += 1;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(removed)
}
