//! Shared definitions for the splice chunk-upload API.
//!
//! A file arrives as independently uploaded chunks named
//! `{fileName}-{index}` and is later assembled by a merge request. This
//! crate holds the naming rules, the request/response bodies, and the
//! validation both sides agree on, so the server and any client stay in
//! sync.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Constants ──────────────────────────────────────────────────────────────

/// Prefix for in-progress temp files inside the staging area. Entries
/// carrying it are never treated as chunks and are swept when stale.
pub const TEMP_PREFIX: &str = ".tmp.";

/// Upper bound on file name length, matching common filesystem limits.
pub const MAX_FILE_NAME_LEN: usize = 255;

// ── Chunk naming ───────────────────────────────────────────────────────────

/// Identity of one staged chunk: the file it belongs to and its
/// zero-based position in the sequence.
///
/// The on-disk form is `{file_name}-{index}`. Because file names may
/// themselves contain hyphens, parsing splits on the *last* hyphen and
/// requires the suffix to be pure ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub file_name: String,
    pub index: u64,
}

impl ChunkKey {
    pub fn new(file_name: &str, index: u64) -> Self {
        Self {
            file_name: file_name.to_string(),
            index,
        }
    }

    /// Parse a storage entry name into a chunk key. Returns `None` when
    /// the name has no `-{digits}` suffix or the index overflows `u64`.
    pub fn parse(entry: &str) -> Option<Self> {
        let (file_name, suffix) = entry.rsplit_once('-')?;
        if file_name.is_empty() || suffix.is_empty() {
            return None;
        }
        if !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index = suffix.parse::<u64>().ok()?;
        Some(Self::new(file_name, index))
    }

    /// Entry name used in the staging area.
    pub fn storage_name(&self) -> String {
        format!("{}-{}", self.file_name, self.index)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.file_name, self.index)
    }
}

/// How a staging entry relates to a given file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Temp file, another file's chunk, or an assembled output.
    Unrelated,
    /// Claims this file as prefix but has no parseable index suffix.
    Malformed,
    /// A chunk of this file, carrying its sequence index.
    Chunk(u64),
}

/// Classify a staging entry relative to `file_name`.
///
/// An entry that parses as a chunk of a *different* file is `Unrelated`,
/// so uploads for `report-v2.bin` never disturb a merge of `report`.
/// `Malformed` is reserved for entries inside this file's namespace
/// (prefix `{file_name}-`) that do not parse as any chunk at all; merge
/// refuses to guess what those are.
pub fn classify_entry(entry: &str, file_name: &str) -> EntryKind {
    if is_temp_file(entry) {
        return EntryKind::Unrelated;
    }
    match ChunkKey::parse(entry) {
        Some(key) if key.file_name == file_name => EntryKind::Chunk(key.index),
        Some(_) => EntryKind::Unrelated,
        None => {
            let in_namespace = entry.len() > file_name.len()
                && entry.starts_with(file_name)
                && entry.as_bytes()[file_name.len()] == b'-';
            if in_namespace {
                EntryKind::Malformed
            } else {
                EntryKind::Unrelated
            }
        }
    }
}

/// Whether a staging entry is an in-progress temp file.
pub fn is_temp_file(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

// ── Validation ─────────────────────────────────────────────────────────────

/// Whether `name` is acceptable as a file or chunk name.
///
/// Names become single path components under the staging area, so
/// separators, control bytes, the dot entries, and the temp prefix are
/// all rejected.
pub fn is_valid_file_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_FILE_NAME_LEN {
        return false;
    }
    if name == "." || name == ".." {
        return false;
    }
    if name.starts_with(TEMP_PREFIX) {
        return false;
    }
    name.bytes()
        .all(|b| b != b'/' && b != b'\\' && !b.is_ascii_control())
}

/// Whether `name` can name an upload target and its assembled output.
///
/// On top of [`is_valid_file_name`], a target name must not itself
/// parse as a chunk name: the staging layout is flat, so an output
/// named `x-0` would read back as chunk 0 of `x` and be consumed by a
/// merge of `x`.
pub fn is_valid_target_name(name: &str) -> bool {
    is_valid_file_name(name) && ChunkKey::parse(name).is_none()
}

/// Validate a merge request before any filesystem work happens.
pub fn validate_merge_request(req: &MergeRequest) -> Result<(), String> {
    if !is_valid_file_name(&req.file_name) {
        return Err(format!("invalid file name: '{}'", req.file_name));
    }
    if ChunkKey::parse(&req.file_name).is_some() {
        return Err(format!(
            "invalid file name: '{}' (a trailing '-<digits>' suffix is reserved for chunks)",
            req.file_name
        ));
    }
    if req.size == 0 {
        return Err("chunk size must be at least 1 byte".to_string());
    }
    Ok(())
}

// ── Request/response bodies ────────────────────────────────────────────────

/// Body of `POST /merge`. `size` is the chunk size the client split
/// with; every chunk except the last must be exactly this long.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub file_name: String,
    pub size: u64,
}

/// Successful merge summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub file_name: String,
    pub output_len: u64,
    pub chunks_merged: usize,
}

/// One staged chunk as reported by the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedChunk {
    pub index: u64,
    pub len: u64,
}

/// Body of `GET /files/{file}/chunks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedChunksResponse {
    pub file_name: String,
    pub chunks: Vec<StagedChunk>,
}
