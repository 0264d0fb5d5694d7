//! Merge engine: assembles staged chunks into the final file.
//!
//! A merge runs in two phases. [`plan`] lists the file's chunks and
//! validates the whole sequence up front (contiguous indices starting
//! at zero, every chunk except the last exactly the declared size).
//! [`execute`] then copies each chunk into its slot of the output file
//! with a bounded pool of concurrent workers, verifies the final
//! length, and only then deletes the source chunks. A merge that fails
//! at any point leaves every source chunk in place, so the client can
//! re-upload or retry without starting over.

use std::io::SeekFrom;
use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::staging::{StagedEntry, Staging};

/// Copy buffer per worker, matching the upload read size.
const COPY_BUF_SIZE: usize = 256 * 1024;

/// One chunk scheduled for copying.
#[derive(Debug, Clone)]
pub struct PlannedChunk {
    /// On-disk entry name, verbatim from the staging listing.
    pub name: String,
    pub index: u64,
    pub len: u64,
    /// Byte offset of this chunk's slot in the output file.
    pub offset: u64,
}

/// A validated copy schedule for one merge.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub file_name: String,
    pub chunk_size: u64,
    pub chunks: Vec<PlannedChunk>,
    pub expected_len: u64,
}

/// Summary of a committed merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub output_len: u64,
    pub chunks_merged: usize,
}

/// Validate the staged chunk sequence for `file_name` and lay out the
/// output file. Fails without touching anything on disk.
pub async fn plan(staging: &Staging, file_name: &str, chunk_size: u64) -> Result<MergePlan> {
    if chunk_size == 0 {
        return Err(CoreError::ZeroChunkSize);
    }

    let entries = staging.list_chunks(file_name).await?;
    if entries.is_empty() {
        return Err(CoreError::NoChunks(file_name.to_string()));
    }
    let (chunks, expected_len) = lay_out(entries, chunk_size)?;

    debug!(
        file = file_name,
        chunks = chunks.len(),
        expected_len,
        "merge planned"
    );
    Ok(MergePlan {
        file_name: file_name.to_string(),
        chunk_size,
        chunks,
        expected_len,
    })
}

/// Validate a non-empty chunk sequence and place each chunk into its
/// output slot. Returns the planned chunks and the total output
/// length.
fn lay_out(entries: Vec<StagedEntry>, chunk_size: u64) -> Result<(Vec<PlannedChunk>, u64)> {
    let count = entries.len() as u64;
    let last = entries.len() - 1;
    let overflow = || CoreError::LayoutOverflow {
        chunks: count,
        chunk_size,
    };

    let mut chunks = Vec::with_capacity(entries.len());
    for (pos, entry) in entries.into_iter().enumerate() {
        let expected = pos as u64;
        if entry.index != expected {
            return Err(CoreError::IndexGap {
                expected,
                found: entry.index,
            });
        }
        let size_ok = if pos == last {
            entry.len <= chunk_size
        } else {
            entry.len == chunk_size
        };
        if !size_ok {
            return Err(CoreError::ChunkSizeMismatch {
                entry: entry.name,
                expected: chunk_size,
                actual: entry.len,
            });
        }
        let offset = entry.index.checked_mul(chunk_size).ok_or_else(overflow)?;
        chunks.push(PlannedChunk {
            name: entry.name,
            index: entry.index,
            len: entry.len,
            offset,
        });
    }

    let expected_len = (count - 1)
        .checked_mul(chunk_size)
        .and_then(|n| n.checked_add(chunks[last].len))
        .ok_or_else(overflow)?;

    Ok((chunks, expected_len))
}

/// Copy every planned chunk into the output file, verify the result,
/// and delete the sources. At most `parallelism` copies run at once;
/// the first failure cancels the rest and the sources stay put.
pub async fn execute(
    staging: &Staging,
    plan: &MergePlan,
    parallelism: usize,
) -> Result<MergeOutcome> {
    let parallelism = parallelism.max(1);
    let out_path = staging.output_path(&plan.file_name)?;

    let mut jobs = Vec::with_capacity(plan.chunks.len());
    for chunk in &plan.chunks {
        jobs.push((staging.entry_path(&chunk.name)?, chunk.clone()));
    }

    // Truncate up front so bytes from an earlier, longer output never
    // survive past this merge.
    let out = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&out_path)
        .await?;
    drop(out);

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    let mut first_err: Option<CoreError> = None;

    for (src, chunk) in jobs {
        while first_err.is_none() && tasks.len() >= parallelism {
            if let Some(joined) = tasks.join_next().await {
                if let Err(err) = flatten_join(joined) {
                    first_err = Some(err);
                }
            }
        }
        if first_err.is_some() {
            break;
        }
        let dst = out_path.clone();
        tasks.spawn(async move { copy_chunk(src, dst, chunk).await });
    }

    if first_err.is_some() {
        tasks.abort_all();
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = flatten_join(joined) {
            if first_err.is_none() {
                first_err = Some(err);
                tasks.abort_all();
            }
        }
    }
    if let Some(err) = first_err {
        warn!(file = %plan.file_name, error = %err, "merge failed, staged chunks retained");
        return Err(err);
    }

    let meta = tokio::fs::metadata(&out_path).await?;
    if meta.len() != plan.expected_len {
        return Err(CoreError::OutputLength {
            expected: plan.expected_len,
            actual: meta.len(),
        });
    }

    // Commit point: the output is verified, so the sources can go.
    let names: Vec<&str> = plan.chunks.iter().map(|c| c.name.as_str()).collect();
    staging.remove_chunks(names).await?;

    debug!(
        file = %plan.file_name,
        chunks = plan.chunks.len(),
        bytes = plan.expected_len,
        "merge committed"
    );
    Ok(MergeOutcome {
        output_len: plan.expected_len,
        chunks_merged: plan.chunks.len(),
    })
}

/// Plan and execute in one call.
pub async fn run(
    staging: &Staging,
    file_name: &str,
    chunk_size: u64,
    parallelism: usize,
) -> Result<MergeOutcome> {
    let plan = plan(staging, file_name, chunk_size).await?;
    execute(staging, &plan, parallelism).await
}

async fn copy_chunk(src: PathBuf, dst: PathBuf, chunk: PlannedChunk) -> Result<()> {
    let reader = tokio::fs::File::open(&src).await?;
    let mut writer = tokio::fs::OpenOptions::new().write(true).open(&dst).await?;
    writer.seek(SeekFrom::Start(chunk.offset)).await?;

    // Read up to one byte past the planned length: an over-read means
    // the chunk grew after planning. Bytes past the slot are never
    // written.
    let mut reader = reader.take(chunk.len.saturating_add(1));
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut copied: u64 = 0;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        copied += n as u64;
        if copied > chunk.len {
            break;
        }
        writer.write_all(&buf[..n]).await?;
    }
    writer.flush().await?;

    if copied != chunk.len {
        return Err(CoreError::ChunkChanged {
            entry: chunk.name,
            planned: chunk.len,
            copied,
        });
    }
    Ok(())
}

fn flatten_join(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    match joined {
        Ok(result) => result,
        // Cancelled workers were aborted after an earlier failure.
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(CoreError::TaskJoin(err.to_string())),
    }
}
