use thiserror::Error;

use crate::shared_types::{ByteRange, MIN_LINE_SIZE};

const FALLBACK_PAGE_SIZE: usize = 4096;

#[derive(Error, Debug, PartialEq, Eq)]
pub(crate) enum PlanError {
    #[error("chunk factor must be at least 1, got {0}")]
    ChunkFactor(usize),
    #[error("thread count must be at least 1, got {0}")]
    Threads(usize),
}

/// How a file of a given size is split between workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ChunkPlan {
    /// Contiguous span handed to each worker.
    pub(crate) per_thread_chunk_size: u64,
    /// Size of a single read (or window) inside a span.
    pub(crate) read_chunk_size: usize,
    pub(crate) threads: usize,
}

impl ChunkPlan {
    /// Nominal span of `worker`, clamped to the file. Trailing workers may
    /// get an empty span when the file is small.
    pub(crate) fn span(&self, worker: usize, file_size: u64) -> ByteRange {
        let start = (worker as u64)
            .saturating_mul(self.per_thread_chunk_size)
            .min(file_size);
        let end = start
            .saturating_add(self.per_thread_chunk_size)
            .min(file_size);
        ByteRange {
            offset: start,
            length: end - start,
        }
    }
}

pub(crate) fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
    }
    FALLBACK_PAGE_SIZE
}

/// Derives the per-worker span, the read size and the worker count.
///
/// The thread count is only ever lowered from the request: when one read
/// chunk is larger than a worker's share, spans grow to a chunk and fewer
/// workers are used. The read size is likewise only lowered, down to the
/// span it has to cover.
pub(crate) fn plan(
    file_size: u64,
    chunk_factor: usize,
    threads: usize,
    page_size: usize,
) -> Result<ChunkPlan, PlanError> {
    if chunk_factor < 1 {
        return Err(PlanError::ChunkFactor(chunk_factor));
    }
    if threads < 1 {
        return Err(PlanError::Threads(threads));
    }

    let mut per_thread = file_size.div_ceil(threads as u64);
    let mut threads = threads;
    let read_chunk = chunk_factor.saturating_mul(page_size.max(1)) as u64;

    if read_chunk > per_thread {
        per_thread = read_chunk.min(file_size).max(MIN_LINE_SIZE as u64);
        threads = file_size.div_ceil(per_thread).max(1) as usize;
    }
    let read_chunk = read_chunk.min(per_thread.max(MIN_LINE_SIZE as u64));

    Ok(ChunkPlan {
        per_thread_chunk_size: per_thread,
        read_chunk_size: read_chunk as usize,
        threads,
    })
}
