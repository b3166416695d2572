use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future;
use indicatif::MultiProgress;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::aggregator::{self, WorkerResult};
use crate::formatter;
use crate::merger;
use crate::planner::{self, ChunkPlan, PlanError};
use crate::progress_reporter::{self, format_speed};
use crate::scanner::{self, NEWLINE};
use crate::shared_types::{ByteCount, ByteRange, MAX_LINE_SIZE};
use crate::source::{ByteSource, DiskSource, MmapSource, SourceError};

#[derive(Error, Debug)]
pub(crate) enum BrcError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] PlanError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("can't write output {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// How workers get at their bytes.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReadStrategy {
    /// Positioned reads into a rolling per-worker buffer.
    Stream,
    /// Whole file resident up front, workers borrow slices of it.
    Preload,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SourceKind {
    Disk,
    Mmap,
}

pub(crate) struct SolveOptions {
    /// Read size as a multiple of `page_size`.
    pub(crate) chunk_factor: usize,
    /// Upper bound on workers; the planner may use fewer.
    pub(crate) threads: usize,
    pub(crate) strategy: ReadStrategy,
    pub(crate) source: SourceKind,
    pub(crate) page_size: usize,
    /// Draw progress while parsing.
    pub(crate) verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RunSummary {
    pub(crate) workers: usize,
    pub(crate) lines: u64,
    pub(crate) bytes: u64,
    pub(crate) stations: usize,
}

type ProgressSender = mpsc::UnboundedSender<ByteCount>;

/// Aggregates `input` and writes the rendered summary to `output`.
pub(crate) async fn run(
    input: &Path,
    output: &Path,
    opts: &SolveOptions,
    multi: MultiProgress,
) -> Result<RunSummary, BrcError> {
    match opts.source {
        SourceKind::Disk => solve(DiskSource::new(), input, output, opts, multi).await,
        SourceKind::Mmap => solve(MmapSource::new(), input, output, opts, multi).await,
    }
}

async fn solve<S: ByteSource + 'static>(
    mut source: S,
    input: &Path,
    output: &Path,
    opts: &SolveOptions,
    multi: MultiProgress,
) -> Result<RunSummary, BrcError> {
    source.open(input)?;
    if opts.strategy == ReadStrategy::Preload {
        let started = Instant::now();
        let loaded = source.preload()?;
        info!(
            "preloaded {loaded} bytes in {:?} ({})",
            started.elapsed(),
            format_speed(loaded, started.elapsed())
        );
    }
    let source = Arc::new(source);
    let size = source.size();
    debug!("scanning {}", source.path().unwrap_or(input).display());

    let started = Instant::now();
    let (tx_progress, reporter) = if opts.verbose {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = progress_reporter::spawn_progress_reporter(size, rx, multi);
        (Some(tx), Some(handle))
    } else {
        (None, None)
    };
    let parsed = parse_source(source.clone(), opts, tx_progress).await;
    if let Some(reporter) = reporter {
        if let Err(e) = reporter.await {
            warn!("progress reporter failed: {e}");
        }
    }
    let results = parsed?;
    let workers = results.len();
    info!("parse took {:?}", started.elapsed());

    let started = Instant::now();
    let merged = merger::merge(results);
    let rendered = formatter::render(&merged.entries);
    info!(
        "merge and render of {} stations took {:?}",
        merged.entries.len(),
        started.elapsed()
    );

    formatter::write_output(output, &rendered).await?;

    match Arc::try_unwrap(source) {
        Ok(mut source) => {
            if source.is_open() {
                source.close()?;
            }
        }
        Err(_) => warn!("source still shared after the run, leaving it to drop"),
    }

    Ok(RunSummary {
        workers,
        lines: merged.counters.lines,
        bytes: merged.counters.bytes,
        stations: merged.entries.len(),
    })
}

/// Splits the source per the plan and scans every span on its own blocking
/// task. Results come back in worker order; the first failing worker fails
/// the run.
pub(crate) async fn parse_source<S: ByteSource + 'static>(
    source: Arc<S>,
    opts: &SolveOptions,
    progress: Option<ProgressSender>,
) -> Result<Vec<WorkerResult>, BrcError> {
    let size = source.size();
    let plan = planner::plan(size, opts.chunk_factor, opts.threads, opts.page_size)?;
    info!(
        "{} bytes over {} workers: {} bytes each, {} byte reads",
        size, plan.threads, plan.per_thread_chunk_size, plan.read_chunk_size
    );

    let mut handles = Vec::with_capacity(plan.threads);
    for worker in 0..plan.threads {
        let source = source.clone();
        let progress = progress.clone();
        let strategy = opts.strategy;
        handles.push(tokio::task::spawn_blocking(move || {
            let span = plan.span(worker, source.size());
            match strategy {
                ReadStrategy::Stream => {
                    stream_span(&*source, worker, span, &plan, progress.as_ref())
                }
                ReadStrategy::Preload => {
                    preloaded_span(&*source, worker, span, &plan, progress.as_ref())
                }
            }
        }));
    }
    drop(progress);

    let joined = future::try_join_all(handles).await?;
    let mut results = Vec::with_capacity(joined.len());
    for (worker, result) in joined.into_iter().enumerate() {
        let result = result?;
        debug!(
            "worker {worker}: {} lines, {} bytes, {} names",
            result.counters.lines,
            result.counters.bytes,
            result.table.len()
        );
        results.push(result);
    }
    Ok(results)
}

fn report(progress: Option<&ProgressSender>, scanned: usize) {
    if let Some(tx) = progress {
        tx.send(scanned as ByteCount).ok();
    }
}

/// First line start a worker owns, from a lookahead taken at its nominal
/// start.
///
/// The partial (or whole) line ending at the first terminator at or after
/// the span start belongs to the previous worker. `None` when the worker
/// owns no line: no terminator in sight, the skip runs off the end of the
/// file, or it lands past the span.
fn owned_start(span: ByteRange, file_size: u64, lookahead: &[u8]) -> Option<u64> {
    let skip = scanner::find_byte(lookahead, b'\n')? as u64 + 1;
    let begin = span.offset + skip;
    (begin < file_size && begin <= span.end()).then_some(begin)
}

/// Positioned reads into a rolling buffer. Lines whose first byte is in
/// `(span.offset, span.end()]` are parsed here, plus offset 0 for worker 0.
fn stream_span<S: ByteSource>(
    source: &S,
    worker: usize,
    span: ByteRange,
    plan: &ChunkPlan,
    progress: Option<&ProgressSender>,
) -> Result<WorkerResult, SourceError> {
    let file_size = source.size();
    let mut result = WorkerResult::new();
    let read_chunk = plan.read_chunk_size.max(1);
    let mut buffer = vec![0u8; 2 * read_chunk.max(MAX_LINE_SIZE)];

    let begin = if worker == 0 {
        0
    } else {
        if span.is_empty() {
            return Ok(result);
        }
        let n = source.read_at(&mut buffer[..MAX_LINE_SIZE], span.offset)?;
        match owned_start(span, file_size, &buffer[..n]) {
            Some(begin) => begin,
            None => return Ok(result),
        }
    };

    let mut position = begin;
    // unparsed bytes at the head of the buffer
    let mut carry = 0;
    while position < span.end() {
        let want = (span.end() - position).min(read_chunk as u64) as usize;
        grow_to(&mut buffer, carry + want);
        let n = source.read_at(&mut buffer[carry..carry + want], position)?;
        if n == 0 {
            break;
        }
        position += n as u64;
        report(progress, n);

        let filled = carry + n;
        match buffer[..filled].iter().rposition(|&b| b == b'\n') {
            Some(last) => {
                aggregator::ingest(&buffer[..=last], &mut result);
                buffer.copy_within(last + 1..filled, 0);
                carry = filled - last - 1;
            }
            None => carry = filled,
        }
        if n < want {
            break;
        }
    }

    // the line straddling (or starting at) the span end is ours
    let line_start = position - carry as u64;
    if line_start < file_size {
        grow_to(&mut buffer, carry + MAX_LINE_SIZE);
        let n = source.read_at(&mut buffer[carry..carry + MAX_LINE_SIZE], position)?;
        let filled = carry + n;
        match NEWLINE.find_in(&buffer[..filled]) {
            Some(end) => aggregator::ingest(&buffer[..=end], &mut result),
            None => aggregator::ingest_fragment(&buffer[..filled], &mut result),
        }
    }
    Ok(result)
}

fn grow_to(buffer: &mut Vec<u8>, len: usize) {
    if buffer.len() < len {
        buffer.resize(len, 0);
    }
}

/// Same ownership rule as [`stream_span`], borrowing windows straight from
/// the resident image instead of copying.
fn preloaded_span<S: ByteSource>(
    source: &S,
    worker: usize,
    span: ByteRange,
    plan: &ChunkPlan,
    progress: Option<&ProgressSender>,
) -> Result<WorkerResult, SourceError> {
    let file_size = source.size();
    let mut result = WorkerResult::new();
    // a full window always holds at least one terminator
    let window = plan.read_chunk_size.max(MAX_LINE_SIZE);

    let begin = if worker == 0 {
        0
    } else {
        if span.is_empty() {
            return Ok(result);
        }
        match owned_start(span, file_size, source.slice(span.offset, MAX_LINE_SIZE)?) {
            Some(begin) => begin,
            None => return Ok(result),
        }
    };

    let mut position = begin;
    while position < span.end() {
        let want = (span.end() - position).min(window as u64) as usize;
        let view = source.slice(position, want)?;
        let Some(last) = view.iter().rposition(|&b| b == b'\n') else {
            break;
        };
        aggregator::ingest(&view[..=last], &mut result);
        position += last as u64 + 1;
        report(progress, last + 1);
    }

    if position < file_size {
        let view = source.slice(position, MAX_LINE_SIZE)?;
        match NEWLINE.find_in(view) {
            Some(end) => {
                aggregator::ingest(&view[..=end], &mut result);
                report(progress, end + 1);
            }
            None => aggregator::ingest_fragment(view, &mut result),
        }
    }
    Ok(result)
}
