use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;

use crate::scanner::{self, NEWLINE, SEMICOLON};
use crate::shared_types::MAX_LINE_SIZE;

/// 100 name bytes and the `;`, rounded up to whole words.
const NAME_WINDOW: usize = 104;
/// 5 value bytes and the `\n`, rounded up to a whole word.
const VALUE_WINDOW: usize = 8;

/// Running statistics for one name.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Accumulator {
    pub(crate) name: Box<[u8]>,
    pub(crate) min: f64,
    pub(crate) max: f64,
    pub(crate) sum: f64,
    pub(crate) count: u64,
}

impl Accumulator {
    fn new(name: &[u8], value: f64) -> Self {
        Self {
            name: name.into(),
            min: value,
            max: value,
            sum: value,
            count: 1,
        }
    }

    #[inline]
    fn update(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Folds another accumulator for the same name into this one.
    pub(crate) fn combine(&mut self, other: &Accumulator) {
        self.sum += other.sum;
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Lines and bytes a worker consumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct ScanCounters {
    pub(crate) lines: u64,
    pub(crate) bytes: u64,
}

impl ScanCounters {
    pub(crate) fn absorb(&mut self, other: ScanCounters) {
        self.lines += other.lines;
        self.bytes += other.bytes;
    }
}

pub(crate) type StationTable = FxHashMap<u64, Accumulator>;

/// Everything one worker produced. Owned by that worker until merge.
#[derive(Debug, Default)]
pub(crate) struct WorkerResult {
    pub(crate) table: StationTable,
    pub(crate) counters: ScanCounters,
}

impl WorkerResult {
    pub(crate) fn new() -> Self {
        let mut table = StationTable::default();
        // most inputs stay well under this many names
        table.reserve(1024);
        Self {
            table,
            counters: ScanCounters::default(),
        }
    }

    #[inline]
    pub(crate) fn record(&mut self, name: &[u8], value: f64) {
        match self.table.entry(scanner::hash_name(name)) {
            Entry::Occupied(entry) => entry.into_mut().update(value),
            Entry::Vacant(entry) => {
                entry.insert(Accumulator::new(name, value));
            }
        }
    }
}

/// Aggregates a buffer made only of complete, `\n`-terminated lines.
///
/// Parsing stops at the first line that doesn't fit the grammar.
pub(crate) fn ingest(buffer: &[u8], result: &mut WorkerResult) {
    let mut line_start = 0;
    while line_start < buffer.len() {
        let rest = &buffer[line_start..];
        let Some(name_len) = SEMICOLON.find_in(&rest[..rest.len().min(NAME_WINDOW)]) else {
            debug!("no delimiter near offset {line_start}, dropping the rest of the buffer");
            break;
        };
        let value_start = name_len + 1;
        let value_window = &rest[value_start..rest.len().min(value_start + VALUE_WINDOW)];
        let Some(value_len) = NEWLINE.find_in(value_window) else {
            debug!("no terminator near offset {line_start}, dropping the rest of the buffer");
            break;
        };

        let value = scanner::decode_value(&value_window[..value_len]);
        result.record(&rest[..name_len], value);

        let line_len = value_start + value_len + 1;
        result.counters.lines += 1;
        result.counters.bytes += line_len as u64;
        line_start += line_len;
    }
}

/// Aggregates a final line that lacks its `\n` (end of file).
pub(crate) fn ingest_fragment(fragment: &[u8], result: &mut WorkerResult) {
    if fragment.is_empty() {
        return;
    }
    let len = fragment.len().min(MAX_LINE_SIZE);
    let mut line = [0u8; MAX_LINE_SIZE + 1];
    line[..len].copy_from_slice(&fragment[..len]);
    line[len] = b'\n';
    let before = result.counters.bytes;
    ingest(&line[..=len], result);
    // the terminator was ours, not the file's
    if result.counters.bytes > before {
        result.counters.bytes -= 1;
    }
}
