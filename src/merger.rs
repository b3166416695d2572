use std::collections::hash_map::Entry;

use crate::aggregator::{Accumulator, ScanCounters, WorkerResult};

/// Merged statistics, sorted by name bytes.
#[derive(Debug, Default)]
pub(crate) struct FinalResult {
    pub(crate) entries: Vec<Accumulator>,
    pub(crate) counters: ScanCounters,
}

/// Folds every worker table into the first one, then sorts.
///
/// Runs single-threaded after all workers joined. Entries move from the
/// later tables into the first; when a name is already present its stored
/// name bytes are kept.
pub(crate) fn merge(results: Vec<WorkerResult>) -> FinalResult {
    let mut results = results.into_iter();
    let Some(mut base) = results.next() else {
        return FinalResult::default();
    };

    for worker in results {
        base.counters.absorb(worker.counters);
        for (key, incoming) in worker.table {
            match base.table.entry(key) {
                Entry::Occupied(entry) => entry.into_mut().combine(&incoming),
                Entry::Vacant(entry) => {
                    entry.insert(incoming);
                }
            }
        }
    }

    let mut entries: Vec<Accumulator> = base.table.into_values().collect();
    // slice ordering on bytes: lexicographic, a prefix sorts first
    entries.sort_unstable_by(|a, b| a.name.cmp(&b.name));
    FinalResult {
        entries,
        counters: base.counters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ingest;

    fn worker(lines: &[u8]) -> WorkerResult {
        let mut result = WorkerResult::new();
        ingest(lines, &mut result);
        result
    }

    fn summary(result: &FinalResult) -> Vec<(Vec<u8>, f64, f64, f64, u64)> {
        result
            .entries
            .iter()
            .map(|e| (e.name.to_vec(), e.min, e.max, e.sum, e.count))
            .collect()
    }

    const PARTS: [&[u8]; 3] = [
        b"Oslo;1.5\nAb;2.0\n",
        b"A;-4.5\nOslo;-7.0\n",
        b"Ab;10.5\nOslo;3.0\nA;0.5\n",
    ];

    #[test]
    fn merge_is_order_independent() {
        let orders = [[0, 1, 2], [2, 1, 0], [1, 0, 2], [2, 0, 1]];
        let merged: Vec<_> = orders
            .iter()
            .map(|order| merge(order.iter().map(|&i| worker(PARTS[i])).collect()))
            .collect();
        for other in &merged[1..] {
            assert_eq!(summary(&merged[0]), summary(other));
            assert_eq!(merged[0].counters, other.counters);
        }
    }

    #[test]
    fn merged_entries_are_sorted_and_combined() {
        let merged = merge(PARTS.iter().map(|part| worker(part)).collect());
        let names: Vec<&[u8]> = merged.entries.iter().map(|e| &*e.name).collect();
        assert_eq!(names, vec![&b"A"[..], b"Ab", b"Oslo"]);

        let oslo = &merged.entries[2];
        assert_eq!((oslo.min, oslo.max, oslo.sum, oslo.count), (-7.0, 3.0, -2.5, 3));
        assert_eq!(merged.counters.lines, 7);
    }

    #[test]
    fn nothing_to_merge() {
        assert!(merge(Vec::new()).entries.is_empty());
        assert!(merge(vec![WorkerResult::new(), WorkerResult::new()])
            .entries
            .is_empty());
    }
}
