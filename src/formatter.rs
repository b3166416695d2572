use std::path::Path;

use crate::aggregator::Accumulator;
use crate::solver::BrcError;

/// Mean rounded half away from zero to one decimal.
///
/// Every value is a whole number of tenths, so the sum is snapped to tenths
/// first. That drops the summation error, which depends on how the input was
/// split, and a tie lands exactly on `.5` whatever the split.
fn mean1(sum: f64, count: u64) -> f64 {
    let tenths = (sum * 10.0).round();
    (tenths / count as f64).round() / 10.0
}

/// `-0.0` prints as `0.0`.
fn tidy(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

/// Renders `{name=min/mean/max, ...}\n`, entries in the given order.
pub(crate) fn render(entries: &[Accumulator]) -> Vec<u8> {
    let mut out = Vec::with_capacity(entries.len() * 32 + 3);
    out.push(b'{');
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(b", ");
        }
        let mean = mean1(entry.sum, entry.count);
        out.extend_from_slice(&entry.name);
        out.extend_from_slice(
            format!(
                "={:.1}/{:.1}/{:.1}",
                tidy(entry.min),
                tidy(mean),
                tidy(entry.max)
            )
            .as_bytes(),
        );
    }
    out.extend_from_slice(b"}\n");
    out
}

/// Creates or truncates `path` and writes `content` in one go.
pub(crate) async fn write_output(path: &Path, content: &[u8]) -> Result<(), BrcError> {
    tokio::fs::write(path, content)
        .await
        .map_err(|source| BrcError::OutputWrite {
            path: path.to_owned(),
            source,
        })
}
