use std::sync::Arc;
use std::time::Duration;

use circular_buffer::CircularBuffer;

use indicatif::{MultiProgress, ProgressBar, ProgressState, ProgressStyle};

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::shared_types::ByteCount;

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Human readable throughput, `MB/s` above one kilobyte per second.
pub(crate) fn format_speed(bytes: ByteCount, elapsed: Duration) -> String {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return "-".into();
    }
    let speed = bytes as f64 / seconds;
    let (unit, speed) = if speed > 1024.0 {
        ("MB/s", speed / (1024.0 * 1024.0))
    } else {
        ("kB/s", speed / 1024.0)
    };
    format!("{:.1} {}", speed, unit)
}

/// Draws scanned bytes against the input size until every worker has
/// dropped its sender.
pub(crate) fn spawn_progress_reporter(
    total_size: ByteCount,
    mut rx_progress: mpsc::UnboundedReceiver<ByteCount>,
    multi: MultiProgress,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut progress = 0;
        type ProgressPoint = (ByteCount, Instant);
        let progress_q = Arc::new(RwLock::new(CircularBuffer::<50, ProgressPoint>::new()));
        let pb = multi.add(ProgressBar::new(total_size));
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta}) ({msg})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
            write!(w, "{:.1}s", state.eta().as_secs_f64()).ok();
        })
        .progress_chars("#>-");
        pb.set_style(style);

        // rolling speed over the last few updates
        let speed_task = {
            let progress_q = progress_q.clone();
            let pb = pb.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(UPDATE_INTERVAL).await;
                    let q = progress_q.read().await;
                    if let (Some((latest_byte, latest_instant)), Some((oldest_byte, oldest_instant))) =
                        (q.back(), q.front())
                    {
                        if latest_byte == oldest_byte {
                            continue;
                        }
                        pb.set_message(format_speed(
                            latest_byte - oldest_byte,
                            latest_instant.duration_since(*oldest_instant),
                        ));
                    }
                }
            })
        };

        while let Some(scanned) = rx_progress.recv().await {
            progress += scanned;
            pb.set_position(progress);
            let mut q = progress_q.write().await;
            q.push_back((progress, Instant::now()));
        }
        speed_task.abort();
        pb.finish_with_message(format_speed(progress, pb.elapsed()));
    })
}

#[cfg(test)]
mod tests {
    use indicatif::ProgressDrawTarget;

    use super::*;

    #[test]
    fn speed_units() {
        assert_eq!(format_speed(512, Duration::from_secs(1)), "0.5 kB/s");
        assert_eq!(
            format_speed(3 * 1024 * 1024, Duration::from_secs(2)),
            "1.5 MB/s"
        );
        assert_eq!(format_speed(10, Duration::ZERO), "-");
    }

    #[tokio::test]
    async fn reporter_ends_when_senders_drop() {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_progress_reporter(100, rx, multi);
        tx.send(40).unwrap();
        tx.send(60).unwrap();
        drop(tx);
        handle.await.unwrap();
    }
}
