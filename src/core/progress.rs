use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tokio::sync::mpsc;
use super::types::{QueueKind, TaskId};

/// Default simulated upload rate, 1 MiB/s
pub const UPLOAD_RATE: u64 = 1024 * 1024;
/// Default simulated download rate, 2 MiB/s
pub const DOWNLOAD_RATE: u64 = 2 * 1024 * 1024;

const SMOOTHING_FACTOR: f64 = 0.3;
/// Highest value an estimate may reach; 100 is reserved for a settled transfer
const ESTIMATE_CAP: f64 = 99.9;

/// Estimate the displayed percentage of a transfer from elapsed time.
///
/// Uploads report real progress, so the current value is returned untouched.
/// Downloads move 30% of the way towards the linear theoretical value on every
/// call and never go backwards or reach 100.
pub fn estimate(
    total_bytes: u64,
    elapsed_seconds: u64,
    rate_per_second: u64,
    current_progress: f64,
    mode: QueueKind,
) -> f64 {
    if total_bytes == 0 {
        return 0.0;
    }

    if mode == QueueKind::Upload || current_progress >= ESTIMATE_CAP {
        return current_progress;
    }

    let expected_bytes = elapsed_seconds as f64 * rate_per_second as f64;
    let theoretical = (expected_bytes / total_bytes as f64 * 100.0).min(100.0);
    let smoothed = current_progress + (theoretical - current_progress) * SMOOTHING_FACTOR;

    smoothed.max(current_progress).clamp(0.0, ESTIMATE_CAP)
}

/// Progress message sent from a running transport to its queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub id: TaskId,
    pub attempt: u32,
    pub percent: u8,
}

/// Handle given to a transport for reporting `{loaded, total}` byte counts
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    id: TaskId,
    attempt: u32,
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
    last_percent: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(id: TaskId, attempt: u32, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            id,
            attempt,
            tx: Some(tx),
            last_percent: Arc::new(AtomicU8::new(u8::MAX)),
        }
    }

    /// Reporter that drops every update
    pub fn detached(id: TaskId) -> Self {
        Self {
            id,
            attempt: 0,
            tx: None,
            last_percent: Arc::new(AtomicU8::new(u8::MAX)),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.id
    }

    /// Report transferred bytes. Calls without a known total are ignored and
    /// repeated percentages are only sent once.
    pub fn report(&self, loaded: u64, total: u64) {
        if total == 0 {
            return;
        }

        let percent = ((loaded as f64 / total as f64) * 100.0).round().min(100.0) as u8;
        if self.last_percent.swap(percent, Ordering::Relaxed) == percent {
            return;
        }

        if let Some(tx) = &self.tx {
            let _ = tx.send(ProgressUpdate {
                id: self.id.clone(),
                attempt: self.attempt,
                percent,
            });
        }
    }
}

pin_project! {
    /// Byte stream that reports how much of it has been consumed
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        reporter: ProgressReporter,
        transferred: Arc<AtomicU64>,
        total: u64,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, reporter: ProgressReporter, total: u64) -> Self {
        Self {
            inner,
            reporter,
            transferred: Arc::new(AtomicU64::new(0)),
            total,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let len = chunk.len() as u64;
                if len > 0 {
                    let sent = this.transferred.fetch_add(len, Ordering::Relaxed) + len;
                    this.reporter.report(sent, *this.total);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
