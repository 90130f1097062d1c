use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use tusclient_protocol::UploadEvent;

/// Offset and size of one upload, readable without locking.
///
/// The session is the only writer; the reporter and any observer read.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    offset: AtomicU64,
    total: AtomicU64,
}

impl ProgressCounter {
    pub fn new(total: u64) -> Self {
        Self {
            offset: AtomicU64::new(0),
            total: AtomicU64::new(total),
        }
    }

    /// Records the server-acknowledged offset.
    pub fn set_offset(&self, offset: u64) {
        self.offset.store(offset, Ordering::Release);
    }

    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Returns `(bytes_uploaded, bytes_total)`.
    pub fn snapshot(&self) -> (u64, u64) {
        (self.offset(), self.total())
    }
}

// ---------------------------------------------------------------------------
// ProgressReporter
// ---------------------------------------------------------------------------

/// Periodically emits `onProgress` for one transferring session.
///
/// Purely observational: it reads the [`ProgressCounter`] and never touches
/// session state. [`stop`](Self::stop) emits one last snapshot so the final
/// event always carries the true final offset.
pub struct ProgressReporter {
    upload_id: String,
    counter: Arc<ProgressCounter>,
    events_tx: mpsc::Sender<UploadEvent>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl ProgressReporter {
    /// Emits the first snapshot immediately, then spawns the ticker.
    pub fn start(
        upload_id: &str,
        counter: Arc<ProgressCounter>,
        events_tx: mpsc::Sender<UploadEvent>,
        interval: Duration,
    ) -> Self {
        let (written, total) = counter.snapshot();
        if events_tx
            .try_send(progress_event(upload_id, written, total))
            .is_err()
        {
            trace!(upload_id = %upload_id, "initial progress dropped");
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(tick_loop(
            upload_id.to_string(),
            Arc::clone(&counter),
            events_tx.clone(),
            interval,
            cancel.clone(),
        ));

        Self {
            upload_id: upload_id.to_string(),
            counter,
            events_tx,
            cancel,
            handle: Mutex::new(Some(handle)),
            stopped: AtomicBool::new(false),
        }
    }

    /// Stops the ticker and emits the final snapshot. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.cancel.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let (written, total) = self.counter.snapshot();
        if self
            .events_tx
            .send(progress_event(&self.upload_id, written, total))
            .await
            .is_err()
        {
            trace!(upload_id = %self.upload_id, "progress receiver dropped");
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn tick_loop(
    upload_id: String,
    counter: Arc<ProgressCounter>,
    events_tx: mpsc::Sender<UploadEvent>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let (written, total) = counter.snapshot();
                // A slow consumer loses ticks, never blocks the upload.
                if events_tx.try_send(progress_event(&upload_id, written, total)).is_err() {
                    trace!(upload_id = %upload_id, "progress tick dropped");
                }
            }
        }
    }
}

fn progress_event(upload_id: &str, written: u64, total: u64) -> UploadEvent {
    UploadEvent::Progress {
        upload_id: upload_id.to_string(),
        bytes_written: written,
        bytes_total: total,
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    offset: u64,
    timestamp: Instant,
}

/// Calculates transfer speed from a sliding window of offset samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100).max(2),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records the absolute offset observed now.
    ///
    /// An offset lower than the last sample (a restarted upload) resets
    /// the window.
    pub fn record(&self, offset: u64) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if s.samples.last().is_some_and(|last| offset < last.offset) {
            s.samples.clear();
        }
        s.samples.push(SpeedSample {
            offset,
            timestamp: now,
        });

        // Keep the newest sample even if the window is tiny.
        let cutoff = now.checked_sub(s.window_size).unwrap_or(now);
        let keep_from = s
            .samples
            .iter()
            .position(|sample| sample.timestamp >= cutoff)
            .unwrap_or(s.samples.len() - 1);
        s.samples.drain(..keep_from);

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if s.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        (last.offset - first.offset) as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<UploadEvent>) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if let UploadEvent::Progress {
                bytes_written,
                bytes_total,
                ..
            } = ev
            {
                out.push((bytes_written, bytes_total));
            }
        }
        out
    }

    #[test]
    fn counter_snapshot() {
        let counter = ProgressCounter::new(1000);
        counter.set_offset(300);
        assert_eq!(counter.snapshot(), (300, 1000));
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_ticks_and_emits_final_snapshot() {
        let (tx, mut rx) = mpsc::channel(64);
        let counter = Arc::new(ProgressCounter::new(1000));
        let reporter =
            ProgressReporter::start("u1", Arc::clone(&counter), tx, Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(1200)).await;
        counter.set_offset(1000);
        reporter.stop().await;

        let events = drain(&mut rx);
        // Start snapshot, ticks at 500 and 1000 ms, then the final snapshot.
        assert!(events.len() >= 3, "got {events:?}");
        assert_eq!(events[0], (0, 1000));
        assert_eq!(*events.last().unwrap(), (1000, 1000));
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_stop_is_idempotent() {
        let (tx, mut rx) = mpsc::channel(64);
        let counter = Arc::new(ProgressCounter::new(10));
        let reporter = ProgressReporter::start("u1", counter, tx, Duration::from_millis(500));

        reporter.stop().await;
        // Start and final snapshots.
        assert_eq!(drain(&mut rx).len(), 2);

        reporter.stop().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_full_channel_does_not_block() {
        let (tx, mut rx) = mpsc::channel(1);
        let counter = Arc::new(ProgressCounter::new(10));
        let reporter =
            ProgressReporter::start("u1", Arc::clone(&counter), tx, Duration::from_millis(500));

        // Nobody reads; ticks beyond the first are dropped.
        tokio::time::sleep(Duration::from_secs(3)).await;
        counter.set_offset(7);

        let stop = tokio::spawn(async move { reporter.stop().await });
        let mut last = None;
        // Ends once the reporter (and its ticker) dropped every sender.
        while let Some(ev) = rx.recv().await {
            last = Some(ev);
        }
        stop.await.unwrap();
        assert_eq!(
            last,
            Some(UploadEvent::Progress {
                upload_id: "u1".into(),
                bytes_written: 7,
                bytes_total: 10,
            })
        );
    }

    #[test]
    fn speed_calculator_no_samples() {
        let calc = SpeedCalculator::new(None, None);
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn speed_calculator_single_sample() {
        let calc = SpeedCalculator::new(None, None);
        calc.record(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_measures_offset_delta() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.record(0);
        std::thread::sleep(Duration::from_millis(50));
        calc.record(1000);

        // Timing is imprecise; only check direction.
        assert!(calc.bytes_per_second() > 0.0);
        assert!(calc.eta(10_000).unwrap().as_secs_f64() > 0.0);
    }

    #[test]
    fn speed_calculator_resets_on_rewind() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        calc.record(500);
        std::thread::sleep(Duration::from_millis(10));
        calc.record(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
    }

    #[test]
    fn speed_calculator_max_samples() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(5));
        for i in 0..20 {
            calc.record(i * 10);
        }
        let s = calc.inner.lock().unwrap();
        assert!(s.samples.len() <= 5);
    }
}
