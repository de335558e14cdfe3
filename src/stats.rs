//! Scheduler statistics.
//!
//! Counters are plain relaxed atomics bumped on the scheduler thread (and read from anywhere).
//! Latencies live in time-windowed histories behind a `parking_lot` mutex; only the scheduler
//! thread writes them and readers take short snapshots.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default history kept for latency percentiles.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Hard cap on retained samples so a burst cannot grow the history without bound.
const MAX_SAMPLES: usize = 100_000;

/// Time-windowed latency history.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<(Instant, Duration)>,
    window: Duration,
    total: u64,
}

impl LatencyWindow {
    pub fn new(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(1024),
            window,
            total: 0,
        }
    }

    /// Record one observation and drop samples older than the window.
    pub fn record(&mut self, latency: Duration) {
        let now = Instant::now();
        self.total += 1;
        self.samples.push_back((now, latency));
        if self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.evict(now);
    }

    fn evict(&mut self, now: Instant) {
        let cutoff = now.checked_sub(self.window).unwrap_or(now);
        while let Some((at, _)) = self.samples.front() {
            if *at < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Observations ever recorded, including evicted ones.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Nearest-rank percentile over the current window, `pct` in `0..=100`.
    pub fn percentile(&self, pct: f64) -> Option<Duration> {
        let mut sorted: Vec<Duration> = self.samples.iter().map(|(_, d)| *d).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_unstable();
        let len = sorted.len();
        let rank = ((len as f64 * pct / 100.0).ceil() as usize).clamp(1, len);
        Some(sorted[rank - 1])
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: Duration = self.samples.iter().map(|(_, d)| *d).sum();
        Some(sum / self.samples.len() as u32)
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().map(|(_, d)| *d).max()
    }

    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            samples: self.samples.len(),
            mean: self.mean(),
            p50: self.percentile(50.0),
            p95: self.percentile(95.0),
            p99: self.percentile(99.0),
            max: self.max(),
        }
    }
}

/// Shared counters for one scheduler instance.
#[derive(Debug)]
pub struct SchedulerStats {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
    merges: AtomicU64,
    conflict_requeues: AtomicU64,
    capacity_waits: AtomicU64,
    abandoned: AtomicU64,
    worker_jobs: Vec<AtomicU64>,
    queue_wait: Mutex<LatencyWindow>,
    turnaround: Mutex<LatencyWindow>,
}

impl SchedulerStats {
    pub fn new(workers: usize) -> Self {
        Self {
            submitted: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            merges: AtomicU64::new(0),
            conflict_requeues: AtomicU64::new(0),
            capacity_waits: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            worker_jobs: (0..workers).map(|_| AtomicU64::new(0)).collect(),
            queue_wait: Mutex::new(LatencyWindow::new(DEFAULT_WINDOW)),
            turnaround: Mutex::new(LatencyWindow::new(DEFAULT_WINDOW)),
        }
    }

    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatch(&self, worker: usize, waited: Duration) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        if let Some(jobs) = self.worker_jobs.get(worker) {
            jobs.fetch_add(1, Ordering::Relaxed);
        }
        self.queue_wait.lock().record(waited);
    }

    pub(crate) fn record_merge(&self, turnaround: Duration) {
        self.merges.fetch_add(1, Ordering::Relaxed);
        self.turnaround.lock().record(turnaround);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict_requeue(&self) {
        self.conflict_requeues.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_capacity_wait(&self) {
        self.capacity_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter and summarise the latency windows.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            merges: self.merges.load(Ordering::Relaxed),
            conflict_requeues: self.conflict_requeues.load(Ordering::Relaxed),
            capacity_waits: self.capacity_waits.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            worker_jobs: self
                .worker_jobs
                .iter()
                .map(|jobs| jobs.load(Ordering::Relaxed))
                .collect(),
            queue_wait: self.queue_wait.lock().summary(),
            turnaround: self.turnaround.lock().summary(),
        }
    }
}

/// Latency percentiles over the current window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub samples: usize,
    #[serde(with = "duration_micros_option")]
    pub mean: Option<Duration>,
    #[serde(with = "duration_micros_option")]
    pub p50: Option<Duration>,
    #[serde(with = "duration_micros_option")]
    pub p95: Option<Duration>,
    #[serde(with = "duration_micros_option")]
    pub p99: Option<Duration>,
    #[serde(with = "duration_micros_option")]
    pub max: Option<Duration>,
}

/// Point-in-time copy of [`SchedulerStats`], serialisable for reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub dispatched: u64,
    pub failed: u64,
    /// Completed jobs folded back into the shared state.
    pub merges: u64,
    /// Admission attempts that lost to a conflicting reservation.
    pub conflict_requeues: u64,
    /// Admission attempts that found no free worker.
    pub capacity_waits: u64,
    /// Messages dropped undispatched by an immediate stop.
    pub abandoned: u64,
    pub worker_jobs: Vec<u64>,
    /// Submit to dispatch.
    pub queue_wait: LatencySummary,
    /// Submit to merge.
    pub turnaround: LatencySummary,
}

mod duration_micros_option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    // Microseconds as f64 keep sub-millisecond precision.
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_secs_f64() * 1_000_000.0)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros: Option<f64> = Option::deserialize(deserializer)?;
        Ok(micros.map(|us| Duration::from_secs_f64(us / 1_000_000.0)))
    }
}
