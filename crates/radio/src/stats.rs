//! Shared link counters and the periodic throughput aggregator

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use log::info;
use serde::Serialize;
use tokio::time::{interval, Instant, MissedTickBehavior};

const NO_SIGNAL: i32 = i32::MIN;

/// Lifecycle of the single in-flight send.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SendOutcome {
    Idle = 0,
    Busy = 1,
    Succeeded = 2,
    Failed = 3,
}

impl SendOutcome {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SendOutcome::Busy,
            2 => SendOutcome::Succeeded,
            3 => SendOutcome::Failed,
            _ => SendOutcome::Idle,
        }
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SendOutcome::Idle => "idle",
            SendOutcome::Busy => "busy",
            SendOutcome::Succeeded => "succeeded",
            SendOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Process-wide counters. Every field is its own atomic so the capture and
/// completion callbacks never wait on the reporting task.
#[derive(Debug)]
pub struct Statistics {
    window_bytes: AtomicU64,
    total_bytes: AtomicU64,
    rate_bits: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejected: AtomicU64,
    signal: AtomicI32,
    samples: AtomicU64,
    samples_contended: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    rx_window_bytes: AtomicU64,
    rx_rate_bits: AtomicU64,
    outcome: AtomicU8,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            window_bytes: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            rate_bits: AtomicU64::new(0f64.to_bits()),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            signal: AtomicI32::new(NO_SIGNAL),
            samples: AtomicU64::new(0),
            samples_contended: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            rx_window_bytes: AtomicU64::new(0),
            rx_rate_bits: AtomicU64::new(0f64.to_bits()),
            outcome: AtomicU8::new(SendOutcome::Idle as u8),
        }
    }

    pub fn outcome(&self) -> SendOutcome {
        SendOutcome::from_u8(self.outcome.load(Ordering::Acquire))
    }

    /// Moves the outcome from `from` to `to`; fails if another context got there first.
    pub fn transition(&self, from: SendOutcome, to: SendOutcome) -> bool {
        self.outcome
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn record_success(&self, bytes: u64) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.window_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Stores a new averaged signal and returns the previous one.
    pub fn publish_signal(&self, average: i32) -> Option<i32> {
        self.samples.fetch_add(1, Ordering::Relaxed);
        let previous = self.signal.swap(average, Ordering::Relaxed);
        (previous != NO_SIGNAL).then_some(previous)
    }

    pub fn record_contended_sample(&self) {
        self.samples_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.rx_window_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn signal(&self) -> Option<i32> {
        let value = self.signal.load(Ordering::Relaxed);
        (value != NO_SIGNAL).then_some(value)
    }

    pub fn window_bytes(&self) -> u64 {
        self.window_bytes.load(Ordering::Relaxed)
    }

    /// Bytes received from the peer in the current window.
    pub fn rx_window_bytes(&self) -> u64 {
        self.rx_window_bytes.load(Ordering::Relaxed)
    }

    /// Removes the given byte counts from the window; anything added since they were read stays.
    fn drain_window(&self, sent: u64, received: u64) {
        self.window_bytes.fetch_sub(sent, Ordering::Relaxed);
        self.rx_window_bytes.fetch_sub(received, Ordering::Relaxed);
    }

    pub fn rate_kbps(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    fn set_rate_kbps(&self, rate: f64) {
        self.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
    }

    /// Receive-side throughput, computed like [`Statistics::rate_kbps`].
    pub fn rx_rate_kbps(&self) -> f64 {
        f64::from_bits(self.rx_rate_bits.load(Ordering::Relaxed))
    }

    fn set_rx_rate_kbps(&self, rate: f64) {
        self.rx_rate_bits.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            window_bytes: self.window_bytes(),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            rate_kbps: self.rate_kbps(),
            successes: self.successes(),
            failures: self.failures(),
            rejected: self.rejected.load(Ordering::Relaxed),
            signal: self.signal(),
            samples: self.samples.load(Ordering::Relaxed),
            samples_contended: self.samples_contended.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            rx_window_bytes: self.rx_window_bytes(),
            rx_rate_kbps: self.rx_rate_kbps(),
            outcome: self.outcome(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub window_bytes: u64,
    pub total_bytes: u64,
    pub rate_kbps: f64,
    pub successes: u64,
    pub failures: u64,
    pub rejected: u64,
    pub signal: Option<i32>,
    pub samples: u64,
    pub samples_contended: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub rx_window_bytes: u64,
    pub rx_rate_kbps: f64,
    pub outcome: SendOutcome,
}

/// What one aggregator tick saw.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub window_bytes: u64,
    pub window_elapsed_ms: u64,
    pub window_reset: bool,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent {} B in {:.1}s | {:.2} KB/s | ok {} fail {} rejected {} | rx {} ({:.2} KB/s) | ",
            self.window_bytes,
            self.window_elapsed_ms as f64 / 1000.0,
            self.stats.rate_kbps,
            self.stats.successes,
            self.stats.failures,
            self.stats.rejected,
            self.stats.packets_received,
            self.stats.rx_rate_kbps,
        )?;
        match self.stats.signal {
            Some(signal) => write!(f, "signal {} dBm", signal)?,
            None => write!(f, "signal n/a")?,
        }
        write!(f, " | {}", self.stats.outcome)
    }
}

fn kbps(bytes: u64, elapsed: Duration) -> f64 {
    bytes as f64 / 1024.0 / elapsed.as_secs_f64()
}

/// Turns the byte counters into windowed rates on a fixed cadence.
pub struct StatsAggregator {
    stats: Arc<Statistics>,
    report_interval: Duration,
    window: Duration,
    window_start: Instant,
}

impl StatsAggregator {
    pub fn new(stats: Arc<Statistics>, report_interval: Duration, window: Duration, now: Instant) -> Self {
        Self {
            stats,
            report_interval,
            window,
            window_start: now,
        }
    }

    pub fn tick(&mut self, now: Instant) -> StatsReport {
        let elapsed = now.saturating_duration_since(self.window_start);
        let bytes = self.stats.window_bytes();
        let received = self.stats.rx_window_bytes();

        if !elapsed.is_zero() {
            if bytes > 0 {
                self.stats.set_rate_kbps(kbps(bytes, elapsed));
            }
            if received > 0 {
                self.stats.set_rx_rate_kbps(kbps(received, elapsed));
            }
        }

        let mut report = StatsReport {
            window_bytes: bytes,
            window_elapsed_ms: elapsed.as_millis() as u64,
            window_reset: false,
            stats: self.stats.snapshot(),
        };
        report.stats.window_bytes = bytes;
        report.stats.rx_window_bytes = received;

        if elapsed > self.window {
            self.stats.drain_window(bytes, received);
            self.window_start = now;
            report.window_reset = true;
        }
        report
    }

    /// Reports forever on the configured cadence.
    pub async fn run<F>(mut self, mut report_fn: F)
    where
        F: FnMut(&StatsReport) + Send,
    {
        let mut ticker = interval(self.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = self.tick(Instant::now());
            info!("{}", report);
            report_fn(&report);
        }
    }
}
