//! Signal strength sampling from captured management frames

use std::sync::{Arc, Mutex, TryLockError};
use linkprobe_core::Oui;
use log::debug;

use crate::framing::{FrameKind, RawFrame};
use crate::stats::Statistics;
use crate::transport::FrameCallback;

/// Fixed-capacity circular buffer of signal samples.
///
/// The first sample seeds every slot so the mean is meaningful from the
/// start; afterwards each sample replaces the oldest one.
#[derive(Debug, Clone)]
pub struct RollingAverage {
    slots: Box<[i32]>,
    cursor: usize,
    seeded: bool,
}

impl RollingAverage {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![0; capacity.max(1)].into_boxed_slice(),
            cursor: 0,
            seeded: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Inserts a sample and returns the new mean.
    pub fn push(&mut self, sample: i32) -> i32 {
        if !self.seeded {
            self.slots.fill(sample);
            self.seeded = true;
        } else {
            self.slots[self.cursor] = sample;
            self.cursor = (self.cursor + 1) % self.slots.len();
        }
        self.mean_of_slots()
    }

    pub fn mean(&self) -> Option<i32> {
        self.seeded.then(|| self.mean_of_slots())
    }

    // truncates toward zero, like the radio's integer readings
    fn mean_of_slots(&self) -> i32 {
        let sum: i64 = self.slots.iter().map(|&s| s as i64).sum();
        (sum / self.slots.len() as i64) as i32
    }
}

/// Accepts only vendor action frames from the paired boards' manufacturer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFilter {
    oui: Oui,
    subtype: u8,
}

impl FrameFilter {
    pub fn new(oui: Oui, subtype: u8) -> Self {
        Self { oui, subtype }
    }

    /// Signal reading of `frame` if it passes the filter.
    pub fn accept(&self, frame: &RawFrame) -> Option<i8> {
        if frame.kind != FrameKind::Management {
            return None;
        }
        let header = frame.header()?;
        (header.subtype() == self.subtype && header.sender.oui() == self.oui).then_some(frame.rssi)
    }
}

pub struct SignalSampler {
    filter: FrameFilter,
    buffer: Mutex<RollingAverage>,
    stats: Arc<Statistics>,
}

impl SignalSampler {
    pub fn new(filter: FrameFilter, window: usize, stats: Arc<Statistics>) -> Self {
        Self {
            filter,
            buffer: Mutex::new(RollingAverage::new(window)),
            stats,
        }
    }

    /// Runs in the transport's capture context: never blocks and never allocates.
    /// A call that finds the buffer held by another context drops its sample.
    pub fn on_frame(&self, frame: &RawFrame) -> Option<i32> {
        let rssi = self.filter.accept(frame)?;

        let mut buffer = match self.buffer.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.stats.record_contended_sample();
                return None;
            }
        };
        let average = buffer.push(rssi as i32);
        // published under the lock so the stored signal always matches the buffer
        let previous = self.stats.publish_signal(average);
        drop(buffer);

        if previous != Some(average) {
            debug!("signal average changed: {} dBm", average);
        }
        Some(average)
    }

    pub fn average(&self) -> Option<i32> {
        self.stats.signal()
    }

    pub fn callback(self: &Arc<Self>) -> FrameCallback {
        let sampler = Arc::clone(self);
        Arc::new(move |frame: &RawFrame| {
            sampler.on_frame(frame);
        })
    }
}
