//! Turns noisy raw input samples into clean press/release edges.
//!
//! A level change is only accepted once it has been observed again at least
//! `confirm_ms` after it was first seen. Nothing here sleeps; callers feed one
//! sample per control-loop iteration together with a monotonic timestamp.

use std::collections::VecDeque;

use crate::{error::ControlError, types::EdgeEvent};

const BASELINE_WINDOW: usize = 5;

/// Confirms a boolean level before reporting it as an edge.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    confirm_ms: u64,
    stable: bool,
    pending_since_ms: Option<u64>,
}

impl EdgeDetector {
    pub fn new(confirm_ms: u64) -> Self {
        Self {
            confirm_ms,
            stable: false,
            pending_since_ms: None,
        }
    }

    pub fn is_pressed(&self) -> bool {
        self.stable
    }

    pub fn update(&mut self, pressed: bool, now_ms: u64) -> Option<EdgeEvent> {
        if pressed == self.stable {
            self.pending_since_ms = None;
            return None;
        }

        let since = *self.pending_since_ms.get_or_insert(now_ms);
        if now_ms.saturating_sub(since) < self.confirm_ms {
            return None;
        }

        self.stable = pressed;
        self.pending_since_ms = None;
        Some(if pressed {
            EdgeEvent::Pressed
        } else {
            EdgeEvent::Released
        })
    }
}

#[derive(Debug, Clone)]
struct TouchChannel {
    idle_samples: VecDeque<i32>,
    baseline: Option<i32>,
    edge: EdgeDetector,
}

impl TouchChannel {
    fn new(confirm_ms: u64) -> Self {
        Self {
            idle_samples: VecDeque::with_capacity(BASELINE_WINDOW),
            baseline: None,
            edge: EdgeDetector::new(confirm_ms),
        }
    }

    fn record_idle(&mut self, raw: i32) {
        if self.idle_samples.len() == BASELINE_WINDOW {
            self.idle_samples.pop_front();
        }
        self.idle_samples.push_back(raw);

        let mut sorted: Vec<i32> = self.idle_samples.iter().copied().collect();
        sorted.sort_unstable();
        self.baseline = Some(sorted[sorted.len() / 2]);
    }
}

/// Capacitive touch debouncer.
///
/// A touch pulls the raw reading down; an input counts as touched while
/// `baseline - raw` exceeds `threshold`. The baseline is the running median of
/// the most recent untouched samples, so a held finger never drags it down.
#[derive(Debug, Clone)]
pub struct Debouncer {
    threshold: i32,
    max_raw: i32,
    channels: Vec<TouchChannel>,
}

impl Debouncer {
    pub fn new(inputs: usize, threshold: i32, max_raw: i32, confirm_ms: u64) -> Self {
        Self {
            threshold,
            max_raw,
            channels: (0..inputs).map(|_| TouchChannel::new(confirm_ms)).collect(),
        }
    }

    pub fn sample(
        &mut self,
        index: usize,
        raw: i32,
        now_ms: u64,
    ) -> Result<Option<EdgeEvent>, ControlError> {
        let count = self.channels.len();
        let max_raw = self.max_raw;
        let threshold = self.threshold;
        let channel = self
            .channels
            .get_mut(index)
            .ok_or(ControlError::InvalidInput { index, count })?;

        if !(0..=max_raw).contains(&raw) {
            return Err(ControlError::InvalidSample { raw, max: max_raw });
        }

        let Some(baseline) = channel.baseline else {
            // First valid reading calibrates the channel.
            channel.record_idle(raw);
            return Ok(None);
        };

        let touched = baseline - raw > threshold;
        if !touched {
            channel.record_idle(raw);
        }

        Ok(channel.edge.update(touched, now_ms))
    }

    pub fn baseline(&self, index: usize) -> Option<i32> {
        self.channels.get(index).and_then(|channel| channel.baseline)
    }

    pub fn is_pressed(&self, index: usize) -> bool {
        self.channels
            .get(index)
            .map(|channel| channel.edge.is_pressed())
            .unwrap_or(false)
    }
}
