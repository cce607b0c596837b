//! Rolling Window Store.
//!
//! Per `(entityId, metric)` bounded ring buffer, generalized from the
//! teacher's `BaselineCalculator` (which hardcodes RTT/loss/hop-count
//! ring buffers per endpoint) to an arbitrary metric name. Writes are
//! append-only and take a per-key lock; expiry happens lazily at query
//! time plus on a periodic cleanup sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::config::RollingWindowConfig;

#[derive(Debug, Clone, Copy)]
struct Sample {
    value: f64,
    at: Instant,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct WindowKey {
    pub entity_id: String,
    pub metric: String,
}

impl WindowKey {
    pub fn new(entity_id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            metric: metric.into(),
        }
    }
}

struct Window {
    samples: RwLock<Vec<Sample>>,
}

impl Window {
    fn new() -> Self {
        Self {
            samples: RwLock::new(Vec::new()),
        }
    }
}

/// Bounded per-`(entityId, metric)` sample store backing percentile,
/// moving-average and regression-slope queries for thresholds, anomaly
/// detection, and periodic trend analysis.
pub struct RollingWindowStore {
    windows: RwLock<HashMap<WindowKey, Arc<Window>>>,
    max_samples: usize,
    max_age: Duration,
}

impl RollingWindowStore {
    pub fn new(config: &RollingWindowConfig) -> Arc<Self> {
        Arc::new(Self {
            windows: RwLock::new(HashMap::new()),
            max_samples: config.max_samples,
            max_age: config.max_age(),
        })
    }

    fn window_for(&self, key: &WindowKey) -> Arc<Window> {
        if let Some(w) = self.windows.read().get(key) {
            return w.clone();
        }
        self.windows
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Window::new()))
            .clone()
    }

    /// Append a sample, dropping expired or overflow entries from the
    /// front of the ring as needed.
    pub fn record(&self, key: &WindowKey, value: f64) {
        let window = self.window_for(key);
        let now = Instant::now();
        let mut samples = window.samples.write();
        samples.push(Sample { value, at: now });
        prune(&mut samples, self.max_age, self.max_samples);
    }

    fn snapshot(&self, key: &WindowKey) -> Vec<f64> {
        let Some(window) = self.windows.read().get(key).cloned() else {
            return Vec::new();
        };
        let mut samples = window.samples.write();
        prune(&mut samples, self.max_age, self.max_samples);
        samples.iter().map(|s| s.value).collect()
    }

    pub fn count(&self, key: &WindowKey) -> usize {
        self.snapshot(key).len()
    }

    pub fn mean(&self, key: &WindowKey) -> Option<f64> {
        let values = self.snapshot(key);
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub fn min(&self, key: &WindowKey) -> Option<f64> {
        self.snapshot(key)
            .into_iter()
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.min(v))))
    }

    pub fn max(&self, key: &WindowKey) -> Option<f64> {
        self.snapshot(key)
            .into_iter()
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    pub fn stddev(&self, key: &WindowKey) -> Option<f64> {
        let values = self.snapshot(key);
        if values.len() < 2 {
            return None;
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
        Some(variance.sqrt())
    }

    /// Percentile from a sorted copy of the current window, `p` in `(0,1)`.
    pub fn percentile(&self, key: &WindowKey, p: f64) -> Option<f64> {
        let mut values = self.snapshot(key);
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let idx = ((values.len() as f64 - 1.0) * p.clamp(0.0, 1.0)).round() as usize;
        Some(values[idx])
    }

    /// Ordinary-least-squares slope of `value` against sample index,
    /// generalizing the teacher's two-window percentile-delta regression
    /// check to a proper trend line over the whole ring.
    pub fn regression_slope(&self, key: &WindowKey) -> Option<f64> {
        let values = self.snapshot(key);
        if values.len() < 2 {
            return None;
        }
        let n = values.len() as f64;
        let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
        let x_mean = xs.iter().sum::<f64>() / n;
        let y_mean = values.iter().sum::<f64>() / n;
        let mut num = 0.0;
        let mut den = 0.0;
        for (x, y) in xs.iter().zip(values.iter()) {
            num += (x - x_mean) * (y - y_mean);
            den += (x - x_mean).powi(2);
        }
        if den.abs() < 1e-12 {
            return Some(0.0);
        }
        Some(num / den)
    }

    /// Every `(entityId, metric)` pair currently tracked, for periodic
    /// analyzers that need to walk the whole store (aggregation, trend
    /// analysis) rather than query one key at a time.
    pub fn keys(&self) -> Vec<WindowKey> {
        self.windows.read().keys().cloned().collect()
    }

    /// Periodic hourly cleanup: walk every window and drop expired
    /// samples even if nobody queries it for a while.
    pub fn cleanup(&self) {
        let windows: Vec<Arc<Window>> = self.windows.read().values().cloned().collect();
        for window in windows {
            let mut samples = window.samples.write();
            prune(&mut samples, self.max_age, self.max_samples);
        }
    }
}

fn prune(samples: &mut Vec<Sample>, max_age: Duration, max_samples: usize) {
    let cutoff = Instant::now().checked_sub(max_age);
    if let Some(cutoff) = cutoff {
        samples.retain(|s| s.at >= cutoff);
    }
    if samples.len() > max_samples {
        let excess = samples.len() - max_samples;
        samples.drain(0..excess);
    }
}
