//! Metrics Registry.
//!
//! Named counters, gauges, timers and distribution summaries with tag
//! sets, plus percentile estimation from a bounded recent-sample window.
//! Same shape as a hand-rolled Prometheus-adjacent registry: sharded maps
//! guarded by `parking_lot` locks, atomics for the hot counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;

/// A metric identity: name plus an ordered tag list. Tags are sorted on
/// construction so `("a",1),("b",2)` and `("b",2),("a",1)` hash the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub name: String,
    pub tags: Vec<(String, String)>,
}

impl MetricKey {
    pub fn new(name: impl Into<String>, tags: &[(&str, &str)]) -> Self {
        let mut tags: Vec<(String, String)> = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        tags.sort();
        Self {
            name: name.into(),
            tags,
        }
    }
}

#[derive(Debug, Default)]
struct Counter(AtomicU64);

#[derive(Debug, Default)]
struct Gauge(AtomicI64);

/// Bounded distribution summary backed by a ring of recent observations,
/// queried for percentiles the same way the rolling window store is.
#[derive(Debug)]
struct Summary {
    count: AtomicU64,
    sum: AtomicU64,
    recent: RwLock<Vec<u64>>,
    max_recent: usize,
}

impl Summary {
    fn new(max_recent: usize) -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            recent: RwLock::new(Vec::with_capacity(max_recent.min(64))),
            max_recent,
        }
    }

    fn record(&self, value_scaled: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value_scaled, Ordering::Relaxed);
        let mut recent = self.recent.write();
        recent.push(value_scaled);
        if recent.len() > self.max_recent {
            let excess = recent.len() - self.max_recent;
            recent.drain(0..excess);
        }
    }

    fn percentile(&self, p: f64) -> Option<f64> {
        let recent = self.recent.read();
        if recent.is_empty() {
            return None;
        }
        let mut sorted = recent.clone();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64 - 1.0) * p.clamp(0.0, 1.0)).round() as usize;
        Some(sorted[idx] as f64)
    }

    fn mean(&self) -> Option<f64> {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            None
        } else {
            Some(self.sum.load(Ordering::Relaxed) as f64 / count as f64)
        }
    }
}

/// Central metrics registry. One instance per engine, shared via `Arc`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    summaries: RwLock<HashMap<MetricKey, Summary>>,
}

const DEFAULT_SUMMARY_WINDOW: usize = 2000;

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, key: &MetricKey) {
        self.incr_by(key, 1);
    }

    pub fn incr_by(&self, key: &MetricKey, delta: u64) {
        if let Some(c) = self.counters.read().get(key) {
            c.0.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(key.clone())
            .or_insert_with(Counter::default)
            .0
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn counter_value(&self, key: &MetricKey) -> u64 {
        self.counters
            .read()
            .get(key)
            .map(|c| c.0.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn set_gauge(&self, key: &MetricKey, value: i64) {
        if let Some(g) = self.gauges.read().get(key) {
            g.0.store(value, Ordering::Relaxed);
            return;
        }
        self.gauges
            .write()
            .entry(key.clone())
            .or_insert_with(Gauge::default)
            .0
            .store(value, Ordering::Relaxed);
    }

    pub fn gauge_value(&self, key: &MetricKey) -> i64 {
        self.gauges
            .read()
            .get(key)
            .map(|g| g.0.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record an observation (e.g. a handler's latency in microseconds)
    /// into a named distribution summary.
    pub fn observe(&self, key: &MetricKey, value: f64) {
        let scaled = value.max(0.0).round() as u64;
        if let Some(s) = self.summaries.read().get(key) {
            s.record(scaled);
            return;
        }
        self.summaries
            .write()
            .entry(key.clone())
            .or_insert_with(|| Summary::new(DEFAULT_SUMMARY_WINDOW))
            .record(scaled);
    }

    pub fn percentile(&self, key: &MetricKey, p: f64) -> Option<f64> {
        self.summaries.read().get(key).and_then(|s| s.percentile(p))
    }

    pub fn mean(&self, key: &MetricKey) -> Option<f64> {
        self.summaries.read().get(key).and_then(|s| s.mean())
    }

    /// Convenience timer helper: records elapsed wall time of `f` into a
    /// summary keyed by `key` (microseconds) and returns `f`'s result.
    pub fn time<T>(&self, key: &MetricKey, f: impl FnOnce() -> T) -> T {
        let start = quanta::Clock::new().now();
        let result = f();
        let elapsed = start.elapsed();
        self.observe(key, elapsed.as_micros() as f64);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_with_tags() {
        let reg = MetricsRegistry::new();
        let k = MetricKey::new("performance_metrics_processed_total", &[("family", "performance")]);
        reg.incr(&k);
        reg.incr(&k);
        assert_eq!(reg.counter_value(&k), 2);
    }

    #[test]
    fn gauges_set_and_read() {
        let reg = MetricsRegistry::new();
        let k = MetricKey::new("consumer_lag", &[("partition", "0")]);
        reg.set_gauge(&k, 42);
        assert_eq!(reg.gauge_value(&k), 42);
        reg.set_gauge(&k, -5);
        assert_eq!(reg.gauge_value(&k), -5);
    }

    #[test]
    fn summary_reports_percentiles() {
        let reg = MetricsRegistry::new();
        let k = MetricKey::new("handler_latency_us", &[]);
        for v in 1..=100 {
            reg.observe(&k, v as f64);
        }
        let p50 = reg.percentile(&k, 0.5).unwrap();
        assert!((p50 - 50.0).abs() <= 1.0);
        let p99 = reg.percentile(&k, 0.99).unwrap();
        assert!(p99 >= 98.0);
    }

    #[test]
    fn distinct_tag_sets_are_distinct_metrics() {
        let reg = MetricsRegistry::new();
        let a = MetricKey::new("errors_total", &[("family", "a")]);
        let b = MetricKey::new("errors_total", &[("family", "b")]);
        reg.incr(&a);
        assert_eq!(reg.counter_value(&a), 1);
        assert_eq!(reg.counter_value(&b), 0);
    }
}
