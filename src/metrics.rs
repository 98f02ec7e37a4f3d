//! Metrics sink abstraction, standing in for the external statsd/datadog client the process
//! would report to in production. [`NullMetrics`] is the default; [`RecordingMetrics`] is a
//! test double used by task tests to assert on counters/timers fired.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

pub trait Metrics: Send + Sync {
    fn incr(&self, key: &str);
    fn timer(&self, key: &str, dur: Duration);
}

#[derive(Debug, Default)]
pub struct NullMetrics;

impl Metrics for NullMetrics {
    fn incr(&self, _key: &str) {}
    fn timer(&self, _key: &str, _dur: Duration) {}
}

#[derive(Debug, Default)]
pub struct RecordingMetrics {
    counters: Mutex<BTreeMap<String, i64>>,
    timers: Mutex<BTreeMap<String, Vec<Duration>>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, key: &str) -> i64 {
        self.counters.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    pub fn timer_calls(&self, key: &str) -> usize {
        self.timers.lock().unwrap().get(key).map(Vec::len).unwrap_or(0)
    }
}

impl Metrics for RecordingMetrics {
    fn incr(&self, key: &str) {
        *self.counters.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;
    }

    fn timer(&self, key: &str, dur: Duration) {
        self.timers
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(dur);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_metrics_counts_increments() {
        let m = RecordingMetrics::new();
        m.incr("task.wifi_location_update");
        m.incr("task.wifi_location_update");
        assert_eq!(m.count("task.wifi_location_update"), 2);
        assert_eq!(m.count("task.other"), 0);
    }

    #[test]
    fn recording_metrics_tracks_timer_calls() {
        let m = RecordingMetrics::new();
        m.timer("task.trim_excessive_data", Duration::from_millis(5));
        m.timer("task.trim_excessive_data", Duration::from_millis(7));
        assert_eq!(m.timer_calls("task.trim_excessive_data"), 2);
    }
}
