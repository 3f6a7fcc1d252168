//! Timing and memory measurement.
//!
//! [`Instrumentation::measure`] wraps any operation without touching its result. Findings go
//! to a [`DiagnosticSink`]; the cache store reports its swallowed failures to the same sink.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use sysinfo::{Pid, System};
use tracing::{info, warn};

use crate::cache::lock::mutex_lock;

const SOURCE: &str = "instrumentation";

pub(crate) const METRIC_OPERATION_MS: &str = "storefront_operation_ms";
pub(crate) const METRIC_SLOW_OPERATION_TOTAL: &str = "storefront_slow_operation_total";
pub(crate) const METRIC_STORE_ERROR_TOTAL: &str = "storefront_cache_store_error_total";

const DEFAULT_SLOW_THRESHOLD_MS: u64 = 1000;
const DEFAULT_EXCELLENT_MS: u64 = 200;
const DEFAULT_GOOD_MS: u64 = 500;
const DEFAULT_WARNING_MS: u64 = 1000;

/// Upper bounds for each response-time grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradeThresholds {
    pub excellent: Duration,
    pub good: Duration,
    pub warning: Duration,
}

impl Default for GradeThresholds {
    fn default() -> Self {
        Self {
            excellent: Duration::from_millis(DEFAULT_EXCELLENT_MS),
            good: Duration::from_millis(DEFAULT_GOOD_MS),
            warning: Duration::from_millis(DEFAULT_WARNING_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Excellent,
    Good,
    Warning,
    Critical,
}

impl Grade {
    pub fn classify(elapsed: Duration, thresholds: &GradeThresholds) -> Self {
        if elapsed < thresholds.excellent {
            Grade::Excellent
        } else if elapsed < thresholds.good {
            Grade::Good
        } else if elapsed < thresholds.warning {
            Grade::Warning
        } else {
            Grade::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Grade::Excellent => "excellent",
            Grade::Good => "good",
            Grade::Warning => "warning",
            Grade::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Report every measurement, not only slow ones.
    pub log_execution_time: bool,
    /// Sample resident memory before and after each measured operation. Each sample reads
    /// process statistics from the OS, so this is off unless asked for.
    pub log_memory_usage: bool,
    pub slow_threshold: Duration,
    pub grades: GradeThresholds,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_execution_time: true,
            log_memory_usage: false,
            slow_threshold: Duration::from_millis(DEFAULT_SLOW_THRESHOLD_MS),
            grades: GradeThresholds::default(),
        }
    }
}

/// Result of one measured operation.
#[derive(Debug, Clone)]
pub struct Measurement {
    pub label: String,
    pub elapsed: Duration,
    /// Resident-set change in bytes; `None` when sampling is off or unsupported.
    pub memory_delta_bytes: Option<i64>,
    pub grade: Grade,
    pub slow: bool,
}

/// A cache store failure that was absorbed instead of propagated.
#[derive(Debug, Clone)]
pub struct StoreFailure {
    pub op: &'static str,
    pub backend: &'static str,
    pub key: String,
    pub error: String,
}

pub trait DiagnosticSink: Send + Sync {
    fn measured(&self, measurement: &Measurement);
    fn slow_operation(&self, measurement: &Measurement);
    fn store_failed(&self, failure: &StoreFailure);
}

/// Emits diagnostics as tracing events and metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn measured(&self, measurement: &Measurement) {
        let elapsed_ms = measurement.elapsed.as_secs_f64() * 1000.0;
        info!(
            label = %measurement.label,
            elapsed_ms,
            memory_delta_kb = measurement.memory_delta_bytes.map(|bytes| bytes / 1024),
            grade = measurement.grade.as_str(),
            "Performance measured"
        );
        histogram!(METRIC_OPERATION_MS, "grade" => measurement.grade.as_str()).record(elapsed_ms);
    }

    fn slow_operation(&self, measurement: &Measurement) {
        warn!(
            label = %measurement.label,
            elapsed_ms = measurement.elapsed.as_secs_f64() * 1000.0,
            memory_delta_kb = measurement.memory_delta_bytes.map(|bytes| bytes / 1024),
            "Slow operation detected"
        );
        counter!(METRIC_SLOW_OPERATION_TOTAL).increment(1);
    }

    fn store_failed(&self, failure: &StoreFailure) {
        warn!(
            op = failure.op,
            backend = failure.backend,
            key = %failure.key,
            error = %failure.error,
            result = "fail_open",
            "Cache store unavailable"
        );
        counter!(
            METRIC_STORE_ERROR_TOTAL,
            "op" => failure.op,
            "backend" => failure.backend
        )
        .increment(1);
    }
}

/// Keeps diagnostics in memory for later inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    measurements: Mutex<Vec<Measurement>>,
    slow: Mutex<Vec<Measurement>>,
    failures: Mutex<Vec<StoreFailure>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn measurements(&self) -> Vec<Measurement> {
        mutex_lock(&self.measurements, SOURCE, "measurements").clone()
    }

    pub fn slow_operations(&self) -> Vec<Measurement> {
        mutex_lock(&self.slow, SOURCE, "slow_operations").clone()
    }

    pub fn store_failures(&self) -> Vec<StoreFailure> {
        mutex_lock(&self.failures, SOURCE, "store_failures").clone()
    }
}

impl DiagnosticSink for MemorySink {
    fn measured(&self, measurement: &Measurement) {
        mutex_lock(&self.measurements, SOURCE, "measured").push(measurement.clone());
    }

    fn slow_operation(&self, measurement: &Measurement) {
        mutex_lock(&self.slow, SOURCE, "slow_operation").push(measurement.clone());
    }

    fn store_failed(&self, failure: &StoreFailure) {
        mutex_lock(&self.failures, SOURCE, "store_failed").push(failure.clone());
    }
}

/// Samples the resident set size of this process.
///
/// Every sample uses its own `System`, so concurrent measurements never wait on each other.
struct MemoryProbe {
    pid: Pid,
}

impl MemoryProbe {
    fn new() -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        Some(Self { pid })
    }

    fn resident_bytes(&self) -> Option<u64> {
        let mut system = System::new();
        if !system.refresh_process(self.pid) {
            return None;
        }
        system.process(self.pid).map(|process| process.memory())
    }
}

struct Started {
    at: Instant,
    resident_bytes: Option<u64>,
}

pub struct Instrumentation {
    config: MonitoringConfig,
    sink: Arc<dyn DiagnosticSink>,
    memory: Option<MemoryProbe>,
}

impl Instrumentation {
    pub fn new(config: MonitoringConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        let memory = if config.log_memory_usage {
            MemoryProbe::new()
        } else {
            None
        };
        Self {
            config,
            sink,
            memory,
        }
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.sink
    }

    /// Whether `elapsed` crosses the configured slow threshold.
    pub fn is_slow(&self, elapsed: Duration) -> bool {
        elapsed > self.config.slow_threshold
    }

    pub fn measure<T>(&self, label: &str, operation: impl FnOnce() -> T) -> T {
        let started = self.start();
        let result = operation();
        self.finish(label, started);
        result
    }

    pub async fn measure_async<F: Future>(&self, label: &str, operation: F) -> F::Output {
        let started = self.start();
        let result = operation.await;
        self.finish(label, started);
        result
    }

    fn start(&self) -> Started {
        Started {
            resident_bytes: self.memory.as_ref().and_then(MemoryProbe::resident_bytes),
            at: Instant::now(),
        }
    }

    fn finish(&self, label: &str, started: Started) {
        let elapsed = started.at.elapsed();
        let memory_delta_bytes = match (
            started.resident_bytes,
            self.memory.as_ref().and_then(MemoryProbe::resident_bytes),
        ) {
            (Some(before), Some(after)) => Some(after as i64 - before as i64),
            _ => None,
        };

        let slow = self.is_slow(elapsed);
        let measurement = Measurement {
            label: label.to_string(),
            elapsed,
            memory_delta_bytes,
            grade: Grade::classify(elapsed, &self.config.grades),
            slow,
        };

        if self.config.log_execution_time {
            self.sink.measured(&measurement);
        }
        if slow {
            self.sink.slow_operation(&measurement);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrumentation(config: MonitoringConfig) -> (Instrumentation, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (Instrumentation::new(config, sink.clone()), sink)
    }

    #[test]
    fn grade_boundaries() {
        let thresholds = GradeThresholds::default();
        assert_eq!(
            Grade::classify(Duration::from_millis(199), &thresholds),
            Grade::Excellent
        );
        assert_eq!(
            Grade::classify(Duration::from_millis(200), &thresholds),
            Grade::Good
        );
        assert_eq!(
            Grade::classify(Duration::from_millis(999), &thresholds),
            Grade::Warning
        );
        assert_eq!(
            Grade::classify(Duration::from_millis(5000), &thresholds),
            Grade::Critical
        );
    }

    #[test]
    fn measure_returns_the_operation_result_untouched() {
        let (instrumentation, sink) = instrumentation(MonitoringConfig {
            log_memory_usage: false,
            ..Default::default()
        });

        let ok: Result<u32, String> = instrumentation.measure("ok", || Ok(7));
        let err: Result<u32, String> = instrumentation.measure("err", || Err("boom".into()));

        assert_eq!(ok, Ok(7));
        assert_eq!(err, Err("boom".to_string()));
        let labels = sink
            .measurements()
            .into_iter()
            .map(|m| m.label)
            .collect::<Vec<_>>();
        assert_eq!(labels, ["ok", "err"]);
    }

    #[test]
    fn slow_operations_reach_the_sink_even_when_timing_logs_are_off() {
        let (instrumentation, sink) = instrumentation(MonitoringConfig {
            log_execution_time: false,
            log_memory_usage: false,
            slow_threshold: Duration::ZERO,
            ..Default::default()
        });

        instrumentation.measure("sleepy", || std::thread::sleep(Duration::from_millis(2)));

        assert!(sink.measurements().is_empty());
        let slow = sink.slow_operations();
        assert_eq!(slow.len(), 1);
        assert!(slow[0].slow);
        assert_eq!(slow[0].label, "sleepy");
    }

    #[test]
    fn is_slow_is_strictly_greater_than_threshold() {
        let (instrumentation, _) = instrumentation(MonitoringConfig {
            log_memory_usage: false,
            slow_threshold: Duration::from_millis(1000),
            ..Default::default()
        });
        assert!(!instrumentation.is_slow(Duration::from_millis(1000)));
        assert!(instrumentation.is_slow(Duration::from_millis(1001)));
    }

    #[tokio::test]
    async fn measure_async_passes_output_through() {
        let (instrumentation, sink) = instrumentation(MonitoringConfig::default());
        let value = instrumentation
            .measure_async("async", async { "rendered" })
            .await;
        assert_eq!(value, "rendered");
        assert_eq!(sink.measurements().len(), 1);
    }

    #[test]
    fn memory_sampling_is_opt_in() {
        let (instrumentation, sink) = instrumentation(MonitoringConfig::default());
        instrumentation.measure("plain", || ());
        assert_eq!(sink.measurements()[0].memory_delta_bytes, None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn memory_sampling_works_across_threads() {
        let (instrumentation, sink) = instrumentation(MonitoringConfig {
            log_memory_usage: true,
            ..Default::default()
        });

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| instrumentation.measure("render", || vec![0u8; 4096].len()));
            }
        });

        let measurements = sink.measurements();
        assert_eq!(measurements.len(), 4);
        assert!(measurements.iter().all(|m| m.memory_delta_bytes.is_some()));
    }
}
