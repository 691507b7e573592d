/*!
Observability for the persistence pipeline.

- Structured logging via `tracing-subscriber` (JSON or compact text)
- Prometheus counters and histograms behind the `metrics` feature
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, SatStoreError};

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<SatStoreMetrics> = OnceLock::new();

/// Metrics collected while persisting artifacts
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct SatStoreMetrics {
    pub artifacts_written_total: Counter,
    pub artifacts_skipped_total: Counter,
    pub write_failures_total: Counter,
    pub write_latency_seconds: Histogram,
    pub artifact_size_bytes: Histogram,

    pub uploads_total: Counter,
    pub upload_errors_total: Counter,
    pub upload_retries_total: Counter,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn register_counter(registry: &Registry, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| SatStoreError::configuration(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| SatStoreError::configuration(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

#[cfg(feature = "metrics")]
fn register_histogram(registry: &Registry, opts: HistogramOpts) -> Result<Histogram> {
    let name = opts.common_opts.name.clone();
    let histogram = Histogram::with_opts(opts)
        .map_err(|e| SatStoreError::configuration(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(histogram.clone()))
        .map_err(|e| SatStoreError::configuration(format!("Failed to register {name}: {e}")))?;
    Ok(histogram)
}

#[cfg(feature = "metrics")]
impl SatStoreMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        Ok(Self {
            artifacts_written_total: register_counter(
                &registry,
                "satstore_artifacts_written_total",
                "Artifacts successfully written to every requested destination",
            )?,
            artifacts_skipped_total: register_counter(
                &registry,
                "satstore_artifacts_skipped_total",
                "Artifacts skipped because of an invalid acquisition datetime",
            )?,
            write_failures_total: register_counter(
                &registry,
                "satstore_write_failures_total",
                "Artifact writes that failed",
            )?,
            write_latency_seconds: register_histogram(
                &registry,
                HistogramOpts::new(
                    "satstore_write_latency_seconds",
                    "Duration of one artifact write including upload",
                ),
            )?,
            artifact_size_bytes: register_histogram(
                &registry,
                HistogramOpts::new("satstore_artifact_size_bytes", "Serialized artifact size")
                    .buckets(prometheus::exponential_buckets(1024.0, 4.0, 10).unwrap_or_default()),
            )?,
            uploads_total: register_counter(
                &registry,
                "satstore_uploads_total",
                "Remote upload attempts",
            )?,
            upload_errors_total: register_counter(
                &registry,
                "satstore_upload_errors_total",
                "Remote uploads that failed after retrying",
            )?,
            upload_retries_total: register_counter(
                &registry,
                "satstore_upload_retries_total",
                "Remote upload retry attempts",
            )?,
            registry,
        })
    }

    /// Get or initialize global metrics instance
    pub fn global() -> &'static SatStoreMetrics {
        METRICS.get_or_init(|| Self::new().expect("Failed to initialize satstore metrics"))
    }

    pub fn record_written(&self, size_bytes: u64) {
        self.artifacts_written_total.inc();
        self.artifact_size_bytes.observe(size_bytes as f64);
    }

    pub fn record_skipped(&self) {
        self.artifacts_skipped_total.inc();
    }

    pub fn record_failure(&self) {
        self.write_failures_total.inc();
    }

    pub fn record_upload(&self, attempt: usize) {
        self.uploads_total.inc();
        if attempt > 1 {
            self.upload_retries_total.inc();
        }
    }

    pub fn record_upload_error(&self) {
        self.upload_errors_total.inc();
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| SatStoreError::configuration(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            SatStoreError::configuration(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

/// Timer recording the latency of one artifact write
#[cfg(feature = "metrics")]
pub struct MetricsTimer {
    start: Instant,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Complete the timer, recording a successful write
    pub fn finish(self, size_bytes: u64) {
        let metrics = SatStoreMetrics::global();
        metrics.write_latency_seconds.observe(self.start.elapsed().as_secs_f64());
        metrics.record_written(size_bytes);
    }

    /// Complete the timer, recording a failed write
    pub fn finish_with_error(self) {
        let metrics = SatStoreMetrics::global();
        metrics.write_latency_seconds.observe(self.start.elapsed().as_secs_f64());
        metrics.record_failure();
    }
}

/// Log output style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` is honoured; without it satstore logs at info level.
///
/// # Errors
/// Fails if a global subscriber is already installed
pub fn init_observability(format: LogFormat) -> Result<()> {
    #[cfg(feature = "metrics")]
    SatStoreMetrics::global();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("satstore=info,satstore_core=info"));

    let installed = match format {
        LogFormat::Json => set_global_default(
            TracingRegistry::default().with(filter).with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(false),
            ),
        ),
        LogFormat::Compact => set_global_default(
            TracingRegistry::default()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().compact().with_target(false)),
        ),
    };
    installed.map_err(|e| {
        SatStoreError::configuration(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!("satstore observability initialized");
    Ok(())
}

/// Initialize observability with JSON logs
pub fn init_default_observability() -> Result<()> {
    init_observability(LogFormat::Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        // Only test in the crate that installs a global subscriber.
        assert!(init_observability(LogFormat::Compact).is_ok());
        assert!(matches!(
            init_default_observability(),
            Err(SatStoreError::Configuration(_))
        ));
    }
}
