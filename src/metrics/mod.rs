//! Metrics collection for observability

use prometheus::{
    Counter, CounterVec, Histogram, Opts, Registry,
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry,
};
use std::sync::Arc;
use once_cell::sync::Lazy;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| {
    Arc::new(Metrics::new().expect("Failed to initialize metrics"))
});

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Completion API metrics
    pub completion_requests: CounterVec,
    pub completion_request_duration: Histogram,
    pub prompt_tokens: Histogram,

    // Streaming metrics
    pub stream_fragments: Counter,
    pub malformed_chunks: Counter,
    pub cancelled_replies: Counter,

    // Token budget metrics
    pub truncated_messages: Counter,
    pub encoding_fallbacks: Counter,

    // Storage metrics
    pub storage_timeouts: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let registry = Registry::new();

        let completion_requests = register_counter_vec_with_registry!(
            Opts::new("completion_requests_total", "Total chat completion requests"),
            &["status"],
            registry
        )?;

        let completion_request_duration = register_histogram_with_registry!(
            "completion_request_duration_seconds",
            "Time until the completion response headers arrived",
            registry
        )?;

        let prompt_tokens = register_histogram_with_registry!(
            "prompt_tokens",
            "Tokens sent per completion request",
            vec![64.0, 256.0, 1024.0, 2048.0, 4096.0, 8192.0, 16384.0, 32768.0],
            registry
        )?;

        let stream_fragments = register_counter_with_registry!(
            Opts::new("stream_fragments_total", "Content fragments received from streams"),
            registry
        )?;

        let malformed_chunks = register_counter_with_registry!(
            Opts::new("malformed_chunks_total", "Stream lines skipped as malformed"),
            registry
        )?;

        let cancelled_replies = register_counter_with_registry!(
            Opts::new("cancelled_replies_total", "Replies cancelled mid-stream"),
            registry
        )?;

        let truncated_messages = register_counter_with_registry!(
            Opts::new("truncated_messages_total", "Messages evicted to fit the token budget"),
            registry
        )?;

        let encoding_fallbacks = register_counter_with_registry!(
            Opts::new("encoding_fallbacks_total", "Unrecognized models counted with the fallback encoding"),
            registry
        )?;

        let storage_timeouts = register_counter_with_registry!(
            Opts::new("storage_timeouts_total", "Storage loads that exceeded their wait"),
            registry
        )?;

        Ok(Self {
            registry,
            completion_requests,
            completion_request_duration,
            prompt_tokens,
            stream_fragments,
            malformed_chunks,
            cancelled_replies,
            truncated_messages,
            encoding_fallbacks,
            storage_timeouts,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the outcome of a completion request
    pub fn record_completion_request(&self, status: &str) {
        self.completion_requests.with_label_values(&[status]).inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}
