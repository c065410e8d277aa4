use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, http::StatusCode, routing::get};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, MeterProvider, UpDownCounter};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use tracing::{error, info};

/// Observability handle passed into every component that reports on the
/// ingestion pipeline. Cloning is cheap; all clones record into one registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,

    // Ingestion metrics
    pub events_received: Counter<u64>,
    pub events_dropped: Counter<u64>,
    pub decode_errors: Counter<u64>,
    pub active_subscriptions: UpDownCounter<i64>,

    // RPC metrics
    pub rpc_requests: Counter<u64>,
    pub rpc_errors: Counter<u64>,
    pub rpc_latency: Histogram<f64>,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricError> {
        let registry = prometheus::Registry::new();

        // Configure OpenTelemetry to use this registry
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("watcher_metrics");

        let events_received = meter
            .u64_counter("watcher_events_received")
            .with_description("Events appended to the transaction store")
            .build();

        let events_dropped = meter
            .u64_counter("watcher_events_dropped")
            .with_description("Events discarded because a subscription queue was full")
            .build();

        let decode_errors = meter
            .u64_counter("watcher_decode_errors")
            .with_description("Stream frames that could not be decoded into an event")
            .build();

        let active_subscriptions = meter
            .i64_up_down_counter("watcher_active_subscriptions")
            .with_description("Addresses with a running watcher task")
            .build();

        let rpc_requests = meter
            .u64_counter("watcher_rpc_requests")
            .with_description("Number of RPC requests made")
            .build();

        let rpc_errors = meter
            .u64_counter("watcher_rpc_errors")
            .with_description("Number of RPC errors encountered")
            .build();

        let rpc_latency = meter
            .f64_histogram("watcher_rpc_latency")
            .with_description("RPC request latency")
            .with_boundaries(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 5.0, 10.0,
            ])
            .with_unit("s")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            events_received,
            events_dropped,
            decode_errors,
            active_subscriptions,
            rpc_requests,
            rpc_errors,
            rpc_latency,
        })
    }

    pub fn record_event(&self, address: &str) {
        self.events_received
            .add(1, &[KeyValue::new("address", address.to_string())]);
    }

    pub fn record_drop(&self, address: &str) {
        self.events_dropped
            .add(1, &[KeyValue::new("address", address.to_string())]);
    }

    pub fn record_rpc(&self, method: &'static str, elapsed_secs: f64, failed: bool) {
        let attributes = [KeyValue::new("method", method)];
        self.rpc_requests.add(1, &attributes);
        self.rpc_latency.record(elapsed_secs, &attributes);
        if failed {
            self.rpc_errors.add(1, &attributes);
        }
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> Result<()> {
        let addr = format!("{addr}:{port}")
            .parse::<SocketAddr>()
            .context("invalid metrics bind address")?;
        let metrics = self.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(metrics.clone())));

        // Determine the access URL based on the binding address. Only used for logging.
        let access_url = if addr.ip().is_unspecified() {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind metrics server to {addr}"))?;

        // Spawn the server in a separate task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server error: {}", e);
            }
        });

        Ok(())
    }
}

async fn metrics_handler(metrics: Metrics) -> Result<String, (StatusCode, String)> {
    metrics
        .render()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
