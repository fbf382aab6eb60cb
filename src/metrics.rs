//! Observability: `tracing` spans and Prometheus metrics
//!
//! Spans are emitted when the `tracing` feature is enabled, metrics when the
//! `metrics` feature is enabled. Both are no-ops for callers otherwise.

#[cfg(feature = "metrics")]
pub use prometheus_metrics::{KeelsonMetrics, METRICS};

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Span around one statement
    pub fn execute_query_span(sql: &str) -> Span {
        info_span!("keelson.query", db.system = "postgresql", db.statement = sql)
    }

    /// Span around acquiring a connection
    pub fn acquire_connection_span() -> Span {
        info_span!("keelson.acquire_connection")
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("keelson.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("keelson.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("keelson.transaction.rollback")
    }
}

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use std::time::Duration;

    use log::warn;
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, MeterProvider};
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::Registry;

    pub static METRICS: Lazy<KeelsonMetrics> = Lazy::new(KeelsonMetrics::init);

    pub struct KeelsonMetrics {
        /// Scraped by the application's `/metrics` handler
        pub registry: Registry,
        pub queries_total: Counter<u64>,
        pub query_errors_total: Counter<u64>,
        pub query_duration: Histogram<f64>,
        pub connection_wait_duration: Histogram<f64>,
        _provider: SdkMeterProvider,
    }

    impl KeelsonMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let provider = match opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
            {
                Ok(exporter) => SdkMeterProvider::builder().with_reader(exporter).build(),
                Err(e) => {
                    warn!("prometheus exporter unavailable, metrics will not be scraped: {e}");
                    SdkMeterProvider::builder().build()
                }
            };
            let meter = provider.meter("keelson");

            let queries_total = meter
                .u64_counter("keelson_queries_total")
                .with_description("Total statements executed")
                .build();

            let query_errors_total = meter
                .u64_counter("keelson_query_errors_total")
                .with_description("Statements rejected by the database")
                .build();

            let query_duration = meter
                .f64_histogram("keelson_query_duration_seconds")
                .with_description("Duration of statements")
                .build();

            let connection_wait_duration = meter
                .f64_histogram("keelson_connection_wait_seconds")
                .with_description("Time spent waiting for a pooled connection")
                .build();

            Self {
                registry,
                queries_total,
                query_errors_total,
                query_duration,
                connection_wait_duration,
                _provider: provider,
            }
        }

        pub fn record_query(&self, elapsed: Duration) {
            self.queries_total.add(1, &[]);
            self.query_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_query_error(&self) {
            self.query_errors_total.add(1, &[]);
        }

        pub fn record_connection_wait(&self, elapsed: Duration) {
            self.connection_wait_duration.record(elapsed.as_secs_f64(), &[]);
        }
    }
}
