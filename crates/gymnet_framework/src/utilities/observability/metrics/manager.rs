//! Gymnet Metrics Manager

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::time::Duration;

const NAMESPACE: &str = "gymnet";
const ROUND_TRIP_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Exchange outcomes of one or more connection channels.
pub struct MetricsManager {
    registry: Registry,
    exchanges: IntCounter,
    timeouts: IntCounter,
    protocol_errors: IntCounter,
    connection_errors: IntCounter,
    round_trip: Histogram,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))
}

impl MetricsManager {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let exchanges = counter("exchanges_total", "Request/reply exchanges completed")?;
        let timeouts = counter("timeouts_total", "Exchanges that ran out of reply budget")?;
        let protocol_errors = counter(
            "protocol_errors_total",
            "Truncated, oversized or malformed frames",
        )?;
        let connection_errors = counter(
            "connection_errors_total",
            "Exchanges attempted without a usable connection",
        )?;
        let round_trip = Histogram::with_opts(
            HistogramOpts::new("round_trip_seconds", "Wall-clock request/reply latency")
                .namespace(NAMESPACE)
                .buckets(ROUND_TRIP_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(exchanges.clone()))?;
        registry.register(Box::new(timeouts.clone()))?;
        registry.register(Box::new(protocol_errors.clone()))?;
        registry.register(Box::new(connection_errors.clone()))?;
        registry.register(Box::new(round_trip.clone()))?;

        Ok(Self {
            registry,
            exchanges,
            timeouts,
            protocol_errors,
            connection_errors,
            round_trip,
        })
    }

    pub fn record_exchange(&self, round_trip: Duration) {
        self.exchanges.inc();
        self.round_trip.observe(round_trip.as_secs_f64());
    }

    pub fn record_timeout(&self) {
        self.timeouts.inc();
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.inc();
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.inc();
    }

    pub fn exchanges(&self) -> u64 {
        self.exchanges.get()
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.get()
    }

    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors.get()
    }

    pub fn connection_errors(&self) -> u64 {
        self.connection_errors.get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
