//! Metrics & Audit Sink (C10): counters, histograms, and structured events for each settlement
//! state transition (spec §4.10).
//!
//! The sink is an abstract interface with two implementations: a logger-backed one (every write
//! is also a `tracing` event, so a deployment with no metrics scraper still gets an audit trail)
//! and a `prometheus`-registry-backed one, grounded in the `x402-facilitator-local` crate's use
//! of the `prometheus` crate in the teacher's newer workspace layout.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, HistogramVec,
    IntCounterVec, Registry, TextEncoder,
};

use crate::network::Network;
use crate::types::ErrorReason;

/// A single state-transition event, carrying everything spec §4.10 asks for: request id,
/// network, payer, hook, and timing.
#[derive(Debug, Clone)]
pub struct TransitionEvent {
    pub request_id: String,
    pub network: Network,
    pub payer: String,
    pub hook: String,
    pub state: String,
    pub duration: Duration,
}

/// A terminal failure, recorded as a `(network, error_reason)` counter increment.
#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub network: Network,
    pub reason: ErrorReason,
}

pub trait MetricsSink: Send + Sync {
    fn record_transition(&self, event: &TransitionEvent);
    fn record_failure(&self, event: &FailureEvent);
    fn record_verify_duration(&self, network: Network, duration: Duration);
    fn record_settle_duration(&self, network: Network, duration: Duration);
    fn record_gas_used(&self, network: Network, gas_used: u64);
}

/// Writes every event as a structured `tracing` record. Always usable with zero setup, so it
/// doubles as the facilitator's audit log even when Prometheus scraping is disabled.
pub struct LoggerMetricsSink;

impl MetricsSink for LoggerMetricsSink {
    fn record_transition(&self, event: &TransitionEvent) {
        tracing::info!(
            request_id = %event.request_id,
            network = %event.network,
            payer = %event.payer,
            hook = %event.hook,
            state = %event.state,
            duration_ms = event.duration.as_millis() as u64,
            "settlement state transition"
        );
    }

    fn record_failure(&self, event: &FailureEvent) {
        tracing::warn!(network = %event.network, reason = ?event.reason, "settlement failed");
    }

    fn record_verify_duration(&self, network: Network, duration: Duration) {
        tracing::debug!(network = %network, duration_ms = duration.as_millis() as u64, "verify duration");
    }

    fn record_settle_duration(&self, network: Network, duration: Duration) {
        tracing::debug!(network = %network, duration_ms = duration.as_millis() as u64, "settle duration");
    }

    fn record_gas_used(&self, network: Network, gas_used: u64) {
        tracing::debug!(network = %network, gas_used, "gas used");
    }
}

/// Prometheus-registry-backed sink, exposed via `GET /metrics` (see [`crate::handlers`]).
pub struct PrometheusMetricsSink {
    registry: Registry,
    transitions_total: IntCounterVec,
    failures_total: IntCounterVec,
    verify_duration_seconds: HistogramVec,
    settle_duration_seconds: HistogramVec,
    gas_used: HistogramVec,
}

impl PrometheusMetricsSink {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = register_int_counter_vec_with_registry!(
            "facilitator_settlement_transitions_total",
            "Count of settlement pipeline state transitions",
            &["network", "state"],
            registry
        )
        .expect("metric registration cannot fail on a fresh registry");

        let failures_total = register_int_counter_vec_with_registry!(
            "facilitator_settlement_failures_total",
            "Count of settlement failures by reason",
            &["network", "reason"],
            registry
        )
        .expect("metric registration cannot fail on a fresh registry");

        let verify_duration_seconds = register_histogram_vec_with_registry!(
            "facilitator_verify_duration_seconds",
            "Verify endpoint duration",
            &["network"],
            registry
        )
        .expect("metric registration cannot fail on a fresh registry");

        let settle_duration_seconds = register_histogram_vec_with_registry!(
            "facilitator_settle_duration_seconds",
            "Settle endpoint duration",
            &["network"],
            registry
        )
        .expect("metric registration cannot fail on a fresh registry");

        let gas_used = register_histogram_vec_with_registry!(
            "facilitator_settlement_gas_used",
            "Gas used per settlement",
            &["network"],
            registry
        )
        .expect("metric registration cannot fail on a fresh registry");

        PrometheusMetricsSink {
            registry,
            transitions_total,
            failures_total,
            verify_duration_seconds,
            settle_duration_seconds,
            gas_used,
        }
    }

    /// Renders the registry in Prometheus text exposition format for the `/metrics` endpoint.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families)
    }
}

impl Default for PrometheusMetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for PrometheusMetricsSink {
    fn record_transition(&self, event: &TransitionEvent) {
        self.transitions_total
            .with_label_values(&[&event.network.to_string(), &event.state])
            .inc();
    }

    fn record_failure(&self, event: &FailureEvent) {
        self.failures_total
            .with_label_values(&[&event.network.to_string(), &format!("{:?}", event.reason)])
            .inc();
    }

    fn record_verify_duration(&self, network: Network, duration: Duration) {
        self.verify_duration_seconds
            .with_label_values(&[&network.to_string()])
            .observe(duration.as_secs_f64());
    }

    fn record_settle_duration(&self, network: Network, duration: Duration) {
        self.settle_duration_seconds
            .with_label_values(&[&network.to_string()])
            .observe(duration.as_secs_f64());
    }

    fn record_gas_used(&self, network: Network, gas_used: u64) {
        self.gas_used
            .with_label_values(&[&network.to_string()])
            .observe(gas_used as f64);
    }
}

/// Broadcasts every event to multiple sinks, so the logger and Prometheus sinks can run
/// simultaneously (spec §4.10 "one logger-backed and one metric-registry-backed implementation
/// are sufficient").
pub struct CompositeMetricsSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl CompositeMetricsSink {
    pub fn new(sinks: Vec<Arc<dyn MetricsSink>>) -> Self {
        CompositeMetricsSink { sinks }
    }
}

impl MetricsSink for CompositeMetricsSink {
    fn record_transition(&self, event: &TransitionEvent) {
        for sink in &self.sinks {
            sink.record_transition(event);
        }
    }

    fn record_failure(&self, event: &FailureEvent) {
        for sink in &self.sinks {
            sink.record_failure(event);
        }
    }

    fn record_verify_duration(&self, network: Network, duration: Duration) {
        for sink in &self.sinks {
            sink.record_verify_duration(network, duration);
        }
    }

    fn record_settle_duration(&self, network: Network, duration: Duration) {
        for sink in &self.sinks {
            sink.record_settle_duration(network, duration);
        }
    }

    fn record_gas_used(&self, network: Network, gas_used: u64) {
        for sink in &self.sinks {
            sink.record_gas_used(network, gas_used);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prometheus_sink_renders_registered_metrics() {
        let sink = PrometheusMetricsSink::new();
        sink.record_transition(&TransitionEvent {
            request_id: "r1".into(),
            network: Network::Base,
            payer: "0xabc".into(),
            hook: "0xdef".into(),
            state: "Done".into(),
            duration: Duration::from_millis(42),
        });
        let rendered = sink.render().expect("render");
        assert!(rendered.contains("facilitator_settlement_transitions_total"));
    }

    #[test]
    fn composite_sink_forwards_to_all_members() {
        let sink = CompositeMetricsSink::new(vec![
            Arc::new(LoggerMetricsSink),
            Arc::new(PrometheusMetricsSink::new()),
        ]);
        sink.record_failure(&FailureEvent {
            network: Network::Base,
            reason: ErrorReason::InsufficientFunds,
        });
    }
}
