//! Prometheus metrics for the CLPR relayer
//!
//! Metrics live in a private registry so tests and multiple relay instances
//! in one process never collide on global registration.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

use crate::types::Phase;

pub struct Metrics {
    pub messages_sent_total: IntCounter,
    pub messages_relayed_total: IntCounter,
    pub relay_failures_total: IntCounterVec,
    pub not_found_retries_total: IntCounterVec,
    pub cursor: IntGauge,
    pub latest_message_id: IntGauge,
    pub relay_duration_seconds: HistogramVec,
    pub registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let messages_sent_total = IntCounter::new(
            "clpr_relayer_messages_sent_total",
            "Total number of source application sends finalized",
        )
        .expect("constant metric name is valid");

        let messages_relayed_total = IntCounter::new(
            "clpr_relayer_messages_relayed_total",
            "Total number of messages whose response was delivered back to the source",
        )
        .expect("constant metric name is valid");

        let relay_failures_total = IntCounterVec::new(
            Opts::new(
                "clpr_relayer_relay_failures_total",
                "Total number of fatal relay failures",
            ),
            &["phase", "kind"],
        )
        .expect("constant metric name is valid");

        let not_found_retries_total = IntCounterVec::new(
            Opts::new(
                "clpr_relayer_not_found_retries_total",
                "Total number of not-found polls while waiting for cross-ledger data",
            ),
            &["phase"],
        )
        .expect("constant metric name is valid");

        let cursor = IntGauge::new(
            "clpr_relayer_cursor",
            "Next message id the continuous loop will relay",
        )
        .expect("constant metric name is valid");

        let latest_message_id = IntGauge::new(
            "clpr_relayer_latest_message_id",
            "Last message id assigned by the source queue",
        )
        .expect("constant metric name is valid");

        let relay_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "clpr_relayer_relay_duration_seconds",
                "Time from first request read to response delivery",
            )
            .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
            &["outcome"],
        )
        .expect("constant metric name is valid");

        // Names are unique constants and registration happens once per instance
        registry
            .register(Box::new(messages_sent_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(messages_relayed_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(relay_failures_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(not_found_retries_total.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(cursor.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(latest_message_id.clone()))
            .expect("metric registration must not be called twice");
        registry
            .register(Box::new(relay_duration_seconds.clone()))
            .expect("metric registration must not be called twice");

        Self {
            messages_sent_total,
            messages_relayed_total,
            relay_failures_total,
            not_found_retries_total,
            cursor,
            latest_message_id,
            relay_duration_seconds,
            registry,
        }
    }

    /// Record a fatal failure in `phase`
    pub fn record_failure(&self, phase: Phase, kind: &str) {
        self.relay_failures_total
            .with_label_values(&[phase.metric_label(), kind])
            .inc();
    }

    /// Record `polls` not-found reads that preceded a result in `phase`
    pub fn record_not_found_polls(&self, phase: Phase, polls: u64) {
        if polls > 0 {
            self.not_found_retries_total
                .with_label_values(&[phase.metric_label()])
                .inc_by(polls);
        }
    }

    pub fn record_relay(&self, success: bool, seconds: f64) {
        let outcome = if success { "success" } else { "failure" };
        self.relay_duration_seconds
            .with_label_values(&[outcome])
            .observe(seconds);
        if success {
            self.messages_relayed_total.inc();
        }
    }

    pub fn set_progress(&self, cursor: u64, latest: u64) {
        self.cursor.set(cursor as i64);
        self.latest_message_id.set(latest as i64);
    }
}
