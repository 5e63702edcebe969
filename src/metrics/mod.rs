//! Metrics module
//!
//! Prometheus counters and gauges for the distribution engine and the
//! intake pipeline. Metrics live in their own [`Registry`] so tests can
//! build independent instances; the binary serves it on `/metrics`.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::Result;

/// Engine and intake metrics.
#[derive(Clone)]
pub struct CoreMetrics {
    registry: Registry,
    jobs: IntCounterVec,
    active_slots: IntGauge,
    intake_events: IntCounterVec,
    lock_contention: IntCounter,
    backend_failures: IntCounterVec,
}

impl std::fmt::Debug for CoreMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreMetrics")
            .field("active_slots", &self.active_slots.get())
            .finish()
    }
}

impl CoreMetrics {
    /// Create and register all metrics in a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let jobs = IntCounterVec::new(
            Opts::new("cloudraid_jobs_total", "Finished core jobs by operation and outcome"),
            &["operation", "outcome"],
        )?;
        let active_slots = IntGauge::new("cloudraid_active_slots", "Core access slots in use")?;
        let intake_events = IntCounterVec::new(
            Opts::new("cloudraid_intake_events_total", "Dispatched intake events by action"),
            &["action"],
        )?;
        let lock_contention = IntCounter::new(
            "cloudraid_lock_contention_total",
            "Intake entries dropped because their path was locked",
        )?;
        let backend_failures = IntCounterVec::new(
            Opts::new(
                "cloudraid_backend_failures_total",
                "Connector calls that reported failure",
            ),
            &["connector", "operation"],
        )?;

        registry.register(Box::new(jobs.clone()))?;
        registry.register(Box::new(active_slots.clone()))?;
        registry.register(Box::new(intake_events.clone()))?;
        registry.register(Box::new(lock_contention.clone()))?;
        registry.register(Box::new(backend_failures.clone()))?;

        Ok(Self {
            registry,
            jobs,
            active_slots,
            intake_events,
            lock_contention,
            backend_failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_job(&self, operation: &str, outcome: &str) {
        self.jobs.with_label_values(&[operation, outcome]).inc();
    }

    pub fn job_count(&self, operation: &str, outcome: &str) -> u64 {
        self.jobs.with_label_values(&[operation, outcome]).get()
    }

    pub fn slot_acquired(&self) {
        self.active_slots.inc();
    }

    pub fn slot_released(&self) {
        self.active_slots.dec();
    }

    pub fn active_slots(&self) -> i64 {
        self.active_slots.get()
    }

    pub fn record_intake(&self, action: &str) {
        self.intake_events.with_label_values(&[action]).inc();
    }

    pub fn intake_count(&self, action: &str) -> u64 {
        self.intake_events.with_label_values(&[action]).get()
    }

    pub fn record_lock_contention(&self) {
        self.lock_contention.inc();
    }

    pub fn lock_contention(&self) -> u64 {
        self.lock_contention.get()
    }

    pub fn record_backend_failure(&self, connector: usize, operation: &str) {
        let connector = connector.to_string();
        self.backend_failures
            .with_label_values(&[connector.as_str(), operation])
            .inc();
    }

    pub fn backend_failure_count(&self, connector: usize, operation: &str) -> u64 {
        let connector = connector.to_string();
        self.backend_failures
            .with_label_values(&[connector.as_str(), operation])
            .get()
    }

    /// Prometheus text exposition of every metric.
    pub fn export_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
