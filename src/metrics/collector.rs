use crate::filter::Phase;
use log::warn;
use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

// Registered with the default registry, which Pingora's Prometheus service serves
static TRANSACTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("waf_transactions_total", "WAF transactions opened")
        .expect("metric creation failed")
});

static INTERRUPTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("waf_interruptions_total", "Exchanges interrupted by the rule engine"),
        &["phase"],
    )
    .expect("metric creation failed")
});

static ENGINE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("waf_engine_errors_total", "Rule engine failures that were let through"),
        &["operation"],
    )
    .expect("metric creation failed")
});

static REJECTED_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("waf_rejected_requests_total", "Requests rejected before inspection"),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub struct MetricsCollector {
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        register(TRANSACTIONS.clone());
        register(INTERRUPTIONS.clone());
        register(ENGINE_ERRORS.clone());
        register(REJECTED_REQUESTS.clone());

        Self {
            registry: Arc::new(prometheus::default_registry().clone()),
        }
    }

    pub fn increment_transactions(&self) {
        TRANSACTIONS.inc();
    }

    pub fn increment_interruptions(&self, phase: Phase) {
        INTERRUPTIONS.with_label_values(&[phase.as_str()]).inc();
    }

    pub fn increment_engine_errors(&self, operation: &str) {
        ENGINE_ERRORS.with_label_values(&[operation]).inc();
    }

    pub fn increment_rejected_requests(&self, reason: &str) {
        REJECTED_REQUESTS.with_label_values(&[reason]).inc();
    }

    pub fn transactions(&self) -> u64 {
        TRANSACTIONS.get()
    }

    pub fn interruptions(&self, phase: Phase) -> u64 {
        INTERRUPTIONS.with_label_values(&[phase.as_str()]).get()
    }

    pub fn engine_errors(&self, operation: &str) -> u64 {
        ENGINE_ERRORS.with_label_values(&[operation]).get()
    }

    pub fn rejected_requests(&self, reason: &str) -> u64 {
        REJECTED_REQUESTS.with_label_values(&[reason]).get()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn register<C: Collector + 'static>(collector: C) {
    if let Err(e) = prometheus::register(Box::new(collector)) {
        warn!("Metric registration skipped: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collectors_can_be_created_twice() {
        let first = MetricsCollector::new();
        let second = MetricsCollector::new();

        let before = first.interruptions(Phase::ResponseBody);
        second.increment_interruptions(Phase::ResponseBody);
        assert_eq!(first.interruptions(Phase::ResponseBody), before + 1);
    }

    #[test]
    fn test_labelled_counters() {
        let metrics = MetricsCollector::new();
        let before = metrics.rejected_requests("missing_host");
        metrics.increment_rejected_requests("missing_host");
        assert_eq!(metrics.rejected_requests("missing_host"), before + 1);

        let before = metrics.engine_errors("close");
        metrics.increment_engine_errors("close");
        assert_eq!(metrics.engine_errors("close"), before + 1);
    }

    #[test]
    fn test_registered_in_default_registry() {
        let metrics = MetricsCollector::new();
        metrics.increment_transactions();
        let names: Vec<String> = metrics
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"waf_transactions_total".to_string()));
    }
}
