//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `contract_log_entries_admitted_total` - Entries admitted, by entry kind
//! - `contract_log_entries_rejected_total` - Entries rejected, by reason
//! - `contract_log_settings_saves_total` - Settings snapshots written
//! - `contract_log_settings_save_failures_total` - Settings writes that failed
//! - `contract_log_contracts_active` - Contracts currently materialized

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
///
/// Collectors live in a per-instance registry so several engines can run in
/// one process.
#[derive(Clone)]
pub struct Metrics {
    /// Entries admitted (label: `kind` = root | action)
    pub entries_admitted: IntCounterVec,

    /// Entries rejected (label: `reason`)
    pub entries_rejected: IntCounterVec,

    /// Settings snapshots written
    pub settings_saves: IntCounter,

    /// Settings writes that failed
    pub settings_save_failures: IntCounter,

    /// Contracts currently materialized
    pub contracts_active: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_admitted = IntCounterVec::new(
            Opts::new("contract_log_entries_admitted_total", "Entries admitted"),
            &["kind"],
        )?;
        registry.register(Box::new(entries_admitted.clone()))?;

        let entries_rejected = IntCounterVec::new(
            Opts::new("contract_log_entries_rejected_total", "Entries rejected"),
            &["reason"],
        )?;
        registry.register(Box::new(entries_rejected.clone()))?;

        let settings_saves = IntCounter::new(
            "contract_log_settings_saves_total",
            "Settings snapshots written",
        )?;
        registry.register(Box::new(settings_saves.clone()))?;

        let settings_save_failures = IntCounter::new(
            "contract_log_settings_save_failures_total",
            "Settings writes that failed",
        )?;
        registry.register(Box::new(settings_save_failures.clone()))?;

        let contracts_active = IntGauge::new(
            "contract_log_contracts_active",
            "Contracts currently materialized",
        )?;
        registry.register(Box::new(contracts_active.clone()))?;

        Ok(Self {
            entries_admitted,
            entries_rejected,
            settings_saves,
            settings_save_failures,
            contracts_active,
            registry,
        })
    }

    /// Record an admitted entry
    pub fn record_admitted(&self, root: bool) {
        let kind = if root { "root" } else { "action" };
        self.entries_admitted.with_label_values(&[kind]).inc();
    }

    /// Record a rejected entry
    pub fn record_rejected(&self, reason: &str) {
        self.entries_rejected.with_label_values(&[reason]).inc();
    }

    /// Total admitted entries across kinds
    pub fn admitted_total(&self) -> u64 {
        ["root", "action"]
            .iter()
            .map(|kind| self.entries_admitted.with_label_values(&[*kind]).get())
            .sum()
    }

    /// Rejections recorded for one reason
    pub fn rejected(&self, reason: &str) -> u64 {
        self.entries_rejected.with_label_values(&[reason]).get()
    }

    /// Record a settings write
    pub fn record_save(&self, ok: bool) {
        if ok {
            self.settings_saves.inc();
        } else {
            self.settings_save_failures.inc();
        }
    }

    /// Update the active contract gauge
    pub fn set_contracts_active(&self, count: usize) {
        self.contracts_active.set(count as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("admitted", &self.admitted_total())
            .field("settings_saves", &self.settings_saves.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.admitted_total(), 0);
        assert_eq!(metrics.settings_saves.get(), 0);
    }

    #[test]
    fn test_independent_instances() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_admitted(true);
        a.record_admitted(false);
        assert_eq!(a.admitted_total(), 2);
        assert_eq!(b.admitted_total(), 0);
    }

    #[test]
    fn test_rejections_by_reason() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejected("integrity");
        metrics.record_rejected("integrity");
        metrics.record_rejected("not_whitelisted");
        assert_eq!(metrics.rejected("integrity"), 2);
        assert_eq!(metrics.rejected("not_whitelisted"), 1);
        assert_eq!(metrics.rejected("malformed_root"), 0);
    }

    #[test]
    fn test_record_save() {
        let metrics = Metrics::new().unwrap();
        metrics.record_save(true);
        metrics.record_save(false);
        assert_eq!(metrics.settings_saves.get(), 1);
        assert_eq!(metrics.settings_save_failures.get(), 1);
        assert!(!metrics.registry().gather().is_empty());
    }
}
