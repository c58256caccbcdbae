//! Decision and latency metrics for the engine

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Maximum number of latency samples kept for percentile estimates
const MAX_SAMPLES: usize = 10_000;

/// Samples dropped at once when the window overflows
const SAMPLE_EVICTION: usize = 1_000;

/// Kind of authorization question answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Role,
    Permission,
    Access,
}

/// Engine metrics snapshot
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Role membership checks answered
    pub role_checks: u64,

    /// Permission checks answered
    pub permission_checks: u64,

    /// Resource access checks answered
    pub access_checks: u64,

    pub allowed_decisions: u64,
    pub denied_decisions: u64,

    /// Assign, remove, sync, grant and revoke calls that completed
    pub mutations: u64,

    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,
    pub avg_latency_ms: f64,

    pub error_count: u64,
}

impl EngineMetrics {
    /// Total checks of every kind
    pub fn total_checks(&self) -> u64 {
        self.role_checks + self.permission_checks + self.access_checks
    }

    /// Share of checks that were allowed
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }
}

/// Collects engine metrics behind async locks
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Recent latency samples in milliseconds
    latency_samples: Arc<RwLock<Vec<f64>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(MAX_SAMPLES))),
        }
    }

    /// Record the outcome of a check
    pub async fn record_check(&self, kind: CheckKind, allowed: bool) {
        let mut metrics = self.metrics.write().await;
        match kind {
            CheckKind::Role => metrics.role_checks += 1,
            CheckKind::Permission => metrics.permission_checks += 1,
            CheckKind::Access => metrics.access_checks += 1,
        }

        if allowed {
            metrics.allowed_decisions += 1;
        } else {
            metrics.denied_decisions += 1;
        }
    }

    pub async fn record_mutation(&self) {
        self.metrics.write().await.mutations += 1;
    }

    pub async fn record_error(&self) {
        self.metrics.write().await.error_count += 1;
    }

    /// Record the latency of one engine call
    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);
        if samples.len() > MAX_SAMPLES {
            samples.drain(0..SAMPLE_EVICTION);
        }

        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mut metrics = self.metrics.write().await;
        metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p90_ms = Self::percentile(&sorted, 0.90);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    /// Current metrics snapshot
    pub async fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn reset(&self) {
        *self.metrics.write().await = EngineMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Render the counters in Prometheus text format
    pub async fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read().await;

        format!(
            r#"# HELP rolegate_checks_total Authorization checks answered
# TYPE rolegate_checks_total counter
rolegate_checks_total{{kind="role"}} {}
rolegate_checks_total{{kind="permission"}} {}
rolegate_checks_total{{kind="access"}} {}

# HELP rolegate_decisions_total Check outcomes
# TYPE rolegate_decisions_total counter
rolegate_decisions_total{{outcome="allowed"}} {}
rolegate_decisions_total{{outcome="denied"}} {}

# HELP rolegate_mutations_total Completed grant mutations
# TYPE rolegate_mutations_total counter
rolegate_mutations_total {}

# HELP rolegate_latency_seconds Call latency percentiles
# TYPE rolegate_latency_seconds summary
rolegate_latency_seconds{{quantile="0.5"}} {}
rolegate_latency_seconds{{quantile="0.9"}} {}
rolegate_latency_seconds{{quantile="0.99"}} {}

# HELP rolegate_errors_total Failed calls
# TYPE rolegate_errors_total counter
rolegate_errors_total {}
"#,
            metrics.role_checks,
            metrics.permission_checks,
            metrics.access_checks,
            metrics.allowed_decisions,
            metrics.denied_decisions,
            metrics.mutations,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            metrics.error_count,
        )
    }

    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
