//! Operator configuration

use std::time::Duration;

use clap::Parser;

/// DB cluster operator
#[derive(Parser, Clone, Debug)]
#[command(name = "db-cluster-operator")]
#[command(about = "Kubernetes operator for distributed database clusters")]
#[command(version)]
pub struct OperatorConfig {
    /// Port serving /metrics and the health endpoints
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Number of concurrent reconcile workers
    #[arg(long, env = "RECONCILE_WORKERS", default_value_t = 4)]
    pub workers: usize,

    /// Namespace to watch (empty for cluster-wide)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    pub watch_namespace: String,

    /// Per-request timeout for PD API calls, in seconds
    #[arg(long, env = "PD_TIMEOUT_SECS", default_value_t = 5)]
    pub pd_timeout_secs: u64,

    /// Interval between reconciles of a healthy cluster, in seconds
    #[arg(long, env = "RESYNC_SECS", default_value_t = 300)]
    pub resync_secs: u64,
}

impl OperatorConfig {
    pub fn pd_timeout(&self) -> Duration {
        Duration::from_secs(self.pd_timeout_secs)
    }

    pub fn resync_period(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    /// `None` watches every namespace
    pub fn namespace(&self) -> Option<&str> {
        Some(self.watch_namespace.as_str()).filter(|ns| !ns.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::parse_from(["db-cluster-operator"]);
        assert_eq!(config.metrics_port, 8080);
        assert_eq!(config.workers, 4);
        assert_eq!(config.namespace(), None);
        assert_eq!(config.pd_timeout(), Duration::from_secs(5));
        assert_eq!(config.resync_period(), Duration::from_secs(300));
    }

    #[test]
    fn test_flags() {
        let config = OperatorConfig::parse_from([
            "db-cluster-operator",
            "--workers",
            "8",
            "--watch-namespace",
            "db",
            "--pd-timeout-secs",
            "2",
        ]);
        assert_eq!(config.workers, 8);
        assert_eq!(config.namespace(), Some("db"));
        assert_eq!(config.pd_timeout(), Duration::from_secs(2));
    }
}
