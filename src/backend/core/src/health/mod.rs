//! Health checks for the worker and the operator CLI.

mod check;
mod checker;

pub use check::*;
pub use checker::*;

use std::sync::Arc;
use std::time::{Duration, Instant};

/// When the process started. Created once in `main` and handed to anything
/// that reports uptime.
#[derive(Debug, Clone, Copy)]
pub struct StartMarker(Instant);

impl StartMarker {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn uptime(&self) -> Duration {
        self.0.elapsed()
    }
}

/// Health check configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Timeout for individual health checks
    pub check_timeout: Duration,
    pub service: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_timeout: Duration::from_secs(5),
            service: "dbvault-worker".into(),
        }
    }
}

/// Health service managing all health checks
pub struct HealthService {
    config: HealthConfig,
    checkers: Vec<Arc<dyn HealthChecker>>,
    started: StartMarker,
}

impl HealthService {
    pub fn new(config: HealthConfig, started: StartMarker) -> Self {
        Self {
            config,
            checkers: Vec::new(),
            started,
        }
    }

    pub fn register_checker(&mut self, checker: Arc<dyn HealthChecker>) {
        self.checkers.push(checker);
    }

    /// Run all health checks concurrently with timeout per check.
    pub async fn check_health(&self) -> HealthReport {
        let futures: Vec<_> = self
            .checkers
            .iter()
            .map(|checker| {
                let checker = checker.clone();
                let timeout = self.config.check_timeout;
                async move {
                    match tokio::time::timeout(timeout, checker.check()).await {
                        Ok(health) => health,
                        Err(_) => ComponentHealth::unhealthy(checker.name())
                            .with_error(format!("Health check timed out after {:?}", timeout)),
                    }
                }
            })
            .collect();

        let components = futures::future::join_all(futures).await;

        HealthReport::new()
            .with_service(self.config.service.clone())
            .with_uptime(self.started.uptime())
            .with_components(components)
    }

    pub async fn is_ready(&self) -> bool {
        self.check_health().await.is_operational()
    }

    pub fn uptime(&self) -> Duration {
        self.started.uptime()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Stuck;

    #[async_trait]
    impl HealthChecker for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn check(&self) -> ComponentHealth {
            tokio::time::sleep(Duration::from_secs(60)).await;
            ComponentHealth::healthy("stuck")
        }
    }

    struct Fine;

    #[async_trait]
    impl HealthChecker for Fine {
        fn name(&self) -> &str {
            "fine"
        }

        async fn check(&self) -> ComponentHealth {
            ComponentHealth::healthy("fine")
        }
    }

    #[tokio::test]
    async fn test_slow_checker_times_out_as_unhealthy() {
        let config = HealthConfig {
            check_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let mut service = HealthService::new(config, StartMarker::now());
        service.register_checker(Arc::new(Stuck));
        service.register_checker(Arc::new(Fine));

        let report = service.check_health().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.summary.healthy, 1);
        assert!(report.get_component("stuck").unwrap().error.is_some());
        assert!(!service.is_ready().await);
    }

    #[tokio::test]
    async fn test_uptime_comes_from_start_marker() {
        let earlier = Instant::now()
            .checked_sub(Duration::from_secs(120))
            .unwrap_or_else(Instant::now);
        let service = HealthService::new(HealthConfig::default(), StartMarker::at(earlier));
        let report = service.check_health().await;
        assert!(report.uptime_secs.unwrap() >= 100 || service.uptime() < Duration::from_secs(120));
        assert_eq!(report.service, "dbvault-worker");
        assert_eq!(report.status, HealthStatus::Healthy);
    }
}
