//! Retry Worker
//!
//! Background worker that runs retry passes for a set of tenants on a fixed
//! interval, until shutdown is requested.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::context::PropagationContext;
use crate::retry::{RetryCoordinator, RetryPassReport};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct RetryWorkerConfig {
    /// Time between two retry passes.
    pub interval: Duration,
}

impl Default for RetryWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Runs [`RetryCoordinator`] passes periodically.
pub struct RetryWorker {
    coordinator: RetryCoordinator,
    tenants: RwLock<Vec<Uuid>>,
    config: RetryWorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl RetryWorker {
    pub fn new(coordinator: RetryCoordinator, config: RetryWorkerConfig) -> Self {
        Self {
            coordinator,
            tenants: RwLock::new(Vec::new()),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Include a tenant in the following passes.
    pub async fn add_tenant(&self, tenant_id: Uuid) {
        let mut tenants = self.tenants.write().await;
        if !tenants.contains(&tenant_id) {
            tenants.push(tenant_id);
        }
    }

    pub async fn tenants(&self) -> Vec<Uuid> {
        self.tenants.read().await.clone()
    }

    /// Start the worker.
    #[instrument(skip(self))]
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            max_retries = self.coordinator.max_retries(),
            "Starting retry worker"
        );

        let mut ticker = interval(self.config.interval);
        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Worker shutdown requested, stopping retry loop");
                break;
            }
            self.run_once().await;
        }

        info!("Retry worker stopped");
    }

    /// One pass over every tenant. Store errors are logged and the tenant is
    /// skipped until the next pass.
    pub async fn run_once(&self) -> RetryPassReport {
        let mut total = RetryPassReport::default();
        for tenant_id in self.tenants().await {
            let ctx = PropagationContext::system(tenant_id);
            match self.coordinator.run_pass(&ctx).await {
                Ok(report) => {
                    total.retried += report.retried;
                    total.succeeded += report.succeeded;
                    total.scheduled += report.scheduled;
                    total.abandoned += report.abandoned;
                }
                Err(e) => error!(tenant_id = %tenant_id, error = %e, "Retry pass failed"),
            }
        }
        total
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        info!("Shutdown requested");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Check if shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::audit::CollectingAuditSink;
    use crate::executor::{ExecutorConfig, TaskExecutor};
    use crate::model::TraceLevel;
    use crate::resolver::StaticWriters;
    use crate::resource::ResourceCatalog;
    use crate::store::InMemoryExecutionStore;

    fn worker(interval: Duration) -> RetryWorker {
        let store = Arc::new(InMemoryExecutionStore::new());
        let audit = Arc::new(CollectingAuditSink::new());
        let executor = TaskExecutor::new(
            Arc::new(ResourceCatalog::new()),
            Arc::new(StaticWriters::new()),
            store.clone(),
            audit.clone(),
            ExecutorConfig::default(),
        );
        RetryWorker::new(
            RetryCoordinator::new(store, executor, audit, 3),
            RetryWorkerConfig { interval },
        )
    }

    #[test]
    fn test_default_config() {
        assert_eq!(RetryWorkerConfig::default().interval, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_add_tenant_deduplicates() {
        let worker = worker(Duration::from_secs(1));
        let tenant = Uuid::new_v4();
        worker.add_tenant(tenant).await;
        worker.add_tenant(tenant).await;
        assert_eq!(worker.tenants().await, vec![tenant]);
    }

    #[tokio::test]
    async fn test_run_once_covers_all_tenants() {
        let worker = worker(Duration::from_secs(1));
        let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());
        worker.add_tenant(t1).await;
        worker.add_tenant(t2).await;

        for tenant in [t1, t2] {
            worker
                .coordinator
                .record_notification_attempt(
                    &PropagationContext::system(tenant),
                    Uuid::new_v4(),
                    TraceLevel::Failures,
                    serde_json::Value::Null,
                    Err("unreachable".into()),
                )
                .await
                .unwrap();
        }

        let report = worker.run_once().await;
        assert_eq!(report.scheduled, 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_loop() {
        let worker = Arc::new(worker(Duration::from_millis(10)));
        assert!(!worker.is_shutdown());

        let handle = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run().await })
        };
        worker.shutdown();
        assert!(worker.is_shutdown());

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
