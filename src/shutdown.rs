use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::observability::pipeline_metrics;
use crate::pipeline::PipelineManager;

/// Graceful shutdown coordinator for the pipeline
pub struct ShutdownCoordinator {
    manager: Arc<PipelineManager>,
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<PipelineManager>, drain_timeout: Duration) -> Self {
        Self {
            manager,
            drain_timeout,
        }
    }

    /// Give in-flight stage hand-offs a bounded window to finish. Stage
    /// runs left behind are not cancelled; their jobs keep whatever the
    /// collaborator last wrote.
    pub async fn shutdown(self) -> Result<()> {
        let pending = self.manager.in_flight_count();
        info!(
            pending,
            timeout_secs = self.drain_timeout.as_secs(),
            "Initiating graceful shutdown..."
        );

        if pending > 0 && !self.manager.wait_for_idle(self.drain_timeout).await {
            warn!(
                remaining = self.manager.in_flight_count(),
                "Timeout waiting for in-flight stages to finish"
            );
        }

        pipeline_metrics().log_stats();
        info!("Graceful shutdown completed");
        Ok(())
    }
}
