//! Pipeline runtime
//!
//! Owns the worker fleet: one worker per queue plus a tick loop for
//! repeatable jobs and stale-claim recovery. Shutdown fans out through one
//! cancellation token; workers abort in-flight handlers (the jobs return
//! to their queues for redelivery) and the final drain is bounded by a
//! grace period.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::queue::{queues, Worker, WorkerHandle};
use crate::ratelimit::base_throttle;
use crate::stages::{
    AnalysisStage, CleanupStage, CombinationStage, DiscoveryStage, MetadataStage, PlanningStage,
    StageServices, StatsStage,
};

/// How long `run` waits for workers to stop after shutdown fires.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// The assembled pipeline
pub struct PipelineRuntime {
    services: Arc<StageServices>,
    workers: Vec<Worker>,
}

impl PipelineRuntime {
    /// Build one worker per queue over the shared services.
    #[must_use]
    pub fn new(services: Arc<StageServices>) -> Self {
        let poll = services.config.poll_interval();
        let deadline = services.config.stage_deadline();

        let mut workers = Vec::new();
        let mut bind = |queue: &'static str, handler: Arc<dyn crate::queue::JobHandler>| {
            workers.push(Worker::new(
                Arc::clone(&services.queue),
                queue,
                handler,
                base_throttle(queue),
                poll,
                deadline,
            ));
        };

        bind(
            queues::CHANNEL_DISCOVERY,
            Arc::new(DiscoveryStage::new(Arc::clone(&services))),
        );
        bind(
            queues::CONTENT_METADATA,
            Arc::new(MetadataStage::new(Arc::clone(&services))),
        );
        bind(
            queues::CONTENT_PROCESSING,
            Arc::new(PlanningStage::new(Arc::clone(&services))),
        );
        bind(
            queues::SEGMENT_ANALYSIS,
            Arc::new(AnalysisStage::new(Arc::clone(&services))),
        );
        bind(
            queues::COMBINATION,
            Arc::new(CombinationStage::new(Arc::clone(&services))),
        );
        bind(
            queues::STATS,
            Arc::new(StatsStage::new(Arc::clone(&services))),
        );
        bind(
            queues::QUOTA_CLEANUP,
            Arc::new(CleanupStage::new(Arc::clone(&services))),
        );

        Self { services, workers }
    }

    /// The shared service bundle.
    #[must_use]
    pub fn services(&self) -> Arc<StageServices> {
        Arc::clone(&self.services)
    }

    /// Control handles of every worker.
    #[must_use]
    pub fn worker_handles(&self) -> Vec<Arc<WorkerHandle>> {
        self.workers.iter().map(Worker::handle).collect()
    }

    /// Run every worker plus the scheduler tick until `shutdown` fires,
    /// then wait up to [`SHUTDOWN_GRACE`] for the tasks to stop.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(workers = self.workers.len(), "pipeline starting");

        let mut tasks = Vec::new();
        for worker in self.workers {
            let token = shutdown.clone();
            tasks.push(tokio::spawn(async move { worker.run(token).await }));
        }

        // Scheduler tick: fire due repeatables and sweep stale claims.
        let queue = Arc::clone(&self.services.queue);
        let tick_interval = self.services.config.poll_interval();
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(tick_interval) => {}
                }
                if let Err(e) = queue.tick_repeatables().await {
                    error!(error = %e, "repeatable tick failed");
                }
                if let Err(e) = queue.requeue_stale_claims().await {
                    error!(error = %e, "stale-claim sweep failed");
                }
            }
        }));

        let drain = async {
            for task in tasks {
                if let Err(e) = task.await {
                    error!(error = %e, "pipeline task panicked");
                }
            }
        };
        tokio::pin!(drain);

        tokio::select! {
            () = &mut drain => {}
            () = shutdown.cancelled() => {
                // Shutdown observed; give the tasks a bounded window to stop.
                if tokio::time::timeout(SHUTDOWN_GRACE, &mut drain).await.is_err() {
                    warn!(
                        grace_secs = SHUTDOWN_GRACE.as_secs(),
                        "workers did not stop within the grace period, abandoning"
                    );
                }
            }
        }
        info!("pipeline stopped");
    }
}
