//! Quota-cleanup stage
//!
//! Repeatable housekeeping: drops ledger usage windows stale past an hour
//! and persisted violations past retention.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::queue::{FailKind, Job, JobContext, JobHandler, JobOutcome};

use super::StageServices;

/// `quota-cleanup` handler
pub struct CleanupStage {
    services: Arc<StageServices>,
}

impl CleanupStage {
    /// Create the stage.
    pub fn new(services: Arc<StageServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl JobHandler for CleanupStage {
    async fn process(&self, _job: &Job, _ctx: &JobContext) -> JobOutcome {
        let stale_usage = self.services.ledger.prune_stale_usage();

        let pruned = match self.services.store.prune_quota_violations(Utc::now()).await {
            Ok(pruned) => pruned,
            Err(e) => return JobOutcome::fail(FailKind::Transient, e.to_string()),
        };

        debug!(stale_usage, pruned_violations = pruned, "quota cleanup finished");
        JobOutcome::Complete
    }
}
