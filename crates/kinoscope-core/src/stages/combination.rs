//! Combination stage
//!
//! Fan-in terminus: re-checks readiness defensively, merges the analyzed
//! segments' artifacts deterministically, then makes one metered synthesis
//! call that produces the cross-segment overview. Partial combinations
//! (explicitly triggered) stamp the artifact with segment counts.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use kinoscope_llm::{
    collect_structured, estimate_text_tokens, GenerationRequest, NoModelReason, PromptPart,
    ProviderErrorKind,
};

use crate::combine::combine_segments;
use crate::fanin::Readiness;
use crate::model::{ContentState, PromptType, SegmentState};
use crate::queue::{FailKind, Job, JobContext, JobHandler, JobOutcome};

use super::{
    parse_payload, render_template, store_try, violation_record, CombinationPayload, StageServices,
};

/// Fallback template when no active combination prompt exists.
const DEFAULT_TEMPLATE: &str = "The following are per-segment summaries of the video \
\"{title}\", in order. Write one coherent overview paragraph of the whole video. \
Respond with a JSON object containing a single field: overview (string).\n\n{summaries}";

/// Output bound for the synthesis call.
const MAX_OUTPUT_TOKENS: u32 = 2_048;

/// `combination` handler
pub struct CombinationStage {
    services: Arc<StageServices>,
}

impl CombinationStage {
    /// Create the stage.
    pub fn new(services: Arc<StageServices>) -> Self {
        Self { services }
    }

    async fn run(
        &self,
        job: &Job,
        ctx: &JobContext,
    ) -> std::result::Result<JobOutcome, JobOutcome> {
        let payload: CombinationPayload = parse_payload(job)?;

        let content = self
            .services
            .store
            .get_content(payload.content_id)
            .await
            .map_err(|e| JobOutcome::fail(FailKind::Validation, e.to_string()))?;

        // Defensive re-read: the enqueue may predate a segment reset or a
        // competing combination that already ran.
        let status = store_try(self.services.fanin.status(content.id).await)?;
        let ready = match status.readiness {
            Readiness::Ready => true,
            Readiness::Partial => payload.allow_partial,
            _ => false,
        };
        if !ready {
            warn!(
                content_id = %content.id,
                readiness = ?status.readiness,
                allow_partial = payload.allow_partial,
                "combination not ready, dropping job"
            );
            return Ok(JobOutcome::Complete);
        }

        let segments = store_try(
            self.services
                .store
                .list_segments(content.id, Some(SegmentState::Analyzed))
                .await,
        )?;
        let artifacts: Vec<(u32, serde_json::Value)> = segments
            .iter()
            .filter_map(|s| s.analysis.clone().map(|a| (s.index, a)))
            .collect();
        if artifacts.is_empty() {
            return Ok(JobOutcome::fail(
                FailKind::Fatal,
                "no analyzed segments despite readiness",
            ));
        }

        let mut combined = combine_segments(&artifacts);

        // One metered model call synthesizes the overview field.
        let (template, prompt_version) = match self
            .services
            .store
            .get_active_prompt(PromptType::Combination)
            .await
        {
            Ok(Some(prompt)) => (prompt.template, Some(prompt.version)),
            _ => (DEFAULT_TEMPLATE.to_string(), None),
        };
        let summaries = segments
            .iter()
            .filter_map(|s| {
                s.analysis
                    .as_ref()
                    .and_then(|a| a.get("summary"))
                    .and_then(|v| v.as_str())
                    .map(|summary| format!("[segment {}] {summary}", s.index))
            })
            .collect::<Vec<_>>()
            .join("\n");
        let rendered = render_template(
            &template,
            &[
                ("title", content.title.clone()),
                ("summaries", summaries),
            ],
        );
        let est_tokens = estimate_text_tokens(&rendered) + u64::from(MAX_OUTPUT_TOKENS);

        let model = match &payload.force_model {
            Some(model) => model.clone(),
            None => match self.services.selector.select(est_tokens, &HashSet::new()) {
                Ok(model) => model,
                Err(NoModelReason::AllOverloaded) => {
                    let pause = self
                        .services
                        .coordinator
                        .apply_intelligent(&ctx.worker)
                        .unwrap_or(self.services.config.overload_cooldown());
                    return Ok(JobOutcome::defer(pause));
                }
                Err(NoModelReason::QuotaExhausted { wait_secs }) => {
                    let pause = Duration::from_secs(wait_secs.clamp(1, 300));
                    ctx.worker.pause_for(pause);
                    return Ok(JobOutcome::defer(pause));
                }
                Err(reason) => {
                    return Ok(JobOutcome::fail(FailKind::Fatal, reason.to_string()));
                }
            },
        };

        if let Some(delay) = self
            .services
            .coordinator
            .apply_preflight(&ctx.worker, &model, est_tokens)
        {
            return Ok(JobOutcome::defer(delay));
        }

        let request = GenerationRequest {
            model: model.clone(),
            parts: vec![PromptPart::Text { text: rendered }],
            response_schema: Some(json!({
                "type": "object",
                "properties": {"overview": {"type": "string"}},
                "required": ["overview"]
            })),
            max_output_tokens: Some(MAX_OUTPUT_TOKENS),
            temperature: Some(0.3),
        };

        let result = match self.services.provider.generate_structured(request).await {
            Ok(stream) => {
                collect_structured(stream, self.services.config.stream_buffer_cap).await
            }
            Err(e) => Err(e),
        };

        let (text, usage) = match result {
            Ok(ok) => ok,
            Err(err) => {
                return self
                    .handle_provider_error(ctx, content.id, &model, err)
                    .await;
            }
        };

        let overview = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|v| v.get("overview").and_then(|o| o.as_str()).map(String::from));
        let Some(overview) = overview else {
            let reason = "synthesis output missing overview".to_string();
            store_try(
                self.services
                    .store
                    .set_content_state(content.id, ContentState::Failed, Some(&reason))
                    .await,
            )?;
            return Ok(JobOutcome::fail(FailKind::Validation, reason));
        };

        let actual_tokens = usage.map_or(est_tokens, |u| u.total_tokens.max(1));
        self.services.ledger.record(&model, actual_tokens);

        if let Some(object) = combined.as_object_mut() {
            object.insert("overview".to_string(), json!(overview));
            if status.readiness == Readiness::Partial {
                object.insert("partial".to_string(), json!(true));
                object.insert("combined_segments".to_string(), json!(status.completed));
                object.insert("failed_segments".to_string(), json!(status.failed));
            }
        }

        let mut models_used: Vec<String> = Vec::new();
        for segment_model in segments.iter().filter_map(|s| s.model_used.clone()) {
            if !models_used.contains(&segment_model) {
                models_used.push(segment_model);
            }
        }
        if !models_used.contains(&model) {
            models_used.push(model.clone());
        }

        store_try(
            self.services
                .store
                .set_combined_analysis(content.id, &combined, &models_used, prompt_version, Utc::now())
                .await,
        )?;

        info!(
            content_id = %content.id,
            model = %model,
            combined_segments = status.completed,
            failed_segments = status.failed,
            partial = status.readiness == Readiness::Partial,
            "combined artifact written"
        );
        Ok(JobOutcome::Complete)
    }

    async fn handle_provider_error(
        &self,
        ctx: &JobContext,
        content_id: uuid::Uuid,
        model: &str,
        err: kinoscope_llm::Error,
    ) -> std::result::Result<JobOutcome, JobOutcome> {
        let kind = kinoscope_llm::classify_provider_error(&err);
        match kind {
            ProviderErrorKind::Quota { .. } => {
                let outcome = self
                    .services
                    .coordinator
                    .handle_quota_violation(&ctx.worker, model, &err);
                if let Some(record) = violation_record(model, &outcome.kind, &err.to_string()) {
                    if let Err(e) = self.services.store.record_quota_violation(&record).await {
                        warn!(error = %e, "failed to persist quota violation");
                    }
                }

                if outcome.is_daily() && ctx.is_final_attempt() {
                    store_try(
                        self.services
                            .store
                            .set_content_state(content_id, ContentState::Failed, Some("daily-quota"))
                            .await,
                    )?;
                    return Ok(JobOutcome::fail(FailKind::Fatal, "daily-quota"));
                }
                Ok(JobOutcome::defer(outcome.pause))
            }
            ProviderErrorKind::Overload => {
                self.services.ledger.mark_overloaded(model);
                self.services.coordinator.apply_intelligent(&ctx.worker);
                Ok(JobOutcome::defer(self.services.config.overload_cooldown()))
            }
            ProviderErrorKind::Validation => {
                let reason = err.to_string();
                store_try(
                    self.services
                        .store
                        .set_content_state(content_id, ContentState::Failed, Some(&reason))
                        .await,
                )?;
                Ok(JobOutcome::fail(FailKind::Validation, reason))
            }
            ProviderErrorKind::Transient | ProviderErrorKind::Fatal => {
                let terminal = kind == ProviderErrorKind::Fatal || ctx.is_final_attempt();
                if terminal {
                    store_try(
                        self.services
                            .store
                            .set_content_state(content_id, ContentState::Failed, Some(&err.to_string()))
                            .await,
                    )?;
                }
                let fail_kind = if kind == ProviderErrorKind::Fatal {
                    FailKind::Fatal
                } else {
                    FailKind::Transient
                };
                Ok(JobOutcome::fail(fail_kind, err.to_string()))
            }
        }
    }
}

#[async_trait]
impl JobHandler for CombinationStage {
    async fn process(&self, job: &Job, ctx: &JobContext) -> JobOutcome {
        self.run(job, ctx).await.unwrap_or_else(|outcome| outcome)
    }
}
