//! Segment-analysis stage
//!
//! Runs the metered AI call for one segment: estimate tokens, pick a
//! model, preflight the ledger, stream the structured response under the
//! buffer cap, and persist the artifact. Quota and overload responses
//! surface as rate-limit signals (deferrals); only validation-class
//! problems mark the segment FAILED outright.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use kinoscope_llm::{
    collect_structured, estimate_text_tokens, estimate_video_tokens, GenerationRequest,
    NoModelReason, PromptPart, ProviderErrorKind,
};

use uuid::Uuid;

use crate::model::{Content, PromptType, Segment, SegmentState};
use crate::queue::{FailKind, Job, JobContext, JobHandler, JobOutcome};

use super::{
    parse_payload, render_template, store_try, validate_analysis, violation_record,
    AnalysisPayload, StageServices,
};

/// Fallback template when no active prompt record exists.
const DEFAULT_TEMPLATE: &str = "Watch the video segment from {start_sec}s to {end_sec}s of \
\"{title}\" and produce a structured analysis. Respond with a JSON object containing: \
summary (paragraph), topics (array of strings), entities (array of strings), \
genre (string), category (object with label and confidence). {author_context}";

/// Output bound for a single segment analysis.
const MAX_OUTPUT_TOKENS: u32 = 8_192;

/// `segment-analysis` handler
pub struct AnalysisStage {
    services: Arc<StageServices>,
}

impl AnalysisStage {
    /// Create the stage.
    pub fn new(services: Arc<StageServices>) -> Self {
        Self { services }
    }

    /// Declared response schema for the analysis artifact.
    fn response_schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "topics": {"type": "array", "items": {"type": "string"}},
                "entities": {"type": "array", "items": {"type": "string"}},
                "genre": {"type": "string"},
                "category": {
                    "type": "object",
                    "properties": {
                        "label": {"type": "string"},
                        "confidence": {"type": "number"}
                    },
                    "required": ["label", "confidence"]
                }
            },
            "required": ["summary", "topics"]
        })
    }

    async fn rendered_prompt(&self, content: &Content, segment: &Segment) -> (String, Option<u32>) {
        let (template, version) = match self
            .services
            .store
            .get_active_prompt(PromptType::SegmentAnalysis)
            .await
        {
            Ok(Some(prompt)) => (prompt.template, Some(prompt.version)),
            _ => (DEFAULT_TEMPLATE.to_string(), None),
        };

        let author_context = self
            .services
            .store
            .get_channel(content.channel_id)
            .await
            .ok()
            .and_then(|c| c.author_context)
            .unwrap_or_default();

        let rendered = render_template(
            &template,
            &[
                ("title", content.title.clone()),
                ("start_sec", segment.start_sec.to_string()),
                ("end_sec", segment.end_sec.to_string()),
                ("author_context", author_context),
            ],
        );
        (rendered, version)
    }

    /// Terminal segment transition plus fan-in evaluation.
    async fn settle_segment(
        &self,
        content_id: Uuid,
        index: u32,
        state: SegmentState,
        reason: &str,
    ) -> std::result::Result<(), JobOutcome> {
        store_try(
            self.services
                .store
                .mark_segment_failed(content_id, index, state, reason)
                .await,
        )?;
        store_try(self.services.fanin.evaluate(content_id).await)?;
        Ok(())
    }

    async fn run(
        &self,
        job: &Job,
        ctx: &JobContext,
    ) -> std::result::Result<JobOutcome, JobOutcome> {
        let payload: AnalysisPayload = parse_payload(job)?;

        let segment = self
            .services
            .store
            .get_segment(payload.content_id, payload.segment_index)
            .await
            .map_err(|e| JobOutcome::fail(FailKind::Validation, e.to_string()))?;

        // Duplicate delivery of an already-analyzed segment is a no-op:
        // no provider call, no ledger record.
        if segment.state == SegmentState::Analyzed {
            return Ok(JobOutcome::Complete);
        }

        let content = store_try(self.services.store.get_content(payload.content_id).await)?;

        let (rendered, prompt_version) = self.rendered_prompt(&content, &segment).await;
        let est_tokens = estimate_text_tokens(&rendered)
            + estimate_video_tokens(
                f64::from(segment.duration_sec()),
                self.services.config.token_estimate_mode,
            );

        let model = match &payload.force_model {
            Some(model) => model.clone(),
            None => match self.services.selector.select(est_tokens, &HashSet::new()) {
                Ok(model) => model,
                Err(NoModelReason::TooLarge) => {
                    let reason = format!("{est_tokens} tokens exceed every model's request cap");
                    self.settle_segment(
                        content.id,
                        segment.index,
                        SegmentState::Failed,
                        &reason,
                    )
                    .await?;
                    return Ok(JobOutcome::fail(FailKind::Validation, reason));
                }
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
                Err(NoModelReason::AllExcluded) => {
                    return Ok(JobOutcome::fail(
                        FailKind::Fatal,
                        "model exclusions removed every candidate",
                    ));
                }
            },
        };

        // Ledger preflight; a denial is a rate-limit signal, not a failure.
        if let Some(delay) = self
            .services
            .coordinator
            .apply_preflight(&ctx.worker, &model, est_tokens)
        {
            return Ok(JobOutcome::defer(delay));
        }

        store_try(
            self.services
                .store
                .set_segment_state(content.id, segment.index, SegmentState::Processing)
                .await,
        )?;

        let video_url = content
            .canonical_url
            .clone()
            .unwrap_or_else(|| content.external_video_id.clone());
        let request = GenerationRequest {
            model: model.clone(),
            parts: vec![
                PromptPart::Text { text: rendered },
                PromptPart::VideoRef {
                    url: video_url,
                    start_sec: segment.start_sec,
                    end_sec: segment.end_sec,
                },
            ],
            response_schema: Some(Self::response_schema()),
            max_output_tokens: Some(MAX_OUTPUT_TOKENS),
            temperature: Some(0.2),
        };

        let started = Instant::now();
        let result = match self.services.provider.generate_structured(request).await {
            Ok(stream) => {
                collect_structured(stream, self.services.config.stream_buffer_cap).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok((text, usage)) => {
                let artifact: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(artifact) => artifact,
                    Err(e) => {
                        let reason = format!("unparseable analysis output: {e}");
                        self.settle_segment(
                            content.id,
                            segment.index,
                            SegmentState::Failed,
                            &reason,
                        )
                        .await?;
                        return Ok(JobOutcome::fail(FailKind::Validation, reason));
                    }
                };
                if let Err(reason) = validate_analysis(&artifact) {
                    self.settle_segment(content.id, segment.index, SegmentState::Failed, &reason)
                        .await?;
                    return Ok(JobOutcome::fail(FailKind::Validation, reason));
                }

                let actual_tokens = usage.map_or(est_tokens, |u| u.total_tokens.max(1));
                self.services.ledger.record(&model, actual_tokens);
                self.services
                    .coordinator
                    .tune_worker(&ctx.worker, Some(&model));

                store_try(
                    self.services
                        .store
                        .mark_segment_analyzed(
                            content.id,
                            segment.index,
                            &artifact,
                            &model,
                            started.elapsed().as_millis() as u64,
                            prompt_version,
                        )
                        .await,
                )?;
                store_try(self.services.fanin.evaluate(content.id).await)?;

                info!(
                    content_id = %content.id,
                    segment = segment.index,
                    model = %model,
                    tokens = actual_tokens,
                    "segment analyzed"
                );
                Ok(JobOutcome::Complete)
            }
            Err(err) => {
                self.handle_provider_error(ctx, &content, &segment, &model, err)
                    .await
            }
        }
    }

    async fn handle_provider_error(
        &self,
        ctx: &JobContext,
        content: &Content,
        segment: &Segment,
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
                    // Daily quota will not recover within this job's budget.
                    self.settle_segment(
                        content.id,
                        segment.index,
                        SegmentState::Failed,
                        "daily-quota",
                    )
                    .await?;
                    return Ok(JobOutcome::fail(FailKind::Fatal, "daily-quota"));
                }

                store_try(
                    self.services
                        .store
                        .set_segment_state(content.id, segment.index, SegmentState::Pending)
                        .await,
                )?;
                Ok(JobOutcome::defer(outcome.pause))
            }
            ProviderErrorKind::Overload => {
                self.services.ledger.mark_overloaded(model);
                self.services.coordinator.apply_intelligent(&ctx.worker);

                let retries =
                    store_try(self.services.store.bump_segment_retry(content.id, segment.index).await)?;
                if retries >= self.services.config.max_attempts_analysis {
                    self.settle_segment(
                        content.id,
                        segment.index,
                        SegmentState::Overloaded,
                        "model overloaded",
                    )
                    .await?;
                    return Ok(JobOutcome::fail(FailKind::Fatal, "model overloaded"));
                }

                store_try(
                    self.services
                        .store
                        .set_segment_state(content.id, segment.index, SegmentState::Pending)
                        .await,
                )?;
                Ok(JobOutcome::defer(self.services.config.overload_cooldown()))
            }
            ProviderErrorKind::Validation => {
                let reason = err.to_string();
                self.settle_segment(content.id, segment.index, SegmentState::Failed, &reason)
                    .await?;
                Ok(JobOutcome::fail(FailKind::Validation, reason))
            }
            ProviderErrorKind::Transient => {
                if ctx.is_final_attempt() {
                    self.settle_segment(
                        content.id,
                        segment.index,
                        SegmentState::Failed,
                        &err.to_string(),
                    )
                    .await?;
                } else {
                    store_try(
                        self.services
                            .store
                            .set_segment_state(content.id, segment.index, SegmentState::Pending)
                            .await,
                    )?;
                }
                Ok(JobOutcome::fail(FailKind::Transient, err.to_string()))
            }
            ProviderErrorKind::Fatal => {
                let reason = err.to_string();
                self.settle_segment(content.id, segment.index, SegmentState::Failed, &reason)
                    .await?;
                Ok(JobOutcome::fail(FailKind::Fatal, reason))
            }
        }
    }
}

#[async_trait]
impl JobHandler for AnalysisStage {
    async fn process(&self, job: &Job, ctx: &JobContext) -> JobOutcome {
        self.run(job, ctx).await.unwrap_or_else(|outcome| outcome)
    }
}
