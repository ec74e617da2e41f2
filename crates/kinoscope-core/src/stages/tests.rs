use super::*;
use crate::fanin::Readiness;
use crate::model::{Channel, Content, ContentState, Segment, SegmentState, SourceType};
use crate::queue::{JobContext, JobHandler, QueueStore};
use crate::ratelimit::base_throttle;
use crate::store::SqliteStore;
use chrono::Utc;
use kinoscope_llm::{ApiErrorPayload, Error as LlmError, MockAiProvider};
use kinoscope_source::{MockSource, SourceItem};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Harness {
    services: Arc<StageServices>,
    source: Arc<MockSource>,
    provider: Arc<MockAiProvider>,
}

async fn harness() -> Harness {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let queue = Arc::new(QueueStore::in_memory().await.unwrap());
    let source = Arc::new(MockSource::new());
    let provider = Arc::new(MockAiProvider::new());

    let services = StageServices::new(
        PipelineConfig::default(),
        store,
        queue,
        Arc::clone(&source) as Arc<dyn kinoscope_source::SourceProvider>,
        Arc::clone(&provider) as Arc<dyn kinoscope_llm::AiProvider>,
    );
    Harness {
        services,
        source,
        provider,
    }
}

fn ctx_for(job: &Job) -> JobContext {
    JobContext {
        attempt: job.attempts_made + 1,
        max_attempts: job.max_attempts,
        cancel: CancellationToken::new(),
        worker: crate::queue::WorkerHandle::detached(job.queue.clone(), base_throttle(&job.queue)),
    }
}

fn manual_job(queue: &str, name: &str, payload: serde_json::Value) -> Job {
    Job {
        id: Uuid::new_v4().to_string(),
        queue: queue.to_string(),
        name: name.to_string(),
        payload,
        attempts_made: 0,
        max_attempts: 4,
        backoff_base_ms: 0,
        priority: 0,
        run_at: Utc::now(),
        created_at: Utc::now(),
    }
}

/// Claim and process every currently-due job on one queue.
async fn drain(services: &Arc<StageServices>, queue: &str, handler: &dyn JobHandler) -> Vec<JobOutcome> {
    let mut outcomes = Vec::new();
    loop {
        let jobs = services.queue.claim_due(queue, 16).await.unwrap();
        if jobs.is_empty() {
            break;
        }
        for job in jobs {
            let ctx = ctx_for(&job);
            let outcome = handler.process(&job, &ctx).await;
            match &outcome {
                JobOutcome::Complete => services.queue.complete(&job).await.unwrap(),
                JobOutcome::Defer { delay } => services.queue.defer(&job, *delay).await.unwrap(),
                JobOutcome::Fail { kind, message } => {
                    services
                        .queue
                        .fail(&job, message, kind.is_retryable())
                        .await
                        .unwrap();
                }
            }
            outcomes.push(outcome);
        }
    }
    outcomes
}

fn source_item(id: &str, duration: u32) -> SourceItem {
    SourceItem {
        id: id.to_string(),
        title: format!("Video {id}"),
        description: "about things".to_string(),
        published_at: Utc::now(),
        duration_sec: Some(duration),
        view_count: Some(1_000),
        thumbnail_url: Some("https://img/hq.jpg".to_string()),
        channel_title: Some("Chan".to_string()),
        canonical_url: Some(format!("https://www.youtube.com/watch?v={id}")),
    }
}

fn analysis_artifact(summary: &str) -> String {
    json!({
        "summary": summary,
        "topics": ["rust"],
        "entities": ["tokio"],
        "genre": "tutorial",
        "category": {"label": "tech", "confidence": 0.9}
    })
    .to_string()
}

async fn seeded_channel(harness: &Harness) -> Channel {
    let channel = Channel::new(SourceType::Youtube, "UC123", "Chan");
    harness.services.store.create_channel(&channel).await.unwrap();
    channel
}

/// Insert a content with committed metadata, ready for planning.
async fn seeded_content(harness: &Harness, channel: &Channel, duration: u32) -> Content {
    let mut content = Content::discovered(
        channel.id,
        format!("vid-{duration}"),
        "Video",
        "",
        Some(Utc::now()),
    );
    content.duration_sec = Some(duration);
    content.canonical_url = Some("https://www.youtube.com/watch?v=x".to_string());
    content.state = ContentState::MetadataReady;
    assert!(harness.services.store.insert_content(&content).await.unwrap());
    // insert_content persists the given state; re-read for fidelity.
    harness.services.store.get_content(content.id).await.unwrap()
}

async fn committed_plan(harness: &Harness, content: &Content, bounds: &[(u32, u32)]) {
    let segments: Vec<Segment> = bounds
        .iter()
        .enumerate()
        .map(|(i, (start, end))| Segment::pending(content.id, i as u32, *start, *end))
        .collect();
    harness
        .services
        .store
        .commit_segment_plan(content.id, &segments, ContentState::Processing)
        .await
        .unwrap();
}

fn analysis_job(content_id: Uuid, index: u32) -> Job {
    manual_job(
        queues::SEGMENT_ANALYSIS,
        job_names::ANALYZE,
        json!({"content_id": content_id, "segment_index": index}),
    )
}

// ============================================================================
// Scenario: happy path, single segment
// ============================================================================

#[tokio::test]
async fn test_happy_path_single_segment() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    h.source.set_items("UC123", vec![source_item("vid-a", 480)]);

    // Discovery inserts the content and fans out metadata.
    let discovery = DiscoveryStage::new(Arc::clone(&h.services));
    let job = manual_job(
        queues::CHANNEL_DISCOVERY,
        job_names::DISCOVER,
        json!({"channel_id": channel.id}),
    );
    let outcome = discovery.process(&job, &ctx_for(&job)).await;
    assert!(matches!(outcome, JobOutcome::Complete));

    let metadata = MetadataStage::new(Arc::clone(&h.services));
    let outcomes = drain(&h.services, queues::CONTENT_METADATA, &metadata).await;
    assert_eq!(outcomes.len(), 1);

    let planning = PlanningStage::new(Arc::clone(&h.services));
    drain(&h.services, queues::CONTENT_PROCESSING, &planning).await;

    let content = h
        .services
        .store
        .find_content_by_external_id("vid-a")
        .await
        .unwrap()
        .unwrap();
    // 480s fits a single segment.
    assert_eq!(content.expected_segment_count, Some(1));
    assert_eq!(content.state, ContentState::Processing);

    h.provider.push_ok(analysis_artifact("a calm walkthrough."), 12_000);
    let analysis = AnalysisStage::new(Arc::clone(&h.services));
    drain(&h.services, queues::SEGMENT_ANALYSIS, &analysis).await;

    let segment = h.services.store.get_segment(content.id, 0).await.unwrap();
    assert_eq!(segment.state, SegmentState::Analyzed);
    assert!(segment.model_used.is_some());

    // One ledger increment on the used model: +1 request, +12000 tokens.
    let model = segment.model_used.unwrap();
    let usage = h.services.ledger.get_usage(&model);
    assert_eq!(usage.requests_in_minute, 1);
    assert_eq!(usage.tokens_in_minute, 12_000);
    assert_eq!(usage.requests_in_day, 1);

    // Fan-in enqueued exactly one combination job.
    assert_eq!(
        h.services.queue.pending_count(queues::COMBINATION).await.unwrap(),
        1
    );

    h.provider.push_ok(json!({"overview": "one segment, one story."}).to_string(), 900);
    let combination = CombinationStage::new(Arc::clone(&h.services));
    drain(&h.services, queues::COMBINATION, &combination).await;

    let content = h.services.store.get_content(content.id).await.unwrap();
    assert_eq!(content.state, ContentState::Analyzed);
    let combined = content.combined_analysis.unwrap();
    assert_eq!(combined["summary"], "a calm walkthrough.");
    assert_eq!(combined["overview"], "one segment, one story.");
    assert!(content.models_used.contains(&model));
    assert!(content.combined_at.is_some());
}

// ============================================================================
// Scenario: two-segment fan-in, out-of-order completion
// ============================================================================

#[tokio::test]
async fn test_two_segment_fan_in_out_of_order() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 1_500).await;
    committed_plan(&h, &content, &[(0, 900), (870, 1_500)]).await;

    let analysis = AnalysisStage::new(Arc::clone(&h.services));

    // Index 1 completes first.
    h.provider.push_ok(analysis_artifact("second half."), 8_000);
    let job = analysis_job(content.id, 1);
    assert!(matches!(
        analysis.process(&job, &ctx_for(&job)).await,
        JobOutcome::Complete
    ));

    // Not ready yet: no combination enqueued.
    assert_eq!(
        h.services.queue.pending_count(queues::COMBINATION).await.unwrap(),
        0
    );

    h.provider.push_ok(analysis_artifact("first half."), 8_000);
    let job = analysis_job(content.id, 0);
    assert!(matches!(
        analysis.process(&job, &ctx_for(&job)).await,
        JobOutcome::Complete
    ));

    assert_eq!(
        h.services.queue.pending_count(queues::COMBINATION).await.unwrap(),
        1
    );

    h.provider.push_ok(json!({"overview": "both halves."}).to_string(), 500);
    let combination = CombinationStage::new(Arc::clone(&h.services));
    drain(&h.services, queues::COMBINATION, &combination).await;

    let content = h.services.store.get_content(content.id).await.unwrap();
    let combined = content.combined_analysis.unwrap();
    // Ordered fields follow segment-index order despite completion order.
    assert_eq!(combined["summary"], "first half. second half.");
}

// ============================================================================
// Scenario: RPM throttle defers without burning an attempt
// ============================================================================

#[tokio::test]
async fn test_rpm_exhaustion_defers_before_provider_call() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 480).await;
    committed_plan(&h, &content, &[(0, 480)]).await;

    // Saturate the model's minute window (free-tier pro: 5 rpm).
    for _ in 0..5 {
        h.services.ledger.record("gemini-2.5-pro", 100);
    }

    let analysis = AnalysisStage::new(Arc::clone(&h.services));
    let mut job = analysis_job(content.id, 0);
    job.payload["force_model"] = json!("gemini-2.5-pro");
    let ctx = ctx_for(&job);
    let outcome = analysis.process(&job, &ctx).await;

    match outcome {
        JobOutcome::Defer { delay } => {
            // Bounded by the minute window.
            assert!(delay.as_secs() <= 60);
        }
        other => panic!("expected defer, got {other:?}"),
    }

    // No provider call, no segment state change, worker intake paused.
    assert_eq!(h.provider.call_count(), 0);
    let segment = h.services.store.get_segment(content.id, 0).await.unwrap();
    assert_eq!(segment.state, SegmentState::Pending);
    assert!(ctx.worker.paused_remaining().is_some());
}

// ============================================================================
// Scenario: provider 429 with retry-info
// ============================================================================

fn quota_429(quota_id: &str, retry_delay: Option<&str>) -> LlmError {
    let mut details = vec![json!({
        "@type": "type.googleapis.com/google.rpc.QuotaFailure",
        "violations": [{"quotaId": quota_id}]
    })];
    if let Some(delay) = retry_delay {
        details.push(json!({
            "@type": "type.googleapis.com/google.rpc.RetryInfo",
            "retryDelay": delay
        }));
    }
    LlmError::Api(ApiErrorPayload {
        status: 429,
        status_text: "RESOURCE_EXHAUSTED".to_string(),
        message: "quota exceeded".to_string(),
        details,
    })
}

#[tokio::test]
async fn test_quota_error_with_retry_info_defers() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 480).await;
    committed_plan(&h, &content, &[(0, 480)]).await;

    h.provider
        .push_err(quota_429("GenerateRequestsPerMinutePerProjectPerModel", Some("45s")));

    let analysis = AnalysisStage::new(Arc::clone(&h.services));
    let job = analysis_job(content.id, 0);
    let ctx = ctx_for(&job);
    let outcome = analysis.process(&job, &ctx).await;

    match outcome {
        JobOutcome::Defer { delay } => assert_eq!(delay.as_secs(), 45),
        other => panic!("expected defer, got {other:?}"),
    }

    // Violation recorded as RPM on ledger and store; segment untouched.
    let violations = h.services.ledger.violations(10);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].dimension.as_str(), "RPM");

    let persisted = h.services.store.list_quota_violations(10).await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].kind, "RPM");
    assert_eq!(persisted[0].retry_delay_secs, Some(45));

    let segment = h.services.store.get_segment(content.id, 0).await.unwrap();
    assert_eq!(segment.state, SegmentState::Pending);
    assert!(ctx.worker.paused_remaining().is_some());
}

// ============================================================================
// Scenario: RPD exhaustion on the final attempt
// ============================================================================

#[tokio::test]
async fn test_rpd_on_final_attempt_fails_segment_no_auto_combination() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 1_500).await;
    committed_plan(&h, &content, &[(0, 900), (870, 1_500)]).await;

    // Segment 0 already analyzed; segment 1 is the last hold-out.
    h.services
        .store
        .mark_segment_analyzed(content.id, 0, &json!({"summary": "ok", "topics": ["a"]}), "gemini-2.5-pro", 10, None)
        .await
        .unwrap();

    h.provider
        .push_err(quota_429("GenerateRequestsPerDayPerProjectPerModel", None));

    let analysis = AnalysisStage::new(Arc::clone(&h.services));
    let mut job = analysis_job(content.id, 1);
    job.attempts_made = 3; // attempt 4 of 4
    let ctx = ctx_for(&job);
    assert!(ctx.is_final_attempt());

    let outcome = analysis.process(&job, &ctx).await;
    match outcome {
        JobOutcome::Fail { kind, message } => {
            assert_eq!(kind, FailKind::Fatal);
            assert_eq!(message, "daily-quota");
        }
        other => panic!("expected fail, got {other:?}"),
    }

    let segment = h.services.store.get_segment(content.id, 1).await.unwrap();
    assert_eq!(segment.state, SegmentState::Failed);
    assert_eq!(segment.error.as_deref(), Some("daily-quota"));

    // Fan-in sees PARTIAL: no automatic combination.
    let status = h.services.fanin.status(content.id).await.unwrap();
    assert_eq!(status.readiness, Readiness::Partial);
    assert_eq!(
        h.services.queue.pending_count(queues::COMBINATION).await.unwrap(),
        0
    );
}

// ============================================================================
// Scenario: partial combination on demand
// ============================================================================

#[tokio::test]
async fn test_partial_combination_on_demand() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 3_000).await;
    committed_plan(
        &h,
        &content,
        &[(0, 900), (870, 1_770), (1_740, 2_640), (2_610, 3_000)],
    )
    .await;

    for index in 0..3 {
        h.services
            .store
            .mark_segment_analyzed(
                content.id,
                index,
                &json!({"summary": format!("part {index}."), "topics": [format!("t{index}")]}),
                "gemini-2.5-flash",
                10,
                None,
            )
            .await
            .unwrap();
    }
    h.services
        .store
        .mark_segment_failed(content.id, 3, SegmentState::Failed, "daily-quota")
        .await
        .unwrap();

    // Explicit external trigger allows the partial combine.
    let result = h
        .services
        .fanin
        .trigger(content.id, true, None, true)
        .await
        .unwrap();
    assert!(!result.deduplicated);

    // A second trigger while pending collapses.
    let repeat = h
        .services
        .fanin
        .trigger(content.id, true, None, true)
        .await
        .unwrap();
    assert!(repeat.deduplicated);

    h.provider.push_ok(json!({"overview": "three of four."}).to_string(), 700);
    let combination = CombinationStage::new(Arc::clone(&h.services));
    drain(&h.services, queues::COMBINATION, &combination).await;

    let content = h.services.store.get_content(content.id).await.unwrap();
    assert_eq!(content.state, ContentState::Analyzed);
    let combined = content.combined_analysis.unwrap();
    assert_eq!(combined["partial"], true);
    assert_eq!(combined["combined_segments"], 3);
    assert_eq!(combined["failed_segments"], 1);
    assert_eq!(combined["summary"], "part 0. part 1. part 2.");
}

// ============================================================================
// Overload handling
// ============================================================================

#[tokio::test]
async fn test_overload_marks_model_and_defers() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 480).await;
    committed_plan(&h, &content, &[(0, 480)]).await;

    h.provider.push_err(LlmError::Api(ApiErrorPayload::bare(
        503,
        "model is overloaded",
    )));

    let analysis = AnalysisStage::new(Arc::clone(&h.services));
    let mut job = analysis_job(content.id, 0);
    job.payload["force_model"] = json!("gemini-2.5-pro");
    let outcome = analysis.process(&job, &ctx_for(&job)).await;

    assert!(matches!(outcome, JobOutcome::Defer { .. }));
    assert!(h.services.ledger.is_overloaded("gemini-2.5-pro"));

    let segment = h.services.store.get_segment(content.id, 0).await.unwrap();
    assert_eq!(segment.state, SegmentState::Pending);
    assert_eq!(segment.retry_count, 1);
}

#[tokio::test]
async fn test_repeated_overload_goes_terminal() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 480).await;
    committed_plan(&h, &content, &[(0, 480)]).await;

    let analysis = AnalysisStage::new(Arc::clone(&h.services));
    // Overload budget equals max_attempts_analysis (4).
    for round in 0..4 {
        h.provider.push_err(LlmError::Api(ApiErrorPayload::bare(503, "overloaded")));
        let mut job = analysis_job(content.id, 0);
        job.payload["force_model"] = json!("gemini-2.5-pro");
        let outcome = analysis.process(&job, &ctx_for(&job)).await;
        if round < 3 {
            assert!(matches!(outcome, JobOutcome::Defer { .. }), "round {round}");
        } else {
            assert!(matches!(
                outcome,
                JobOutcome::Fail {
                    kind: FailKind::Fatal,
                    ..
                }
            ));
        }
    }

    let segment = h.services.store.get_segment(content.id, 0).await.unwrap();
    assert_eq!(segment.state, SegmentState::Overloaded);
}

// ============================================================================
// Idempotence and validation
// ============================================================================

#[tokio::test]
async fn test_redelivered_analysis_for_analyzed_segment_is_noop() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 480).await;
    committed_plan(&h, &content, &[(0, 480)]).await;

    h.services
        .store
        .mark_segment_analyzed(content.id, 0, &json!({"summary": "s", "topics": ["t"]}), "gemini-2.5-pro", 10, None)
        .await
        .unwrap();

    let analysis = AnalysisStage::new(Arc::clone(&h.services));
    let job = analysis_job(content.id, 0);
    let outcome = analysis.process(&job, &ctx_for(&job)).await;

    assert!(matches!(outcome, JobOutcome::Complete));
    // No provider call, no second ledger record.
    assert_eq!(h.provider.call_count(), 0);
    assert_eq!(
        h.services.ledger.get_usage("gemini-2.5-pro").requests_in_minute,
        0
    );
}

#[tokio::test]
async fn test_redelivered_discovery_yields_zero_new_contents() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    h.source.set_items("UC123", vec![source_item("vid-a", 480)]);

    let discovery = DiscoveryStage::new(Arc::clone(&h.services));
    let job = manual_job(
        queues::CHANNEL_DISCOVERY,
        job_names::DISCOVER,
        json!({"channel_id": channel.id}),
    );
    discovery.process(&job, &ctx_for(&job)).await;
    discovery.process(&job, &ctx_for(&job)).await;

    let contents = h
        .services
        .store
        .list_contents_by_channel(channel.id)
        .await
        .unwrap();
    assert_eq!(contents.len(), 1);
}

#[tokio::test]
async fn test_malformed_analysis_output_fails_segment() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 480).await;
    committed_plan(&h, &content, &[(0, 480)]).await;

    h.provider.push_ok("this is not json", 500);

    let analysis = AnalysisStage::new(Arc::clone(&h.services));
    let job = analysis_job(content.id, 0);
    let outcome = analysis.process(&job, &ctx_for(&job)).await;

    assert!(matches!(
        outcome,
        JobOutcome::Fail {
            kind: FailKind::Validation,
            ..
        }
    ));
    let segment = h.services.store.get_segment(content.id, 0).await.unwrap();
    assert_eq!(segment.state, SegmentState::Failed);
}

#[tokio::test]
async fn test_missing_required_section_fails_segment() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 480).await;
    committed_plan(&h, &content, &[(0, 480)]).await;

    // Valid JSON but no topics.
    h.provider.push_ok(json!({"summary": "s"}).to_string(), 500);

    let analysis = AnalysisStage::new(Arc::clone(&h.services));
    let job = analysis_job(content.id, 0);
    let outcome = analysis.process(&job, &ctx_for(&job)).await;

    assert!(matches!(
        outcome,
        JobOutcome::Fail {
            kind: FailKind::Validation,
            ..
        }
    ));
}

#[tokio::test]
async fn test_zero_duration_fails_content() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 0).await;

    let planning = PlanningStage::new(Arc::clone(&h.services));
    let job = manual_job(
        queues::CONTENT_PROCESSING,
        job_names::PLAN,
        json!({"content_id": content.id}),
    );
    let outcome = planning.process(&job, &ctx_for(&job)).await;

    assert!(matches!(
        outcome,
        JobOutcome::Fail {
            kind: FailKind::Validation,
            ..
        }
    ));
    let content = h.services.store.get_content(content.id).await.unwrap();
    assert_eq!(content.state, ContentState::Failed);
}

#[tokio::test]
async fn test_combination_aborts_when_not_ready() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    let content = seeded_content(&h, &channel, 1_500).await;
    committed_plan(&h, &content, &[(0, 900), (870, 1_500)]).await;

    // Premature enqueue: nothing analyzed yet.
    let combination = CombinationStage::new(Arc::clone(&h.services));
    let job = manual_job(
        queues::COMBINATION,
        job_names::COMBINE,
        json!({"content_id": content.id}),
    );
    let outcome = combination.process(&job, &ctx_for(&job)).await;

    // Dropped quietly; no provider call, no state change.
    assert!(matches!(outcome, JobOutcome::Complete));
    assert_eq!(h.provider.call_count(), 0);
    let content = h.services.store.get_content(content.id).await.unwrap();
    assert_eq!(content.state, ContentState::Processing);
}

#[tokio::test]
async fn test_unsupported_source_type_is_noop_success() {
    let h = harness().await;
    let channel = Channel::new(SourceType::Telegram, "tg-chan", "TG");
    h.services.store.create_channel(&channel).await.unwrap();

    let discovery = DiscoveryStage::new(Arc::clone(&h.services));
    let job = manual_job(
        queues::CHANNEL_DISCOVERY,
        job_names::DISCOVER,
        json!({"channel_id": channel.id}),
    );
    let outcome = discovery.process(&job, &ctx_for(&job)).await;
    assert!(matches!(outcome, JobOutcome::Complete));
}

#[tokio::test]
async fn test_transient_source_failure_is_retryable() {
    let h = harness().await;
    let channel = seeded_channel(&h).await;
    h.source
        .fail_next(kinoscope_source::Error::Network("dns".to_string()));

    let discovery = DiscoveryStage::new(Arc::clone(&h.services));
    let job = manual_job(
        queues::CHANNEL_DISCOVERY,
        job_names::DISCOVER,
        json!({"channel_id": channel.id}),
    );
    let outcome = discovery.process(&job, &ctx_for(&job)).await;
    assert!(matches!(
        outcome,
        JobOutcome::Fail {
            kind: FailKind::Transient,
            ..
        }
    ));
}
