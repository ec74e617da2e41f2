//! End-to-end pipeline test over mock providers
//!
//! Drives the full worker fleet (not bare handlers): a two-segment video
//! flows discovery → metadata → planning → analysis → combination while
//! the runtime polls real queues.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use kinoscope_core::{
    Channel, ContentState, PipelineConfig, PipelineRuntime, PipelineStore, QueueStore, SourceType,
    SqliteStore, StageServices,
};
use kinoscope_llm::MockAiProvider;
use kinoscope_source::{MockSource, SourceItem};

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.poll_interval_ms = 10;
    config.stage_deadline_secs = 5;
    config
}

fn segment_artifact() -> String {
    json!({
        "summary": "the same story continues.",
        "topics": ["pipelines"],
        "entities": ["kinoscope"],
        "genre": "tutorial",
        "category": {"label": "tech", "confidence": 0.8}
    })
    .to_string()
}

#[tokio::test]
async fn test_video_flows_from_discovery_to_combined_artifact() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let queue = Arc::new(QueueStore::in_memory().await.unwrap());
    let source = Arc::new(MockSource::new());
    let provider = Arc::new(MockAiProvider::new());

    // 1500s video: plans into [0,900] and [870,1500].
    source.set_items(
        "UC123",
        vec![SourceItem {
            id: "vid-e2e".to_string(),
            title: "Long video".to_string(),
            description: "two segments worth".to_string(),
            published_at: chrono::Utc::now(),
            duration_sec: Some(1_500),
            view_count: Some(7),
            thumbnail_url: None,
            channel_title: Some("Chan".to_string()),
            canonical_url: Some("https://www.youtube.com/watch?v=vid-e2e".to_string()),
        }],
    );

    // Two segment analyses, then the combination synthesis.
    provider.push_ok(segment_artifact(), 9_000);
    provider.push_ok(segment_artifact(), 9_000);
    provider.push_ok(json!({"overview": "a two part story."}).to_string(), 800);

    let services = StageServices::new(
        fast_config(),
        Arc::clone(&store) as Arc<dyn kinoscope_core::PipelineStore>,
        queue,
        Arc::clone(&source) as Arc<dyn kinoscope_source::SourceProvider>,
        Arc::clone(&provider) as Arc<dyn kinoscope_llm::AiProvider>,
    );

    let channel = Channel::new(SourceType::Youtube, "UC123", "Chan");
    services.store.create_channel(&channel).await.unwrap();
    services.enqueue_discovery(channel.id, false).await.unwrap();

    let runtime = PipelineRuntime::new(Arc::clone(&services));
    let shutdown = CancellationToken::new();
    let pipeline = tokio::spawn(runtime.run(shutdown.clone()));

    // Wait for the combined artifact, bounded.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let content = loop {
        if let Some(content) = services
            .store
            .find_content_by_external_id("vid-e2e")
            .await
            .unwrap()
        {
            if content.state == ContentState::Analyzed {
                break content;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pipeline did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    };

    shutdown.cancel();
    pipeline.await.unwrap();

    assert_eq!(content.expected_segment_count, Some(2));
    let combined = content.combined_analysis.unwrap();
    assert_eq!(
        combined["summary"],
        "the same story continues. the same story continues."
    );
    assert_eq!(combined["overview"], "a two part story.");
    assert_eq!(combined["topics"], json!(["pipelines"]));
    assert!(!content.models_used.is_empty());

    // Three metered calls: two analyses plus one synthesis.
    assert_eq!(provider.call_count(), 3);
}
