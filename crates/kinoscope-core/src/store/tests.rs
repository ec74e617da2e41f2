use super::*;
use crate::model::{Channel, Content, Prompt, Segment, SourceType};
use chrono::Duration as ChronoDuration;
use tempfile::TempDir;

#[tokio::test]
async fn test_open_creates_database_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("kinoscope.db");

    let store = SqliteStore::from_path(&path).await.unwrap();
    assert!(path.exists());

    // Survives reopen.
    let channel = Channel::new(SourceType::Youtube, "UC123", "Chan");
    store.create_channel(&channel).await.unwrap();
    drop(store);

    let reopened = SqliteStore::from_path(&path).await.unwrap();
    assert_eq!(reopened.list_channels().await.unwrap().len(), 1);
}

async fn store_with_channel() -> (SqliteStore, Channel) {
    let store = SqliteStore::in_memory().await.unwrap();
    let channel = Channel::new(SourceType::Youtube, "UC123", "Test Channel");
    store.create_channel(&channel).await.unwrap();
    (store, channel)
}

async fn seeded_content(store: &SqliteStore, channel: &Channel, video: &str) -> Content {
    let content = Content::discovered(channel.id, video, "Title", "Desc", Some(Utc::now()));
    assert!(store.insert_content(&content).await.unwrap());
    content
}

#[tokio::test]
async fn test_channel_crud() {
    let (store, channel) = store_with_channel().await;

    let mut fetched = store.get_channel(channel.id).await.unwrap();
    assert_eq!(fetched.external_id, "UC123");
    assert_eq!(fetched.source_type, SourceType::Youtube);

    fetched.display_name = "Renamed".to_string();
    fetched.fetch_last_n = 10;
    store.update_channel(&fetched).await.unwrap();
    let fetched = store.get_channel(channel.id).await.unwrap();
    assert_eq!(fetched.display_name, "Renamed");
    assert_eq!(fetched.fetch_last_n, 10);

    store
        .set_channel_upload_collection(channel.id, "UU123")
        .await
        .unwrap();
    let fetched = store.get_channel(channel.id).await.unwrap();
    assert_eq!(fetched.upload_collection_id.as_deref(), Some("UU123"));

    store.delete_channel(channel.id).await.unwrap();
    assert!(store.get_channel(channel.id).await.is_err());
}

#[tokio::test]
async fn test_duplicate_external_video_id_rejected() {
    let (store, channel) = store_with_channel().await;
    seeded_content(&store, &channel, "vid-1").await;

    // Same external id, different record: treated as already known.
    let duplicate = Content::discovered(channel.id, "vid-1", "Other", "", None);
    assert!(!store.insert_content(&duplicate).await.unwrap());

    let found = store
        .find_content_by_external_id("vid-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.title, "Title");
}

#[tokio::test]
async fn test_metadata_patch_merges() {
    let (store, channel) = store_with_channel().await;
    let content = seeded_content(&store, &channel, "vid-1").await;

    store
        .apply_metadata(
            content.id,
            &MetadataPatch {
                duration_sec: Some(1_500),
                view_count: Some(42),
                canonical_url: Some("https://example/watch".to_string()),
                ..MetadataPatch::default()
            },
        )
        .await
        .unwrap();

    let fetched = store.get_content(content.id).await.unwrap();
    assert_eq!(fetched.duration_sec, Some(1_500));
    assert_eq!(fetched.view_count, Some(42));
    // Unpatched fields untouched.
    assert_eq!(fetched.title, "Title");
}

#[tokio::test]
async fn test_state_cas_guard() {
    let (store, channel) = store_with_channel().await;
    let content = seeded_content(&store, &channel, "vid-1").await;

    assert!(store
        .transition_content_state(content.id, &[ContentState::Discovered], ContentState::MetadataReady)
        .await
        .unwrap());

    // Stale transition is a no-op.
    assert!(!store
        .transition_content_state(content.id, &[ContentState::Discovered], ContentState::Processing)
        .await
        .unwrap());

    let fetched = store.get_content(content.id).await.unwrap();
    assert_eq!(fetched.state, ContentState::MetadataReady);
}

#[tokio::test]
async fn test_segment_plan_commit_is_atomic_and_idempotent() {
    let (store, channel) = store_with_channel().await;
    let content = seeded_content(&store, &channel, "vid-1").await;

    let segments = vec![
        Segment::pending(content.id, 0, 0, 900),
        Segment::pending(content.id, 1, 870, 1_500),
    ];
    store
        .commit_segment_plan(content.id, &segments, ContentState::Processing)
        .await
        .unwrap();

    let fetched = store.get_content(content.id).await.unwrap();
    assert_eq!(fetched.expected_segment_count, Some(2));
    assert_eq!(fetched.state, ContentState::Processing);

    // Redelivered planning job: duplicate (content_id, idx) rows are ignored.
    let replay = vec![
        Segment::pending(content.id, 0, 0, 900),
        Segment::pending(content.id, 1, 870, 1_500),
    ];
    store
        .commit_segment_plan(content.id, &replay, ContentState::Processing)
        .await
        .unwrap();

    let listed = store.list_segments(content.id, None).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].index, 0);
    assert_eq!(listed[1].start_sec, 870);
}

#[tokio::test]
async fn test_segment_analysis_lifecycle() {
    let (store, channel) = store_with_channel().await;
    let content = seeded_content(&store, &channel, "vid-1").await;
    let segments = vec![
        Segment::pending(content.id, 0, 0, 900),
        Segment::pending(content.id, 1, 870, 1_500),
    ];
    store
        .commit_segment_plan(content.id, &segments, ContentState::Processing)
        .await
        .unwrap();

    let artifact = serde_json::json!({"summary": "ok", "topics": ["a"]});
    store
        .mark_segment_analyzed(content.id, 0, &artifact, "gemini-2.5-pro", 1_234, Some(3))
        .await
        .unwrap();
    store
        .mark_segment_failed(content.id, 1, SegmentState::Failed, "daily-quota")
        .await
        .unwrap();

    let analyzed = store.get_segment(content.id, 0).await.unwrap();
    assert_eq!(analyzed.state, SegmentState::Analyzed);
    assert_eq!(analyzed.analysis, Some(artifact));
    assert_eq!(analyzed.model_used.as_deref(), Some("gemini-2.5-pro"));
    assert_eq!(analyzed.processing_ms, Some(1_234));
    assert_eq!(analyzed.prompt_version, Some(3));

    assert_eq!(
        store
            .count_segments_by_state(content.id, &[SegmentState::Analyzed])
            .await
            .unwrap(),
        1
    );
    assert_eq!(
        store
            .count_segments_by_state(
                content.id,
                &[SegmentState::Failed, SegmentState::Overloaded]
            )
            .await
            .unwrap(),
        1
    );

    let failed_only = store
        .list_segments(content.id, Some(SegmentState::Failed))
        .await
        .unwrap();
    assert_eq!(failed_only.len(), 1);
    assert_eq!(failed_only[0].error.as_deref(), Some("daily-quota"));
}

#[tokio::test]
async fn test_reset_failed_segments() {
    let (store, channel) = store_with_channel().await;
    let content = seeded_content(&store, &channel, "vid-1").await;
    let segments = vec![
        Segment::pending(content.id, 0, 0, 900),
        Segment::pending(content.id, 1, 870, 1_500),
    ];
    store
        .commit_segment_plan(content.id, &segments, ContentState::Processing)
        .await
        .unwrap();

    store
        .mark_segment_failed(content.id, 1, SegmentState::Overloaded, "overloaded")
        .await
        .unwrap();
    store.bump_segment_retry(content.id, 1).await.unwrap();

    let reset = store.reset_failed_segments(content.id).await.unwrap();
    assert_eq!(reset, vec![1]);

    let segment = store.get_segment(content.id, 1).await.unwrap();
    assert_eq!(segment.state, SegmentState::Pending);
    assert_eq!(segment.retry_count, 0);
    assert!(segment.error.is_none());
}

#[tokio::test]
async fn test_combined_analysis_write() {
    let (store, channel) = store_with_channel().await;
    let content = seeded_content(&store, &channel, "vid-1").await;

    let artifact = serde_json::json!({"summary": "combined", "overview": "all good"});
    let models = vec!["gemini-2.5-pro".to_string(), "gemini-2.5-flash".to_string()];
    let at = Utc::now();
    store
        .set_combined_analysis(content.id, &artifact, &models, Some(2), at)
        .await
        .unwrap();

    let fetched = store.get_content(content.id).await.unwrap();
    assert_eq!(fetched.state, ContentState::Analyzed);
    assert_eq!(fetched.combined_analysis, Some(artifact));
    assert_eq!(fetched.models_used, models);
    assert!(fetched.combined_at.is_some());
    assert!(fetched.last_error.is_none());
}

#[tokio::test]
async fn test_statistics_append() {
    let (store, channel) = store_with_channel().await;
    let content = seeded_content(&store, &channel, "vid-1").await;

    for count in [100, 250] {
        store
            .append_statistic(
                content.id,
                &StatPoint {
                    at: Utc::now(),
                    view_count: count,
                },
            )
            .await
            .unwrap();
    }

    let fetched = store.get_content(content.id).await.unwrap();
    assert_eq!(fetched.statistics.len(), 2);
    assert_eq!(fetched.statistics[1].view_count, 250);
    assert_eq!(fetched.view_count, Some(250));
}

#[tokio::test]
async fn test_deleting_channel_cascades_to_segments() {
    let (store, channel) = store_with_channel().await;
    let content = seeded_content(&store, &channel, "vid-1").await;
    store
        .commit_segment_plan(
            content.id,
            &[Segment::pending(content.id, 0, 0, 480)],
            ContentState::Processing,
        )
        .await
        .unwrap();

    store.delete_channel(channel.id).await.unwrap();

    assert!(store.get_content(content.id).await.is_err());
    assert!(store.get_segment(content.id, 0).await.is_err());
}

#[tokio::test]
async fn test_prompt_versions_and_active_lookup() {
    let store = SqliteStore::in_memory().await.unwrap();

    for (version, active) in [(1, true), (2, true), (3, false)] {
        store
            .upsert_prompt(&Prompt {
                id: Uuid::new_v4(),
                name: "segment-analysis".to_string(),
                version,
                template: format!("v{version} {{title}}"),
                is_active: active,
                prompt_type: PromptType::SegmentAnalysis,
                response_schema: None,
                mime_type: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }

    let active = store
        .get_active_prompt(PromptType::SegmentAnalysis)
        .await
        .unwrap()
        .unwrap();
    // Highest active version wins; the inactive v3 is skipped.
    assert_eq!(active.version, 2);

    assert!(store
        .get_active_prompt(PromptType::Combination)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_quota_violation_retention() {
    let store = SqliteStore::in_memory().await.unwrap();
    let now = Utc::now();

    let violation = |kind: &str, age: ChronoDuration| QuotaViolationRecord {
        id: Uuid::new_v4(),
        model: "gemini-2.5-pro".to_string(),
        kind: kind.to_string(),
        retry_delay_secs: Some(45),
        raw_payload: "{}".to_string(),
        created_at: now - age,
    };

    store
        .record_quota_violation(&violation("RPM", ChronoDuration::days(8)))
        .await
        .unwrap();
    store
        .record_quota_violation(&violation("RPD", ChronoDuration::days(2)))
        .await
        .unwrap();
    store
        .record_quota_violation(&violation("RPM", ChronoDuration::hours(1)))
        .await
        .unwrap();

    let removed = store.prune_quota_violations(now).await.unwrap();
    assert_eq!(removed, 2);

    let remaining = store.list_quota_violations(10).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind, "RPM");
    assert_eq!(remaining[0].retry_delay_secs, Some(45));
}
