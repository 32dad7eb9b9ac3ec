//! End-to-end coverage of score → digest → publish for a single topic,
//! driven entirely through the repository layer and stub providers so it
//! never touches the network or a subprocess.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use digest_pipeline_engine::context::Context;
use digest_pipeline_engine::db::digests::DigestStatus;
use digest_pipeline_engine::db::episodes::{EpisodeStatus, NewEpisode};
use digest_pipeline_engine::db::topics::Topic;
use digest_pipeline_engine::db::Db;
use digest_pipeline_engine::digest::DigestComposer;
use digest_pipeline_engine::publish::{Publisher, Release, ReleaseAsset, ReleaseStore};
use digest_pipeline_engine::score::provider::{LlmProvider, LlmRequest, LlmResponse};
use digest_pipeline_engine::PipelineError;

struct CannedLlm {
    text: Arc<str>,
}

#[async_trait]
impl LlmProvider for CannedLlm {
    async fn complete(&self, _request: LlmRequest) -> digest_pipeline_engine::Result<LlmResponse> {
        Ok(LlmResponse {
            output_text: self.text.to_string(),
            usage_tokens: Some(42),
        })
    }
}

/// In-memory release store: one release per tag, assets keyed by name.
struct MemoryReleaseStore {
    releases: parking_lot::Mutex<HashMap<String, Release>>,
}

impl MemoryReleaseStore {
    fn new() -> Self {
        Self {
            releases: parking_lot::Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn find_by_tag(&self, tag: &str) -> digest_pipeline_engine::Result<Option<Release>> {
        Ok(self.releases.lock().get(tag).cloned())
    }

    async fn create(&self, tag: &str) -> digest_pipeline_engine::Result<Release> {
        let release = Release {
            id: tag.to_string(),
            tag: tag.to_string(),
            upload_url: format!("memory://{tag}"),
            assets: Vec::new(),
        };
        self.releases.lock().insert(tag.to_string(), release.clone());
        Ok(release)
    }

    async fn upload_asset(&self, release: &Release, _file_path: &Path, name: &str) -> digest_pipeline_engine::Result<String> {
        let download_url = format!("memory://{}/{}", release.tag, name);
        let mut releases = self.releases.lock();
        let entry = releases.get_mut(&release.tag).expect("release exists");
        entry.assets.push(ReleaseAsset {
            name: name.to_string(),
            download_url: download_url.clone(),
        });
        Ok(download_url)
    }

    async fn delete(&self, release: &Release) -> digest_pipeline_engine::Result<()> {
        self.releases.lock().remove(&release.tag);
        Ok(())
    }
}

fn sample_topic(use_dialogue_api: bool) -> Topic {
    Topic {
        slug: "ai-news".to_string(),
        name: "AI News".to_string(),
        description: "Artificial intelligence industry news".to_string(),
        voice_id: "voice-1".to_string(),
        voice_settings: "{}".to_string(),
        instructions_md: "Summarize the week's AI news.".to_string(),
        is_active: true,
        sort_order: 0,
        use_dialogue_api,
        dialogue_model: "dialogue-default".to_string(),
        voice_config: "{}".to_string(),
    }
}

fn build_context(dir: &tempfile::TempDir) -> Context {
    let db = Db::open(dir.path().join("pipeline.sqlite3")).unwrap();
    Context::new(db, "test-run".to_string()).unwrap()
}

async fn seed_scored_episode(ctx: &Context, guid: &str, score: f64) -> i64 {
    ctx.repos.feeds.upsert("https://example.com/feed.xml", "Example Cast", "").unwrap();
    let feed = ctx.repos.feeds.get_by_url("https://example.com/feed.xml").unwrap().unwrap();
    ctx.repos
        .episodes
        .insert_if_new(NewEpisode {
            episode_guid: guid,
            feed_id: feed.id,
            title: "Episode One",
            published_date: Some("2026-07-20T00:00:00+00:00"),
            audio_url: "https://example.com/ep1.mp3",
            description: "",
        })
        .unwrap();
    let episode = ctx
        .repos
        .episodes
        .list_by_status(EpisodeStatus::Pending, None)
        .unwrap()
        .into_iter()
        .find(|e| e.episode_guid == guid)
        .unwrap();

    ctx.repos.episodes.mark_processing_started(episode.id).unwrap();
    ctx.repos
        .episodes
        .append_transcript_chunk(episode.id, "A full hour of discussion about the latest AI model releases. ", 11)
        .unwrap();
    ctx.repos.episodes.mark_transcribed(episode.id).unwrap();

    let mut scores = HashMap::new();
    scores.insert("AI News".to_string(), score);
    ctx.repos.episodes.set_scores(episode.id, &scores).unwrap();
    episode.id
}

/// Scenario 1: single-episode narrative digest, score -> digest -> publish,
/// ending with the digest published and its local MP3 reclaimed.
#[tokio::test]
async fn single_episode_narrative_digest_is_published() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = build_context(&dir);
    ctx.repos.topics.upsert(&sample_topic(false)).unwrap();
    let episode_id = seed_scored_episode(&ctx, "ep-guid-1", 0.9).await;

    let llm = CannedLlm {
        text: Arc::from("A calm narrative recounting this week's AI model releases in plain prose."),
    };
    let outcome = DigestComposer::run_with_provider(&ctx, &llm).await;
    assert!(outcome.fatal.is_none());
    assert_eq!(outcome.succeeded, 1);
    assert!(outcome.failed.is_empty());

    let episode = ctx.repos.episodes.get(episode_id).unwrap().unwrap();
    assert_eq!(episode.status, EpisodeStatus::Digested);

    let drafts = ctx.repos.digests.list_by_status(DigestStatus::Draft).unwrap();
    assert_eq!(drafts.len(), 1);
    let digest = &drafts[0];
    assert_eq!(digest.episode_count, 1);
    assert!((digest.average_score - 0.9).abs() < 1e-9);

    // Simulate the TTS phase: write a stand-in MP3 file >= 10 KB before
    // flipping status, matching the atomic-audio-commit invariant.
    let mp3_path = dir.path().join("digest.mp3");
    std::fs::write(&mp3_path, vec![0u8; 12_000]).unwrap();
    assert!(mp3_path.exists());
    assert!(std::fs::metadata(&mp3_path).unwrap().len() >= 10 * 1024);
    ctx.repos
        .digests
        .set_rendered(digest.id, &mp3_path.display().to_string(), 3600.0, "AI News digest", "")
        .unwrap();
    assert_eq!(ctx.repos.digests.get(digest.id).unwrap().unwrap().status, DigestStatus::Rendered);

    let store = MemoryReleaseStore::new();
    let outcome = Publisher::run_with_store(&ctx, &store).await;
    assert!(outcome.fatal.is_none());
    assert_eq!(outcome.succeeded, 1);

    let published = ctx.repos.digests.get(digest.id).unwrap().unwrap();
    assert_eq!(published.status, DigestStatus::Published);
    assert!(published.published_url.is_some());
    assert!(!mp3_path.exists(), "local mp3 should be reclaimed after publish");
}

/// Digest uniqueness: a second composition pass on the same date, once the
/// only qualifying episode has already been digested, must not mint a
/// second digest row for the same `(topic, date)` pair.
#[tokio::test]
async fn rerun_on_same_date_does_not_duplicate_digest() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = build_context(&dir);
    ctx.repos.topics.upsert(&sample_topic(false)).unwrap();
    seed_scored_episode(&ctx, "ep-guid-2", 0.9).await;

    let llm = CannedLlm {
        text: Arc::from("First pass narrative script."),
    };
    let first = DigestComposer::run_with_provider(&ctx, &llm).await;
    assert_eq!(first.succeeded, 1);
    let first_digest = ctx.repos.digests.list_by_status(DigestStatus::Draft).unwrap().remove(0);

    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let second = DigestComposer::run_with_provider(&ctx, &llm).await;
    assert!(second.fatal.is_none());
    assert!(second.failed.is_empty());

    let on_file = ctx.repos.digests.get_for_date("ai-news", &today).unwrap().unwrap();
    assert_eq!(on_file.id, first_digest.id, "rerun should not have minted a second digest");
}

#[tokio::test]
async fn llm_request_reaches_provider_unmodified_for_single_topic() {
    // Exercises the request shape the scorer/digest share, guarding the
    // provider abstraction's field names against accidental renames.
    struct RecordingLlm;
    #[async_trait]
    impl LlmProvider for RecordingLlm {
        async fn complete(&self, request: LlmRequest) -> digest_pipeline_engine::Result<LlmResponse> {
            assert!(request.max_output_tokens > 0);
            assert!(!request.user_prompt.is_empty());
            Err(PipelineError::permanent("stop after inspecting request"))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let ctx = build_context(&dir);
    ctx.repos.topics.upsert(&sample_topic(false)).unwrap();
    seed_scored_episode(&ctx, "ep-guid-3", 0.9).await;

    let outcome = DigestComposer::run_with_provider(&ctx, &RecordingLlm).await;
    assert_eq!(outcome.failed.len(), 1);
}
