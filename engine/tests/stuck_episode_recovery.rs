//! Scenario 6 (resume after a crash), scoped to the database-level portion:
//! an episode abandoned mid-`processing` is reclaimed to `pending` on the
//! next run's recovery sweep, while an episode that had already finished
//! transcription is left untouched.

use std::collections::HashMap;

use digest_pipeline_engine::context::Context;
use digest_pipeline_engine::db::episodes::{EpisodeStatus, NewEpisode};
use digest_pipeline_engine::db::Db;

fn build_context(dir: &tempfile::TempDir) -> Context {
    let db = Db::open(dir.path().join("pipeline.sqlite3")).unwrap();
    Context::new(db, "test-run".to_string()).unwrap()
}

#[test]
fn crashed_episode_recovers_while_finished_work_is_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = build_context(&dir);
    ctx.repos.feeds.upsert("https://example.com/feed.xml", "Example", "").unwrap();
    let feed = ctx.repos.feeds.get_by_url("https://example.com/feed.xml").unwrap().unwrap();

    // Episode A: left in `processing` when the prior run crashed.
    ctx.repos
        .episodes
        .insert_if_new(NewEpisode {
            episode_guid: "crashed-ep",
            feed_id: feed.id,
            title: "Crashed Mid-Transcribe",
            published_date: None,
            audio_url: "https://example.com/a.mp3",
            description: "",
        })
        .unwrap();

    // Episode B: fully transcribed before the crash.
    ctx.repos
        .episodes
        .insert_if_new(NewEpisode {
            episode_guid: "finished-ep",
            feed_id: feed.id,
            title: "Already Transcribed",
            published_date: None,
            audio_url: "https://example.com/b.mp3",
            description: "",
        })
        .unwrap();

    let pending = ctx.repos.episodes.list_by_status(EpisodeStatus::Pending, None).unwrap();
    let episode_a = pending.iter().find(|e| e.episode_guid == "crashed-ep").unwrap();
    let episode_b = pending.iter().find(|e| e.episode_guid == "finished-ep").unwrap();

    ctx.repos.episodes.mark_processing_started(episode_a.id).unwrap();

    ctx.repos.episodes.mark_processing_started(episode_b.id).unwrap();
    ctx.repos
        .episodes
        .append_transcript_chunk(episode_b.id, "Fully transcribed content.", 3)
        .unwrap();
    ctx.repos.episodes.mark_transcribed(episode_b.id).unwrap();
    let mut scores = HashMap::new();
    scores.insert("AI News".to_string(), 0.8);
    ctx.repos.episodes.set_scores(episode_b.id, &scores).unwrap();

    // A zero-second timeout: any `processing` row whose start timestamp is
    // strictly before "now" at sweep time is reclaimed, same as the
    // orchestrator's startup recovery sweep for a realistic timeout.
    let recovered = ctx.repos.episodes.recover_stuck(0).unwrap();
    assert_eq!(recovered, 1);

    let reloaded_a = ctx.repos.episodes.get(episode_a.id).unwrap().unwrap();
    assert_eq!(reloaded_a.status, EpisodeStatus::Pending);
    assert!(reloaded_a.processing_started_at.is_none());

    let reloaded_b = ctx.repos.episodes.get(episode_b.id).unwrap().unwrap();
    assert_eq!(reloaded_b.status, EpisodeStatus::Scored);
    assert_eq!(reloaded_b.transcript_content, "Fully transcribed content.");
}
