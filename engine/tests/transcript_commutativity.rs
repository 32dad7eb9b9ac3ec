//! Concurrent transcript appends for the same episode: SQLite's own write
//! lock must serialize the read-modify-write of each append, so even under
//! forced interleaving from two workers, no chunk's text is ever split or
//! merged mid-string.

use digest_pipeline_engine::db::episodes::{EpisodeStatus, NewEpisode};
use digest_pipeline_engine::db::feeds::FeedRepository;
use digest_pipeline_engine::db::{episodes::EpisodeRepository, Db};

fn setup() -> (tempfile::TempDir, EpisodeRepository, i64) {
    let dir = tempfile::tempdir().unwrap();
    let db = Db::open(dir.path().join("pipeline.sqlite3")).unwrap();
    let feeds = FeedRepository::new(db.clone());
    let feed = feeds.upsert("https://example.com/feed.xml", "Example", "").unwrap();
    let episodes = EpisodeRepository::new(db);
    episodes
        .insert_if_new(NewEpisode {
            episode_guid: "concurrent-ep",
            feed_id: feed.id,
            title: "Long Episode",
            published_date: None,
            audio_url: "https://example.com/ep.mp3",
            description: "",
        })
        .unwrap();
    let episode = episodes.list_by_status(EpisodeStatus::Pending, None).unwrap().remove(0);
    (dir, episodes, episode.id)
}

#[test]
fn concurrent_appends_from_two_workers_never_interleave_a_chunk() {
    let (_dir, repo, episode_id) = setup();
    repo.mark_processing_started(episode_id).unwrap();

    const APPENDS_PER_WORKER: usize = 25;
    let repo_a = repo.clone();
    let repo_b = repo.clone();

    let worker = |repo: EpisodeRepository, tag: &'static str| {
        std::thread::spawn(move || {
            for i in 0..APPENDS_PER_WORKER {
                let text = format!("[{tag}-{i:03}]");
                repo.append_transcript_chunk(episode_id, &text, 1).unwrap();
            }
        })
    };

    let handle_a = worker(repo_a, "A");
    let handle_b = worker(repo_b, "B");
    handle_a.join().unwrap();
    handle_b.join().unwrap();

    let episode = repo.get(episode_id).unwrap().unwrap();
    assert_eq!(episode.chunk_count, (APPENDS_PER_WORKER * 2) as i64);
    assert_eq!(episode.transcript_word_count, (APPENDS_PER_WORKER * 2) as i64);

    // Every tag must appear exactly once, fully intact: a torn write would
    // either duplicate a fragment or corrupt a bracket boundary.
    for tag in ["A", "B"] {
        for i in 0..APPENDS_PER_WORKER {
            let marker = format!("[{tag}-{i:03}]");
            let occurrences = episode.transcript_content.matches(&marker).count();
            assert_eq!(occurrences, 1, "marker {marker} did not appear exactly once");
        }
    }

    // Total length must equal the sum of the parts: no bytes lost or
    // duplicated in the race, regardless of final ordering.
    let expected_len: usize = ["A", "B"]
        .iter()
        .flat_map(|tag| (0..APPENDS_PER_WORKER).map(move |i| format!("[{tag}-{i:03}]").len()))
        .sum();
    assert_eq!(episode.transcript_content.len(), expected_len);
}
