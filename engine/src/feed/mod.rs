//! Feed ingester: fetch each active feed, parse its entries, and insert new
//! Episode rows for anything within the look-back window.

use chrono::{DateTime, Utc};
use tracing::{info, info_span, warn};

use crate::context::Context;
use crate::db::episodes::NewEpisode;
use crate::db::feeds::Feed;
use crate::error::{PipelineError, Result};
use crate::orchestrator::PhaseOutcome;

pub struct FeedIngester;

impl FeedIngester {
    /// Runs ingestion for every active feed, returning a `PhaseOutcome`
    /// aggregated across feeds (a feed-level failure is recorded as a
    /// per-feed "failed" entry, not a fatal abort of the run).
    pub async fn run(ctx: &Context) -> PhaseOutcome {
        let _span = info_span!("feed_ingest").entered();
        let feeds = match ctx.repos.feeds.list_active() {
            Ok(feeds) => feeds,
            Err(err) => return PhaseOutcome::fatal(err),
        };

        let mut outcome = PhaseOutcome::new();
        for feed in feeds {
            if ctx.is_cancelled() {
                break;
            }
            outcome.attempted += 1;
            match Self::ingest_one(ctx, &feed).await {
                Ok(new_count) => {
                    outcome.succeeded += 1;
                    info!(feed = %feed.url, new_episodes = new_count, "feed ingested");
                }
                Err(err) => {
                    warn!(feed = %feed.url, error = %err, "feed ingest failed");
                    outcome.failed.push((feed.id, err.to_string()));
                    let _ = ctx.repos.feeds.record_failure(feed.id);
                }
            }
        }
        outcome
    }

    async fn ingest_one(ctx: &Context, feed: &Feed) -> Result<usize> {
        let bytes = ctx
            .http
            .get(&feed.url)
            .send()
            .await
            .map_err(|e| PipelineError::TransientNetwork {
                target: feed.url.clone(),
                detail: e.to_string(),
            })?
            .bytes()
            .await
            .map_err(|e| PipelineError::TransientNetwork {
                target: feed.url.clone(),
                detail: e.to_string(),
            })?;

        let channel = rss::Channel::read_from(&bytes[..])
            .map_err(|e| PipelineError::permanent(format!("unparseable feed: {e}")))?;

        let cutoff = Utc::now() - chrono::Duration::days(ctx.settings.feed_lookback_days);
        let mut new_count = 0usize;
        let mut newest_date: Option<String> = None;

        for item in channel.items() {
            let Some(guid) = item.guid().map(|g| g.value().to_string()) else {
                warn!(feed = %feed.url, "item missing guid, skipped");
                continue;
            };

            let published = parse_published_date(item);
            let Some(published) = published else {
                warn!(feed = %feed.url, guid, reason = "no publish date", "item skipped");
                continue;
            };
            if published < cutoff {
                continue;
            }

            let Some(audio_url) = audio_enclosure_url(item) else {
                warn!(feed = %feed.url, guid, reason = "no audio enclosure", "item skipped");
                continue;
            };

            let published_str = published.to_rfc3339();
            let inserted = ctx.repos.episodes.insert_if_new(NewEpisode {
                episode_guid: &guid,
                feed_id: feed.id,
                title: item.title().unwrap_or_default(),
                published_date: Some(&published_str),
                audio_url: &audio_url,
                description: item.description().unwrap_or_default(),
            })?;
            if inserted {
                new_count += 1;
                if newest_date.as_deref().map(|d| d < published_str.as_str()).unwrap_or(true) {
                    newest_date = Some(published_str);
                }
            }
        }

        ctx.repos.feeds.record_success(feed.id)?;
        if let Some(date) = newest_date {
            ctx.repos.feeds.record_last_episode_date(feed.id, &date)?;
        }
        Ok(new_count)
    }
}

fn audio_enclosure_url(item: &rss::Item) -> Option<String> {
    item.enclosure()
        .filter(|e| e.mime_type().starts_with("audio/"))
        .map(|e| e.url().to_string())
}

/// Tries `pubDate` (RFC 2822) first, then `updated` custom element (RFC 3339).
fn parse_published_date(item: &rss::Item) -> Option<DateTime<Utc>> {
    if let Some(pub_date) = item.pub_date() {
        if let Ok(parsed) = DateTime::parse_from_rfc2822(pub_date) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    item.extensions()
        .get("")
        .and_then(|ns| ns.get("updated"))
        .and_then(|exts| exts.first())
        .and_then(|ext| ext.value())
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED_XML: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
<channel>
  <title>Example Podcast</title>
  <item>
    <title>Episode One</title>
    <guid>ep-1</guid>
    <pubDate>Mon, 01 Jan 2026 00:00:00 +0000</pubDate>
    <enclosure url="https://example.com/ep1.mp3" type="audio/mpeg" length="123"/>
  </item>
  <item>
    <title>No Audio</title>
    <guid>ep-2</guid>
    <pubDate>Mon, 01 Jan 2026 00:00:00 +0000</pubDate>
  </item>
</channel>
</rss>"#;

    #[test]
    fn parses_audio_enclosure_and_skips_missing() {
        let channel = rss::Channel::read_from(FEED_XML.as_bytes()).unwrap();
        let items: Vec<_> = channel.items().to_vec();
        assert_eq!(audio_enclosure_url(&items[0]).as_deref(), Some("https://example.com/ep1.mp3"));
        assert_eq!(audio_enclosure_url(&items[1]), None);
    }

    #[test]
    fn parses_rfc2822_pub_date() {
        let channel = rss::Channel::read_from(FEED_XML.as_bytes()).unwrap();
        let item = &channel.items()[0];
        let parsed = parse_published_date(item).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }
}
