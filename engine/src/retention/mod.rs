//! Retention: age-based deletion across five categories, with remote release
//! pruning treated as best-effort and a dry-run mode for safe previews.
//! Database-row retention spans both the digest and episode tables under one
//! category, since pruning one without the other would leave dangling links.

use chrono::{Duration, Utc};
use tracing::{info, info_span, warn};

use crate::context::Context;
use crate::error::Result;
use crate::orchestrator::PhaseOutcome;
use crate::publish::{ReleaseStore, RestReleaseStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionCategory {
    LocalMp3,
    AudioCache,
    Logs,
    DatabaseRows,
    RemoteReleases,
}

#[derive(Debug, Default)]
pub struct RetentionReport {
    pub local_mp3_deleted: usize,
    pub audio_cache_deleted: usize,
    pub log_rows_deleted: usize,
    pub episode_rows_deleted: usize,
    pub digest_rows_deleted: usize,
    pub remote_releases_deleted: usize,
}

pub struct Retention;

impl Retention {
    pub async fn run(ctx: &Context) -> PhaseOutcome {
        let store = RestReleaseStore::new(ctx.http.clone(), "", "");
        Self::run_with_store(ctx, &store, false).await
    }

    pub async fn run_with_store(ctx: &Context, store: &dyn ReleaseStore, dry_run: bool) -> PhaseOutcome {
        match Self::sweep(ctx, store, dry_run).await {
            Ok(report) => {
                let mut outcome = PhaseOutcome::new();
                outcome.attempted = 1;
                outcome.succeeded = 1;
                info!(?report, "retention sweep complete");
                outcome
            }
            Err(err) => PhaseOutcome::fatal(err),
        }
    }

    /// Applies (or, if `dry_run`, merely reports) age-based deletion across
    /// all five categories.
    pub async fn sweep(ctx: &Context, store: &dyn ReleaseStore, dry_run: bool) -> Result<RetentionReport> {
        let _span = info_span!("retention", dry_run).entered();
        let mut report = RetentionReport::default();

        report.local_mp3_deleted = Self::sweep_directory(
            "cache/tts",
            ctx.settings.retention_local_mp3_days,
            dry_run,
        )
        .await?;
        report.audio_cache_deleted = Self::sweep_directory(
            "cache/audio",
            ctx.settings.retention_audio_cache_days,
            dry_run,
        )
        .await?;

        let log_cutoff = (Utc::now() - Duration::days(ctx.settings.retention_logs_days)).to_rfc3339();
        report.log_rows_deleted = if dry_run {
            0
        } else {
            ctx.repos.logs.purge_before(&log_cutoff)?
        };

        let db_cutoff = (Utc::now() - Duration::days(ctx.settings.retention_database_rows_days)).to_rfc3339();
        let db_cutoff_date = db_cutoff[..10].to_string();
        if dry_run {
            warn!(cutoff = %db_cutoff_date, "dry-run: would delete digest and episode rows older than cutoff");
        } else {
            report.digest_rows_deleted = ctx.repos.digests.delete_rows_before(&db_cutoff_date)?;
            report.episode_rows_deleted = ctx.repos.episodes.delete_digested_before(&db_cutoff)?;
        }

        let release_cutoff = (Utc::now() - Duration::days(ctx.settings.retention_remote_releases_days))
            .format("%Y-%m-%d")
            .to_string();
        report.remote_releases_deleted =
            Self::prune_remote_releases(ctx, store, &release_cutoff, dry_run).await;

        Ok(report)
    }

    /// Best-effort: finds one release per date (tagged `digest-<date>`) for
    /// dates with published digests older than `cutoff_date`, and deletes
    /// it. A release that's already gone, or a lookup/delete failure, is
    /// logged and skipped rather than failing the whole sweep.
    async fn prune_remote_releases(ctx: &Context, store: &dyn ReleaseStore, cutoff_date: &str, dry_run: bool) -> usize {
        let dates = match ctx.repos.digests.list_published_dates_before(cutoff_date) {
            Ok(d) => d,
            Err(err) => {
                warn!(error = %err, "could not list dates for remote release retention");
                return 0;
            }
        };
        let mut deleted = 0;
        for date in dates {
            let tag = format!("digest-{date}");
            if dry_run {
                warn!(%tag, "dry-run: would delete remote release");
                continue;
            }
            match store.find_by_tag(&tag).await {
                Ok(Some(release)) => match store.delete(&release).await {
                    Ok(()) => deleted += 1,
                    Err(err) => warn!(%tag, error = %err, "failed to delete remote release"),
                },
                Ok(None) => {}
                Err(err) => warn!(%tag, error = %err, "failed to look up remote release"),
            }
        }
        deleted
    }

    async fn sweep_directory(dir: &str, retention_days: i64, dry_run: bool) -> Result<usize> {
        let cutoff = std::time::SystemTime::now() - std::time::Duration::from_secs((retention_days.max(0) as u64) * 86_400);
        let mut deleted = 0usize;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(_) => return Ok(0),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            let modified = metadata.modified().unwrap_or(std::time::SystemTime::now());
            if modified < cutoff {
                deleted += 1;
                if !dry_run {
                    if metadata.is_dir() {
                        let _ = tokio::fs::remove_dir_all(entry.path()).await;
                    } else {
                        let _ = tokio::fs::remove_file(entry.path()).await;
                    }
                } else {
                    warn!(path = %entry.path().display(), "dry-run: would delete");
                }
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_categories_are_enumerated() {
        let categories = [
            RetentionCategory::LocalMp3,
            RetentionCategory::AudioCache,
            RetentionCategory::Logs,
            RetentionCategory::DatabaseRows,
            RetentionCategory::RemoteReleases,
        ];
        assert_eq!(categories.len(), 5);
    }
}
