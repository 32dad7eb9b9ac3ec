//! Publisher: uploads finished digest MP3s to an external release store,
//! grouped by date, records the public URL, and reclaims local disk.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, info_span, warn};

use crate::context::Context;
use crate::db::digests::{Digest, DigestStatus};
use crate::error::{PipelineError, Result};
use crate::orchestrator::PhaseOutcome;

#[derive(Debug, Clone)]
pub struct ReleaseAsset {
    pub name: String,
    pub download_url: String,
}

#[derive(Debug, Clone)]
pub struct Release {
    pub id: String,
    pub tag: String,
    pub upload_url: String,
    pub assets: Vec<ReleaseAsset>,
}

#[async_trait::async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn find_by_tag(&self, tag: &str) -> Result<Option<Release>>;
    async fn create(&self, tag: &str) -> Result<Release>;
    async fn upload_asset(&self, release: &Release, file_path: &Path, name: &str) -> Result<String>;
    /// Deletes the release, treating "already gone" as success.
    async fn delete(&self, release: &Release) -> Result<()>;
}

pub struct RestReleaseStore {
    http: std::sync::Arc<reqwest::Client>,
    base_url: String,
    token: String,
}

impl RestReleaseStore {
    pub fn new(http: std::sync::Arc<reqwest::Client>, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait::async_trait]
impl ReleaseStore for RestReleaseStore {
    async fn find_by_tag(&self, tag: &str) -> Result<Option<Release>> {
        let url = format!("{}/releases/tags/{}", self.base_url, tag);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PipelineError::TransientNetwork {
                target: url.clone(),
                detail: e.to_string(),
            })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: serde_json::Value = response.json().await?;
        Ok(Some(parse_release(&body)))
    }

    async fn create(&self, tag: &str) -> Result<Release> {
        let url = format!("{}/releases", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({"tag_name": tag, "name": tag}))
            .send()
            .await
            .map_err(|e| PipelineError::TransientNetwork {
                target: url.clone(),
                detail: e.to_string(),
            })?;
        let body: serde_json::Value = response.json().await?;
        Ok(parse_release(&body))
    }

    async fn upload_asset(&self, release: &Release, file_path: &Path, name: &str) -> Result<String> {
        let bytes = tokio::fs::read(file_path).await?;
        let url = format!("{}?name={}", release.upload_url, name);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .body(bytes)
            .send()
            .await
            .map_err(|e| PipelineError::TransientNetwork {
                target: url.clone(),
                detail: e.to_string(),
            })?;
        let body: serde_json::Value = response.json().await?;
        Ok(body["browser_download_url"].as_str().unwrap_or_default().to_string())
    }

    async fn delete(&self, release: &Release) -> Result<()> {
        let url = format!("{}/releases/{}", self.base_url, release.id);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| PipelineError::TransientNetwork {
                target: url.clone(),
                detail: e.to_string(),
            })?;
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(PipelineError::ExternalTool {
                tool: "release-store".to_string(),
                detail: format!("delete failed with status {}", response.status()),
            });
        }
        Ok(())
    }
}

fn parse_release(body: &serde_json::Value) -> Release {
    Release {
        id: body["id"].to_string(),
        tag: body["tag_name"].as_str().unwrap_or_default().to_string(),
        upload_url: body["upload_url"]
            .as_str()
            .unwrap_or_default()
            .trim_end_matches("{?name,label}")
            .to_string(),
        assets: body["assets"]
            .as_array()
            .map(|assets| {
                assets
                    .iter()
                    .map(|a| ReleaseAsset {
                        name: a["name"].as_str().unwrap_or_default().to_string(),
                        download_url: a["browser_download_url"].as_str().unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

pub struct Publisher;

impl Publisher {
    pub async fn run(ctx: &Context) -> PhaseOutcome {
        let store = RestReleaseStore::new(ctx.http.clone(), "", "");
        Self::run_with_store(ctx, &store).await
    }

    pub async fn run_with_store(ctx: &Context, store: &dyn ReleaseStore) -> PhaseOutcome {
        let _span = info_span!("publish").entered();
        let pending = match ctx.repos.digests.list_by_status(DigestStatus::Rendered) {
            Ok(d) => d,
            Err(err) => return PhaseOutcome::fatal(err),
        };

        let mut by_date: HashMap<String, Vec<Digest>> = HashMap::new();
        for digest in pending {
            if digest.published_url.is_some() {
                continue;
            }
            by_date.entry(digest.digest_date.clone()).or_default().push(digest);
        }

        let mut outcome = PhaseOutcome::new();
        for (date, digests) in by_date {
            let tag = format!("digest-{date}");
            let release = match Self::ensure_release(store, &tag).await {
                Ok(r) => r,
                Err(err) => {
                    for digest in &digests {
                        outcome.failed.push((digest.id, err.to_string()));
                    }
                    continue;
                }
            };

            for digest in digests {
                outcome.attempted += 1;
                match Self::publish_one(ctx, store, &release, &digest).await {
                    Ok(()) => {
                        outcome.succeeded += 1;
                        info!(digest_id = digest.id, "published");
                    }
                    Err(err) => {
                        warn!(digest_id = digest.id, error = %err, "publish failed");
                        outcome.failed.push((digest.id, err.to_string()));
                    }
                }
            }
        }
        outcome
    }

    async fn ensure_release(store: &dyn ReleaseStore, tag: &str) -> Result<Release> {
        match store.find_by_tag(tag).await? {
            Some(release) => Ok(release),
            None => store.create(tag).await,
        }
    }

    async fn publish_one(ctx: &Context, store: &dyn ReleaseStore, release: &Release, digest: &Digest) -> Result<()> {
        let Some(mp3_path) = &digest.mp3_path else {
            return Err(PipelineError::permanent("digest has no mp3_path"));
        };
        let file_name = format!("{}-{}.mp3", digest.topic, digest.digest_date);

        let download_url = match release.assets.iter().find(|a| a.name == file_name) {
            Some(existing) => existing.download_url.clone(),
            None => store.upload_asset(release, Path::new(mp3_path), &file_name).await?,
        };

        ctx.repos.digests.set_published(digest.id, &download_url)?;
        let _ = tokio::fs::remove_file(mp3_path).await;
        Ok(())
    }
}
