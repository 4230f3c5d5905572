use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::client::FetchClient;
use crate::model::Post;
use crate::provider::Provider;
use crate::resolver::{MediaResolver, ResolvedMedia};

pub const DEFAULT_PARALLEL_DOWNLOADS: usize = 4;

/// Terminal state of one `(post, media)` pair. Every scheduled pair ends in
/// exactly one of these, regardless of how its siblings fare.
#[derive(Debug)]
pub enum DownloadOutcome {
    Saved(PathBuf),
    Failed { url: String, reason: String },
}

impl DownloadOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, DownloadOutcome::Saved(_))
    }
}

/// Resolves and persists every media item embedded in a batch of posts on a
/// fixed-size worker pool.
pub struct DownloadPipeline {
    client: Arc<dyn FetchClient>,
    resolver: Arc<MediaResolver>,
    parallelism: usize,
}

impl DownloadPipeline {
    pub fn new(
        client: Arc<dyn FetchClient>,
        resolver: MediaResolver,
        parallelism: usize,
    ) -> Self {
        Self {
            client,
            resolver: Arc::new(resolver),
            parallelism: parallelism.max(1),
        }
    }

    /// Download all media of `posts` into `target_dir`. Only the directory
    /// creation can fail the call; per-item failures are isolated into
    /// `Failed` outcomes and completion waits for every scheduled task.
    pub async fn run(
        &self,
        provider: Arc<dyn Provider>,
        posts: &[Post],
        target_dir: &Path,
    ) -> Result<Vec<DownloadOutcome>> {
        tokio::fs::create_dir_all(target_dir)
            .await
            .with_context(|| format!("Failed to create {}", target_dir.display()))?;

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks = JoinSet::new();

        for post in posts {
            for media in &post.media {
                let semaphore = semaphore.clone();
                let provider = provider.clone();
                let resolver = self.resolver.clone();
                let client = self.client.clone();
                let post = post.clone();
                let media = media.clone();
                let target_dir = target_dir.to_path_buf();

                tasks.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return DownloadOutcome::Failed {
                                url: media.url().to_string(),
                                reason: "worker pool closed".to_string(),
                            }
                        }
                    };

                    let resolved = resolver.resolve(provider.as_ref(), &post, &media).await;
                    match transfer(client.as_ref(), &resolved, &target_dir).await {
                        Ok(path) => {
                            info!("Saved {}", path.display());
                            DownloadOutcome::Saved(path)
                        }
                        Err(e) => {
                            warn!("Cannot download {}: {:#}", resolved.url, e);
                            DownloadOutcome::Failed {
                                url: resolved.url,
                                reason: format!("{e:#}"),
                            }
                        }
                    }
                });
            }
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!("Download task aborted: {e}");
                    outcomes.push(DownloadOutcome::Failed {
                        url: String::new(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(outcomes)
    }
}

async fn transfer(
    client: &dyn FetchClient,
    resolved: &ResolvedMedia,
    target_dir: &Path,
) -> Result<PathBuf> {
    match playlist_target(target_dir, &resolved.filename) {
        Some(target) => {
            remux_playlist(&resolved.url, &target).await?;
            Ok(target)
        }
        None => {
            let target = target_dir.join(&resolved.filename);
            client.download(&resolved.url, &target).await?;
            Ok(target)
        }
    }
}

/// Segmented-stream playlists are remuxed into a single mp4 instead of
/// downloaded as raw playlist bytes.
fn playlist_target(target_dir: &Path, filename: &str) -> Option<PathBuf> {
    filename
        .ends_with(".m3u8")
        .then(|| target_dir.join(filename.replace(".m3u8", ".mp4")))
}

async fn remux_playlist(url: &str, target: &Path) -> Result<()> {
    info!("Remuxing playlist {} to {}", url, target.display());

    let output = tokio::process::Command::new("ffmpeg")
        .arg("-loglevel")
        .arg("error")
        .arg("-i")
        .arg(url)
        .arg("-c")
        .arg("copy")
        .arg("-bsf:a")
        .arg("aac_adtstoasc")
        .arg(target)
        .output()
        .await
        .context("Failed to spawn ffmpeg")?;

    if !output.status.success() {
        let error = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!("ffmpeg failed: {}", error));
    }
    Ok(())
}
