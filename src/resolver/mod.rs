use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};
use url::Url;

use crate::client::FetchClient;
use crate::model::{Media, Post};
use crate::provider::{Provider, YoutubeProvider};

pub const DEFAULT_LOOKUP_DEPTH: u32 = 2;

const MAX_FILENAME_STEM: usize = 100;

/// Result of a resolution attempt: a directly fetchable url plus the
/// filename to store it under. Produced per download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub url: String,
    pub filename: String,
}

/// Converts any media reference into a `(url, filename)` pair suitable for
/// a byte-stream download. Resolution never fails: when the lookup budget
/// runs out or a hop errors, the closest url found so far is accepted.
pub struct MediaResolver {
    youtube: YoutubeProvider,
    lookup_depth: u32,
}

impl MediaResolver {
    pub fn new(client: Arc<dyn FetchClient>, lookup_depth: u32) -> Self {
        Self {
            youtube: YoutubeProvider::new(client),
            lookup_depth,
        }
    }

    pub async fn resolve(
        &self,
        provider: &dyn Provider,
        post: &Post,
        media: &Media,
    ) -> ResolvedMedia {
        self.lookup(provider, post, media.clone(), self.lookup_depth)
            .await
    }

    fn lookup<'a>(
        &'a self,
        provider: &'a dyn Provider,
        post: &'a Post,
        media: Media,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = ResolvedMedia> + Send + 'a>> {
        Box::pin(async move {
            // A path ending in an extension token is already direct.
            if has_extension(media.url()) {
                return ResolvedMedia {
                    url: media.url().to_string(),
                    filename: file_name(&media, &post.id),
                };
            }

            // Video-host urls go through the dedicated resolver; the
            // filename comes from the post itself, not the opaque url.
            if let Some(host) = host_of(media.url()) {
                if YoutubeProvider::is_video_host(&host) {
                    let resolved = match self.youtube.resolve(&media).await {
                        Ok(resolved) => resolved,
                        Err(e) => {
                            warn!("Video host resolution failed for {}: {}", media.url(), e);
                            media.clone()
                        }
                    };
                    let stem = post
                        .text
                        .as_deref()
                        .filter(|text| !text.is_empty())
                        .unwrap_or(&post.id);
                    return ResolvedMedia {
                        url: resolved.url().to_string(),
                        filename: format!("{}.mp4", abbreviate(&sanitize(stem))),
                    };
                }
            }

            let resolved = match provider.resolve(&media).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("Provider resolve failed for {}: {}", media.url(), e);
                    return ResolvedMedia {
                        url: media.url().to_string(),
                        filename: file_name(&media, &post.id),
                    };
                }
            };

            if depth == 0 {
                debug!(
                    "Lookup depth exhausted, accepting {} as-is",
                    resolved.url()
                );
                return ResolvedMedia {
                    url: resolved.url().to_string(),
                    filename: file_name(&resolved, &post.id),
                };
            }

            self.lookup(provider, post, resolved, depth - 1).await
        })
    }
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
}

/// True when the url path's last segment carries a non-empty extension
/// token after its last dot.
fn has_extension(url: &str) -> bool {
    let path = match Url::parse(url) {
        Ok(url) => url.path().to_string(),
        Err(_) => return false,
    };
    path.rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .map(|(_, extension)| !extension.is_empty())
        .unwrap_or(false)
}

/// Filename from the url path: last segment's stem plus either its own
/// extension or the variant default. Empty stems fall back to `fallback`.
fn file_name(media: &Media, fallback: &str) -> String {
    let path = Url::parse(media.url())
        .map(|url| url.path().to_string())
        .unwrap_or_else(|_| media.url().to_string());
    let segment = path.rsplit('/').next().unwrap_or_default();

    let (stem, extension) = match segment.rsplit_once('.') {
        Some((stem, extension)) if !extension.is_empty() => (stem, extension),
        _ => (segment, ""),
    };

    let stem = if stem.is_empty() { fallback } else { stem };
    let extension = if extension.is_empty() {
        media.default_extension()
    } else {
        extension
    };
    format!("{stem}.{extension}")
}

/// Cap a post-derived filename stem at 100 characters, `...` included.
fn abbreviate(text: &str) -> String {
    if text.chars().count() > MAX_FILENAME_STEM {
        let kept: String = text.chars().take(MAX_FILENAME_STEM - 3).collect();
        format!("{kept}...")
    } else {
        text.to_string()
    }
}

fn sanitize(stem: &str) -> String {
    stem.replace(
        ['/', '\\', ':', '*', '?', '"', '<', '>', '|', '\n', '\r'],
        "_",
    )
}
