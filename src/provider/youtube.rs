use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

use super::{build_full_url, Provider};
use crate::cipher;
use crate::client::{FetchClient, DEFAULT_USER_AGENT};
use crate::model::{Media, PageInfo, Post};

/// itags carrying both an audio and a video track in one stream.
const VIDEO_AND_AUDIO_TAGS: &[i64] = &[
    5, 6, 13, 17, 18, 22, 34, 35, 36, 37, 38, 43, 44, 45, 46, 82, 83, 84, 85, 100, 101, 102, 91,
    92, 93, 94, 95, 96, 132, 151,
];

const DEFAULT_VIDEO_ASPECT_RATIO: f64 = 210.0 / 117.5;

const FETCH_HEADERS: &[(&str, &str)] = &[
    ("Accept-Language", "en-US,en;"),
    ("User-Agent", DEFAULT_USER_AGENT),
];

pub struct YoutubeProvider {
    client: Arc<dyn FetchClient>,
    base_url: String,
}

impl YoutubeProvider {
    pub const HOSTS: &'static [&'static str] = &[
        "www.youtube.com",
        "youtube.com",
        "m.youtube.com",
        "youtu.be",
    ];

    pub fn new(client: Arc<dyn FetchClient>) -> Self {
        Self {
            client,
            base_url: "https://www.youtube.com".to_string(),
        }
    }

    pub fn is_video_host(host: &str) -> bool {
        Self::HOSTS.contains(&host)
    }

    fn videos_page_url(&self, path: &str) -> String {
        let trimmed = path.trim_end_matches('/');
        let page_path = if trimmed.ends_with("/videos") {
            format!("{trimmed}?gl=EN&hl=en")
        } else {
            format!("{trimmed}/videos?gl=EN&hl=en")
        };
        build_full_url(&self.base_url, &page_path)
    }

    /// Resolve a watch-page url into a direct stream url by unwrapping the
    /// player config and, when the chosen format is ciphered, running the
    /// player script through the cipher engine.
    async fn resolve_video(&self, media: &Media) -> Result<Media> {
        let page = self.client.fetch_bytes(media.url(), FETCH_HEADERS).await?;
        let page = String::from_utf8_lossy(&page);

        let config_re = Regex::new(r";ytplayer\.config = (\{.*?\});").unwrap();
        let config_json = config_re
            .captures(&page)
            .map(|caps| caps[1].to_string())
            .context("Player config not found on watch page")?;
        let config: Value =
            serde_json::from_str(&config_json).context("Failed to parse player config")?;

        let player_response_raw = config
            .pointer("/args/player_response")
            .and_then(Value::as_str)
            .context("Player response missing from config")?;
        let player_response: Value = serde_json::from_str(player_response_raw)
            .context("Failed to parse player response")?;

        let streaming_data = player_response
            .get("streamingData")
            .context("No streaming data for video")?;
        let formats = list(streaming_data.get("formats"));
        let adaptive_formats = list(streaming_data.get("adaptiveFormats"));

        let format = formats
            .iter()
            .chain(adaptive_formats.iter())
            .find(|format| {
                format
                    .get("itag")
                    .and_then(Value::as_i64)
                    .map(|itag| VIDEO_AND_AUDIO_TAGS.contains(&itag))
                    .unwrap_or(false)
            })
            .context("No combined audio+video format available")?;

        let js_path = config.pointer("/assets/js").and_then(Value::as_str);
        let url = self.format_url(format, js_path).await?;

        let aspect_ratio = match (
            format.get("width").and_then(Value::as_f64),
            format.get("height").and_then(Value::as_f64),
        ) {
            (Some(width), Some(height)) if height > 0.0 => Some(width / height),
            _ => None,
        };

        Ok(Media::Video {
            url,
            thumbnail: None,
            aspect_ratio,
            duration: None,
        })
    }

    async fn format_url(&self, format: &Value, js_path: Option<&str>) -> Result<String> {
        let cipher_data = match format.get("cipher").and_then(Value::as_str) {
            Some(cipher_data) => cipher_data,
            None => return format_plain_url(format),
        };

        let params: HashMap<String, String> = url::form_urlencoded::parse(cipher_data.as_bytes())
            .into_owned()
            .collect();
        let url_with_sig = params.get("url").cloned().unwrap_or_default();

        // Already-signed urls need no deciphering.
        if url_with_sig.contains("signature")
            || (!params.contains_key("s")
                && (url_with_sig.contains("&sig=") || url_with_sig.contains("&lsig=")))
        {
            return format_plain_url(format);
        }

        let js_url = format!(
            "https://youtube.com{}",
            js_path.context("Player script path missing from config")?
        );
        let encoded = params.get("s").cloned().unwrap_or_default();
        let signature = self.decipher_signature(&js_url, &encoded).await?;

        Ok(format!("{url_with_sig}&sig={signature}"))
    }

    async fn decipher_signature(&self, js_url: &str, encoded: &str) -> Result<String> {
        let js = self.client.fetch_bytes(js_url, FETCH_HEADERS).await?;
        let js = String::from_utf8_lossy(&js);

        match cipher::decipher(&js, encoded) {
            Some(signature) => Ok(signature),
            None => {
                warn!("No known cipher idiom matched {}, using raw signature", js_url);
                Ok(encoded.to_string())
            }
        }
    }
}

#[async_trait]
impl Provider for YoutubeProvider {
    fn id(&self) -> &'static str {
        "youtube"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_posts(&self, path: &str, limit: usize) -> Result<Vec<Post>> {
        let url = self.videos_page_url(path);
        let page = self.client.fetch_text(&url, None).await?;
        let document = Html::parse_document(&page);

        let tile_selector = Selector::parse("div.yt-lockup-video").unwrap();
        let link_selector = Selector::parse("a.yt-uix-tile-link").unwrap();
        let meta_selector = Selector::parse(".yt-lockup-meta-info li").unwrap();

        let mut posts = Vec::new();
        for tile in document.select(&tile_selector).take(limit) {
            let link = match tile.select(&link_selector).next() {
                Some(link) => link,
                None => continue,
            };
            let href = link.value().attr("href").unwrap_or_default();
            let id = href
                .split("/watch?v=")
                .nth(1)
                .unwrap_or_default()
                .to_string();
            let title = link.value().attr("title").unwrap_or_default().to_string();

            let published_at = tile
                .select(&meta_selector)
                .nth(1)
                .map(|li| li.text().collect::<String>())
                .and_then(|ago| parse_time_ago(&ago));

            let mut post = Post::new(id);
            post.text = Some(title).filter(|title| !title.is_empty());
            post.published_at = published_at;
            if !href.is_empty() {
                post.media.push(Media::Video {
                    url: build_full_url(&self.base_url, href),
                    thumbnail: None,
                    aspect_ratio: Some(DEFAULT_VIDEO_ASPECT_RATIO),
                    duration: None,
                });
            }
            posts.push(post);
        }

        debug!("Scraped {} posts from {}", posts.len(), url);
        Ok(posts)
    }

    async fn get_page_info(&self, path: &str) -> Result<Option<PageInfo>> {
        let url = self.videos_page_url(path);
        let page = self.client.fetch_text(&url, None).await?;
        let document = Html::parse_document(&page);

        let logo_selector = Selector::parse(r#"link[rel="image_src"]"#).unwrap();
        let logo = document
            .select(&logo_selector)
            .next()
            .and_then(|link| link.value().attr("href"))
            .filter(|href| !href.is_empty())
            .map(Media::image);

        let title_selector = Selector::parse("title").unwrap();
        let name = document
            .select(&title_selector)
            .next()
            .map(|title| title.text().collect::<String>().trim().to_string())
            .filter(|name| !name.is_empty());

        if logo.is_none() && name.is_none() {
            return Ok(None);
        }

        Ok(Some(PageInfo {
            name,
            avatar: logo,
            ..PageInfo::default()
        }))
    }

    async fn resolve(&self, media: &Media) -> Result<Media> {
        match media {
            Media::Video { .. } => self.resolve_video(media).await,
            _ => Ok(media.clone()),
        }
    }
}

fn format_plain_url(format: &Value) -> Result<String> {
    format
        .get("url")
        .and_then(Value::as_str)
        .map(str::to_string)
        .context("Format url missing")
}

fn list(value: Option<&Value>) -> Vec<Value> {
    value
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Turn a "3 weeks ago" style caption into an epoch timestamp.
fn parse_time_ago(text: &str) -> Option<i64> {
    let amount = text
        .split_whitespace()
        .next()
        .and_then(|token| token.parse::<i64>().ok())?;

    let lower = text.to_lowercase();
    let unit_seconds = if lower.contains("second") {
        1
    } else if lower.contains("minute") {
        60
    } else if lower.contains("hour") {
        3600
    } else if lower.contains("day") {
        86400
    } else if lower.contains("week") {
        7 * 86400
    } else if lower.contains("month") {
        30 * 86400
    } else if lower.contains("year") {
        365 * 86400
    } else {
        return None;
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;
    Some(now - amount * unit_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockFetchClient;
    use serde_json::json;

    const VIDEOS_PAGE: &str = r#"
        <html><body>
          <div class="yt-lockup-video">
            <a class="yt-uix-tile-link" href="/watch?v=abc123" title="First video"></a>
            <ul class="yt-lockup-meta-info"><li>12,345 views</li><li>3 days ago</li></ul>
          </div>
          <div class="yt-lockup-video">
            <a class="yt-uix-tile-link" href="/watch?v=def456" title="Second video"></a>
          </div>
        </body></html>
    "#;

    fn provider_with(client: MockFetchClient) -> YoutubeProvider {
        YoutubeProvider::new(Arc::new(client))
    }

    #[tokio::test]
    async fn test_get_posts_parses_video_tiles() {
        let client = MockFetchClient::default().with_page(
            "https://www.youtube.com/user/some-channel/videos?gl=EN&hl=en",
            VIDEOS_PAGE,
        );
        let provider = provider_with(client);

        let posts = provider.get_posts("/user/some-channel", 10).await.unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].id, "abc123");
        assert_eq!(posts[0].text.as_deref(), Some("First video"));
        assert!(posts[0].published_at.is_some());
        assert_eq!(
            posts[0].media[0].url(),
            "https://www.youtube.com/watch?v=abc123"
        );
        assert_eq!(posts[1].id, "def456");
        assert!(posts[1].published_at.is_none());
    }

    #[tokio::test]
    async fn test_get_posts_respects_limit() {
        let client = MockFetchClient::default().with_page(
            "https://www.youtube.com/user/some-channel/videos?gl=EN&hl=en",
            VIDEOS_PAGE,
        );
        let provider = provider_with(client);

        let posts = provider.get_posts("/user/some-channel", 1).await.unwrap();
        assert_eq!(posts.len(), 1);
    }

    fn watch_page(formats: Value) -> String {
        let player_response = json!({ "streamingData": formats });
        let config = json!({
            "args": { "player_response": player_response.to_string() },
            "assets": { "js": "/player.js" },
        });
        format!("var x=1;ytplayer.config = {config};var y=2;")
    }

    #[tokio::test]
    async fn test_resolve_plain_format() {
        let page = watch_page(json!({
            "formats": [
                { "itag": 140, "url": "https://cdn/audio-only" },
                { "itag": 22, "url": "https://cdn/video.mp4", "width": 1280, "height": 720 },
            ]
        }));
        let client =
            MockFetchClient::default().with_page("https://www.youtube.com/watch?v=abc", &page);
        let provider = provider_with(client);

        let resolved = provider
            .resolve(&Media::video("https://www.youtube.com/watch?v=abc"))
            .await
            .unwrap();
        assert_eq!(resolved.url(), "https://cdn/video.mp4");
        match resolved {
            Media::Video { aspect_ratio, .. } => {
                assert!((aspect_ratio.unwrap() - 1280.0 / 720.0).abs() < 1e-9)
            }
            other => panic!("expected video, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_ciphered_format() {
        let page = watch_page(json!({
            "formats": [{
                "itag": 18,
                "cipher": "s=abcdef&url=https%3A%2F%2Fcdn%2Fvid%3Fkey%3D1",
            }]
        }));
        let player_js = concat!(
            r#"XY=function(a){a=a.split("");XY.aa(a,3);XY.bb(a);return a.join("")}"#,
            "\n",
            r#"var XY={aa:function(a,b){a.splice(0,b)},bb:function(a){a.reverse()}};"#,
        );
        let client = MockFetchClient::default()
            .with_page("https://www.youtube.com/watch?v=abc", &page)
            .with_page("https://youtube.com/player.js", player_js);
        let provider = provider_with(client);

        let resolved = provider
            .resolve(&Media::video("https://www.youtube.com/watch?v=abc"))
            .await
            .unwrap();
        assert_eq!(resolved.url(), "https://cdn/vid?key=1&sig=fed");
    }

    #[tokio::test]
    async fn test_resolve_passes_images_through() {
        let provider = provider_with(MockFetchClient::default());
        let image = Media::image("https://i.ytimg.com/vi/abc/default.jpg");
        let resolved = provider.resolve(&image).await.unwrap();
        assert_eq!(resolved.url(), image.url());
    }

    #[test]
    fn test_video_hosts() {
        assert!(YoutubeProvider::is_video_host("www.youtube.com"));
        assert!(YoutubeProvider::is_video_host("youtu.be"));
        assert!(!YoutubeProvider::is_video_host("vimeo.com"));
    }

    #[test]
    fn test_parse_time_ago_units() {
        assert!(parse_time_ago("3 days ago").is_some());
        assert!(parse_time_ago("1 year ago").is_some());
        assert!(parse_time_ago("soon").is_none());
    }
}
