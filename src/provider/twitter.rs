use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

use super::{build_full_url, fetch_open_graph_media, Provider};
use crate::client::FetchClient;
use crate::model::{Media, PageInfo, Post};

pub struct TwitterProvider {
    client: Arc<dyn FetchClient>,
    base_url: String,
    api_base_url: String,
}

impl TwitterProvider {
    pub fn new(client: Arc<dyn FetchClient>) -> Self {
        Self {
            client,
            base_url: "https://twitter.com".to_string(),
            api_base_url: "https://api.twitter.com".to_string(),
        }
    }

    /// Videos hide behind the tweet page: either an expanded external link
    /// in the tweet text, or the playback url served by the guest-token
    /// video API. Every missing link degrades to the previous url.
    async fn resolve_video(&self, media: &Media) -> Result<Media> {
        let og_video = fetch_open_graph_media(&*self.client, media).await;

        let page = self.client.fetch_text(og_video.url(), None).await.ok();
        let (expanded_url, script_src) = match &page {
            Some(page) => {
                let document = Html::parse_document(page);

                let link_selector = Selector::parse(".js-tweet-text a").unwrap();
                let expanded_url = document
                    .select(&link_selector)
                    .next()
                    .and_then(|link| link.value().attr("data-expanded-url"))
                    .filter(|href| !href.is_empty())
                    .map(str::to_string);

                let script_selector = Selector::parse("script[src]").unwrap();
                let script_src = document
                    .select(&script_selector)
                    .last()
                    .and_then(|script| script.value().attr("src"))
                    .map(str::to_string);

                (expanded_url, script_src)
            }
            None => (None, None),
        };

        if let Some(expanded_url) = expanded_url {
            return Ok(og_video.with_url(expanded_url));
        }

        let script_src = match script_src {
            Some(script_src) => script_src,
            None => return Ok(og_video),
        };

        let token = match self.bearer_token(&script_src).await {
            Some(token) => token,
            None => return Ok(og_video),
        };

        let guest_token = self
            .client
            .fetch_json(
                &build_full_url(&self.api_base_url, "/1.1/guest/activate.json"),
                reqwest::Method::POST,
                &[("Authorization", token.as_str())],
                None,
            )
            .await
            .ok()
            .and_then(|node| {
                node.get("guest_token")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        let guest_token = match guest_token {
            Some(guest_token) => guest_token,
            None => return Ok(og_video),
        };

        let tweet_id = media
            .url()
            .split("/status/")
            .nth(1)
            .unwrap_or_default()
            .split('?')
            .next()
            .unwrap_or_default()
            .to_string();

        let playlist = self
            .client
            .fetch_json(
                &build_full_url(
                    &self.api_base_url,
                    &format!("/1.1/videos/tweet/config/{tweet_id}.json"),
                ),
                reqwest::Method::GET,
                &[
                    ("x-guest-token", guest_token.as_str()),
                    ("Authorization", token.as_str()),
                ],
                None,
            )
            .await
            .ok();

        let playback_url = playlist
            .as_ref()
            .and_then(|node| node.pointer("/track/playbackUrl"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let duration = playlist
            .as_ref()
            .and_then(|node| node.pointer("/track/durationMs"))
            .and_then(Value::as_f64)
            .map(|ms| ms / 1000.0);

        let mut resolved = match playback_url {
            Some(playback_url) => og_video.with_url(playback_url),
            None => og_video,
        };
        if let Media::Video {
            duration: slot, ..
        } = &mut resolved
        {
            if duration.is_some() {
                *slot = duration;
            }
        }
        Ok(resolved)
    }

    async fn bearer_token(&self, script_src: &str) -> Option<String> {
        let js = self.client.fetch_bytes(script_src, &[]).await.ok()?;
        let js = String::from_utf8_lossy(&js);
        Regex::new(r"Bearer ([a-zA-Z0-9%-])+")
            .unwrap()
            .find(&js)
            .map(|token| token.as_str().to_string())
    }
}

#[async_trait]
impl Provider for TwitterProvider {
    fn id(&self) -> &'static str {
        "twitter"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_posts(&self, path: &str, limit: usize) -> Result<Vec<Post>> {
        let url = build_full_url(&self.base_url, path);
        let page = self.client.fetch_text(&url, None).await?;
        let document = Html::parse_document(&page);

        let item_selector = Selector::parse("#stream-items-id .stream-item").unwrap();
        let tweet_selector = Selector::parse(".tweet").unwrap();

        let mut posts = Vec::new();
        for item in document.select(&item_selector).take(limit) {
            let tweet = match item.select(&tweet_selector).next() {
                Some(tweet) => tweet,
                None => continue,
            };

            let id = extract_tweet_id(tweet);
            let mut post = Post::new(id.clone());
            post.text = extract_tweet_text(tweet);
            post.published_at = extract_publish_date(tweet);
            post.rating = extract_stat(tweet, ".ProfileTweet-action--favorite");
            post.comments_count = extract_stat(tweet, ".ProfileTweet-action--reply");
            post.media = extract_media(tweet, &self.base_url, &id);
            posts.push(post);
        }

        debug!("Scraped {} posts from {}", posts.len(), url);
        Ok(posts)
    }

    async fn get_page_info(&self, path: &str) -> Result<Option<PageInfo>> {
        let url = build_full_url(&self.base_url, path);
        let page = self.client.fetch_text(&url, None).await?;
        let document = Html::parse_document(&page);

        let data_selector = Selector::parse("#init-data").unwrap();
        let user = document
            .select(&data_selector)
            .next()
            .and_then(|input| input.value().attr("value"))
            .and_then(|value| serde_json::from_str::<Value>(value).ok())
            .and_then(|data| data.get("profile_user").cloned());

        let user = match user {
            Some(user) => user,
            None => return Ok(None),
        };

        Ok(Some(PageInfo {
            nick: json_string(&user, &["screen_name"]),
            name: json_string(&user, &["name"]),
            description: json_string(&user, &["description"]),
            posts_count: user.get("statuses_count").and_then(Value::as_u64),
            followers_count: user.get("followers_count").and_then(Value::as_u64),
            avatar: json_string(&user, &["profile_image_url_https", "profile_image_url"])
                .map(Media::image),
            cover: json_string(
                &user,
                &[
                    "profile_background_image_url_https",
                    "profile_background_image_url",
                ],
            )
            .map(Media::image),
        }))
    }

    async fn resolve(&self, media: &Media) -> Result<Media> {
        match media {
            Media::Image { .. } => Ok(fetch_open_graph_media(&*self.client, media).await),
            Media::Video { .. } => self.resolve_video(media).await,
            _ => Ok(media.clone()),
        }
    }
}

fn extract_tweet_id(tweet: ElementRef) -> String {
    let selector = Selector::parse(".js-stream-tweet").unwrap();
    tweet
        .select(&selector)
        .next()
        .or(Some(tweet))
        .and_then(|element| element.value().attr("data-tweet-id"))
        .unwrap_or_default()
        .to_string()
}

/// Tweet text with external links stripped, the way the site renders it.
fn extract_tweet_text(tweet: ElementRef) -> Option<String> {
    let selector = Selector::parse(".tweet-text").unwrap();
    let text_element = tweet.select(&selector).next()?;

    let mut out = String::new();
    collect_text(text_element, &mut out);
    let out = out.trim().to_string();
    Some(out).filter(|text| !text.is_empty())
}

fn collect_text(element: ElementRef, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            let external_link = child.value().name() == "a"
                && !child.value().attr("href").unwrap_or("/").starts_with('/');
            if !external_link {
                collect_text(child, out);
            }
        }
    }
}

fn extract_publish_date(tweet: ElementRef) -> Option<i64> {
    let selector = Selector::parse(".js-short-timestamp").unwrap();
    tweet
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr("data-time-ms"))
        .and_then(|ms| ms.parse::<i64>().ok())
        .map(|ms| ms / 1000)
}

fn extract_stat(tweet: ElementRef, action_class: &str) -> Option<u64> {
    let selector = Selector::parse(&format!("{action_class} .ProfileTweet-actionCount")).ok()?;
    tweet
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr("data-tweet-stat-count"))
        .and_then(|count| count.parse::<u64>().ok())
}

fn extract_media(tweet: ElementRef, base_url: &str, tweet_id: &str) -> Vec<Media> {
    let photo_selector = Selector::parse(".AdaptiveMedia-photoContainer").unwrap();
    let photos: Vec<Media> = tweet
        .select(&photo_selector)
        .filter_map(|photo| {
            let url = photo.value().attr("data-image-url")?;
            if url.is_empty() {
                return None;
            }
            Some(Media::Image {
                url: url.to_string(),
                thumbnail: None,
                aspect_ratio: single_photo_aspect(tweet),
            })
        })
        .collect();
    if !photos.is_empty() {
        return photos;
    }

    let video_selector = Selector::parse(".AdaptiveMedia-videoContainer").unwrap();
    if let Some(container) = tweet.select(&video_selector).next() {
        let player_selector = Selector::parse(".PlayableMedia-player").unwrap();
        let aspect_ratio = container
            .select(&player_selector)
            .next()
            .and_then(|player| style_property(player, "padding-bottom"))
            .and_then(|padding| padding.trim_end_matches('%').parse::<f64>().ok())
            .filter(|percent| *percent > 0.0)
            .map(|percent| 100.0 / percent);

        return vec![Media::Video {
            url: format!("{base_url}/i/status/{tweet_id}"),
            thumbnail: None,
            aspect_ratio,
            duration: None,
        }];
    }

    Vec::new()
}

fn single_photo_aspect(tweet: ElementRef) -> Option<f64> {
    let selector = Selector::parse(".AdaptiveMedia-singlePhoto").unwrap();
    tweet
        .select(&selector)
        .next()
        .and_then(|element| style_property(element, "padding-top"))
        .and_then(|padding| {
            padding
                .split("calc(")
                .nth(1)?
                .split("* 100%")
                .next()
                .map(str::trim)
                .and_then(|ratio| ratio.parse::<f64>().ok())
        })
        .filter(|ratio| *ratio > 0.0)
        .map(|ratio| 1.0 / ratio)
}

fn style_property(element: ElementRef, property: &str) -> Option<String> {
    element
        .value()
        .attr("style")?
        .split(';')
        .filter_map(|declaration| {
            let (name, value) = declaration.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .find(|(name, _)| name == property)
        .map(|(_, value)| value)
}

fn json_string(node: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| node.get(key).and_then(Value::as_str))
        .find(|value| !value.is_empty())
        .map(str::to_string)
}
