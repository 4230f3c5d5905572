mod pikabu;
mod twitter;
mod youtube;

pub use pikabu::PikabuProvider;
pub use twitter::TwitterProvider;
pub use youtube::YoutubeProvider;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};

use crate::client::{fetch_document, FetchClient};
use crate::model::{Media, PageInfo, Post, ProviderInfo};

pub const DEFAULT_POSTS_LIMIT: usize = 50;

/// Capability set every site-specific scraper implements. The resolver and
/// the download pipeline depend only on this contract.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable registry key for this provider.
    fn id(&self) -> &'static str;

    fn base_url(&self) -> &str;

    /// Scrape up to `limit` posts from a page path. Fails on an unreachable
    /// page; returns fewer (possibly zero) posts when the page has fewer.
    async fn get_posts(&self, path: &str, limit: usize) -> Result<Vec<Post>>;

    async fn get_page_info(&self, path: &str) -> Result<Option<PageInfo>>;

    /// Return a media with the closest-to-direct url this provider can
    /// produce in one hop. Already-direct urls pass through unchanged.
    async fn resolve(&self, media: &Media) -> Result<Media>;

    fn provider_info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.id().to_string(),
            logo: Some(Media::image(build_full_url(self.base_url(), "/favicon.ico"))),
        }
    }
}

/// Explicit key → provider construction. Unknown keys yield `None`; the
/// valid keys are listed by [`known_keys`].
pub fn from_key(key: &str, client: Arc<dyn FetchClient>) -> Option<Box<dyn Provider>> {
    match key {
        "youtube" => Some(Box::new(YoutubeProvider::new(client))),
        "twitter" => Some(Box::new(TwitterProvider::new(client))),
        "pikabu" => Some(Box::new(PikabuProvider::new(client))),
        _ => None,
    }
}

pub fn known_keys() -> &'static [&'static str] {
    &["youtube", "twitter", "pikabu"]
}

pub(crate) fn build_full_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Upgrade a media url through the OpenGraph metadata of its share page.
/// Falls back to the incoming media on any miss.
pub(crate) async fn fetch_open_graph_media(client: &dyn FetchClient, media: &Media) -> Media {
    let properties: &[&str] = match media {
        Media::Image { .. } => &["og:image", "og:image:url"],
        Media::Video { .. } => &["og:video", "og:video:url"],
        Media::Audio { .. } => &["og:audio"],
    };

    let content = match fetch_document(client, media.url(), None).await {
        Some(document) => og_content(&document, properties),
        None => None,
    };

    match content {
        Some(url) => media.with_url(url),
        None => media.clone(),
    }
}

fn og_content(document: &Html, properties: &[&str]) -> Option<String> {
    for property in properties {
        let selector = match Selector::parse(&format!(r#"meta[property="{property}"]"#)) {
            Ok(selector) => selector,
            Err(_) => continue,
        };
        if let Some(content) = document
            .select(&selector)
            .next()
            .and_then(|element| element.value().attr("content"))
            .filter(|content| !content.is_empty())
        {
            return Some(content.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockFetchClient;

    #[test]
    fn test_registry_knows_every_key() {
        let client: Arc<dyn FetchClient> = Arc::new(MockFetchClient::default());
        for key in known_keys() {
            let provider = from_key(key, client.clone()).unwrap();
            assert_eq!(provider.id(), *key);
        }
        assert!(from_key("myspace", client).is_none());
    }

    #[test]
    fn test_provider_info_defaults_to_favicon() {
        let client: Arc<dyn FetchClient> = Arc::new(MockFetchClient::default());
        let provider = from_key("pikabu", client).unwrap();
        let info = provider.provider_info();
        assert_eq!(info.name, "pikabu");
        assert_eq!(
            info.logo.unwrap().url(),
            "https://pikabu.ru/favicon.ico"
        );
    }

    #[test]
    fn test_build_full_url_normalizes_slashes() {
        assert_eq!(build_full_url("https://a.com/", "/b"), "https://a.com/b");
        assert_eq!(build_full_url("https://a.com", "b"), "https://a.com/b");
    }

    #[tokio::test]
    async fn test_open_graph_upgrade_and_fallback() {
        let client = MockFetchClient::default().with_page(
            "https://site/share/1",
            r#"<html><head><meta property="og:video" content="https://cdn/v.mp4"/></head></html>"#,
        );

        let media = Media::video("https://site/share/1");
        let upgraded = fetch_open_graph_media(&client, &media).await;
        assert_eq!(upgraded.url(), "https://cdn/v.mp4");

        let missing = Media::video("https://site/share/unknown");
        let kept = fetch_open_graph_media(&client, &missing).await;
        assert_eq!(kept.url(), "https://site/share/unknown");
    }
}
