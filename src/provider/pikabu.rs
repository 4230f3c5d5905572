use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use super::{build_full_url, Provider};
use crate::client::FetchClient;
use crate::model::{Media, PageInfo, Post};

/// Pikabu serves windows-1251 pages without always declaring it.
const PAGE_CHARSET: &str = "windows-1251";

pub struct PikabuProvider {
    client: Arc<dyn FetchClient>,
    base_url: String,
}

impl PikabuProvider {
    pub fn new(client: Arc<dyn FetchClient>) -> Self {
        Self {
            client,
            base_url: "https://pikabu.ru".to_string(),
        }
    }

    async fn get_page(&self, path: &str) -> Result<String> {
        self.client
            .fetch_text(&build_full_url(&self.base_url, path), Some(PAGE_CHARSET))
            .await
    }
}

#[async_trait]
impl Provider for PikabuProvider {
    fn id(&self) -> &'static str {
        "pikabu"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_posts(&self, path: &str, limit: usize) -> Result<Vec<Post>> {
        let page = self.get_page(path).await?;
        let document = Html::parse_document(&page);

        let story_selector = Selector::parse("article").unwrap();
        let block_selector = Selector::parse(".story-block").unwrap();

        let mut posts = Vec::new();
        for story in document.select(&story_selector).take(limit) {
            let blocks: Vec<ElementRef> = story.select(&block_selector).collect();

            let title = extract_title(story);
            let text = blocks
                .iter()
                .filter(|block| has_class(block, "story-block_type_text"))
                .map(|block| block.text().collect::<String>().trim().to_string())
                .collect::<Vec<_>>()
                .join("\n");

            let caption = if text.is_empty() {
                title.clone()
            } else {
                format!("{title}\n\n{text}")
            };

            let mut post = Post::new(extract_id(story, &self.base_url));
            post.text = Some(caption).filter(|caption| !caption.is_empty());
            post.published_at = extract_publish_date(story);
            post.rating = extract_number(story, ".story__rating-count");
            post.comments_count = extract_number(story, ".story__comments-link-count");
            post.media = extract_media(&blocks);
            posts.push(post);
        }

        debug!("Scraped {} posts from pikabu{}", posts.len(), path);
        Ok(posts)
    }

    async fn get_page_info(&self, path: &str) -> Result<Option<PageInfo>> {
        let page = self.get_page(path).await?;
        let document = Html::parse_document(&page);

        let info = if path.contains("community") {
            community_info(&document)
        } else {
            profile_info(&document)
        };
        Ok(info)
    }

    /// Story media urls already point at the CDN.
    async fn resolve(&self, media: &Media) -> Result<Media> {
        Ok(media.clone())
    }
}

fn extract_title(story: ElementRef) -> String {
    let selector = Selector::parse(".story__title-link").unwrap();
    story
        .select(&selector)
        .next()
        .map(|link| link.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

fn extract_id(story: ElementRef, base_url: &str) -> String {
    let selector = Selector::parse(".story__title-link").unwrap();
    story
        .select(&selector)
        .next()
        .and_then(|link| link.value().attr("href"))
        .map(|href| {
            href.split(&format!("{base_url}/story/"))
                .nth(1)
                .unwrap_or(href)
                .to_string()
        })
        .unwrap_or_default()
}

fn extract_publish_date(story: ElementRef) -> Option<i64> {
    let selector = Selector::parse("time").unwrap();
    story
        .select(&selector)
        .next()
        .and_then(|time| time.value().attr("datetime"))
        .and_then(|datetime| DateTime::parse_from_rfc3339(datetime).ok())
        .map(|datetime| datetime.timestamp())
}

fn extract_number(story: ElementRef, selector: &str) -> Option<u64> {
    let selector = Selector::parse(selector).ok()?;
    story
        .select(&selector)
        .next()
        .and_then(|element| element.text().collect::<String>().trim().parse::<u64>().ok())
}

fn extract_media(blocks: &[ElementRef]) -> Vec<Media> {
    let img_selector = Selector::parse("img").unwrap();
    let rect_selector = Selector::parse("rect").unwrap();
    let video_selector = Selector::parse(r#"[data-type*="video"]"#).unwrap();

    blocks
        .iter()
        .filter_map(|block| {
            if has_class(block, "story-block_type_image") {
                let img = block.select(&img_selector).next()?;
                let url = img
                    .value()
                    .attr("data-src")
                    .or_else(|| img.value().attr("src"))?;
                if url.is_empty() {
                    return None;
                }

                let aspect_ratio = block.select(&rect_selector).next().and_then(|rect| {
                    let width = rect.value().attr("width")?.parse::<f64>().ok()?;
                    let height = rect.value().attr("height")?.parse::<f64>().ok()?;
                    (height > 0.0).then_some(width / height)
                });

                Some(Media::Image {
                    url: url.to_string(),
                    thumbnail: None,
                    aspect_ratio,
                })
            } else if has_class(block, "story-block_type_video") {
                let player = block.select(&video_selector).next()?;
                let url = player.value().attr("data-source")?;
                if url.is_empty() {
                    return None;
                }

                Some(Media::Video {
                    url: url.to_string(),
                    thumbnail: None,
                    aspect_ratio: player
                        .value()
                        .attr("data-ratio")
                        .and_then(|ratio| ratio.parse::<f64>().ok()),
                    duration: None,
                })
            } else {
                None
            }
        })
        .collect()
}

fn has_class(element: &ElementRef, class: &str) -> bool {
    element
        .value()
        .attr("class")
        .map(|classes| classes.split_whitespace().any(|candidate| candidate == class))
        .unwrap_or(false)
}

fn community_info(document: &Html) -> Option<PageInfo> {
    let nick_selector = Selector::parse(".community-header__controls span").unwrap();
    let name_selector = Selector::parse(".community-header__title").unwrap();
    let avatar_selector = Selector::parse(".community-avatar img").unwrap();

    let name = select_text(document, &name_selector);
    let nick = document
        .select(&nick_selector)
        .next()
        .and_then(|span| span.value().attr("data-link-name"))
        .map(str::to_string);

    name.as_ref()?;

    Some(PageInfo {
        nick,
        name,
        posts_count: data_role_count(document, "stories_cnt"),
        followers_count: data_role_count(document, "subs_cnt"),
        avatar: select_image_attr(document, &avatar_selector, "data-src"),
        cover: page_cover(document),
        ..PageInfo::default()
    })
}

fn profile_info(document: &Html) -> Option<PageInfo> {
    let nick_selector = Selector::parse(".profile__nick span").unwrap();
    let digital_selector = Selector::parse(".profile__digital").unwrap();
    let avatar_selector = Selector::parse(".main .avatar img").unwrap();
    let bold_selector = Selector::parse("b").unwrap();

    let nick = select_text(document, &nick_selector);
    nick.as_ref()?;

    let digitals: Vec<ElementRef> = document.select(&digital_selector).collect();
    let followers_count = digitals
        .get(1)
        .and_then(|element| element.value().attr("aria-label"))
        .and_then(|label| label.trim().parse::<u64>().ok());
    let posts_count = digitals
        .get(3)
        .and_then(|element| element.select(&bold_selector).next())
        .and_then(|bold| bold.text().collect::<String>().trim().parse::<u64>().ok());

    Some(PageInfo {
        nick: nick.clone(),
        name: nick,
        posts_count,
        followers_count,
        avatar: select_image_attr(document, &avatar_selector, "data-src"),
        cover: page_cover(document),
        ..PageInfo::default()
    })
}

fn select_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

fn select_image_attr(document: &Html, selector: &Selector, attr: &str) -> Option<Media> {
    document
        .select(selector)
        .next()
        .and_then(|element| element.value().attr(attr))
        .filter(|url| !url.is_empty())
        .map(Media::image)
}

fn data_role_count(document: &Html, role: &str) -> Option<u64> {
    let selector = Selector::parse(&format!(r#"[data-role="{role}"]"#)).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr("data-value"))
        .and_then(|value| value.parse::<u64>().ok())
}

fn page_cover(document: &Html) -> Option<Media> {
    let selector = Selector::parse(".background__placeholder").unwrap();
    let style = document
        .select(&selector)
        .next()
        .and_then(|element| element.value().attr("style"))?;

    let url = style
        .split("url(")
        .nth(1)?
        .split(')')
        .next()?
        .trim_matches(|c| c == '\'' || c == '"')
        .to_string();
    Some(url).filter(|url| !url.is_empty()).map(Media::image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockFetchClient;

    const STORIES_PAGE: &str = r#"
        <html><body>
          <article>
            <a class="story__title-link" href="https://pikabu.ru/story/first_7000001">First story</a>
            <time datetime="2020-02-20T10:00:00+03:00"></time>
            <span class="story__rating-count">120</span>
            <span class="story__comments-link-count">15</span>
            <div class="story-block story-block_type_text">Some body text</div>
            <div class="story-block story-block_type_image">
              <img data-src="https://cs.pikabu.ru/images/one.jpeg"/>
              <svg><rect width="800" height="600"></rect></svg>
            </div>
          </article>
          <article>
            <a class="story__title-link" href="https://pikabu.ru/story/second_7000002">Second story</a>
            <div class="story-block story-block_type_video">
              <div data-type="video-file" data-source="https://cs.pikabu.ru/video/clip" data-ratio="1.7778"></div>
            </div>
          </article>
        </body></html>
    "#;

    fn provider_with(client: MockFetchClient) -> PikabuProvider {
        PikabuProvider::new(Arc::new(client))
    }

    #[tokio::test]
    async fn test_get_posts_extracts_stories() {
        let client =
            MockFetchClient::default().with_page("https://pikabu.ru/community/funny", STORIES_PAGE);
        let provider = provider_with(client);

        let posts = provider.get_posts("/community/funny", 10).await.unwrap();
        assert_eq!(posts.len(), 2);

        assert_eq!(posts[0].id, "first_7000001");
        assert_eq!(
            posts[0].text.as_deref(),
            Some("First story\n\nSome body text")
        );
        assert_eq!(posts[0].rating, Some(120));
        assert_eq!(posts[0].comments_count, Some(15));
        assert!(posts[0].published_at.is_some());
        assert_eq!(posts[0].media.len(), 1);
        assert_eq!(posts[0].media[0].url(), "https://cs.pikabu.ru/images/one.jpeg");
        match &posts[0].media[0] {
            Media::Image { aspect_ratio, .. } => {
                assert!((aspect_ratio.unwrap() - 800.0 / 600.0).abs() < 1e-9)
            }
            other => panic!("expected image, got {other:?}"),
        }

        assert_eq!(posts[1].text.as_deref(), Some("Second story"));
        assert_eq!(posts[1].media[0].url(), "https://cs.pikabu.ru/video/clip");
    }

    #[tokio::test]
    async fn test_get_page_info_community() {
        let page = r#"
            <html><body>
              <div class="community-header__title">Funny community</div>
              <div class="community-header__controls"><span data-link-name="funny"></span></div>
              <div data-role="stories_cnt" data-value="5000"></div>
              <div data-role="subs_cnt" data-value="88000"></div>
              <div class="community-avatar"><img data-src="https://cs.pikabu.ru/avatars/funny.png"/></div>
              <div class="background__placeholder" style="background-image: url('https://cs.pikabu.ru/covers/funny.jpg');"></div>
            </body></html>
        "#;
        let client = MockFetchClient::default().with_page("https://pikabu.ru/community/funny", page);
        let provider = provider_with(client);

        let info = provider
            .get_page_info("/community/funny")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.nick.as_deref(), Some("funny"));
        assert_eq!(info.name.as_deref(), Some("Funny community"));
        assert_eq!(info.posts_count, Some(5000));
        assert_eq!(info.followers_count, Some(88000));
        assert_eq!(info.avatar.unwrap().url(), "https://cs.pikabu.ru/avatars/funny.png");
        assert_eq!(info.cover.unwrap().url(), "https://cs.pikabu.ru/covers/funny.jpg");
    }

    #[tokio::test]
    async fn test_resolve_is_passthrough() {
        let provider = provider_with(MockFetchClient::default());
        let media = Media::image("https://cs.pikabu.ru/images/one.jpeg");
        assert_eq!(provider.resolve(&media).await.unwrap().url(), media.url());
    }
}
