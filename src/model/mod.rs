use serde::Serialize;

/// A single media reference discovered on a page. The `url` may be a direct
/// file link or an indirect share/embed page that still needs resolution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Media {
    Image {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thumbnail: Option<Box<Media>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        aspect_ratio: Option<f64>,
    },
    Video {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thumbnail: Option<Box<Media>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        aspect_ratio: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },
    Audio {
        url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        thumbnail: Option<Box<Media>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        aspect_ratio: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },
}

impl Media {
    pub fn image(url: impl Into<String>) -> Self {
        Media::Image {
            url: url.into(),
            thumbnail: None,
            aspect_ratio: None,
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Media::Video {
            url: url.into(),
            thumbnail: None,
            aspect_ratio: None,
            duration: None,
        }
    }

    pub fn audio(url: impl Into<String>) -> Self {
        Media::Audio {
            url: url.into(),
            thumbnail: None,
            aspect_ratio: None,
            duration: None,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Media::Image { url, .. } | Media::Video { url, .. } | Media::Audio { url, .. } => url,
        }
    }

    /// Same variant with the url replaced; every other attribute is kept.
    pub fn with_url(&self, new_url: impl Into<String>) -> Media {
        let mut media = self.clone();
        match &mut media {
            Media::Image { url, .. } | Media::Video { url, .. } | Media::Audio { url, .. } => {
                *url = new_url.into();
            }
        }
        media
    }

    /// Fallback file extension when none is recoverable from the url path.
    pub fn default_extension(&self) -> &'static str {
        match self {
            Media::Image { .. } => "png",
            Media::Video { .. } => "mp4",
            Media::Audio { .. } => "mp3",
        }
    }
}

/// One scraped post. Constructed once per scrape call, immutable afterwards.
/// `media` preserves page order.
#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Publish time as unix epoch seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub views_count: Option<u64>,
    pub media: Vec<Media>,
}

impl Post {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: None,
            published_at: None,
            rating: None,
            comments_count: None,
            views_count: None,
            media: Vec::new(),
        }
    }
}

/// Descriptive metadata about a user/community/channel page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PageInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nick: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posts_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub followers_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Media>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<Media>,
}

/// Descriptive metadata about a provider itself.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<Media>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_extensions() {
        assert_eq!(Media::image("https://a/b").default_extension(), "png");
        assert_eq!(Media::video("https://a/b").default_extension(), "mp4");
        assert_eq!(Media::audio("https://a/b").default_extension(), "mp3");
    }

    #[test]
    fn test_with_url_keeps_variant_and_attributes() {
        let video = Media::Video {
            url: "https://host/watch?v=1".to_string(),
            thumbnail: None,
            aspect_ratio: Some(1.5),
            duration: Some(30.0),
        };

        let replaced = video.with_url("https://cdn/direct.mp4");
        assert_eq!(replaced.url(), "https://cdn/direct.mp4");
        match replaced {
            Media::Video {
                aspect_ratio,
                duration,
                ..
            } => {
                assert_eq!(aspect_ratio, Some(1.5));
                assert_eq!(duration, Some(30.0));
            }
            other => panic!("variant changed: {other:?}"),
        }
    }

    #[test]
    fn test_post_serializes_without_empty_fields() {
        let post = Post::new("42");
        let json = serde_json::to_string(&post).unwrap();
        assert_eq!(json, r#"{"id":"42","media":[]}"#);
    }
}
