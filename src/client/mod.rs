use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use scraper::Html;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Network fetch capability. Providers, the resolver and the download
/// pipeline depend on this trait, never on a concrete HTTP client.
#[async_trait]
pub trait FetchClient: Send + Sync {
    /// Fetch raw bytes from a url with extra request headers.
    async fn fetch_bytes(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>>;

    /// Fetch a page as text. `charset` is the fallback encoding label used
    /// when the response does not declare one.
    async fn fetch_text(&self, url: &str, charset: Option<&str>) -> Result<String>;

    /// Fetch and parse a JSON endpoint.
    async fn fetch_json(
        &self,
        url: &str,
        method: reqwest::Method,
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<Value>;

    /// Stream a url's bytes into `dest`, creating parent directories on
    /// demand. Returns the number of bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Fetch a url and parse it as an HTML document. Fetch failures surface as
/// an absent result, logged once.
pub async fn fetch_document(
    client: &dyn FetchClient,
    url: &str,
    charset: Option<&str>,
) -> Option<Html> {
    match client.fetch_text(url, charset).await {
        Ok(text) => Some(Html::parse_document(&text)),
        Err(e) => {
            warn!("Failed to fetch document {}: {}", url, e);
            None
        }
    }
}

/// `FetchClient` backed by a shared reqwest client.
pub struct HttpFetchClient {
    client: reqwest::Client,
}

impl HttpFetchClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FetchClient for HttpFetchClient {
    async fn fetch_bytes(&self, url: &str, headers: &[(&str, &str)]) -> Result<Vec<u8>> {
        debug!("Fetching bytes from: {}", url);

        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("Request to {url} failed"))?;

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {url}"))?;

        Ok(bytes.to_vec())
    }

    async fn fetch_text(&self, url: &str, charset: Option<&str>) -> Result<String> {
        debug!("Fetching page: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("Request to {url} failed"))?;

        response
            .text_with_charset(charset.unwrap_or("utf-8"))
            .await
            .with_context(|| format!("Failed to decode body of {url}"))
    }

    async fn fetch_json(
        &self,
        url: &str,
        method: reqwest::Method,
        headers: &[(&str, &str)],
        body: Option<Vec<u8>>,
    ) -> Result<Value> {
        debug!("Fetching JSON from: {}", url);

        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("Request to {url} failed"))?;

        response
            .json::<Value>()
            .await
            .with_context(|| format!("Failed to parse JSON from {url}"))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        debug!("Downloading {} to {}", url, dest.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("Request to {url} failed"))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("Failed to read chunk of {url}"))?;
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", dest.display()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .with_context(|| format!("Failed to flush {}", dest.display()))?;

        debug!("Downloaded {} bytes to {}", written, dest.display());
        Ok(written)
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::HashMap;

    /// Canned-response client for tests. Urls containing `fail_marker`
    /// error on every operation; unknown urls error too.
    #[derive(Default)]
    pub struct MockFetchClient {
        pub pages: HashMap<String, String>,
        pub json: HashMap<String, Value>,
        pub fail_marker: Option<String>,
    }

    impl MockFetchClient {
        pub fn with_page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.to_string());
            self
        }

        pub fn with_json(mut self, url: &str, value: Value) -> Self {
            self.json.insert(url.to_string(), value);
            self
        }

        pub fn failing_on(mut self, marker: &str) -> Self {
            self.fail_marker = Some(marker.to_string());
            self
        }

        fn check(&self, url: &str) -> Result<()> {
            if let Some(marker) = &self.fail_marker {
                if url.contains(marker.as_str()) {
                    anyhow::bail!("mock failure for {url}");
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl FetchClient for MockFetchClient {
        async fn fetch_bytes(&self, url: &str, _headers: &[(&str, &str)]) -> Result<Vec<u8>> {
            self.check(url)?;
            self.pages
                .get(url)
                .map(|page| page.as_bytes().to_vec())
                .ok_or_else(|| anyhow::anyhow!("no mock page for {url}"))
        }

        async fn fetch_text(&self, url: &str, _charset: Option<&str>) -> Result<String> {
            self.check(url)?;
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no mock page for {url}"))
        }

        async fn fetch_json(
            &self,
            url: &str,
            _method: reqwest::Method,
            _headers: &[(&str, &str)],
            _body: Option<Vec<u8>>,
        ) -> Result<Value> {
            self.check(url)?;
            self.json
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no mock JSON for {url}"))
        }

        async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
            self.check(url)?;
            let body = self.pages.get(url).cloned().unwrap_or_else(|| "data".to_string());
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(dest, body.as_bytes()).await?;
            Ok(body.len() as u64)
        }
    }
}
