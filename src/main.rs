use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

mod cipher;
mod client;
mod config;
mod model;
mod pipeline;
mod provider;
mod resolver;

use client::{FetchClient, HttpFetchClient};
use config::Config;
use pipeline::DownloadPipeline;
use provider::Provider;
use resolver::MediaResolver;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Provider to scrape (youtube, twitter, pikabu)
    provider: String,

    /// Path to a user/community/channel page
    path: String,

    /// Posts limit
    #[arg(short = 'n', long = "limit")]
    limit: Option<usize>,

    /// Download media instead of writing post metadata
    #[arg(short = 'm', long = "media-only")]
    media_only: bool,

    /// Print page info instead of posts
    #[arg(long = "page-info")]
    page_info: bool,

    /// Output root directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Amount of parallel downloads when --media-only is set
    #[arg(long)]
    parallel_downloads: Option<usize>,

    /// Path to the config file
    #[arg(short, long)]
    config: Option<String>,
}

fn get_config_path(args: &Args) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("CONFIG_FILE") {
        return Some(path);
    }

    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        let config_path = format!("{}/feedgrab/config.toml", xdg_config_home);
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_path = format!("{}/.config/feedgrab/config.toml", home.display());
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    None
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match get_config_path(&args) {
        Some(config_path) => Config::from_file(&config_path)
            .with_context(|| format!("Failed to load config from {}", config_path))?,
        None => Config::default(),
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if config.get_logging_format() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    info!("Starting feedgrab...");

    let client: Arc<dyn FetchClient> = Arc::new(HttpFetchClient::new()?);
    let provider = provider::from_key(&args.provider, client.clone()).with_context(|| {
        format!(
            "Unknown provider '{}', expected one of: {}",
            args.provider,
            provider::known_keys().join(", ")
        )
    })?;

    let path = format!("/{}", args.path.trim_start_matches('/'));
    let limit = args.limit.unwrap_or(config.posts_limit);

    if args.page_info {
        let info = provider
            .get_page_info(&path)
            .await?
            .with_context(|| format!("No page info found at {}{}", provider.id(), path))?;
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialize page info")?
        );
        return Ok(());
    }

    info!("Scraping up to {} posts from {}{}", limit, provider.id(), path);
    let posts = provider.get_posts(&path, limit).await?;
    info!("Scraped {} posts", posts.len());

    if args.media_only {
        let output_root = args.output.unwrap_or_else(|| config.output_dir.clone());
        let target_dir = output_root
            .join(provider.id())
            .join(path.trim_start_matches('/'));

        let resolver = MediaResolver::new(client.clone(), config.lookup_depth);
        let parallelism = args.parallel_downloads.unwrap_or(config.parallel_downloads);
        let pipeline = DownloadPipeline::new(client, resolver, parallelism);

        let provider: Arc<dyn Provider> = Arc::from(provider);
        let outcomes = pipeline.run(provider, &posts, &target_dir).await?;

        let saved = outcomes.iter().filter(|outcome| outcome.is_saved()).count();
        info!(
            "Downloaded {}/{} media items into {}",
            saved,
            outcomes.len(),
            target_dir.display()
        );
    } else {
        let content =
            serde_json::to_string_pretty(&posts).context("Failed to serialize posts")?;

        match &args.output {
            Some(output_root) => {
                let timestamp = chrono::Local::now().format("%d%m%Y_%H%M%S");
                let target = output_root.join(provider.id()).join(format!(
                    "{}_{}.json",
                    path.trim_start_matches('/'),
                    timestamp
                ));
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                tokio::fs::write(&target, content)
                    .await
                    .with_context(|| format!("Failed to write {}", target.display()))?;
                println!("{}", target.display());
            }
            None => println!("{content}"),
        }
    }

    Ok(())
}
