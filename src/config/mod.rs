use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::pipeline::DEFAULT_PARALLEL_DOWNLOADS;
use crate::provider::DEFAULT_POSTS_LIMIT;
use crate::resolver::DEFAULT_LOOKUP_DEPTH;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Root directory media and metadata are written under.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Worker-pool size for media downloads.
    #[serde(default = "default_parallel_downloads")]
    pub parallel_downloads: usize,
    /// Recursive resolve hops attempted before accepting an indirect url.
    #[serde(default = "default_lookup_depth")]
    pub lookup_depth: u32,
    #[serde(default = "default_posts_limit")]
    pub posts_limit: usize,
    /// "json" or "plain".
    #[serde(default = "default_logging_format")]
    pub logging_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            parallel_downloads: default_parallel_downloads(),
            lookup_depth: default_lookup_depth(),
            posts_limit: default_posts_limit(),
            logging_format: default_logging_format(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path}"))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file {path}"))
    }

    pub fn get_logging_format(&self) -> &str {
        &self.logging_format
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_parallel_downloads() -> usize {
    DEFAULT_PARALLEL_DOWNLOADS
}

fn default_lookup_depth() -> u32 {
    DEFAULT_LOOKUP_DEPTH
}

fn default_posts_limit() -> usize {
    DEFAULT_POSTS_LIMIT
}

fn default_logging_format() -> String {
    "json".to_string()
}
