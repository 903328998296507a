//! Command-line and environment configuration
//!
//! This module parses the CLI arguments (each with an environment fallback)
//! and turns them into a [`GatewayConfig`]. Retry behaviour is not
//! configurable here; it is the fixed [`RetryPolicy::default`].

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use directories::ProjectDirs;
use thiserror::Error;

use crate::data::generation::{DEFAULT_GENERATION_URL, DEFAULT_MODEL};
use crate::data::news::DEFAULT_NEWS_URL;
use crate::upstream::{ApiKey, RetryPolicy};

/// Directory name of the primary cache tier
const PRIMARY_TIER_DIR: &str = "api-cache";

/// Directory name of the mirrored cache tier
const MIRROR_TIER_DIR: &str = "public-cache";

/// Error types for configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No --cache-dir given and no platform cache directory exists
    #[error("Cannot determine a cache directory; pass --cache-dir or set FEEDGATE_CACHE_DIR")]
    NoCacheDir,

    /// A zero timeout would fail every upstream call
    #[error("Invalid request timeout: must be at least 1 second")]
    InvalidTimeout,
}

/// feedgate - resilient gateway for generative-text and news upstreams
#[derive(Parser, Debug)]
#[command(name = "feedgate")]
#[command(about = "Resilient gateway for generative-text and news APIs with cache fallback")]
#[command(version)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "FEEDGATE_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Root directory for the cache tiers (defaults to the platform cache directory)
    #[arg(long, env = "FEEDGATE_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Base URL of the generative-text API
    #[arg(long, env = "FEEDGATE_GENERATION_URL", default_value = DEFAULT_GENERATION_URL)]
    pub generation_url: String,

    /// Model used for generation
    #[arg(long, env = "FEEDGATE_GENERATION_MODEL", default_value = DEFAULT_MODEL)]
    pub generation_model: String,

    /// Base URL of the news API
    #[arg(long, env = "FEEDGATE_NEWS_URL", default_value = DEFAULT_NEWS_URL)]
    pub news_url: String,

    /// API key for the generative-text API
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub generation_api_key: Option<String>,

    /// API key for the news API
    #[arg(long, env = "NEWS_API_KEY", hide_env_values = true)]
    pub news_api_key: Option<String>,

    /// Timeout for a single upstream HTTP attempt, in seconds
    #[arg(long, env = "FEEDGATE_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

/// Runtime configuration derived from CLI arguments
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    /// Directory of the primary cache tier
    pub primary_cache_dir: PathBuf,
    /// Directory of the mirrored cache tier
    pub mirror_cache_dir: PathBuf,
    pub generation_url: String,
    pub generation_model: String,
    pub news_url: String,
    pub generation_api_key: Option<ApiKey>,
    pub news_api_key: Option<ApiKey>,
    /// Per-attempt upstream timeout
    pub request_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl GatewayConfig {
    /// Creates a GatewayConfig from parsed CLI arguments.
    ///
    /// # Returns
    /// * `Ok(GatewayConfig)` with cache tiers resolved under the cache root
    /// * `Err(ConfigError)` if no cache root can be determined or the timeout is zero
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let cache_root = match &cli.cache_dir {
            Some(dir) => dir.clone(),
            None => default_cache_root().ok_or(ConfigError::NoCacheDir)?,
        };
        if cli.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        Ok(Self {
            bind: cli.bind,
            primary_cache_dir: cache_root.join(PRIMARY_TIER_DIR),
            mirror_cache_dir: cache_root.join(MIRROR_TIER_DIR),
            generation_url: cli.generation_url.clone(),
            generation_model: cli.generation_model.clone(),
            news_url: cli.news_url.clone(),
            generation_api_key: non_empty_key(cli.generation_api_key.as_deref()),
            news_api_key: non_empty_key(cli.news_api_key.as_deref()),
            request_timeout: Duration::from_secs(cli.request_timeout_secs),
            retry_policy: RetryPolicy::default(),
        })
    }
}

/// XDG-compliant cache root (`~/.cache/feedgate/` on Linux)
fn default_cache_root() -> Option<PathBuf> {
    let project_dirs = ProjectDirs::from("", "", "feedgate")?;
    Some(project_dirs.cache_dir().to_path_buf())
}

fn non_empty_key(raw: Option<&str>) -> Option<ApiKey> {
    raw.map(str::trim)
        .filter(|key| !key.is_empty())
        .map(ApiKey::new)
}
