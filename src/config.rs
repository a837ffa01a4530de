use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Canonical store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

/// Pipeline defaults applied when a caller does not override them
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_profile")]
    pub default_profile: String,
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    #[serde(default = "default_stride_chars")]
    pub stride_chars: usize,
}

/// Folder watcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_inbox")]
    pub inbox: PathBuf,
    #[serde(default = "default_success_dir")]
    pub success_dir: PathBuf,
    #[serde(default = "default_fail_dir")]
    pub fail_dir: PathBuf,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
    #[serde(default = "default_max_file_mb")]
    pub max_file_mb: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_stability_ms")]
    pub stability_ms: u64,
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default)]
    pub recursive: bool,
    /// Segmentation profile applied to watched files; None means the ingest default.
    #[serde(default)]
    pub profile: Option<String>,
}

/// Event emission configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EventsConfig {
    /// One of "stdout", "webhook", "none"
    #[serde(default = "default_event_sink")]
    pub sink: String,
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Value for the Authorization header, e.g. "Bearer <token>"
    #[serde(default)]
    pub webhook_auth: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./folio.db")
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_window_chars() -> usize {
    512
}

fn default_stride_chars() -> usize {
    384
}

fn default_inbox() -> PathBuf {
    PathBuf::from("./inbox")
}

fn default_success_dir() -> PathBuf {
    PathBuf::from("./success")
}

fn default_fail_dir() -> PathBuf {
    PathBuf::from("./fail")
}

fn default_allowed_extensions() -> Vec<String> {
    vec!["txt".to_string(), "md".to_string()]
}

fn default_max_file_mb() -> u64 {
    32
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    16
}

fn default_stability_ms() -> u64 {
    2000
}

fn default_poll_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_event_sink() -> String {
    "stdout".to_string()
}

fn default_http_port() -> u16 {
    7878
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_profile: default_profile(),
            window_chars: default_window_chars(),
            stride_chars: default_stride_chars(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            inbox: default_inbox(),
            success_dir: default_success_dir(),
            fail_dir: default_fail_dir(),
            allowed_extensions: default_allowed_extensions(),
            max_file_mb: default_max_file_mb(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            stability_ms: default_stability_ms(),
            poll_ms: default_poll_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            recursive: false,
            profile: None,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            sink: default_event_sink(),
            webhook_url: None,
            webhook_auth: None,
        }
    }
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            ingest: IngestConfig::default(),
            watcher: WatcherConfig::default(),
            events: EventsConfig::default(),
            http_server: HttpServerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Loads environment variables from .env file (if present) first.
    /// Looks for the config file in this order:
    /// 1. Path specified in FOLIO_CONFIG environment variable (must exist)
    /// 2. ./folio.toml in current directory
    /// 3. Built-in defaults if neither is present
    pub fn load() -> Result<Self> {
        // Load .env file if it exists (ignore errors - file is optional)
        let _ = dotenv::dotenv();

        let config = if let Ok(explicit) = std::env::var("FOLIO_CONFIG") {
            let path = PathBuf::from(explicit);
            let config_str = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&config_str).context("Failed to parse config file")?
        } else {
            let path = Path::new("folio.toml");
            if path.exists() {
                let config_str = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                toml::from_str(&config_str).context("Failed to parse folio.toml")?
            } else {
                log::info!("No folio.toml found, using built-in defaults");
                Config::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.ingest.window_chars == 0 {
            anyhow::bail!("ingest.window_chars must be greater than 0");
        }
        if self.ingest.stride_chars == 0 {
            anyhow::bail!("ingest.stride_chars must be greater than 0");
        }
        if self.ingest.stride_chars > self.ingest.window_chars {
            anyhow::bail!("ingest.stride_chars must not exceed ingest.window_chars");
        }
        if self.watcher.workers == 0 {
            anyhow::bail!("watcher.workers must be greater than 0");
        }
        if self.watcher.queue_capacity == 0 {
            anyhow::bail!("watcher.queue_capacity must be greater than 0");
        }
        if self.watcher.max_attempts == 0 {
            anyhow::bail!("watcher.max_attempts must be at least 1");
        }
        if self.watcher.allowed_extensions.is_empty() {
            anyhow::bail!("watcher.allowed_extensions must not be empty");
        }
        match self.events.sink.as_str() {
            "stdout" | "none" => {}
            "webhook" => {
                if self.events.webhook_url.is_none() {
                    anyhow::bail!("events.webhook_url is required for the webhook sink");
                }
            }
            other => anyhow::bail!("events.sink must be stdout, webhook, or none (got {other})"),
        }
        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.store.db_path
    }
}
