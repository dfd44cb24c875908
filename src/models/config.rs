//! Application configuration structures.
//!
//! Values come from a TOML file, are then overridden by environment
//! variables (a `.env` file is honored), and are immutable afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Comment source (Graph API) settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Polling loop settings
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Batch trigger settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Retry policy applied to every remote endpoint
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Local output settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Sinks to commit batches to, in commit order
    #[serde(default = "defaults::sinks")]
    pub sinks: Vec<SinkKind>,

    /// Spreadsheet sink settings
    #[serde(default)]
    pub spreadsheet: SpreadsheetConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(error) = dotenv_problem(dotenvy::dotenv()) {
            log::warn!("Ignoring .env file: {}", error);
        }
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PAGE_ID") {
            self.source.page_id = v;
        }
        if let Some(v) = get("TARGET_POST_ID") {
            self.source.post_id = v;
        }
        if let Some(v) = get("GRAPH_API_TOKEN").or_else(|| get("LONG_LIVE_TOKEN")) {
            self.source.access_token = v;
        }
        if let Some(v) = get("API_VERSION") {
            self.source.api_version = v;
        }
        if let Some(v) = get("INTERVAL") {
            self.monitor.interval_secs = parse_var("INTERVAL", &v)?;
        }
        if let Some(v) = get("BATCH_SIZE") {
            self.batch.max_size = parse_var("BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("UPLOAD_INTERVAL") {
            self.batch.max_age_secs = parse_var("UPLOAD_INTERVAL", &v)?;
        }
        if let Some(v) = get("LOG_DIR") {
            self.output.dir = PathBuf::from(v);
        }
        if let Some(v) = get("SINKS") {
            self.sinks = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(SinkKind::from_str)
                .collect::<Result<_>>()?;
        }
        if let Some(v) = get("SPREADSHEET_ID") {
            self.spreadsheet.spreadsheet_id = Some(v);
        }
        if let Some(v) = get("WORKSHEET_NAME") {
            self.spreadsheet.worksheet = v;
        }
        if let Some(v) = get("GOOGLE_SHEETS_TOKEN") {
            self.spreadsheet.access_token = Some(v);
        }
        Ok(())
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.source.page_id.trim().is_empty() {
            return Err(AppError::validation("source.page_id is empty (PAGE_ID)"));
        }
        if self.source.post_id.trim().is_empty() {
            return Err(AppError::validation(
                "source.post_id is empty (TARGET_POST_ID)",
            ));
        }
        if self.source.access_token.trim().is_empty() {
            return Err(AppError::validation(
                "source.access_token is empty (GRAPH_API_TOKEN)",
            ));
        }
        if self.source.page_size == 0 {
            return Err(AppError::validation("source.page_size must be > 0"));
        }
        if self.source.timeout_secs == 0 {
            return Err(AppError::validation("source.timeout_secs must be > 0"));
        }
        self.validate_schedule()?;
        if self.sinks.is_empty() {
            return Err(AppError::validation("No sinks configured"));
        }
        for (i, sink) in self.sinks.iter().enumerate() {
            if self.sinks[..i].contains(sink) {
                return Err(AppError::validation(format!(
                    "Sink '{}' is listed more than once",
                    sink.as_str()
                )));
            }
        }
        if self.sinks.contains(&SinkKind::Spreadsheet) {
            if self.spreadsheet.spreadsheet_id.is_none() {
                return Err(AppError::validation(
                    "spreadsheet sink requires spreadsheet.spreadsheet_id (SPREADSHEET_ID)",
                ));
            }
            if self.spreadsheet.access_token.is_none() {
                return Err(AppError::validation(
                    "spreadsheet sink requires spreadsheet.access_token (GOOGLE_SHEETS_TOKEN)",
                ));
            }
        }
        Ok(())
    }

    /// The timing and sizing checks the polling loop cannot run without.
    pub fn validate_schedule(&self) -> Result<()> {
        if self.monitor.interval_secs == 0 {
            return Err(AppError::validation("monitor.interval_secs must be > 0"));
        }
        if self.monitor.max_pages == 0 {
            return Err(AppError::validation("monitor.max_pages must be > 0"));
        }
        if self.batch.max_size == 0 {
            return Err(AppError::validation("batch.max_size must be > 0"));
        }
        if self.backoff.base_ms == 0 {
            return Err(AppError::validation("backoff.base_ms must be > 0"));
        }
        Ok(())
    }

    /// Graph object id of the monitored post.
    pub fn post_key(&self) -> String {
        format!("{}_{}", self.source.page_id, self.source.post_id)
    }

    /// Location of the persisted monitor state.
    pub fn state_path(&self) -> PathBuf {
        self.monitor
            .state_file
            .clone()
            .unwrap_or_else(|| self.output.dir.join("state.json"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            monitor: MonitorConfig::default(),
            batch: BatchConfig::default(),
            backoff: BackoffConfig::default(),
            output: OutputConfig::default(),
            sinks: defaults::sinks(),
            spreadsheet: SpreadsheetConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// A `.env` failure worth reporting. A missing file is not one.
fn dotenv_problem<T>(result: dotenvy::Result<T>) -> Option<dotenvy::Error> {
    match result {
        Ok(_) => None,
        Err(error) if error.not_found() => None,
        Err(error) => Some(error),
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::config(format!("{key}={value:?} is invalid: {e}")))
}

/// Graph API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Facebook page id
    #[serde(default)]
    pub page_id: String,

    /// Post id within the page
    #[serde(default)]
    pub post_id: String,

    /// Long-lived page access token
    #[serde(default)]
    pub access_token: String,

    #[serde(default = "defaults::api_version")]
    pub api_version: String,

    #[serde(default = "defaults::graph_base_url")]
    pub base_url: String,

    /// Comments requested per page
    #[serde(default = "defaults::page_size")]
    pub page_size: u32,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            page_id: String::new(),
            post_id: String::new(),
            access_token: String::new(),
            api_version: defaults::api_version(),
            base_url: defaults::graph_base_url(),
            page_size: defaults::page_size(),
            timeout_secs: defaults::timeout(),
            user_agent: defaults::user_agent(),
        }
    }
}

/// Polling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between ticks
    #[serde(default = "defaults::interval")]
    pub interval_secs: u64,

    /// Safety bound on pages walked per tick
    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,

    /// Delay between page requests in milliseconds
    #[serde(default = "defaults::page_delay")]
    pub page_delay_ms: u64,

    /// State file path (defaults to `{output.dir}/state.json`)
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::interval(),
            max_pages: defaults::max_pages(),
            page_delay_ms: defaults::page_delay(),
            state_file: None,
        }
    }
}

/// Batch trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Flush once this many events are buffered
    #[serde(default = "defaults::batch_size")]
    pub max_size: usize,

    /// Flush once this many seconds have passed since the last flush
    #[serde(default = "defaults::upload_interval")]
    pub max_age_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: defaults::batch_size(),
            max_age_secs: defaults::upload_interval(),
        }
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay unit in milliseconds
    #[serde(default = "defaults::backoff_base")]
    pub base_ms: u64,

    /// Largest exponent applied to the base delay
    #[serde(default = "defaults::exponent_cap")]
    pub exponent_cap: u32,

    /// Ceiling for any single wait in seconds
    #[serde(default = "defaults::max_delay")]
    pub max_delay_secs: u64,

    /// Retries allowed after the first attempt of a call
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: defaults::backoff_base(),
            exponent_cap: defaults::exponent_cap(),
            max_delay_secs: defaults::max_delay(),
            max_retries: defaults::max_retries(),
        }
    }
}

/// Local output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory for records and state
    #[serde(default = "defaults::output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: defaults::output_dir(),
        }
    }
}

/// Google Sheets settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadsheetConfig {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,

    #[serde(default = "defaults::worksheet")]
    pub worksheet: String,

    /// OAuth bearer token with the spreadsheets scope
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default = "defaults::sheets_base_url")]
    pub base_url: String,
}

impl Default for SpreadsheetConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            worksheet: defaults::worksheet(),
            access_token: None,
            base_url: defaults::sheets_base_url(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,

    /// Also append log lines to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
            file: None,
        }
    }
}

/// Sink variants a batch can be committed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Local,
    Spreadsheet,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Local => "local",
            SinkKind::Spreadsheet => "spreadsheet",
        }
    }
}

impl FromStr for SinkKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "local" => Ok(SinkKind::Local),
            "spreadsheet" | "sheets" => Ok(SinkKind::Spreadsheet),
            other => Err(AppError::config(format!("Unknown sink '{other}'"))),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::SinkKind;

    // Source defaults
    pub fn api_version() -> String {
        "v22.0".into()
    }
    pub fn graph_base_url() -> String {
        "https://graph.facebook.com".into()
    }
    pub fn page_size() -> u32 {
        100
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn user_agent() -> String {
        concat!("comment-relay/", env!("CARGO_PKG_VERSION")).into()
    }

    // Monitor defaults
    pub fn interval() -> u64 {
        60
    }
    pub fn max_pages() -> usize {
        50
    }
    pub fn page_delay() -> u64 {
        1000
    }

    // Batch defaults
    pub fn batch_size() -> usize {
        7
    }
    pub fn upload_interval() -> u64 {
        300
    }

    // Backoff defaults
    pub fn backoff_base() -> u64 {
        1000
    }
    pub fn exponent_cap() -> u32 {
        6
    }
    pub fn max_delay() -> u64 {
        3600
    }
    pub fn max_retries() -> u32 {
        4
    }

    // Output defaults
    pub fn output_dir() -> PathBuf {
        PathBuf::from("facebook_monitor_logs")
    }
    pub fn sinks() -> Vec<SinkKind> {
        vec![SinkKind::Local]
    }

    // Spreadsheet defaults
    pub fn worksheet() -> String {
        "Comments".into()
    }
    pub fn sheets_base_url() -> String {
        "https://sheets.googleapis.com".into()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
