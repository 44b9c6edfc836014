//! ETL configuration file handling
//!
//! Loads and validates the ~/.config/jiradw/config.yaml file describing the
//! Jira instance, the extraction scopes, and the window/retry settings.

use crate::retry::RetryConfig;
use crate::Result;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP connectivity configuration for Jira
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraConfig {
    /// Jira instance base URL (e.g., "https://jira.example.com")
    pub base_url: String,

    /// Name of the environment variable holding the personal access token
    #[serde(default = "default_pat_env")]
    pub pat_env: String,

    /// Optional PEM bundle added to the client's trust roots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<PathBuf>,

    /// Default page size for search requests
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Connection-establishment timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Ask Jira to validate JQL strictly
    #[serde(default = "default_validate_query")]
    pub validate_query: bool,
}

fn default_pat_env() -> String {
    "JIRA_PAT".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_validate_query() -> bool {
    true
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            pat_env: default_pat_env(),
            ca_bundle: None,
            page_size: default_page_size(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
            validate_query: default_validate_query(),
        }
    }
}

impl JiraConfig {
    /// Fetch the PAT from the configured environment variable
    pub fn pat(&self) -> Result<String> {
        std::env::var(&self.pat_env)
            .ok()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                crate::EtlError::Config(format!(
                    "Environment variable {} is not set",
                    self.pat_env
                ))
            })
    }
}

/// Configuration for a Jira issue type inside a scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueTypeConfig {
    /// Issue type name as Jira knows it (e.g., "Bug")
    pub name: String,

    /// Fields requested from the search API for this issue type
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Configuration describing a project extraction scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Jira project key (e.g., "DEMO")
    pub project: String,

    /// Optional JQL base clause replacing the default `project = KEY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jql_base: Option<String>,

    /// Issue types synced for this project
    pub issue_types: Vec<IssueTypeConfig>,

    /// Per-scope page size override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,

    /// Request changelog expansion on every issue
    #[serde(default = "default_expand_changelog")]
    pub expand_changelog: bool,
}

fn default_expand_changelog() -> bool {
    true
}

/// Configuration for extraction windows and safety skew
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsConfig {
    /// Days of history pulled by the initial backfill window
    #[serde(default = "default_initial_days")]
    pub initial_days: u32,

    /// Seconds subtracted from the stored cursor on every incremental run
    #[serde(default = "default_safety_skew_s")]
    pub safety_skew_s: u32,

    /// Fixed start date for the initial window (overrides `initial_days`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_start: Option<NaiveDate>,
}

fn default_initial_days() -> u32 {
    90
}

fn default_safety_skew_s() -> u32 {
    60
}

impl Default for WindowsConfig {
    fn default() -> Self {
        Self {
            initial_days: default_initial_days(),
            safety_skew_s: default_safety_skew_s(),
            initial_start: None,
        }
    }
}

impl WindowsConfig {
    /// Safety skew as a chrono duration
    pub fn safety_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.safety_skew_s as i64)
    }

    /// Start of the initial backfill window, relative to `now` unless a fixed
    /// start date was configured
    pub fn initial_window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.initial_start {
            Some(date) => date.and_time(NaiveTime::MIN).and_utc(),
            None => now - chrono::Duration::days(self.initial_days as i64),
        }
    }
}

/// Retry settings for Jira calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per page pull, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in seconds
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    1_000
}

fn default_max_backoff_secs() -> u64 {
    60
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl RetrySettings {
    /// Build the runtime retry configuration
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Warehouse database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    // Always use ~/.config for consistency across platforms (macOS, Linux)
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("jiradw");
    path.push("warehouse.db");
    path
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// A flattened (project, issue type) extraction unit
///
/// Cursors, runs, and fetch loops all operate on one of these. The `name`
/// is the canonical `"{project}:{issue_type}"` scope identifier under which
/// the cursor row is keyed.
#[derive(Debug, Clone)]
pub struct ScopeSpec {
    /// Canonical scope name, `"{project}:{issue_type}"`
    pub name: String,

    /// Jira project key
    pub project: String,

    /// Issue type name
    pub issue_type: String,

    /// Fields requested from the search API
    pub fields: Vec<String>,

    /// Optional JQL base clause
    pub jql_base: Option<String>,

    /// Effective page size
    pub page_size: u32,

    /// Request changelog expansion
    pub expand_changelog: bool,
}

/// Top-level jiradw configuration
///
/// Represents the complete ~/.config/jiradw/config.yaml file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    /// Jira connectivity
    pub jira: JiraConfig,

    /// Extraction scopes
    pub scopes: Vec<ScopeConfig>,

    /// Window settings
    #[serde(default)]
    pub windows: WindowsConfig,

    /// Retry settings
    #[serde(default)]
    pub retry: RetrySettings,

    /// Warehouse database settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl EtlConfig {
    /// Load configuration from the default path (~/.config/jiradw/config.yaml)
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path())
    }

    /// Load and validate configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::EtlError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading jiradw configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;

        tracing::debug!(
            scopes = config.scopes.len(),
            page_size = config.jira.page_size,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Get the default config path (~/.config/jiradw/config.yaml)
    pub fn default_path() -> PathBuf {
        // Always use ~/.config for consistency across platforms (macOS, Linux)
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("jiradw");
        path.push("config.yaml");
        path
    }

    /// Validate invariants the type system cannot express
    pub fn validate(&self) -> Result<()> {
        if self.jira.base_url.is_empty() {
            return Err(crate::EtlError::Config(
                "jira.base_url is required".to_string(),
            ));
        }
        if self.jira.pat_env.is_empty() {
            return Err(crate::EtlError::Config(
                "jira.pat_env is required".to_string(),
            ));
        }
        if self.jira.page_size == 0 {
            return Err(crate::EtlError::Config(
                "jira.page_size must be positive".to_string(),
            ));
        }
        if self.scopes.is_empty() {
            return Err(crate::EtlError::Config(
                "at least one scope is required".to_string(),
            ));
        }
        for scope in &self.scopes {
            if scope.project.is_empty() {
                return Err(crate::EtlError::Config(
                    "scope requires a project key".to_string(),
                ));
            }
            if scope.issue_types.is_empty() {
                return Err(crate::EtlError::Config(format!(
                    "scope {} requires at least one issue type",
                    scope.project
                )));
            }
            for issue_type in &scope.issue_types {
                if issue_type.name.is_empty() {
                    return Err(crate::EtlError::Config(format!(
                        "scope {} has an issue type without a name",
                        scope.project
                    )));
                }
            }
            if scope.page_size == Some(0) {
                return Err(crate::EtlError::Config(format!(
                    "scope {} page_size must be positive",
                    scope.project
                )));
            }
        }
        if self.windows.initial_days == 0 {
            return Err(crate::EtlError::Config(
                "windows.initial_days must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(crate::EtlError::Config(
                "retry.max_attempts must be at least one".to_string(),
            ));
        }
        Ok(())
    }

    /// Flatten every project/issue type combination into a scope spec
    pub fn scope_specs(&self) -> Vec<ScopeSpec> {
        let mut specs = Vec::new();
        for scope in &self.scopes {
            for issue_type in &scope.issue_types {
                specs.push(ScopeSpec {
                    name: format!("{}:{}", scope.project, issue_type.name),
                    project: scope.project.clone(),
                    issue_type: issue_type.name.clone(),
                    fields: issue_type.fields.clone(),
                    jql_base: scope.jql_base.clone(),
                    page_size: scope.page_size.unwrap_or(self.jira.page_size),
                    expand_changelog: scope.expand_changelog,
                });
            }
        }
        specs
    }
}
