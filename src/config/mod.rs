//! Configuration system
//!
//! Loads ~/.config/jiradw/config.yaml with support for:
//! - Jira connectivity (base URL, PAT environment variable, CA bundle)
//! - Extraction scopes (project / issue type pairs with field lists)
//! - Window settings (initial backfill window, safety skew)
//! - Retry and warehouse settings

mod etl_config;

pub use etl_config::{
    DatabaseConfig, EtlConfig, IssueTypeConfig, JiraConfig, RetrySettings, ScopeConfig, ScopeSpec,
    WindowsConfig,
};
