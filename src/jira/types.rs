//! Wire types for the Jira REST API
//!
//! Search request/response shapes, the page continuation descriptor, and the
//! timestamp dialect Jira speaks ("2024-06-01T00:05:00.000+0000" on the wire,
//! minute-truncated "2024-06-01 00:05" inside JQL).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body for POST /rest/api/2/search
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    /// JQL query string
    pub jql: String,

    /// Zero-based offset of the first issue to return
    pub start_at: u32,

    /// Page size
    pub max_results: u32,

    /// Fields to include on each issue
    pub fields: Vec<String>,

    /// Expansions ("changelog" when the scope wants histories)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expand: Vec<String>,

    /// Ask Jira to validate the JQL strictly
    pub validate_query: bool,

    /// Provider-side pagination token, when the server speaks tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// One raw issue as returned by the search API
///
/// Only the envelope is typed; `fields` stays an open JSON object so unknown
/// and custom fields pass through untouched, and `extra` preserves any other
/// top-level keys so the issue re-serializes faithfully for the audit columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawIssue {
    /// Durable issue identifier (Jira sends it as a string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Issue key, e.g. "DEMO-1"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Requested fields, including any customfield_* entries
    #[serde(default)]
    pub fields: Map<String, Value>,

    /// Changelog sub-object when the request expanded it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<Value>,

    /// Everything else Jira put on the issue envelope
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawIssue {
    /// The durable integer identifier, if the issue carries a usable one
    pub fn issue_id(&self) -> Option<i64> {
        self.id.as_deref().and_then(|raw| raw.parse().ok())
    }

    /// The issue's `updated` timestamp, parsed to UTC
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.fields
            .get("updated")
            .and_then(Value::as_str)
            .and_then(parse_jira_timestamp)
    }
}

/// Raw response body of POST /rest/api/2/search
///
/// Jira Data Center replies with startAt/maxResults/total bookkeeping; newer
/// search endpoints reply with nextPageToken/isLast instead. Both shapes
/// deserialize here and collapse into one [`Continuation`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    #[serde(default)]
    pub start_at: u32,

    #[serde(default)]
    pub max_results: u32,

    #[serde(default)]
    pub total: Option<u32>,

    #[serde(default)]
    pub issues: Vec<RawIssue>,

    #[serde(default)]
    pub next_page_token: Option<String>,

    #[serde(default)]
    pub is_last: Option<bool>,
}

impl SearchResponse {
    /// Collapse the response into a page, deriving the continuation from
    /// whichever bookkeeping the server sent. `requested_at` is the offset
    /// the request asked for; offset math uses it rather than trusting the
    /// echoed `startAt`.
    pub fn into_page(self, requested_at: u32) -> SearchPage {
        let fetched = requested_at + self.issues.len() as u32;

        let continuation = if self.issues.is_empty() {
            Continuation::End
        } else if let Some(token) = self.next_page_token {
            if self.is_last == Some(true) {
                Continuation::End
            } else {
                Continuation::WithToken(token)
            }
        } else {
            match self.total {
                Some(total) if fetched < total => Continuation::AtOffset(fetched),
                // No total at all means the server gave us everything it had
                _ => Continuation::End,
            }
        };

        SearchPage {
            start_at: requested_at,
            total: self.total,
            issues: self.issues,
            continuation,
        }
    }
}

/// How to ask for the next page, if there is one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    /// Next page starts at this zero-based offset
    AtOffset(u32),
    /// Provider-side pagination token for the next page
    WithToken(String),
    /// No more pages
    End,
}

/// One page of search results plus its continuation descriptor
#[derive(Debug, Clone)]
pub struct SearchPage {
    /// Offset this page was requested at
    pub start_at: u32,

    /// Total matching issues, when the server reports it
    pub total: Option<u32>,

    /// The issues on this page, ordered as the JQL ordered them
    pub issues: Vec<RawIssue>,

    /// How to fetch the next page
    pub continuation: Continuation,
}

/// The authenticated user, from GET /rest/api/2/myself
#[derive(Debug, Clone, Deserialize)]
pub struct Myself {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,

    #[serde(rename = "emailAddress", default)]
    pub email_address: Option<String>,
}

/// Field metadata, from GET /rest/api/2/field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field identifier ("summary", "customfield_10010", ...)
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub custom: bool,

    /// Type descriptor as Jira reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Parse a Jira wire timestamp into UTC
///
/// Accepts the Data Center format "2024-06-01T00:05:00.000+0000" (with or
/// without fractional seconds) and plain RFC 3339.
pub fn parse_jira_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format a boundary timestamp for use inside a JQL `updated >=` clause
///
/// JQL accepts minute precision only, so the boundary is truncated downward;
/// the safety skew exists partly to absorb this truncation.
pub fn format_jql_timestamp(value: DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M").to_string()
}
