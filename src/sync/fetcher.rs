//! Lazy page walker over the Jira search API
//!
//! One fetcher walks one scope's pages for one run. The walk is finite and
//! non-restartable: each successful pull advances the position by the page's
//! continuation, and once the continuation says end, further pulls return
//! `None`. A failed pull leaves the position untouched, so the page is the
//! unit of retry and a retried pull re-sends the identical request.

use crate::config::ScopeSpec;
use crate::jira::{format_jql_timestamp, Continuation, SearchPage, SearchProvider, SearchRequest};
use crate::retry::{with_retry, RetryConfig};
use crate::store::Cursor;
use crate::sync::SinceBoundary;
use crate::Result;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Position {
    Offset(u32),
    Token(String),
    Done,
}

pub struct PageFetcher<'a> {
    provider: &'a dyn SearchProvider,
    label: String,
    jql: String,
    fields: Vec<String>,
    expand: Vec<String>,
    validate_query: bool,
    page_size: u32,
    retry: RetryConfig,
    position: Position,
}

impl<'a> PageFetcher<'a> {
    pub fn new(
        provider: &'a dyn SearchProvider,
        scope: &ScopeSpec,
        boundary: &SinceBoundary,
        validate_query: bool,
        retry: RetryConfig,
    ) -> Self {
        let jql = build_jql(scope, boundary);
        debug!(scope = %scope.name, jql = %jql, "Planned search");

        let fields = if scope.fields.is_empty() {
            // No explicit field list: pull everything so the custom field
            // bag and the audit columns stay complete
            vec!["*all".to_string()]
        } else {
            scope.fields.clone()
        };
        let expand = if scope.expand_changelog {
            vec!["changelog".to_string()]
        } else {
            Vec::new()
        };

        Self {
            provider,
            label: format!("search {}", scope.name),
            jql,
            fields,
            expand,
            validate_query,
            page_size: scope.page_size,
            retry,
            position: Position::Offset(0),
        }
    }

    /// Pick up where an interrupted backfill left off
    ///
    /// A provider-side token wins over a bare page offset. Both markers are
    /// recorded against the fixed backfill anchor, so only backfill runs
    /// apply them; an incremental run re-anchors and walks from page zero.
    pub fn resume_from(mut self, cursor: &Cursor) -> Self {
        if let Some(token) = &cursor.resume_token {
            debug!(token = %token, "Resuming from provider token");
            self.position = Position::Token(token.clone());
        } else if let Some(offset) = cursor.resume_page_at {
            debug!(offset, "Resuming from page offset");
            self.position = Position::Offset(offset);
        }
        self
    }

    /// Pull the next page, or `None` once the walk is complete
    pub async fn next_page(&mut self) -> Result<Option<SearchPage>> {
        let request = match &self.position {
            Position::Done => return Ok(None),
            Position::Offset(start_at) => self.request_at(*start_at, None),
            Position::Token(token) => self.request_at(0, Some(token.clone())),
        };

        let provider = self.provider;
        let page = with_retry(&self.retry, &self.label, || provider.search(&request)).await?;

        self.position = match &page.continuation {
            Continuation::AtOffset(next) => Position::Offset(*next),
            Continuation::WithToken(token) => Position::Token(token.clone()),
            Continuation::End => Position::Done,
        };
        Ok(Some(page))
    }

    fn request_at(&self, start_at: u32, token: Option<String>) -> SearchRequest {
        SearchRequest {
            jql: self.jql.clone(),
            start_at,
            max_results: self.page_size,
            fields: self.fields.clone(),
            expand: self.expand.clone(),
            validate_query: self.validate_query,
            next_page_token: token,
        }
    }
}

/// The JQL for one scope's run window
///
/// Ordering by `updated ASC, id ASC` keeps pagination stable while the
/// instance keeps changing underneath the crawl; anything edited past the
/// current page sorts behind it and is picked up later (or by the next run's
/// overlap). The boundary is inclusive, which double-reads the boundary
/// minute on purpose.
fn build_jql(scope: &ScopeSpec, boundary: &SinceBoundary) -> String {
    let base = scope
        .jql_base
        .clone()
        .unwrap_or_else(|| format!("project = {}", scope.project));
    format!(
        "{} AND issuetype = \"{}\" AND updated >= '{}' ORDER BY updated ASC, id ASC",
        base,
        scope.issue_type,
        format_jql_timestamp(boundary.since)
    )
}
