//! Jira REST API surface used by the sync engine
//!
//! [`JiraApi`] exposes the three endpoints the ETL needs: the connectivity
//! preflight, field metadata, and paged search. Search sits behind the
//! [`SearchProvider`] trait so the fetch loop can be driven by a scripted
//! fake in tests.

use crate::jira::client::JiraHttpClient;
use crate::jira::types::{FieldDef, Myself, SearchPage, SearchRequest, SearchResponse};
use crate::Result;
use async_trait::async_trait;
use tracing::debug;

/// The external search collaborator: one call, one page
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Execute one search call and return the resulting page
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage>;
}

/// Live Jira API client
pub struct JiraApi {
    client: JiraHttpClient,
}

impl JiraApi {
    pub fn new(client: JiraHttpClient) -> Self {
        Self { client }
    }

    /// Return the authenticated user (GET /rest/api/2/myself)
    ///
    /// Used as a preflight so a bad PAT fails the run before any scope starts.
    pub async fn myself(&self) -> Result<Myself> {
        self.client.get_json("/rest/api/2/myself").await
    }

    /// Fetch field metadata (GET /rest/api/2/field)
    pub async fn fields(&self) -> Result<Vec<FieldDef>> {
        self.client.get_json("/rest/api/2/field").await
    }
}

#[async_trait]
impl SearchProvider for JiraApi {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage> {
        debug!(
            jql = %request.jql,
            start_at = request.start_at,
            max_results = request.max_results,
            "Fetching Jira search page"
        );

        let response: SearchResponse = self.client.post_json("/rest/api/2/search", request).await?;
        let returned = response.issues.len();
        let page = response.into_page(request.start_at);

        debug!(returned, total = ?page.total, "Jira search page fetched");
        Ok(page)
    }
}
