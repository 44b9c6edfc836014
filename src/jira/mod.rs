//! Jira REST API integration
//!
//! The HTTP transport, the typed API surface, and the wire types for the
//! search protocol. The rest of the engine depends only on the
//! [`SearchProvider`] trait and the types in [`types`].

mod api;
mod client;
pub mod types;

pub use api::{JiraApi, SearchProvider};
pub use client::JiraHttpClient;
pub use types::{
    format_jql_timestamp, parse_jira_timestamp, Continuation, FieldDef, Myself, RawIssue,
    SearchPage, SearchRequest, SearchResponse,
};
