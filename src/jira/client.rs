//! HTTP transport for the Jira REST API
//!
//! Thin reqwest wrapper owning the base URL, the personal access token, and
//! the response-status policy: 200 decodes JSON, 401/403 is an auth failure,
//! 429 surfaces the Retry-After hint, everything else carries the body back
//! for the error note.

use crate::config::JiraConfig;
use crate::Result;
use reqwest::{Certificate, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Jira HTTP client with bearer-token auth
pub struct JiraHttpClient {
    client: Client,
    base_url: String,
    pat: String,
}

impl JiraHttpClient {
    /// Create a client from the Jira section of the configuration
    ///
    /// Reads the PAT from the configured environment variable and, when a
    /// `ca_bundle` is set, adds every certificate in the PEM file to the
    /// client's trust roots.
    pub fn new(config: &JiraConfig) -> Result<Self> {
        let pat = config.pat()?;

        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs));
        if let Some(ref bundle) = config.ca_bundle {
            let pem = std::fs::read(bundle)?;
            for certificate in Certificate::from_pem_bundle(&pem)? {
                builder = builder.add_root_certificate(certificate);
            }
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            pat,
        })
    }

    /// The instance base URL, without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET a JSON resource
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.pat)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// POST a JSON body and decode a JSON response
    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "POST");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.pat)
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(crate::EtlError::Auth(
                "Jira rejected the personal access token".to_string(),
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok());
                Err(crate::EtlError::RateLimited { retry_after })
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(crate::EtlError::Api {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation_trims_base_url() {
        std::env::set_var("JIRADW_CLIENT_TEST_PAT", "secret");
        let config = JiraConfig {
            base_url: "https://jira.example.com/".to_string(),
            pat_env: "JIRADW_CLIENT_TEST_PAT".to_string(),
            ..Default::default()
        };

        let client = JiraHttpClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://jira.example.com");
        std::env::remove_var("JIRADW_CLIENT_TEST_PAT");
    }

    #[test]
    fn test_client_creation_requires_pat() {
        std::env::remove_var("JIRADW_CLIENT_MISSING_PAT");
        let config = JiraConfig {
            base_url: "https://jira.example.com".to_string(),
            pat_env: "JIRADW_CLIENT_MISSING_PAT".to_string(),
            ..Default::default()
        };

        assert!(JiraHttpClient::new(&config).is_err());
    }
}
