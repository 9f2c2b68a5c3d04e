//! News title search backends.
//!
//! Two providers are supported, selected by [`ProviderSettings`]:
//!
//! | Provider | Module | Auth |
//! |----------|--------|------|
//! | Google Custom Search | [`custom`] | API key + engine id (`cx`) |
//! | Vertex AI Search | [`vertex`] | OAuth token, minted from a service account by [`auth`] |
//!
//! Both return result titles in rank order, trimmed and de-duplicated.

pub mod auth;
pub mod custom;
pub mod vertex;

use crate::config::{ProviderSettings, Settings};
use crate::http::{PAGE_TIMEOUT, USER_AGENT};
use itertools::Itertools;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

/// Results requested per page from either provider.
pub const RESULTS_PER_PAGE: u32 = 10;

/// Upper bound on pages requested in a single search.
pub const MAX_PAGES: u32 = 10;

/// Same per-request timeout as the page fetcher.
pub const REQUEST_TIMEOUT: Duration = PAGE_TIMEOUT;

fn client_builder() -> ClientBuilder {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(
        "403 Forbidden. Check that the Custom Search API is enabled, billing is active and the key has no referrer restriction."
    )]
    Forbidden,
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("search API answered {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("could not sign token assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("could not read credentials {path}: {reason}")]
    Credentials { path: String, reason: String },
}

/// A configured search backend.
#[derive(Debug)]
pub enum SearchClient {
    Custom(custom::CustomSearch),
    Vertex(vertex::VertexSearch),
}

impl SearchClient {
    pub fn from_settings(settings: &Settings) -> Result<Self, SearchError> {
        let http = client_builder().build()?;
        Ok(match &settings.provider {
            ProviderSettings::Custom { api_key, cx } => {
                SearchClient::Custom(custom::CustomSearch::new(http, api_key, cx))
            }
            ProviderSettings::Vertex {
                project_id,
                location,
                engine_id,
                credentials,
            } => SearchClient::Vertex(vertex::VertexSearch::new(
                http,
                project_id,
                location,
                engine_id,
                credentials.clone(),
            )),
        })
    }

    /// Fetch up to `pages` pages of result titles for `query`.
    #[instrument(level = "info", skip(self))]
    pub async fn fetch_titles(&self, query: &str, pages: u32) -> Result<Vec<String>, SearchError> {
        let pages = pages.clamp(1, MAX_PAGES);
        let titles = match self {
            SearchClient::Custom(c) => c.fetch_titles(query, pages).await?,
            SearchClient::Vertex(v) => v.fetch_titles(query, pages).await?,
        };
        info!(count = titles.len(), "Fetched titles");
        Ok(titles)
    }

    /// Run a one-page search and describe the outcome for the user.
    pub async fn test_connection(&self, query: &str) -> String {
        match self.fetch_titles(query, 1).await {
            Ok(titles) => format!("Connection OK. Titles returned: {}", titles.len()),
            Err(e) => format!("Connection failed: {e}"),
        }
    }
}

/// Trim, drop empties and de-duplicate titles keeping first-seen order.
pub fn clean_titles<I, S>(titles: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    titles
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .unique()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{StubResponse, StubServer};

    #[test]
    fn test_clean_titles() {
        let titles = clean_titles([" PF prende ", "", "PF prende", "STF julga", "  "]);
        assert_eq!(titles, vec!["PF prende", "STF julga"]);
    }

    #[test]
    fn test_forbidden_message_mentions_billing() {
        assert!(SearchError::Forbidden.to_string().contains("billing"));
    }

    #[tokio::test]
    async fn test_search_client_sends_user_agent() {
        assert_eq!(REQUEST_TIMEOUT, Duration::from_secs(60));
        let server = StubServer::start(vec![StubResponse::json(200, r#"{"items": []}"#)]).await;
        let http = client_builder().no_proxy().build().unwrap();
        let client = SearchClient::Custom(
            custom::CustomSearch::new(http, "k", "c").with_endpoint(server.url.as_str()),
        );
        assert_eq!(
            client.test_connection("pf").await,
            "Connection OK. Titles returned: 0"
        );
        let request = server.requests()[0].to_lowercase();
        assert!(request.contains(&format!("user-agent: {USER_AGENT}")));
    }
}
