//! Google Custom Search JSON API client.
//!
//! Requests are pinned to Brazilian Portuguese results (`hl=pt`, `gl=br`,
//! `lr=lang_pt`) with safe search on.

use super::{RESULTS_PER_PAGE, SearchError, clean_titles};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

pub const GOOGLE_CSE_URL: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Debug, Deserialize)]
struct CseResponse {
    #[serde(default)]
    items: Vec<CseItem>,
}

#[derive(Debug, Deserialize)]
struct CseItem {
    #[serde(default)]
    title: Option<String>,
}

pub struct CustomSearch {
    http: Client,
    endpoint: String,
    api_key: String,
    cx: String,
}

impl std::fmt::Debug for CustomSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomSearch")
            .field("endpoint", &self.endpoint)
            .field("cx", &self.cx)
            .finish_non_exhaustive()
    }
}

/// 1-based `start` parameter for a 0-based page index.
pub fn start_index(page_idx: u32) -> u32 {
    page_idx * RESULTS_PER_PAGE + 1
}

/// Titles from one Custom Search response body, in rank order.
pub fn parse_titles(body: &str) -> Result<Vec<String>, serde_json::Error> {
    let resp: CseResponse = serde_json::from_str(body)?;
    Ok(resp
        .items
        .into_iter()
        .filter_map(|item| item.title)
        .collect())
}

impl CustomSearch {
    pub fn new(http: Client, api_key: &str, cx: &str) -> Self {
        Self {
            http,
            endpoint: GOOGLE_CSE_URL.to_string(),
            api_key: api_key.to_string(),
            cx: cx.to_string(),
        }
    }

    /// Send requests to another base URL than [`GOOGLE_CSE_URL`].
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    fn query_params(&self, query: &str, page_idx: u32) -> Vec<(&'static str, String)> {
        vec![
            ("key", self.api_key.clone()),
            ("cx", self.cx.clone()),
            ("q", query.to_string()),
            ("hl", "pt".into()),
            ("gl", "br".into()),
            ("lr", "lang_pt".into()),
            ("num", RESULTS_PER_PAGE.to_string()),
            ("start", start_index(page_idx).to_string()),
            ("safe", "active".into()),
        ]
    }

    #[instrument(level = "info", skip(self))]
    pub async fn fetch_titles(&self, query: &str, pages: u32) -> Result<Vec<String>, SearchError> {
        let mut titles = Vec::new();
        for page_idx in 0..pages {
            let resp = self
                .http
                .get(&self.endpoint)
                .query(&self.query_params(query, page_idx))
                .send()
                .await?;

            let status = resp.status();
            if status == StatusCode::FORBIDDEN {
                return Err(SearchError::Forbidden);
            }
            let body = resp.text().await?;
            if !status.is_success() {
                return Err(SearchError::Status { status, body });
            }

            let page_titles = parse_titles(&body).map_err(|e| SearchError::Status {
                status,
                body: format!("unreadable response: {e}"),
            })?;
            debug!(page = page_idx, count = page_titles.len(), "Custom Search page");
            titles.extend(page_titles);
        }
        Ok(clean_titles(titles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::{StubResponse, StubServer};

    fn stub_client(server: &StubServer) -> CustomSearch {
        let http = Client::builder().no_proxy().build().unwrap();
        CustomSearch::new(http, "k", "c").with_endpoint(server.url.as_str())
    }

    #[test]
    fn test_start_index() {
        assert_eq!(start_index(0), 1);
        assert_eq!(start_index(1), 11);
        assert_eq!(start_index(9), 91);
    }

    #[test]
    fn test_parse_titles() {
        let body = r#"{
            "kind": "customsearch#search",
            "items": [
                {"title": "PF deflagra operação", "link": "https://a"},
                {"link": "https://b"},
                {"title": "  Ex-ministro é preso  "}
            ]
        }"#;
        let titles = parse_titles(body).unwrap();
        assert_eq!(titles, vec!["PF deflagra operação", "  Ex-ministro é preso  "]);
    }

    #[test]
    fn test_parse_titles_without_items() {
        let titles = parse_titles(r#"{"searchInformation": {"totalResults": "0"}}"#).unwrap();
        assert!(titles.is_empty());
    }

    #[test]
    fn test_query_params() {
        let client = CustomSearch::new(Client::new(), "k", "c");
        let params = client.query_params("lavagem", 2);
        assert!(params.contains(&("start", "21".to_string())));
        assert!(params.contains(&("lr", "lang_pt".to_string())));
        assert!(params.contains(&("q", "lavagem".to_string())));
    }

    #[tokio::test]
    async fn test_fetch_titles_pages_and_dedupes() {
        let server = StubServer::start(vec![
            StubResponse::json(200, r#"{"items": [{"title": "PF prende"}, {"title": "STF julga"}]}"#),
            StubResponse::json(200, r#"{"items": [{"title": " PF prende "}, {"title": "CPI ouve"}]}"#),
        ])
        .await;
        let titles = stub_client(&server).fetch_titles("pf", 2).await.unwrap();
        assert_eq!(titles, vec!["PF prende", "STF julga", "CPI ouve"]);
        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].contains("start=1&"));
        assert!(requests[1].contains("start=11&"));
    }

    #[tokio::test]
    async fn test_fetch_titles_forbidden() {
        let server = StubServer::start(vec![StubResponse::json(
            403,
            r#"{"error": {"code": 403, "message": "forbidden"}}"#,
        )])
        .await;
        let err = stub_client(&server).fetch_titles("pf", 3).await.unwrap_err();
        assert!(matches!(err, SearchError::Forbidden));
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_titles_other_status_keeps_body() {
        let server = StubServer::start(vec![StubResponse::json(500, r#"{"error": "boom"}"#)]).await;
        let err = stub_client(&server).fetch_titles("pf", 1).await.unwrap_err();
        match err {
            SearchError::Status { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert!(body.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
