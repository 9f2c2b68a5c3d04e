//! Vertex AI Search (Discovery Engine) client.
//!
//! Searches the engine's `default_search` serving config and reads titles
//! from each result document. Website engines put the title in
//! `derivedStructData`, structured-data engines in `structData`.

use super::auth::{ServiceAccountKey, fetch_access_token};
use super::{RESULTS_PER_PAGE, SearchError, clean_titles};
use crate::config::VertexCredentials;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query: &'a str,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
    language_code: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    results: Vec<SearchResult>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    derived_struct_data: Option<Value>,
    #[serde(default)]
    struct_data: Option<Value>,
}

impl Document {
    fn title(&self) -> Option<String> {
        [&self.derived_struct_data, &self.struct_data]
            .into_iter()
            .flatten()
            .find_map(|data| data.get("title").and_then(Value::as_str))
            .map(str::to_string)
    }
}

impl SearchPage {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    pub fn titles(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| r.document.as_ref())
            .filter_map(Document::title)
            .collect()
    }
}

#[derive(Debug)]
pub struct VertexSearch {
    http: Client,
    endpoint: Option<String>,
    project_id: String,
    location: String,
    engine_id: String,
    credentials: VertexCredentials,
}

/// The `:search` endpoint for an engine's default serving config.
pub fn search_url(project_id: &str, location: &str, engine_id: &str) -> String {
    let host = if location == "global" {
        "discoveryengine.googleapis.com".to_string()
    } else {
        format!("{location}-discoveryengine.googleapis.com")
    };
    format!(
        "https://{host}/v1/projects/{}/locations/{}/collections/default_collection/engines/{}/servingConfigs/default_search:search",
        urlencoding::encode(project_id),
        urlencoding::encode(location),
        urlencoding::encode(engine_id),
    )
}

impl VertexSearch {
    pub fn new(
        http: Client,
        project_id: &str,
        location: &str,
        engine_id: &str,
        credentials: VertexCredentials,
    ) -> Self {
        Self {
            http,
            endpoint: None,
            project_id: project_id.to_string(),
            location: location.to_string(),
            engine_id: engine_id.to_string(),
            credentials,
        }
    }

    /// Post searches to `endpoint` instead of the URL from [`search_url`].
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }

    async fn access_token(&self) -> Result<String, SearchError> {
        match &self.credentials {
            VertexCredentials::AccessToken(token) => Ok(token.clone()),
            VertexCredentials::ServiceAccount(path) => {
                let key = ServiceAccountKey::from_file(path).await?;
                fetch_access_token(&self.http, &key).await
            }
            VertexCredentials::None => Err(SearchError::Auth(
                "no credentials: pass a service-account JSON or set GOOGLE_OAUTH_ACCESS_TOKEN".into(),
            )),
        }
    }

    #[instrument(level = "info", skip(self), fields(project = %self.project_id, engine = %self.engine_id))]
    pub async fn fetch_titles(&self, query: &str, pages: u32) -> Result<Vec<String>, SearchError> {
        let token = self.access_token().await?;
        let url = self
            .endpoint
            .clone()
            .unwrap_or_else(|| search_url(&self.project_id, &self.location, &self.engine_id));

        let mut titles = Vec::new();
        let mut page_token: Option<String> = None;
        for page_idx in 0..pages {
            let req = SearchRequest {
                query,
                page_size: RESULTS_PER_PAGE,
                page_token: page_token.as_deref(),
                language_code: "pt-BR",
            };
            let resp = self
                .http
                .post(&url)
                .bearer_auth(&token)
                .json(&req)
                .send()
                .await?;
            let status = resp.status();
            let body = resp.text().await?;
            if !status.is_success() {
                return Err(SearchError::Status { status, body });
            }

            let page = SearchPage::parse(&body).map_err(|e| SearchError::Status {
                status,
                body: format!("unreadable response: {e}"),
            })?;
            let page_titles = page.titles();
            debug!(page = page_idx, count = page_titles.len(), "Vertex AI Search page");
            titles.extend(page_titles);

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        Ok(clean_titles(titles))
    }
}
