//! Page fetching with exponential backoff retry logic.
//!
//! The scraper never talks to `reqwest` directly. It goes through the
//! [`Fetch`] trait so that:
//! - [`HttpFetcher`] does the real network I/O
//! - [`RetryFetch`] decorates any fetcher with retries
//! - tests substitute an in-memory fetcher serving HTML fixtures
//!
//! # Retry Strategy
//!
//! - Exponential backoff starting at `base_delay`
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to every wait
//! - Client errors (4xx) are not retried
//!
//! # Decoding
//!
//! Bodies are read as bytes and decoded with the charset from the
//! `Content-Type` header, else the one declared in a `<meta>` tag near the
//! top of the document, else UTF-8.

use encoding_rs::{Encoding, UTF_8};
use once_cell::sync::Lazy;
use rand::{Rng, rng};
use regex::bytes::Regex as BytesRegex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};
use url::Url;

/// Per-request timeout for page loads.
pub const PAGE_TIMEOUT: StdDuration = StdDuration::from_secs(60);

pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// How much of the body is scanned for a `<meta>` charset declaration.
const CHARSET_SNIFF_LEN: usize = 2048;

// Matches both `<meta charset="...">` and the `http-equiv` form.
static META_CHARSET: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(r#"(?i-u)<meta[^>]+charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#).unwrap()
});

fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c| c == '"' || c == '\''))
    })
}

fn meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(CHARSET_SNIFF_LEN)];
    let label = META_CHARSET.captures(head)?.get(1)?;
    Encoding::for_label(label.as_bytes())
}

/// Decode a response body to text.
///
/// A byte order mark wins over any declared charset. Malformed sequences
/// become U+FFFD.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(charset_param)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .or_else(|| meta_charset(bytes))
        .unwrap_or(UTF_8);
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(encoding = used.name(), "Body had malformed byte sequences");
    }
    text.into_owned()
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered {status}")]
    Status { url: String, status: StatusCode },
    #[error("no document at {0}")]
    NotFound(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Http { .. } => true,
            FetchError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::NotFound(_) => false,
        }
    }
}

/// A fetched document and the URL it was finally served from.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub body: String,
}

/// Something that can load HTML documents.
pub trait Fetch {
    /// GET a URL and return the decoded body.
    async fn get(&self, url: &Url) -> Result<Page, FetchError>;

    /// POST an `application/x-www-form-urlencoded` body.
    async fn post_form(&self, url: &Url, form: &[(String, String)]) -> Result<Page, FetchError>;
}

impl<T: Fetch> Fetch for &T {
    async fn get(&self, url: &Url) -> Result<Page, FetchError> {
        (**self).get(url).await
    }

    async fn post_form(&self, url: &Url, form: &[(String, String)]) -> Result<Page, FetchError> {
        (**self).post_form(url, form).await
    }
}

/// [`Fetch`] over a shared `reqwest` client with a cookie store.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    fn builder() -> ClientBuilder {
        Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(PAGE_TIMEOUT)
    }

    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Self::builder().build()?;
        Ok(Self { client })
    }

    async fn finish(&self, url: &Url, resp: reqwest::Response) -> Result<Page, FetchError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }
        let final_url = resp.url().clone();
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = resp.bytes().await.map_err(|source| FetchError::Http {
            url: url.to_string(),
            source,
        })?;
        let body = decode_body(&bytes, content_type.as_deref());
        debug!(%final_url, bytes = bytes.len(), "Fetched page");
        Ok(Page {
            url: final_url,
            body,
        })
    }
}

impl Fetch for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get(&self, url: &Url) -> Result<Page, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;
        self.finish(url, resp).await
    }

    #[instrument(level = "debug", skip_all, fields(%url, fields = form.len()))]
    async fn post_form(&self, url: &Url, form: &[(String, String)]) -> Result<Page, FetchError> {
        let resp = self
            .client
            .post(url.clone())
            .form(form)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.to_string(),
                source,
            })?;
        self.finish(url, resp).await
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`Fetch`] implementation.
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryFetch<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryFetch<T>
where
    T: Fetch,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + StdDuration::from_millis(jitter_ms)
    }

    async fn with_retries<'a, F, Fut>(&'a self, url: &Url, op: F) -> Result<Page, FetchError>
    where
        F: Fn(&'a T) -> Fut,
        Fut: Future<Output = Result<Page, FetchError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match op(&self.inner).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !e.is_transient() || attempt > self.max_retries {
                        error!(
                            %url,
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "fetch gave up"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        %url,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Fetch for RetryFetch<T>
where
    T: Fetch,
{
    async fn get(&self, url: &Url) -> Result<Page, FetchError> {
        self.with_retries(url, |inner| inner.get(url)).await
    }

    async fn post_form(&self, url: &Url, form: &[(String, String)]) -> Result<Page, FetchError> {
        self.with_retries(url, |inner| inner.post_form(url, form))
            .await
    }
}

/// The fetcher used by the CLI: real HTTP with 3 retries from a 1s base.
pub fn default_fetcher() -> Result<RetryFetch<HttpFetcher>, reqwest::Error> {
    Ok(RetryFetch::new(
        HttpFetcher::new()?,
        3,
        StdDuration::from_secs(1),
    ))
}


#[cfg(test)]
mod tests {
    use super::testing::{FixtureFetcher, StubResponse, StubServer};
    use super::*;
    use crate::scrapers::dom;
    use scraper::Html;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        failures_left: AtomicUsize,
        status: StatusCode,
    }

    impl Fetch for Flaky {
        async fn get(&self, url: &Url) -> Result<Page, FetchError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: self.status,
                });
            }
            Ok(Page {
                url: url.clone(),
                body: "ok".into(),
            })
        }

        async fn post_form(&self, url: &Url, _: &[(String, String)]) -> Result<Page, FetchError> {
            self.get(url).await
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_server_errors() {
        let flaky = Flaky {
            failures_left: AtomicUsize::new(2),
            status: StatusCode::BAD_GATEWAY,
        };
        let fetcher = RetryFetch::new(flaky, 3, StdDuration::from_millis(10));
        let url = Url::parse("https://example.com/").unwrap();
        let page = fetcher.get(&url).await.unwrap();
        assert_eq!(page.body, "ok");
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max() {
        let flaky = Flaky {
            failures_left: AtomicUsize::new(10),
            status: StatusCode::SERVICE_UNAVAILABLE,
        };
        let fetcher = RetryFetch::new(flaky, 2, StdDuration::from_millis(10));
        let url = Url::parse("https://example.com/").unwrap();
        assert!(fetcher.get(&url).await.is_err());
        assert_eq!(fetcher.inner.failures_left.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let flaky = Flaky {
            failures_left: AtomicUsize::new(5),
            status: StatusCode::NOT_FOUND,
        };
        let fetcher = RetryFetch::new(flaky, 3, StdDuration::from_secs(60));
        let url = Url::parse("https://example.com/").unwrap();
        assert!(fetcher.get(&url).await.is_err());
        assert_eq!(fetcher.inner.failures_left.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fixture_fetcher_records_posts() {
        let fetcher = FixtureFetcher::new().with("https://example.com/f", "<p>x</p>");
        let url = Url::parse("https://example.com/f").unwrap();
        let form = vec![("a".to_string(), "1".to_string())];
        let page = fetcher.post_form(&url, &form).await.unwrap();
        assert_eq!(page.body, "<p>x</p>");
        assert_eq!(fetcher.posts.lock().unwrap()[0].1, form);
    }

    const LATIN1_PAGE: &[u8] = b"<html><head>\
        <meta http-equiv=\"Content-Type\" content=\"text/html; charset=iso-8859-1\">\
        </head><body><b>ESP\xC9CIES</b><b>L\xEDder</b></body></html>";

    #[test]
    fn test_decode_body_uses_meta_charset() {
        let text = decode_body(LATIN1_PAGE, Some("text/html"));
        assert!(text.contains("<b>ESPÉCIES</b>"));
        assert!(text.contains("<b>Líder</b>"));
    }

    #[test]
    fn test_decode_body_prefers_header_charset() {
        let text = decode_body(
            b"<meta charset=\"utf-8\"><b>N\xBA</b>",
            Some("text/html; charset=ISO-8859-1"),
        );
        assert_eq!(text, "<meta charset=\"utf-8\"><b>Nº</b>");
    }

    #[test]
    fn test_decode_body_defaults_to_utf8() {
        let text = decode_body("<b>Distribuição</b>".as_bytes(), None);
        assert_eq!(text, "<b>Distribuição</b>");
        assert_eq!(charset_param("text/html; Charset=\"windows-1252\""), Some("windows-1252"));
        assert_eq!(charset_param("text/html"), None);
    }

    #[tokio::test]
    async fn test_http_fetcher_decodes_legacy_page() {
        let server =
            StubServer::start(vec![StubResponse::new(200, "text/html", LATIN1_PAGE)]).await;
        let fetcher = HttpFetcher {
            client: HttpFetcher::builder().no_proxy().build().unwrap(),
        };
        let page = fetcher.get(&server.url).await.unwrap();
        assert!(!page.body.contains('\u{FFFD}'));
        let doc = Html::parse_document(&page.body);
        assert!(dom::has_bold(&doc, "ESPÉCIES"));
        assert!(server.requests()[0].contains(USER_AGENT));
    }
}
