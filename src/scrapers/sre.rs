//! CVM SRE offering-registration scraper.
//!
//! Scrapes the public consultation pages of the CVM
//! [SRE system](https://sistemas.cvm.gov.br/port/redir.asp?subpage=consulta).
//! The site is a legacy frameset: the query form, the results list and the
//! record pages may each live inside a `<frame>`, so every fetched document
//! is first expanded with its frames.
//!
//! # Flow
//!
//! 1. Load the consultation page and find the form holding `select[name=TipoEmis]`
//! 2. Submit it with the requested offering type and year
//! 3. Collect record links from the results, following "Próxima" pages
//! 4. Open each record and extract its rows (see [`super::sre_record`])
//! 5. Optionally export CSV, then merge the rows into the JSON store

use super::dom::{self, ANCHOR, FRAMES};
use super::sre_record;
use crate::http::{Fetch, FetchError, Page};
use crate::models::RegistroDetalhe;
use crate::outputs::records::{self, PersistError};
use crate::utils::truncate_for_log;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

pub const CONSULTA_URL: &str = "https://sistemas.cvm.gov.br/port/redir.asp?subpage=consulta";

pub const DEFAULT_TIPO: &str = "ACOES";
pub const DEFAULT_ANO: i32 = 2005;

/// Frames nested deeper than this are not followed.
const MAX_FRAME_DEPTH: usize = 3;
/// Hard stop for result pagination.
const MAX_RESULT_PAGES: usize = 500;

/// Record-link selectors, most specific first.
const RESULT_LINK_SELECTORS: &[&str] = &["a.MenuItemP", r#"a[href*="RedirEmisCons.asp"]"#, "table a"];
const NEXT_PAGE_MARKERS: &[&str] = &["próxima", "proxima", ">>"];

static TIPO_SELECT: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"select[name="TipoEmis"]"#).unwrap());
static ANO_SELECT: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"select[name="Ano"]"#).unwrap());
static CONTROLS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input[name], select[name], textarea[name]").unwrap());
static OPTION: Lazy<Selector> = Lazy::new(|| Selector::parse("option").unwrap());

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("could not find {0} (the page layout may have changed)")]
    LayoutChanged(&'static str),
    #[error("option {value:?} is not offered by select {select}")]
    OptionNotFound { select: &'static str, value: String },
    #[error("no records found for the query")]
    NoRecords,
    #[error("invalid URL {0}")]
    Url(String),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// What to scrape and where to put it.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub tipo: String,
    pub ano: i32,
    pub json_out: PathBuf,
    pub csv_out: Option<PathBuf>,
    pub max_records: Option<usize>,
    /// Pause between page loads.
    pub delay: Duration,
    pub start_url: String,
}

impl ScrapeOptions {
    pub fn new(tipo: &str, ano: i32, json_out: PathBuf) -> Self {
        Self {
            tipo: tipo.trim().to_string(),
            ano,
            json_out,
            csv_out: None,
            max_records: None,
            delay: Duration::from_millis(800),
            start_url: CONSULTA_URL.to_string(),
        }
    }
}

/// Outcome of one scrape.
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    /// Rows extracted during this run.
    pub rows: Vec<RegistroDetalhe>,
    /// Rows in the JSON store after merging.
    pub total_json: usize,
    pub records_visited: usize,
    pub records_failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMethod {
    Get,
    Post,
}

/// A form ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    pub action: Url,
    pub method: FormMethod,
    pub fields: Vec<(String, String)>,
}

/// Links found on one results page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultLinks {
    pub records: Vec<Url>,
    pub next: Option<Url>,
}

fn resolve(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.to_ascii_lowercase().starts_with("javascript:") {
        return None;
    }
    base.join(href).ok()
}

/// Frame and iframe sources of a document, resolved against its URL.
pub fn frame_urls(page: &Page) -> Vec<Url> {
    let doc = Html::parse_document(&page.body);
    doc.select(&FRAMES)
        .filter_map(|f| f.value().attr("src"))
        .filter_map(|src| resolve(&page.url, src))
        .collect()
}

/// Fetch a page's frames (and their frames), breadth first.
///
/// The returned list starts with `page` itself. Frames that fail to load are
/// logged and skipped.
#[instrument(level = "debug", skip_all, fields(url = %page.url))]
pub async fn expand_frames<F: Fetch>(fetcher: &F, page: Page) -> Vec<Page> {
    let mut seen: HashSet<Url> = HashSet::from([page.url.clone()]);
    let mut queue: VecDeque<(Url, usize)> = frame_urls(&page).into_iter().map(|u| (u, 1)).collect();
    let mut docs = vec![page];

    while let Some((url, depth)) = queue.pop_front() {
        if depth > MAX_FRAME_DEPTH || !seen.insert(url.clone()) {
            continue;
        }
        match fetcher.get(&url).await {
            Ok(frame) => {
                queue.extend(frame_urls(&frame).into_iter().map(|u| (u, depth + 1)));
                docs.push(frame);
            }
            Err(e) => warn!(%url, error = %e, "Could not load frame"),
        }
    }
    debug!(documents = docs.len(), "Expanded frames");
    docs
}

/// Value of the option in `select` matching `wanted` by value or label.
fn option_value(select: ElementRef<'_>, wanted: &str) -> Option<String> {
    select.select(&OPTION).find_map(|opt| {
        let label = dom::text_of(opt);
        let value = opt
            .value()
            .attr("value")
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| label.clone());
        (value == wanted || label == wanted).then_some(value)
    })
}

/// Value a select submits when left alone: the `selected` option or the first.
fn default_option_value(select: ElementRef<'_>) -> Option<String> {
    let options: Vec<ElementRef<'_>> = select.select(&OPTION).collect();
    let chosen = options
        .iter()
        .find(|o| o.value().attr("selected").is_some())
        .or_else(|| options.first())?;
    Some(
        chosen
            .value()
            .attr("value")
            .map(str::to_string)
            .unwrap_or_else(|| dom::text_of(*chosen)),
    )
}

fn ano_option(select: ElementRef<'_>, ano: i32) -> Result<String, ScrapeError> {
    option_value(select, &ano.to_string()).ok_or_else(|| ScrapeError::OptionNotFound {
        select: "Ano",
        value: ano.to_string(),
    })
}

/// Look for the `Ano` select in the other documents of a frameset.
fn ano_in_frames(frames: &[Page], ano: i32) -> Result<String, ScrapeError> {
    let found = frames.iter().find_map(|frame| {
        let doc = Html::parse_document(&frame.body);
        let select = doc.select(&ANO_SELECT).next()?;
        debug!(url = %frame.url, "Ano select found in another frame");
        Some(ano_option(select, ano))
    });
    found.unwrap_or(Err(ScrapeError::LayoutChanged("select[name=Ano]")))
}

/// Build the search submission from the document holding the query form.
///
/// Returns `Ok(None)` when `page` has no `TipoEmis` select. When the form
/// has no `Ano` select, the other documents in `frames` are searched for
/// one. The `dd` "Procura" button is included as if it had been clicked.
pub fn query_form(
    page: &Page,
    frames: &[Page],
    tipo: &str,
    ano: i32,
) -> Result<Option<FormSubmission>, ScrapeError> {
    let doc = Html::parse_document(&page.body);
    let Some(tipo_select) = doc.select(&TIPO_SELECT).next() else {
        return Ok(None);
    };
    let form = dom::nearest_ancestor(tipo_select, "form");
    let scope = form.unwrap_or_else(|| doc.root_element());

    let tipo_value = option_value(tipo_select, tipo).ok_or_else(|| ScrapeError::OptionNotFound {
        select: "TipoEmis",
        value: tipo.to_string(),
    })?;
    let ano_value = match scope.select(&ANO_SELECT).next() {
        Some(select) => ano_option(select, ano)?,
        None => ano_in_frames(frames, ano)?,
    };

    let mut fields = Vec::new();
    let mut clicked = false;
    for control in scope.select(&CONTROLS) {
        let el = control.value();
        let Some(name) = el.attr("name") else { continue };
        match el.name() {
            "select" => {
                let value = match name {
                    "TipoEmis" => Some(tipo_value.clone()),
                    "Ano" => Some(ano_value.clone()),
                    _ => default_option_value(control),
                };
                if let Some(value) = value {
                    fields.push((name.to_string(), value));
                }
            }
            "textarea" => fields.push((name.to_string(), control.text().collect())),
            _ => {
                let kind = el.attr("type").unwrap_or("text").to_ascii_lowercase();
                let value = el.attr("value").unwrap_or_default();
                match kind.as_str() {
                    "button" | "submit" | "image" => {
                        if !clicked && name == "dd" && value.trim_start().starts_with("Procura") {
                            fields.push((name.to_string(), value.to_string()));
                            clicked = true;
                        }
                    }
                    "reset" | "file" => {}
                    "checkbox" | "radio" => {
                        if el.attr("checked").is_some() {
                            let value = if value.is_empty() { "on" } else { value };
                            fields.push((name.to_string(), value.to_string()));
                        }
                    }
                    _ => fields.push((name.to_string(), value.to_string())),
                }
            }
        }
    }
    if !fields.iter().any(|(name, _)| name == "Ano") {
        fields.push(("Ano".to_string(), ano_value));
    }

    let action = match form.and_then(|f| f.value().attr("action")) {
        Some(action) if !action.trim().is_empty() => page
            .url
            .join(action.trim())
            .map_err(|_| ScrapeError::Url(action.to_string()))?,
        _ => page.url.clone(),
    };
    let method = match form.and_then(|f| f.value().attr("method")) {
        Some(m) if m.eq_ignore_ascii_case("post") => FormMethod::Post,
        _ => FormMethod::Get,
    };

    Ok(Some(FormSubmission {
        action,
        method,
        fields,
    }))
}

fn is_next_link(a: ElementRef<'_>) -> bool {
    let text = dom::text_of(a).to_lowercase();
    NEXT_PAGE_MARKERS.iter().any(|m| text.contains(m))
}

/// Record links and the next-page link of a results document.
///
/// Returns `None` when no selector matches anything in this document.
pub fn result_links(page: &Page) -> Option<ResultLinks> {
    let doc = Html::parse_document(&page.body);
    for css in RESULT_LINK_SELECTORS {
        let Ok(selector) = Selector::parse(css) else { continue };
        let anchors: Vec<ElementRef<'_>> = doc.select(&selector).collect();
        if anchors.is_empty() {
            continue;
        }
        let records = anchors
            .into_iter()
            .filter(|a| !is_next_link(*a))
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| resolve(&page.url, href))
            .collect();

        let next_anchor = doc.select(&ANCHOR).find(|a| is_next_link(*a));
        let next = next_anchor.and_then(|a| {
            let href = a.value().attr("href").unwrap_or_default();
            let url = resolve(&page.url, href);
            if url.is_none() {
                warn!(href, "Next-page link cannot be followed without a browser");
            }
            url
        });
        return Some(ResultLinks { records, next });
    }
    None
}

/// Load the consultation page and submit the query form.
#[instrument(level = "info", skip(fetcher, opts), fields(tipo = %opts.tipo, ano = opts.ano))]
pub async fn submit_query<F: Fetch>(fetcher: &F, opts: &ScrapeOptions) -> Result<Page, ScrapeError> {
    let start = Url::parse(&opts.start_url).map_err(|_| ScrapeError::Url(opts.start_url.clone()))?;
    let landing = fetcher.get(&start).await?;

    let docs = expand_frames(fetcher, landing).await;
    let mut submission = None;
    for doc in &docs {
        if let Some(form) = query_form(doc, &docs, &opts.tipo, opts.ano)? {
            submission = Some(form);
            break;
        }
    }
    let form = submission.ok_or(ScrapeError::LayoutChanged("select[name=TipoEmis]"))?;
    info!(action = %form.action, fields = form.fields.len(), "Submitting query");

    sleep(opts.delay).await;
    let page = match form.method {
        FormMethod::Post => fetcher.post_form(&form.action, &form.fields).await?,
        FormMethod::Get => {
            let mut url = form.action.clone();
            url.query_pairs_mut().clear().extend_pairs(&form.fields);
            fetcher.get(&url).await?
        }
    };
    debug!(preview = %truncate_for_log(&page.body, 300), "Query response");
    Ok(page)
}

/// Collect record URLs from every results page, de-duplicated in order.
#[instrument(level = "info", skip_all, fields(url = %first.url))]
pub async fn collect_result_hrefs<F: Fetch>(fetcher: &F, first: Page, delay: Duration) -> Vec<Url> {
    let mut hrefs = Vec::new();
    let mut visited: HashSet<Url> = HashSet::new();
    let mut page = first;

    for page_no in 1..=MAX_RESULT_PAGES {
        visited.insert(page.url.clone());
        let docs = expand_frames(fetcher, page).await;
        let Some(links) = docs.iter().find_map(result_links) else {
            break;
        };
        debug!(page_no, records = links.records.len(), "Results page");
        hrefs.extend(links.records);

        let Some(next) = links.next else { break };
        if visited.contains(&next) {
            debug!(%next, "Next page already visited");
            break;
        }
        sleep(delay).await;
        page = match fetcher.get(&next).await {
            Ok(p) => p,
            Err(e) => {
                warn!(%next, error = %e, "Could not load next results page");
                break;
            }
        };
    }

    let unique: Vec<Url> = hrefs.into_iter().unique().collect();
    info!(count = unique.len(), "Collected record links");
    unique
}

/// Open one record and extract its rows.
#[instrument(level = "info", skip(fetcher, url), fields(%url))]
pub async fn extract_record<F: Fetch>(fetcher: &F, url: &Url, ano: i32) -> Result<Vec<RegistroDetalhe>, ScrapeError> {
    let page = fetcher.get(url).await?;
    let docs = expand_frames(fetcher, page).await;
    let main = &docs[0];
    let container = docs
        .iter()
        .find(|d| sre_record::is_record_body(&d.body))
        .unwrap_or(main);
    Ok(sre_record::extract_details(&main.body, &container.body, url.as_str(), ano))
}

/// Run a full query: search, visit every record, persist.
#[instrument(level = "info", skip(fetcher, opts), fields(tipo = %opts.tipo, ano = opts.ano, json_out = %opts.json_out.display()))]
pub async fn select_and_extract<F: Fetch>(fetcher: &F, opts: &ScrapeOptions) -> Result<ScrapeReport, ScrapeError> {
    let results = submit_query(fetcher, opts).await?;
    sleep(opts.delay).await;

    let mut hrefs = collect_result_hrefs(fetcher, results, opts.delay).await;
    if hrefs.is_empty() {
        return Err(ScrapeError::NoRecords);
    }
    if let Some(max) = opts.max_records {
        hrefs.truncate(max);
    }

    let total = hrefs.len();
    let outcomes: Vec<Option<Vec<RegistroDetalhe>>> = stream::iter(hrefs.iter().enumerate())
        .then(|(i, href)| async move {
            if i > 0 {
                sleep(opts.delay).await;
            }
            match extract_record(fetcher, href, opts.ano).await {
                Ok(rows) => {
                    info!(index = i + 1, total, species = rows.len(), %href, "Record extracted");
                    Some(rows)
                }
                Err(e) => {
                    warn!(index = i + 1, total, %href, error = %e, "Record failed; skipping");
                    None
                }
            }
        })
        .collect()
        .await;

    let records_failed = outcomes.iter().filter(|o| o.is_none()).count();
    let rows: Vec<RegistroDetalhe> = outcomes.into_iter().flatten().flatten().collect();

    if let Some(csv_out) = &opts.csv_out {
        records::write_csv(csv_out, &rows).await?;
        info!(path = %csv_out.display(), "CSV saved");
    }
    let total_json = records::save_or_update_json(&opts.json_out, &rows).await?;
    info!(path = %opts.json_out.display(), total_json, "JSON updated");

    Ok(ScrapeReport {
        rows,
        total_json,
        records_visited: total,
        records_failed,
    })
}
