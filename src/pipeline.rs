//! Titles → word counts → star graph.
//!
//! [`run_pipeline`] fetches titles from the configured search provider,
//! counts the words they share, and writes three files to the output
//! directory: `titles.txt`, `words.csv` and `graph.html`.

use crate::config::Settings;
use crate::graph::{build_star_graph, save_graph_html};
use crate::search::{SearchClient, SearchError};
use crate::text::{DEFAULT_MIN_LEN, WordCounts, filter_tokens, normalize, tokenize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

pub const NO_TITLES_MESSAGE: &str = "No titles found.";
/// Words listed by [`summary_lines`].
const SUMMARY_TOP: usize = 10;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("could not write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not build words.csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not write graph: {0}")]
    Graph(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Files written by a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFiles {
    pub titles: PathBuf,
    pub words: PathBuf,
    pub graph: PathBuf,
}

impl OutputFiles {
    fn in_dir(dir: &Path) -> Self {
        Self {
            titles: dir.join("titles.txt"),
            words: dir.join("words.csv"),
            graph: dir.join("graph.html"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub titles: Vec<String>,
    /// Every counted word, most common first.
    pub counts: Vec<(String, usize)>,
    /// `None` when nothing was written.
    pub files: Option<OutputFiles>,
    pub message: Option<String>,
}

/// Count the words of `titles`, leaving out the query itself.
pub fn count_words(titles: &[String], query: &str) -> Vec<(String, usize)> {
    let mut counts: WordCounts = titles
        .iter()
        .flat_map(|t| filter_tokens(tokenize(t), DEFAULT_MIN_LEN))
        .collect();
    let query_word = normalize(query.trim());
    if let Some(n) = counts.remove(&query_word) {
        debug!(query = %query_word, n, "Left the query out of the counts");
    }
    if counts.is_empty() {
        warn!("No words left after filtering");
    } else {
        debug!(words = counts.len(), "Counted words");
    }
    counts.most_common(None)
}

fn words_csv(counts: &[(String, usize)]) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["word", "count"])?;
    for (word, count) in counts {
        writer.write_record([word.as_str(), &count.to_string()])?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn write_file(path: &Path, content: String) -> Result<(), PipelineError> {
    fs::write(path, content).await.map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Count words of already fetched titles and write the report files.
#[instrument(level = "info", skip(titles), fields(titles = titles.len()))]
pub async fn build_report(
    titles: Vec<String>,
    query: &str,
    top: usize,
    output_dir: &Path,
) -> Result<PipelineReport, PipelineError> {
    if titles.is_empty() {
        warn!("Search returned no titles");
        return Ok(PipelineReport {
            titles,
            counts: Vec::new(),
            files: None,
            message: Some(NO_TITLES_MESSAGE.to_string()),
        });
    }

    let counts = count_words(&titles, query);
    let files = OutputFiles::in_dir(output_dir);
    fs::create_dir_all(output_dir)
        .await
        .map_err(|source| PipelineError::Io {
            path: output_dir.to_path_buf(),
            source,
        })?;

    let mut listing = titles.join("\n");
    listing.push('\n');
    write_file(&files.titles, listing).await?;

    let csv_text = words_csv(&counts)?;
    write_file(&files.words, csv_text).await?;

    let center = query.trim().to_lowercase();
    let leaves: Vec<(String, usize)> = counts.iter().take(top).cloned().collect();
    let graph = build_star_graph(&center, &leaves);
    save_graph_html(&graph, &files.graph)
        .await
        .map_err(PipelineError::Graph)?;

    info!(words = counts.len(), dir = %output_dir.display(), "Report written");
    Ok(PipelineReport {
        titles,
        counts,
        files: Some(files),
        message: None,
    })
}

/// Fetch titles for `settings.query` and build the report.
#[instrument(level = "info", skip(settings, search), fields(query = %settings.query, pages = settings.pages))]
pub async fn run_pipeline(
    settings: &Settings,
    search: &SearchClient,
    output_dir: &Path,
) -> Result<PipelineReport, PipelineError> {
    let titles = search.fetch_titles(&settings.query, settings.pages).await?;
    build_report(titles, &settings.query, settings.top, output_dir).await
}

/// Human readable summary of a run.
pub fn summary_lines(report: &PipelineReport) -> Vec<String> {
    if let Some(message) = &report.message {
        return vec![message.clone()];
    }
    let mut lines = vec![format!("Titles: {}", report.titles.len())];
    lines.push("Top words:".to_string());
    lines.extend(
        report
            .counts
            .iter()
            .take(SUMMARY_TOP)
            .map(|(word, count)| format!("  {word}: {count}")),
    );
    if let Some(files) = &report.files {
        lines.push(format!("Titles file: {}", files.titles.display()));
        lines.push(format!("Words file: {}", files.words.display()));
        lines.push(format!("Graph file: {}", files.graph.display()));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titles() -> Vec<String> {
        vec![
            "Corrupção: Polícia Federal investiga contratos".to_string(),
            "Polícia prende suspeitos de corrupção em contratos".to_string(),
            "Contratos sob suspeita".to_string(),
        ]
    }

    #[test]
    fn test_count_words_drops_query() {
        let counts = count_words(&titles(), "Corrupção");
        assert_eq!(counts[0], ("contratos".to_string(), 3));
        assert_eq!(counts[1], ("policia".to_string(), 2));
        assert!(counts.iter().all(|(w, _)| w != "corrupcao"));
    }

    #[test]
    fn test_count_words_only_query_and_stopwords() {
        let titles = vec!["Corrupção? Não, corrupção sem fim".to_string()];
        assert_eq!(count_words(&titles, " corrupção "), vec![("fim".to_string(), 1)]);
        let titles = vec!["Corrupção e mais corrupção".to_string()];
        assert!(count_words(&titles, "corrupção").is_empty());
    }

    #[tokio::test]
    async fn test_build_report_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");
        let report = build_report(titles(), " Corrupcao ", 2, &out).await.unwrap();
        let files = report.files.clone().unwrap();

        let listing = std::fs::read_to_string(&files.titles).unwrap();
        assert_eq!(listing.lines().count(), 3);

        let words = std::fs::read_to_string(&files.words).unwrap();
        let mut lines = words.lines();
        assert_eq!(lines.next(), Some("word,count"));
        assert_eq!(lines.next(), Some("contratos,3"));
        assert_eq!(words.lines().count(), report.counts.len() + 1);

        let html = std::fs::read_to_string(&files.graph).unwrap();
        assert!(html.contains("\"corrupcao\""));
        assert!(html.contains("\"policia\""));
        assert!(!html.contains("\"federal\""));
    }

    #[tokio::test]
    async fn test_no_titles_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");
        let report = build_report(Vec::new(), "x", 30, &out).await.unwrap();
        assert_eq!(report.message.as_deref(), Some(NO_TITLES_MESSAGE));
        assert!(report.files.is_none());
        assert!(!out.exists());
        assert_eq!(summary_lines(&report), vec![NO_TITLES_MESSAGE.to_string()]);
    }

    #[test]
    fn test_summary_lists_top_ten() {
        let report = PipelineReport {
            titles: vec!["a".into()],
            counts: (0..15).map(|i| (format!("w{i}"), 15 - i)).collect(),
            files: Some(OutputFiles::in_dir(Path::new("out"))),
            message: None,
        };
        let lines = summary_lines(&report);
        assert_eq!(lines[0], "Titles: 1");
        assert!(lines.contains(&"  w9: 6".to_string()));
        assert!(!lines.iter().any(|l| l.contains("w10")));
        assert!(lines.last().unwrap().ends_with("graph.html"));
    }
}
