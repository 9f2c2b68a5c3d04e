//! Command-line interface definitions.
//!
//! Search credentials can be given as flags or through the environment
//! variables the Google tooling already uses; an optional YAML file fills
//! whatever neither provides.

use crate::batch::BatchOptions;
use crate::config::{
    self, ConfigError, DEFAULT_PAGES, DEFAULT_TOP, MAX_PAGES, MAX_TOP, MIN_PAGES, MIN_TOP,
    ProviderKind, RawSettings, Settings,
};
use crate::scrapers::sre::{DEFAULT_ANO, DEFAULT_TIPO};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Word-network graphs from news titles, and the CVM SRE offering scraper.
///
/// # Examples
///
/// ```sh
/// # Graph of words around "corrupcao" from two result pages
/// vinculos graph --query corrupcao --pages 2 --output-dir reports
///
/// # Check search credentials
/// vinculos test-connection --provider vertex
///
/// # IPO records for several years, one JSON per year
/// vinculos sre --anos "2004-2006" --json-out "data/sre_{ano}.json"
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search news titles and write titles.txt, words.csv and graph.html
    Graph {
        #[command(flatten)]
        search: SearchArgs,

        /// Directory for the generated files
        #[arg(short, long, default_value = "reports")]
        output_dir: PathBuf,
    },
    /// Run a one-page search and report how many titles came back
    TestConnection {
        #[command(flatten)]
        search: SearchArgs,
    },
    /// Scrape IPO records from the CVM SRE consultation pages
    Sre(SreArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct SearchArgs {
    /// Optional path to a YAML settings file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Search backend
    #[arg(long, env = "SEARCH_PROVIDER", value_enum)]
    pub provider: Option<ProviderKind>,

    /// Google Custom Search API key
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Programmable Search Engine id
    #[arg(long, env = "GOOGLE_CSE_ID")]
    pub cx: Option<String>,

    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    pub project_id: Option<String>,

    /// Vertex AI Search location
    #[arg(long, env = "VERTEX_LOCATION")]
    pub location: Option<String>,

    #[arg(long, env = "VERTEX_ENGINE_ID")]
    pub engine_id: Option<String>,

    /// Service-account JSON key file
    #[arg(long, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials: Option<PathBuf>,

    /// Ready-made OAuth access token, used when no key file is given
    #[arg(long, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[arg(short, long)]
    pub query: Option<String>,

    /// Result pages to fetch (1-10); anything unparsable means 1
    #[arg(short, long)]
    pub pages: Option<String>,

    /// Words shown in the graph (5-200); anything unparsable means 30
    #[arg(short, long)]
    pub top: Option<String>,
}

impl SearchArgs {
    fn raw(&self) -> RawSettings {
        RawSettings {
            provider: self.provider,
            api_key: self.api_key.clone(),
            cx: self.cx.clone(),
            project_id: self.project_id.clone(),
            location: self.location.clone(),
            engine_id: self.engine_id.clone(),
            credentials_path: self.credentials.clone(),
            access_token: self.access_token.clone(),
            query: self.query.clone(),
            pages: self
                .pages
                .as_deref()
                .map(|p| config::parse_int_lenient(p, DEFAULT_PAGES, MIN_PAGES, MAX_PAGES)),
            top: self
                .top
                .as_deref()
                .map(|t| config::parse_int_lenient(t, DEFAULT_TOP, MIN_TOP, MAX_TOP)),
        }
    }

    /// Merge flags over the settings file and validate.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let file = match &self.config {
            Some(path) => config::load_settings_file(path)?,
            None => RawSettings::default(),
        };
        config::normalize_settings(self.raw().or(file))
    }
}

#[derive(Args, Debug, Clone)]
pub struct SreArgs {
    /// Offering type, by option value or label
    #[arg(long, default_value = DEFAULT_TIPO)]
    pub tipo: String,

    /// Years: "2005", "2004,2006" or "2004-2008; 2010"
    #[arg(long, default_value_t = DEFAULT_ANO.to_string())]
    pub anos: String,

    /// JSON store; `{ano}` is replaced by the year
    #[arg(long, default_value = "data/output/sre_consulta.json")]
    pub json_out: String,

    /// Optional CSV export of each run; `{ano}` is replaced by the year
    #[arg(long)]
    pub csv_out: Option<String>,

    /// Visit at most this many records per year
    #[arg(long)]
    pub max_records: Option<usize>,

    /// Pause between page loads, in milliseconds
    #[arg(long, default_value_t = 800)]
    pub delay_ms: u64,

    /// Write the rows extracted in this run to a JSON file
    #[arg(long)]
    pub dump_run: Option<PathBuf>,

    /// Write the merged JSON contents of every year to a JSON file
    #[arg(long)]
    pub dump_merged: Option<PathBuf>,
}

impl SreArgs {
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            tipo: self.tipo.trim().to_string(),
            json_template: self.json_out.clone(),
            csv_template: self.csv_out.clone().filter(|c| !c.trim().is_empty()),
            max_records: self.max_records,
            delay: Duration::from_millis(self.delay_ms),
            start_url: None,
        }
    }
}
