//! Field extraction from a single SRE offering record page.
//!
//! A record page has three parts:
//! - a header of `LABEL : VALUE` rows (issuer, process number, IPO flag, ...)
//! - a `REGISTROS` table whose first data row holds the registration date and number
//! - an `ESPÉCIES` table with one row per share class on offer
//!
//! The species table also carries footers and notes ("Volume Total:",
//! "** Dispensa ...") in the same columns, which [`is_species_row`] filters.

use super::dom::{self, H2};
use crate::models::{RecordHeader, RegistroDetalhe, SpeciesRow};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;

pub const REGISTROS_TITLE: &str = "REGISTROS";
pub const ESPECIES_TITLE: &str = "ESPÉCIES";

const LABELS_NUMERO_PROCESSO: &[&str] =
    &["Nº do Processo", "No do Processo", "Nº Processo"];
const LABELS_DATA_PROTOCOLO: &[&str] = &["Data Protocolo", "Dt Protocolo", "Data de Protocolo"];
const LABELS_ANALISTA: &[&str] = &["Analista"];
const LABELS_EMISSORA: &[&str] = &["Emissora", "Companhia"];
const LABELS_IPO: &[&str] = &["IPO"];
const LABELS_LIDER: &[&str] = &["Líder", "Lider"];
const LABELS_ENC_DISTRIBUICAO: &[&str] = &[
    "Encer. Distribuição",
    "Encerramento Distribuição",
    "Encerr. Distribuição",
    "Encer. Distribuicao",
];

/// Share types seen on equity offerings.
const ALLOWED_TIPOS: &[&str] = &[
    "AO", "AP", "ON", "PN", "PNA", "PNB", "PNC", "PND", "PNE", "UNIT", "UNT", "OR", "OS", "AR",
    "BP", "BR", "CS",
];

const FOOTER_PREFIXES: &[&str] = &[
    "VOLUME TOTAL",
    "**",
    "OBS",
    "DISPENSA",
    "DISPOSITIVO",
    "NOTA",
    "OBSERVA",
];

static TIPO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{1,5}$").unwrap());
static SLASH_SPACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*/\s*").unwrap());

/// A species type is valid if it is a known code or 1-5 uppercase letters.
pub fn looks_like_valid_tipo(tipo: &str) -> bool {
    let t = tipo.trim().to_uppercase();
    if t.is_empty() {
        return false;
    }
    ALLOWED_TIPOS.contains(&t.as_str()) || TIPO_RE.is_match(&t)
}

/// Footers and notes that share the species table.
pub fn is_footer_or_note(text: &str) -> bool {
    let t = text.trim().to_uppercase();
    FOOTER_PREFIXES.iter().any(|p| t.starts_with(p))
}

/// `CVM / SRE /REM/2005/ 005` becomes `CVM/SRE/REM/2005/005`.
pub fn normalize_registro_numero(s: &str) -> String {
    let s = s.trim();
    if s.is_empty() {
        return String::new();
    }
    dom::normalize_space(&SLASH_SPACES_RE.replace_all(s, "/"))
}

fn has_some_digit(values: &[&str]) -> bool {
    values.iter().any(|v| v.chars().any(|c| c.is_ascii_digit()))
}

/// Whether a species-table row describes an actual share class.
pub fn is_species_row(row: &SpeciesRow) -> bool {
    let all = [
        &row.tipo,
        &row.classe,
        &row.quantidade,
        &row.preco,
        &row.volume,
        &row.garantidos,
        &row.sobras,
    ];
    if all.iter().all(|v| v.is_empty()) {
        return false;
    }
    if is_footer_or_note(&row.tipo) || !looks_like_valid_tipo(&row.tipo) {
        return false;
    }
    has_some_digit(&[row.quantidade.as_str(), row.preco.as_str(), row.volume.as_str()])
}

fn species_from_cells(cells: &[String]) -> SpeciesRow {
    let cell = |i: usize| cells.get(i).cloned().unwrap_or_default();
    SpeciesRow {
        tipo: cell(0),
        classe: cell(1),
        quantidade: cell(2),
        preco: cell(3),
        volume: cell(4),
        garantidos: cell(5),
        sobras: cell(6),
    }
}

pub fn extract_header(doc: &Html) -> RecordHeader {
    RecordHeader {
        numero_processo: dom::value_by_label(doc, LABELS_NUMERO_PROCESSO),
        data_protocolo: dom::value_by_label(doc, LABELS_DATA_PROTOCOLO),
        analista: dom::value_by_label(doc, LABELS_ANALISTA),
        emissora: dom::value_by_label(doc, LABELS_EMISSORA),
        ipo: dom::value_by_label(doc, LABELS_IPO).to_uppercase(),
        lider: dom::value_by_label(doc, LABELS_LIDER),
        enc_distribuicao: dom::value_by_label(doc, LABELS_ENC_DISTRIBUICAO),
    }
}

/// `(date, number)` from the first data row of the `REGISTROS` table.
pub fn extract_registro(doc: &Html) -> (String, String) {
    for table in dom::tables_titled(doc, REGISTROS_TITLE) {
        if let Some(first) = dom::data_rows(table).into_iter().find(|r| !r.is_empty()) {
            let data = first.first().cloned().unwrap_or_default();
            let numero = first.get(1).map(|n| normalize_registro_numero(n)).unwrap_or_default();
            return (data, numero);
        }
    }
    (String::new(), String::new())
}

/// Share-class rows of the `ESPÉCIES` table, footers and notes removed.
pub fn extract_species(doc: &Html) -> Vec<SpeciesRow> {
    for table in dom::tables_titled(doc, ESPECIES_TITLE) {
        let rows: Vec<SpeciesRow> = dom::data_rows(table)
            .iter()
            .map(|cells| species_from_cells(cells))
            .filter(is_species_row)
            .collect();
        if !rows.is_empty() {
            return rows;
        }
    }
    Vec::new()
}

/// Whether a document is the one holding the record body.
pub fn is_record_body(body: &str) -> bool {
    let doc = Html::parse_document(body);
    dom::has_bold(&doc, REGISTROS_TITLE)
}

/// Turn a record page into persisted rows, one per species.
///
/// `main` is the top-level document and `container` the (possibly framed)
/// document holding the record body. A record whose IPO flag is present and
/// not `SIM` yields nothing; a missing flag is accepted.
pub fn extract_details(main: &str, container: &str, registro_link: &str, ano: i32) -> Vec<RegistroDetalhe> {
    let container_doc = Html::parse_document(container);
    let header = extract_header(&container_doc);
    if !header.ipo.is_empty() && header.ipo != "SIM" {
        return Vec::new();
    }

    let (registro_data, registro_numero) = extract_registro(&container_doc);
    let species = extract_species(&container_doc);

    let main_doc = Html::parse_document(main);
    let mut registro_texto = dom::first_text(&main_doc, &H2);
    if registro_texto.is_empty() {
        registro_texto = dom::first_text(&container_doc, &H2);
    }

    RegistroDetalhe::flatten(
        ano,
        registro_link,
        &registro_texto,
        &header,
        (registro_data.as_str(), registro_numero.as_str()),
        &species,
    )
}
