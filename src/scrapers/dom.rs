//! Small DOM query helpers for the legacy table-based pages of the CVM site.
//!
//! The site lays out every record as nested `<table>`s with bold labels, so
//! most lookups are "find the `<b>` with this text, then walk to a nearby
//! cell or table".

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

pub static BOLD: Lazy<Selector> = Lazy::new(|| Selector::parse("b").unwrap());
pub static H2: Lazy<Selector> = Lazy::new(|| Selector::parse("h2").unwrap());
pub static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
pub static TR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
pub static FRAMES: Lazy<Selector> =
    Lazy::new(|| Selector::parse("frame[src], iframe[src]").unwrap());

/// Collapse runs of whitespace (including `&nbsp;`) and trim.
pub fn normalize_space(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text of an element with whitespace normalized.
///
/// Text nodes are concatenated as-is, so `N<sup>o</sup>` reads `No`.
pub fn text_of(el: ElementRef<'_>) -> String {
    normalize_space(&el.text().collect::<String>())
}

/// Closest ancestor element with the given tag name.
pub fn nearest_ancestor<'a>(el: ElementRef<'a>, name: &str) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == name)
}

/// Every ancestor element with the given tag name, innermost first.
pub fn ancestors_named<'a>(el: ElementRef<'a>, name: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .filter(move |a| a.value().name() == name)
}

/// Direct element children with one of the given tag names.
pub fn children_named<'a>(el: ElementRef<'a>, names: &'a [&'a str]) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    el.children()
        .filter_map(ElementRef::wrap)
        .filter(move |c| names.contains(&c.value().name()))
}

/// `<b>` elements whose normalized text equals `text`, in document order.
pub fn bolds_with_text<'a>(doc: &'a Html, text: &'a str) -> impl Iterator<Item = ElementRef<'a>> + 'a {
    doc.select(&BOLD).filter(move |b| text_of(*b) == text)
}

pub fn has_bold(doc: &Html, text: &str) -> bool {
    bolds_with_text(doc, text).next().is_some()
}

/// Read the value cell next to a bold label.
///
/// The expected markup is
/// `<td><font><b>LABEL</b></font></td><td><b>:</b></td><td>VALUE</td>`:
/// the value is the second `td` sibling after the label's own cell.
/// Each alternate label is tried in order until one yields non-empty text.
pub fn value_by_label(doc: &Html, labels: &[&str]) -> String {
    for label in labels {
        for b in bolds_with_text(doc, label) {
            let Some(cell) = nearest_ancestor(b, "td") else {
                continue;
            };
            let value = cell
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .filter(|s| s.value().name() == "td")
                .nth(1)
                .map(text_of)
                .unwrap_or_default();
            if !value.is_empty() {
                return value;
            }
        }
    }
    String::new()
}

/// 1-based position of a `tr` among the `tr` children of its parent.
fn row_position(tr: ElementRef<'_>) -> usize {
    1 + tr
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|s| s.value().name() == "tr")
        .count()
}

/// Data rows (third row onwards) under `table`, as lists of cell texts.
///
/// The first two rows of each titled table on the site are the title and
/// the column headers.
pub fn data_rows(table: ElementRef<'_>) -> Vec<Vec<String>> {
    table
        .select(&TR)
        .filter(|tr| row_position(*tr) > 2)
        .map(|tr| children_named(tr, &["td", "th"]).map(text_of).collect())
        .collect()
}

/// Tables enclosing the bold `title`, innermost first.
///
/// Callers widen the search outward when the innermost table holds only
/// the title.
pub fn tables_titled<'a>(doc: &'a Html, title: &'a str) -> Vec<ElementRef<'a>> {
    match bolds_with_text(doc, title).next() {
        Some(b) => ancestors_named(b, "table").collect(),
        None => Vec::new(),
    }
}

/// Text of the first element matching `selector`, or empty.
pub fn first_text(doc: &Html, selector: &Selector) -> String {
    doc.select(selector).next().map(text_of).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"
        <html><body>
        <table>
          <tr><td><font><b>Emissora</b></font></td><td><b>:</b></td><td><font> ACME   S.A. </font></td></tr>
          <tr><td><b>Analista</b></td><td><b>:</b></td><td></td></tr>
          <tr><td><b>Lider</b></td><td><b>:</b></td><td>BANCO X</td></tr>
        </table>
        <table>
          <tr><td colspan="2"><b>REGISTROS</b></td></tr>
          <tr><td>Data</td><td>Número</td></tr>
          <tr><td>26/05/2004</td><td>CVM/SRE/REM/2004/010</td></tr>
          <tr><td>01/06/2004</td><td>CVM/SRE/REM/2004/011</td></tr>
        </table>
        </body></html>"#;

    #[test]
    fn test_value_by_label() {
        let doc = Html::parse_document(RECORD);
        assert_eq!(value_by_label(&doc, &["Companhia", "Emissora"]), "ACME S.A.");
        assert_eq!(value_by_label(&doc, &["Líder", "Lider"]), "BANCO X");
        assert_eq!(value_by_label(&doc, &["Analista"]), "");
        assert_eq!(value_by_label(&doc, &["IPO"]), "");
    }

    #[test]
    fn test_data_rows_skip_title_and_header() {
        let doc = Html::parse_document(RECORD);
        let tables = tables_titled(&doc, "REGISTROS");
        assert_eq!(tables.len(), 1);
        let rows = data_rows(tables[0]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["26/05/2004", "CVM/SRE/REM/2004/010"]);
    }

    #[test]
    fn test_label_and_value_split_by_inline_markup() {
        let doc = Html::parse_document(
            r#"<table><tr>
                 <td><b>N<sup>o</sup> do Processo</b></td><td><b>:</b></td>
                 <td><font>RJ-2004</font><font>-01234</font></td>
               </tr></table>"#,
        );
        assert!(has_bold(&doc, "No do Processo"));
        assert_eq!(
            value_by_label(&doc, &["Nº do Processo", "No do Processo", "Nº Processo"]),
            "RJ-2004-01234"
        );
    }

    #[test]
    fn test_normalize_space() {
        assert_eq!(normalize_space("  a \n\t b\u{a0}c "), "a b c");
    }

    #[test]
    fn test_has_bold_and_first_text() {
        let doc = Html::parse_document("<h2> Registro  de Oferta </h2><b>REGISTROS</b>");
        assert!(has_bold(&doc, "REGISTROS"));
        assert!(!has_bold(&doc, "ESPÉCIES"));
        assert_eq!(first_text(&doc, &H2), "Registro de Oferta");
    }
}
