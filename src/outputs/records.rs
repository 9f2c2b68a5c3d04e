//! JSON and CSV persistence for scraped SRE records.
//!
//! The JSON file is the long-lived store: each run reads it, merges the new
//! rows in by a unique key, and writes it back atomically. Rows are kept as
//! plain JSON objects so fields added by hand or by older versions survive
//! the round trip.
//!
//! # Merge Key
//!
//! `(ano, registro_link, registro_numero, especie_tipo, especie_classe)`,
//! every part but `ano` trimmed and lowercased.

use crate::models::{CSV_COLUMNS, RegistroDetalhe};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not serialize rows: {0}")]
    Json(#[from] serde_json::Error),
    #[error("could not write CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub type MergeKey = (String, String, String, String, String);

fn field_str(row: &Map<String, Value>, name: &str) -> String {
    match row.get(name) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Unique key identifying a persisted row.
pub fn make_key(row: &Map<String, Value>) -> MergeKey {
    let folded = |name: &str| field_str(row, name).trim().to_lowercase();
    (
        field_str(row, "ano"),
        folded("registro_link"),
        folded("registro_numero"),
        folded("especie_tipo"),
        folded("especie_classe"),
    )
}

fn ano_of(row: &Map<String, Value>) -> i64 {
    match row.get("ano") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn sort_rows(rows: &mut [Map<String, Value>]) {
    rows.sort_by(|a, b| {
        ano_of(a)
            .cmp(&ano_of(b))
            .then_with(|| field_str(a, "registro_numero").cmp(&field_str(b, "registro_numero")))
            .then_with(|| field_str(a, "emissora").cmp(&field_str(b, "emissora")))
    });
}

/// Rows from a JSON payload: a top-level array, or the first array found
/// among a top-level object's values. Non-object entries are skipped.
pub fn rows_from_value(value: Value) -> Vec<Map<String, Value>> {
    let list = match value {
        Value::Array(items) => items,
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    };
    list.into_iter()
        .filter_map(|v| match v {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect()
}

/// Load persisted rows. A missing or unreadable file is an empty store.
#[instrument(level = "debug", fields(path = %path.display()))]
pub async fn load_json_list(path: &Path) -> Vec<Map<String, Value>> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "No existing JSON store");
            return Vec::new();
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => rows_from_value(value),
        Err(e) => {
            warn!(error = %e, "Existing JSON store is not valid JSON; starting fresh");
            Vec::new()
        }
    }
}

/// Merge `new_rows` over `existing` by [`make_key`] and sort the result.
///
/// First occurrence decides a key's position; later rows with the same key
/// replace its content.
pub fn merge_rows(
    existing: Vec<Map<String, Value>>,
    new_rows: Vec<Map<String, Value>>,
) -> Vec<Map<String, Value>> {
    let mut positions: std::collections::HashMap<MergeKey, usize> = Default::default();
    let mut merged: Vec<Map<String, Value>> = Vec::new();
    for row in existing.into_iter().chain(new_rows) {
        let key = make_key(&row);
        match positions.get(&key) {
            Some(&i) => merged[i] = row,
            None => {
                positions.insert(key, merged.len());
                merged.push(row);
            }
        }
    }
    sort_rows(&mut merged);
    merged
}

/// Write `content` to `path` through a sibling `.tmp` file and a rename.
pub async fn atomic_write(path: &Path, content: &str) -> Result<(), PersistError> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp, content).await.map_err(io_err(&tmp))?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err(path))?;
    Ok(())
}

async fn ensure_parent(path: &Path) -> Result<(), PersistError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_err(parent)),
        _ => Ok(()),
    }
}

pub fn to_json_rows(rows: &[RegistroDetalhe]) -> Result<Vec<Map<String, Value>>, PersistError> {
    let value = serde_json::to_value(rows)?;
    Ok(rows_from_value(value))
}

/// Merge `rows` into the JSON store at `json_path` and return its new size.
#[instrument(level = "info", skip(rows), fields(path = %json_path.display(), new_rows = rows.len()))]
pub async fn save_or_update_json(json_path: &Path, rows: &[RegistroDetalhe]) -> Result<usize, PersistError> {
    ensure_parent(json_path).await?;
    let existing = load_json_list(json_path).await;
    let merged = merge_rows(existing, to_json_rows(rows)?);
    let text = serde_json::to_string_pretty(&merged)?;
    atomic_write(json_path, &text).await?;
    info!(total = merged.len(), "JSON store updated");
    Ok(merged.len())
}

/// Export rows as CSV with a header line, written even when `rows` is empty.
#[instrument(level = "info", skip(rows), fields(path = %csv_path.display(), rows = rows.len()))]
pub async fn write_csv(csv_path: &Path, rows: &[RegistroDetalhe]) -> Result<(), PersistError> {
    ensure_parent(csv_path).await?;
    let csv_err = |source: csv::Error| PersistError::Csv {
        path: csv_path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(CSV_COLUMNS).map_err(csv_err)?;
    for row in rows {
        writer.serialize(row).map_err(csv_err)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv_err(e.into_error().into()))?;
    tokio::fs::write(csv_path, bytes)
        .await
        .map_err(io_err(csv_path))?;
    info!("CSV written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordHeader, SpeciesRow};
    use serde_json::json;

    fn row(ano: i32, link: &str, numero: &str, tipo: &str, emissora: &str) -> RegistroDetalhe {
        let header = RecordHeader {
            emissora: emissora.into(),
            ipo: "SIM".into(),
            ..Default::default()
        };
        let species = SpeciesRow {
            tipo: tipo.into(),
            quantidade: "1".into(),
            ..Default::default()
        };
        RegistroDetalhe::flatten(ano, link, "t", &header, ("d", numero), &[species]).remove(0)
    }

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_make_key_folds_case_and_space() {
        let a = obj(json!({"ano": 2005, "registro_link": " HTTP://X ", "especie_tipo": "ON"}));
        let b = obj(json!({"ano": "2005", "registro_link": "http://x", "especie_tipo": "on", "especie_classe": null}));
        assert_eq!(make_key(&a), make_key(&b));
    }

    #[test]
    fn test_rows_from_value_shapes() {
        assert_eq!(rows_from_value(json!([{"a": 1}, 3])).len(), 1);
        assert_eq!(rows_from_value(json!({"meta": 1, "rows": [{"a": 1}, {"a": 2}]})).len(), 2);
        assert!(rows_from_value(json!("x")).is_empty());
    }

    #[test]
    fn test_merge_replaces_and_sorts() {
        let existing = vec![
            obj(json!({"ano": 2006, "registro_numero": "B", "emissora": "Z", "extra": "kept"})),
            obj(json!({"ano": 2005, "registro_numero": "A", "emissora": "Y", "lider": "old"})),
        ];
        let new_rows = vec![obj(json!({"ano": 2005, "registro_numero": "a", "emissora": "Y", "lider": "new"}))];
        let merged = merge_rows(existing, new_rows);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0]["lider"], "new");
        assert_eq!(merged[1]["extra"], "kept");
    }

    #[tokio::test]
    async fn test_save_or_update_json_merges_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("sre.json");

        let first = vec![row(2005, "l1", "CVM/SRE/REM/2005/002", "ON", "B"), row(2005, "l2", "CVM/SRE/REM/2005/001", "ON", "A")];
        assert_eq!(save_or_update_json(&path, &first).await.unwrap(), 2);

        let second = vec![row(2005, "L1", "cvm/sre/rem/2005/002", "on", "B2"), row(2006, "l3", "X", "PN", "C")];
        assert_eq!(save_or_update_json(&path, &second).await.unwrap(), 3);

        let stored = load_json_list(&path).await;
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0]["registro_numero"], "CVM/SRE/REM/2005/001");
        assert_eq!(stored[1]["emissora"], "B2");
        assert_eq!(stored[2]["ano"], 2006);
        assert!(!dir.path().join("out").join("sre.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_invalid_store_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sre.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_json_list(&path).await.is_empty());
        assert_eq!(save_or_update_json(&path, &[row(2005, "l", "n", "ON", "e")]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_non_ascii_kept_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sre.json");
        save_or_update_json(&path, &[row(2005, "l", "n", "ON", "CIA. BRASILEIRA DE DISTRIBUIÇÃO")])
            .await
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("DISTRIBUIÇÃO"));
        assert!(text.contains("\n  {"));
    }

    #[tokio::test]
    async fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sre.csv");
        write_csv(&path, &[row(2005, "l", "n", "ON", "Empresa, S.A.")]).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("ano,registro_link,registro_texto,emissora"));
        assert!(lines.next().unwrap().contains("\"Empresa, S.A.\""));
    }

    #[test]
    fn test_write_csv_header_matches_fields() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.serialize(row(2005, "l", "n", "ON", "E")).unwrap();
        let bytes = writer.into_inner().unwrap();
        let derived = String::from_utf8(bytes).unwrap();
        assert_eq!(derived.lines().next().unwrap(), CSV_COLUMNS.join(","));
    }

    #[tokio::test]
    async fn test_write_csv_without_rows_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vazio.csv");
        write_csv(&path, &[]).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, format!("{}\n", CSV_COLUMNS.join(",")));
    }
}
