//! Data models for CVM/SRE offering records.
//!
//! This module defines the structures produced by the SRE scraper:
//! - [`RecordHeader`]: label/value fields read once per record page
//! - [`SpeciesRow`]: one row of the record's `ESPÉCIES` table
//! - [`RegistroDetalhe`]: a flattened header + species row, the unit that is
//!   persisted to JSON and CSV
//!
//! Field names are kept in Portuguese because they are the column names of
//! the persisted files, and existing files must keep merging.

use serde::{Deserialize, Serialize};

/// Header fields found by label lookup on a record page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordHeader {
    pub numero_processo: String,
    pub data_protocolo: String,
    pub analista: String,
    pub emissora: String,
    /// Uppercased; empty when the page has no IPO field.
    pub ipo: String,
    pub lider: String,
    pub enc_distribuicao: String,
}

/// One species (share class) line of an offering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeciesRow {
    pub tipo: String,
    pub classe: String,
    pub quantidade: String,
    pub preco: String,
    pub volume: String,
    pub garantidos: String,
    pub sobras: String,
}

/// Column order of [`RegistroDetalhe`] in CSV exports. Matches the field order.
pub const CSV_COLUMNS: [&str; 19] = [
    "ano",
    "registro_link",
    "registro_texto",
    "emissora",
    "numero_processo",
    "data_protocolo",
    "analista",
    "ipo",
    "lider",
    "enc_distribuicao",
    "especie_tipo",
    "especie_classe",
    "especie_quantidade",
    "especie_preco",
    "especie_volume",
    "especie_garantidos",
    "especie_sobras",
    "registro_data",
    "registro_numero",
];

/// A single persisted row: one record page crossed with one species.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistroDetalhe {
    pub ano: i32,
    pub registro_link: String,
    pub registro_texto: String,
    pub emissora: String,
    pub numero_processo: String,
    pub data_protocolo: String,
    pub analista: String,
    pub ipo: String,
    pub lider: String,
    pub enc_distribuicao: String,
    pub especie_tipo: String,
    pub especie_classe: String,
    pub especie_quantidade: String,
    pub especie_preco: String,
    pub especie_volume: String,
    pub especie_garantidos: String,
    pub especie_sobras: String,
    pub registro_data: String,
    pub registro_numero: String,
}

impl RegistroDetalhe {
    /// Flatten a record page's parts into one row per species.
    pub fn flatten(
        ano: i32,
        registro_link: &str,
        registro_texto: &str,
        header: &RecordHeader,
        registro: (&str, &str),
        species: &[SpeciesRow],
    ) -> Vec<RegistroDetalhe> {
        let (registro_data, registro_numero) = registro;
        species
            .iter()
            .map(|esp| RegistroDetalhe {
                ano,
                registro_link: registro_link.to_string(),
                registro_texto: registro_texto.to_string(),
                emissora: header.emissora.clone(),
                numero_processo: header.numero_processo.clone(),
                data_protocolo: header.data_protocolo.clone(),
                analista: header.analista.clone(),
                ipo: header.ipo.clone(),
                lider: header.lider.clone(),
                enc_distribuicao: header.enc_distribuicao.clone(),
                especie_tipo: esp.tipo.clone(),
                especie_classe: esp.classe.clone(),
                especie_quantidade: esp.quantidade.clone(),
                especie_preco: esp.preco.clone(),
                especie_volume: esp.volume.clone(),
                especie_garantidos: esp.garantidos.clone(),
                especie_sobras: esp.sobras.clone(),
                registro_data: registro_data.to_string(),
                registro_numero: registro_numero.to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_one_row_per_species() {
        let header = RecordHeader {
            emissora: "NATURA COSMETICOS S.A.".into(),
            ipo: "SIM".into(),
            ..Default::default()
        };
        let species = vec![
            SpeciesRow {
                tipo: "ON".into(),
                quantidade: "10".into(),
                ..Default::default()
            },
            SpeciesRow {
                tipo: "PN".into(),
                quantidade: "20".into(),
                ..Default::default()
            },
        ];
        let rows = RegistroDetalhe::flatten(
            2004,
            "https://x/r?id=1",
            "Registro",
            &header,
            ("26/05/2004", "CVM/SRE/REM/2004/010"),
            &species,
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].especie_tipo, "PN");
        assert_eq!(rows[0].registro_numero, "CVM/SRE/REM/2004/010");
        assert!(rows.iter().all(|r| r.emissora == "NATURA COSMETICOS S.A."));
    }

    #[test]
    fn test_serialized_field_names() {
        let row = RegistroDetalhe::flatten(
            2005,
            "l",
            "t",
            &RecordHeader::default(),
            ("d", "n"),
            &[SpeciesRow::default()],
        )
        .remove(0);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["ano"], 2005);
        assert_eq!(json["registro_numero"], "n");
        assert!(json.get("especie_sobras").is_some());
    }

    #[test]
    fn test_no_species_no_rows() {
        let rows = RegistroDetalhe::flatten(2005, "l", "t", &RecordHeader::default(), ("", ""), &[]);
        assert!(rows.is_empty());
    }
}
