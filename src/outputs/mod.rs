//! Output writers.
//!
//! # Submodules
//!
//! - [`records`]: the SRE JSON store (merge by key, atomic rewrite) and CSV export
//!
//! The graph pipeline writes its own report files; see `pipeline`.
//!
//! # Output Structure
//!
//! ```text
//! data/output/
//! ├── sre_consulta.json        # single year, or `--json-out` as given
//! ├── sre_consulta_2004.json   # multi-year batch without `{ano}`
//! └── sre_consulta_2005.json
//!
//! reports/
//! ├── titles.txt
//! ├── words.csv
//! └── graph.html
//! ```

pub mod records;
