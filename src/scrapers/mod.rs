//! Scrapers for the CVM SRE public consultation site.
//!
//! The work is split in two phases, like any index-then-fetch scraper:
//!
//! 1. **Indexing**: submit the query form and collect record links across
//!    result pages ([`sre`])
//! 2. **Extraction**: read each record page into rows ([`sre_record`])
//!
//! # Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`sre`] | Frame expansion, form submission, pagination, persistence |
//! | [`sre_record`] | Header labels, `REGISTROS` and `ESPÉCIES` tables of one record |
//! | [`dom`] | Label and table lookups shared by both |
//!
//! HTML parsing happens in plain functions over `&str` bodies so no parsed
//! document is held across an `.await`.

pub mod dom;
pub mod sre;
pub mod sre_record;
