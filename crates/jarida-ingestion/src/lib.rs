//! jarida-ingestion — the gazette tender ingestion and enrichment pipeline.
//!
//! Flow for one run: authenticate against the gazette portal, page through
//! category listings, drop already-known fingerprints before any expensive
//! work, run the extraction fallback chain on each new listing, validate and
//! correct extracted fields, embed, and persist one record at a time with
//! buffers released between items.

pub mod dates;
pub mod embedding;
pub mod extract;
pub mod fields;
pub mod fingerprint;
pub mod hijri;
pub mod models;
pub mod normalize;
pub mod persist;
pub mod pipeline;
pub mod portal;
pub mod quality;
pub mod summarize;

pub use models::{ExtractionResult, ExtractionStage, Listing};
pub use pipeline::{re_enrich_record, run_ingestion, IngestionRun, ListingSource, RunReport};
