//! jarida-db — storage layer for gazette tender records.
//!
//! PostgreSQL with pgvector. One row per tender, at most one embedding per
//! tender, and a UNIQUE fingerprint constraint that makes persistence the
//! final line of defence against duplicates: insert and embedding write
//! happen in one transaction, and a fingerprint conflict turns the whole
//! thing into a no-op.

pub mod error;
pub mod memory;
pub mod schema;
pub mod store;

pub use error::{DbError, Result};
pub use memory::MemoryTenderStore;
pub use schema::{EnrichmentUpdate, NewTender, TenderRow, EMBEDDING_DIM};
pub use store::{connect, InsertOutcome, PgTenderStore, TenderStore};
