//! Row types and DDL for the tender store.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Embedding dimension (voyage-law-2 outputs 1024-dim vectors).
pub const EMBEDDING_DIM: usize = 1024;

/// A persisted tender record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenderRow {
    pub id:               Uuid,
    /// Identifier assigned by the gazette portal.
    pub external_id:      String,
    pub category:         String,
    pub title:            String,
    pub edition_no:       Option<String>,
    pub publish_date:     Option<NaiveDate>,
    /// Full extracted announcement text.
    pub body:             String,
    /// Which extraction stage produced the body: render, edition_ocr, page_vision.
    pub extraction_stage: String,
    pub language:         String,
    pub quality_score:    f64,
    pub arabic_ratio:     f64,
    pub ministry:         Option<String>,
    pub tender_no:        Option<String>,
    pub fee:              Option<String>,
    pub contact:          Option<String>,
    pub meeting_date:     Option<NaiveDate>,
    pub meeting_location: Option<String>,
    pub deadline:         Option<NaiveDate>,
    /// Deadline as originally extracted, kept when a correction was applied.
    pub deadline_original:   Option<NaiveDate>,
    pub deadline_confidence: Option<f64>,
    pub deadline_note:       Option<String>,
    /// JSON array of `{recorded_at, deadline}` entries, newest last.
    pub deadline_history: serde_json::Value,
    pub is_postponed:     bool,
    /// JSON array of anomaly strings from validation.
    pub anomalies:        serde_json::Value,
    pub summary_en:       Option<String>,
    pub summary_ar:       Option<String>,
    /// Duplicate-detection key, unique across the table.
    pub fingerprint:      String,
    pub created_at:       DateTime<Utc>,
    pub updated_at:       DateTime<Utc>,
}

/// Fields for a fresh insert. Timestamps and id are assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTender {
    pub external_id:      String,
    pub category:         String,
    pub title:            String,
    pub edition_no:       Option<String>,
    pub publish_date:     Option<NaiveDate>,
    pub body:             String,
    pub extraction_stage: String,
    pub language:         String,
    pub quality_score:    f64,
    pub arabic_ratio:     f64,
    pub ministry:         Option<String>,
    pub tender_no:        Option<String>,
    pub fee:              Option<String>,
    pub contact:          Option<String>,
    pub meeting_date:     Option<NaiveDate>,
    pub meeting_location: Option<String>,
    pub deadline:         Option<NaiveDate>,
    pub deadline_original:   Option<NaiveDate>,
    pub deadline_confidence: Option<f64>,
    pub deadline_note:       Option<String>,
    pub anomalies:        Vec<String>,
    pub summary_en:       Option<String>,
    pub summary_ar:       Option<String>,
    pub fingerprint:      String,
}

/// Fields rewritten when a record is re-enriched. The stored listing
/// identity (external_id, category, fingerprint) never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentUpdate {
    pub body:             String,
    pub extraction_stage: String,
    pub language:         String,
    pub quality_score:    f64,
    pub arabic_ratio:     f64,
    pub ministry:         Option<String>,
    pub tender_no:        Option<String>,
    pub fee:              Option<String>,
    pub contact:          Option<String>,
    pub meeting_date:     Option<NaiveDate>,
    pub meeting_location: Option<String>,
    pub deadline:         Option<NaiveDate>,
    pub deadline_original:   Option<NaiveDate>,
    pub deadline_confidence: Option<f64>,
    pub deadline_note:       Option<String>,
    /// Full replacement history, already extended by the caller when a
    /// postponement was detected.
    pub deadline_history: serde_json::Value,
    pub is_postponed:     bool,
    pub anomalies:        Vec<String>,
    pub summary_en:       Option<String>,
    pub summary_ar:       Option<String>,
}

/// Schema DDL, applied idempotently at startup.
pub const SCHEMA_SQL: &str = r#"
CREATE EXTENSION IF NOT EXISTS vector;

CREATE TABLE IF NOT EXISTS tenders (
    id                  UUID PRIMARY KEY DEFAULT gen_random_uuid(),
    external_id         TEXT NOT NULL,
    category            TEXT NOT NULL,
    title               TEXT NOT NULL,
    edition_no          TEXT,
    publish_date        DATE,
    body                TEXT NOT NULL,
    extraction_stage    TEXT NOT NULL,
    language            TEXT NOT NULL DEFAULT 'ar',
    quality_score       DOUBLE PRECISION NOT NULL DEFAULT 0,
    arabic_ratio        DOUBLE PRECISION NOT NULL DEFAULT 0,
    ministry            TEXT,
    tender_no           TEXT,
    fee                 TEXT,
    contact             TEXT,
    meeting_date        DATE,
    meeting_location    TEXT,
    deadline            DATE,
    deadline_original   DATE,
    deadline_confidence DOUBLE PRECISION,
    deadline_note       TEXT,
    deadline_history    JSONB NOT NULL DEFAULT '[]'::jsonb,
    is_postponed        BOOLEAN NOT NULL DEFAULT FALSE,
    anomalies           JSONB NOT NULL DEFAULT '[]'::jsonb,
    summary_en          TEXT,
    summary_ar          TEXT,
    fingerprint         TEXT NOT NULL UNIQUE,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_tenders_category ON tenders (category);
CREATE INDEX IF NOT EXISTS idx_tenders_external ON tenders (external_id, category);
CREATE INDEX IF NOT EXISTS idx_tenders_deadline ON tenders (deadline);

CREATE TABLE IF NOT EXISTS tender_embeddings (
    tender_id  UUID PRIMARY KEY REFERENCES tenders(id) ON DELETE CASCADE,
    embedding  vector(1024) NOT NULL,
    model      TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;
