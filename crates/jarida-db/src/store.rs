//! Tender store: trait seam plus the PostgreSQL implementation.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

use jarida_common::config::DatabaseConfig;

use crate::error::{DbError, Result};
use crate::schema::{EnrichmentUpdate, NewTender, TenderRow, EMBEDDING_DIM, SCHEMA_SQL};

/// Embedding payload persisted alongside a tender.
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub vector: Vec<f32>,
    pub model:  String,
}

impl StoredEmbedding {
    fn check_dim(&self) -> Result<()> {
        if self.vector.len() != EMBEDDING_DIM {
            return Err(DbError::InvalidEmbeddingDimension {
                expected: EMBEDDING_DIM,
                actual:   self.vector.len(),
            });
        }
        Ok(())
    }
}

/// Result of an insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Uuid),
    /// The fingerprint already exists. Nothing was written, including the
    /// embedding.
    DuplicateSkip,
}

/// Storage operations the pipeline and job queue depend on.
#[async_trait]
pub trait TenderStore: Send + Sync {
    /// All fingerprints currently stored for a category. Loaded once per
    /// category at the start of a run for pre-extraction deduplication.
    async fn fingerprints(&self, category: &str) -> Result<HashSet<String>>;

    /// Insert a tender and its embedding in one transaction. A fingerprint
    /// conflict writes nothing and returns `DuplicateSkip`.
    async fn insert(
        &self,
        tender: &NewTender,
        embedding: Option<&StoredEmbedding>,
    ) -> Result<InsertOutcome>;

    async fn get(&self, id: Uuid) -> Result<Option<TenderRow>>;

    async fn find_by_external_id(
        &self,
        external_id: &str,
        category: &str,
    ) -> Result<Option<TenderRow>>;

    /// Most recent record carrying this tender number, if any. Used to
    /// detect reposted tenders with a moved deadline.
    async fn find_by_tender_no(
        &self,
        tender_no: &str,
        category: &str,
    ) -> Result<Option<TenderRow>>;

    /// Rewrite enrichment fields on an existing record, replacing the
    /// embedding in the same transaction when one is supplied.
    async fn apply_enrichment(
        &self,
        id: Uuid,
        update: &EnrichmentUpdate,
        embedding: Option<&StoredEmbedding>,
    ) -> Result<()>;

    async fn count(&self) -> Result<i64>;
}

/// Open a connection pool and apply the schema.
pub async fn connect(cfg: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .connect(&cfg.url)
        .await
        .map_err(|e| DbError::Connection(e.to_string()))?;
    sqlx::raw_sql(SCHEMA_SQL).execute(&pool).await?;
    Ok(pool)
}

/// PostgreSQL-backed tender store.
#[derive(Clone)]
pub struct PgTenderStore {
    pool: PgPool,
}

impl PgTenderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TenderStore for PgTenderStore {
    async fn fingerprints(&self, category: &str) -> Result<HashSet<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT fingerprint FROM tenders WHERE category = $1")
                .bind(category)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn insert(
        &self,
        tender: &NewTender,
        embedding: Option<&StoredEmbedding>,
    ) -> Result<InsertOutcome> {
        if let Some(e) = embedding {
            e.check_dim()?;
        }
        let anomalies = serde_json::to_value(&tender.anomalies)?;

        let mut tx = self.pool.begin().await?;

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO tenders
                (external_id, category, title, edition_no, publish_date,
                 body, extraction_stage, language, quality_score, arabic_ratio,
                 ministry, tender_no, fee, contact, meeting_date, meeting_location,
                 deadline, deadline_original, deadline_confidence, deadline_note,
                 anomalies, summary_en, summary_ar, fingerprint)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,
                    $13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24)
            ON CONFLICT (fingerprint) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&tender.external_id)
        .bind(&tender.category)
        .bind(&tender.title)
        .bind(&tender.edition_no)
        .bind(tender.publish_date)
        .bind(&tender.body)
        .bind(&tender.extraction_stage)
        .bind(&tender.language)
        .bind(tender.quality_score)
        .bind(tender.arabic_ratio)
        .bind(&tender.ministry)
        .bind(&tender.tender_no)
        .bind(&tender.fee)
        .bind(&tender.contact)
        .bind(tender.meeting_date)
        .bind(&tender.meeting_location)
        .bind(tender.deadline)
        .bind(tender.deadline_original)
        .bind(tender.deadline_confidence)
        .bind(&tender.deadline_note)
        .bind(&anomalies)
        .bind(&tender.summary_en)
        .bind(&tender.summary_ar)
        .bind(&tender.fingerprint)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(id) = inserted else {
            // Conflict: roll back so the duplicate leaves no trace.
            tx.rollback().await?;
            tracing::debug!(
                external_id = %tender.external_id,
                fingerprint = %tender.fingerprint,
                "Fingerprint conflict at insert, skipping"
            );
            return Ok(InsertOutcome::DuplicateSkip);
        };

        if let Some(e) = embedding {
            sqlx::query(
                "INSERT INTO tender_embeddings (tender_id, embedding, model) VALUES ($1, $2, $3)",
            )
            .bind(id)
            .bind(Vector::from(e.vector.clone()))
            .bind(&e.model)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(InsertOutcome::Inserted(id))
    }

    async fn get(&self, id: Uuid) -> Result<Option<TenderRow>> {
        let row = sqlx::query_as::<_, TenderRow>("SELECT * FROM tenders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
        category: &str,
    ) -> Result<Option<TenderRow>> {
        let row = sqlx::query_as::<_, TenderRow>(
            "SELECT * FROM tenders WHERE external_id = $1 AND category = $2 LIMIT 1",
        )
        .bind(external_id)
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_tender_no(
        &self,
        tender_no: &str,
        category: &str,
    ) -> Result<Option<TenderRow>> {
        let row = sqlx::query_as::<_, TenderRow>(
            r#"
            SELECT * FROM tenders
            WHERE tender_no = $1 AND category = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tender_no)
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn apply_enrichment(
        &self,
        id: Uuid,
        update: &EnrichmentUpdate,
        embedding: Option<&StoredEmbedding>,
    ) -> Result<()> {
        if let Some(e) = embedding {
            e.check_dim()?;
        }
        let anomalies = serde_json::to_value(&update.anomalies)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE tenders SET
                body = $2, extraction_stage = $3, language = $4,
                quality_score = $5, arabic_ratio = $6,
                ministry = $7, tender_no = $8, fee = $9, contact = $10,
                meeting_date = $11, meeting_location = $12,
                deadline = $13, deadline_original = $14,
                deadline_confidence = $15, deadline_note = $16,
                deadline_history = $17, is_postponed = $18,
                anomalies = $19, summary_en = $20, summary_ar = $21,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.body)
        .bind(&update.extraction_stage)
        .bind(&update.language)
        .bind(update.quality_score)
        .bind(update.arabic_ratio)
        .bind(&update.ministry)
        .bind(&update.tender_no)
        .bind(&update.fee)
        .bind(&update.contact)
        .bind(update.meeting_date)
        .bind(&update.meeting_location)
        .bind(update.deadline)
        .bind(update.deadline_original)
        .bind(update.deadline_confidence)
        .bind(&update.deadline_note)
        .bind(&update.deadline_history)
        .bind(update.is_postponed)
        .bind(&anomalies)
        .bind(&update.summary_en)
        .bind(&update.summary_ar)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(DbError::NotFound(id.to_string()));
        }

        if let Some(e) = embedding {
            sqlx::query(
                r#"
                INSERT INTO tender_embeddings (tender_id, embedding, model)
                VALUES ($1, $2, $3)
                ON CONFLICT (tender_id) DO UPDATE
                    SET embedding = EXCLUDED.embedding,
                        model = EXCLUDED.model,
                        created_at = now()
                "#,
            )
            .bind(id)
            .bind(Vector::from(e.vector.clone()))
            .bind(&e.model)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        let n = sqlx::query_scalar("SELECT COUNT(*) FROM tenders")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
