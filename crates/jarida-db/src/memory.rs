//! In-memory tender store with the same at-most-once semantics as the
//! PostgreSQL implementation. Used by pipeline and queue tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::schema::{EnrichmentUpdate, NewTender, TenderRow, EMBEDDING_DIM};
use crate::store::{InsertOutcome, StoredEmbedding, TenderStore};

#[derive(Default)]
struct Inner {
    rows:         HashMap<Uuid, TenderRow>,
    embeddings:   HashMap<Uuid, StoredEmbedding>,
    fingerprints: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct MemoryTenderStore {
    inner: Mutex<Inner>,
}

impl MemoryTenderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn embedding_count(&self) -> usize {
        self.inner.lock().unwrap().embeddings.len()
    }

    pub fn embedding_of(&self, id: Uuid) -> Option<Vec<f32>> {
        self.inner
            .lock()
            .unwrap()
            .embeddings
            .get(&id)
            .map(|e| e.vector.clone())
    }

    fn check_dim(embedding: Option<&StoredEmbedding>) -> Result<()> {
        if let Some(e) = embedding {
            if e.vector.len() != EMBEDDING_DIM {
                return Err(DbError::InvalidEmbeddingDimension {
                    expected: EMBEDDING_DIM,
                    actual:   e.vector.len(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TenderStore for MemoryTenderStore {
    async fn fingerprints(&self, category: &str) -> Result<HashSet<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .rows
            .values()
            .filter(|r| r.category == category)
            .map(|r| r.fingerprint.clone())
            .collect())
    }

    async fn insert(
        &self,
        tender: &NewTender,
        embedding: Option<&StoredEmbedding>,
    ) -> Result<InsertOutcome> {
        Self::check_dim(embedding)?;
        let mut inner = self.inner.lock().unwrap();
        if inner.fingerprints.contains_key(&tender.fingerprint) {
            return Ok(InsertOutcome::DuplicateSkip);
        }
        let id = Uuid::new_v4();
        let now = Utc::now();
        let row = TenderRow {
            id,
            external_id:      tender.external_id.clone(),
            category:         tender.category.clone(),
            title:            tender.title.clone(),
            edition_no:       tender.edition_no.clone(),
            publish_date:     tender.publish_date,
            body:             tender.body.clone(),
            extraction_stage: tender.extraction_stage.clone(),
            language:         tender.language.clone(),
            quality_score:    tender.quality_score,
            arabic_ratio:     tender.arabic_ratio,
            ministry:         tender.ministry.clone(),
            tender_no:        tender.tender_no.clone(),
            fee:              tender.fee.clone(),
            contact:          tender.contact.clone(),
            meeting_date:     tender.meeting_date,
            meeting_location: tender.meeting_location.clone(),
            deadline:         tender.deadline,
            deadline_original:   tender.deadline_original,
            deadline_confidence: tender.deadline_confidence,
            deadline_note:       tender.deadline_note.clone(),
            deadline_history: serde_json::json!([]),
            is_postponed:     false,
            anomalies:        serde_json::to_value(&tender.anomalies)?,
            summary_en:       tender.summary_en.clone(),
            summary_ar:       tender.summary_ar.clone(),
            fingerprint:      tender.fingerprint.clone(),
            created_at:       now,
            updated_at:       now,
        };
        inner.fingerprints.insert(tender.fingerprint.clone(), id);
        inner.rows.insert(id, row);
        if let Some(e) = embedding {
            inner.embeddings.insert(id, e.clone());
        }
        Ok(InsertOutcome::Inserted(id))
    }

    async fn get(&self, id: Uuid) -> Result<Option<TenderRow>> {
        Ok(self.inner.lock().unwrap().rows.get(&id).cloned())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
        category: &str,
    ) -> Result<Option<TenderRow>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .rows
            .values()
            .find(|r| r.external_id == external_id && r.category == category)
            .cloned())
    }

    async fn find_by_tender_no(
        &self,
        tender_no: &str,
        category: &str,
    ) -> Result<Option<TenderRow>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .rows
            .values()
            .filter(|r| r.tender_no.as_deref() == Some(tender_no) && r.category == category)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn apply_enrichment(
        &self,
        id: Uuid,
        update: &EnrichmentUpdate,
        embedding: Option<&StoredEmbedding>,
    ) -> Result<()> {
        Self::check_dim(embedding)?;
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(id.to_string()))?;
        row.body = update.body.clone();
        row.extraction_stage = update.extraction_stage.clone();
        row.language = update.language.clone();
        row.quality_score = update.quality_score;
        row.arabic_ratio = update.arabic_ratio;
        row.ministry = update.ministry.clone();
        row.tender_no = update.tender_no.clone();
        row.fee = update.fee.clone();
        row.contact = update.contact.clone();
        row.meeting_date = update.meeting_date;
        row.meeting_location = update.meeting_location.clone();
        row.deadline = update.deadline;
        row.deadline_original = update.deadline_original;
        row.deadline_confidence = update.deadline_confidence;
        row.deadline_note = update.deadline_note.clone();
        row.deadline_history = update.deadline_history.clone();
        row.is_postponed = update.is_postponed;
        row.anomalies = serde_json::to_value(&update.anomalies)?;
        row.summary_en = update.summary_en.clone();
        row.summary_ar = update.summary_ar.clone();
        row.updated_at = Utc::now();
        if let Some(e) = embedding {
            inner.embeddings.insert(id, e.clone());
        }
        Ok(())
    }

    async fn count(&self) -> Result<i64> {
        Ok(self.inner.lock().unwrap().rows.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(fingerprint: &str) -> NewTender {
        NewTender {
            external_id:      "4471".to_string(),
            category:         "1".to_string(),
            title:            "مناقصة توريد معدات".to_string(),
            edition_no:       Some("1680".to_string()),
            publish_date:     chrono::NaiveDate::from_ymd_opt(2025, 1, 12),
            body:             "نص الإعلان".to_string(),
            extraction_stage: "render".to_string(),
            language:         "ar".to_string(),
            quality_score:    0.9,
            arabic_ratio:     0.85,
            ministry:         Some("وزارة الأشغال".to_string()),
            tender_no:        Some("أ/2025/14".to_string()),
            fee:              None,
            contact:          None,
            meeting_date:     None,
            meeting_location: None,
            deadline:         chrono::NaiveDate::from_ymd_opt(2025, 3, 1),
            deadline_original:   None,
            deadline_confidence: None,
            deadline_note:       None,
            anomalies:        vec![],
            summary_en:       None,
            summary_ar:       None,
            fingerprint:      fingerprint.to_string(),
        }
    }

    fn embedding() -> StoredEmbedding {
        StoredEmbedding {
            vector: vec![0.1; EMBEDDING_DIM],
            model:  "voyage-law-2".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_fingerprint_writes_nothing() {
        let store = MemoryTenderStore::new();
        let first = store.insert(&sample("fp-1"), Some(&embedding())).await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = store.insert(&sample("fp-1"), Some(&embedding())).await.unwrap();
        assert_eq!(second, InsertOutcome::DuplicateSkip);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.embedding_count(), 1);
    }

    #[tokio::test]
    async fn wrong_dimension_rejected() {
        let store = MemoryTenderStore::new();
        let bad = StoredEmbedding { vector: vec![0.0; 8], model: "m".to_string() };
        let err = store.insert(&sample("fp-2"), Some(&bad)).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidEmbeddingDimension { .. }));
    }

    #[tokio::test]
    async fn enrichment_replaces_embedding_not_duplicates() {
        let store = MemoryTenderStore::new();
        let InsertOutcome::Inserted(id) =
            store.insert(&sample("fp-3"), Some(&embedding())).await.unwrap()
        else {
            panic!("expected insert");
        };

        let update = EnrichmentUpdate {
            body:             "نص محسّن".to_string(),
            extraction_stage: "edition_ocr".to_string(),
            language:         "ar".to_string(),
            quality_score:    0.95,
            arabic_ratio:     0.9,
            ministry:         Some("وزارة الأشغال".to_string()),
            tender_no:        Some("أ/2025/14".to_string()),
            fee:              None,
            contact:          None,
            meeting_date:     None,
            meeting_location: None,
            deadline:         chrono::NaiveDate::from_ymd_opt(2025, 3, 15),
            deadline_original:   None,
            deadline_confidence: None,
            deadline_note:       None,
            deadline_history: serde_json::json!([]),
            is_postponed:     false,
            anomalies:        vec![],
            summary_en:       Some("Supply tender".to_string()),
            summary_ar:       None,
        };
        let new_vec = StoredEmbedding { vector: vec![0.5; EMBEDDING_DIM], model: "voyage-law-2".to_string() };
        store.apply_enrichment(id, &update, Some(&new_vec)).await.unwrap();

        assert_eq!(store.embedding_count(), 1);
        assert_eq!(store.embedding_of(id).unwrap()[0], 0.5);
        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.quality_score, 0.95);
        assert_eq!(row.body, "نص محسّن");
    }
}
