//! End-to-end pipeline properties over the in-memory store: fallback
//! ordering, idempotent re-runs, and deadline correction as persisted.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use jarida_common::config::{DeadlinePolicy, ExtractionPolicy, QualityPolicy};
use jarida_common::{JaridaError, Result};
use jarida_db::memory::MemoryTenderStore;
use jarida_db::schema::EMBEDDING_DIM;
use jarida_db::TenderStore;

use jarida_ingestion::embedding::{EmbedMode, EmbeddingProvider};
use jarida_ingestion::extract::{ExtractionChain, ExtractionProvider};
use jarida_ingestion::models::{ExtractionResult, ExtractionStage, Listing};
use jarida_ingestion::persist::ItemBuffers;
use jarida_ingestion::pipeline::{run_ingestion, IngestionRun, ListingSource};

struct CannedSource(Vec<Listing>);

#[async_trait]
impl ListingSource for CannedSource {
    async fn list_category(&self, category: &str) -> Result<Vec<Listing>> {
        Ok(self.0.iter().filter(|l| l.category == category).cloned().collect())
    }
}

/// One extraction stage with a scripted outcome and a call counter.
struct ScriptedStage {
    stage:   ExtractionStage,
    outcome: std::result::Result<String, String>,
    calls:   Arc<AtomicUsize>,
}

#[async_trait]
impl ExtractionProvider for ScriptedStage {
    fn stage(&self) -> ExtractionStage {
        self.stage
    }

    async fn extract(
        &self,
        listing: &Listing,
        _buffers: &mut ItemBuffers,
    ) -> Result<ExtractionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(template) => Ok(ExtractionResult::text_only(
                template.replace("%ID%", &listing.external_id),
                self.stage,
                0.9,
            )),
            Err(msg) => Err(JaridaError::TransientProvider(msg.clone())),
        }
    }
}

struct ZeroEmbedder;

#[async_trait]
impl EmbeddingProvider for ZeroEmbedder {
    fn dim(&self) -> usize {
        EMBEDDING_DIM
    }

    fn model(&self) -> &str {
        "test-embedder"
    }

    async fn embed(&self, _text: &str, _mode: EmbedMode) -> Vec<f32> {
        vec![0.0; EMBEDDING_DIM]
    }
}

fn listing(id: &str, publish: (i32, u32, u32)) -> Listing {
    Listing {
        external_id:  id.to_string(),
        title:        format!("مناقصة {id}"),
        category:     "1".to_string(),
        edition_no:   Some("1680".to_string()),
        edition_id:   Some(912),
        page_number:  Some(33),
        publish_date: chrono::NaiveDate::from_ymd_opt(publish.0, publish.1, publish.2),
        hijri_date:   None,
    }
}

fn announcement(deadline: &str) -> String {
    format!(
        "وزارة الأشغال العامة\nإعلان عن مناقصة رقم أ/2025/%ID%\n{}آخر موعد لتقديم العطاءات {deadline}",
        "توريد وتركيب معدات لمحطة الضخ الرئيسية حسب الشروط والمواصفات. ".repeat(10)
    )
}

fn run_with(
    store: Arc<MemoryTenderStore>,
    listings: Vec<Listing>,
    chain: ExtractionChain,
) -> IngestionRun {
    IngestionRun {
        source:     Arc::new(CannedSource(listings)),
        chain,
        embedder:   Arc::new(ZeroEmbedder),
        summarizer: None,
        store,
        categories: vec!["1".to_string()],
        quality:    QualityPolicy::default(),
        deadline:   DeadlinePolicy::default(),
    }
}

#[tokio::test]
async fn failed_first_stage_falls_through_and_third_never_runs() {
    let c1 = Arc::new(AtomicUsize::new(0));
    let c2 = Arc::new(AtomicUsize::new(0));
    let c3 = Arc::new(AtomicUsize::new(0));

    let mut chain = ExtractionChain::new(ExtractionPolicy::default());
    chain.push(Box::new(ScriptedStage {
        stage:   ExtractionStage::Render,
        outcome: Err("capture service down".to_string()),
        calls:   c1.clone(),
    }));
    chain.push(Box::new(ScriptedStage {
        stage:   ExtractionStage::EditionOcr,
        outcome: Ok(announcement("16/3/2025")),
        calls:   c2.clone(),
    }));
    chain.push(Box::new(ScriptedStage {
        stage:   ExtractionStage::PageVision,
        outcome: Ok(announcement("16/3/2025")),
        calls:   c3.clone(),
    }));

    let store = Arc::new(MemoryTenderStore::new());
    let run = run_with(store.clone(), vec![listing("1", (2025, 1, 12))], chain);
    let report = run_ingestion(&run, &AtomicBool::new(false)).await;

    assert_eq!(report.persisted, 1);
    assert_eq!(c1.load(Ordering::SeqCst), 1);
    assert_eq!(c2.load(Ordering::SeqCst), 1);
    assert_eq!(c3.load(Ordering::SeqCst), 0);

    let row = store.find_by_external_id("1", "1").await.unwrap().unwrap();
    assert_eq!(row.extraction_stage, "edition_ocr");
}

#[tokio::test]
async fn rerun_extracts_nothing_for_known_listings() {
    let store = Arc::new(MemoryTenderStore::new());
    let listings = vec![listing("1", (2025, 1, 12)), listing("2", (2025, 1, 12))];

    let calls = Arc::new(AtomicUsize::new(0));
    let mut chain = ExtractionChain::new(ExtractionPolicy::default());
    chain.push(Box::new(ScriptedStage {
        stage:   ExtractionStage::Render,
        outcome: Ok(announcement("16/3/2025")),
        calls:   calls.clone(),
    }));
    let run = run_with(store.clone(), listings.clone(), chain);
    let first = run_ingestion(&run, &AtomicBool::new(false)).await;
    assert_eq!(first.persisted, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Second run: the fingerprint gate must stop items before extraction.
    let calls2 = Arc::new(AtomicUsize::new(0));
    let mut chain = ExtractionChain::new(ExtractionPolicy::default());
    chain.push(Box::new(ScriptedStage {
        stage:   ExtractionStage::Render,
        outcome: Ok(announcement("16/3/2025")),
        calls:   calls2.clone(),
    }));
    let run = run_with(store.clone(), listings, chain);
    let second = run_ingestion(&run, &AtomicBool::new(false)).await;

    assert_eq!(second.persisted, 0);
    assert_eq!(second.duplicates, 2);
    assert_eq!(calls2.load(Ordering::SeqCst), 0);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn misread_year_corrected_in_persisted_record() {
    // Candidate deadline 15/12/2024 against publish date 2025-01-10: a
    // year-shift correction to 2025-12-15 is applied automatically.
    let store = Arc::new(MemoryTenderStore::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let mut chain = ExtractionChain::new(ExtractionPolicy::default());
    chain.push(Box::new(ScriptedStage {
        stage:   ExtractionStage::Render,
        outcome: Ok(announcement("15/12/2024")),
        calls,
    }));

    let run = run_with(store.clone(), vec![listing("7", (2025, 1, 10))], chain);
    run_ingestion(&run, &AtomicBool::new(false)).await;

    let row = store.find_by_external_id("7", "1").await.unwrap().unwrap();
    assert_eq!(row.deadline, chrono::NaiveDate::from_ymd_opt(2025, 12, 15));
    assert_eq!(row.deadline_original, chrono::NaiveDate::from_ymd_opt(2024, 12, 15));
    assert!(row.deadline_confidence.unwrap() >= 0.85);
    assert!(row.deadline.unwrap() > row.publish_date.unwrap());
}
