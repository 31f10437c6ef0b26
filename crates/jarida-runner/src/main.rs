//! Jarida — gazette tender ingestion and enrichment.
//! Entry point for the pipeline binary.
//!
//! `jarida ingest` runs one ingestion pass over the configured categories.
//! `jarida re-enrich <id>...` queues stored records for re-enrichment and
//! waits for the jobs to finish.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use jarida_common::config::Config;
use jarida_common::Result;
use jarida_db::{connect, PgTenderStore};
use jarida_ingestion::embedding::VoyageClient;
use jarida_ingestion::extract::edition::EditionOcr;
use jarida_ingestion::extract::ocr::OcrClient;
use jarida_ingestion::extract::render::{ChromiumRenderer, PageRenderer, RenderCapture};
use jarida_ingestion::extract::vision::{PageVision, VisionClient};
use jarida_ingestion::extract::ExtractionChain;
use jarida_ingestion::portal::PortalClient;
use jarida_ingestion::summarize::{ClaudeSummarizer, Summarizer};
use jarida_ingestion::{re_enrich_record, run_ingestion, IngestionRun};
use jarida_jobs::{Enricher, EnrichmentQueue, JobState};

/// Bridges the job queue to the pipeline's re-enrichment entry point.
struct PipelineEnricher {
    run: Arc<IngestionRun>,
}

#[async_trait]
impl Enricher for PipelineEnricher {
    async fn enrich(&self, tender_id: Uuid) -> Result<()> {
        re_enrich_record(&self.run, tender_id).await
    }
}

async fn build_run(config: &Config) -> anyhow::Result<Arc<IngestionRun>> {
    let pool = connect(&config.database).await?;
    let store = Arc::new(PgTenderStore::new(pool));
    info!("Database connected, schema applied");

    let portal = Arc::new(PortalClient::new(config.portal.clone())?);
    let base_url = portal.base_url().to_string();

    let ocr = Arc::new(OcrClient::new(&config.providers.ocr)?);
    let vision = Arc::new(VisionClient::new(&config.providers.vision)?);
    let embedder = Arc::new(VoyageClient::new(&config.providers.embedding)?);
    let summarizer: Option<Arc<dyn Summarizer>> = match &config.providers.summarizer {
        Some(endpoint) => Some(Arc::new(ClaudeSummarizer::new(endpoint)?)),
        None => None,
    };

    let renderer: Arc<dyn PageRenderer> = Arc::new(ChromiumRenderer::launch().await?);
    info!("Headless browser ready");

    let mut chain = ExtractionChain::new(config.extraction.clone());
    chain.push(Box::new(RenderCapture::new(renderer.clone(), ocr.clone(), &base_url)));
    chain.push(Box::new(EditionOcr::new(
        portal.http().clone(),
        ocr,
        &base_url,
        config.extraction.max_pdf_bytes,
    )));
    chain.push(Box::new(PageVision::new(vision, renderer, &base_url)));

    Ok(Arc::new(IngestionRun {
        source: portal,
        chain,
        embedder,
        summarizer,
        store,
        categories: config.portal.categories.clone(),
        quality: config.quality.clone(),
        deadline: config.deadline.clone(),
    }))
}

async fn ingest(config: &Config) -> anyhow::Result<()> {
    let run = build_run(config).await?;

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing the current item");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    let report = run_ingestion(&run, &cancel).await;
    for e in &report.errors {
        warn!(error = %e, "Item failed during the run");
    }
    info!(
        persisted = report.persisted,
        duplicates = report.duplicates,
        postponed = report.postponed,
        failed = report.extraction_failed,
        skipped = report.quality_skipped,
        "Run finished"
    );
    Ok(())
}

async fn re_enrich(config: &Config, raw_ids: &[String]) -> anyhow::Result<()> {
    let mut targets = Vec::with_capacity(raw_ids.len());
    for raw in raw_ids {
        targets.push(Uuid::parse_str(raw).map_err(|e| anyhow::anyhow!("bad record id {raw}: {e}"))?);
    }

    let run = build_run(config).await?;
    let queue = EnrichmentQueue::start(
        config.queue.clone(),
        Arc::new(PipelineEnricher { run }),
    );

    let jobs = queue.enqueue_batch(&targets);
    info!(n = jobs.len(), "Re-enrichment jobs queued");

    let mut open = jobs;
    while !open.is_empty() {
        tokio::time::sleep(Duration::from_millis(250)).await;
        open.retain(|&id| match queue.status(id) {
            Some(job) if job.state.is_finished() => {
                match job.state {
                    JobState::Succeeded => info!(job_id = %id, tender_id = %job.tender_id, "Job succeeded"),
                    _ => warn!(
                        job_id = %id,
                        tender_id = %job.tender_id,
                        error = job.last_error.as_deref().unwrap_or("unknown"),
                        "Job failed"
                    ),
                }
                false
            }
            Some(_) => true,
            None => false,
        });
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jarida=debug,info")),
        )
        .init();

    info!("Jarida starting, version {}", env!("CARGO_PKG_VERSION"));

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!("Could not load jarida.toml: {e}");
            warn!("Copy jarida.example.toml to jarida.toml and set JARIDA_PORTAL_PASSWORD.");
            return Ok(());
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.split_first() {
        None => ingest(&config).await,
        Some((cmd, rest)) if cmd == "ingest" && rest.is_empty() => ingest(&config).await,
        Some((cmd, rest)) if cmd == "re-enrich" && !rest.is_empty() => {
            re_enrich(&config, rest).await
        }
        _ => {
            eprintln!("Usage: jarida [ingest | re-enrich <record-id>...]");
            std::process::exit(2);
        }
    }
}
