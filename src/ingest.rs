//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for one PDF: hash → limit checks →
//! extraction → chunking → vector upsert (then stale chunks pruned) →
//! entity extraction → registry.
//! Embedding failures are non-fatal (chunks are stored as pending); a
//! contract whose hash is already registered is skipped unless forced.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::chunk::chunk_document;
use crate::context::AppContext;
use crate::entities::{self, EntityMode};
use crate::error::ContractError;
use crate::extract::{self, ExtractionConfig};
use crate::registry::{PdfSource, SaveRequest};
use crate::text::content_id;

/// Per-run overrides of the `[extraction]` settings.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub strategy: Option<String>,
    pub force_ocr: bool,
    pub max_pages: Option<usize>,
    pub lang: Option<String>,
    /// Re-ingest even when the contract is already registered.
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub contract_id: String,
    pub filename: String,
    pub pages: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub pending: usize,
    pub entities: usize,
    pub skipped: bool,
}

fn extraction_config(ctx: &AppContext, opts: &IngestOptions) -> ExtractionConfig {
    let mut config = ExtractionConfig::from(ctx.config.extraction.clone());
    if let Some(strategy) = &opts.strategy {
        config.strategy = strategy.clone();
    }
    if opts.force_ocr {
        config.force_ocr = true;
    }
    if opts.max_pages.is_some() {
        config.max_pages = opts.max_pages;
    }
    if let Some(lang) = &opts.lang {
        config.ocr_lang = lang.clone();
    }
    config
}

pub async fn ingest_pdf(
    ctx: &AppContext,
    source: PdfSource<'_>,
    original_filename: &str,
    opts: &IngestOptions,
) -> Result<IngestReport> {
    let bytes: Vec<u8> = match source {
        PdfSource::Path(path) => std::fs::read(path)
            .map_err(|e| ContractError::Validation(format!("Cannot read {}: {}", path.display(), e)))?,
        PdfSource::Bytes(bytes) => bytes.to_vec(),
    };
    if bytes.is_empty() {
        return Err(ContractError::Validation("PDF is empty".to_string()).into());
    }

    let contract_id = content_id(&bytes);
    info!(%contract_id, filename = original_filename, "ingesting contract");

    if ctx.registry.contract_exists(&contract_id) && !opts.force {
        return skipped_report(ctx, &contract_id, original_filename).await;
    }

    ctx.registry.check_limits(0, bytes.len() as u64)?;

    // Extraction works on files; uploads are staged in the temp dir.
    let (pdf_path, staged): (PathBuf, Option<NamedTempFile>) = match source {
        PdfSource::Path(path) => (path.to_path_buf(), None),
        PdfSource::Bytes(_) => {
            let file = stage_upload(&bytes)?;
            (file.path().to_path_buf(), Some(file))
        }
    };

    let total_pages = extract::page_count(&pdf_path)?;
    ctx.registry.check_limits(total_pages, bytes.len() as u64)?;

    let extraction = extraction_config(ctx, opts);
    let path_for_task = pdf_path.clone();
    let pages = tokio::task::spawn_blocking(move || {
        extract::extract_text_from_pdf(&path_for_task, extraction)
    })
    .await
    .context("Extraction task panicked")??;

    if pages.iter().all(|p| p.text.trim().is_empty()) {
        warn!(%contract_id, "no text extracted from any page");
    }

    let (size, overlap) = ctx.config.chunking.resolve_params();
    let chunks = chunk_document(&pages, &contract_id, size, overlap)?;
    info!(%contract_id, chunks = chunks.len(), size, overlap, "chunked contract");

    // Upsert before pruning so a failed write never leaves the contract
    // without chunks; pruning drops ids from an earlier chunking.
    let stats = ctx.store.upsert_chunks(&chunks).await?;
    let current: Vec<String> = chunks.iter().map(|c| c.chunk_id.clone()).collect();
    let removed = ctx.store.delete_stale(&contract_id, &current).await?;
    if removed > 0 {
        info!(%contract_id, removed, "dropped chunks from previous ingest");
    }

    let mode: EntityMode = ctx
        .config
        .entities
        .mode
        .parse()
        .map_err(ContractError::Configuration)?;
    let found = entities::extract_for_contract(mode, ctx.chat.as_deref(), &pages).await;

    ctx.registry.save_contract(SaveRequest {
        contract_id: &contract_id,
        original_filename,
        source: PdfSource::Bytes(&bytes),
        num_pages: total_pages,
        entities: Some(&found),
    })?;

    if let Some(file) = staged {
        if let Err(e) = file.close() {
            warn!(error = %e, "failed to remove staged upload");
        }
    }

    let report = IngestReport {
        contract_id,
        filename: original_filename.to_string(),
        pages: pages.len(),
        chunks: chunks.len(),
        embedded: stats.embedded,
        pending: stats.pending,
        entities: found.len(),
        skipped: false,
    };
    info!(
        contract_id = %report.contract_id,
        pages = report.pages,
        chunks = report.chunks,
        entities = report.entities,
        "ingest complete"
    );
    Ok(report)
}

fn stage_upload(bytes: &[u8]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("ca-upload-")
        .suffix(".pdf")
        .tempfile()
        .context("Failed to create staging file")?;
    file.write_all(bytes).context("Failed to stage upload")?;
    file.flush().context("Failed to stage upload")?;
    Ok(file)
}

async fn skipped_report(
    ctx: &AppContext,
    contract_id: &str,
    original_filename: &str,
) -> Result<IngestReport> {
    info!(contract_id, "contract already registered, skipping");
    let pages = ctx
        .registry
        .load_contract_meta(contract_id)
        .map(|m| m.num_pages)
        .unwrap_or(0);
    Ok(IngestReport {
        contract_id: contract_id.to_string(),
        filename: original_filename.to_string(),
        pages,
        chunks: ctx.store.count(Some(contract_id)).await?,
        embedded: 0,
        pending: 0,
        entities: ctx.registry.load_contract_entities(contract_id).len(),
        skipped: true,
    })
}

/// Ingest a PDF from disk, using its file name as the original name.
pub async fn ingest_file(ctx: &AppContext, path: &Path, opts: &IngestOptions) -> Result<IngestReport> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string());
    ingest_pdf(ctx, PdfSource::Path(path), &filename, opts).await
}
