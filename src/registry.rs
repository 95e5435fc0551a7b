//! File-based contract registry.
//!
//! Every contract lives in its own directory named by its content hash:
//!
//! ```text
//! <data>/contracts/<contract_id>/
//! ├── meta.json       # ContractMeta
//! ├── entities.json   # Vec<Entity>, optional
//! └── <sanitized original filename>.pdf
//! ```
//!
//! Contract ids are validated as 64 lowercase hex characters before any path
//! is built from them, and stored filenames are reduced to a safe basename.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::LimitsConfig;
use crate::entities::Entity;
use crate::error::{ContractError, Result};
use crate::vectorstore::VectorStore;

const MAX_FILENAME_CHARS: usize = 255;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractMeta {
    pub contract_id: String,
    pub original_filename: String,
    pub stored_pdf_path: String,
    /// RFC 3339, UTC.
    pub uploaded_at: String,
    pub num_pages: usize,
}

/// Where the PDF bytes come from.
#[derive(Debug, Clone, Copy)]
pub enum PdfSource<'a> {
    Path(&'a Path),
    Bytes(&'a [u8]),
}

#[derive(Debug, Clone)]
pub struct SaveRequest<'a> {
    pub contract_id: &'a str,
    pub original_filename: &'a str,
    pub source: PdfSource<'a>,
    pub num_pages: usize,
    pub entities: Option<&'a [Entity]>,
}

pub fn validate_contract_id(contract_id: &str) -> Result<()> {
    let valid = contract_id.len() == 64
        && contract_id
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if valid {
        Ok(())
    } else {
        Err(ContractError::Validation(format!(
            "Invalid contract ID format: {}",
            contract_id
        )))
    }
}

/// Reduce an uploaded filename to a safe `.pdf` basename.
pub fn sanitize_filename(filename: &str) -> Result<String> {
    if filename.trim().is_empty() {
        return Err(ContractError::Validation(
            "Filename cannot be empty".to_string(),
        ));
    }

    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let mut name: String = base
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '/' | '\\' => '_',
            other => other,
        })
        .collect();

    if !name.to_lowercase().ends_with(".pdf") {
        name.push_str(".pdf");
    }

    if name.chars().count() > MAX_FILENAME_CHARS {
        name = name.chars().take(MAX_FILENAME_CHARS - 4).collect::<String>() + ".pdf";
    }

    debug!(original = filename, sanitized = %name, "sanitized filename");
    Ok(name)
}

fn registry_err(action: &str, e: impl std::fmt::Display) -> ContractError {
    ContractError::Registry(format!("{}: {}", action, e))
}

pub struct Registry {
    root: PathBuf,
    limits: LimitsConfig,
}

impl Registry {
    pub fn new(root: impl Into<PathBuf>, limits: LimitsConfig) -> Self {
        Self {
            root: root.into(),
            limits,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn contract_dir(&self, contract_id: &str) -> Result<PathBuf> {
        validate_contract_id(contract_id)?;
        Ok(self.root.join(contract_id))
    }

    fn check_size(&self, bytes: u64) -> Result<()> {
        let size_mb = bytes as f64 / (1024.0 * 1024.0);
        if size_mb > self.limits.max_pdf_size_mb {
            return Err(ContractError::Validation(format!(
                "PDF size {:.2}MB exceeds maximum of {}MB",
                size_mb, self.limits.max_pdf_size_mb
            )));
        }
        Ok(())
    }

    /// Reject inputs over the configured page or size limits.
    pub fn check_limits(&self, num_pages: usize, size_bytes: u64) -> Result<()> {
        if num_pages > self.limits.max_pdf_pages {
            return Err(ContractError::Validation(format!(
                "PDF has {} pages, exceeds maximum of {}",
                num_pages, self.limits.max_pdf_pages
            )));
        }
        self.check_size(size_bytes)
    }

    /// Persist the PDF, its metadata and (optionally) its entities.
    pub fn save_contract(&self, req: SaveRequest<'_>) -> Result<ContractMeta> {
        info!(
            contract_id = req.contract_id,
            filename = req.original_filename,
            pages = req.num_pages,
            "saving contract"
        );

        let dir = self.contract_dir(req.contract_id)?;
        let size = match req.source {
            PdfSource::Bytes(bytes) => bytes.len() as u64,
            PdfSource::Path(path) => {
                if !path.is_file() {
                    return Err(ContractError::Validation(format!(
                        "Source PDF not found: {}",
                        path.display()
                    )));
                }
                std::fs::metadata(path)
                    .map_err(|e| registry_err("Failed to read source PDF", e))?
                    .len()
            }
        };
        self.check_limits(req.num_pages, size)?;

        let pdf_dest = dir.join(sanitize_filename(req.original_filename)?);
        std::fs::create_dir_all(&dir)
            .map_err(|e| registry_err("Failed to create contract directory", e))?;

        match req.source {
            PdfSource::Path(path) => {
                std::fs::copy(path, &pdf_dest).map_err(|e| registry_err("Failed to copy PDF", e))?;
            }
            PdfSource::Bytes(bytes) => {
                std::fs::write(&pdf_dest, bytes).map_err(|e| registry_err("Failed to write PDF", e))?;
            }
        }

        let stored = std::fs::canonicalize(&pdf_dest).unwrap_or_else(|_| pdf_dest.clone());
        let meta = ContractMeta {
            contract_id: req.contract_id.to_string(),
            original_filename: req.original_filename.to_string(),
            stored_pdf_path: stored.display().to_string(),
            uploaded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            num_pages: req.num_pages,
        };

        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| registry_err("Failed to encode metadata", e))?;
        std::fs::write(dir.join("meta.json"), meta_json)
            .map_err(|e| registry_err("Failed to write metadata", e))?;

        if let Some(entities) = req.entities {
            let json = serde_json::to_string_pretty(entities)
                .map_err(|e| registry_err("Failed to encode entities", e))?;
            std::fs::write(dir.join("entities.json"), json)
                .map_err(|e| registry_err("Failed to write entities", e))?;
            info!(contract_id = req.contract_id, count = entities.len(), "saved entities");
        }

        info!(contract_id = req.contract_id, "contract saved");
        Ok(meta)
    }

    /// Invalid ids are reported as absent.
    pub fn contract_exists(&self, contract_id: &str) -> bool {
        match self.contract_dir(contract_id) {
            Ok(dir) => dir.join("meta.json").is_file(),
            Err(_) => {
                warn!(contract_id, "invalid contract ID format");
                false
            }
        }
    }

    /// All readable contracts, newest upload first.
    pub fn list_contracts(&self) -> Vec<ContractMeta> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut contracts: Vec<ContractMeta> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path().join("meta.json"))
            .filter(|p| p.is_file())
            .filter_map(|p| match read_json::<ContractMeta>(&p) {
                Ok(meta) => Some(meta),
                Err(e) => {
                    warn!(path = %p.display(), error = %e, "skipping unreadable metadata");
                    None
                }
            })
            .collect();

        contracts.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        debug!(count = contracts.len(), "listed contracts");
        contracts
    }

    pub fn load_contract_meta(&self, contract_id: &str) -> Option<ContractMeta> {
        let path = self.contract_dir(contract_id).ok()?.join("meta.json");
        if !path.is_file() {
            return None;
        }
        match read_json(&path) {
            Ok(meta) => Some(meta),
            Err(e) => {
                error!(contract_id, error = %e, "failed to load contract metadata");
                None
            }
        }
    }

    /// Stored entities; empty when missing or unreadable.
    pub fn load_contract_entities(&self, contract_id: &str) -> Vec<Entity> {
        let path = match self.contract_dir(contract_id) {
            Ok(dir) => dir.join("entities.json"),
            Err(_) => return Vec::new(),
        };
        if !path.is_file() {
            return Vec::new();
        }
        read_json(&path).unwrap_or_else(|e| {
            warn!(contract_id, error = %e, "failed to load contract entities");
            Vec::new()
        })
    }

    /// Remove a contract's files, and its vectors when a store is given.
    ///
    /// Returns `false` when the contract does not exist. A vector store
    /// failure is logged and does not stop the file deletion.
    pub async fn delete_contract(
        &self,
        contract_id: &str,
        vectors: Option<&VectorStore>,
    ) -> Result<bool> {
        info!(contract_id, "deleting contract");
        let dir = self.contract_dir(contract_id)?;
        if !dir.is_dir() {
            warn!(contract_id, "contract directory does not exist");
            return Ok(false);
        }

        if let Some(store) = vectors {
            match store.delete_contract(contract_id).await {
                Ok(n) => info!(contract_id, chunks = n, "deleted contract chunks"),
                Err(e) => error!(contract_id, error = %e, "failed to delete from vector store"),
            }
        }

        std::fs::remove_dir_all(&dir).map_err(|e| registry_err("Failed to delete contract", e))?;
        info!(contract_id, "contract deleted");
        Ok(true)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> std::result::Result<T, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}
