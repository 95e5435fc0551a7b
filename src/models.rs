//! Core data models shared by ingestion and retrieval.
//!
//! Chunks flow from the chunker into the vector store; search hits flow from
//! the vector store into the QA layer and out through the CLI and server.

use serde::{Deserialize, Serialize};

use crate::text::sha256_hex;

/// A window of page text belonging to one contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractChunk {
    /// `sha256("{contract_id}:{page_number}:{start_index}")`, hex.
    pub chunk_id: String,
    pub contract_id: String,
    pub page_number: usize,
    #[serde(default)]
    pub section: Option<String>,
    /// Character offset of the chunk within its page.
    pub start_index: usize,
    pub text: String,
}

impl ContractChunk {
    pub fn text_hash(&self) -> String {
        sha256_hex(&self.text)
    }
}

/// A chunk returned by similarity search, with its cosine score.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk_id: String,
    pub contract_id: String,
    pub page_number: usize,
    pub section: Option<String>,
    pub text: String,
    pub score: f32,
}
