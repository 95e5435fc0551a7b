//! # Contract Assistant
//!
//! Ingest PDF contracts, extract key entities, and answer questions about
//! them with retrieval-augmented generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────────┐   ┌──────────┐   ┌──────────────┐
//! │   PDF    │──▶│ Text layer/OCR │──▶│ Chunker  │──▶│ Vector store │
//! └──────────┘   └───────┬────────┘   └──────────┘   │ (SQLite)     │
//!                        │                           └──────┬───────┘
//!                        ▼                                  │
//!                ┌──────────────┐   ┌──────────┐            │
//!                │   Entities   │──▶│ Registry │            │
//!                │  LLM/regex   │   │  (files) │            │
//!                └──────────────┘   └────┬─────┘            │
//!                                        ▼                  ▼
//!                                  ┌──────────┐       ┌──────────┐
//!                                  │   CLI    │       │  HTTP +  │
//!                                  │  (ca)    │       │ dashboard│
//!                                  └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ca init
//! ca ingest ./lease.pdf
//! ca ask "When does the lease terminate?" --id <contract-id>
//! ca serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Domain error type |
//! | [`text`] | Hashing and text normalization helpers |
//! | [`extract`] | Text-layer and OCR page extraction |
//! | [`chunk`] | Recursive character splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vectorstore`] | Chunk storage and similarity search |
//! | [`llm`] | Chat model client |
//! | [`entities`] | Key entity extraction (LLM and regex) |
//! | [`qa`] | Question answering over retrieved excerpts |
//! | [`registry`] | Per-contract files on disk |
//! | [`feedback`] | Answer rating log |
//! | [`ingest`] | End-to-end ingestion pipeline |
//! | [`context`] | Shared services for CLI and server |
//! | [`server`] | HTTP API and dashboard |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod entities;
pub mod error;
pub mod extract;
pub mod feedback;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod qa;
pub mod registry;
pub mod server;
pub mod text;
pub mod vectorstore;
