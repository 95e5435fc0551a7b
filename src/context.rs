//! Long-lived services shared by the CLI commands and the HTTP server.

use anyhow::{Context as _, Result};
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::llm::{self, ChatModel};
use crate::registry::Registry;
use crate::vectorstore::VectorStore;

pub struct AppContext {
    pub config: Config,
    pub registry: Registry,
    pub store: VectorStore,
    /// `None` when the chat model could not be configured (e.g. no API key);
    /// entity extraction then falls back to regex and questions are refused.
    pub chat: Option<Arc<dyn ChatModel>>,
}

impl AppContext {
    pub async fn open(config: Config) -> Result<Self> {
        let store = VectorStore::open(&config)
            .await
            .context("Failed to open vector store")?;
        let chat = match llm::create_chat(&config.llm) {
            Ok(chat) => Some(chat),
            Err(e) => {
                warn!(error = %e, "chat model unavailable");
                None
            }
        };
        Ok(Self::from_parts(config, store, chat))
    }

    pub fn from_parts(
        config: Config,
        store: VectorStore,
        chat: Option<Arc<dyn ChatModel>>,
    ) -> Self {
        let registry = Registry::new(config.data.contracts_dir(), config.limits.clone());
        Self {
            config,
            registry,
            store,
            chat,
        }
    }

    pub fn chat(&self) -> Result<&dyn ChatModel> {
        self.chat.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "no chat model configured; set OPENAI_API_KEY or use [llm] provider = \"local\""
            )
        })
    }
}
