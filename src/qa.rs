//! Question answering over one contract.
//!
//! Two paths, tried in order:
//!
//! 1. **Entity routing** (off by default): simple "who" and "when" questions
//!    are answered directly from the stored entities.
//! 2. **Retrieval-augmented generation**: the top `k` chunks for the
//!    question are stuffed into a three-part prompt and sent to the chat
//!    model.

use serde::Serialize;
use tracing::{debug, info};

use crate::entities::Entity;
use crate::error::{ContractError, Result};
use crate::llm::ChatModel;
use crate::models::SearchHit;
use crate::vectorstore::VectorStore;

pub const NO_EXCERPTS_ANSWER: &str =
    "I could not find any relevant excerpts in this contract to answer the question.";

const QA_SYSTEM_PROMPT: &str = r#"You are a meticulous AI contract assistant. Your task is to answer questions based ONLY on the provided contract excerpts. Do not use any external knowledge.

Your response must be in three parts:
1.  **Direct Answer:** Provide a clear and concise answer to the user's question.
2.  **Supporting Excerpts:** Quote 1-3 relevant excerpts from the contract that justify your answer. Each quote must be clearly marked and include its page number, like this: "'...relevant text from contract...' (page N)".
3.  **Ambiguities:** If the contract does not contain the information or is unclear, state that explicitly. Do not invent answers."#;

struct EntityRule {
    keywords: &'static [&'static str],
    labels: &'static [&'static str],
    header: &'static str,
    not_found: &'static str,
}

const ENTITY_RULES: [EntityRule; 2] = [
    EntityRule {
        keywords: &["who", "party", "parties", "involved"],
        labels: &["Party", "ORG", "PERSON"],
        header: "Based on the extracted entities, the involved parties are:",
        not_found: "I could not identify the parties from the extracted entities.",
    },
    EntityRule {
        keywords: &["date", "when", "what date"],
        labels: &["Date", "Agreement Date"],
        header: "Based on the extracted entities, the following dates were found:",
        not_found: "I could not identify any specific dates from the extracted entities.",
    },
];

/// Answer from extracted entities when routing is enabled and the question
/// matches a rule; `None` sends the question to retrieval.
pub fn answer_from_entities(question: &str, entities: &[Entity], enabled: bool) -> Option<String> {
    if !enabled {
        return None;
    }

    let lowered = question.to_lowercase();
    let rule = ENTITY_RULES
        .iter()
        .find(|r| r.keywords.iter().any(|k| lowered.contains(k)))?;

    let values: Vec<String> = entities
        .iter()
        .filter(|e| rule.labels.contains(&e.label.as_str()))
        .map(|e| {
            if e.label == "Date" {
                format!("{} (found on page {})", e.value, e.page)
            } else {
                e.value.clone()
            }
        })
        .collect();

    if values.is_empty() {
        Some(rule.not_found.to_string())
    } else {
        Some(format!("{}\n\n* {}", rule.header, values.join("\n* ")))
    }
}

/// Excerpts separated by blank lines, each prefixed with its page.
pub fn build_context(sources: &[SearchHit]) -> String {
    sources
        .iter()
        .map(|s| format!("[Page {}]\n{}", s.page_number, s.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_user_prompt(context: &str, question: &str) -> String {
    format!("Context:\n{}\n\nQuestion:\n{}\n", context, question)
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SearchHit>,
}

/// Retrieve the top `k` excerpts for `question` and ask the chat model.
pub async fn ask(
    store: &VectorStore,
    chat: &dyn ChatModel,
    question: &str,
    contract_id: Option<&str>,
    k: usize,
) -> Result<Answer> {
    let question = question.trim();
    if question.is_empty() {
        return Err(ContractError::Validation(
            "question must not be empty".to_string(),
        ));
    }

    let sources = store.similarity_search(question, k, contract_id).await?;
    info!(contract_id = ?contract_id, sources = sources.len(), "retrieved excerpts");

    if sources.is_empty() {
        return Ok(Answer {
            answer: NO_EXCERPTS_ANSWER.to_string(),
            sources,
        });
    }

    let context = build_context(&sources);
    debug!(context_chars = context.len(), "calling chat model");
    let answer = chat
        .complete(QA_SYSTEM_PROMPT, &build_user_prompt(&context, question))
        .await
        .map_err(|e| ContractError::ModelLoading(e.to_string()))?;

    Ok(Answer { answer, sources })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(page: usize, text: &str) -> SearchHit {
        SearchHit {
            chunk_id: format!("id{}", page),
            contract_id: "c".to_string(),
            page_number: page,
            section: None,
            text: text.to_string(),
            score: 0.9,
        }
    }

    fn entities() -> Vec<Entity> {
        vec![
            Entity::new("Party", "Acme Corp", 1),
            Entity::new("ORG", "Globex", 1),
            Entity::new("Date", "March 3, 2024", 2),
            Entity::new("Agreement Date", "March 1, 2024", 1),
            Entity::new("Monetary Value", "$5,000", 3),
        ]
    }

    #[test]
    fn test_routing_disabled_returns_none() {
        assert_eq!(answer_from_entities("Who signed?", &entities(), false), None);
    }

    #[test]
    fn test_party_question() {
        let answer = answer_from_entities("Who are the parties?", &entities(), true).unwrap();
        assert_eq!(
            answer,
            "Based on the extracted entities, the involved parties are:\n\n* Acme Corp\n* Globex"
        );
    }

    #[test]
    fn test_date_question_marks_pages() {
        let answer = answer_from_entities("What date does it start?", &entities(), true).unwrap();
        assert!(answer.contains("* March 3, 2024 (found on page 2)"));
        assert!(answer.contains("* March 1, 2024\n") || answer.ends_with("* March 1, 2024"));
    }

    #[test]
    fn test_rule_without_matches_gives_not_found() {
        let answer = answer_from_entities("who is involved", &[], true).unwrap();
        assert_eq!(answer, "I could not identify the parties from the extracted entities.");
    }

    #[test]
    fn test_unmatched_question_goes_to_retrieval() {
        assert_eq!(answer_from_entities("What is the fee?", &entities(), true), None);
    }

    #[test]
    fn test_context_labels_pages() {
        let ctx = build_context(&[hit(1, "First."), hit(4, "Fourth.")]);
        assert_eq!(ctx, "[Page 1]\nFirst.\n\n[Page 4]\nFourth.");
    }

    #[test]
    fn test_prompt_has_context_and_question() {
        let prompt = build_user_prompt("[Page 1]\nText", "What?");
        assert!(prompt.starts_with("Context:\n[Page 1]"));
        assert!(prompt.contains("Question:\nWhat?"));
        assert!(QA_SYSTEM_PROMPT.contains("ONLY on the provided contract excerpts"));
    }

    mod with_store {
        use super::*;
        use crate::config::Config;
        use crate::embedding::EmbeddingProvider;
        use crate::models::ContractChunk;
        use crate::{db, migrate};
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct ConstProvider;

        #[async_trait]
        impl EmbeddingProvider for ConstProvider {
            fn model_name(&self) -> &str {
                "const"
            }
            fn dims(&self) -> usize {
                2
            }
            async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0, 0.5]).collect())
            }
        }

        #[derive(Default)]
        struct CountingChat {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl ChatModel for CountingChat {
            fn model_name(&self) -> &str {
                "counting"
            }
            async fn complete(&self, system: &str, user: &str) -> anyhow::Result<String> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                assert!(system.contains("Direct Answer"));
                Ok(format!("answered with {} chars", user.len()))
            }
        }

        async fn store(tmp: &tempfile::TempDir) -> VectorStore {
            let mut config = Config::minimal();
            config.data.root = tmp.path().to_path_buf();
            migrate::run_migrations(&config).await.unwrap();
            VectorStore::new(db::connect(&config).await.unwrap(), Arc::new(ConstProvider), 8)
        }

        #[tokio::test]
        async fn test_no_excerpts_skips_model() {
            let tmp = tempfile::TempDir::new().unwrap();
            let store = store(&tmp).await;
            let chat = CountingChat::default();

            let answer = ask(&store, &chat, "What is the fee?", Some("missing"), 4)
                .await
                .unwrap();
            assert_eq!(answer.answer, NO_EXCERPTS_ANSWER);
            assert!(answer.sources.is_empty());
            assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_answer_carries_sources() {
            let tmp = tempfile::TempDir::new().unwrap();
            let store = store(&tmp).await;
            store
                .upsert_chunks(&[ContractChunk {
                    chunk_id: "x".to_string(),
                    contract_id: "c".to_string(),
                    page_number: 3,
                    section: None,
                    start_index: 0,
                    text: "The fee is $5,000.".to_string(),
                }])
                .await
                .unwrap();
            let chat = CountingChat::default();

            let answer = ask(&store, &chat, "What is the fee?", Some("c"), 4)
                .await
                .unwrap();
            assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
            assert_eq!(answer.sources.len(), 1);
            assert_eq!(answer.sources[0].page_number, 3);
            assert!(answer.answer.starts_with("answered with"));
        }

        #[tokio::test]
        async fn test_blank_question_rejected() {
            let tmp = tempfile::TempDir::new().unwrap();
            let store = store(&tmp).await;
            let err = ask(&store, &CountingChat::default(), "  ", None, 4)
                .await
                .unwrap_err();
            assert!(err.is_client_error());
        }
    }
}
