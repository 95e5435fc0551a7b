//! Key entity extraction.
//!
//! Two extractors produce the same flat [`Entity`] list:
//!
//! - **LLM**: one structured-output call returning [`KeyEntities`] (parties,
//!   dates, jurisdiction, contract type, money, obligations), flattened with
//!   [`KeyEntities::to_entities`].
//! - **Regex**: money, dates, emails and phone numbers on every page.
//!
//! [`extract_for_contract`] combines them according to [`EntityMode`] and
//! removes duplicates by `(label, value, page)`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{error, info, warn};

use crate::extract::PageContent;
use crate::llm::ChatModel;

pub const NOT_FOUND: &str = "Not Found";
pub const EXTRACTION_FAILED: &str = "Extraction Failed";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub label: String,
    pub value: String,
    pub page: usize,
}

impl Entity {
    pub fn new(label: impl Into<String>, value: impl Into<String>, page: usize) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEntities {
    pub parties: Vec<String>,
    pub agreement_date: String,
    pub jurisdiction: String,
    pub contract_type: String,
    pub termination_date: String,
    pub monetary_amounts: Vec<String>,
    pub key_obligations: Vec<String>,
}

impl KeyEntities {
    /// Returned when the model call or its response parsing fails.
    pub fn failed() -> Self {
        Self {
            parties: vec![EXTRACTION_FAILED.to_string()],
            agreement_date: EXTRACTION_FAILED.to_string(),
            jurisdiction: EXTRACTION_FAILED.to_string(),
            contract_type: EXTRACTION_FAILED.to_string(),
            termination_date: EXTRACTION_FAILED.to_string(),
            monetary_amounts: vec![EXTRACTION_FAILED.to_string()],
            key_obligations: vec![EXTRACTION_FAILED.to_string()],
        }
    }

    pub fn is_failed(&self) -> bool {
        self.agreement_date == EXTRACTION_FAILED
            && self.parties.iter().all(|p| p == EXTRACTION_FAILED)
    }

    /// Flatten into labelled entities attributed to `page`, dropping
    /// placeholder values.
    pub fn to_entities(&self, page: usize) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut push = |label: &str, value: &str| {
            let value = value.trim();
            if !value.is_empty() && value != NOT_FOUND && value != EXTRACTION_FAILED {
                out.push(Entity::new(label, value, page));
            }
        };

        for party in &self.parties {
            push("Party", party);
        }
        push("Agreement Date", &self.agreement_date);
        push("Jurisdiction", &self.jurisdiction);
        push("Contract Type", &self.contract_type);
        push("Termination Date", &self.termination_date);
        for amount in &self.monetary_amounts {
            push("Monetary Amount", amount);
        }
        for obligation in &self.key_obligations {
            push("Key Obligation", obligation);
        }
        out
    }
}

const KEY_ENTITIES_PROMPT: &str = r#"You are an expert AI trained to analyze legal contracts. Your task is to extract comprehensive key entities from the provided text of a contract.

From the 'Contract Page Text' below, extract the following information:
1. Parties: All companies, organizations, or individuals party to the agreement
2. Agreement Date: The effective date of the agreement
3. Jurisdiction: The governing law or jurisdiction for the agreement
4. Contract Type: The type of contract (e.g., NDA, Service Agreement, Employment Contract)
5. Termination Date: The termination or expiration date of the agreement
6. Monetary Amounts: Any monetary amounts, fees, or financial terms mentioned
7. Key Obligations: Key obligations, duties, or responsibilities mentioned

You must respond with ONLY a valid JSON object. Do not add any other text before or after the JSON object.

The JSON object must have exactly these keys:
{
  "parties": [string],
  "agreement_date": string,
  "jurisdiction": string,
  "contract_type": string,
  "termination_date": string,
  "monetary_amounts": [string],
  "key_obligations": [string]
}
Use "Not Found" for any string value that is not present in the text.

Contract Page Text:
-------------------
{contract_text}
-------------------
"#;

/// Ask the chat model for [`KeyEntities`]. Never fails: any error is logged
/// and the [`KeyEntities::failed`] sentinel is returned.
pub async fn extract_key_entities(chat: &dyn ChatModel, text: &str) -> KeyEntities {
    info!(chars = text.chars().count(), "extracting key entities with LLM");
    let prompt = KEY_ENTITIES_PROMPT.replace("{contract_text}", text);

    let raw = match chat.complete("", &prompt).await {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, "entity extraction request failed");
            return KeyEntities::failed();
        }
    };

    match parse_key_entities(&raw) {
        Some(entities) => {
            info!(
                parties = entities.parties.len(),
                contract_type = %entities.contract_type,
                "extracted key entities"
            );
            entities
        }
        None => {
            error!(response_chars = raw.len(), "could not parse entity extraction response");
            KeyEntities::failed()
        }
    }
}

/// Lenient parse of a model response: code fences and surrounding prose are
/// ignored, missing scalars become "Not Found", and a bare string is accepted
/// where a list is expected.
pub fn parse_key_entities(raw: &str) -> Option<KeyEntities> {
    let object = first_json_object(raw)?;
    let value: serde_json::Value = serde_json::from_str(object).ok()?;
    if !value.is_object() {
        return None;
    }

    let scalar = |key: &str| -> String {
        match value.get(key) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(serde_json::Value::Null) | None => NOT_FOUND.to_string(),
            Some(serde_json::Value::String(_)) => NOT_FOUND.to_string(),
            Some(other) => other.to_string(),
        }
    };
    let list = |key: &str| -> Vec<String> {
        match value.get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    serde_json::Value::String(s) => Some(s.trim().to_string()),
                    serde_json::Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect(),
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                vec![s.trim().to_string()]
            }
            _ => Vec::new(),
        }
    };

    Some(KeyEntities {
        parties: list("parties"),
        agreement_date: scalar("agreement_date"),
        jurisdiction: scalar("jurisdiction"),
        contract_type: scalar("contract_type"),
        termination_date: scalar("termination_date"),
        monetary_amounts: list("monetary_amounts"),
        key_obligations: list("key_obligations"),
    })
}

/// The first balanced `{...}` in `raw`, skipping braces inside strings.
fn first_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

static PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        (
            "Monetary Value",
            r"(?i)\$[\d,]+(?:\.\d{2})?\b|\b\d+\s*(?:USD|dollars|Dollars)\b",
        ),
        (
            "Date",
            r"(?i)\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}\b|\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
        ),
        (
            "Email",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Z|a-z]{2,}\b",
        ),
        (
            "Phone",
            r"\b(?:\+?1[-.\s]?)?\(?[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b",
        ),
    ]
    .into_iter()
    .filter_map(|(label, pattern)| match Regex::new(pattern) {
        Ok(re) => Some((label, re)),
        Err(e) => {
            error!(label, error = %e, "invalid entity pattern");
            None
        }
    })
    .collect()
});

/// Money, dates, emails and phone numbers on every page, deduplicated.
pub fn extract_regex_entities(pages: &[PageContent]) -> Vec<Entity> {
    let mut found = Vec::new();
    for page in pages {
        for (label, re) in PATTERNS.iter() {
            for m in re.find_iter(&page.text) {
                let value = m.as_str().trim();
                if !value.is_empty() {
                    found.push(Entity::new(*label, value, page.page_number));
                }
            }
        }
    }
    let unique = dedupe(found);
    info!(count = unique.len(), "extracted regex entities");
    unique
}

/// Drop repeated `(label, value, page)` triples, keeping first occurrences.
pub fn dedupe(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert((e.label.clone(), e.value.clone(), e.page)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityMode {
    Llm,
    Regex,
    Both,
}

impl FromStr for EntityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "llm" => Ok(Self::Llm),
            "regex" => Ok(Self::Regex),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "Unknown entities mode: '{}'. Must be llm, regex, or both.",
                other
            )),
        }
    }
}

/// Extract entities for a whole contract.
///
/// The LLM only sees the first page. When it fails outright in `llm` mode
/// the regex extractor is used instead; without a chat model both LLM modes
/// degrade to regex.
pub async fn extract_for_contract(
    mode: EntityMode,
    chat: Option<&dyn ChatModel>,
    pages: &[PageContent],
) -> Vec<Entity> {
    let first_page = pages.iter().find(|p| !p.text.trim().is_empty());

    let llm_entities = match (mode, chat, first_page) {
        (EntityMode::Regex, _, _) => None,
        (_, None, _) => {
            warn!("no chat model available, using regex entity extraction");
            None
        }
        (_, _, None) => None,
        (_, Some(chat), Some(page)) => {
            let key = extract_key_entities(chat, &page.text).await;
            if key.is_failed() {
                None
            } else {
                Some(key.to_entities(page.page_number))
            }
        }
    };

    let entities = match (mode, llm_entities) {
        (EntityMode::Llm, Some(llm)) => llm,
        (EntityMode::Both, Some(mut llm)) => {
            llm.extend(extract_regex_entities(pages));
            llm
        }
        _ => extract_regex_entities(pages),
    };

    dedupe(entities)
}
