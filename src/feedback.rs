//! Answer feedback log.
//!
//! Each rating is appended to `<data>/feedback/feedback.log` as one JSON
//! object per line.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::info;

use crate::error::{ContractError, Result};
use crate::text::truncate_chars;

const ANSWER_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Positive,
    Negative,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRecord {
    pub message_id: String,
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub question: String,
    pub answer: String,
    /// Source text shown with the answer; only its length is logged.
    #[serde(default)]
    pub context: String,
}

#[derive(Serialize)]
struct FeedbackLine<'a> {
    timestamp: String,
    message_id: &'a str,
    #[serde(rename = "type")]
    kind: FeedbackKind,
    question: &'a str,
    answer: &'a str,
    context_length: usize,
}

pub fn log_feedback(path: &Path, record: &FeedbackRecord) -> Result<()> {
    if record.message_id.trim().is_empty() {
        return Err(ContractError::Validation(
            "message_id must not be empty".to_string(),
        ));
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ContractError::Registry(format!("Failed to create feedback dir: {}", e)))?;
    }

    let line = FeedbackLine {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        message_id: &record.message_id,
        kind: record.kind,
        question: &record.question,
        answer: truncate_chars(&record.answer, ANSWER_PREVIEW_CHARS),
        context_length: record.context.chars().count(),
    };
    let json = serde_json::to_string(&line)
        .map_err(|e| ContractError::Registry(format!("Failed to encode feedback: {}", e)))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ContractError::Registry(format!("Failed to open feedback log: {}", e)))?;
    writeln!(file, "{}", json)
        .map_err(|e| ContractError::Registry(format!("Failed to write feedback: {}", e)))?;

    info!(message_id = %record.message_id, kind = ?record.kind, "feedback recorded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(kind: FeedbackKind, answer: &str) -> FeedbackRecord {
        FeedbackRecord {
            message_id: "m-1".to_string(),
            kind,
            question: "Who are the parties?".to_string(),
            answer: answer.to_string(),
            context: "abcdef".to_string(),
        }
    }

    #[test]
    fn test_appends_json_lines() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("feedback").join("feedback.log");

        log_feedback(&path, &record(FeedbackKind::Positive, "short")).unwrap();
        log_feedback(&path, &record(FeedbackKind::Negative, &"y".repeat(150))).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "positive");
        assert_eq!(lines[0]["context_length"], 6);
        assert_eq!(lines[1]["type"], "negative");
        assert_eq!(lines[1]["answer"].as_str().unwrap().len(), 100);
    }

    #[test]
    fn test_rejects_missing_message_id() {
        let tmp = TempDir::new().unwrap();
        let mut r = record(FeedbackKind::Positive, "a");
        r.message_id = " ".to_string();
        assert!(log_feedback(&tmp.path().join("f.log"), &r).is_err());
    }

    #[test]
    fn test_record_deserializes_from_api_shape() {
        let r: FeedbackRecord = serde_json::from_str(
            r#"{"message_id":"x","type":"negative","question":"q","answer":"a"}"#,
        )
        .unwrap();
        assert_eq!(r.kind, FeedbackKind::Negative);
        assert!(r.context.is_empty());
    }
}
