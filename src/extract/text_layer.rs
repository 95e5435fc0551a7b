//! Text-layer extraction.
//!
//! `pdf-extract` is tried first because it handles font encodings well; if it
//! rejects the document, `lopdf` is used page by page so a single bad page
//! does not lose the rest of the document.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, warn};

use super::{ExtractionStrategy, PageContent};
use crate::error::{ContractError, Result};
use crate::text::{dehyphenate, normalize_whitespace_preserve_newlines};

pub struct TextLayerStrategy;

impl ExtractionStrategy for TextLayerStrategy {
    fn name(&self) -> &str {
        "text"
    }

    fn extract(
        &self,
        pdf_path: &Path,
        max_pages: Option<usize>,
        _lang: &str,
    ) -> Result<Vec<PageContent>> {
        let bytes = std::fs::read(pdf_path).map_err(|e| {
            ContractError::Extraction(format!(
                "Failed to read PDF file {}: {}",
                pdf_path.display(),
                e
            ))
        })?;
        extract_from_bytes(&bytes, max_pages)
    }
}

pub(crate) fn extract_from_bytes(bytes: &[u8], max_pages: Option<usize>) -> Result<Vec<PageContent>> {
    // pdf-extract can panic on malformed content streams.
    let by_pages = catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));

    let raw_pages: Vec<std::result::Result<String, String>> = match by_pages {
        Ok(Ok(pages)) => pages.into_iter().map(Ok).collect(),
        Ok(Err(e)) => {
            debug!(error = %e, "pdf-extract failed, retrying page by page with lopdf");
            extract_with_lopdf(bytes)?
        }
        Err(_) => {
            debug!("pdf-extract panicked, retrying page by page with lopdf");
            extract_with_lopdf(bytes)?
        }
    };

    let limit = max_pages.unwrap_or(usize::MAX);
    let pages = raw_pages
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, page)| match page {
            Ok(text) => PageContent::new(i + 1, clean_page(&text)),
            Err(e) => {
                warn!(page = i + 1, error = %e, "failed to extract page text");
                PageContent::failed(i + 1, e)
            }
        })
        .collect();

    Ok(pages)
}

fn extract_with_lopdf(bytes: &[u8]) -> Result<Vec<std::result::Result<String, String>>> {
    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ContractError::Extraction(format!("Failed to process PDF file: {}", e)))?;

    let pages = doc
        .get_pages()
        .keys()
        .map(|&page_no| doc.extract_text(&[page_no]).map_err(|e| e.to_string()))
        .collect();
    Ok(pages)
}

fn clean_page(text: &str) -> String {
    normalize_whitespace_preserve_newlines(&dehyphenate(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_an_extraction_error() {
        let err = extract_from_bytes(b"not a pdf", None).unwrap_err();
        assert!(matches!(err, ContractError::Extraction(_)));
    }

    #[test]
    fn missing_file_is_an_extraction_error() {
        let err = TextLayerStrategy
            .extract(Path::new("/nonexistent/contract.pdf"), None, "eng")
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read PDF file"));
    }

    #[test]
    fn clean_page_joins_hyphens_and_collapses_space() {
        assert_eq!(
            clean_page("The  agree-\nment   is\n  binding "),
            "The agreement is\nbinding"
        );
    }
}
