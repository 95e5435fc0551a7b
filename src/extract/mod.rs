//! PDF text extraction with strategy selection and OCR fallback.
//!
//! Two strategies implement [`ExtractionStrategy`]:
//!
//! - **[`TextLayerStrategy`]** (`text`) reads the embedded text layer.
//! - **[`OcrStrategy`]** (`ocr`) renders pages with `pdftoppm` and runs
//!   `tesseract`, reassembling word boxes in reading order.
//!
//! [`ExtractionService`] picks between them. In `auto` mode the text layer is
//! tried first and kept when it yields a reasonable amount of text per page;
//! otherwise OCR is attempted.
//!
//! ```text
//!  force_ocr ──────────────────────────────▶ OCR
//!  auto ─▶ text layer ─▶ avg chars >= min? ─▶ yes: text layer
//!                                          └▶ no:  OCR ─▶ failed? ─▶ text layer (if any)
//!  text | ocr ─────────────────────────────▶ that strategy
//! ```

mod ocr;
mod text_layer;

pub use ocr::{order_boxes_into_lines, parse_tesseract_tsv, OcrStrategy, WordBox};
pub use text_layer::TextLayerStrategy;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ExtractionSettings;
use crate::error::{ContractError, Result};

/// Text and metadata for a single PDF page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub text: String,
    /// 1-based page number.
    pub page_number: usize,
    #[serde(default)]
    pub section: Option<String>,
    /// Set when this page could not be extracted; `text` is then empty.
    #[serde(default)]
    pub error: Option<String>,
}

impl PageContent {
    pub fn new(page_number: usize, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            page_number,
            section: None,
            error: None,
        }
    }

    pub fn failed(page_number: usize, error: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            page_number,
            section: None,
            error: Some(error.into()),
        }
    }
}

/// A way of turning a PDF file into per-page text.
pub trait ExtractionStrategy: Send + Sync {
    /// Strategy name as used in configuration (`text`, `ocr`).
    fn name(&self) -> &str;

    fn extract(
        &self,
        pdf_path: &Path,
        max_pages: Option<usize>,
        lang: &str,
    ) -> Result<Vec<PageContent>>;
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub strategy: String,
    pub force_ocr: bool,
    pub ocr_lang: String,
    pub render_dpi: u32,
    pub max_pages: Option<usize>,
    pub min_avg_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionSettings::default().into()
    }
}

impl From<ExtractionSettings> for ExtractionConfig {
    fn from(s: ExtractionSettings) -> Self {
        Self {
            strategy: s.strategy,
            force_ocr: s.force_ocr,
            ocr_lang: s.ocr_lang,
            render_dpi: s.render_dpi,
            max_pages: s.max_pages,
            min_avg_chars: s.min_avg_chars,
        }
    }
}

/// Strategy selection, caching, and fallback.
///
/// Strategies are constructed lazily on first use and reused for the life of
/// the service.
pub struct ExtractionService {
    config: ExtractionConfig,
    strategies: HashMap<String, Arc<dyn ExtractionStrategy>>,
}

impl ExtractionService {
    pub fn new(config: ExtractionConfig) -> Self {
        info!(strategy = %config.strategy, force_ocr = config.force_ocr, "extraction service ready");
        Self {
            config,
            strategies: HashMap::new(),
        }
    }

    /// Register a strategy under its own name, replacing any cached one.
    pub fn with_strategy(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.strategies
            .insert(strategy.name().to_string(), strategy);
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    fn strategy(&mut self, name: &str) -> Result<Arc<dyn ExtractionStrategy>> {
        if let Some(s) = self.strategies.get(name) {
            return Ok(s.clone());
        }
        let created: Arc<dyn ExtractionStrategy> = match name {
            "text" => Arc::new(TextLayerStrategy),
            "ocr" => Arc::new(OcrStrategy::new(self.config.render_dpi)),
            other => {
                return Err(ContractError::Extraction(format!(
                    "Unknown extraction strategy: {}",
                    other
                )))
            }
        };
        self.strategies.insert(name.to_string(), created.clone());
        Ok(created)
    }

    /// True when the pages carry, on average, at least `min_avg_chars`
    /// non-padding characters.
    pub fn is_text_extraction_reasonable(&self, pages: &[PageContent]) -> bool {
        if pages.is_empty() {
            return false;
        }
        let total: usize = pages.iter().map(|p| p.text.trim().chars().count()).sum();
        let avg = total as f64 / pages.len() as f64;
        avg >= self.config.min_avg_chars as f64
    }

    pub fn extract(&mut self, pdf_path: &Path) -> Result<Vec<PageContent>> {
        let lang = self.config.ocr_lang.clone();
        let max_pages = self.config.max_pages;

        if self.config.force_ocr {
            info!(path = %pdf_path.display(), "forcing OCR extraction");
            return self.strategy("ocr")?.extract(pdf_path, max_pages, &lang);
        }

        if self.config.strategy != "auto" {
            let name = self.config.strategy.clone();
            return self.strategy(&name)?.extract(pdf_path, max_pages, &lang);
        }

        info!(path = %pdf_path.display(), "auto-detecting extraction strategy");
        let text_pages = match self
            .strategy("text")?
            .extract(pdf_path, max_pages, &lang)
        {
            Ok(pages) => {
                if self.is_text_extraction_reasonable(&pages) {
                    info!(pages = pages.len(), "text layer extraction successful");
                    return Ok(pages);
                }
                info!(pages = pages.len(), "text layer yield too low, trying OCR");
                Some(pages)
            }
            Err(e) => {
                warn!(error = %e, "text layer extraction failed, falling back to OCR");
                None
            }
        };

        match self.strategy("ocr")?.extract(pdf_path, max_pages, &lang) {
            Ok(pages) => Ok(pages),
            Err(ocr_err) => match text_pages {
                Some(pages) if !pages.is_empty() => {
                    warn!(error = %ocr_err, "OCR unavailable, keeping low-yield text layer");
                    Ok(pages)
                }
                _ => Err(ocr_err),
            },
        }
    }
}

/// Number of pages in a PDF.
pub fn page_count(pdf_path: &Path) -> Result<usize> {
    let doc = lopdf::Document::load(pdf_path)
        .map_err(|e| ContractError::Extraction(format!("Failed to open PDF: {}", e)))?;
    Ok(doc.get_pages().len())
}

/// Convenience wrapper: build a service from settings and extract.
pub fn extract_text_from_pdf(
    pdf_path: &Path,
    config: ExtractionConfig,
) -> Result<Vec<PageContent>> {
    info!(path = %pdf_path.display(), strategy = %config.strategy, "starting extraction");
    let mut service = ExtractionService::new(config);
    let pages = service.extract(pdf_path)?;
    info!(path = %pdf_path.display(), pages = pages.len(), "extraction finished");
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedStrategy {
        name: &'static str,
        result: std::result::Result<Vec<PageContent>, String>,
        calls: AtomicUsize,
    }

    impl FixedStrategy {
        fn ok(name: &'static str, pages: Vec<PageContent>) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Ok(pages),
                calls: AtomicUsize::new(0),
            })
        }

        fn err(name: &'static str, msg: &str) -> Arc<Self> {
            Arc::new(Self {
                name,
                result: Err(msg.to_string()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ExtractionStrategy for FixedStrategy {
        fn name(&self) -> &str {
            self.name
        }

        fn extract(&self, _: &Path, _: Option<usize>, _: &str) -> Result<Vec<PageContent>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result
                .clone()
                .map_err(ContractError::Extraction)
        }
    }

    fn long_page(n: usize) -> PageContent {
        PageContent::new(n, "x".repeat(200))
    }

    fn short_page(n: usize) -> PageContent {
        PageContent::new(n, "tiny")
    }

    fn service(strategy: &str) -> ExtractionService {
        ExtractionService::new(ExtractionConfig {
            strategy: strategy.to_string(),
            ..ExtractionConfig::default()
        })
    }

    fn path() -> PathBuf {
        PathBuf::from("contract.pdf")
    }

    #[test]
    fn reasonable_requires_pages_and_average() {
        let s = service("auto");
        assert!(!s.is_text_extraction_reasonable(&[]));
        assert!(s.is_text_extraction_reasonable(&[long_page(1), short_page(2)]));
        assert!(!s.is_text_extraction_reasonable(&[short_page(1)]));
    }

    #[test]
    fn auto_keeps_good_text_layer() {
        let text = FixedStrategy::ok("text", vec![long_page(1)]);
        let ocr = FixedStrategy::ok("ocr", vec![short_page(1)]);
        let mut s = service("auto")
            .with_strategy(text.clone())
            .with_strategy(ocr.clone());
        let pages = s.extract(&path()).unwrap();
        assert_eq!(pages, vec![long_page(1)]);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn auto_falls_back_to_ocr_on_low_yield() {
        let text = FixedStrategy::ok("text", vec![short_page(1)]);
        let ocr = FixedStrategy::ok("ocr", vec![long_page(1)]);
        let mut s = service("auto").with_strategy(text).with_strategy(ocr);
        assert_eq!(s.extract(&path()).unwrap(), vec![long_page(1)]);
    }

    #[test]
    fn auto_falls_back_to_ocr_on_text_error() {
        let text = FixedStrategy::err("text", "broken xref");
        let ocr = FixedStrategy::ok("ocr", vec![long_page(1)]);
        let mut s = service("auto").with_strategy(text).with_strategy(ocr);
        assert_eq!(s.extract(&path()).unwrap(), vec![long_page(1)]);
    }

    #[test]
    fn auto_keeps_low_yield_text_when_ocr_fails() {
        let text = FixedStrategy::ok("text", vec![short_page(1)]);
        let ocr = FixedStrategy::err("ocr", "tesseract missing");
        let mut s = service("auto").with_strategy(text).with_strategy(ocr);
        assert_eq!(s.extract(&path()).unwrap(), vec![short_page(1)]);
    }

    #[test]
    fn auto_reports_ocr_error_when_nothing_else() {
        let text = FixedStrategy::err("text", "broken");
        let ocr = FixedStrategy::err("ocr", "tesseract missing");
        let mut s = service("auto").with_strategy(text).with_strategy(ocr);
        let err = s.extract(&path()).unwrap_err();
        assert!(err.to_string().contains("tesseract missing"));
    }

    #[test]
    fn force_ocr_skips_text_layer() {
        let text = FixedStrategy::ok("text", vec![long_page(1)]);
        let ocr = FixedStrategy::ok("ocr", vec![short_page(1)]);
        let mut s = ExtractionService::new(ExtractionConfig {
            force_ocr: true,
            ..ExtractionConfig::default()
        })
        .with_strategy(text.clone())
        .with_strategy(ocr);
        assert_eq!(s.extract(&path()).unwrap(), vec![short_page(1)]);
        assert_eq!(text.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn explicit_strategy_is_used_without_fallback() {
        let text = FixedStrategy::ok("text", vec![short_page(1)]);
        let ocr = FixedStrategy::ok("ocr", vec![long_page(1)]);
        let mut s = service("text").with_strategy(text).with_strategy(ocr.clone());
        assert_eq!(s.extract(&path()).unwrap(), vec![short_page(1)]);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_strategy_is_an_extraction_error() {
        let mut s = service("paddle");
        let err = s.extract(&path()).unwrap_err();
        assert!(matches!(err, ContractError::Extraction(_)));
    }
}
