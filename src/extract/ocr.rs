//! OCR extraction via the `pdftoppm` and `tesseract` command-line tools.
//!
//! Pages are rendered to PNG, recognized into word boxes (tesseract TSV
//! output), and the boxes are reassembled into lines in reading order:
//! boxes are grouped into horizontal bands by vertical centre, bands run top
//! to bottom, and boxes within a band run left to right.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use super::{ExtractionStrategy, PageContent};
use crate::error::{ContractError, Result};
use crate::text::normalize_whitespace_preserve_newlines;

pub struct OcrStrategy {
    render_dpi: u32,
}

impl OcrStrategy {
    pub fn new(render_dpi: u32) -> Self {
        Self { render_dpi }
    }
}

impl ExtractionStrategy for OcrStrategy {
    fn name(&self) -> &str {
        "ocr"
    }

    fn extract(
        &self,
        pdf_path: &Path,
        max_pages: Option<usize>,
        lang: &str,
    ) -> Result<Vec<PageContent>> {
        ensure_tool("pdftoppm", "-v")?;
        ensure_tool("tesseract", "--version")?;

        let work_dir = tempfile::Builder::new()
            .prefix("ca-ocr-")
            .tempdir()
            .map_err(|e| {
                ContractError::Extraction(format!("Failed to create OCR work dir: {}", e))
            })?;

        let pages = self.run(pdf_path, max_pages, lang, work_dir.path())?;
        if let Err(e) = work_dir.close() {
            warn!(error = %e, "failed to remove OCR work dir");
        }
        Ok(pages)
    }
}

impl OcrStrategy {
    fn run(
        &self,
        pdf_path: &Path,
        max_pages: Option<usize>,
        lang: &str,
        work_dir: &Path,
    ) -> Result<Vec<PageContent>> {
        info!(path = %pdf_path.display(), dpi = self.render_dpi, lang, "running OCR");

        let mut cmd = Command::new("pdftoppm");
        cmd.arg("-r").arg(self.render_dpi.to_string()).arg("-png");
        if let Some(n) = max_pages {
            cmd.arg("-l").arg(n.to_string());
        }
        cmd.arg(pdf_path).arg(work_dir.join("page"));

        let output = cmd
            .output()
            .map_err(|e| ContractError::Extraction(format!("Failed to run pdftoppm: {}", e)))?;
        if !output.status.success() {
            return Err(ContractError::Extraction(format!(
                "pdftoppm failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let images = rendered_pages(work_dir)?;
        debug!(count = images.len(), "rendered pages");

        let mut pages = Vec::with_capacity(images.len());
        for (page_number, image) in images {
            match recognize_page(&image, lang) {
                Ok(text) => pages.push(PageContent::new(page_number, text)),
                Err(e) => {
                    warn!(page = page_number, error = %e, "failed to OCR page");
                    pages.push(PageContent::failed(page_number, e.to_string()));
                }
            }
        }
        Ok(pages)
    }
}

fn ensure_tool(program: &str, version_flag: &str) -> Result<()> {
    match Command::new(program).arg(version_flag).output() {
        Ok(_) => Ok(()),
        Err(_) => Err(ContractError::ServiceUnavailable(format!(
            "{} is not installed or not on PATH",
            program
        ))),
    }
}

/// Rendered page images as `(page_number, path)`, ordered by page.
///
/// pdftoppm zero-pads the page suffix depending on the page count
/// (`page-1.png`, `page-01.png`, ...).
fn rendered_pages(work_dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let entries = std::fs::read_dir(work_dir)
        .map_err(|e| ContractError::Extraction(format!("Failed to list OCR output: {}", e)))?;

    let mut pages: Vec<(usize, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter_map(|p| {
            let stem = p.file_stem()?.to_str()?;
            let number = stem.strip_prefix("page-")?.parse::<usize>().ok()?;
            Some((number, p))
        })
        .collect();
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages)
}

fn recognize_page(image: &Path, lang: &str) -> Result<String> {
    let output = Command::new("tesseract")
        .arg(image)
        .arg("stdout")
        .arg("-l")
        .arg(lang)
        .arg("tsv")
        .output()
        .map_err(|e| ContractError::Extraction(format!("Failed to run tesseract: {}", e)))?;

    if !output.status.success() {
        return Err(ContractError::Extraction(format!(
            "tesseract failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let boxes = parse_tesseract_tsv(&String::from_utf8_lossy(&output.stdout));
    let lines = order_boxes_into_lines(boxes);
    Ok(normalize_whitespace_preserve_newlines(&lines.join("\n")))
}

/// A recognized word and its bounding box in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct WordBox {
    pub text: String,
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl WordBox {
    fn center_y(&self) -> f64 {
        self.top + self.height / 2.0
    }
}

/// Parse tesseract `tsv` output into word boxes.
///
/// Only word-level rows (level 5) with non-negative confidence and
/// non-blank text are kept.
pub fn parse_tesseract_tsv(tsv: &str) -> Vec<WordBox> {
    tsv.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 || cols[0].trim() != "5" {
                return None;
            }
            let conf: f64 = cols[10].trim().parse().ok()?;
            let text = cols[11].trim();
            if conf < 0.0 || text.is_empty() {
                return None;
            }
            Some(WordBox {
                text: text.to_string(),
                left: cols[6].trim().parse().ok()?,
                top: cols[7].trim().parse().ok()?,
                width: cols[8].trim().parse().ok()?,
                height: cols[9].trim().parse().ok()?,
            })
        })
        .collect()
}

struct Band {
    boxes: Vec<WordBox>,
    center: f64,
}

impl Band {
    fn median_height(&self) -> f64 {
        let mut heights: Vec<f64> = self.boxes.iter().map(|b| b.height).collect();
        heights.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = heights.len() / 2;
        if heights.len() % 2 == 0 {
            (heights[mid - 1] + heights[mid]) / 2.0
        } else {
            heights[mid]
        }
    }

    fn accepts(&self, b: &WordBox) -> bool {
        let tolerance = self.median_height() / 2.0;
        (b.center_y() - self.center).abs() <= tolerance
    }

    fn push(&mut self, b: WordBox) {
        let n = self.boxes.len() as f64;
        self.center = (self.center * n + b.center_y()) / (n + 1.0);
        self.boxes.push(b);
    }
}

/// Sort word boxes into reading order and join each horizontal band into a
/// line of text.
pub fn order_boxes_into_lines(mut boxes: Vec<WordBox>) -> Vec<String> {
    boxes.sort_by(|a, b| {
        a.center_y()
            .partial_cmp(&b.center_y())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.left
                    .partial_cmp(&b.left)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let mut bands: Vec<Band> = Vec::new();
    for b in boxes {
        match bands.last_mut() {
            Some(band) if band.accepts(&b) => band.push(b),
            _ => bands.push(Band {
                center: b.center_y(),
                boxes: vec![b],
            }),
        }
    }

    bands
        .into_iter()
        .map(|mut band| {
            band.boxes.sort_by(|a, b| {
                a.left
                    .partial_cmp(&b.left)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            band.boxes
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}
