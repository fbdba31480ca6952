use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::{error::AppError, storage::types::ExtractedChunk};
use lopdf::Document;
use serde_json::{Map, Value};
use tracing::debug;

use super::{base_metadata, option_str, option_u64, ExtractionHandler, FILE_OPTION};

/// `extract pdf`: one chunk per page in `pdf_spage..=pdf_epage`, skipping pages
/// without text.
pub struct PdfExtractor;

#[async_trait]
impl ExtractionHandler for PdfExtractor {
    async fn run(&self, options: &Map<String, Value>) -> Result<Vec<ExtractedChunk>, AppError> {
        let path = PathBuf::from(option_str(options, FILE_OPTION)?);
        let start_page = option_u64(options, "pdf_spage")?;
        let end_page = option_u64(options, "pdf_epage")?;

        let worker_path = path.clone();
        let pages = tokio::task::spawn_blocking(move || {
            extract_pages(&worker_path, start_page, end_page)
        })
        .await??;

        debug!(file = %path.display(), pages = pages.len(), "pdf pages extracted");

        Ok(pages
            .into_iter()
            .map(|(page, text)| {
                let mut metadata = base_metadata(&path, "pdf");
                metadata.insert("page".into(), Value::from(page));
                ExtractedChunk::new(text, metadata)
            })
            .collect())
    }
}

fn extract_pages(
    path: &Path,
    start_page: Option<u64>,
    end_page: Option<u64>,
) -> Result<Vec<(u32, String)>, AppError> {
    let document = Document::load(path).map_err(|e| {
        AppError::Extraction(format!("failed to parse PDF '{}': {e}", path.display()))
    })?;
    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();

    let mut pages = Vec::new();
    for page in select_pages(&page_numbers, start_page, end_page) {
        let text = document.extract_text(&[page]).map_err(|e| {
            AppError::Extraction(format!(
                "failed to read page {page} of '{}': {e}",
                path.display()
            ))
        })?;
        let text = text.trim();
        if !text.is_empty() {
            pages.push((page, text.to_string()));
        }
    }
    Ok(pages)
}

/// Page numbers inside the inclusive range, in ascending order.
pub fn select_pages(pages: &[u32], start_page: Option<u64>, end_page: Option<u64>) -> Vec<u32> {
    let start = start_page.unwrap_or(1);
    let mut selected: Vec<u32> = pages
        .iter()
        .copied()
        .filter(|page| u64::from(*page) >= start)
        .filter(|page| end_page.map_or(true, |end| u64::from(*page) <= end))
        .collect();
    selected.sort_unstable();
    selected
}
