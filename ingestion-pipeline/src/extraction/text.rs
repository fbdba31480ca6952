use std::path::Path;

use async_trait::async_trait;
use common::{error::AppError, storage::types::ExtractedChunk};
use serde_json::{Map, Value};
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};

use super::{base_metadata, option_str, option_u64, ExtractionHandler, FILE_OPTION};

const DEFAULT_CHUNK_MIN_CHARS: usize = 500;
const DEFAULT_CHUNK_MAX_CHARS: usize = 2_000;

/// `extract text`: splits a UTF-8 file into character-bounded chunks.
pub struct TextExtractor;

#[async_trait]
impl ExtractionHandler for TextExtractor {
    async fn run(&self, options: &Map<String, Value>) -> Result<Vec<ExtractedChunk>, AppError> {
        let path = Path::new(option_str(options, FILE_OPTION)?);
        let min_chars = chunk_bound(options, "chunk_min_chars", DEFAULT_CHUNK_MIN_CHARS)?;
        let max_chars = chunk_bound(options, "chunk_max_chars", DEFAULT_CHUNK_MAX_CHARS)?;

        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::Extraction(format!("failed to read '{}': {e}", path.display()))
        })?;

        let chunks = split_text(&text, min_chars, max_chars)?;
        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(index, content)| {
                let mut metadata = base_metadata(path, "text");
                metadata.insert("chunk".into(), Value::from(index));
                ExtractedChunk::new(content, metadata)
            })
            .collect())
    }
}

fn chunk_bound(options: &Map<String, Value>, key: &str, default: usize) -> Result<usize, AppError> {
    match option_u64(options, key)? {
        Some(value) => usize::try_from(value)
            .map_err(|_| AppError::Extraction(format!("option '{key}' is out of range."))),
        None => Ok(default),
    }
}

/// Non-empty chunks of `text`, each at most `max_chars` characters long.
pub fn split_text(text: &str, min_chars: usize, max_chars: usize) -> Result<Vec<String>, AppError> {
    let capacity = ChunkCapacity::new(min_chars.min(max_chars))
        .with_max(max_chars)
        .map_err(|e| AppError::Extraction(format!("invalid chunk bounds: {e}")))?;
    let splitter = TextSplitter::new(ChunkConfig::new(capacity));

    Ok(splitter
        .chunks(text)
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(str::to_owned)
        .collect())
}
