use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

/// One chunk as produced by an extraction handler. Either field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedChunk {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl ExtractedChunk {
    pub fn new(content: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            content: Some(content.into()),
            metadata: Some(metadata),
        }
    }
}

/// A chunk with both content and metadata present.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl TryFrom<ExtractedChunk> for ExtractedDocument {
    type Error = AppError;

    fn try_from(chunk: ExtractedChunk) -> Result<Self, Self::Error> {
        match (chunk.content, chunk.metadata) {
            (Some(content), Some(metadata)) => Ok(Self { content, metadata }),
            (None, metadata) => Err(AppError::MalformedDocument(format!(
                "Extracted document does not contain 'content' field: {}",
                Value::Object(metadata.unwrap_or_default())
            ))),
            (Some(content), None) => Err(AppError::MalformedDocument(format!(
                "Extracted document does not contain 'metadata' field: {content:.80}"
            ))),
        }
    }
}
