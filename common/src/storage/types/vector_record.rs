use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{EmbeddingVector, ExtractedDocument};
use crate::error::AppError;

const UNKNOWN: &str = "unknown";

/// A persisted row: content, provenance and the embedding computed for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub vec_id: String,
    pub content_text: String,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_blob: Option<Vec<u8>>,
    pub content_size: usize,
    pub origin_name: String,
    pub origin_type: String,
    pub origin_url: String,
    pub metadata: Map<String, Value>,
    pub vec_model: String,
    pub vec_data: Vec<f32>,
}

/// Insert request for a [`VectorRecord`]. Fields left as `None` are generated or
/// derived from `metadata`; `content_text`, `metadata` and `vec_data` are required.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordDraft {
    pub vec_id: Option<String>,
    pub content_text: Option<String>,
    pub content_type: Option<String>,
    pub content_blob: Option<Vec<u8>>,
    pub origin_name: Option<String>,
    pub origin_type: Option<String>,
    pub origin_url: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub vec_model: Option<String>,
    pub vec_data: Option<Vec<f32>>,
}

impl RecordDraft {
    pub fn from_document(document: ExtractedDocument, embedding: EmbeddingVector) -> Self {
        Self {
            content_text: Some(document.content),
            metadata: Some(document.metadata),
            vec_model: Some(embedding.model),
            vec_data: Some(embedding.values),
            ..Self::default()
        }
    }
}

impl TryFrom<RecordDraft> for VectorRecord {
    type Error = AppError;

    fn try_from(draft: RecordDraft) -> Result<Self, Self::Error> {
        let content_text = draft
            .content_text
            .ok_or_else(|| AppError::Storage("content_text is required.".into()))?;
        let metadata = draft
            .metadata
            .ok_or_else(|| AppError::Storage("metadata is required.".into()))?;
        let vec_data = draft
            .vec_data
            .ok_or_else(|| AppError::Storage("vec_data is required.".into()))?;

        let from_metadata = |explicit: Option<String>, key: &str, fallback: &str| {
            explicit.unwrap_or_else(|| {
                metadata
                    .get(key)
                    .and_then(Value::as_str)
                    .unwrap_or(fallback)
                    .to_string()
            })
        };

        let content_type = from_metadata(draft.content_type, "content_type", "text");
        let origin_name = from_metadata(draft.origin_name, "origin_name", UNKNOWN);
        let origin_type = from_metadata(draft.origin_type, "origin_type", UNKNOWN);
        let origin_url = from_metadata(draft.origin_url, "origin_url", UNKNOWN);
        let vec_model = from_metadata(draft.vec_model, "vec_model", UNKNOWN);
        let content_size = draft.content_blob.as_ref().map_or(0, Vec::len);

        Ok(Self {
            vec_id: draft
                .vec_id
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            content_text,
            content_type,
            content_blob: draft.content_blob,
            content_size,
            origin_name,
            origin_type,
            origin_url,
            metadata,
            vec_model,
            vec_data,
        })
    }
}
