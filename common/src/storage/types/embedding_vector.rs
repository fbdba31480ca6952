use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const FLOAT32: &str = "float32";

/// A vector produced by an embedding model, with the shape and element type it
/// was transmitted with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub model: String,
    pub element_type: String,
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(model: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            model: model.into(),
            element_type: FLOAT32.to_string(),
            shape: vec![values.len()],
            values,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Base64 of the values as little-endian `f32` bytes.
    pub fn encode_values(&self) -> String {
        let bytes: Vec<u8> = self.values.iter().flat_map(|v| v.to_le_bytes()).collect();
        STANDARD.encode(bytes)
    }

    /// Rebuilds a vector from its base64 wire form, checking the declared shape.
    pub fn decode(
        model: impl Into<String>,
        encoded: &str,
        shape: Vec<usize>,
        element_type: &str,
    ) -> Result<Self, AppError> {
        if element_type != FLOAT32 {
            return Err(AppError::Embedding(format!(
                "unsupported embedding element type '{element_type}'"
            )));
        }
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| AppError::Embedding(format!("invalid embedding payload: {e}")))?;
        if bytes.len() % 4 != 0 {
            return Err(AppError::Embedding(format!(
                "embedding payload of {} bytes is not a float32 sequence",
                bytes.len()
            )));
        }
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .filter_map(|chunk| <[u8; 4]>::try_from(chunk).ok())
            .map(f32::from_le_bytes)
            .collect();

        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(AppError::Embedding(format!(
                "embedding shape {shape:?} does not match {} values",
                values.len()
            )));
        }

        Ok(Self {
            model: model.into(),
            element_type: element_type.to_string(),
            shape,
            values,
        })
    }
}
