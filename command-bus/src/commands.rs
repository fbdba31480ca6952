//! Typed request/response pairs for the commands served by the dispatcher.
//!
//! The argument and output types are shared by the client and the server-side
//! handlers so both ends agree on the JSON shape.

use common::{error::AppError, storage::types::EmbeddingVector};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::envelope;

pub trait RemoteCommand {
    const MODE: &'static str;
    const CMD: &'static str;
    type Args: Serialize + Send + Sync;
    type Output: DeserializeOwned;

    fn command_id() -> String {
        envelope::command_id(Self::MODE, Self::CMD)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RagLoadArgs {
    pub rag_name: String,
}

/// Loads a stored retrieval configuration; the output is the raw JSON document.
pub struct RagLoad;

impl RemoteCommand for RagLoad {
    const MODE: &'static str = "rag";
    const CMD: &'static str = "load";
    type Args = RagLoadArgs;
    type Output = Value;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractLoadArgs {
    pub extract_name: String,
}

/// Loads a stored extraction configuration; the output is the raw JSON document.
pub struct ExtractLoad;

impl RemoteCommand for ExtractLoad {
    const MODE: &'static str = "extract";
    const CMD: &'static str = "load";
    type Args = ExtractLoadArgs;
    type Output = Value;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedStartArgs {
    pub embed_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedStarted {
    pub embed_name: String,
    pub backend: String,
    pub dimension: usize,
    #[serde(default)]
    pub already_started: bool,
}

pub struct EmbedStart;

impl RemoteCommand for EmbedStart {
    const MODE: &'static str = "embed";
    const CMD: &'static str = "start";
    type Args = EmbedStartArgs;
    type Output = EmbedStarted;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedEmbeddingArgs {
    pub embed_name: String,
    pub original_data: Vec<String>,
}

/// One embedded text: base64 little-endian values plus their shape and type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingItem {
    pub embed: String,
    pub shape: Vec<usize>,
    #[serde(rename = "type")]
    pub element_type: String,
    pub data: String,
}

impl EmbeddingItem {
    pub fn from_vector(vector: &EmbeddingVector, text: String) -> Self {
        Self {
            embed: vector.encode_values(),
            shape: vector.shape.clone(),
            element_type: vector.element_type.clone(),
            data: text,
        }
    }

    pub fn to_vector(&self, model: &str) -> Result<EmbeddingVector, AppError> {
        EmbeddingVector::decode(model, &self.embed, self.shape.clone(), &self.element_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingBatch {
    pub data: Vec<EmbeddingItem>,
}

pub struct EmbedEmbedding;

impl RemoteCommand for EmbedEmbedding {
    const MODE: &'static str = "embed";
    const CMD: &'static str = "embedding";
    type Args = EmbedEmbeddingArgs;
    type Output = EmbeddingBatch;
}
