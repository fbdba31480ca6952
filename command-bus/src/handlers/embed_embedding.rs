use std::sync::Arc;

use async_trait::async_trait;
use common::{error::AppError, storage::types::EmbeddingVector};
use serde_json::Value;
use tracing::debug;

use super::{ensure_name, parse_args, ServerContext};
use crate::{
    commands::{EmbedEmbeddingArgs, EmbeddingBatch, EmbeddingItem},
    dispatcher::CommandHandler,
};

/// `embed_embedding`: embeds `original_data` with a previously started model.
pub struct EmbedEmbeddingHandler {
    context: Arc<ServerContext>,
}

impl EmbedEmbeddingHandler {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl CommandHandler for EmbedEmbeddingHandler {
    async fn execute(&self, args: Value) -> Result<Value, AppError> {
        let args: EmbedEmbeddingArgs = parse_args(args)?;
        ensure_name("Embed", &args.embed_name)?;

        let provider = self
            .context
            .embed_model(&args.embed_name)
            .await
            .ok_or_else(|| {
                AppError::Embedding(format!(
                    "Embed model '{}' is not started.",
                    args.embed_name
                ))
            })?;

        let vectors = provider
            .embed_batch(args.original_data.clone())
            .await
            .map_err(|e| AppError::Embedding(e.to_string()))?;
        if vectors.len() != args.original_data.len() {
            return Err(AppError::Embedding(format!(
                "expected {} embeddings, model returned {}",
                args.original_data.len(),
                vectors.len()
            )));
        }
        debug!(embed_name = %args.embed_name, count = vectors.len(), "texts embedded");

        let data = args
            .original_data
            .into_iter()
            .zip(vectors)
            .map(|(text, values)| {
                let vector = EmbeddingVector::new(args.embed_name.clone(), values);
                EmbeddingItem::from_vector(&vector, text)
            })
            .collect();

        Ok(serde_json::to_value(EmbeddingBatch { data })?)
    }
}

#[cfg(test)]
mod tests {
    use common::utils::embedding::EmbeddingProvider;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn embeds_with_a_started_model() {
        let context = Arc::new(ServerContext::new("/tmp"));
        context
            .start_embed_model("mini", || async {
                EmbeddingProvider::new_hashed(4).map_err(AppError::from)
            })
            .await
            .unwrap();
        let handler = EmbedEmbeddingHandler::new(context);

        let value = handler
            .execute(json!({"embed_name": "mini", "original_data": ["one", "two"]}))
            .await
            .unwrap();
        let batch: EmbeddingBatch = serde_json::from_value(value).unwrap();

        assert_eq!(batch.data.len(), 2);
        assert_eq!(batch.data[0].data, "one");
        assert_eq!(batch.data[0].shape, vec![4]);
        assert_eq!(batch.data[0].element_type, "float32");
        assert_eq!(batch.data[1].to_vector("mini").unwrap().dimension(), 4);
    }

    #[tokio::test]
    async fn unknown_model_is_an_embedding_error() {
        let handler = EmbedEmbeddingHandler::new(Arc::new(ServerContext::new("/tmp")));

        let err = handler
            .execute(json!({"embed_name": "cold", "original_data": ["x"]}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Embedding(_)));
    }
}
