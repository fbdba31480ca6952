use async_trait::async_trait;
use command_bus::{
    commands::{
        EmbedEmbedding, EmbedEmbeddingArgs, EmbedStart, EmbedStartArgs, EmbedStarted, ExtractLoad,
        ExtractLoadArgs, RagLoad, RagLoadArgs,
    },
    RpcClient,
};
use common::{
    error::AppError,
    storage::types::{EmbeddingVector, ExtractionConfiguration, RetrievalConfiguration},
};
use tracing::debug;

/// Remote operations the registration run depends on.
#[async_trait]
pub trait RegistrationServices: Send + Sync {
    async fn load_rag_config(&self, rag_name: &str) -> Result<RetrievalConfiguration, AppError>;

    async fn start_embedding(&self, embed_name: &str) -> Result<EmbedStarted, AppError>;

    async fn load_extract_config(
        &self,
        extract_name: &str,
    ) -> Result<ExtractionConfiguration, AppError>;

    async fn embed(&self, embed_name: &str, text: &str) -> Result<EmbeddingVector, AppError>;
}

/// Services backed by the command dispatcher, reached through the broker.
pub struct DefaultRegistrationServices {
    client: RpcClient,
}

impl DefaultRegistrationServices {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RegistrationServices for DefaultRegistrationServices {
    async fn load_rag_config(&self, rag_name: &str) -> Result<RetrievalConfiguration, AppError> {
        let raw = self
            .client
            .execute::<RagLoad>(&RagLoadArgs {
                rag_name: rag_name.to_string(),
            })
            .await?;
        RetrievalConfiguration::from_value(rag_name, raw)
    }

    async fn start_embedding(&self, embed_name: &str) -> Result<EmbedStarted, AppError> {
        self.client
            .execute::<EmbedStart>(&EmbedStartArgs {
                embed_name: embed_name.to_string(),
            })
            .await
            .map_err(embedding_error)
    }

    async fn load_extract_config(
        &self,
        extract_name: &str,
    ) -> Result<ExtractionConfiguration, AppError> {
        let raw = self
            .client
            .execute::<ExtractLoad>(&ExtractLoadArgs {
                extract_name: extract_name.to_string(),
            })
            .await?;
        serde_json::from_value(raw).map_err(|e| {
            AppError::Validation(format!(
                "Extract configuration '{extract_name}' is malformed: {e}"
            ))
        })
    }

    async fn embed(&self, embed_name: &str, text: &str) -> Result<EmbeddingVector, AppError> {
        let batch = self
            .client
            .execute::<EmbedEmbedding>(&EmbedEmbeddingArgs {
                embed_name: embed_name.to_string(),
                original_data: vec![text.to_string()],
            })
            .await
            .map_err(embedding_error)?;

        let item = batch.data.into_iter().next().ok_or_else(|| {
            AppError::Embedding(format!("Embed model '{embed_name}' returned no vectors."))
        })?;
        let vector = item.to_vector(embed_name)?;
        debug!(embed_name, dimension = vector.dimension(), "text embedded");
        Ok(vector)
    }
}

/// A warning from the embedding commands means the model is unusable. Transport
/// failures keep their own kind.
fn embedding_error(err: AppError) -> AppError {
    match err {
        AppError::Remote(message) => AppError::Embedding(message),
        other => other,
    }
}
