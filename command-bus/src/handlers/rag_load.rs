use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use serde_json::Value;
use tracing::debug;

use super::{parse_args, ServerContext};
use crate::{commands::RagLoadArgs, dispatcher::CommandHandler};

/// `rag_load`: returns `<data_dir>/.agent/rag-<rag_name>.json`.
pub struct RagLoadHandler {
    context: Arc<ServerContext>,
}

impl RagLoadHandler {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl CommandHandler for RagLoadHandler {
    async fn execute(&self, args: Value) -> Result<Value, AppError> {
        let args: RagLoadArgs = parse_args(args)?;
        debug!(rag_name = %args.rag_name, "loading RAG configuration");
        self.context
            .read_agent_config("rag", "RAG", &args.rag_name)
            .await
    }
}
