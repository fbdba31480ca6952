use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use serde_json::Value;

use super::{parse_args, ServerContext};
use crate::{commands::ExtractLoadArgs, dispatcher::CommandHandler};

/// `extract_load`: returns `<data_dir>/.agent/extract-<extract_name>.json`.
pub struct ExtractLoadHandler {
    context: Arc<ServerContext>,
}

impl ExtractLoadHandler {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl CommandHandler for ExtractLoadHandler {
    async fn execute(&self, args: Value) -> Result<Value, AppError> {
        let args: ExtractLoadArgs = parse_args(args)?;
        self.context
            .read_agent_config("extract", "Extract", &args.extract_name)
            .await
    }
}
