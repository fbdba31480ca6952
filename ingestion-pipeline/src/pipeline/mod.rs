mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{RegistrationReport, RegistrationRequest, SUCCESS_MESSAGE};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultRegistrationServices, RegistrationServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use command_bus::RpcClient;
use common::{
    auth::SessionContext,
    error::AppError,
    storage::vector_store::{BackendRegistry, VectorStoreFactory},
};
use tracing::{debug, info};

use self::{
    context::RegistrationContext,
    stages::{
        commit, connect_store, load_configuration, register_documents, start_embedding,
        verify_signin,
    },
    state::ready,
};
use crate::extraction::ExtractorRegistry;

/// Registers the documents selected by a retrieval configuration into its vector store.
#[allow(clippy::module_name_repetitions)]
pub struct RegistrationPipeline {
    services: Arc<dyn RegistrationServices>,
    extractors: Arc<ExtractorRegistry>,
    stores: Arc<dyn VectorStoreFactory>,
}

impl RegistrationPipeline {
    /// Pipeline talking to the dispatcher through `client`, with the built-in
    /// extraction commands and storage backends.
    pub fn new(client: RpcClient) -> Self {
        Self::with_services(
            Arc::new(DefaultRegistrationServices::new(client)),
            Arc::new(ExtractorRegistry::with_defaults()),
            Arc::new(BackendRegistry),
        )
    }

    pub fn with_services(
        services: Arc<dyn RegistrationServices>,
        extractors: Arc<ExtractorRegistry>,
        stores: Arc<dyn VectorStoreFactory>,
    ) -> Self {
        Self {
            services,
            extractors,
            stores,
        }
    }

    /// Runs one registration. Either every staged record is committed or, on any
    /// fatal error, nothing from this run is persisted.
    #[tracing::instrument(skip_all, fields(rag_name = %request.rag_name))]
    pub async fn run(
        &self,
        request: &RegistrationRequest,
        session: Option<&dyn SessionContext>,
    ) -> Result<RegistrationReport, AppError> {
        request.validate()?;

        let mut ctx = RegistrationContext::new(
            request,
            self.services.as_ref(),
            session,
            self.extractors.as_ref(),
            self.stores.as_ref(),
        );

        match Self::drive_pipeline(&mut ctx).await {
            Ok(()) => Ok(ctx.report),
            Err(err) => {
                debug!(run_id = %ctx.run_id, error = %err, "registration run failed");
                ctx.discard_transaction().await;
                Err(err)
            }
        }
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    async fn drive_pipeline(ctx: &mut RegistrationContext<'_>) -> Result<(), AppError> {
        let machine = ready();
        let pipeline_started = Instant::now();

        let machine = load_configuration(machine, ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = verify_signin(machine, ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = start_embedding(machine, ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = connect_store(machine, ctx)
            .await
            .map_err(|err| ctx.abort(err))?;

        let stage_start = Instant::now();
        let machine = register_documents(machine, ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let register_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = commit(machine, ctx).await.map_err(|err| ctx.abort(err))?;
        let commit_duration = stage_start.elapsed();

        info!(
            run_id = %ctx.run_id,
            rag_name = %ctx.request.rag_name,
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            register_ms = Self::duration_millis(register_duration),
            commit_ms = Self::duration_millis(commit_duration),
            warnings = ctx.report.warnings.len(),
            "registration pipeline finished"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests;
