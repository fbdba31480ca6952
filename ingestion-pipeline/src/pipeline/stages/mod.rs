use std::{path::Path, sync::Arc};

use common::{
    auth::PermissionGate,
    error::AppError,
    storage::types::{ExtractedDocument, RecordDraft},
};
use serde_json::{Map, Value};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument};

use super::{
    config::SUCCESS_MESSAGE,
    context::RegistrationContext,
    state::{
        Committed, ConfigurationLoaded, DocumentsRegistered, EmbeddingStarted, Ready,
        RegistrationMachine, SignedIn, StoreConnected,
    },
};
use crate::extraction::{list_files, CommandDefinition, ExtractionHandler, FILE_OPTION};

#[instrument(
    level = "trace",
    skip_all,
    fields(run_id = %ctx.run_id, rag_name = %ctx.request.rag_name)
)]
pub async fn load_configuration(
    machine: RegistrationMachine<(), Ready>,
    ctx: &mut RegistrationContext<'_>,
) -> Result<RegistrationMachine<(), ConfigurationLoaded>, AppError> {
    let configuration = ctx.services.load_rag_config(&ctx.request.rag_name).await?;

    info!(
        run_id = %ctx.run_id,
        rag_name = %configuration.rag_name,
        rag_type = %configuration.rag_type,
        extract_count = configuration.extract.len(),
        "retrieval configuration loaded"
    );
    ctx.configuration = Some(configuration);

    machine
        .load_configuration()
        .map_err(|(_, guard)| map_guard_error("load_configuration", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(run_id = %ctx.run_id, rag_name = %ctx.request.rag_name)
)]
pub async fn verify_signin(
    machine: RegistrationMachine<(), ConfigurationLoaded>,
    ctx: &mut RegistrationContext<'_>,
) -> Result<RegistrationMachine<(), SignedIn>, AppError> {
    let session = ctx.session.ok_or_else(|| {
        AppError::Authorization("This command can only be run within a signed-in session.".into())
    })?;
    let identity = session
        .current_identity()?
        .ok_or_else(|| AppError::Authorization("No signin found for this session.".into()))?;

    debug!(
        run_id = %ctx.run_id,
        user_name = %identity.user_name,
        groups = ?identity.groups,
        "signin verified"
    );
    ctx.identity = Some(identity);

    machine
        .verify_signin()
        .map_err(|(_, guard)| map_guard_error("verify_signin", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(run_id = %ctx.run_id, rag_name = %ctx.request.rag_name)
)]
pub async fn start_embedding(
    machine: RegistrationMachine<(), SignedIn>,
    ctx: &mut RegistrationContext<'_>,
) -> Result<RegistrationMachine<(), EmbeddingStarted>, AppError> {
    let embed_name = ctx.configuration()?.embed_name()?.to_string();
    let started = ctx.services.start_embedding(&embed_name).await?;

    info!(
        run_id = %ctx.run_id,
        embed_name = %started.embed_name,
        backend = %started.backend,
        dimension = started.dimension,
        already_started = started.already_started,
        "embedding service ready"
    );

    machine
        .start_embedding()
        .map_err(|(_, guard)| map_guard_error("start_embedding", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(run_id = %ctx.run_id, rag_name = %ctx.request.rag_name)
)]
pub async fn connect_store(
    machine: RegistrationMachine<(), EmbeddingStarted>,
    ctx: &mut RegistrationContext<'_>,
) -> Result<RegistrationMachine<(), StoreConnected>, AppError> {
    let store = ctx.stores.create(ctx.configuration()?).await?;
    let transaction = store.connect().await?;

    debug!(run_id = %ctx.run_id, backend = store.backend(), "vector store connected");
    ctx.transaction = Some(transaction);

    machine
        .connect_store()
        .map_err(|(_, guard)| map_guard_error("connect_store", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(run_id = %ctx.run_id, rag_name = %ctx.request.rag_name)
)]
pub async fn register_documents(
    machine: RegistrationMachine<(), StoreConnected>,
    ctx: &mut RegistrationContext<'_>,
) -> Result<RegistrationMachine<(), DocumentsRegistered>, AppError> {
    let configuration = ctx.configuration()?;
    let embed_name = configuration.embed_name()?.to_string();
    let extract_names: Vec<String> = configuration
        .extract
        .iter()
        .filter(|name| !name.trim().is_empty())
        .cloned()
        .collect();

    for extract_name in &extract_names {
        register_extraction(ctx, extract_name, &embed_name).await?;
    }

    machine
        .register_documents()
        .map_err(|(_, guard)| map_guard_error("register_documents", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(run_id = %ctx.run_id, rag_name = %ctx.request.rag_name)
)]
pub async fn commit(
    machine: RegistrationMachine<(), DocumentsRegistered>,
    ctx: &mut RegistrationContext<'_>,
) -> Result<RegistrationMachine<(), Committed>, AppError> {
    let transaction = ctx.take_transaction()?;
    let committed = transaction.commit().await?;

    ctx.report.records_committed = committed;
    ctx.report.message = SUCCESS_MESSAGE.to_string();
    info!(
        run_id = %ctx.run_id,
        rag_name = %ctx.request.rag_name,
        records = committed,
        files = ctx.report.files_processed,
        skipped_files = ctx.report.files_skipped,
        skipped_chunks = ctx.report.chunks_skipped,
        "registration committed"
    );

    machine
        .commit()
        .map_err(|(_, guard)| map_guard_error("commit", &guard))
}

/// One extraction configuration: resolve its command, check permission, then
/// extract, embed and stage every selected file.
#[instrument(level = "trace", skip(ctx, embed_name), fields(run_id = %ctx.run_id))]
async fn register_extraction(
    ctx: &mut RegistrationContext<'_>,
    extract_name: &str,
    embed_name: &str,
) -> Result<(), AppError> {
    let request = ctx.request;
    let data_dir = request.data_dir.as_path();
    let extraction = ctx.services.load_extract_config(extract_name).await?;
    let command = CommandDefinition::load(data_dir, &extraction.extract_cmd).await?;
    let handler = ctx.extractors.resolve(&command.mode, &command.cmd)?;
    let options = command.merged_options(&extraction, data_dir);

    let identity = ctx.identity()?;
    if !identity.signin.validate(
        identity,
        &identity.groups,
        &command.mode,
        &command.cmd,
        &options,
    ) {
        return Err(AppError::Authorization(format!(
            "You do not have permission to execute this command. mode={}, cmd={}",
            command.mode, command.cmd
        )));
    }

    let files = list_files(
        data_dir,
        extraction.loadpath.as_deref(),
        extraction.loadregs.as_deref(),
    )
    .await?;
    info!(
        run_id = %ctx.run_id,
        extract_name,
        mode = %command.mode,
        cmd = %command.cmd,
        files = files.len(),
        "extraction configuration resolved"
    );

    for file in &files {
        register_file(ctx, &handler, &options, file, embed_name).await?;
    }
    Ok(())
}

async fn register_file(
    ctx: &mut RegistrationContext<'_>,
    handler: &Arc<dyn ExtractionHandler>,
    options: &Map<String, Value>,
    file: &Path,
    embed_name: &str,
) -> Result<(), AppError> {
    let mut file_options = options.clone();
    file_options.insert(
        FILE_OPTION.into(),
        Value::String(file.display().to_string()),
    );

    let chunks = match handler.run(&file_options).await {
        Ok(chunks) => chunks,
        Err(err) => {
            ctx.report.files_skipped = ctx.report.files_skipped.saturating_add(1);
            ctx.warn(format!(
                "Failed to execute extract command for file '{}'. Skipping registration for this file. Warning: {err}",
                file.display()
            ));
            return Ok(());
        }
    };
    ctx.report.files_processed = ctx.report.files_processed.saturating_add(1);

    let request = ctx.request;
    for chunk in chunks {
        let document = match ExtractedDocument::try_from(chunk) {
            Ok(document) => document,
            Err(err) => {
                ctx.report.chunks_skipped = ctx.report.chunks_skipped.saturating_add(1);
                ctx.warn(format!("{err} file='{}'", file.display()));
                continue;
            }
        };

        let vector = ctx.services.embed(embed_name, &document.content).await?;
        let draft = RecordDraft::from_document(document, vector);
        ctx.transaction_mut()?.insert_record(&request.rag_name, draft).await?;
    }

    debug!(
        run_id = %ctx.run_id,
        file = %file.display(),
        staged = ctx.transaction.as_ref().map_or(0, |t| t.staged()),
        "file registered"
    );
    Ok(())
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid registration pipeline transition during {event}: {guard:?}"
    ))
}
