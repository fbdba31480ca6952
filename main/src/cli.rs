use std::{path::PathBuf, sync::Arc};

use clap::{Args, Parser, Subcommand};
use command_bus::{
    commands::{EmbedStart, EmbedStartArgs, RagLoad, RagLoadArgs},
    RpcClient,
};
use common::{
    auth::{SigninFile, StaticSession},
    broker::{redis_broker::RedisBroker, BrokerTransport},
    error::AppError,
    storage::{
        types::RetrievalConfiguration,
        vector_store::{BackendRegistry, VectorStore, VectorStoreFactory},
    },
    utils::config::AppConfig,
};
use ingestion_pipeline::{RegistrationPipeline, RegistrationRequest};
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "main", about = "Register documents into retrieval stores")]
pub struct Cli {
    /// Data directory holding `.cmds/` and relative document paths. Defaults to `data_dir` from config.
    #[arg(long, global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract, embed and store the documents of a RAG configuration
    Regist(RegistArgs),
    /// Create the backend prerequisites of a RAG configuration's vector store
    Provision(RagArgs),
    /// Create the table and indexes of a RAG configuration
    CreateSchema(CreateSchemaArgs),
    /// List stored record ids
    ListRecords(ListRecordsArgs),
}

#[derive(Debug, Args)]
pub struct RagArgs {
    #[arg(long)]
    pub rag_name: String,
}

#[derive(Debug, Args)]
pub struct RegistArgs {
    #[command(flatten)]
    pub rag: RagArgs,

    /// User to run the registration as
    #[arg(long, env = "SIGNIN_USER")]
    pub user: Option<String>,

    /// YAML file with users, groups and command rules
    #[arg(long, env = "SIGNIN_FILE")]
    pub signin_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct CreateSchemaArgs {
    #[command(flatten)]
    pub rag: RagArgs,

    /// Vector dimension; asked from the embedding service when omitted
    #[arg(long)]
    pub dimension: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ListRecordsArgs {
    #[command(flatten)]
    pub rag: RagArgs,

    /// Only records extracted from this file
    #[arg(long)]
    pub source: Option<String>,

    #[arg(long, requires = "end_page")]
    pub start_page: Option<i64>,

    #[arg(long, requires = "start_page")]
    pub end_page: Option<i64>,
}

pub async fn execute(cli: Cli, config: &AppConfig) -> Result<Value, AppError> {
    let data_dir = cli.data.unwrap_or_else(|| config.data_dir());
    let broker: Arc<dyn BrokerTransport> = Arc::new(RedisBroker::new(&config.broker_url)?);
    let client = RpcClient::new(broker, &config.server_name, config.rpc_policy());

    match cli.command {
        Command::Regist(args) => {
            let (request, session) = registration_inputs(args, data_dir)?;
            let report = RegistrationPipeline::new(client)
                .run(&request, Some(&session))
                .await?;
            Ok(serde_json::to_value(report)?)
        }
        Command::Provision(args) => {
            let (_, store) = open_store(&client, &args.rag_name).await?;
            store.provision().await?;
            Ok(json!(format!(
                "Vector store for '{}' provisioned.",
                args.rag_name
            )))
        }
        Command::CreateSchema(args) => {
            let (configuration, store) = open_store(&client, &args.rag.rag_name).await?;
            let dimension = match args.dimension {
                Some(dimension) => dimension,
                None => {
                    client
                        .execute::<EmbedStart>(&EmbedStartArgs {
                            embed_name: configuration.embed_name()?.to_string(),
                        })
                        .await?
                        .dimension
                }
            };
            store.create_schema(&args.rag.rag_name, dimension).await?;
            info!(rag_name = %args.rag.rag_name, dimension, "schema ensured");
            Ok(json!(format!(
                "Schema for '{}' created with dimension {dimension}.",
                args.rag.rag_name
            )))
        }
        Command::ListRecords(args) => {
            let (_, store) = open_store(&client, &args.rag.rag_name).await?;
            let source = args.source.as_deref();
            let ids = match (args.start_page, args.end_page) {
                (Some(start), Some(end)) => {
                    store
                        .select_record_ids_in_page_range(&args.rag.rag_name, source, start, end)
                        .await?
                }
                _ => store.select_record_ids(&args.rag.rag_name, source).await?,
            };
            Ok(json!({
                "rag_name": args.rag.rag_name,
                "count": ids.len(),
                "vec_ids": ids
            }))
        }
    }
}

/// Checks the run parameters and resolves the caller's identity from the signin file.
pub fn registration_inputs(
    args: RegistArgs,
    data_dir: PathBuf,
) -> Result<(RegistrationRequest, StaticSession), AppError> {
    let request = RegistrationRequest::new(args.rag.rag_name, data_dir);
    request.validate()?;

    let user = args
        .user
        .filter(|user| !user.trim().is_empty())
        .ok_or_else(|| AppError::Validation("user is required.".into()))?;
    let signin_file = args
        .signin_file
        .ok_or_else(|| AppError::Validation("signin_file is required.".into()))?;

    let signin = Arc::new(SigninFile::load(&signin_file)?);
    Ok((request, StaticSession::new(signin.identity_for(&user))))
}

async fn open_store(
    client: &RpcClient,
    rag_name: &str,
) -> Result<(RetrievalConfiguration, Arc<dyn VectorStore>), AppError> {
    let raw = client
        .execute::<RagLoad>(&RagLoadArgs {
            rag_name: rag_name.to_string(),
        })
        .await?;
    let configuration = RetrievalConfiguration::from_value(rag_name, raw)?;
    let store = BackendRegistry.create(&configuration).await?;
    Ok((configuration, store))
}

#[cfg(test)]
mod tests {
    use common::auth::SessionContext;

    use super::*;

    const SIGNIN: &str = r#"
users:
  - uid: 1
    name: alice
    groups: [user]
groups:
  - gid: 1
    name: user
cmdrule:
  policy: allow
  rules: []
"#;

    fn regist(argv: &[&str]) -> RegistArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Command::Regist(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_maintenance_commands() {
        let cli = Cli::try_parse_from([
            "main",
            "list-records",
            "--rag-name",
            "kb1",
            "--start-page",
            "2",
            "--end-page",
            "4",
            "--data",
            "/srv/data",
        ])
        .unwrap();
        assert_eq!(cli.data, Some(PathBuf::from("/srv/data")));
        match cli.command {
            Command::ListRecords(args) => {
                assert_eq!(args.rag.rag_name, "kb1");
                assert_eq!(args.start_page, Some(2));
                assert_eq!(args.end_page, Some(4));
                assert!(args.source.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["main", "create-schema", "--rag-name", "kb1", "--dimension", "384"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::CreateSchema(CreateSchemaArgs { dimension: Some(384), .. })
        ));
    }

    #[test]
    fn page_range_needs_both_ends() {
        assert!(Cli::try_parse_from(["main", "list-records", "--rag-name", "kb1", "--start-page", "2"])
            .is_err());
    }

    #[test]
    fn registration_requires_user_and_signin_file() {
        let args = regist(&["main", "regist", "--rag-name", "kb1", "--signin-file", "/nowhere.yml"]);
        let err = registration_inputs(
            RegistArgs {
                user: None,
                ..args
            },
            PathBuf::from("/data"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("user is required"));

        let args = regist(&["main", "regist", "--rag-name", "kb1", "--user", "alice"]);
        let err = registration_inputs(
            RegistArgs {
                signin_file: None,
                ..args
            },
            PathBuf::from("/data"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("signin_file is required"));

        let args = regist(&["main", "regist", "--rag-name", "bad name", "--user", "alice"]);
        let err = registration_inputs(args, PathBuf::from("/data")).unwrap_err();
        assert!(err.to_string().contains("RAG name can only contain"));
    }

    #[test]
    fn registration_resolves_identity_from_signin_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signin.yml");
        std::fs::write(&path, SIGNIN).unwrap();
        let path = path.display().to_string();

        let args = regist(&[
            "main",
            "regist",
            "--rag-name",
            "kb1",
            "--user",
            "alice",
            "--signin-file",
            &path,
        ]);
        let (request, session) = registration_inputs(args, dir.path().to_path_buf()).unwrap();

        assert_eq!(request.rag_name, "kb1");
        let identity = session.current_identity().unwrap().unwrap();
        assert_eq!(identity.user_name, "alice");
        assert_eq!(identity.groups, vec!["user".to_string()]);
    }

    #[test]
    fn missing_signin_file_is_reported() {
        let args = regist(&[
            "main",
            "regist",
            "--rag-name",
            "kb1",
            "--user",
            "alice",
            "--signin-file",
            "/definitely/not/here.yml",
        ]);
        let err = registration_inputs(args, PathBuf::from("/data")).unwrap_err();
        assert!(err.to_string().contains("signin_file is not found"));
    }
}
