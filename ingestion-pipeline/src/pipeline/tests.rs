use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use command_bus::{
    commands::EmbedStarted,
    handlers::{default_registry, ServerContext},
    Dispatcher, RpcClient,
};
use common::{
    auth::{SigninFile, StaticSession},
    broker::memory::MemoryBroker,
    error::AppError,
    storage::{
        db::SurrealDbClient,
        surreal_store::SurrealVectorStore,
        types::{
            EmbeddingVector, ExtractedChunk, ExtractionConfiguration, RetrievalConfiguration,
        },
        vector_store::{BackendRegistry, VectorStore, VectorStoreFactory},
    },
    utils::config::RpcPolicy,
};
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use super::{
    services::{DefaultRegistrationServices, RegistrationServices},
    RegistrationPipeline, RegistrationRequest, SUCCESS_MESSAGE,
};
use crate::extraction::{ExtractionHandler, ExtractorRegistry, FILE_OPTION};

const SIGNIN: &str = r#"
users:
  - uid: 1
    name: alice
    groups: [editor]
  - uid: 2
    name: guest
    groups: [guest]
groups:
  - gid: 1
    name: user
  - gid: 2
    name: editor
    parent: user
  - gid: 3
    name: guest
cmdrule:
  policy: deny
  rules:
    - groups: [user]
      mode: extract
      cmds: [stub, text]
      rule: allow
"#;

const NO_METADATA: &str = "<no-metadata>";

struct MockServices {
    configuration: Value,
    extractions: HashMap<String, Value>,
    fail_embed_on: Option<usize>,
    embed_calls: AtomicUsize,
    calls: Mutex<Vec<&'static str>>,
}

impl MockServices {
    fn new(extract: &[&str]) -> Self {
        let mut extractions = HashMap::new();
        extractions.insert(
            "docs".to_string(),
            json!({
                "extract_name": "docs",
                "extract_cmd": "stub",
                "loadpath": "docs",
                "loadregs": r"\.txt$"
            }),
        );
        extractions.insert(
            "secret".to_string(),
            json!({"extract_name": "secret", "extract_cmd": "locked", "loadpath": "docs"}),
        );

        Self {
            configuration: json!({
                "rag_name": "kb1",
                "rag_type": "vector_surreal",
                "embed": "mini",
                "extract": extract
            }),
            extractions,
            fail_embed_on: None,
            embed_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing_embed_on(mut self, call: usize) -> Self {
        self.fail_embed_on = Some(call);
        self
    }

    async fn record(&self, stage: &'static str) {
        self.calls.lock().await.push(stage);
    }

    async fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl RegistrationServices for MockServices {
    async fn load_rag_config(&self, rag_name: &str) -> Result<RetrievalConfiguration, AppError> {
        self.record("rag_load").await;
        RetrievalConfiguration::from_value(rag_name, self.configuration.clone())
    }

    async fn start_embedding(&self, embed_name: &str) -> Result<EmbedStarted, AppError> {
        self.record("embed_start").await;
        Ok(EmbedStarted {
            embed_name: embed_name.to_string(),
            backend: "hashed".into(),
            dimension: 3,
            already_started: false,
        })
    }

    async fn load_extract_config(
        &self,
        extract_name: &str,
    ) -> Result<ExtractionConfiguration, AppError> {
        self.record("extract_load").await;
        let raw = self.extractions.get(extract_name).cloned().ok_or_else(|| {
            AppError::Remote(format!(
                "Specified Extract configuration '{extract_name}' not found on server."
            ))
        })?;
        Ok(serde_json::from_value(raw)?)
    }

    async fn embed(&self, embed_name: &str, text: &str) -> Result<EmbeddingVector, AppError> {
        self.record("embed").await;
        let call = self.embed_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_embed_on == Some(call) {
            return Err(AppError::RemoteCommunication(
                "Response timed out after 1s.".into(),
            ));
        }
        Ok(EmbeddingVector::new(
            embed_name,
            vec![text.len() as f32, 1.0, 0.5],
        ))
    }
}

/// One chunk per line. Files whose name starts with `a` fail to extract and a
/// line reading `<no-metadata>` yields a chunk without metadata.
struct StubExtractor;

#[async_trait]
impl ExtractionHandler for StubExtractor {
    async fn run(&self, options: &Map<String, Value>) -> Result<Vec<ExtractedChunk>, AppError> {
        let file = options.get(FILE_OPTION).and_then(Value::as_str).unwrap();
        let name = Path::new(file).file_name().unwrap().to_string_lossy();
        if name.starts_with('a') {
            return Err(AppError::Extraction("corrupt file".into()));
        }

        let text = tokio::fs::read_to_string(file).await?;
        Ok(text
            .lines()
            .enumerate()
            .map(|(index, line)| {
                if line == NO_METADATA {
                    ExtractedChunk {
                        content: Some(line.to_string()),
                        metadata: None,
                    }
                } else {
                    let mut metadata = Map::new();
                    metadata.insert("source".into(), json!(file));
                    metadata.insert("page".into(), json!(index + 1));
                    ExtractedChunk::new(line, metadata)
                }
            })
            .collect())
    }
}

struct FixedStore(Arc<SurrealVectorStore>);

#[async_trait]
impl VectorStoreFactory for FixedStore {
    async fn create(
        &self,
        _config: &RetrievalConfiguration,
    ) -> Result<Arc<dyn VectorStore>, AppError> {
        let store: Arc<dyn VectorStore> = self.0.clone();
        Ok(store)
    }
}

struct Fixture {
    data: TempDir,
    store: Arc<SurrealVectorStore>,
}

impl Fixture {
    async fn new(dimension: usize) -> Self {
        let data = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(data.path().join("docs")).unwrap();
        write_json(
            &data.path().join(".cmds/cmd-stub.json"),
            &json!({"mode": "extract", "cmd": "stub", "title": "stub"}),
        );
        write_json(
            &data.path().join(".cmds/cmd-locked.json"),
            &json!({"mode": "extract", "cmd": "locked", "title": "locked"}),
        );

        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("rag", &database)
            .await
            .expect("in-memory surrealdb");
        let store = SurrealVectorStore::with_client(db, "rag", &database);
        store.create_schema("kb1", dimension).await.unwrap();

        Self {
            data,
            store: Arc::new(store),
        }
    }

    fn write_doc(&self, name: &str, lines: &[&str]) {
        std::fs::write(self.data.path().join("docs").join(name), lines.join("\n")).unwrap();
    }

    fn request(&self) -> RegistrationRequest {
        RegistrationRequest::new("kb1", self.data.path())
    }

    fn pipeline(&self, services: Arc<MockServices>) -> RegistrationPipeline {
        let mut extractors = ExtractorRegistry::new();
        extractors
            .register("extract", "stub", Arc::new(StubExtractor))
            .register("extract", "locked", Arc::new(StubExtractor));
        RegistrationPipeline::with_services(
            services,
            Arc::new(extractors),
            Arc::new(FixedStore(Arc::clone(&self.store))),
        )
    }

    async fn stored_ids(&self) -> Vec<String> {
        self.store.select_record_ids("kb1", None).await.unwrap()
    }
}

fn write_json(path: &Path, value: &Value) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec(value).unwrap()).unwrap();
}

fn session(user_name: &str) -> StaticSession {
    let signin = Arc::new(SigninFile::from_yaml_str(SIGNIN).unwrap());
    StaticSession::new(signin.identity_for(user_name))
}

#[tokio::test]
async fn registration_commits_every_valid_chunk() {
    let fixture = Fixture::new(3).await;
    fixture.write_doc("b.txt", &["first page", "second page"]);
    fixture.write_doc("ignored.md", &["not selected"]);
    let services = Arc::new(MockServices::new(&["docs"]));
    let pipeline = fixture.pipeline(services.clone());

    let report = pipeline
        .run(&fixture.request(), Some(&session("alice")))
        .await
        .expect("registration succeeds");

    assert_eq!(report.message, SUCCESS_MESSAGE);
    assert_eq!(report.rag_name, "kb1");
    assert_eq!(report.records_committed, 2);
    assert_eq!(report.files_processed, 1);
    assert!(report.warnings.is_empty());
    assert_eq!(fixture.stored_ids().await.len(), 2);
    assert_eq!(
        services.calls().await,
        vec!["rag_load", "embed_start", "extract_load", "embed", "embed"]
    );
}

#[tokio::test]
async fn empty_extract_list_fails_before_other_calls() {
    let fixture = Fixture::new(3).await;
    let services = Arc::new(MockServices::new(&[]));
    let pipeline = fixture.pipeline(services.clone());

    let err = pipeline
        .run(&fixture.request(), Some(&session("alice")))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert!(err.to_string().contains("does not contain valid extract names"));
    assert_eq!(services.calls().await, vec!["rag_load"]);
    assert!(fixture.stored_ids().await.is_empty());
}

#[tokio::test]
async fn failed_file_is_skipped_and_siblings_are_committed() {
    let fixture = Fixture::new(3).await;
    fixture.write_doc("a.txt", &["never read"]);
    fixture.write_doc("b.txt", &["kept one", "kept two"]);
    let services = Arc::new(MockServices::new(&["docs"]));
    let pipeline = fixture.pipeline(services);

    let report = pipeline
        .run(&fixture.request(), Some(&session("alice")))
        .await
        .expect("registration succeeds");

    assert_eq!(report.records_committed, 2);
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("a.txt"));
    assert!(report.warnings[0].contains("Skipping registration for this file"));

    let source = fixture
        .data
        .path()
        .join("docs")
        .join("b.txt")
        .display()
        .to_string();
    let from_b = fixture
        .store
        .select_record_ids("kb1", Some(&source))
        .await
        .unwrap();
    assert_eq!(from_b.len(), 2);
}

#[tokio::test]
async fn embedding_timeout_aborts_and_persists_nothing() {
    let fixture = Fixture::new(3).await;
    let lines: Vec<String> = (1..=10).map(|n| format!("chunk {n}")).collect();
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    fixture.write_doc("b.txt", &lines);
    let services = Arc::new(MockServices::new(&["docs"]).failing_embed_on(3));
    let pipeline = fixture.pipeline(services.clone());

    let err = pipeline
        .run(&fixture.request(), Some(&session("alice")))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::RemoteCommunication(_)));
    assert_eq!(services.embed_calls.load(Ordering::SeqCst), 3);
    assert!(fixture.stored_ids().await.is_empty());
}

#[tokio::test]
async fn malformed_chunks_are_skipped_with_a_warning() {
    let fixture = Fixture::new(3).await;
    fixture.write_doc("b.txt", &["one", NO_METADATA, "two"]);
    let services = Arc::new(MockServices::new(&["docs"]));
    let pipeline = fixture.pipeline(services);

    let report = pipeline
        .run(&fixture.request(), Some(&session("alice")))
        .await
        .expect("registration succeeds");

    assert_eq!(report.records_committed, 2);
    assert_eq!(report.chunks_skipped, 1);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("does not contain 'metadata' field"));
}

#[tokio::test]
async fn permission_denial_rolls_back_the_whole_run() {
    let fixture = Fixture::new(3).await;
    fixture.write_doc("b.txt", &["allowed one", "allowed two"]);
    let services = Arc::new(MockServices::new(&["docs", "secret"]));
    let pipeline = fixture.pipeline(services.clone());

    let err = pipeline
        .run(&fixture.request(), Some(&session("alice")))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Authorization(_)));
    assert!(err.to_string().contains("cmd=locked"));
    assert_eq!(
        services.calls().await,
        vec![
            "rag_load",
            "embed_start",
            "extract_load",
            "embed",
            "embed",
            "extract_load"
        ]
    );
    assert!(fixture.stored_ids().await.is_empty());
}

#[tokio::test]
async fn user_without_rights_is_denied_before_extraction() {
    let fixture = Fixture::new(3).await;
    fixture.write_doc("b.txt", &["content"]);
    let services = Arc::new(MockServices::new(&["docs"]));
    let pipeline = fixture.pipeline(services.clone());

    let err = pipeline
        .run(&fixture.request(), Some(&session("guest")))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Authorization(_)));
    assert_eq!(
        services.calls().await,
        vec!["rag_load", "embed_start", "extract_load"]
    );
}

#[tokio::test]
async fn missing_session_or_signin_is_an_authorization_error() {
    let fixture = Fixture::new(3).await;
    let services = Arc::new(MockServices::new(&["docs"]));
    let pipeline = fixture.pipeline(services.clone());

    let err = pipeline.run(&fixture.request(), None).await.unwrap_err();
    assert!(matches!(err, AppError::Authorization(_)));
    assert_eq!(services.calls().await, vec!["rag_load"]);

    let unknown_user = session("mallory");
    let err = pipeline
        .run(&fixture.request(), Some(&unknown_user))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No signin found"));
}

#[tokio::test]
async fn invalid_request_never_reaches_services() {
    let fixture = Fixture::new(3).await;
    let services = Arc::new(MockServices::new(&["docs"]));
    let pipeline = fixture.pipeline(services.clone());

    let request = RegistrationRequest::new("kb 1", fixture.data.path());
    let err = pipeline
        .run(&request, Some(&session("alice")))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert!(services.calls().await.is_empty());
}

#[tokio::test]
async fn unknown_command_definition_is_fatal() {
    let fixture = Fixture::new(3).await;
    let mut services = MockServices::new(&["docs"]);
    services.extractions.insert(
        "docs".into(),
        json!({"extract_name": "docs", "extract_cmd": "absent", "loadpath": "docs"}),
    );
    let pipeline = fixture.pipeline(Arc::new(services));

    let err = pipeline
        .run(&fixture.request(), Some(&session("alice")))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn unsupported_backend_fails_when_connecting() {
    let fixture = Fixture::new(3).await;
    let mut services = MockServices::new(&["docs"]);
    services.configuration["rag_type"] = json!("vector_pg");
    let services = Arc::new(services);
    let pipeline = RegistrationPipeline::with_services(
        services.clone(),
        Arc::new(ExtractorRegistry::with_defaults()),
        Arc::new(BackendRegistry),
    );

    let err = pipeline
        .run(&fixture.request(), Some(&session("alice")))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnsupportedBackend(ref tag) if tag == "vector_pg"));
    assert_eq!(services.calls().await, vec!["rag_load", "embed_start"]);
}

fn write_agent_files(data_dir: &Path) {
    write_json(
        &data_dir.join(".agent/rag-kb1.json"),
        &json!({
            "rag_name": "kb1",
            "rag_type": "vector_surreal",
            "embed": "mini",
            "extract": ["notes"]
        }),
    );
    write_json(
        &data_dir.join(".agent/rag-empty.json"),
        &json!({"rag_name": "empty", "rag_type": "vector_surreal", "embed": "mini", "extract": []}),
    );
    write_json(
        &data_dir.join(".agent/embed-mini.json"),
        &json!({"embed_name": "mini", "embed_backend": "hashed", "embed_dimension": 8}),
    );
    write_json(
        &data_dir.join(".agent/extract-notes.json"),
        &json!({
            "extract_name": "notes",
            "extract_cmd": "text_default",
            "loadpath": "docs",
            "loadregs": r"\.txt$"
        }),
    );
    write_json(
        &data_dir.join(".cmds/cmd-text_default.json"),
        &json!({
            "mode": "extract",
            "cmd": "text",
            "title": "text_default",
            "chunk_min_chars": 1,
            "chunk_max_chars": 200
        }),
    );
}

#[tokio::test]
async fn registration_runs_end_to_end_over_the_broker() {
    let fixture = Fixture::new(8).await;
    write_agent_files(fixture.data.path());
    fixture.write_doc("readme.txt", &["Registration notes for the knowledge base."]);

    let broker = Arc::new(MemoryBroker::new());
    let context = Arc::new(ServerContext::new(fixture.data.path()));
    let dispatcher = Dispatcher::new(
        broker.clone(),
        "test",
        default_registry(context),
        4,
        Duration::from_millis(50),
    );
    let (shutdown, rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        dispatcher
            .run_until(async {
                let _ = rx.await;
            })
            .await
    });

    let client = RpcClient::new(
        broker.clone(),
        "test",
        RpcPolicy {
            retry_count: 0,
            retry_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        },
    );
    let pipeline = RegistrationPipeline::with_services(
        Arc::new(DefaultRegistrationServices::new(client)),
        Arc::new(ExtractorRegistry::with_defaults()),
        Arc::new(FixedStore(Arc::clone(&fixture.store))),
    );
    let alice = session("alice");

    let report = pipeline
        .run(&fixture.request(), Some(&alice))
        .await
        .expect("registration succeeds");
    assert_eq!(report.records_committed, 1);
    assert_eq!(fixture.stored_ids().await.len(), 1);
    assert_eq!(broker.push_count("sv-test"), 4);

    let err = pipeline
        .run(
            &RegistrationRequest::new("empty", fixture.data.path()),
            Some(&alice),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("does not contain valid extract names"));
    assert_eq!(broker.push_count("sv-test"), 5);

    let _ = shutdown.send(());
    server.await.unwrap().unwrap();
}
