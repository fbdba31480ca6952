use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    db::SurrealDbClient,
    types::{RecordDraft, VectorRecord},
    vector_store::{table_name, VectorStore, VectorStoreParams, VectorTransaction, BACKEND_SURREAL},
};
use crate::error::AppError;

/// Vector store backed by SurrealDB. The owner is the namespace and every
/// retrieval configuration gets its own `<service>_embedding` table.
pub struct SurrealVectorStore {
    db: SurrealDbClient,
    namespace: String,
    database: String,
}

impl SurrealVectorStore {
    pub async fn connect(params: &VectorStoreParams) -> Result<Self, AppError> {
        let credentials = match (&params.user, &params.pass) {
            (Some(user), Some(pass)) if !params.is_embedded() => {
                Some((user.as_str(), pass.as_str()))
            }
            _ => None,
        };
        let db = SurrealDbClient::new(
            &params.address(),
            credentials,
            params.owner(),
            &params.dbname,
            params.timeout,
        )
        .await?;

        Ok(Self {
            db,
            namespace: params.owner().to_string(),
            database: params.dbname.clone(),
        })
    }

    /// Wraps an existing client, e.g. an in-memory one.
    pub fn with_client(db: SurrealDbClient, namespace: &str, database: &str) -> Self {
        Self {
            db,
            namespace: namespace.to_string(),
            database: database.to_string(),
        }
    }

    /// Names of the indexes currently defined on the service's table.
    pub async fn table_indexes(&self, service: &str) -> Result<Vec<String>, AppError> {
        let table = table_name(service)?;
        let mut response = self.db.query(format!("INFO FOR TABLE {table};")).await?;
        let info: surrealdb::Value = response.take(0)?;
        let info_json = serde_json::to_value(info)?;

        let mut names: Vec<String> = info_json
            .get("Object")
            .and_then(|o| o.get("indexes"))
            .and_then(|i| i.get("Object"))
            .and_then(Value::as_object)
            .map(|indexes| indexes.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }

    async fn select_ids(
        &self,
        service: &str,
        source: Option<&str>,
        pages: Option<(i64, i64)>,
    ) -> Result<Vec<String>, AppError> {
        let table = table_name(service)?;

        let mut conditions = Vec::new();
        if source.is_some() {
            conditions.push("metadata.source = $source");
        }
        if pages.is_some() {
            conditions.push("metadata.page >= $start_page AND metadata.page <= $end_page");
        }
        let filter = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let (start_page, end_page) = pages.unwrap_or_default();
        let mut response = self
            .db
            .query(format!(
                "SELECT VALUE vec_id FROM type::table($table){filter};"
            ))
            .bind(("table", table))
            .bind(("source", source.map(str::to_string)))
            .bind(("start_page", start_page))
            .bind(("end_page", end_page))
            .await?;

        let mut ids: Vec<String> = response.take(0)?;
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl VectorStore for SurrealVectorStore {
    fn backend(&self) -> &'static str {
        BACKEND_SURREAL
    }

    async fn provision(&self) -> Result<(), AppError> {
        self.db
            .query(format!(
                "DEFINE NAMESPACE IF NOT EXISTS `{ns}`; USE NS `{ns}`; DEFINE DATABASE IF NOT EXISTS `{db}`; USE DB `{db}`;",
                ns = self.namespace,
                db = self.database
            ))
            .await?
            .check()?;
        info!(namespace = %self.namespace, database = %self.database, "vector store provisioned");
        Ok(())
    }

    async fn create_schema(&self, service: &str, dimension: usize) -> Result<(), AppError> {
        if dimension == 0 {
            return Err(AppError::Validation(
                "vector dimension must be greater than zero".into(),
            ));
        }
        let table = table_name(service)?;
        let statements = format!(
            "DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;\
             DEFINE FIELD IF NOT EXISTS created_at ON TABLE {table} TYPE datetime DEFAULT time::now();\
             DEFINE INDEX IF NOT EXISTS {table}_vec_id_idx ON TABLE {table} FIELDS vec_id UNIQUE;\
             DEFINE INDEX IF NOT EXISTS {table}_vec_data_idx ON TABLE {table} \
             FIELDS vec_data HNSW DIMENSION {dimension} DIST EUCLIDEAN;"
        );
        self.db.query(statements).await?.check()?;
        info!(table = %table, dimension, "vector schema ensured");
        Ok(())
    }

    async fn connect(&self) -> Result<Box<dyn VectorTransaction>, AppError> {
        Ok(Box::new(SurrealTransaction {
            db: self.db.clone(),
            staged: Vec::new(),
            finished: false,
        }))
    }

    async fn select_record_ids(
        &self,
        service: &str,
        source: Option<&str>,
    ) -> Result<Vec<String>, AppError> {
        self.select_ids(service, source, None).await
    }

    async fn select_record_ids_in_page_range(
        &self,
        service: &str,
        source: Option<&str>,
        start_page: i64,
        end_page: i64,
    ) -> Result<Vec<String>, AppError> {
        self.select_ids(service, source, Some((start_page, end_page)))
            .await
    }
}

/// Unit of work over a SurrealDB client. Records are staged in memory and sent
/// in a single `BEGIN ... COMMIT` block.
pub struct SurrealTransaction {
    db: SurrealDbClient,
    staged: Vec<(String, VectorRecord)>,
    finished: bool,
}

#[async_trait]
impl VectorTransaction for SurrealTransaction {
    async fn insert_record(&mut self, service: &str, draft: RecordDraft) -> Result<(), AppError> {
        let table = table_name(service)?;
        let record = VectorRecord::try_from(draft)?;
        debug!(table = %table, vec_id = %record.vec_id, "staging vector record");
        self.staged.push((table, record));
        Ok(())
    }

    fn staged(&self) -> usize {
        self.staged.len()
    }

    async fn commit(mut self: Box<Self>) -> Result<usize, AppError> {
        self.finished = true;
        let staged = std::mem::take(&mut self.staged);
        let count = staged.len();
        if count == 0 {
            return Ok(0);
        }

        let mut statements = String::from("BEGIN TRANSACTION;");
        for index in 0..count {
            statements.push_str(&format!(
                "CREATE type::thing($table_{index}, $id_{index}) CONTENT $record_{index};"
            ));
        }
        statements.push_str("COMMIT TRANSACTION;");

        let mut query = self.db.query(statements);
        for (index, (table, record)) in staged.into_iter().enumerate() {
            query = query
                .bind((format!("table_{index}"), table))
                .bind((format!("id_{index}"), record.vec_id.clone()))
                .bind((format!("record_{index}"), record));
        }

        query
            .await?
            .check()
            .map_err(|e| AppError::Storage(format!("commit failed: {e}")))?;
        info!(records = count, "vector transaction committed");
        Ok(count)
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), AppError> {
        self.finished = true;
        let discarded = std::mem::take(&mut self.staged).len();
        warn!(records = discarded, "vector transaction rolled back");
        Ok(())
    }
}

impl Drop for SurrealTransaction {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            warn!(
                records = self.staged.len(),
                "vector transaction dropped without commit; staged records discarded"
            );
        }
    }
}
