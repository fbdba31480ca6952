use std::{ops::Deref, time::Duration};

use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

use crate::error::AppError;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// # Initialize a new database client
    ///
    /// # Arguments
    /// * `address` - Engine address, e.g. `ws://127.0.0.1:8000` or `mem://`
    /// * `credentials` - Root user and password; skipped when `None`
    /// * `timeout` - Upper bound for establishing the connection and signing in
    ///
    /// # Returns
    /// * `SurrealDbClient` initialized and scoped to `namespace` / `database`
    pub async fn new(
        address: &str,
        credentials: Option<(&str, &str)>,
        namespace: &str,
        database: &str,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let setup = async {
            let db = connect(address).await?;

            if let Some((username, password)) = credentials {
                db.signin(Root { username, password }).await?;
            }

            db.use_ns(namespace).use_db(database).await?;
            Ok::<_, Error>(db)
        };

        let db = tokio::time::timeout(timeout, setup).await.map_err(|_| {
            AppError::Storage(format!(
                "connecting to {address} timed out after {}s",
                timeout.as_secs()
            ))
        })??;

        Ok(SurrealDbClient { client: db })
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
