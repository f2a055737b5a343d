//! Postgres-backed document store.
//!
//! Every collection shares one `documents` table keyed by `(collection, id)`
//! with a JSONB body. A commit runs in a single transaction.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::document_store::{DocumentChange, DocumentStore, DocumentStoreError};

#[derive(Debug, Clone)]
pub struct PostgresDocumentStore {
    pool: Arc<PgPool>,
}

impl PostgresDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    #[instrument(skip(self), err)]
    async fn load(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<JsonValue>, DocumentStoreError> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_document", e))?;

        row.map(|row| {
            row.try_get::<JsonValue, _>("body")
                .map_err(|e| DocumentStoreError::Serialization {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    message: e.to_string(),
                })
        })
        .transpose()
    }

    #[instrument(skip(self, changes), fields(change_count = changes.len()), err)]
    async fn commit(&self, changes: Vec<DocumentChange>) -> Result<(), DocumentStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for change in changes {
            match change {
                DocumentChange::Put {
                    collection,
                    id,
                    body,
                } => {
                    sqlx::query(
                        r#"
                        INSERT INTO documents (collection, id, body)
                        VALUES ($1, $2, $3)
                        ON CONFLICT (collection, id)
                        DO UPDATE SET
                            body = EXCLUDED.body,
                            updated_at = NOW()
                        "#,
                    )
                    .bind(&collection)
                    .bind(&id)
                    .bind(&body)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("upsert_document", e))?;
                }
                DocumentChange::Delete { collection, id } => {
                    sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
                        .bind(&collection)
                        .bind(&id)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error("delete_document", e))?;
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> DocumentStoreError {
    match err {
        sqlx::Error::Database(db_err) => DocumentStoreError::Unavailable(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            DocumentStoreError::Unavailable(format!("connection pool closed in {operation}"))
        }
        _ => DocumentStoreError::Unavailable(format!("sqlx error in {operation}: {err}")),
    }
}
