//! Database operations for the documents table.

use crate::document::DocumentId;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};

/// A stored document row. `value` is `None` once the document is deleted.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub collection: String,
    pub key: String,
    pub value: Option<Value>,
    pub revision: i64,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            collection: row.try_get("collection")?,
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            revision: row.try_get("revision")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredDocument {
    /// Revision as carried on the wire.
    pub fn wire_revision(&self) -> u64 {
        self.revision.max(0) as u64
    }
}

/// Get a document, deleted ones included.
pub async fn get_document(
    pool: &PgPool,
    id: &DocumentId,
) -> Result<Option<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT collection, key, value, revision, updated_at
        FROM documents
        WHERE collection = $1 AND key = $2
        "#,
    )
    .bind(&id.collection)
    .bind(&id.key)
    .fetch_optional(pool)
    .await
}

/// Replace a document, creating it if needed. The revision increases by one
/// on every write.
pub async fn put_document(
    pool: &PgPool,
    id: &DocumentId,
    value: &Value,
) -> Result<StoredDocument, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        INSERT INTO documents (collection, key, value, revision, updated_at)
        VALUES ($1, $2, $3, 1, now())
        ON CONFLICT (collection, key) DO UPDATE SET
            value = EXCLUDED.value,
            revision = documents.revision + 1,
            updated_at = now()
        RETURNING collection, key, value, revision, updated_at
        "#,
    )
    .bind(&id.collection)
    .bind(&id.key)
    .bind(value)
    .fetch_one(pool)
    .await
}

/// Delete a document, keeping its row so revisions stay monotonic.
///
/// Returns `None` when there was nothing to delete.
pub async fn delete_document(
    pool: &PgPool,
    id: &DocumentId,
) -> Result<Option<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        UPDATE documents
        SET value = NULL, revision = revision + 1, updated_at = now()
        WHERE collection = $1 AND key = $2 AND value IS NOT NULL
        RETURNING collection, key, value, revision, updated_at
        "#,
    )
    .bind(&id.collection)
    .bind(&id.key)
    .fetch_optional(pool)
    .await
}

/// List live documents of a collection.
pub async fn list_documents(
    pool: &PgPool,
    collection: &str,
) -> Result<Vec<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT collection, key, value, revision, updated_at
        FROM documents
        WHERE collection = $1 AND value IS NOT NULL
        ORDER BY key ASC
        "#,
    )
    .bind(collection)
    .fetch_all(pool)
    .await
}
