use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use super::{Document, DocumentStore};
use crate::error::StoreError;

/// `{field: value}`, matched with `@>` so the GIN index on `body` applies.
fn containment_filter(field: &str, value: Value) -> Value {
    let mut filter = Map::new();
    filter.insert(field.to_string(), value);
    Value::Object(filter)
}

pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_db(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn document_from_row(row: &PgRow) -> Result<Document, StoreError> {
    let Json(body): Json<Value> = row.try_get("body")?;
    Ok(Document {
        id: row.try_get("id")?,
        version: row.try_get("version")?,
        body,
    })
}

fn conflict(collection: &str, id: &str) -> StoreError {
    StoreError::VersionConflict {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            "SELECT id, version, body FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn set(&self, collection: &str, id: &str, body: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, version, body)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (collection, id) DO UPDATE
            SET body = EXCLUDED.body, version = documents.version + 1, updated_at = now()
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(body))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn put_versioned(
        &self,
        collection: &str,
        id: &str,
        body: Value,
        expected: Option<i64>,
    ) -> Result<i64, StoreError> {
        let version: Option<i64> = match expected {
            None => {
                sqlx::query_scalar(
                    r#"
                    INSERT INTO documents (collection, id, version, body)
                    VALUES ($1, $2, 1, $3)
                    ON CONFLICT (collection, id) DO NOTHING
                    RETURNING version
                    "#,
                )
                .bind(collection)
                .bind(id)
                .bind(Json(body))
                .fetch_optional(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query_scalar(
                    r#"
                    UPDATE documents
                    SET body = $3, version = version + 1, updated_at = now()
                    WHERE collection = $1 AND id = $2 AND version = $4
                    RETURNING version
                    "#,
                )
                .bind(collection)
                .bind(id)
                .bind(Json(body))
                .bind(expected)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        version.ok_or_else(|| conflict(collection, id))
    }

    async fn update(&self, collection: &str, id: &str, fields: Value) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET body = body || $3, version = version + 1, updated_at = now()
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(fields))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Missing {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn add(&self, collection: &str, body: Value) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO documents (collection, id, version, body) VALUES ($1, $2, 1, $3)")
            .bind(collection)
            .bind(&id)
            .bind(Json(body))
            .execute(&self.pool)
            .await?;

        Ok(id)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    fn query_eq<'a>(
        &'a self,
        collection: &'a str,
        field: &'a str,
        value: Value,
    ) -> BoxStream<'a, Result<Document, StoreError>> {
        sqlx::query(
            "SELECT id, version, body FROM documents \
             WHERE collection = $1 AND body @> $2 \
             ORDER BY updated_at",
        )
        .bind(collection)
        .bind(Json(containment_filter(field, value)))
        .fetch(&self.pool)
        .map(|row| document_from_row(&row?))
        .boxed()
    }
}
