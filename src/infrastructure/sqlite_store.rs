//! SQLite-backed document store.
//!
//! One `documents` table keyed by `(collection, doc_key)` with a JSON body per
//! row. Merge upserts read the current body and rewrite it with the new fields
//! folded in; the single-writer worker makes the read-modify-write safe.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::domain::ports::{merge_fields, DocumentStore};

#[derive(Clone)]
pub struct SqliteDocumentStore {
    pool: Arc<SqlitePool>,
}

impl SqliteDocumentStore {
    /// Open (creating the database file if needed) and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db_path = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:");

        if let Some(parent) = Path::new(db_path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create database directory for {db_path}"))?;
        }
        if !Path::new(db_path).exists() {
            std::fs::File::create(db_path)
                .with_context(|| format!("Failed to create database file {db_path}"))?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to {database_url}"))?;

        let store = Self {
            pool: Arc::new(pool),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                doc_key    TEXT NOT NULL,
                body       TEXT NOT NULL,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (collection, doc_key)
            )
            "#,
        )
        .execute(&*self.pool)
        .await
        .context("Failed to create documents table")?;
        Ok(())
    }

    async fn read_body(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND doc_key = ?")
            .bind(collection)
            .bind(key)
            .fetch_optional(&*self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("body");
                let body = serde_json::from_str(&raw)
                    .with_context(|| format!("Corrupt document body for {collection}/{key}"))?;
                Ok(Some(body))
            }
            None => Ok(None),
        }
    }

    async fn write_body(&self, collection: &str, key: &str, body: &Value) -> Result<()> {
        let raw = serde_json::to_string(body)?;
        sqlx::query(
            r#"
            INSERT INTO documents (collection, doc_key, body, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (collection, doc_key)
            DO UPDATE SET body = excluded.body, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(raw)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn upsert(&self, collection: &str, key: &str, fields: Map<String, Value>) -> Result<()> {
        let mut body = self
            .read_body(collection, key)
            .await?
            .unwrap_or_else(|| Value::Object(Map::new()));
        merge_fields(&mut body, fields);
        self.write_body(collection, key, &body).await
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM documents WHERE collection = ? AND doc_key = ?")
            .bind(collection)
            .bind(key)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<(String, Value)>> {
        let rows =
            sqlx::query("SELECT doc_key, body FROM documents WHERE collection = ? ORDER BY doc_key")
                .bind(collection)
                .fetch_all(&*self.pool)
                .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.get("doc_key");
            let raw: String = row.get("body");
            let body = serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt document body for {collection}/{key}"))?;
            documents.push((key, body));
        }
        Ok(documents)
    }

    async fn insert(&self, collection: &str, fields: Map<String, Value>) -> Result<String> {
        let key = Uuid::new_v4().to_string();
        self.write_body(collection, &key, &Value::Object(fields))
            .await?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn temp_store() -> (tempfile::TempDir, SqliteDocumentStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("test.db").display());
        let store = SqliteDocumentStore::connect(&url).await.unwrap();
        (dir, store)
    }

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn upsert_then_merge_preserves_existing_fields() {
        let (_dir, store) = temp_store().await;

        store
            .upsert(
                "tickets",
                "ticket_555",
                fields(json!({"number": "555", "email": "a@b.c"})),
            )
            .await
            .unwrap();
        store
            .upsert("tickets", "ticket_555", fields(json!({"status": "Nova"})))
            .await
            .unwrap();

        let all = store.get_all("tickets").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].1["email"], "a@b.c");
        assert_eq!(all[0].1["status"], "Nova");
    }

    #[tokio::test]
    async fn delete_removes_only_the_named_document() {
        let (_dir, store) = temp_store().await;
        store
            .upsert("tickets", "ticket_1", fields(json!({"number": "1"})))
            .await
            .unwrap();
        store
            .upsert("tickets", "ticket_2", fields(json!({"number": "2"})))
            .await
            .unwrap();

        store.delete("tickets", "ticket_1").await.unwrap();

        let all = store.get_all("tickets").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "ticket_2");
    }

    #[tokio::test]
    async fn collections_are_isolated_and_inserts_get_fresh_keys() {
        let (_dir, store) = temp_store().await;
        let key_a = store
            .insert("notification_queue", fields(json!({"status": "pending"})))
            .await
            .unwrap();
        let key_b = store
            .insert("notification_queue", fields(json!({"status": "pending"})))
            .await
            .unwrap();
        assert_ne!(key_a, key_b);
        assert!(store.get_all("tickets").await.unwrap().is_empty());
        assert_eq!(store.get_all("notification_queue").await.unwrap().len(), 2);
    }
}
