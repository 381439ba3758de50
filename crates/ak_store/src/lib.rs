//! `ak_store` - `DuckDB` storage layer for anketa
//!
//! This crate provides:
//! - `DuckDB` connection management
//! - Schema migrations
//! - Batched answer inserts with a single commit per submission
//! - Newest-first answer listing
//!
//! The store is the authoritative copy of every submission. Rows are only ever
//! inserted; nothing here updates or deletes them.

use chrono::Local;
use duckdb::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, instrument};

pub mod migrations;
pub mod schema;

pub use schema::CREATED_AT_FORMAT;

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] duckdb::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A stored answer row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub id: i64,
    pub username: String,
    pub question: String,
    pub answer: String,
    pub created_at: String,
}

/// An answer about to be inserted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAnswer {
    pub username: String,
    pub question: String,
    pub answer: String,
    pub created_at: String,
}

impl NewAnswer {
    pub fn new(
        username: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            question: question.into(),
            answer: answer.into(),
            created_at: created_at.into(),
        }
    }
}

/// Current local time formatted as a `created_at` value
#[must_use]
pub fn batch_timestamp() -> String {
    Local::now().format(CREATED_AT_FORMAT).to_string()
}

const SELECT_ANSWERS: &str = "SELECT id, username, question, answer, created_at FROM answers \
     ORDER BY created_at DESC, id ASC";

/// Main storage handle
pub struct AkStore {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl AkStore {
    /// Open or create database at path
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if directory creation, database opening, or
    /// migration execution fails.
    #[instrument]
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!(path = %path.display(), "Opening DuckDB database");

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_string_lossy().to_string(),
        };

        store.run_migrations()?;

        Ok(store)
    }

    /// Open in-memory database (for testing)
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if in-memory database setup or migrations fail.
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: ":memory:".to_string(),
        };

        store.run_migrations()?;

        Ok(store)
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        migrations::run_all(&conn)?;
        Ok(())
    }

    /// Database location as given at open time
    #[must_use]
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Insert a submission batch.
    ///
    /// All rows are written inside one transaction and committed once, so a
    /// failing row leaves none of the batch visible.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any insert or the commit fails.
    ///
    /// # Panics
    ///
    /// Panics if the internal database mutex is poisoned.
    pub fn insert_batch(&self, answers: &[NewAnswer]) -> Result<usize, StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO answers (username, question, answer, created_at) VALUES (?, ?, ?, ?)",
            )?;
            for answer in answers {
                inserted += stmt.execute(duckdb::params![
                    answer.username,
                    answer.question,
                    answer.answer,
                    answer.created_at
                ])?;
            }
        }

        tx.commit()?;
        debug!(rows = inserted, "Answer batch committed");
        Ok(inserted)
    }

    /// All answers, newest batch first, each batch in insertion order
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn list_all(&self) -> Result<Vec<AnswerRecord>, StoreError> {
        self.query_answers(SELECT_ANSWERS)
    }

    /// Like [`AkStore::list_all`], bounded to `limit` rows
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<AnswerRecord>, StoreError> {
        self.query_answers(&format!("{SELECT_ANSWERS} LIMIT {limit}"))
    }

    fn query_answers(&self, sql: &str) -> Result<Vec<AnswerRecord>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(AnswerRecord {
                id: row.get(0)?,
                username: row.get(1)?,
                question: row.get(2)?,
                answer: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Number of stored answers
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub fn count(&self) -> Result<i64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT COUNT(*) FROM {}", schema::tables::ANSWERS);
        let count = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Cheap liveness query
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot answer.
    pub fn ping(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        let _: i32 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(())
    }
}
