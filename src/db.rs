//! SQLite session store
//!
//! Sessions survive restarts: history rows are append-only and the pending
//! interrupt is kept as JSON on the session row.

mod schema;

use schema::SCHEMA;

use crate::llm::Message;
use crate::session::{SessionState, SessionStore};
use crate::state_machine::PendingInterrupt;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Stored JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Session Operations ====================

    /// Load a session, creating the row on first access
    pub fn get_session(&self, session_id: &str) -> DbResult<SessionState> {
        let conn = self.conn();
        ensure_session(&conn, session_id)?;

        let interrupt_json: Option<String> = conn
            .query_row(
                "SELECT pending_interrupt FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let pending_interrupt = interrupt_json
            .map(|s| serde_json::from_str::<PendingInterrupt>(&s))
            .transpose()?;

        let mut stmt = conn.prepare(
            "SELECT content FROM messages WHERE session_id = ?1 ORDER BY sequence_id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| row.get::<_, String>(0))?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(serde_json::from_str(&row?)?);
        }

        Ok(SessionState {
            messages,
            pending_interrupt,
        })
    }

    /// Every session id, oldest first
    pub fn list_sessions(&self) -> DbResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM sessions ORDER BY created_at ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Message Operations ====================

    /// Append a message; returns its sequence id
    pub fn add_message(&self, session_id: &str, message: &Message) -> DbResult<i64> {
        let conn = self.conn();
        insert_message(&conn, session_id, message)
    }

    // ==================== Interrupt Operations ====================

    pub fn set_pending_interrupt(
        &self,
        session_id: &str,
        interrupt: Option<&PendingInterrupt>,
    ) -> DbResult<()> {
        let conn = self.conn();
        write_interrupt(&conn, session_id, interrupt)
    }

    /// Append the gated call's message and record the interrupt in one
    /// transaction
    pub fn suspend(
        &self,
        session_id: &str,
        message: Option<&Message>,
        interrupt: &PendingInterrupt,
    ) -> DbResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if let Some(message) = message {
            insert_message(&tx, session_id, message)?;
        }
        write_interrupt(&tx, session_id, Some(interrupt))?;
        tx.commit()?;
        Ok(())
    }

    /// Clear the interrupt and append its result in one transaction
    pub fn resolve_interrupt(&self, session_id: &str, message: Option<&Message>) -> DbResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        if let Some(message) = message {
            insert_message(&tx, session_id, message)?;
        }
        write_interrupt(&tx, session_id, None)?;
        tx.commit()?;
        Ok(())
    }
}

fn ensure_session(conn: &Connection, session_id: &str) -> DbResult<()> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO sessions (id, pending_interrupt, created_at, updated_at)
         VALUES (?1, NULL, ?2, ?2)",
        params![session_id, now],
    )?;
    Ok(())
}

fn insert_message(conn: &Connection, session_id: &str, message: &Message) -> DbResult<i64> {
    ensure_session(conn, session_id)?;
    let now = Utc::now().to_rfc3339();

    let sequence_id: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence_id), 0) + 1 FROM messages WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;

    conn.execute(
        "INSERT INTO messages (session_id, sequence_id, role, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            session_id,
            sequence_id,
            message.role.as_str(),
            serde_json::to_string(message)?,
            now,
        ],
    )?;
    conn.execute(
        "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
        params![now, session_id],
    )?;
    Ok(sequence_id)
}

fn write_interrupt(
    conn: &Connection,
    session_id: &str,
    interrupt: Option<&PendingInterrupt>,
) -> DbResult<()> {
    ensure_session(conn, session_id)?;
    let json = interrupt.map(serde_json::to_string).transpose()?;
    conn.execute(
        "UPDATE sessions SET pending_interrupt = ?1, updated_at = ?2 WHERE id = ?3",
        params![json, Utc::now().to_rfc3339(), session_id],
    )?;
    Ok(())
}

#[async_trait]
impl SessionStore for Database {
    async fn get(&self, session_id: &str) -> Result<SessionState, String> {
        self.get_session(session_id).map_err(|e| e.to_string())
    }

    async fn append(&self, session_id: &str, message: &Message) -> Result<(), String> {
        self.add_message(session_id, message)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn set_pending_interrupt(
        &self,
        session_id: &str,
        interrupt: Option<&PendingInterrupt>,
    ) -> Result<(), String> {
        Database::set_pending_interrupt(self, session_id, interrupt).map_err(|e| e.to_string())
    }

    async fn suspend(
        &self,
        session_id: &str,
        message: Option<&Message>,
        interrupt: &PendingInterrupt,
    ) -> Result<(), String> {
        Database::suspend(self, session_id, message, interrupt).map_err(|e| e.to_string())
    }

    async fn resolve_interrupt(
        &self,
        session_id: &str,
        message: Option<&Message>,
    ) -> Result<(), String> {
        Database::resolve_interrupt(self, session_id, message).map_err(|e| e.to_string())
    }
}
