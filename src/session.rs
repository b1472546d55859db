//! Per-session conversation state
//!
//! A session is an append-only message history plus at most one pending
//! interrupt. Stores are shared between sessions and serialize their own
//! access; the dispatcher guarantees one turn per session at a time.

use crate::llm::Message;
use crate::state_machine::PendingInterrupt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Everything persisted for one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub pending_interrupt: Option<PendingInterrupt>,
}

/// Storage for session history and the pending-interrupt marker
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session, creating an empty one on first access
    async fn get(&self, session_id: &str) -> Result<SessionState, String>;

    /// Append a message to the session history
    async fn append(&self, session_id: &str, message: &Message) -> Result<(), String>;

    /// Set or clear the pending interrupt
    async fn set_pending_interrupt(
        &self,
        session_id: &str,
        interrupt: Option<&PendingInterrupt>,
    ) -> Result<(), String>;

    /// Record the interrupt and, in the same step, append the message that
    /// requested the gated call when there is one
    async fn suspend(
        &self,
        session_id: &str,
        message: Option<&Message>,
        interrupt: &PendingInterrupt,
    ) -> Result<(), String>;

    /// Clear the pending interrupt and, in the same step, append the gated
    /// call's result when there is one
    async fn resolve_interrupt(
        &self,
        session_id: &str,
        message: Option<&Message>,
    ) -> Result<(), String>;
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn get(&self, session_id: &str) -> Result<SessionState, String> {
        (**self).get(session_id).await
    }

    async fn append(&self, session_id: &str, message: &Message) -> Result<(), String> {
        (**self).append(session_id, message).await
    }

    async fn set_pending_interrupt(
        &self,
        session_id: &str,
        interrupt: Option<&PendingInterrupt>,
    ) -> Result<(), String> {
        (**self).set_pending_interrupt(session_id, interrupt).await
    }

    async fn suspend(
        &self,
        session_id: &str,
        message: Option<&Message>,
        interrupt: &PendingInterrupt,
    ) -> Result<(), String> {
        (**self).suspend(session_id, message, interrupt).await
    }

    async fn resolve_interrupt(
        &self,
        session_id: &str,
        message: Option<&Message>,
    ) -> Result<(), String> {
        (**self).resolve_interrupt(session_id, message).await
    }
}

/// Process-local session store
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionState>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<SessionState, String> {
        Ok(self
            .lock()
            .entry(session_id.to_string())
            .or_default()
            .clone())
    }

    async fn append(&self, session_id: &str, message: &Message) -> Result<(), String> {
        self.lock()
            .entry(session_id.to_string())
            .or_default()
            .messages
            .push(message.clone());
        Ok(())
    }

    async fn set_pending_interrupt(
        &self,
        session_id: &str,
        interrupt: Option<&PendingInterrupt>,
    ) -> Result<(), String> {
        self.lock()
            .entry(session_id.to_string())
            .or_default()
            .pending_interrupt = interrupt.cloned();
        Ok(())
    }

    async fn suspend(
        &self,
        session_id: &str,
        message: Option<&Message>,
        interrupt: &PendingInterrupt,
    ) -> Result<(), String> {
        let mut sessions = self.lock();
        let session = sessions.entry(session_id.to_string()).or_default();
        if let Some(message) = message {
            session.messages.push(message.clone());
        }
        session.pending_interrupt = Some(interrupt.clone());
        Ok(())
    }

    async fn resolve_interrupt(
        &self,
        session_id: &str,
        message: Option<&Message>,
    ) -> Result<(), String> {
        let mut sessions = self.lock();
        let session = sessions.entry(session_id.to_string()).or_default();
        if let Some(message) = message {
            session.messages.push(message.clone());
        }
        session.pending_interrupt = None;
        Ok(())
    }
}
