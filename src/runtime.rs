//! Runtime for dealership conversations
//!
//! The dispatcher owns the collaborators shared by every session and runs
//! one turn at a time per session. Turns for different sessions proceed
//! concurrently.

mod executor;
pub mod traits;

#[cfg(test)]
mod testing;

pub use executor::RunOutcome;
pub use traits::*;

use crate::agents::Topology;
use crate::llm::{LlmError, LlmService, Message};
use crate::session::{SessionState, SessionStore};
use crate::state_machine::{ConvState, Event, PendingInterrupt, TransitionError};
use crate::store::DealershipStore;
use executor::{TurnDeps, TurnMachine};
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Default model calls allowed per turn
pub const DEFAULT_MAX_STEPS: usize = 16;

/// Result recorded for a call whose outcome never reached the session store
pub const UNRECORDED_RESULT: &str = "No result was recorded for this call. Its outcome is unknown.";

/// Why a turn did not produce a reply
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(#[from] LlmError),
    #[error("Session state is inconsistent: {0}")]
    StateInconsistency(String),
    #[error("Session storage failed: {0}")]
    Storage(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Turn exceeded {0} model calls")]
    StepLimit(usize),
}

/// Routes user turns to the configured agent topology
pub struct Dispatcher<S, L, T> {
    sessions: S,
    llm: L,
    tools: T,
    store: Arc<DealershipStore>,
    topology: Topology,
    max_steps: usize,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S, L, T> Dispatcher<S, L, T>
where
    S: SessionStore,
    L: LlmService,
    T: ToolExecutor,
{
    pub fn new(sessions: S, llm: L, tools: T, store: Arc<DealershipStore>) -> Self {
        Self {
            sessions,
            llm,
            tools,
            store,
            topology: Topology::default(),
            max_steps: DEFAULT_MAX_STEPS,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn sessions(&self) -> &S {
        &self.sessions
    }

    /// Handle one line of user input.
    ///
    /// With a pending interrupt the text is the answer to its prompt;
    /// otherwise it starts a new turn. Returns the reply, or the prompt of
    /// a newly raised interrupt.
    pub async fn process_turn(&self, session_id: &str, text: &str) -> Result<String, TurnError> {
        let lock = self.session_lock(session_id);
        let result = {
            let _guard = lock.lock().await;
            self.run_turn(session_id, text).await
        };
        drop(lock);
        self.release_lock(session_id);
        result
    }

    async fn run_turn(&self, session_id: &str, text: &str) -> Result<String, TurnError> {
        let SessionState {
            mut messages,
            pending_interrupt,
        } = self.sessions.get(session_id).await.map_err(TurnError::Storage)?;

        let (state, event) = match pending_interrupt {
            Some(interrupt) => {
                self.check_interrupt(session_id, &messages, &interrupt).await?;
                tracing::info!(
                    session_id = %session_id,
                    call_id = %interrupt.call.id,
                    "Resuming after confirmation"
                );
                (
                    ConvState::AwaitingConfirmation { interrupt },
                    Event::ConfirmationAnswer {
                        answer: text.to_string(),
                    },
                )
            }
            None => {
                self.close_unanswered_calls(session_id, &mut messages).await?;
                (
                    ConvState::Idle,
                    Event::UserMessage {
                        text: text.to_string(),
                    },
                )
            }
        };

        let steps = AtomicUsize::new(0);
        let deps = TurnDeps {
            session_id,
            sessions: &self.sessions,
            llm: &self.llm,
            tools: &self.tools,
            store: &self.store,
            max_steps: self.max_steps,
            steps: &steps,
        };
        let mut machine = TurnMachine::entry(deps, self.topology.entry_profile(), messages);

        match machine.drive(state, event).await {
            Ok(RunOutcome::Replied(reply)) => Ok(reply),
            Ok(RunOutcome::Suspended(interrupt)) => Ok(interrupt.prompt),
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Turn failed");
                Err(e)
            }
        }
    }

    /// A pending interrupt must refer to a call that history actually
    /// recorded. A dangling one is cleared so the session can continue.
    async fn check_interrupt(
        &self,
        session_id: &str,
        messages: &[Message],
        interrupt: &PendingInterrupt,
    ) -> Result<(), TurnError> {
        let anchor = interrupt.anchor_call_id();
        let anchored = messages.iter().any(|m| m.requests_call(anchor));
        let nested = interrupt.delegation.as_ref().is_none_or(|frame| {
            frame
                .transcript
                .iter()
                .any(|m| m.requests_call(&interrupt.call.id))
        });
        if anchored && nested {
            return Ok(());
        }

        tracing::error!(
            session_id = %session_id,
            call_id = %interrupt.call.id,
            "Pending interrupt does not match history; clearing it"
        );
        self.sessions
            .set_pending_interrupt(session_id, None)
            .await
            .map_err(TurnError::Storage)?;
        Err(TurnError::StateInconsistency(format!(
            "no recorded call {} for the pending confirmation",
            interrupt.call.id
        )))
    }

    /// A turn that failed after running a call but before storing its
    /// result leaves that call unanswered. Give it a failed result so the
    /// history stays acceptable to the model.
    async fn close_unanswered_calls(
        &self,
        session_id: &str,
        messages: &mut Vec<Message>,
    ) -> Result<(), TurnError> {
        let unanswered: Vec<String> = messages
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
            .filter(|id| {
                !messages
                    .iter()
                    .any(|m| m.tool_call_id.as_deref() == Some(id.as_str()))
            })
            .collect();

        for call_id in unanswered {
            tracing::warn!(
                session_id = %session_id,
                call_id = %call_id,
                "Closing unanswered call"
            );
            let result = Message::tool(call_id, UNRECORDED_RESULT, true);
            self.sessions
                .append(session_id, &result)
                .await
                .map_err(TurnError::Storage)?;
            messages.push(result);
        }
        Ok(())
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(session_id.to_string()).or_default())
    }

    /// Drop the session's lock once no turn holds or waits on it
    fn release_lock(&self, session_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(session_id);
        }
    }
}
