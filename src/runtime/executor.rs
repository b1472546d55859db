//! Turn executor
//!
//! Drives the pure state machine for one profile, running each effect and
//! feeding the events they produce back in until the turn replies or
//! suspends. The entry profile writes through to the session store; a
//! department works on a private copy of the history and only hands its
//! final text (or its interrupt) back to the supervisor.

use super::traits::ToolExecutor;
use super::TurnError;
use crate::agents::AgentProfile;
use crate::llm::{LlmRequest, LlmService, Message};
use crate::session::SessionStore;
use crate::state_machine::{
    transition, ConvContext, ConvState, Department, DepartmentOutcome, Effect, Event,
    PendingInterrupt,
};
use crate::store::DealershipStore;
use crate::tools::{ToolContext, ToolOutput};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// How a machine run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Replied(String),
    Suspended(PendingInterrupt),
}

/// Shared collaborators for every machine run in a turn
pub struct TurnDeps<'a, S: ?Sized, L: ?Sized, T: ?Sized> {
    pub session_id: &'a str,
    pub sessions: &'a S,
    pub llm: &'a L,
    pub tools: &'a T,
    pub store: &'a Arc<DealershipStore>,
    pub max_steps: usize,
    /// Model calls made so far in this turn, departments included
    pub steps: &'a AtomicUsize,
}

impl<S: ?Sized, L: ?Sized, T: ?Sized> Clone for TurnDeps<'_, S, L, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ?Sized, L: ?Sized, T: ?Sized> Copy for TurnDeps<'_, S, L, T> {}

/// One router instance working through a turn
pub struct TurnMachine<'a, S: ?Sized, L: ?Sized, T: ?Sized> {
    deps: TurnDeps<'a, S, L, T>,
    profile: AgentProfile,
    context: ConvContext,
    history: Vec<Message>,
    /// Appends go to the session store as well as `history`
    persist: bool,
}

impl<'a, S, L, T> TurnMachine<'a, S, L, T>
where
    S: SessionStore + ?Sized,
    L: LlmService + ?Sized,
    T: ToolExecutor + ?Sized,
{
    /// The profile that owns the session history
    pub fn entry(deps: TurnDeps<'a, S, L, T>, profile: AgentProfile, history: Vec<Message>) -> Self {
        Self::new(deps, profile, history, true)
    }

    fn department(deps: TurnDeps<'a, S, L, T>, department: Department, history: Vec<Message>) -> Self {
        Self::new(deps, AgentProfile::department(department), history, false)
    }

    fn new(
        deps: TurnDeps<'a, S, L, T>,
        profile: AgentProfile,
        history: Vec<Message>,
        persist: bool,
    ) -> Self {
        let context = profile.context(deps.session_id);
        Self {
            deps,
            profile,
            context,
            history,
            persist,
        }
    }

    /// Run from `state` until the turn replies or suspends
    pub async fn drive(&mut self, state: ConvState, event: Event) -> Result<RunOutcome, TurnError> {
        let mut state = state;
        let mut outcome = None;
        let mut events_to_process = VecDeque::from([event]);

        while let Some(current_event) = events_to_process.pop_front() {
            let result = transition(&state, &self.context, current_event)?;
            state = result.new_state;

            for effect in result.effects {
                if let Some(generated_event) = self.execute_effect(effect, &mut outcome).await? {
                    events_to_process.push_back(generated_event);
                }
            }
        }

        outcome.ok_or_else(|| {
            TurnError::StateInconsistency(format!(
                "{} stopped without replying or suspending",
                self.context.profile
            ))
        })
    }

    async fn execute_effect(
        &mut self,
        effect: Effect,
        outcome: &mut Option<RunOutcome>,
    ) -> Result<Option<Event>, TurnError> {
        match effect {
            Effect::AppendMessage { message } => {
                if self.persist {
                    self.deps
                        .sessions
                        .append(self.deps.session_id, &message)
                        .await
                        .map_err(TurnError::Storage)?;
                }
                self.history.push(message);
                Ok(None)
            }

            Effect::RequestModel => {
                let message = self.request_model().await?;
                Ok(Some(Event::ModelResponse { message }))
            }

            Effect::ExecuteTool { call } => {
                let output = match call.input.dealership_tool() {
                    Some(name) => {
                        let ctx = ToolContext::new(self.deps.session_id, Arc::clone(self.deps.store));
                        self.deps
                            .tools
                            .execute(name, call.input.to_value(), ctx)
                            .await
                            .unwrap_or_else(|| ToolOutput::error(format!("Unknown tool: {name}")))
                    }
                    None => ToolOutput::error(format!("Unknown tool: {}", call.name())),
                };
                tracing::info!(
                    session_id = %self.context.session_id,
                    profile = %self.context.profile,
                    tool = %call.name(),
                    call_id = %call.id,
                    success = output.success,
                    "Tool executed"
                );
                Ok(Some(Event::ToolComplete {
                    call_id: call.id,
                    output,
                }))
            }

            Effect::Delegate { department, call } => {
                // The department sees the conversation so far with the
                // transfer answered in its own copy.
                let mut history = self.history.clone();
                history.push(Message::tool(
                    call.id.as_str(),
                    format!("Transferred to the {department} department."),
                    false,
                ));
                let outcome = self
                    .run_department(department, &call.id, DepartmentStart::Fresh { history })
                    .await?;
                Ok(Some(Event::DepartmentComplete {
                    call_id: call.id,
                    outcome,
                }))
            }

            Effect::ResumeDelegation {
                frame,
                interrupt,
                answer,
            } => {
                let outcome = self
                    .run_department(
                        frame.department,
                        &frame.transfer_call_id,
                        DepartmentStart::Resume {
                            transcript: frame.transcript,
                            interrupt,
                            answer,
                        },
                    )
                    .await?;
                Ok(Some(Event::DepartmentComplete {
                    call_id: frame.transfer_call_id,
                    outcome,
                }))
            }

            Effect::Suspend { message, interrupt } => {
                if self.persist {
                    self.deps
                        .sessions
                        .suspend(self.deps.session_id, message.as_ref(), &interrupt)
                        .await
                        .map_err(TurnError::Storage)?;
                    tracing::info!(
                        session_id = %self.context.session_id,
                        call_id = %interrupt.call.id,
                        "Turn suspended for confirmation"
                    );
                }
                self.history.extend(message);
                *outcome = Some(RunOutcome::Suspended(interrupt));
                Ok(None)
            }

            Effect::ClaimInterrupt { call_id } => {
                // The session-level marker is cleared for departments too
                self.deps
                    .sessions
                    .set_pending_interrupt(self.deps.session_id, None)
                    .await
                    .map_err(TurnError::Storage)?;
                tracing::info!(
                    session_id = %self.context.session_id,
                    call_id = %call_id,
                    "Confirmed call claimed"
                );
                Ok(None)
            }

            Effect::ResolveInterrupt { message } => {
                let sessions = self.deps.sessions;
                let session_id = self.deps.session_id;
                if self.persist {
                    sessions
                        .resolve_interrupt(session_id, Some(&message))
                        .await
                        .map_err(TurnError::Storage)?;
                } else {
                    // Result stays in the department transcript.
                    sessions
                        .resolve_interrupt(session_id, None)
                        .await
                        .map_err(TurnError::Storage)?;
                }
                tracing::info!(
                    session_id = %self.context.session_id,
                    call_id = message.tool_call_id.as_deref().unwrap_or_default(),
                    "Confirmation resolved"
                );
                self.history.push(message);
                Ok(None)
            }

            Effect::Reply { text } => {
                *outcome = Some(RunOutcome::Replied(text));
                Ok(None)
            }
        }
    }

    async fn request_model(&mut self) -> Result<Message, TurnError> {
        let step = self.deps.steps.fetch_add(1, Ordering::Relaxed) + 1;
        if step > self.deps.max_steps {
            return Err(TurnError::StepLimit(self.deps.max_steps));
        }

        let request = LlmRequest {
            system: self.profile.system_prompt(chrono::Local::now().naive_local()),
            messages: self.history.clone(),
            tools: self.profile.definitions(&self.deps.tools.definitions()),
            max_tokens: None,
        };
        let response = self.deps.llm.complete(&request).await?;

        if response.message.tool_calls.len() > 1 {
            tracing::warn!(
                session_id = %self.context.session_id,
                profile = %self.context.profile,
                requested = response.message.tool_calls.len(),
                "Model requested several tools; acting on the first"
            );
        }
        Ok(response.message)
    }

    /// Run a department and translate its ending for the supervisor. A failed
    /// department still answers the transfer call so history stays well formed.
    async fn run_department(
        &mut self,
        department: Department,
        transfer_call_id: &str,
        start: DepartmentStart,
    ) -> Result<DepartmentOutcome, TurnError> {
        tracing::info!(
            session_id = %self.context.session_id,
            department = %department,
            "Delegating to department"
        );

        let (history, state, event) = match start {
            DepartmentStart::Fresh { history } => (history, ConvState::Idle, None),
            DepartmentStart::Resume {
                transcript,
                interrupt,
                answer,
            } => (
                transcript,
                ConvState::AwaitingConfirmation { interrupt },
                Some(Event::ConfirmationAnswer { answer }),
            ),
        };

        let mut run = TurnMachine::department(self.deps, department, history);
        let result = match event {
            Some(event) => Box::pin(run.drive(state, event)).await,
            None => Box::pin(run.start_fresh()).await,
        };

        match result {
            Ok(RunOutcome::Replied(text)) => Ok(DepartmentOutcome::Replied(text)),
            Ok(RunOutcome::Suspended(interrupt)) => Ok(DepartmentOutcome::Suspended {
                interrupt,
                transcript: run.history,
            }),
            Err(e) => {
                let message = Message::tool(
                    transfer_call_id,
                    format!("The {department} department could not answer: {e}"),
                    true,
                );
                if self.persist {
                    self.deps
                        .sessions
                        .append(self.deps.session_id, &message)
                        .await
                        .map_err(TurnError::Storage)?;
                }
                self.history.push(message);
                Err(e)
            }
        }
    }

    /// A fresh department run inherits the conversation so far and goes
    /// straight to the model
    async fn start_fresh(&mut self) -> Result<RunOutcome, TurnError> {
        let message = self.request_model().await?;
        self.drive(ConvState::AwaitingModel, Event::ModelResponse { message })
            .await
    }
}

/// Where a department run begins
enum DepartmentStart {
    Fresh {
        history: Vec<Message>,
    },
    Resume {
        transcript: Vec<Message>,
        interrupt: PendingInterrupt,
        answer: String,
    },
}
