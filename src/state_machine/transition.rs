//! Pure state transition function
//!
//! Given the same state, context and event this always produces the same
//! result. All I/O happens in the executor that runs the returned effects.

use super::event::DepartmentOutcome;
use super::state::{DelegationFrame, PendingInterrupt, ToolCall, ToolInput, CONFIRM_ANSWER};
use super::{ConvContext, ConvState, Effect, Event};
use crate::llm::Message;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq)]
pub enum TransitionError {
    #[error("Turn already in progress, cannot accept message")]
    AgentBusy,
    #[error("A confirmation is pending; the next input is its answer")]
    ConfirmationPending,
    #[error("No confirmation is pending")]
    NoPendingInterrupt,
    #[error("Result for call {actual} while waiting on {expected}")]
    CallMismatch { expected: String, actual: String },
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // User input
        // ============================================================
        (ConvState::Idle, Event::UserMessage { text }) => {
            Ok(TransitionResult::new(ConvState::AwaitingModel)
                .with_effect(Effect::append(Message::user(text)))
                .with_effect(Effect::RequestModel))
        }

        (ConvState::AwaitingConfirmation { .. }, Event::UserMessage { .. }) => {
            Err(TransitionError::ConfirmationPending)
        }

        (_, Event::UserMessage { .. }) => Err(TransitionError::AgentBusy),

        // ============================================================
        // Resume
        // ============================================================
        (ConvState::AwaitingConfirmation { interrupt }, Event::ConfirmationAnswer { answer }) => {
            Ok(resume(interrupt, answer))
        }

        (_, Event::ConfirmationAnswer { .. }) => Err(TransitionError::NoPendingInterrupt),

        // ============================================================
        // Model output
        // ============================================================
        (ConvState::AwaitingModel, Event::ModelResponse { message }) => {
            Ok(handle_model_response(context, message))
        }

        // ============================================================
        // Tool results
        // ============================================================
        (ConvState::DispatchingTool { call }, Event::ToolComplete { call_id, output }) => {
            ensure_call(call, &call_id)?;
            Ok(TransitionResult::new(ConvState::AwaitingModel)
                .with_effect(Effect::append(Message::tool(
                    call_id,
                    output.output,
                    !output.success,
                )))
                .with_effect(Effect::RequestModel))
        }

        (ConvState::ResolvingConfirmation { interrupt }, Event::ToolComplete { call_id, output }) => {
            ensure_call(&interrupt.call, &call_id)?;
            let outcome = interrupt.call.input.confirmed_outcome(output.success);
            Ok(TransitionResult::new(ConvState::AwaitingModel)
                .with_effect(Effect::ResolveInterrupt {
                    message: Message::tool(call_id, outcome, false),
                })
                .with_effect(Effect::RequestModel))
        }

        // ============================================================
        // Delegation
        // ============================================================
        (
            ConvState::Delegating { call, department },
            Event::DepartmentComplete { call_id, outcome },
        ) => {
            ensure_call(call, &call_id)?;
            match outcome {
                DepartmentOutcome::Replied(text) => {
                    Ok(TransitionResult::new(ConvState::AwaitingModel)
                        .with_effect(Effect::append(Message::tool(call_id, text, false)))
                        .with_effect(Effect::RequestModel))
                }
                DepartmentOutcome::Suspended {
                    interrupt,
                    transcript,
                } => {
                    let interrupt = PendingInterrupt {
                        delegation: Some(DelegationFrame {
                            department: *department,
                            transfer_call_id: call_id,
                            transcript,
                        }),
                        ..interrupt
                    };
                    Ok(
                        TransitionResult::new(ConvState::AwaitingConfirmation {
                            interrupt: interrupt.clone(),
                        })
                        .with_effect(Effect::Suspend {
                            message: None,
                            interrupt,
                        }),
                    )
                }
            }
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{} cannot handle {}",
            state_name(state),
            event_name(&event)
        ))),
    }
}

fn resume(interrupt: &PendingInterrupt, answer: String) -> TransitionResult {
    if let Some(frame) = &interrupt.delegation {
        // The department owns the gated call; the supervisor waits on its transfer
        let transfer = ToolCall::new(
            frame.transfer_call_id.clone(),
            ToolInput::Transfer {
                department: frame.department,
            },
        );
        return TransitionResult::new(ConvState::Delegating {
            call: transfer,
            department: frame.department,
        })
        .with_effect(Effect::ResumeDelegation {
            frame: frame.clone(),
            interrupt: PendingInterrupt {
                delegation: None,
                ..interrupt.clone()
            },
            answer,
        });
    }

    if answer == CONFIRM_ANSWER {
        TransitionResult::new(ConvState::ResolvingConfirmation {
            interrupt: interrupt.clone(),
        })
        .with_effect(Effect::ClaimInterrupt {
            call_id: interrupt.call.id.clone(),
        })
        .with_effect(Effect::execute_tool(interrupt.call.clone()))
    } else {
        let declined = interrupt.call.input.declined_outcome();
        TransitionResult::new(ConvState::AwaitingModel)
            .with_effect(Effect::ResolveInterrupt {
                message: Message::tool(interrupt.call.id.clone(), declined, false),
            })
            .with_effect(Effect::RequestModel)
    }
}

fn handle_model_response(context: &ConvContext, message: Message) -> TransitionResult {
    let Some(first) = message.tool_calls.first().cloned() else {
        let text = message.content.clone();
        return TransitionResult::new(ConvState::Idle)
            .with_effect(Effect::append(message))
            .with_effect(Effect::Reply { text });
    };

    // Only the first call is acted on; the rest never enter history, so every
    // recorded call gets exactly one result.
    let recorded = Message {
        tool_calls: vec![first.clone()],
        ..message
    };
    let call = ToolCall::from_request(&first, context);

    if let Some(rejection) = call.rejection() {
        return TransitionResult::new(ConvState::AwaitingModel)
            .with_effect(Effect::append(recorded))
            .with_effect(Effect::append(rejection))
            .with_effect(Effect::RequestModel);
    }

    if let ToolInput::Transfer { department } = call.input {
        return TransitionResult::new(ConvState::Delegating {
            call: call.clone(),
            department,
        })
        .with_effect(Effect::append(recorded))
        .with_effect(Effect::Delegate { department, call });
    }

    if call.input.requires_confirmation() {
        let interrupt = PendingInterrupt::for_call(call);
        return TransitionResult::new(ConvState::AwaitingConfirmation {
            interrupt: interrupt.clone(),
        })
        .with_effect(Effect::Suspend {
            message: Some(recorded),
            interrupt,
        });
    }

    TransitionResult::new(ConvState::DispatchingTool { call: call.clone() })
        .with_effect(Effect::append(recorded))
        .with_effect(Effect::execute_tool(call))
}

fn ensure_call(call: &ToolCall, call_id: &str) -> Result<(), TransitionError> {
    if call.id == call_id {
        Ok(())
    } else {
        Err(TransitionError::CallMismatch {
            expected: call.id.clone(),
            actual: call_id.to_string(),
        })
    }
}

fn state_name(state: &ConvState) -> &'static str {
    match state {
        ConvState::Idle => "idle",
        ConvState::AwaitingModel => "awaiting_model",
        ConvState::DispatchingTool { .. } => "dispatching_tool",
        ConvState::Delegating { .. } => "delegating",
        ConvState::AwaitingConfirmation { .. } => "awaiting_confirmation",
        ConvState::ResolvingConfirmation { .. } => "resolving_confirmation",
    }
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::UserMessage { .. } => "user_message",
        Event::ConfirmationAnswer { .. } => "confirmation_answer",
        Event::ModelResponse { .. } => "model_response",
        Event::ToolComplete { .. } => "tool_complete",
        Event::DepartmentComplete { .. } => "department_complete",
    }
}
