//! Property-based tests for the turn state machine
//!
//! These tests verify key invariants hold across all possible inputs.

use super::event::DepartmentOutcome;
use super::state::*;
use super::transition::*;
use super::*;
use crate::llm::{Message, Role, ToolCallRequest};
use crate::tools::{CancelTestDriveInput, ToolName, ToolOutput};
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Test Helpers
// ============================================================================

fn flat_context() -> ConvContext {
    ConvContext::new("test-session", "flat", ToolName::ALL.to_vec(), vec![])
}

fn supervisor_context() -> ConvContext {
    ConvContext::new("test-session", "supervisor", vec![], Department::ALL.to_vec())
}

fn arb_context() -> impl Strategy<Value = ConvContext> {
    prop_oneof![Just(flat_context()), Just(supervisor_context())]
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_tool_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("list_inventory".to_string()),
        Just("list_test_drives".to_string()),
        Just("schedule_test_drive".to_string()),
        Just("cancel_test_drive".to_string()),
        Just("to_sales".to_string()),
        Just("to_test_drive".to_string()),
        "[a-z_]{3,12}",
    ]
}

fn arb_arguments() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(json!({})),
        (0u32..20).prop_map(|code| json!({"code": code})),
        "[a-z0-9]{0,4}".prop_map(|code| json!({"code": code})),
        Just(json!({
            "date": "2025-03-10T14:00",
            "car": {"model": "polo", "color": "red", "kms": 0, "year": 2025, "value": 25500},
            "name": "Ana",
            "driver_licence": "DL-1"
        })),
    ]
}

fn arb_call_request() -> impl Strategy<Value = ToolCallRequest> {
    ("[a-z]{8}", arb_tool_name(), arb_arguments())
        .prop_map(|(id, name, args)| ToolCallRequest::new(id, name, args))
}

fn arb_model_message() -> impl Strategy<Value = Message> {
    (
        "[a-zA-Z ]{0,30}",
        proptest::collection::vec(arb_call_request(), 0..4),
    )
        .prop_map(|(text, calls)| Message::assistant_with_calls(text, calls))
}

fn arb_cancel_call() -> impl Strategy<Value = ToolCall> {
    ("[a-z]{8}", 0u32..100).prop_map(|(id, code)| {
        ToolCall::new(id, ToolInput::CancelTestDrive(CancelTestDriveInput { code }))
    })
}

fn arb_interrupt() -> impl Strategy<Value = PendingInterrupt> {
    (arb_cancel_call(), any::<bool>(), "[a-z]{8}").prop_map(|(call, delegated, transfer_id)| {
        let mut interrupt = PendingInterrupt::for_call(call);
        if delegated {
            interrupt.delegation = Some(DelegationFrame {
                department: Department::TestDrive,
                transfer_call_id: transfer_id,
                transcript: vec![Message::user("cancel")],
            });
        }
        interrupt
    })
}

fn arb_state() -> impl Strategy<Value = ConvState> {
    prop_oneof![
        Just(ConvState::Idle),
        Just(ConvState::AwaitingModel),
        ("[a-z]{8}").prop_map(|id| ConvState::DispatchingTool {
            call: ToolCall::new(id, ToolInput::ListInventory)
        }),
        ("[a-z]{8}").prop_map(|id| ConvState::Delegating {
            call: ToolCall::new(
                id,
                ToolInput::Transfer {
                    department: Department::Sales
                }
            ),
            department: Department::Sales,
        }),
        arb_interrupt().prop_map(|interrupt| ConvState::AwaitingConfirmation { interrupt }),
        arb_interrupt().prop_map(|mut interrupt| {
            interrupt.delegation = None;
            ConvState::ResolvingConfirmation { interrupt }
        }),
    ]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        "[a-zA-Z ]{1,30}".prop_map(|text| Event::UserMessage { text }),
        "[a-zA-Z]{0,3}".prop_map(|answer| Event::ConfirmationAnswer { answer }),
        arb_model_message().prop_map(|message| Event::ModelResponse { message }),
        ("[a-z]{8}", any::<bool>()).prop_map(|(call_id, success)| Event::ToolComplete {
            call_id,
            output: ToolOutput {
                success,
                output: "out".to_string(),
            },
        }),
        ("[a-z]{8}", "[a-z ]{0,20}").prop_map(|(call_id, text)| Event::DepartmentComplete {
            call_id,
            outcome: DepartmentOutcome::Replied(text),
        }),
    ]
}

fn appended(effects: &[Effect]) -> Vec<&Message> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::AppendMessage { message }
            | Effect::ResolveInterrupt { message }
            | Effect::Suspend {
                message: Some(message),
                ..
            } => Some(message),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Recorded assistant messages never carry more than one call
    #[test]
    fn prop_at_most_one_recorded_call(
        state in arb_state(),
        ctx in arb_context(),
        event in arb_event(),
    ) {
        if let Ok(result) = transition(&state, &ctx, event) {
            for message in appended(&result.effects) {
                if message.role == Role::Assistant {
                    prop_assert!(message.tool_calls.len() <= 1);
                }
            }
        }
    }

    // Every tool result emitted alongside an assistant call answers that call
    #[test]
    fn prop_results_answer_recorded_call(
        ctx in arb_context(),
        message in arb_model_message(),
    ) {
        let result = transition(&ConvState::AwaitingModel, &ctx, Event::ModelResponse { message })
            .unwrap();
        let messages = appended(&result.effects);
        if let Some(assistant) = messages.first().filter(|m| !m.tool_calls.is_empty()) {
            for tool_msg in messages.iter().filter(|m| m.role == Role::Tool) {
                let id = tool_msg.tool_call_id.as_deref().unwrap_or_default();
                prop_assert!(assistant.requests_call(id));
            }
        }
    }

    // A gated call never runs straight from a model response
    #[test]
    fn prop_model_response_never_executes_gated_call(
        ctx in arb_context(),
        message in arb_model_message(),
    ) {
        let result = transition(&ConvState::AwaitingModel, &ctx, Event::ModelResponse { message })
            .unwrap();
        for effect in &result.effects {
            if let Effect::ExecuteTool { call } = effect {
                prop_assert!(!call.input.requires_confirmation());
            }
        }
        let suspends = result.effects.iter().any(|e| matches!(e, Effect::Suspend { .. }));
        prop_assert_eq!(
            suspends,
            matches!(result.new_state, ConvState::AwaitingConfirmation { .. })
        );
    }

    // Only the literal confirmation executes; every answer settles the interrupt
    #[test]
    fn prop_answer_executes_at_most_once(
        call in arb_cancel_call(),
        answer in "[a-zA-Z]{0,3}",
    ) {
        let interrupt = PendingInterrupt::for_call(call.clone());
        let result = transition(
            &ConvState::AwaitingConfirmation { interrupt },
            &flat_context(),
            Event::ConfirmationAnswer { answer: answer.clone() },
        )
        .unwrap();

        let executes: Vec<_> = result
            .effects
            .iter()
            .filter(|e| matches!(e, Effect::ExecuteTool { .. }))
            .collect();
        let resolves = result
            .effects
            .iter()
            .filter(|e| matches!(e, Effect::ResolveInterrupt { .. }))
            .count();

        let claimed = result
            .effects
            .iter()
            .position(|e| matches!(e, Effect::ClaimInterrupt { .. }));

        if answer == "y" {
            let expected = Effect::execute_tool(call);
            prop_assert_eq!(executes, vec![&expected]);
            prop_assert_eq!(resolves, 0);
            // The interrupt is claimed before the call can run
            let executed = result
                .effects
                .iter()
                .position(|e| matches!(e, Effect::ExecuteTool { .. }));
            prop_assert!(claimed.is_some() && claimed < executed);
        } else {
            prop_assert!(executes.is_empty());
            prop_assert_eq!(resolves, 1);
            prop_assert!(claimed.is_none());
        }
    }

    // User messages are only accepted at rest
    #[test]
    fn prop_user_message_only_when_idle(
        state in arb_state(),
        text in "[a-z ]{1,20}",
    ) {
        let result = transition(&state, &flat_context(), Event::UserMessage { text });
        prop_assert_eq!(result.is_ok(), state == ConvState::Idle);
    }

    // Driving any event sequence never yields a state the executor can't settle
    #[test]
    fn prop_sequences_keep_interrupt_consistent(
        events in proptest::collection::vec(arb_event(), 0..20),
        ctx in arb_context(),
    ) {
        let mut state = ConvState::Idle;
        for event in events {
            if let Ok(result) = transition(&state, &ctx, event) {
                if let ConvState::AwaitingConfirmation { interrupt } = &result.new_state {
                    prop_assert!(interrupt.call.input.requires_confirmation());
                }
                if result.new_state == ConvState::Idle {
                    let replied = result.effects.iter().any(|e| matches!(e, Effect::Reply { .. }));
                    prop_assert!(replied);
                }
                state = result.new_state;
            }
        }
    }
}
