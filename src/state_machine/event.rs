//! Events that drive a turn

use super::state::PendingInterrupt;
use crate::llm::Message;
use crate::tools::ToolOutput;

/// How a delegated department finished
#[derive(Debug, Clone, PartialEq)]
pub enum DepartmentOutcome {
    /// Final text, recorded as the transfer call's result
    Replied(String),
    /// The department raised an interrupt; `transcript` is its working history
    Suspended {
        interrupt: PendingInterrupt,
        transcript: Vec<Message>,
    },
}

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    UserMessage { text: String },
    /// Input received while an interrupt is pending. Never recorded as a
    /// user message.
    ConfirmationAnswer { answer: String },

    // Model events
    ModelResponse { message: Message },

    // Tool events
    ToolComplete { call_id: String, output: ToolOutput },

    // Delegation events
    DepartmentComplete {
        call_id: String,
        outcome: DepartmentOutcome,
    },
}
