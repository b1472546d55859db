//! Effects produced by state transitions

use super::state::{DelegationFrame, Department, PendingInterrupt, ToolCall};
use crate::llm::Message;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Append a message to the history
    AppendMessage { message: Message },

    /// Call the model with the current history
    RequestModel,

    /// Run a dealership tool
    ExecuteTool { call: ToolCall },

    /// Run a department on a working copy of the history
    Delegate {
        department: Department,
        call: ToolCall,
    },

    /// Re-enter a suspended department with the human's answer
    ResumeDelegation {
        frame: DelegationFrame,
        interrupt: PendingInterrupt,
        answer: String,
    },

    /// Record the interrupt, together with the message requesting the gated
    /// call, and end the turn with its prompt
    Suspend {
        message: Option<Message>,
        interrupt: PendingInterrupt,
    },

    /// Clear the stored interrupt before its call runs, so a confirmed call
    /// can never be replayed
    ClaimInterrupt { call_id: String },

    /// Append the gated call's result and clear the interrupt, atomically
    ResolveInterrupt { message: Message },

    /// End the turn with this reply
    Reply { text: String },
}

impl Effect {
    pub fn append(message: Message) -> Self {
        Effect::AppendMessage { message }
    }

    pub fn execute_tool(call: ToolCall) -> Self {
        Effect::ExecuteTool { call }
    }
}
