//! Turn state types

use crate::llm::{Message, ToolCallRequest, ToolDefinition};
use crate::tools::{CancelTestDriveInput, ScheduleTestDriveInput, ToolName};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// The only answer that confirms a gated call
pub const CONFIRM_ANSWER: &str = "y";

pub const CANCEL_SUCCEEDED: &str = "Test drive canceled.";
pub const CANCEL_FAILED: &str = "Error when canceling the test drive. Need to call the dealership.";
pub const CANCEL_DECLINED: &str = "User gave up canceling, they want to keep the test drive.";

// ============================================================================
// Departments
// ============================================================================

/// Business area the supervisor can hand a request to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Department {
    Sales,
    TestDrive,
}

impl Department {
    pub const ALL: [Department; 2] = [Department::Sales, Department::TestDrive];

    /// Name of the tool the supervisor calls to transfer
    pub fn transfer_tool(self) -> &'static str {
        match self {
            Department::Sales => "to_sales",
            Department::TestDrive => "to_test_drive",
        }
    }

    pub fn from_transfer_tool(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.transfer_tool() == name)
    }

    pub fn transfer_definition(self) -> ToolDefinition {
        let description = match self {
            Department::Sales => "Call this tool when the user wants to buy a car",
            Department::TestDrive => "Call this tool when the user wants to talk about test drives",
        };
        ToolDefinition {
            name: self.transfer_tool().to_string(),
            description: description.to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Department::Sales => "sales",
            Department::TestDrive => "test_drive",
        })
    }
}

// ============================================================================
// Tool Input Types
// ============================================================================

/// Strongly typed tool input. Built once from the model's raw request so the
/// router dispatches on variants, never on strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_tool", rename_all = "snake_case")]
pub enum ToolInput {
    ListInventory,
    ScheduleTestDrive(ScheduleTestDriveInput),
    ListTestDrives,
    CancelTestDrive(CancelTestDriveInput),
    /// Hand the request to a department (supervisor only)
    Transfer { department: Department },
    /// Unknown tool, tool not offered here, or arguments that failed to parse
    Invalid {
        name: String,
        arguments: Value,
        reason: String,
    },
}

impl ToolInput {
    /// Get the tool name as the model sees it
    pub fn tool_name(&self) -> &str {
        match self {
            ToolInput::Transfer { department } => department.transfer_tool(),
            ToolInput::Invalid { name, .. } => name,
            _ => self.dealership_tool().map_or("", ToolName::as_str),
        }
    }

    /// The dealership tool behind this input, if any
    pub fn dealership_tool(&self) -> Option<ToolName> {
        match self {
            ToolInput::ListInventory => Some(ToolName::ListInventory),
            ToolInput::ScheduleTestDrive(_) => Some(ToolName::ScheduleTestDrive),
            ToolInput::ListTestDrives => Some(ToolName::ListTestDrives),
            ToolInput::CancelTestDrive(_) => Some(ToolName::CancelTestDrive),
            ToolInput::Transfer { .. } | ToolInput::Invalid { .. } => None,
        }
    }

    pub fn requires_confirmation(&self) -> bool {
        self.dealership_tool()
            .is_some_and(ToolName::requires_confirmation)
    }

    /// Convert to JSON Value for tool execution
    pub fn to_value(&self) -> Value {
        match self {
            ToolInput::ScheduleTestDrive(input) => {
                serde_json::to_value(input).unwrap_or(Value::Null)
            }
            ToolInput::CancelTestDrive(input) => serde_json::to_value(input).unwrap_or(Value::Null),
            ToolInput::Invalid { arguments, .. } => arguments.clone(),
            ToolInput::ListInventory | ToolInput::ListTestDrives | ToolInput::Transfer { .. } => {
                json!({})
            }
        }
    }

    /// Question put to the human before a gated call runs
    pub fn confirmation_prompt(&self) -> Option<String> {
        match self {
            ToolInput::CancelTestDrive(input) => Some(format!(
                "Do you confirm the cancel of test drive code {}? [y/n]",
                input.code
            )),
            _ => None,
        }
    }

    /// Tool result recorded after a confirmed gated call has run
    pub fn confirmed_outcome(&self, success: bool) -> String {
        match self {
            ToolInput::CancelTestDrive(_) if success => CANCEL_SUCCEEDED.to_string(),
            ToolInput::CancelTestDrive(_) => CANCEL_FAILED.to_string(),
            _ if success => "Done.".to_string(),
            _ => "Failed.".to_string(),
        }
    }

    /// Tool result recorded when the human declines
    pub fn declined_outcome(&self) -> String {
        match self {
            ToolInput::CancelTestDrive(_) => CANCEL_DECLINED.to_string(),
            _ => "User declined.".to_string(),
        }
    }
}

// ============================================================================
// Tool Call
// ============================================================================

/// A tool call from the LLM with typed input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub input: ToolInput,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, input: ToolInput) -> Self {
        Self {
            id: id.into(),
            input,
        }
    }

    /// Validate a raw request against what the profile offers
    pub fn from_request(request: &ToolCallRequest, context: &ConvContext) -> Self {
        let invalid = |reason: String| ToolInput::Invalid {
            name: request.name.clone(),
            arguments: request.arguments.clone(),
            reason,
        };

        let input = if let Some(department) = Department::from_transfer_tool(&request.name) {
            if context.departments.contains(&department) {
                ToolInput::Transfer { department }
            } else {
                invalid(format!("Unknown tool: {}", request.name))
            }
        } else {
            match request.name.parse::<ToolName>() {
                Ok(name) if context.tools.contains(&name) => {
                    parse_arguments(name, &request.arguments).unwrap_or_else(invalid)
                }
                _ => invalid(format!("Unknown tool: {}", request.name)),
            }
        };

        Self::new(request.id.clone(), input)
    }

    pub fn name(&self) -> &str {
        self.input.tool_name()
    }

    /// Failed tool result for an invalid call
    pub fn rejection(&self) -> Option<Message> {
        match &self.input {
            ToolInput::Invalid { reason, .. } => {
                Some(Message::tool(self.id.clone(), reason.clone(), true))
            }
            _ => None,
        }
    }
}

fn parse_arguments(name: ToolName, arguments: &Value) -> Result<ToolInput, String> {
    let invalid = |e: serde_json::Error| format!("Invalid input: {e}");
    Ok(match name {
        ToolName::ListInventory => ToolInput::ListInventory,
        ToolName::ListTestDrives => ToolInput::ListTestDrives,
        ToolName::ScheduleTestDrive => {
            ToolInput::ScheduleTestDrive(serde_json::from_value(arguments.clone()).map_err(invalid)?)
        }
        ToolName::CancelTestDrive => {
            ToolInput::CancelTestDrive(serde_json::from_value(arguments.clone()).map_err(invalid)?)
        }
    })
}

// ============================================================================
// Suspension
// ============================================================================

/// Where a department was when it raised an interrupt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationFrame {
    pub department: Department,
    /// The supervisor's transfer call still waiting for its result
    pub transfer_call_id: String,
    /// The department's working history up to and including the gated call
    pub transcript: Vec<Message>,
}

/// A gated call waiting for a human yes/no. At most one per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub prompt: String,
    pub call: ToolCall,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation: Option<DelegationFrame>,
}

impl PendingInterrupt {
    pub fn for_call(call: ToolCall) -> Self {
        let prompt = call
            .input
            .confirmation_prompt()
            .unwrap_or_else(|| format!("Do you confirm {}? [y/n]", call.name()));
        Self {
            prompt,
            call,
            delegation: None,
        }
    }

    /// Id of the call the shared history must hold for this interrupt
    pub fn anchor_call_id(&self) -> &str {
        self.delegation
            .as_ref()
            .map_or(self.call.id.as_str(), |f| f.transfer_call_id.as_str())
    }
}

// ============================================================================
// Turn State
// ============================================================================

/// Router state within one turn
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    /// Ready for user input
    #[default]
    Idle,

    /// Model call in flight
    AwaitingModel,

    /// Running an ungated tool
    DispatchingTool { call: ToolCall },

    /// A department is handling the transfer call
    Delegating {
        call: ToolCall,
        department: Department,
    },

    /// Suspended until the human answers
    AwaitingConfirmation { interrupt: PendingInterrupt },

    /// Confirmed gated call is executing
    ResolvingConfirmation { interrupt: PendingInterrupt },
}

/// Context for one router instance (immutable configuration)
#[derive(Debug, Clone)]
pub struct ConvContext {
    pub session_id: String,
    pub profile: String,
    /// Dealership tools this profile may call
    pub tools: Vec<ToolName>,
    /// Departments this profile may transfer to
    pub departments: Vec<Department>,
}

impl ConvContext {
    pub fn new(
        session_id: impl Into<String>,
        profile: impl Into<String>,
        tools: Vec<ToolName>,
        departments: Vec<Department>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            profile: profile.into(),
            tools,
            departments,
        }
    }
}
