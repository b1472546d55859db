//! Dealership tools
//!
//! Tools are stateless singletons. Everything a call needs (the session it
//! runs for, the dealership store it mutates) arrives through `ToolContext`.

mod inventory;
mod test_drive;

pub use inventory::ListInventoryTool;
pub use test_drive::{
    CancelTestDriveInput, CancelTestDriveTool, ListTestDrivesTool, ScheduleTestDriveInput,
    ScheduleTestDriveTool,
};

use crate::llm::ToolDefinition;
use crate::store::{DealershipStore, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Every operation the dealership exposes to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ListInventory,
    ScheduleTestDrive,
    ListTestDrives,
    CancelTestDrive,
}

impl ToolName {
    pub const ALL: [ToolName; 4] = [
        ToolName::ListInventory,
        ToolName::ScheduleTestDrive,
        ToolName::ListTestDrives,
        ToolName::CancelTestDrive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::ListInventory => "list_inventory",
            ToolName::ScheduleTestDrive => "schedule_test_drive",
            ToolName::ListTestDrives => "list_test_drives",
            ToolName::CancelTestDrive => "cancel_test_drive",
        }
    }

    /// Destructive tools suspend the turn for a human yes/no first
    pub fn requires_confirmation(self) -> bool {
        matches!(self, ToolName::CancelTestDrive)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ToolError::UnknownTool(s.to_string()))
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Store error: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for ToolError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::CarNotAvailable(_) => ToolError::Validation(e.to_string()),
            other => ToolError::Store(other),
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::Validation(e.to_string())
    }
}

/// Result from tool execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub output: String,
}

impl ToolOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
        }
    }

    /// Serialize a tool's return value; serialization failure is a failed call
    pub fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(s) => Self::success(s),
            Err(e) => Self::error(format!("Failed to encode result: {e}")),
        }
    }
}

impl From<Result<ToolOutput, ToolError>> for ToolOutput {
    fn from(result: Result<ToolOutput, ToolError>) -> Self {
        result.unwrap_or_else(|e| ToolOutput::error(e.to_string()))
    }
}

/// All context needed for a tool invocation.
///
/// Created fresh for each tool call.
#[derive(Clone)]
pub struct ToolContext {
    /// The session this tool is executing within
    pub session_id: String,

    store: Arc<DealershipStore>,
}

impl ToolContext {
    pub fn new(session_id: impl Into<String>, store: Arc<DealershipStore>) -> Self {
        Self {
            session_id: session_id.into(),
            store,
        }
    }

    pub fn store(&self) -> &DealershipStore {
        &self.store
    }
}

/// Trait for tools that can be executed by the router
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;

    /// Tool description for LLM
    fn description(&self) -> String;

    /// JSON schema for tool input
    fn input_schema(&self) -> Value;

    /// Execute the tool with all context provided via `ToolContext`
    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput;
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool registered twice: {0}")]
    DuplicateTool(ToolName),
}

/// Collection of tools offered to one agent profile
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Result<Self, RegistryError> {
        for (i, tool) in tools.iter().enumerate() {
            if tools[..i].iter().any(|t| t.name() == tool.name()) {
                return Err(RegistryError::DuplicateTool(tool.name()));
            }
        }
        Ok(Self { tools })
    }

    /// Every dealership tool
    pub fn standard() -> Self {
        Self::with_names(&ToolName::ALL)
    }

    /// Registry restricted to the given tools, in order. Repeated names are
    /// registered once.
    pub fn with_names(names: &[ToolName]) -> Self {
        let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(names.len());
        for &name in names {
            if tools.iter().any(|t| t.name() == name) {
                continue;
            }
            tools.push(match name {
                ToolName::ListInventory => Arc::new(ListInventoryTool),
                ToolName::ScheduleTestDrive => Arc::new(ScheduleTestDriveTool),
                ToolName::ListTestDrives => Arc::new(ListTestDrivesTool),
                ToolName::CancelTestDrive => Arc::new(CancelTestDriveTool),
            });
        }
        Self { tools }
    }

    pub fn get(&self, name: ToolName) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Get all tool definitions for LLM
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().as_str().to_string(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name with context
    pub async fn execute(&self, name: ToolName, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        match self.get(name) {
            Some(tool) => Some(tool.run(input, ctx).await),
            None => None,
        }
    }
}
