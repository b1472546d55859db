//! Agent profiles
//!
//! A profile is the configuration of one router: its prompt, the dealership
//! tools it may call and the departments it may hand off to. The flat
//! assistant owns every tool; in the departments topology the supervisor only
//! transfers and each department owns its slice of the tools.

use crate::llm::ToolDefinition;
use crate::state_machine::{ConvContext, Department};
use crate::system_prompt::build_system_prompt;
use crate::tools::ToolName;
use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    Flat,
    Supervisor,
    Department(Department),
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentKind::Flat => f.write_str("flat"),
            AgentKind::Supervisor => f.write_str("supervisor"),
            AgentKind::Department(d) => write!(f, "{d}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub kind: AgentKind,
    pub tools: Vec<ToolName>,
    pub departments: Vec<Department>,
}

impl AgentProfile {
    pub fn flat() -> Self {
        Self {
            kind: AgentKind::Flat,
            tools: ToolName::ALL.to_vec(),
            departments: vec![],
        }
    }

    pub fn supervisor() -> Self {
        Self {
            kind: AgentKind::Supervisor,
            tools: vec![],
            departments: Department::ALL.to_vec(),
        }
    }

    /// Departments never get transfer tools, so delegation is one level deep
    pub fn department(department: Department) -> Self {
        let tools = match department {
            Department::Sales => vec![ToolName::ListInventory],
            Department::TestDrive => vec![
                ToolName::ScheduleTestDrive,
                ToolName::ListTestDrives,
                ToolName::CancelTestDrive,
            ],
        };
        Self {
            kind: AgentKind::Department(department),
            tools,
            departments: vec![],
        }
    }

    pub fn context(&self, session_id: &str) -> ConvContext {
        ConvContext::new(
            session_id,
            self.kind.to_string(),
            self.tools.clone(),
            self.departments.clone(),
        )
    }

    pub fn system_prompt(&self, now: NaiveDateTime) -> String {
        build_system_prompt(self.kind, now)
    }

    /// Definitions offered to the model: this profile's share of `available`
    /// plus its transfer tools
    pub fn definitions(&self, available: &[ToolDefinition]) -> Vec<ToolDefinition> {
        available
            .iter()
            .filter(|d| self.tools.iter().any(|t| t.as_str() == d.name))
            .cloned()
            .chain(self.departments.iter().map(|d| d.transfer_definition()))
            .collect()
    }
}

/// How the assistant is organised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Topology {
    /// One assistant with every tool
    #[default]
    Flat,
    /// A supervisor routing to sales and test-drive departments
    Departments,
}

impl Topology {
    /// Profile that receives the user's input
    pub fn entry_profile(self) -> AgentProfile {
        match self {
            Topology::Flat => AgentProfile::flat(),
            Topology::Departments => AgentProfile::supervisor(),
        }
    }
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flat" => Ok(Topology::Flat),
            "departments" | "supervisor" => Ok(Topology::Departments),
            other => Err(format!("Unknown topology: {other}")),
        }
    }
}
