//! Test drive booking tools

use super::{Tool, ToolContext, ToolError, ToolName, ToolOutput};
use crate::store::Car;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

/// Date layouts accepted for a booking, after RFC 3339
const DATE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

fn parse_date(raw: &str) -> Result<NaiveDateTime, ToolError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| ToolError::Validation(format!("unparseable date '{raw}'")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTestDriveInput {
    /// Kept as text; parsed when the booking runs
    pub date: String,
    pub car: Car,
    pub name: String,
    pub driver_licence: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTestDriveInput {
    #[serde(deserialize_with = "code_from_number_or_string")]
    pub code: u32,
}

/// Small models often quote numbers
fn code_from_number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(u32),
        Text(String),
    }

    match Code::deserialize(deserializer)? {
        Code::Number(n) => Ok(n),
        Code::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid test drive code '{s}'"))),
    }
}

pub struct ScheduleTestDriveTool;

impl ScheduleTestDriveTool {
    fn schedule(input: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let input: ScheduleTestDriveInput = serde_json::from_value(input)?;
        let date = parse_date(&input.date)?;
        let code =
            ctx.store()
                .schedule_test_drive(date, &input.car, &input.name, &input.driver_licence)?;
        Ok(ToolOutput::success(code.to_string()))
    }
}

#[async_trait]
impl Tool for ScheduleTestDriveTool {
    fn name(&self) -> ToolName {
        ToolName::ScheduleTestDrive
    }

    fn description(&self) -> String {
        "Schedule a test drive for a specific car from the inventory. Returns the test drive \
         code the client needs to manage the booking."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["date", "car", "name", "driver_licence"],
            "properties": {
                "date": {
                    "type": "string",
                    "description": "Date and time of the test drive, e.g. 2025-03-10T14:00"
                },
                "car": {
                    "type": "object",
                    "description": "The car the client wants to test, as listed in the inventory",
                    "required": ["model", "color", "kms", "year", "value"],
                    "properties": {
                        "model": {"type": "string", "enum": ["golf", "polo", "t_cross"]},
                        "color": {"type": "string", "enum": ["black", "blue", "white", "red", "green"]},
                        "kms": {"type": "integer", "minimum": 0},
                        "year": {"type": "integer"},
                        "value": {"type": "number", "minimum": 0}
                    }
                },
                "name": {"type": "string", "description": "Client's name"},
                "driver_licence": {"type": "string", "description": "Client's driver licence"}
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        Self::schedule(input, &ctx).into()
    }
}

pub struct ListTestDrivesTool;

#[async_trait]
impl Tool for ListTestDrivesTool {
    fn name(&self) -> ToolName {
        ToolName::ListTestDrives
    }

    fn description(&self) -> String {
        "List every test drive on the books with its code, date, car, client and status \
         (scheduled, canceled or done)."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, ctx: ToolContext) -> ToolOutput {
        ToolOutput::json(&ctx.store().list_test_drives())
    }
}

pub struct CancelTestDriveTool;

impl CancelTestDriveTool {
    fn cancel(input: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let input: CancelTestDriveInput = serde_json::from_value(input)?;
        let canceled = ctx.store().cancel_test_drive(input.code)?;
        Ok(ToolOutput {
            success: canceled,
            output: canceled.to_string(),
        })
    }
}

#[async_trait]
impl Tool for CancelTestDriveTool {
    fn name(&self) -> ToolName {
        ToolName::CancelTestDrive
    }

    fn description(&self) -> String {
        "Cancel a scheduled test drive by its code. The client is asked to confirm before \
         anything changes."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["code"],
            "properties": {
                "code": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "The code of the test drive"
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: ToolContext) -> ToolOutput {
        Self::cancel(input, &ctx).into()
    }
}
