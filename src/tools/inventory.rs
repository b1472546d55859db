//! Inventory lookup

use super::{Tool, ToolContext, ToolName, ToolOutput};
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct ListInventoryTool;

#[async_trait]
impl Tool for ListInventoryTool {
    fn name(&self) -> ToolName {
        ToolName::ListInventory
    }

    fn description(&self) -> String {
        "List the cars currently available at the dealership. Each car has a model, color, \
         odometer reading in kilometers (kms), year and price (value)."
            .to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn run(&self, _input: Value, ctx: ToolContext) -> ToolOutput {
        let cars = ctx.store().available_cars();
        tracing::debug!(session_id = %ctx.session_id, count = cars.len(), "Listing inventory");
        ToolOutput::json(&cars)
    }
}
