//! Mock implementations and end-to-end turn tests
//!
//! These mocks enable testing whole turns without a model server.

use super::traits::*;
use super::{Dispatcher, TurnError, UNRECORDED_RESULT};
use crate::agents::Topology;
use crate::llm::{
    LlmError, LlmRequest, LlmResponse, LlmService, Message, Role, ToolCallRequest, ToolDefinition,
};
use crate::session::{InMemorySessionStore, SessionState, SessionStore};
use crate::state_machine::state::CANCEL_DECLINED;
use crate::state_machine::{PendingInterrupt, ToolCall, ToolInput};
use crate::store::DealershipStore;
use crate::tools::{CancelTestDriveInput, ToolContext, ToolName, ToolOutput, ToolRegistry};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Mock LLM Client
// ============================================================================

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a plain text reply
    pub fn queue_text(&self, text: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(LlmResponse::text(text)));
    }

    /// Queue a reply requesting one tool call
    pub fn queue_call(&self, id: &str, name: &str, arguments: Value) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(LlmResponse::tool_calls(
                "",
                vec![ToolCallRequest::new(id, name, arguments)],
            )));
    }

    /// Queue a raw response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlmClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Recording Tool Executor
// ============================================================================

/// Real tools, with every execution recorded
pub struct RecordingToolExecutor {
    registry: ToolRegistry,
    /// Record of tool executions
    pub executions: Mutex<Vec<(ToolName, Value)>>,
}

impl RecordingToolExecutor {
    pub fn new() -> Self {
        Self {
            registry: ToolRegistry::standard(),
            executions: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded_executions(&self) -> Vec<(ToolName, Value)> {
        self.executions.lock().unwrap().clone()
    }

    pub fn count(&self, name: ToolName) -> usize {
        self.executions
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == name)
            .count()
    }
}

#[async_trait]
impl ToolExecutor for RecordingToolExecutor {
    async fn execute(&self, name: ToolName, input: Value, ctx: ToolContext) -> Option<ToolOutput> {
        self.executions.lock().unwrap().push((name, input.clone()));
        self.registry.execute(name, input, ctx).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }
}

// ============================================================================
// Failing Session Store
// ============================================================================

/// In-memory sessions whose next result write fails
pub struct FailingResolveStore {
    inner: InMemorySessionStore,
    fail_next_resolve: AtomicBool,
}

impl FailingResolveStore {
    pub fn new() -> Self {
        Self {
            inner: InMemorySessionStore::new(),
            fail_next_resolve: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl SessionStore for FailingResolveStore {
    async fn get(&self, session_id: &str) -> Result<SessionState, String> {
        self.inner.get(session_id).await
    }

    async fn append(&self, session_id: &str, message: &Message) -> Result<(), String> {
        self.inner.append(session_id, message).await
    }

    async fn set_pending_interrupt(
        &self,
        session_id: &str,
        interrupt: Option<&PendingInterrupt>,
    ) -> Result<(), String> {
        self.inner.set_pending_interrupt(session_id, interrupt).await
    }

    async fn suspend(
        &self,
        session_id: &str,
        message: Option<&Message>,
        interrupt: &PendingInterrupt,
    ) -> Result<(), String> {
        self.inner.suspend(session_id, message, interrupt).await
    }

    async fn resolve_interrupt(
        &self,
        session_id: &str,
        message: Option<&Message>,
    ) -> Result<(), String> {
        if message.is_some() && self.fail_next_resolve.swap(false, Ordering::SeqCst) {
            return Err("disk I/O error".to_string());
        }
        self.inner.resolve_interrupt(session_id, message).await
    }
}

// ============================================================================
// Harness
// ============================================================================

type TestDispatcher<S> = Dispatcher<S, Arc<MockLlmClient>, Arc<RecordingToolExecutor>>;

struct Harness<S> {
    dispatcher: TestDispatcher<S>,
    llm: Arc<MockLlmClient>,
    tools: Arc<RecordingToolExecutor>,
    store: Arc<DealershipStore>,
}

fn harness(topology: Topology) -> Harness<InMemorySessionStore> {
    harness_with(InMemorySessionStore::new(), topology)
}

fn harness_with<S: SessionStore>(sessions: S, topology: Topology) -> Harness<S> {
    let llm = Arc::new(MockLlmClient::new());
    let tools = Arc::new(RecordingToolExecutor::new());
    let store = Arc::new(DealershipStore::new());
    let dispatcher = Dispatcher::new(sessions, Arc::clone(&llm), Arc::clone(&tools), Arc::clone(&store))
        .with_topology(topology);
    Harness {
        dispatcher,
        llm,
        tools,
        store,
    }
}

impl<S: SessionStore> Harness<S> {
    /// Book test drives until `code` exists
    fn book_until(&self, code: u32) {
        let car = self.store.available_cars()[0].clone();
        let date = NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        for _ in 0..code {
            self.store
                .schedule_test_drive(date, &car, "Ana", "DL-1")
                .unwrap();
        }
    }

    fn is_canceled(&self, code: u32) -> bool {
        self.store
            .list_test_drives()
            .iter()
            .any(|t| t.code == code && t.status == crate::store::TestDriveStatus::Canceled)
    }

    async fn turn(&self, session: &str, text: &str) -> Result<String, TurnError> {
        self.dispatcher.process_turn(session, text).await
    }

    async fn history(&self, session: &str) -> Vec<Message> {
        self.dispatcher.sessions().get(session).await.unwrap().messages
    }

    async fn pending(&self, session: &str) -> Option<PendingInterrupt> {
        self.dispatcher
            .sessions()
            .get(session)
            .await
            .unwrap()
            .pending_interrupt
    }
}

const PROMPT_3: &str = "Do you confirm the cancel of test drive code 3? [y/n]";

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_reply() {
        let h = harness(Topology::Flat);
        h.llm.queue_text("Hello! How can I help?");

        let reply = h.turn("s1", "hi").await.unwrap();
        assert_eq!(reply, "Hello! How can I help?");

        let history = h.history("s1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Message::user("hi"));
        assert_eq!(history[1].role, Role::Assistant);
        assert!(h.pending("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_list_inventory_round_trip() {
        let h = harness(Topology::Flat);
        h.llm.queue_call("c1", "list_inventory", json!({}));
        h.llm.queue_text("We have Golfs and Polos.");

        let reply = h.turn("s1", "what cars do you have?").await.unwrap();
        assert_eq!(reply, "We have Golfs and Polos.");
        assert_eq!(h.tools.count(ToolName::ListInventory), 1);

        let history = h.history("s1").await;
        let roles: Vec<_> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(history[2].tool_call_id.as_deref(), Some("c1"));
        assert!(history[2].content.contains("golf"));

        // Second model call saw the tool result and the flat toolset
        let requests = h.llm.recorded_requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages.len(), 3);
        assert_eq!(requests[0].tools.len(), ToolName::ALL.len());
        assert!(requests[0].system.contains("Current Date:"));
    }

    #[tokio::test]
    async fn test_cancel_confirmed_executes_once() {
        let h = harness(Topology::Flat);
        h.book_until(3);
        h.llm.queue_call("c1", "cancel_test_drive", json!({"code": 3}));

        let prompt = h.turn("s1", "cancel my test drive 3").await.unwrap();
        assert_eq!(prompt, PROMPT_3);
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 0);
        assert!(!h.is_canceled(3));

        let pending = h.pending("s1").await.unwrap();
        assert_eq!(pending.call.id, "c1");
        assert_eq!(pending.prompt, PROMPT_3);
        let history = h.history("s1").await;
        assert!(history.last().unwrap().requests_call("c1"));

        h.llm.queue_text("Your test drive is canceled.");
        let reply = h.turn("s1", "y").await.unwrap();
        assert_eq!(reply, "Your test drive is canceled.");
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 1);
        assert!(h.is_canceled(3));
        assert!(h.pending("s1").await.is_none());

        let history = h.history("s1").await;
        let results: Vec<_> = history
            .iter()
            .filter(|m| m.tool_call_id.as_deref() == Some("c1"))
            .collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "Test drive canceled.");
    }

    #[tokio::test]
    async fn test_cancel_declined_keeps_booking() {
        let h = harness(Topology::Flat);
        h.book_until(3);
        h.llm.queue_call("c1", "cancel_test_drive", json!({"code": 3}));
        h.turn("s1", "cancel 3").await.unwrap();

        h.llm.queue_text("No problem, your test drive stays booked.");
        let reply = h.turn("s1", "n").await.unwrap();
        assert_eq!(reply, "No problem, your test drive stays booked.");
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 0);
        assert!(!h.is_canceled(3));
        assert!(h.pending("s1").await.is_none());

        let history = h.history("s1").await;
        let result = history
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert_eq!(
            result.content,
            "User gave up canceling, they want to keep the test drive."
        );
    }

    #[tokio::test]
    async fn test_uppercase_answer_declines() {
        let h = harness(Topology::Flat);
        h.book_until(3);
        h.llm.queue_call("c1", "cancel_test_drive", json!({"code": 3}));
        h.turn("s1", "cancel 3").await.unwrap();

        h.llm.queue_text("Kept.");
        h.turn("s1", "Y").await.unwrap();
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 0);
        assert!(!h.is_canceled(3));
    }

    #[tokio::test]
    async fn test_cancel_unknown_code_reports_failure() {
        let h = harness(Topology::Flat);
        h.llm.queue_call("c1", "cancel_test_drive", json!({"code": 42}));
        h.turn("s1", "cancel 42").await.unwrap();

        h.llm.queue_text("I couldn't cancel that one.");
        h.turn("s1", "y").await.unwrap();

        let history = h.history("s1").await;
        let result = history
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert_eq!(
            result.content,
            "Error when canceling the test drive. Need to call the dealership."
        );
    }

    #[tokio::test]
    async fn test_no_replay_after_interrupt_cleared() {
        let h = harness(Topology::Flat);
        h.book_until(3);
        h.llm.queue_call("c1", "cancel_test_drive", json!({"code": 3}));
        h.turn("s1", "cancel 3").await.unwrap();
        h.llm.queue_text("Canceled.");
        h.turn("s1", "y").await.unwrap();

        // A second "y" is an ordinary message now
        h.llm.queue_text("Anything else?");
        let reply = h.turn("s1", "y").await.unwrap();
        assert_eq!(reply, "Anything else?");
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 1);
        assert_eq!(h.history("s1").await.last().unwrap().content, "Anything else?");
    }

    #[tokio::test]
    async fn test_unknown_tool_gets_error_result() {
        let h = harness(Topology::Flat);
        h.llm.queue_call("c1", "fly_car", json!({}));
        h.llm.queue_text("Sorry, I can't do that.");

        let reply = h.turn("s1", "fly me").await.unwrap();
        assert_eq!(reply, "Sorry, I can't do that.");
        assert!(h.tools.recorded_executions().is_empty());

        let history = h.history("s1").await;
        let result = history
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("c1"))
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("Unknown tool: fly_car"));
    }

    #[tokio::test]
    async fn test_extra_calls_are_dropped() {
        let h = harness(Topology::Flat);
        h.llm.queue_response(LlmResponse::tool_calls(
            "",
            vec![
                ToolCallRequest::new("c1", "list_inventory", json!({})),
                ToolCallRequest::new("c2", "list_test_drives", json!({})),
            ],
        ));
        h.llm.queue_text("Done.");

        h.turn("s1", "show me everything").await.unwrap();
        assert_eq!(h.tools.count(ToolName::ListInventory), 1);
        assert_eq!(h.tools.count(ToolName::ListTestDrives), 0);

        let history = h.history("s1").await;
        assert_eq!(history[1].tool_calls.len(), 1);
        assert!(!history.iter().any(|m| m.requests_call("c2")));
    }

    #[tokio::test]
    async fn test_schedule_through_model() {
        let h = harness(Topology::Flat);
        let car = h.store.available_cars()[2].clone();
        h.llm.queue_call(
            "c1",
            "schedule_test_drive",
            json!({
                "date": "2025-03-10 14:00",
                "car": car,
                "name": "Ana",
                "driver_licence": "DL-1"
            }),
        );
        h.llm.queue_text("Booked, your code is 1.");

        h.turn("s1", "book the white polo").await.unwrap();
        let drives = h.store.list_test_drives();
        assert_eq!(drives.len(), 1);
        assert_eq!(drives[0].code, 1);

        let history = h.history("s1").await;
        assert_eq!(history[2].content, "1");
        assert!(!history[2].is_error);
    }

    #[tokio::test]
    async fn test_model_unavailable_propagates() {
        let h = harness(Topology::Flat);
        h.llm.queue_error(LlmError::server_error("503"));

        let err = h.turn("s1", "hi").await.unwrap_err();
        assert!(matches!(err, TurnError::ModelUnavailable(_)));

        // The session stays usable
        h.llm.queue_text("Back online.");
        assert_eq!(h.turn("s1", "hi again").await.unwrap(), "Back online.");
    }

    #[tokio::test]
    async fn test_dangling_interrupt_is_cleared() {
        let h = harness(Topology::Flat);
        let interrupt = PendingInterrupt::for_call(ToolCall::new(
            "ghost",
            ToolInput::CancelTestDrive(CancelTestDriveInput { code: 3 }),
        ));
        h.dispatcher
            .sessions()
            .set_pending_interrupt("s1", Some(&interrupt))
            .await
            .unwrap();

        let err = h.turn("s1", "y").await.unwrap_err();
        assert!(matches!(err, TurnError::StateInconsistency(_)));
        assert!(h.pending("s1").await.is_none());
        assert!(h.tools.recorded_executions().is_empty());
    }

    #[tokio::test]
    async fn test_step_limit() {
        let h = harness(Topology::Flat);
        let dispatcher = Dispatcher::new(
            InMemorySessionStore::new(),
            Arc::clone(&h.llm),
            Arc::clone(&h.tools),
            Arc::clone(&h.store),
        )
        .with_max_steps(2);
        for i in 0..3 {
            h.llm.queue_call(&format!("c{i}"), "list_inventory", json!({}));
        }

        let err = dispatcher.process_turn("s1", "loop").await.unwrap_err();
        assert!(matches!(err, TurnError::StepLimit(2)));
        assert_eq!(h.tools.count(ToolName::ListInventory), 2);
    }

    #[tokio::test]
    async fn test_delegated_cancel_suspends_and_resumes() {
        let h = harness(Topology::Departments);
        h.book_until(3);
        h.llm.queue_call("t1", "to_test_drive", json!({}));
        h.llm.queue_call("c1", "cancel_test_drive", json!({"code": 3}));

        let prompt = h.turn("s1", "cancel test drive 3").await.unwrap();
        assert_eq!(prompt, PROMPT_3);
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 0);

        let pending = h.pending("s1").await.unwrap();
        let frame = pending.delegation.as_ref().unwrap();
        assert_eq!(frame.transfer_call_id, "t1");
        assert!(frame.transcript.iter().any(|m| m.requests_call("c1")));

        // Supervisor offers only transfers; the department only its tools
        let requests = h.llm.recorded_requests();
        let names = |r: &LlmRequest| -> Vec<String> { r.tools.iter().map(|t| t.name.clone()).collect() };
        assert_eq!(names(&requests[0]), vec!["to_sales", "to_test_drive"]);
        assert!(names(&requests[1]).contains(&"cancel_test_drive".to_string()));
        assert!(!names(&requests[1]).contains(&"list_inventory".to_string()));

        h.llm.queue_text("Test drive 3 is canceled.");
        h.llm.queue_text("All done, anything else?");
        let reply = h.turn("s1", "y").await.unwrap();
        assert_eq!(reply, "All done, anything else?");
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 1);
        assert!(h.is_canceled(3));
        assert!(h.pending("s1").await.is_none());

        // The supervisor history answers the transfer with the department's words
        let history = h.history("s1").await;
        let transfer_result = history
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("t1"))
            .unwrap();
        assert_eq!(transfer_result.content, "Test drive 3 is canceled.");
        assert!(!history.iter().any(|m| m.requests_call("c1")));
    }

    #[tokio::test]
    async fn test_failed_result_write_never_replays_cancel() {
        let h = harness_with(FailingResolveStore::new(), Topology::Flat);
        h.book_until(3);
        h.llm.queue_call("c1", "cancel_test_drive", json!({"code": 3}));
        h.turn("s1", "cancel 3").await.unwrap();

        let err = h.turn("s1", "y").await.unwrap_err();
        assert!(matches!(err, TurnError::Storage(_)));
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 1);
        assert!(h.is_canceled(3));
        assert!(h.pending("s1").await.is_none());

        // The retried "y" is an ordinary message
        h.llm.queue_text("ok");
        assert_eq!(h.turn("s1", "y").await.unwrap(), "ok");
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 1);

        let history = h.history("s1").await;
        let results: Vec<_> = history
            .iter()
            .filter(|m| m.tool_call_id.as_deref() == Some("c1"))
            .collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_error);
        assert_eq!(results[0].content, UNRECORDED_RESULT);

        // The model saw the repaired history
        let requests = h.llm.recorded_requests();
        let last = requests.last().unwrap();
        assert_eq!(last.messages.last().unwrap(), &Message::user("y"));
    }

    #[tokio::test]
    async fn test_delegated_cancel_declined() {
        let h = harness(Topology::Departments);
        h.book_until(3);
        h.llm.queue_call("t1", "to_test_drive", json!({}));
        h.llm.queue_call("c1", "cancel_test_drive", json!({"code": 3}));
        assert_eq!(h.turn("s1", "cancel test drive 3").await.unwrap(), PROMPT_3);

        h.llm.queue_text("Kept it.");
        h.llm.queue_text("Anything else?");
        let reply = h.turn("s1", "n").await.unwrap();
        assert_eq!(reply, "Anything else?");
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 0);
        assert!(!h.is_canceled(3));
        assert!(h.pending("s1").await.is_none());

        let history = h.history("s1").await;
        let transfer_result = history
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("t1"))
            .unwrap();
        assert_eq!(transfer_result.content, "Kept it.");

        // The department's follow-up call saw the declined result
        let requests = h.llm.recorded_requests();
        let declined = requests[2].messages.last().unwrap();
        assert_eq!(declined.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(declined.content, CANCEL_DECLINED);
    }

    #[tokio::test]
    async fn test_delegated_resume_model_failure_answers_transfer() {
        let h = harness(Topology::Departments);
        h.book_until(3);
        h.llm.queue_call("t1", "to_test_drive", json!({}));
        h.llm.queue_call("c1", "cancel_test_drive", json!({"code": 3}));
        h.turn("s1", "cancel test drive 3").await.unwrap();

        h.llm.queue_error(LlmError::server_error("503"));
        let err = h.turn("s1", "y").await.unwrap_err();
        assert!(matches!(err, TurnError::ModelUnavailable(_)));
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 1);
        assert!(h.is_canceled(3));
        assert!(h.pending("s1").await.is_none());

        let history = h.history("s1").await;
        let results: Vec<_> = history
            .iter()
            .filter(|m| m.tool_call_id.as_deref() == Some("t1"))
            .collect();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_error);

        // A later "y" starts an ordinary turn
        h.llm.queue_text("Anything else?");
        assert_eq!(h.turn("s1", "y").await.unwrap(), "Anything else?");
        assert_eq!(h.tools.count(ToolName::CancelTestDrive), 1);
    }

    #[tokio::test]
    async fn test_delegated_sales_reply() {
        let h = harness(Topology::Departments);
        h.llm.queue_call("t1", "to_sales", json!({}));
        h.llm.queue_call("c1", "list_inventory", json!({}));
        h.llm.queue_text("We have a red Polo.");
        h.llm.queue_text("Sales says: we have a red Polo.");

        let reply = h.turn("s1", "any red cars?").await.unwrap();
        assert_eq!(reply, "Sales says: we have a red Polo.");
        assert_eq!(h.tools.count(ToolName::ListInventory), 1);

        let history = h.history("s1").await;
        let roles: Vec<_> = history.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_failed_department_still_answers_transfer() {
        let h = harness(Topology::Departments);
        h.llm.queue_call("t1", "to_sales", json!({}));
        h.llm.queue_error(LlmError::timeout("slow"));

        let err = h.turn("s1", "any cars?").await.unwrap_err();
        assert!(matches!(err, TurnError::ModelUnavailable(_)));

        let history = h.history("s1").await;
        let result = history
            .iter()
            .find(|m| m.tool_call_id.as_deref() == Some("t1"))
            .unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_department_cannot_use_foreign_tool() {
        let h = harness(Topology::Departments);
        h.llm.queue_call("t1", "to_sales", json!({}));
        h.llm.queue_call("c1", "cancel_test_drive", json!({"code": 1}));
        h.llm.queue_text("I can only help with inventory.");
        h.llm.queue_text("Let me route you properly.");

        h.turn("s1", "cancel 1").await.unwrap();
        assert!(h.tools.recorded_executions().is_empty());
        assert!(h.pending("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_sessions_rehydrate_from_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.db");
        let db = crate::db::Database::open(&path).unwrap();
        let h = harness_with(db, Topology::Flat);
        h.book_until(3);
        h.llm.queue_call("c1", "cancel_test_drive", json!({"code": 3}));
        h.turn("s1", "cancel 3").await.unwrap();

        // A fresh dispatcher over the same file picks up the interrupt
        let reopened = crate::db::Database::open(&path).unwrap();
        let dispatcher = Dispatcher::new(
            reopened,
            Arc::clone(&h.llm),
            Arc::clone(&h.tools),
            Arc::clone(&h.store),
        );
        h.llm.queue_text("Canceled.");
        let reply = dispatcher.process_turn("s1", "y").await.unwrap();
        assert_eq!(reply, "Canceled.");
        assert!(h.is_canceled(3));
        assert!(dispatcher
            .sessions()
            .get("s1")
            .await
            .unwrap()
            .pending_interrupt
            .is_none());
    }

    #[tokio::test]
    async fn test_concurrent_sessions() {
        let h = harness(Topology::Flat);
        h.llm.queue_text("Hello!");
        h.llm.queue_text("Hello!");

        let (a, b) = tokio::join!(h.turn("a", "hi"), h.turn("b", "hey"));
        assert_eq!(a.unwrap(), "Hello!");
        assert_eq!(b.unwrap(), "Hello!");

        assert_eq!(h.history("a").await[0], Message::user("hi"));
        assert_eq!(h.history("b").await[0], Message::user("hey"));
        assert_eq!(h.history("a").await.len(), 2);

        // Idle sessions hold no lock entry
        assert!(h.dispatcher.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mock_llm_client_empty_queue() {
        let llm = MockLlmClient::new();
        let request = LlmRequest {
            system: String::new(),
            messages: vec![],
            tools: vec![],
            max_tokens: None,
        };
        assert!(llm.complete(&request).await.is_err());
        assert_eq!(llm.recorded_requests().len(), 1);
    }
}
