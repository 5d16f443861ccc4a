//! Scripted in-memory ticket service for testing
//!
//! Tickets live in a map; `process_ticket` responses are replayed from a
//! script, and the last scripted response repeats once the script runs dry
//! (mirroring a service whose workflow has stopped growing). Calls can be
//! held at a gate to simulate slow remote calls.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;

use super::{ApiError, TicketService};
use crate::types::ticket::now_iso8601;
use crate::types::{
    HealthReport, ProcessResult, SubmitResponse, Ticket, TicketCreate, TicketStatus,
    TicketSubmission, WorkflowResult,
};

#[derive(Default)]
struct MockState {
    tickets: HashMap<String, Ticket>,
    process_script: VecDeque<Result<ProcessResult, ApiError>>,
    last_process: Option<Result<ProcessResult, ApiError>>,
    get_ticket_failures: VecDeque<ApiError>,
    get_ticket_calls: usize,
    process_calls: usize,
    submissions: Vec<TicketSubmission>,
    next_id: u32,
}

/// Mock implementation for testing
#[derive(Default, Clone)]
pub struct MockTicketService {
    state: Arc<Mutex<MockState>>,
    get_ticket_gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
    process_gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
}

impl MockTicketService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that already knows one ticket
    pub fn with_ticket(ticket_id: &str, status: TicketStatus) -> Self {
        let mock = Self::new();
        mock.add_ticket(ticket(ticket_id, status));
        mock
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_ticket(&self, ticket: Ticket) {
        self.state().tickets.insert(ticket.ticket_id.clone(), ticket);
    }

    /// Change the status reported by `get_ticket`
    pub fn set_status(&self, ticket_id: &str, status: TicketStatus) {
        if let Some(t) = self.state().tickets.get_mut(ticket_id) {
            t.status = status;
        }
    }

    pub fn set_resolution(&self, ticket_id: &str, resolution: &str) {
        if let Some(t) = self.state().tickets.get_mut(ticket_id) {
            t.resolution = Some(resolution.to_string());
        }
    }

    /// Queue the next `process_ticket` response
    pub fn push_process(&self, response: Result<ProcessResult, ApiError>) {
        self.state().process_script.push_back(response);
    }

    /// Make the next `get_ticket` call fail
    pub fn fail_next_get_ticket(&self, err: ApiError) {
        self.state().get_ticket_failures.push_back(err);
    }

    /// Hold every `get_ticket` call until a permit is added to the returned semaphore
    pub fn gate_get_ticket(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self
            .get_ticket_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(gate.clone());
        gate
    }

    /// Hold every `process_ticket` call until a permit is added to the returned semaphore
    pub fn gate_process(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self
            .process_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(gate.clone());
        gate
    }

    pub fn get_ticket_calls(&self) -> usize {
        self.state().get_ticket_calls
    }

    pub fn process_calls(&self) -> usize {
        self.state().process_calls
    }

    pub fn submissions(&self) -> Vec<TicketSubmission> {
        self.state().submissions.clone()
    }

    async fn pass_gate(gate: &Mutex<Option<Arc<Semaphore>>>) {
        let gate = gate.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }
}

/// Build a ticket with placeholder text fields
pub fn ticket(ticket_id: &str, status: TicketStatus) -> Ticket {
    let now = now_iso8601();
    Ticket {
        ticket_id: ticket_id.to_string(),
        title: "VPN drops every hour".to_string(),
        description: "Connection resets at minute 59".to_string(),
        severity: "high".to_string(),
        category: "network".to_string(),
        status,
        created_at: now.clone(),
        updated_at: now,
        resolution: None,
        workflow_log: None,
    }
}

/// Build a process response with the given handoffs and statuses
pub fn process_result(
    ticket_id: &str,
    handoffs: &[&str],
    workflow_status: &str,
    ticket_status: &str,
) -> ProcessResult {
    ProcessResult {
        ticket_id: ticket_id.to_string(),
        status: ticket_status.to_string(),
        workflow_result: Some(WorkflowResult {
            final_response: String::new(),
            handoff_sequence: handoffs.iter().map(|h| h.to_string()).collect(),
            execution_time: None,
            terminated_by: None,
            status: workflow_status.to_string(),
            summary: None,
            conversation_history: Vec::new(),
        }),
    }
}

#[async_trait]
impl TicketService for MockTicketService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_ticket(&self, request: &TicketCreate) -> Result<Ticket, ApiError> {
        let mut state = self.state();
        state.next_id += 1;
        let mut created = ticket(&format!("mock-{}", state.next_id), TicketStatus::Pending);
        created.title = request.title.clone();
        created.description = request.description.clone();
        created.severity = request.severity.clone();
        created.category = request.category.clone();
        state
            .tickets
            .insert(created.ticket_id.clone(), created.clone());
        Ok(created)
    }

    async fn list_tickets(&self) -> Result<Vec<Ticket>, ApiError> {
        let mut tickets: Vec<Ticket> = self.state().tickets.values().cloned().collect();
        tickets.sort_by(|a, b| a.ticket_id.cmp(&b.ticket_id));
        Ok(tickets)
    }

    async fn get_ticket(&self, ticket_id: &str) -> Result<Ticket, ApiError> {
        self.state().get_ticket_calls += 1;
        Self::pass_gate(&self.get_ticket_gate).await;

        let mut state = self.state();
        if let Some(err) = state.get_ticket_failures.pop_front() {
            return Err(err);
        }
        state
            .tickets
            .get(ticket_id)
            .cloned()
            .ok_or_else(|| ApiError::http(404, "Ticket not found"))
    }

    async fn process_ticket(&self, ticket_id: &str) -> Result<ProcessResult, ApiError> {
        self.state().process_calls += 1;
        Self::pass_gate(&self.process_gate).await;

        let mut state = self.state();
        if !state.tickets.contains_key(ticket_id) {
            return Err(ApiError::http(404, "Ticket not found"));
        }
        match state.process_script.pop_front() {
            Some(response) => {
                state.last_process = Some(response.clone());
                response
            }
            None => state
                .last_process
                .clone()
                .unwrap_or_else(|| Err(ApiError::http(404, "workflow not started"))),
        }
    }

    async fn submit_ticket(
        &self,
        submission: TicketSubmission,
    ) -> Result<SubmitResponse, ApiError> {
        let mut state = self.state();
        state.next_id += 1;
        let mut created = ticket(&format!("mock-{}", state.next_id), TicketStatus::Processing);
        created.title = submission.title.clone();
        let files_processed = submission.attachments.len() as u32;
        state.submissions.push(submission);
        state
            .tickets
            .insert(created.ticket_id.clone(), created.clone());

        Ok(SubmitResponse {
            ticket_id: created.ticket_id,
            status: TicketStatus::Processing,
            message: Some("Ticket submitted successfully".to_string()),
            files_processed: Some(files_processed),
        })
    }

    async fn health(&self) -> Result<HealthReport, ApiError> {
        Ok(HealthReport {
            status: "healthy".to_string(),
            services: HashMap::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_process_script_repeats_last() {
        let mock = MockTicketService::with_ticket("t-1", TicketStatus::Processing);
        mock.push_process(Ok(process_result("t-1", &["orchestrator_agent"], "running", "processing")));

        let first = mock.process_ticket("t-1").await.unwrap();
        let second = mock.process_ticket("t-1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mock.process_calls(), 2);
    }

    #[tokio::test]
    async fn test_process_without_script_is_not_ready() {
        let mock = MockTicketService::with_ticket("t-1", TicketStatus::Pending);
        let err = mock.process_ticket("t-1").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_get_ticket_failure_is_one_shot() {
        let mock = MockTicketService::with_ticket("t-1", TicketStatus::Pending);
        mock.fail_next_get_ticket(ApiError::network("refused"));

        assert!(mock.get_ticket("t-1").await.is_err());
        assert_eq!(
            mock.get_ticket("t-1").await.unwrap().status,
            TicketStatus::Pending
        );
        assert_eq!(mock.get_ticket_calls(), 2);
    }

    #[tokio::test]
    async fn test_create_and_list() {
        let mock = MockTicketService::new();
        let created = mock
            .create_ticket(&TicketCreate {
                title: "Printer haunted".to_string(),
                description: "Prints by itself at midnight".to_string(),
                severity: "low".to_string(),
                category: "other".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(created.status, TicketStatus::Pending);
        let tickets = mock.list_tickets().await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].title, "Printer haunted");
    }
}
