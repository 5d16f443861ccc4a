//! Client side of the helpdesk ticket service
//!
//! This module provides:
//! - The `TicketService` trait the workflow tracker talks to
//! - `HttpTicketService`, the reqwest implementation
//! - `MockTicketService`, a scripted in-memory implementation for tests
//! - Error handling with user-facing message mapping

pub mod error;
pub mod http;
pub mod mock;

pub use error::ApiError;
pub use http::HttpTicketService;
pub use mock::MockTicketService;

use async_trait::async_trait;

use crate::types::{
    HealthReport, ProcessResult, SubmitResponse, Ticket, TicketCreate, TicketSubmission,
};

/// Operations exposed by the remote ticket service
#[async_trait]
pub trait TicketService: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &str;

    /// Create a ticket from plain fields
    async fn create_ticket(&self, request: &TicketCreate) -> Result<Ticket, ApiError>;

    /// List all tickets
    async fn list_tickets(&self) -> Result<Vec<Ticket>, ApiError>;

    /// Fetch one ticket, mainly to read its status
    async fn get_ticket(&self, ticket_id: &str) -> Result<Ticket, ApiError>;

    /// Run (or re-observe) the agent workflow for a ticket
    ///
    /// Repeated calls return the workflow's progress so far; the handoff
    /// sequence only ever grows.
    async fn process_ticket(&self, ticket_id: &str) -> Result<ProcessResult, ApiError>;

    /// Submit a ticket with attachments; the service starts the workflow itself
    async fn submit_ticket(&self, submission: TicketSubmission)
        -> Result<SubmitResponse, ApiError>;

    /// Service health
    async fn health(&self) -> Result<HealthReport, ApiError>;
}
