//! Wire types for the helpdesk ticket service.

pub mod ticket;

pub use ticket::{
    content_type_for, Attachment, ConversationMessage, HealthReport, ProcessResult,
    SubmitResponse, Ticket, TicketCreate, TicketStatus, TicketSubmission, WorkflowResult,
    WORKFLOW_STATUS_SUCCESS,
};
