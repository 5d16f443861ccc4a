//! Workflow tracking: turns a remote ticket's agent handoffs into a live log.

pub mod controller;
pub mod deriver;
pub mod state;

pub use controller::{
    CompletionCallback, ErrorCallback, TickOutcome, WorkflowController,
    WorkflowControllerBuilder, WorkflowError, WorkflowOptions, DEFAULT_POLL_INTERVAL,
    MIN_POLL_INTERVAL,
};
pub use deriver::{
    describe_handoff, normalize_actor, ActorKind, Derivation, HandoffLedger, LogEntry,
    SequenceIntegrity, INITIATED_MESSAGE, SYSTEM_ACTOR,
};
pub use state::{Phase, WorkflowSnapshot};
