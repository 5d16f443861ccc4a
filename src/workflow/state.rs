//! Workflow run state and its observable snapshot

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::deriver::{Derivation, HandoffLedger, LogEntry};
use crate::types::ProcessResult;

/// Lifecycle phase of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    /// Initial process request in flight
    Initiating,
    /// Poll task scheduled
    Polling,
    Complete,
    Error,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }

    /// A run is live while it may still mutate the log
    pub fn is_live(self) -> bool {
        matches!(self, Phase::Initiating | Phase::Polling)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Initiating => write!(f, "initiating"),
            Phase::Polling => write!(f, "polling"),
            Phase::Complete => write!(f, "complete"),
            Phase::Error => write!(f, "error"),
        }
    }
}

/// Read-only view handed to observers
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct WorkflowSnapshot {
    pub phase: Phase,
    pub ticket_id: Option<String>,
    pub run_id: Option<Uuid>,
    pub is_processing: bool,
    pub active_agent: Option<String>,
    pub logs: Vec<LogEntry>,
    pub error: Option<String>,
    pub result: Option<ProcessResult>,
}

/// Mutable run state, owned by the controller
#[derive(Debug, Default)]
pub(crate) struct WorkflowState {
    pub phase: Phase,
    pub ticket_id: Option<String>,
    pub run_id: Option<Uuid>,
    /// Bumped on every start and stop; results from older generations are dropped
    pub generation: u64,
    pub is_processing: bool,
    pub active_actor: Option<String>,
    pub log: Vec<LogEntry>,
    pub ledger: HandoffLedger,
    pub last_error: Option<String>,
    pub result: Option<ProcessResult>,
    pub poller: Option<CancellationToken>,
}

impl WorkflowState {
    /// Begin a new run for `ticket_id`, discarding everything from the previous one
    pub fn begin(&mut self, ticket_id: &str) -> u64 {
        self.cancel_poller();
        self.generation += 1;
        self.phase = Phase::Initiating;
        self.ticket_id = Some(ticket_id.to_string());
        self.run_id = Some(Uuid::new_v4());
        self.is_processing = true;
        self.active_actor = None;
        self.log.clear();
        self.ledger.clear();
        self.last_error = None;
        self.result = None;
        self.log.push(LogEntry::initiated(Utc::now()));
        self.generation
    }

    /// Whether a result captured at `generation` may still be applied
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.phase.is_live()
    }

    /// Run a process response through the ledger and fold it into the state
    pub fn apply(&mut self, result: ProcessResult) -> Derivation {
        let derivation = self.ledger.derive(&result, self.log.len(), Utc::now());
        self.log.extend(derivation.entries.iter().cloned());
        self.last_error = None;
        self.result = Some(result);

        if derivation.terminal {
            self.phase = Phase::Complete;
            self.is_processing = false;
            self.active_actor = None;
            self.cancel_poller();
        } else {
            self.is_processing = true;
            self.active_actor = derivation.active_actor.clone();
        }
        derivation
    }

    /// Remote ticket not picked up yet
    pub fn mark_pending(&mut self) {
        self.is_processing = false;
        self.active_actor = None;
        self.last_error = None;
    }

    pub fn fail(&mut self, message: &str) {
        self.phase = Phase::Error;
        self.is_processing = false;
        self.active_actor = None;
        self.last_error = Some(message.to_string());
        self.cancel_poller();
    }

    /// Halt the run; the log survives for inspection
    pub fn halt(&mut self) {
        self.cancel_poller();
        self.generation += 1;
        self.phase = Phase::Idle;
        self.is_processing = false;
        self.active_actor = None;
    }

    /// Idempotent: cancelling an absent or already-cancelled poller is a no-op
    pub fn cancel_poller(&mut self) {
        if let Some(token) = self.poller.take() {
            token.cancel();
        }
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            phase: self.phase,
            ticket_id: self.ticket_id.clone(),
            run_id: self.run_id,
            is_processing: self.is_processing,
            active_agent: if self.phase == Phase::Polling {
                self.active_actor.clone()
            } else {
                None
            },
            logs: self.log.clone(),
            error: self.last_error.clone(),
            result: self.result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::process_result;

    #[test]
    fn test_begin_resets_run() {
        let mut state = WorkflowState::default();
        let first = state.begin("t-1");
        state.apply(process_result("t-1", &["orchestrator_agent"], "running", "processing"));
        state.fail("boom");

        let second = state.begin("t-2");
        assert!(second > first);
        assert_eq!(state.phase, Phase::Initiating);
        assert_eq!(state.ticket_id.as_deref(), Some("t-2"));
        assert_eq!(state.log.len(), 1);
        assert!(state.ledger.is_empty());
        assert!(state.last_error.is_none());
        assert!(state.result.is_none());
    }

    #[test]
    fn test_is_current_tracks_generation_and_phase() {
        let mut state = WorkflowState::default();
        let generation = state.begin("t-1");
        assert!(state.is_current(generation));

        state.halt();
        assert!(!state.is_current(generation));
        assert!(!state.is_current(state.generation));
    }

    #[test]
    fn test_apply_terminal_completes() {
        let mut state = WorkflowState::default();
        state.begin("t-1");
        state.poller = Some(CancellationToken::new());
        let token = state.poller.clone().unwrap();

        let d = state.apply(process_result("t-1", &["ticketing_agent"], "success", "processing"));
        assert!(d.terminal);
        assert_eq!(state.phase, Phase::Complete);
        assert!(!state.is_processing);
        assert!(token.is_cancelled());
        assert!(state.poller.is_none());
    }

    #[test]
    fn test_snapshot_hides_active_agent_outside_polling() {
        let mut state = WorkflowState::default();
        state.begin("t-1");
        state.apply(process_result("t-1", &["memory_agent"], "running", "processing"));
        // still initiating: the controller moves to polling after scheduling
        assert!(state.snapshot().active_agent.is_none());

        state.phase = Phase::Polling;
        assert_eq!(state.snapshot().active_agent.as_deref(), Some("memory"));
    }

    #[test]
    fn test_halt_keeps_log() {
        let mut state = WorkflowState::default();
        state.begin("t-1");
        state.apply(process_result("t-1", &["memory_agent"], "running", "processing"));
        state.halt();
        state.halt();

        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.log.len(), 2);
        assert!(state.active_actor.is_none());
    }
}
