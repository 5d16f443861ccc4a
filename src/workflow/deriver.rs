//! Event log derivation from reported handoff sequences.
//!
//! The service reports the agents that have run so far as an ordered list of
//! identifiers. Each poll returns the whole list again, so the ledger keeps the
//! `(identifier, position)` keys it has already turned into log entries and only
//! emits entries for positions it has not seen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

use crate::types::ProcessResult;

/// Actor name used for entries the tracker writes itself
pub const SYSTEM_ACTOR: &str = "System";

/// Message of the first entry of every run
pub const INITIATED_MESSAGE: &str = "Initiating spectral workflow...";

/// One line of the séance log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// `{epoch_millis}-{ordinal}`, unique within a run
    pub id: String,
    /// Identifier exactly as the service reported it
    pub actor_name: String,
    pub message: String,
    /// When this client first observed the step
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// The synthetic entry that opens every run
    pub fn initiated(now: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}-init", now.timestamp_millis()),
            actor_name: SYSTEM_ACTOR.to_string(),
            message: INITIATED_MESSAGE.to_string(),
            timestamp: now,
        }
    }

    fn for_handoff(raw: &str, ordinal: usize, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("{}-{}", now.timestamp_millis(), ordinal),
            actor_name: raw.to_string(),
            message: describe_handoff(raw),
            timestamp: now,
        }
    }
}

/// Known processing agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Orchestrator,
    Memory,
    Ticketing,
    Network,
    Cloud,
    Summarization,
}

impl ActorKind {
    /// Classification order matters: the first matching fragment wins
    const ALL: [ActorKind; 6] = [
        ActorKind::Orchestrator,
        ActorKind::Memory,
        ActorKind::Ticketing,
        ActorKind::Network,
        ActorKind::Cloud,
        ActorKind::Summarization,
    ];

    fn fragment(self) -> &'static str {
        match self {
            ActorKind::Orchestrator => "orchestrator",
            ActorKind::Memory => "memory",
            ActorKind::Ticketing => "ticketing",
            ActorKind::Network => "network",
            ActorKind::Cloud => "cloud",
            ActorKind::Summarization => "summarization",
        }
    }

    /// Classify a normalized actor name
    pub fn classify(normalized: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| normalized.contains(kind.fragment()))
    }

    pub fn message(self) -> &'static str {
        match self {
            ActorKind::Orchestrator => "Routing ticket through the spectral workflow...",
            ActorKind::Memory => "Searching the ancient scrolls for past resolutions...",
            ActorKind::Ticketing => "Processing ticket and updating status...",
            ActorKind::Network => "Performing network diagnostics and analysis...",
            ActorKind::Cloud => "Investigating cloud services and AWS resources...",
            ActorKind::Summarization => "Creating concise summary of the resolution...",
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fragment())
    }
}

/// Lower-case, then drop a trailing `_agent`, then a trailing whitespace-separated `agent`.
///
/// `"Network_Diagnostic_Agent"` becomes `"network_diagnostic"`,
/// `"Orchestrator Agent"` becomes `"orchestrator"`.
pub fn normalize_actor(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let name = lower.strip_suffix("_agent").unwrap_or(&lower);

    if let Some(head) = name.strip_suffix("agent") {
        let trimmed = head.trim_end();
        if trimmed.len() < head.len() {
            return trimmed.to_string();
        }
    }

    name.to_string()
}

/// Log message for a raw handoff identifier
pub fn describe_handoff(raw: &str) -> String {
    match ActorKind::classify(&normalize_actor(raw)) {
        Some(kind) => kind.message().to_string(),
        None => format!("Agent {} is now active...", raw),
    }
}

/// Whether a newly reported sequence extends the previous one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceIntegrity {
    /// Same or longer, with the earlier positions unchanged
    Intact,
    /// Fewer entries than last time
    Shrunk { previous: usize, current: usize },
    /// A position already seen now holds a different identifier
    Rewritten { index: usize },
}

impl SequenceIntegrity {
    pub fn is_intact(&self) -> bool {
        matches!(self, SequenceIntegrity::Intact)
    }
}

impl fmt::Display for SequenceIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceIntegrity::Intact => write!(f, "intact"),
            SequenceIntegrity::Shrunk { previous, current } => write!(
                f,
                "handoff sequence shrank from {} to {} entries",
                previous, current
            ),
            SequenceIntegrity::Rewritten { index } => {
                write!(f, "handoff sequence rewritten at position {}", index)
            }
        }
    }
}

/// What one process response means for the log
#[derive(Debug, Clone, PartialEq)]
pub struct Derivation {
    /// Entries for handoffs not seen before, in sequence order
    pub entries: Vec<LogEntry>,
    /// Normalized name of the last handoff, `None` once terminal
    pub active_actor: Option<String>,
    pub terminal: bool,
    pub integrity: SequenceIntegrity,
}

/// Per-run dedup set plus the last sequence observed
#[derive(Debug, Default, Clone)]
pub struct HandoffLedger {
    seen: HashSet<(String, usize)>,
    observed: Vec<String>,
}

impl HandoffLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.observed.clear();
    }

    /// Number of distinct handoff keys recorded
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn contains(&self, actor: &str, index: usize) -> bool {
        self.seen.contains(&(actor.to_string(), index))
    }

    fn check_integrity(&self, sequence: &[String]) -> SequenceIntegrity {
        if sequence.len() < self.observed.len() {
            return SequenceIntegrity::Shrunk {
                previous: self.observed.len(),
                current: sequence.len(),
            };
        }
        match self
            .observed
            .iter()
            .zip(sequence)
            .position(|(before, now)| before != now)
        {
            Some(index) => SequenceIntegrity::Rewritten { index },
            None => SequenceIntegrity::Intact,
        }
    }

    /// Derive new log entries from a process response.
    ///
    /// `next_ordinal` is the log length before the new entries; each entry's id
    /// embeds its own position so ids stay unique within the run.
    pub fn derive(
        &mut self,
        result: &ProcessResult,
        next_ordinal: usize,
        now: DateTime<Utc>,
    ) -> Derivation {
        let sequence = result.handoff_sequence();

        let integrity = self.check_integrity(sequence);
        if !integrity.is_intact() {
            warn!(
                ticket_id = %result.ticket_id,
                "Handoff sequence contract violation: {}",
                integrity
            );
        }

        let mut entries = Vec::new();
        for (index, raw) in sequence.iter().enumerate() {
            if self.seen.insert((raw.clone(), index)) {
                entries.push(LogEntry::for_handoff(
                    raw,
                    next_ordinal + entries.len(),
                    now,
                ));
            }
        }
        self.observed = sequence.to_vec();

        let terminal = result.is_terminal();
        let active_actor = if terminal {
            None
        } else {
            sequence.last().map(|raw| normalize_actor(raw))
        };

        Derivation {
            entries,
            active_actor,
            terminal,
            integrity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::process_result;

    fn derive(ledger: &mut HandoffLedger, handoffs: &[&str], workflow: &str) -> Derivation {
        let result = process_result("t-1", handoffs, workflow, "processing");
        ledger.derive(&result, 1, Utc::now())
    }

    #[test]
    fn test_normalize_actor() {
        assert_eq!(normalize_actor("orchestrator_agent"), "orchestrator");
        assert_eq!(normalize_actor("Network_Diagnostic_Agent"), "network_diagnostic");
        assert_eq!(normalize_actor("Orchestrator Agent"), "orchestrator");
        assert_eq!(normalize_actor("cloud_service_agent"), "cloud_service");
        assert_eq!(normalize_actor("memory"), "memory");
        // "agent" glued to the name is not a suffix
        assert_eq!(normalize_actor("secretagent"), "secretagent");
        // only one suffix is stripped
        assert_eq!(normalize_actor("agent_agent"), "agent");
    }

    #[test]
    fn test_classify_all_known_actors() {
        assert_eq!(ActorKind::classify("orchestrator"), Some(ActorKind::Orchestrator));
        assert_eq!(ActorKind::classify("memory"), Some(ActorKind::Memory));
        assert_eq!(ActorKind::classify("ticketing"), Some(ActorKind::Ticketing));
        assert_eq!(ActorKind::classify("network_diagnostic"), Some(ActorKind::Network));
        assert_eq!(ActorKind::classify("cloud_service"), Some(ActorKind::Cloud));
        assert_eq!(ActorKind::classify("summarization"), Some(ActorKind::Summarization));
        assert_eq!(ActorKind::classify("billing"), None);
    }

    #[test]
    fn test_classify_first_match_wins() {
        assert_eq!(
            ActorKind::classify("memory_network_bridge"),
            Some(ActorKind::Memory)
        );
    }

    #[test]
    fn test_describe_unknown_actor_uses_raw_name() {
        assert_eq!(
            describe_handoff("Billing_Agent"),
            "Agent Billing_Agent is now active..."
        );
        assert_eq!(
            describe_handoff("ticketing_agent"),
            "Processing ticket and updating status..."
        );
    }

    #[test]
    fn test_single_handoff_non_terminal() {
        let mut ledger = HandoffLedger::new();
        let d = derive(&mut ledger, &["orchestrator_agent"], "running");

        assert_eq!(d.entries.len(), 1);
        assert_eq!(d.entries[0].actor_name, "orchestrator_agent");
        assert_eq!(d.active_actor.as_deref(), Some("orchestrator"));
        assert!(!d.terminal);
        assert!(d.integrity.is_intact());
    }

    #[test]
    fn test_repeat_sequence_is_idempotent() {
        let mut ledger = HandoffLedger::new();
        let handoffs = ["orchestrator_agent", "memory_agent", "ticketing_agent"];

        let first = derive(&mut ledger, &handoffs, "running");
        assert_eq!(first.entries.len(), 3);

        for _ in 0..5 {
            let again = derive(&mut ledger, &handoffs, "running");
            assert!(again.entries.is_empty());
            assert_eq!(again.active_actor.as_deref(), Some("ticketing"));
        }
        assert_eq!(ledger.len(), 3);
    }

    #[test]
    fn test_growing_sequence_emits_only_new_positions() {
        let mut ledger = HandoffLedger::new();
        derive(&mut ledger, &["orchestrator_agent"], "running");
        let d = derive(
            &mut ledger,
            &["orchestrator_agent", "network_diagnostic_agent"],
            "running",
        );

        assert_eq!(d.entries.len(), 1);
        assert_eq!(d.entries[0].actor_name, "network_diagnostic_agent");
        assert_eq!(d.active_actor.as_deref(), Some("network_diagnostic"));
    }

    #[test]
    fn test_same_actor_at_two_positions_logs_twice() {
        let mut ledger = HandoffLedger::new();
        let d = derive(
            &mut ledger,
            &["orchestrator_agent", "memory_agent", "orchestrator_agent"],
            "running",
        );
        assert_eq!(d.entries.len(), 3);
        assert!(ledger.contains("orchestrator_agent", 0));
        assert!(ledger.contains("orchestrator_agent", 2));
    }

    #[test]
    fn test_terminal_clears_active_actor() {
        let mut ledger = HandoffLedger::new();
        let d = derive(&mut ledger, &["orchestrator_agent", "ticketing_agent"], "success");

        assert_eq!(d.entries.len(), 2);
        assert!(d.terminal);
        assert!(d.active_actor.is_none());
    }

    #[test]
    fn test_terminal_via_ticket_status() {
        let mut ledger = HandoffLedger::new();
        let result = process_result("t-1", &["summarization_agent"], "completed", "resolved");
        let d = ledger.derive(&result, 1, Utc::now());
        assert!(d.terminal);
        assert!(d.active_actor.is_none());
    }

    #[test]
    fn test_empty_sequence_non_terminal() {
        let mut ledger = HandoffLedger::new();
        let d = derive(&mut ledger, &[], "running");
        assert!(d.entries.is_empty());
        assert!(d.active_actor.is_none());
        assert!(!d.terminal);
        assert!(d.integrity.is_intact());
    }

    #[test]
    fn test_entry_ids_unique_and_ordered() {
        let mut ledger = HandoffLedger::new();
        let now = Utc::now();
        let result = process_result("t-1", &["orchestrator_agent", "memory_agent"], "running", "processing");
        let d = ledger.derive(&result, 4, now);

        assert_eq!(d.entries[0].id, format!("{}-4", now.timestamp_millis()));
        assert_eq!(d.entries[1].id, format!("{}-5", now.timestamp_millis()));
        assert!(d.entries.iter().all(|e| e.timestamp == now));
    }

    #[test]
    fn test_shrunk_sequence_is_inert() {
        let mut ledger = HandoffLedger::new();
        derive(&mut ledger, &["orchestrator_agent", "memory_agent"], "running");
        let d = derive(&mut ledger, &["orchestrator_agent"], "running");

        assert!(d.entries.is_empty());
        assert_eq!(
            d.integrity,
            SequenceIntegrity::Shrunk {
                previous: 2,
                current: 1
            }
        );
        // stale keys stay recorded
        assert!(ledger.contains("memory_agent", 1));
    }

    #[test]
    fn test_rewritten_position_detected() {
        let mut ledger = HandoffLedger::new();
        derive(&mut ledger, &["orchestrator_agent", "memory_agent"], "running");
        let d = derive(&mut ledger, &["orchestrator_agent", "cloud_service_agent"], "running");

        assert_eq!(d.integrity, SequenceIntegrity::Rewritten { index: 1 });
        assert_eq!(d.entries.len(), 1);
    }

    #[test]
    fn test_clear_resets_ledger() {
        let mut ledger = HandoffLedger::new();
        derive(&mut ledger, &["orchestrator_agent"], "running");
        ledger.clear();
        assert!(ledger.is_empty());

        let d = derive(&mut ledger, &["orchestrator_agent"], "running");
        assert_eq!(d.entries.len(), 1);
        assert!(d.integrity.is_intact());
    }

    #[test]
    fn test_initiated_entry() {
        let now = Utc::now();
        let entry = LogEntry::initiated(now);
        assert_eq!(entry.actor_name, SYSTEM_ACTOR);
        assert!(entry.id.ends_with("-init"));
    }
}
