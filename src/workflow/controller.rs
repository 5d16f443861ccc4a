//! Workflow Controller - drives one ticket through remote processing.
//!
//! - `start` triggers processing and, unless the first answer is terminal,
//!   schedules a poll task on a cancellable interval
//! - each tick checks the ticket status and, once the swarm has picked it up,
//!   re-reads the workflow progress
//! - `stop` cancels the poll task; a tick already in flight finishes but its
//!   result is dropped
//!
//! Exactly one of the completion or error callbacks fires per run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::state::{Phase, WorkflowSnapshot, WorkflowState};
use crate::api::{ApiError, TicketService};
use crate::config::WorkflowConfig;
use crate::types::{ProcessResult, TicketStatus};

/// Default interval between poll ticks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Shortest interval the poll task will run at
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Fallback message when the service flags a ticket as failed without saying why
const REMOTE_FAILURE_MESSAGE: &str = "The spirits abandoned this ticket... workflow failed";

pub type CompletionCallback = Arc<dyn Fn(&ProcessResult) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Errors returned directly by the controller's API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("ticket id must not be empty")]
    EmptyTicketId,
}

/// Tuning for a controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowOptions {
    pub poll_interval: Duration,
    /// Treat a shrinking or rewritten handoff sequence as a hard error
    pub strict_sequence: bool,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            strict_sequence: false,
        }
    }
}

impl From<&WorkflowConfig> for WorkflowOptions {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms).max(MIN_POLL_INTERVAL),
            strict_sequence: config.strict_sequence,
        }
    }
}

/// What a single poll tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Previous tick still in flight; no remote call made
    Skipped,
    /// No run is polling
    Inactive,
    /// Ticket not picked up yet
    Pending,
    /// Ticket picked up but the workflow had nothing to report yet
    NotReady,
    /// Workflow progressed; `new_entries` log lines were appended
    Progressed { new_entries: usize },
    Completed,
    Failed,
    /// Result arrived after the run was stopped or restarted
    Discarded,
    /// Ticket status the tracker does not understand
    Ignored,
}

impl TickOutcome {
    /// Whether the poll task should keep running after this tick
    pub fn continues(&self) -> bool {
        !matches!(
            self,
            TickOutcome::Completed | TickOutcome::Failed | TickOutcome::Discarded
        )
    }
}

enum Applied {
    Progressed(usize),
    Completed(ProcessResult),
    Failed(String),
}

struct Shared {
    service: Arc<dyn TicketService>,
    options: WorkflowOptions,
    state: Mutex<WorkflowState>,
    in_flight: AtomicBool,
    snapshot_tx: watch::Sender<WorkflowSnapshot>,
    on_complete: Option<CompletionCallback>,
    on_error: Option<ErrorCallback>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        // Last handle gone: release the poll task
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_poller();
    }
}

/// Resets the in-flight flag however the tick ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Tracks a ticket's remote workflow and keeps a séance log of its handoffs
#[derive(Clone)]
pub struct WorkflowController {
    shared: Arc<Shared>,
}

/// Assembles a controller with its callbacks
pub struct WorkflowControllerBuilder {
    service: Arc<dyn TicketService>,
    options: WorkflowOptions,
    on_complete: Option<CompletionCallback>,
    on_error: Option<ErrorCallback>,
}

impl WorkflowControllerBuilder {
    pub fn options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }

    /// Zero is raised to `MIN_POLL_INTERVAL`
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Called once with the terminal result when a run completes
    pub fn on_complete(mut self, callback: impl Fn(&ProcessResult) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    /// Called once with a user-facing message when a run fails
    pub fn on_error(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> WorkflowController {
        let (snapshot_tx, _) = watch::channel(WorkflowSnapshot::default());
        WorkflowController {
            shared: Arc::new(Shared {
                service: self.service,
                options: self.options,
                state: Mutex::new(WorkflowState::default()),
                in_flight: AtomicBool::new(false),
                snapshot_tx,
                on_complete: self.on_complete,
                on_error: self.on_error,
            }),
        }
    }
}

impl WorkflowController {
    /// Controller without callbacks
    pub fn new(service: Arc<dyn TicketService>, options: WorkflowOptions) -> Self {
        Self::builder(service).options(options).build()
    }

    pub fn builder(service: Arc<dyn TicketService>) -> WorkflowControllerBuilder {
        WorkflowControllerBuilder {
            service,
            options: WorkflowOptions::default(),
            on_complete: None,
            on_error: None,
        }
    }

    pub fn options(&self) -> &WorkflowOptions {
        &self.shared.options
    }

    fn state(&self) -> MutexGuard<'_, WorkflowState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &WorkflowState) {
        self.shared.snapshot_tx.send_replace(state.snapshot());
    }

    pub fn snapshot(&self) -> WorkflowSnapshot {
        self.state().snapshot()
    }

    /// Receiver that always holds the latest snapshot
    pub fn subscribe(&self) -> watch::Receiver<WorkflowSnapshot> {
        self.shared.snapshot_tx.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    /// Whether a poll task is currently scheduled
    pub fn is_polling_scheduled(&self) -> bool {
        self.state()
            .poller
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    /// Begin tracking `ticket_id`, discarding any previous run.
    ///
    /// Remote failures do not surface here; they move the run to `Phase::Error`
    /// and fire the error callback.
    pub async fn start(&self, ticket_id: &str) -> Result<(), WorkflowError> {
        let ticket_id = ticket_id.trim();
        if ticket_id.is_empty() {
            return Err(WorkflowError::EmptyTicketId);
        }

        let (generation, run_id) = {
            let mut state = self.state();
            let generation = state.begin(ticket_id);
            self.publish(&state);
            (generation, state.run_id.unwrap_or_default())
        };

        let span = info_span!("workflow", %run_id, ticket_id);
        async {
            info!("Starting workflow via {}", self.shared.service.name());
            let response = self.shared.service.process_ticket(ticket_id).await;
            self.finish_start(generation, response);
        }
        .instrument(span)
        .await;

        Ok(())
    }

    fn finish_start(&self, generation: u64, response: Result<ProcessResult, ApiError>) {
        let applied = {
            let mut state = self.state();
            if !state.is_current(generation) {
                debug!("Start superseded before the service answered; dropping result");
                return;
            }

            let applied = match response {
                Ok(result) => self.apply_result(&mut state, result),
                Err(e) => {
                    error!("Failed to start workflow: {}", e);
                    let message = e.user_message().to_string();
                    state.fail(&message);
                    Applied::Failed(message)
                }
            };

            if let Applied::Progressed(_) = applied {
                state.phase = Phase::Polling;
                state.poller = Some(self.spawn_poller());
                info!(
                    "Workflow in progress, polling every {:?}",
                    self.shared.options.poll_interval
                );
            }
            self.publish(&state);
            applied
        };

        self.notify(applied);
    }

    /// Halt polling. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        let mut state = self.state();
        let was_live = state.phase.is_live();
        state.halt();
        self.publish(&state);
        if was_live {
            info!(ticket_id = ?state.ticket_id, "Workflow polling stopped");
        }
    }

    /// One poll tick; the scheduled task calls this, and so may anyone else.
    ///
    /// A tick that finds another tick in flight returns `Skipped` without
    /// touching the service.
    pub async fn poll_tick(&self) -> TickOutcome {
        if self.shared.in_flight.swap(true, Ordering::AcqRel) {
            debug!("Previous tick still in flight, skipping");
            return TickOutcome::Skipped;
        }
        let _guard = InFlightGuard(&self.shared.in_flight);

        let (generation, ticket_id, run_id) = {
            let state = self.state();
            match (&state.phase, &state.ticket_id) {
                (Phase::Polling, Some(id)) => {
                    (state.generation, id.clone(), state.run_id.unwrap_or_default())
                }
                _ => return TickOutcome::Inactive,
            }
        };

        let span = info_span!("tick", %run_id, ticket_id = %ticket_id);
        self.run_tick(generation, &ticket_id).instrument(span).await
    }

    async fn run_tick(&self, generation: u64, ticket_id: &str) -> TickOutcome {
        let ticket = match self.shared.service.get_ticket(ticket_id).await {
            Ok(ticket) => ticket,
            Err(e) => {
                error!("Failed to fetch ticket status: {}", e);
                return self.fail_if_current(generation, e.user_message());
            }
        };

        match ticket.status {
            TicketStatus::Pending => {
                let mut state = self.state();
                if !state.is_current(generation) {
                    return TickOutcome::Discarded;
                }
                state.mark_pending();
                self.publish(&state);
                debug!("Ticket still pending");
                TickOutcome::Pending
            }
            TicketStatus::Processing | TicketStatus::Resolved => {
                match self.shared.service.process_ticket(ticket_id).await {
                    Ok(result) => self.apply_if_current(generation, result),
                    Err(e) if e.is_transient() => {
                        debug!("Workflow not ready yet, continuing to poll: {}", e);
                        TickOutcome::NotReady
                    }
                    Err(e) => {
                        error!("Failed to read workflow progress: {}", e);
                        self.fail_if_current(generation, e.user_message())
                    }
                }
            }
            TicketStatus::Error => {
                let message = ticket
                    .resolution
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| REMOTE_FAILURE_MESSAGE.to_string());
                error!("Service reports the workflow failed: {}", message);
                self.fail_if_current(generation, &message)
            }
            TicketStatus::Unknown => {
                warn!("Unrecognized ticket status, ignoring tick");
                TickOutcome::Ignored
            }
        }
    }

    fn apply_if_current(&self, generation: u64, result: ProcessResult) -> TickOutcome {
        let applied = {
            let mut state = self.state();
            if !state.is_current(generation) {
                debug!("Run stopped while tick was in flight; dropping result");
                return TickOutcome::Discarded;
            }
            let applied = self.apply_result(&mut state, result);
            self.publish(&state);
            applied
        };

        let outcome = match &applied {
            Applied::Progressed(n) => TickOutcome::Progressed { new_entries: *n },
            Applied::Completed(_) => TickOutcome::Completed,
            Applied::Failed(_) => TickOutcome::Failed,
        };
        self.notify(applied);
        outcome
    }

    fn fail_if_current(&self, generation: u64, message: &str) -> TickOutcome {
        {
            let mut state = self.state();
            if !state.is_current(generation) {
                return TickOutcome::Discarded;
            }
            state.fail(message);
            self.publish(&state);
        }
        self.notify(Applied::Failed(message.to_string()));
        TickOutcome::Failed
    }

    /// Fold a process response into the state. Caller holds the lock and has
    /// checked the generation.
    fn apply_result(&self, state: &mut WorkflowState, result: ProcessResult) -> Applied {
        let observed = result.clone();
        let derivation = state.apply(result);

        if !derivation.integrity.is_intact() && self.shared.options.strict_sequence {
            let message = format!("Remote contract violated: {}", derivation.integrity);
            error!("{}", message);
            state.fail(&message);
            return Applied::Failed(message);
        }

        for entry in &derivation.entries {
            info!(actor = %entry.actor_name, "{}", entry.message);
        }

        if derivation.terminal {
            info!("Workflow complete");
            Applied::Completed(observed)
        } else {
            Applied::Progressed(derivation.entries.len())
        }
    }

    /// Fire the terminal callback, outside the state lock
    fn notify(&self, applied: Applied) {
        match applied {
            Applied::Completed(result) => {
                if let Some(callback) = &self.shared.on_complete {
                    callback(&result);
                }
            }
            Applied::Failed(message) => {
                if let Some(callback) = &self.shared.on_error {
                    callback(&message);
                }
            }
            Applied::Progressed(_) => {}
        }
    }

    /// Spawn the repeating poll task. The first tick fires one interval from now.
    fn spawn_poller(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        // interval_at panics on a zero period; options may be built by hand
        let period = self.shared.options.poll_interval.max(MIN_POLL_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(shared) = weak.upgrade() else { break };
                        let controller = WorkflowController { shared };
                        if !controller.poll_tick().await.continues() {
                            break;
                        }
                    }
                }
            }
            debug!("Poll task finished");
        });

        token
    }

    /// Wait until the current run leaves its live phases
    pub async fn wait_for_outcome(&self) -> Phase {
        let mut rx = self.subscribe();
        let phase = match rx.wait_for(|snapshot| !snapshot.phase.is_live()).await {
            Ok(snapshot) => snapshot.phase,
            Err(_) => self.phase(),
        };
        phase
    }
}
