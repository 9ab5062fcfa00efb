use crate::core::error::{Result, WorkflowError};
use crate::core::model::{PollState, ResultPatch, WorkflowResult};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Story,
    Image,
    Pdf,
    Flipbook,
    Describe,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Story,
        Stage::Image,
        Stage::Pdf,
        Stage::Flipbook,
        Stage::Describe,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Story => "story",
            Stage::Image => "image",
            Stage::Pdf => "pdf",
            Stage::Flipbook => "flipbook",
            Stage::Describe => "describe",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    #[default]
    Idle,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    pub status: StageStatus,
    pub error: Option<String>,
    /// Sequence number of the latest `begin` for this stage.
    pub seq: u64,
}

static IDLE_STAGE: StageState = StageState {
    status: StageStatus::Idle,
    error: None,
    seq: 0,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub prompt: String,
    pub title: String,
    pub story: String,
    pub summary: String,
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    Begin,
    /// Partial result of a stage that is still running.
    Progress { seq: u64, patch: ResultPatch },
    Succeed { seq: u64, patch: ResultPatch },
    Fail { seq: u64, message: String },
    /// The request was cancelled; the stage returns to idle without an error.
    Abandon { seq: u64 },
}

/// Everything the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub stages: BTreeMap<Stage, StageState>,
    pub result: WorkflowResult,
    pub history: Vec<HistoryEntry>,
    pub manual_retries: u32,
    /// Progress of the current flipbook job, if one was submitted.
    pub poll: Option<PollState>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            stages: Stage::ALL.iter().map(|s| (*s, StageState::default())).collect(),
            result: WorkflowResult::default(),
            history: Vec::new(),
            manual_retries: 0,
            poll: None,
        }
    }
}

impl WorkflowState {
    pub fn stage(&self, stage: Stage) -> &StageState {
        self.stages.get(&stage).unwrap_or(&IDLE_STAGE)
    }

    fn stage_mut(&mut self, stage: Stage) -> &mut StageState {
        self.stages.entry(stage).or_default()
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.stage(stage).status
    }

    pub fn is_in_flight(&self, stage: Stage) -> bool {
        self.status(stage) == StageStatus::InFlight
    }

    pub fn error(&self, stage: Stage) -> Option<&str> {
        self.stage(stage).error.as_deref()
    }

    /// Single transition function for every stage.
    ///
    /// Returns `false` when the event was discarded because it belongs to a
    /// superseded request.
    pub fn apply(&mut self, stage: Stage, event: StageEvent) -> bool {
        let current = self.stage(stage).seq;
        match event {
            StageEvent::Begin => {
                let entry = self.stage_mut(stage);
                entry.seq = current + 1;
                entry.status = StageStatus::InFlight;
                entry.error = None;
                true
            }
            StageEvent::Progress { seq, patch } => {
                if seq != current || !self.is_in_flight(stage) {
                    return false;
                }
                self.result.merge(patch);
                true
            }
            StageEvent::Succeed { seq, patch } => {
                if seq != current {
                    return false;
                }
                self.result.merge(patch);
                let entry = self.stage_mut(stage);
                entry.status = StageStatus::Succeeded;
                entry.error = None;
                true
            }
            StageEvent::Fail { seq, message } => {
                if seq != current {
                    return false;
                }
                let entry = self.stage_mut(stage);
                entry.status = StageStatus::Failed;
                entry.error = Some(message);
                true
            }
            StageEvent::Abandon { seq } => {
                if seq != current || !self.is_in_flight(stage) {
                    return false;
                }
                self.stage_mut(stage).status = StageStatus::Idle;
                true
            }
        }
    }

    /// Clears results, history and flags. Sequence numbers advance so that
    /// requests issued before the reset can no longer land.
    pub fn reset(&mut self) {
        let seqs: Vec<(Stage, u64)> = self.stages.iter().map(|(s, st)| (*s, st.seq)).collect();
        *self = WorkflowState::default();
        for (stage, seq) in seqs {
            self.stage_mut(stage).seq = seq + 1;
        }
    }
}

/// Proof of a `begin`; completing a stage requires the ticket it was started with.
#[derive(Debug, Clone)]
pub struct StageTicket {
    pub stage: Stage,
    pub seq: u64,
    pub cancel: CancellationToken,
    /// Request this one continues, as `(stage, seq)`.
    pub parent: Option<(Stage, u64)>,
}

impl StageTicket {
    /// Whether this ticket is still the latest request of its stage and of
    /// the request it continues.
    pub fn is_current(&self, state: &WorkflowState) -> bool {
        state.stage(self.stage).seq == self.seq && self.parent_is_current(state)
    }

    fn parent_is_current(&self, state: &WorkflowState) -> bool {
        match self.parent {
            Some((stage, seq)) => state.stage(stage).seq == seq,
            None => true,
        }
    }
}

/// Single source of truth for one session.
///
/// State changes are published through a `watch` channel; the presentation
/// layer holds a receiver from [`WorkflowStore::subscribe`].
pub struct WorkflowStore {
    state: watch::Sender<WorkflowState>,
    /// Token of the latest request per stage, finished or not. Superseding a
    /// finished request still cancels the work that continues it.
    latest: Mutex<HashMap<Stage, (u64, CancellationToken)>>,
}

impl Default for WorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(WorkflowState::default());
        Self {
            state,
            latest: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> WorkflowState {
        self.state.borrow().clone()
    }

    /// Marks `stage` in flight and clears its previous error. A request already
    /// in flight for the same stage is cancelled and its result will be ignored.
    pub fn begin(&self, stage: Stage) -> StageTicket {
        self.start(stage, CancellationToken::new(), None)
    }

    /// Begins `stage` as a continuation of `parent`. Cancelling or superseding
    /// the parent request cancels this one, and its results only land while
    /// the parent is still the latest request of its stage.
    pub fn begin_within(&self, stage: Stage, parent: &StageTicket) -> StageTicket {
        self.start(stage, parent.cancel.child_token(), Some((parent.stage, parent.seq)))
    }

    fn start(&self, stage: Stage, cancel: CancellationToken, parent: Option<(Stage, u64)>) -> StageTicket {
        let mut seq = 0;
        let mut superseded = false;
        self.state.send_modify(|state| {
            superseded = state.is_in_flight(stage);
            state.apply(stage, StageEvent::Begin);
            seq = state.stage(stage).seq;
        });

        let mut latest = self.lock_latest();
        if let Some((old_seq, old)) = latest.insert(stage, (seq, cancel.clone())) {
            if superseded {
                info!("Superseding in-flight {} request #{} with #{}", stage, old_seq, seq);
            }
            old.cancel();
        }
        debug!("Stage {} began (#{})", stage, seq);

        StageTicket { stage, seq, cancel, parent }
    }

    /// Merges `patch` and marks the stage succeeded. A ticket whose parent
    /// was superseded in the meantime is abandoned instead.
    pub fn succeed(&self, ticket: &StageTicket, patch: ResultPatch) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            if !ticket.parent_is_current(state) {
                return state.apply(ticket.stage, StageEvent::Abandon { seq: ticket.seq });
            }
            applied = state.apply(ticket.stage, StageEvent::Succeed { seq: ticket.seq, patch });
            applied
        });
        self.finish(ticket, applied, "succeeded");
        applied
    }

    /// Merges a partial result while the stage keeps running.
    pub fn progress(&self, ticket: &StageTicket, patch: ResultPatch) -> bool {
        self.state.send_if_modified(|state| {
            ticket.parent_is_current(state)
                && state.apply(ticket.stage, StageEvent::Progress { seq: ticket.seq, patch })
        })
    }

    /// Records `error` on the stage. Cancellation is not an error: a cancelled
    /// request that is still the latest one returns its stage to idle.
    pub fn fail(&self, ticket: &StageTicket, error: &WorkflowError) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            if error.is_cancelled() || !ticket.parent_is_current(state) {
                return state.apply(ticket.stage, StageEvent::Abandon { seq: ticket.seq });
            }
            let message = error.user_message();
            applied = state.apply(ticket.stage, StageEvent::Fail { seq: ticket.seq, message });
            applied
        });
        if applied {
            warn!("Stage {} failed: {}", ticket.stage, error);
        }
        self.finish(ticket, applied, "failed");
        applied
    }

    /// Records an error for a stage that was never started, e.g. a blocked retry.
    pub fn reject(&self, stage: Stage, error: &WorkflowError) {
        warn!("Stage {} rejected: {}", stage, error);
        self.state.send_if_modified(|state| {
            if state.is_in_flight(stage) {
                return false;
            }
            let entry = state.stage_mut(stage);
            entry.status = StageStatus::Failed;
            entry.error = Some(error.user_message());
            true
        });
    }

    /// Cancels every outstanding request and returns to the initial state.
    pub fn reset(&self) {
        for (stage, (seq, token)) in self.lock_latest().drain() {
            debug!("Cancelling {} request #{} on reset", stage, seq);
            token.cancel();
        }
        self.state.send_modify(WorkflowState::reset);
        info!("Workflow state reset");
    }

    /// Applies an arbitrary edit that is not a stage transition (history, counters).
    pub fn update<R>(&self, edit: impl FnOnce(&mut WorkflowState) -> R) -> R {
        let mut out = None;
        self.state.send_modify(|state| out = Some(edit(state)));
        match out {
            Some(value) => value,
            None => unreachable!("send_modify always runs the closure"),
        }
    }

    pub fn push_history(&self, entry: HistoryEntry) {
        self.update(|state| state.history.push(entry));
    }

    pub fn delete_history(&self, index: usize) -> Result<HistoryEntry> {
        self.update(|state| {
            if index < state.history.len() {
                Ok(state.history.remove(index))
            } else {
                Err(WorkflowError::Validation(format!(
                    "No history entry at position {}.",
                    index + 1
                )))
            }
        })
    }

    /// Counts one manual retry, refusing once `limit` retries were spent.
    pub fn register_manual_retry(&self, limit: u32) -> Result<u32> {
        self.update(|state| {
            if state.manual_retries >= limit {
                Err(WorkflowError::RetryLimitReached { limit })
            } else {
                state.manual_retries += 1;
                Ok(state.manual_retries)
            }
        })
    }

    pub fn reset_manual_retries(&self) {
        self.update(|state| state.manual_retries = 0);
    }

    fn finish(&self, ticket: &StageTicket, applied: bool, outcome: &str) {
        if applied {
            debug!("Stage {} {} (#{})", ticket.stage, outcome, ticket.seq);
        } else {
            debug!("Discarding stale {} result #{}", ticket.stage, ticket.seq);
        }
    }

    fn lock_latest(&self) -> std::sync::MutexGuard<'_, HashMap<Stage, (u64, CancellationToken)>> {
        // The map holds no invariants a panicking holder could break.
        self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}
