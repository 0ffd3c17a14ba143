//! Batch state machine.
//!
//! A pure transition function over an explicit [`State`]: every input is an
//! [`Event`], every side effect the caller must perform comes back as an
//! [`Effect`]. The machine owns the [`Session`] (position, result log,
//! message lock) and the in-memory retry counters; it never touches the
//! network, the clock or the store itself.
//!
//! # States
//!
//! ```text
//! Idle ──Start──▶ AwaitingItem ──Fetched──▶ Reviewing ──Confirm──▶ Submitting
//!                    │    ▲                     │                    │
//!               FetchFailed                    Skip             Submitted / SubmitFailed
//!                    ▼    │ Retry               ▼                    ▼
//!               FetchFailed state        (resolve, advance)   SubmitFailed state
//!
//! resolve ──▶ AwaitingItem (next index) | Completed
//! ```
//!
//! Pausing is orthogonal to the state. A paused machine never issues a fetch
//! or schedules an automatic step; it waits for a human decision or
//! [`Event::Resume`], which refetches the current item.
//!
//! # Execution modes
//!
//! | Mode | Review | Errors |
//! |------|--------|--------|
//! | Interactive | always waits for a decision | retried on request, never auto-skipped |
//! | Unattended | auto-advances after an observation delay unless the item is fresh | auto-retried up to the cap, then skipped as `failed` |

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{BatchError, TransportError};
use crate::merge::{merge, TextLayout};
use crate::models::{
    ExecutionMode, HistoryEntry, ItemState, LogEntry, LogStatus, MergeResult, Patch, RowRecord,
    Summary, UpdateSet,
};
use crate::recency::RecencyPolicy;
use crate::session::Session;
use crate::updates::{derive, DeriveOptions};

/// Log message for items that needed no submission.
pub const NO_CHANGES_NEEDED: &str = "no changes needed";
const SKIPPED_BY_USER: &str = "skipped by user";

/// Run-wide knobs, fixed for the lifetime of a machine.
#[derive(Debug, Clone)]
pub struct Policy {
    pub mode: ExecutionMode,
    /// Automatic attempts per item before an unattended run gives up on it.
    pub retry_cap: u32,
    pub observe_delay: Duration,
    pub retry_delay: Duration,
    pub recency: RecencyPolicy,
    pub flag_columns: Vec<String>,
    pub layout: TextLayout,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Interactive,
            retry_cap: 3,
            observe_delay: Duration::from_millis(500),
            retry_delay: Duration::from_millis(1000),
            recency: RecencyPolicy::default(),
            flag_columns: vec!["series".to_string()],
            layout: TextLayout::Template,
        }
    }
}

/// Everything the reviewer needs to decide on one item.
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub index: usize,
    pub row: RowRecord,
    pub item: ItemState,
    /// Most recent first.
    pub history: Vec<HistoryEntry>,
    pub updates: UpdateSet,
    pub merged: MergeResult,
    /// Set when the recency guard flagged the item.
    pub recent: bool,
    /// Suggested commit message: the locked message, or the default summary.
    pub message: String,
}

impl Review {
    pub fn last_modified(&self) -> Option<&HistoryEntry> {
        self.history.first()
    }

    /// The patch that would be submitted without human edits.
    pub fn proposed_patch(&self) -> Patch {
        Patch {
            text: self.merged.text.clone(),
            tags: self.merged.tags.clone(),
            flags: self.merged.flags.clone(),
            message: self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Idle,
    /// Fetch of the item at `index` is in flight (or held by a pause).
    AwaitingItem {
        index: usize,
    },
    Reviewing(Box<Review>),
    Submitting {
        review: Box<Review>,
        patch: Patch,
    },
    FetchFailed {
        index: usize,
        id: String,
        error: BatchError,
        attempts: u32,
    },
    SubmitFailed {
        review: Box<Review>,
        patch: Patch,
        error: BatchError,
        attempts: u32,
    },
    Completed(Summary),
}

impl State {
    pub fn label(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::AwaitingItem { .. } => "awaiting_item",
            State::Reviewing(_) => "reviewing",
            State::Submitting { .. } => "submitting",
            State::FetchFailed { .. } => "fetch_failed",
            State::SubmitFailed { .. } => "submit_failed",
            State::Completed(_) => "completed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Start,
    Fetched {
        index: usize,
        item: ItemState,
        history: Vec<HistoryEntry>,
    },
    FetchFailed {
        index: usize,
        error: TransportError,
    },
    /// A delay requested through [`Effect::Observe`] has passed.
    ObservationElapsed,
    Confirm(Patch),
    Skip(Option<String>),
    Retry,
    Submitted {
        id: String,
    },
    SubmitFailed {
        id: String,
        error: TransportError,
    },
    Pause,
    Resume,
    Cancel,
}

impl Event {
    pub fn label(&self) -> &'static str {
        match self {
            Event::Start => "start",
            Event::Fetched { .. } => "fetched",
            Event::FetchFailed { .. } => "fetch_failed",
            Event::ObservationElapsed => "observation_elapsed",
            Event::Confirm(_) => "confirm",
            Event::Skip(_) => "skip",
            Event::Retry => "retry",
            Event::Submitted { .. } => "submitted",
            Event::SubmitFailed { .. } => "submit_failed",
            Event::Pause => "pause",
            Event::Resume => "resume",
            Event::Cancel => "cancel",
        }
    }
}

/// Work the caller performs on the machine's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Fetch item state and history together, then feed back
    /// [`Event::Fetched`] or [`Event::FetchFailed`].
    Fetch { index: usize, id: String },
    /// Wait, then feed back [`Event::ObservationElapsed`].
    Observe(Duration),
    /// Submit, then feed back [`Event::Submitted`] or [`Event::SubmitFailed`].
    Submit { id: String, patch: Patch },
    /// An item was resolved with this entry.
    Resolved(LogEntry),
    /// Persist the session.
    Checkpoint,
    Completed(Summary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    Requested,
    /// Set by the recency guard; cleared once the item is resolved.
    Recency,
}

pub struct Machine {
    policy: Policy,
    session: Session,
    state: State,
    pause: Option<PauseReason>,
    retries: HashMap<String, u32>,
    /// Item whose recency warning a human has already seen.
    acknowledged: Option<String>,
}

impl Machine {
    pub fn new(policy: Policy, session: Session) -> Self {
        Self {
            policy,
            session,
            state: State::Idle,
            pause: None,
            retries: HashMap::new(),
            acknowledged: None,
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_some()
    }

    pub fn pause_reason(&self) -> Option<PauseReason> {
        self.pause
    }

    pub fn retries_for(&self, id: &str) -> u32 {
        self.retries.get(id).copied().unwrap_or(0)
    }

    /// Whether [`Event::Pause`] would be accepted now.
    pub fn can_pause(&self) -> bool {
        !self.is_paused()
            && matches!(
                self.state,
                State::AwaitingItem { .. }
                    | State::Reviewing(_)
                    | State::FetchFailed { .. }
                    | State::SubmitFailed { .. }
            )
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// [`BatchError::Precondition`] when `Start` is missing a credential or
    /// dataset, or a user decision is not valid in the current state. The
    /// state is left unchanged in that case. Network and timer results that no
    /// longer match the current state are discarded, not rejected.
    pub fn step(&mut self, event: Event, now: DateTime<Utc>) -> Result<Vec<Effect>, BatchError> {
        tracing::debug!(state = self.state.label(), event = event.label(), "step");
        match event {
            Event::Start => self.start(),
            Event::Fetched {
                index,
                item,
                history,
            } => Ok(self.on_fetched(index, item, history, now)),
            Event::FetchFailed { index, error } => Ok(self.on_fetch_failed(index, error, now)),
            Event::ObservationElapsed => Ok(self.on_observation_elapsed(now)),
            Event::Confirm(patch) => self.confirm(patch, now),
            Event::Skip(reason) => self.skip(reason, now),
            Event::Retry => self.retry(),
            Event::Submitted { id } => Ok(self.on_submitted(&id, now)),
            Event::SubmitFailed { id, error } => Ok(self.on_submit_failed(&id, error, now)),
            Event::Pause => self.pause(),
            Event::Resume => self.resume(),
            Event::Cancel => Ok(self.cancel()),
        }
    }

    fn start(&mut self) -> Result<Vec<Effect>, BatchError> {
        if !matches!(self.state, State::Idle | State::Completed(_)) {
            return Err(BatchError::Precondition(
                "a run is already in progress".to_string(),
            ));
        }
        if self.session.credential.trim().is_empty() {
            return Err(BatchError::Precondition("no credential configured".to_string()));
        }
        if self.session.rows.is_empty() {
            return Err(BatchError::Precondition("no dataset loaded".to_string()));
        }

        tracing::info!(
            index = self.session.index,
            total = self.session.total(),
            mode = %self.policy.mode,
            "starting batch run"
        );
        self.pause = None;
        self.acknowledged = None;
        Ok(self.advance_or_complete())
    }

    fn advance_or_complete(&mut self) -> Vec<Effect> {
        let index = self.session.index;
        let Some(row) = self.session.rows.get(index) else {
            let summary = self.session.summary();
            tracing::info!(
                total = summary.total,
                success = summary.success,
                failed = summary.failed,
                skipped = summary.skipped,
                "batch run completed"
            );
            self.state = State::Completed(summary);
            return vec![Effect::Completed(summary)];
        };

        let id = row.id.clone();
        self.state = State::AwaitingItem { index };
        if self.is_paused() {
            tracing::debug!(index, "paused before fetch");
            return Vec::new();
        }
        vec![Effect::Fetch { index, id }]
    }

    fn on_fetched(
        &mut self,
        index: usize,
        item: ItemState,
        history: Vec<HistoryEntry>,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        if self.state != (State::AwaitingItem { index }) {
            tracing::debug!(index, state = self.state.label(), "discarding stale fetch result");
            return Vec::new();
        }
        let Some(row) = self.session.rows.get(index).cloned() else {
            return Vec::new();
        };

        self.retries.insert(row.id.clone(), 0);

        let opts = DeriveOptions {
            flag_columns: self.policy.flag_columns.clone(),
            selected: self.session.selected_columns.clone(),
        };
        let updates = derive(&row, &item, &opts);
        let mut merged = merge(&item, &updates, self.policy.layout);
        // Only configured flag columns go back to the server.
        merged.flags.retain(|name, _| opts.is_flag(name));
        let last_modified = history.first().map(|h| h.created_at);
        let recent = self.policy.recency.is_fresh(last_modified, now);
        let message = self.session.suggested_message(&merged.default_message);
        let acknowledged = self.acknowledged.as_deref() == Some(row.id.as_str());

        if recent {
            tracing::warn!(
                id = %row.id,
                last_modified = ?last_modified,
                acknowledged,
                "item was modified recently"
            );
        }

        let mut effects = Vec::new();
        if self.policy.mode == ExecutionMode::Unattended && !self.is_paused() {
            if recent && !acknowledged {
                tracing::info!(id = %row.id, "pausing for review of a recent modification");
                self.pause = Some(PauseReason::Recency);
            } else {
                effects.push(Effect::Observe(self.policy.observe_delay));
            }
        }

        self.state = State::Reviewing(Box::new(Review {
            index,
            row,
            item,
            history,
            updates,
            merged,
            recent,
            message,
        }));
        effects
    }

    fn on_fetch_failed(
        &mut self,
        index: usize,
        error: TransportError,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        if self.state != (State::AwaitingItem { index }) {
            tracing::debug!(index, state = self.state.label(), "discarding stale fetch failure");
            return Vec::new();
        }
        let Some(id) = self.session.rows.get(index).map(|r| r.id.clone()) else {
            return Vec::new();
        };

        let attempts = self.bump_retries(&id);
        let error = BatchError::Fetch {
            id: id.clone(),
            source: error,
        };
        tracing::warn!(%id, attempts, error = %error, "fetch failed");
        self.state = State::FetchFailed {
            index,
            id,
            error,
            attempts,
        };
        self.after_failure(attempts, now)
    }

    fn on_observation_elapsed(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if self.policy.mode != ExecutionMode::Unattended || self.is_paused() {
            tracing::debug!(state = self.state.label(), "observation ignored");
            return Vec::new();
        }

        match &self.state {
            State::Reviewing(review) => {
                let patch = review.proposed_patch();
                if review.updates.is_empty() || patch.is_noop_for(&review.item) {
                    self.resolve_current(LogStatus::Skip, NO_CHANGES_NEEDED.to_string(), now)
                } else {
                    self.submit(patch)
                }
            }
            State::FetchFailed { .. } | State::SubmitFailed { .. } => self.retry_current(),
            _ => {
                tracing::debug!(state = self.state.label(), "discarding stale observation");
                Vec::new()
            }
        }
    }

    fn confirm(&mut self, patch: Patch, now: DateTime<Utc>) -> Result<Vec<Effect>, BatchError> {
        let State::Reviewing(review) = &self.state else {
            return Err(self.invalid("confirm"));
        };
        if patch.is_noop_for(&review.item) {
            return Ok(self.resolve_current(LogStatus::Skip, NO_CHANGES_NEEDED.to_string(), now));
        }
        Ok(self.submit(patch))
    }

    fn submit(&mut self, patch: Patch) -> Vec<Effect> {
        let state = std::mem::replace(&mut self.state, State::Idle);
        let State::Reviewing(review) = state else {
            self.state = state;
            return Vec::new();
        };
        let id = review.item.id.clone();
        tracing::debug!(%id, "submitting");
        self.state = State::Submitting {
            review,
            patch: patch.clone(),
        };
        vec![Effect::Submit { id, patch }]
    }

    fn on_submitted(&mut self, id: &str, now: DateTime<Utc>) -> Vec<Effect> {
        let State::Submitting { review, patch } = &self.state else {
            tracing::debug!(id, state = self.state.label(), "discarding stale submit result");
            return Vec::new();
        };
        if review.item.id != id {
            tracing::debug!(id, "discarding submit result for another item");
            return Vec::new();
        }
        let message = format!("{} (message: {})", review.merged.default_message, patch.message);
        self.resolve_current(LogStatus::Success, message, now)
    }

    fn on_submit_failed(
        &mut self,
        id: &str,
        error: TransportError,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        let matches = matches!(&self.state, State::Submitting { review, .. } if review.item.id == id);
        if !matches {
            tracing::debug!(id, state = self.state.label(), "discarding stale submit failure");
            return Vec::new();
        }
        let state = std::mem::replace(&mut self.state, State::Idle);
        let State::Submitting { review, patch } = state else {
            self.state = state;
            return Vec::new();
        };

        let attempts = self.bump_retries(id);
        let error = BatchError::Submit {
            id: id.to_string(),
            source: error,
        };
        tracing::warn!(id, attempts, error = %error, "submit failed");
        self.state = State::SubmitFailed {
            review,
            patch,
            error,
            attempts,
        };
        self.after_failure(attempts, now)
    }

    /// Decide what happens after a failed attempt, per execution mode.
    fn after_failure(&mut self, attempts: u32, now: DateTime<Utc>) -> Vec<Effect> {
        if self.policy.mode != ExecutionMode::Unattended || self.is_paused() {
            return Vec::new();
        }
        if attempts >= self.policy.retry_cap {
            let message = match &self.state {
                State::FetchFailed { error, .. } | State::SubmitFailed { error, .. } => {
                    format!("{} (max retries reached)", error)
                }
                _ => "max retries reached".to_string(),
            };
            return self.resolve_current(LogStatus::Failed, message, now);
        }
        vec![Effect::Observe(self.policy.retry_delay)]
    }

    fn retry(&mut self) -> Result<Vec<Effect>, BatchError> {
        if !matches!(
            self.state,
            State::FetchFailed { .. } | State::SubmitFailed { .. }
        ) {
            return Err(self.invalid("retry"));
        }
        Ok(self.retry_current())
    }

    fn retry_current(&mut self) -> Vec<Effect> {
        let state = std::mem::replace(&mut self.state, State::Idle);
        match state {
            State::FetchFailed { index, id, .. } => {
                tracing::debug!(%id, "retrying fetch");
                self.state = State::AwaitingItem { index };
                vec![Effect::Fetch { index, id }]
            }
            State::SubmitFailed { review, patch, .. } => {
                let id = review.item.id.clone();
                tracing::debug!(%id, "retrying submit");
                self.state = State::Submitting {
                    review,
                    patch: patch.clone(),
                };
                vec![Effect::Submit { id, patch }]
            }
            other => {
                self.state = other;
                Vec::new()
            }
        }
    }

    fn skip(&mut self, reason: Option<String>, now: DateTime<Utc>) -> Result<Vec<Effect>, BatchError> {
        let reason = reason.filter(|r| !r.trim().is_empty());
        let (status, message) = match &self.state {
            State::Reviewing(_) => (
                LogStatus::Skip,
                reason.unwrap_or_else(|| SKIPPED_BY_USER.to_string()),
            ),
            State::FetchFailed { error, .. } | State::SubmitFailed { error, .. } => {
                let message = match reason {
                    Some(reason) => format!("{} (skipped: {})", error, reason),
                    None => format!("{} (skipped)", error),
                };
                (LogStatus::Failed, message)
            }
            _ => return Err(self.invalid("skip")),
        };
        Ok(self.resolve_current(status, message, now))
    }

    fn pause(&mut self) -> Result<Vec<Effect>, BatchError> {
        if !self.can_pause() {
            return Err(self.invalid("pause"));
        }
        tracing::info!(state = self.state.label(), "run paused");
        self.pause = Some(PauseReason::Requested);
        Ok(Vec::new())
    }

    fn resume(&mut self) -> Result<Vec<Effect>, BatchError> {
        if !self.is_paused() || matches!(self.state, State::Idle | State::Completed(_)) {
            return Err(self.invalid("resume"));
        }
        if let State::Reviewing(review) = &self.state {
            if review.recent {
                self.acknowledged = Some(review.item.id.clone());
            }
        }
        tracing::info!(index = self.session.index, "run resumed");
        self.pause = None;
        Ok(self.advance_or_complete())
    }

    fn cancel(&mut self) -> Vec<Effect> {
        if self.state == State::Idle {
            return Vec::new();
        }
        tracing::info!(
            state = self.state.label(),
            index = self.session.index,
            "run cancelled"
        );
        self.state = State::Idle;
        self.pause = None;
        self.acknowledged = None;
        vec![Effect::Checkpoint]
    }

    /// Record the outcome of the current item and move on.
    fn resolve_current(
        &mut self,
        status: LogStatus,
        message: String,
        now: DateTime<Utc>,
    ) -> Vec<Effect> {
        let (id, name) = match &self.state {
            State::Reviewing(review)
            | State::Submitting { review, .. }
            | State::SubmitFailed { review, .. } => {
                (review.item.id.clone(), review.item.name.clone())
            }
            State::FetchFailed { index, id, .. } => {
                let name = self
                    .session
                    .rows
                    .get(*index)
                    .and_then(|row| row.get("name"))
                    .unwrap_or(id.as_str())
                    .to_string();
                (id.clone(), name)
            }
            _ => return Vec::new(),
        };

        let entry = LogEntry {
            timestamp: now,
            id: id.clone(),
            name,
            status,
            message,
        };
        tracing::info!(%id, status = %status, message = %entry.message, "item resolved");

        self.session.results.append(entry.clone());
        self.session.index += 1;
        self.session.previous_item = Some(id.clone());
        self.retries.remove(&id);
        self.acknowledged = None;
        if self.pause == Some(PauseReason::Recency) {
            self.pause = None;
        }

        let mut effects = vec![Effect::Resolved(entry), Effect::Checkpoint];
        effects.extend(self.advance_or_complete());
        effects
    }

    fn bump_retries(&mut self, id: &str) -> u32 {
        let count = self.retries.entry(id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn invalid(&self, action: &str) -> BatchError {
        BatchError::Precondition(format!(
            "cannot {} while {}",
            action,
            self.state.label()
        ))
    }
}
