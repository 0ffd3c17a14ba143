//! Async driver for the batch state machine.
//!
//! [`BatchController`] owns a [`Machine`] and executes the [`Effect`]s it
//! returns, one at a time, in order:
//!
//! | Effect | Execution |
//! |--------|-----------|
//! | `Fetch` | item state and history fetched concurrently, jointly awaited |
//! | `Observe` | sleep, then `ObservationElapsed` |
//! | `Submit` | one transport call |
//! | `Checkpoint` | session saved to the [`ProgressStore`] |
//! | `Resolved` / `Completed` | progress reporting |
//!
//! When no effect is pending the run is waiting for a human, and the
//! [`Reviewer`] is asked for a decision. At most one item is ever in flight.
//! A pause requested through [`BatchController::pause_handle`] (Ctrl-C in the
//! CLI) is honoured at the next event boundary, never mid-request.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;

use crate::error::BatchError;
use crate::machine::{Effect, Event, Machine, PauseReason, State};
use crate::models::Summary;
use crate::progress::{BatchProgressEvent, BatchProgressReporter, NoProgress};
use crate::traits::{Decision, ItemSource, ProgressStore, Prompt, Reviewer, Transport};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(Summary),
    /// Cancelled by the user; the next run resumes at `index`.
    Cancelled { index: usize },
}

impl From<Decision> for Event {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Confirm(patch) => Event::Confirm(patch),
            Decision::Skip(reason) => Event::Skip(reason),
            Decision::Retry => Event::Retry,
            Decision::Pause => Event::Pause,
            Decision::Resume => Event::Resume,
            Decision::Cancel => Event::Cancel,
        }
    }
}

pub struct BatchController {
    machine: Machine,
    source: Arc<dyn ItemSource>,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ProgressStore>,
    reviewer: Box<dyn Reviewer>,
    progress: Box<dyn BatchProgressReporter>,
    pause_requested: Arc<AtomicBool>,
}

impl BatchController {
    pub fn new(
        machine: Machine,
        source: Arc<dyn ItemSource>,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ProgressStore>,
        reviewer: Box<dyn Reviewer>,
    ) -> Self {
        Self {
            machine,
            source,
            transport,
            store,
            reviewer,
            progress: Box::new(NoProgress),
            pause_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn BatchProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    /// Set to `true` to request a pause at the next event boundary.
    pub fn pause_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.pause_requested)
    }

    /// Drive the run until it completes or the user cancels.
    ///
    /// # Errors
    ///
    /// Fails if the run cannot start (missing credential or dataset), if a
    /// checkpoint cannot be written, or if the reviewer fails.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        let effects = self.machine.step(Event::Start, Utc::now())?;
        let mut queue: VecDeque<Effect> = effects.into();
        tracing::info!(
            transport = self.transport.name(),
            index = self.machine.session().index,
            "controller started"
        );

        loop {
            while let Some(effect) = queue.pop_front() {
                self.honour_pause_request();
                if let Some(event) = self.execute(effect).await? {
                    self.apply(event, &mut queue)?;
                }
            }

            match self.machine.state() {
                State::Completed(summary) => return Ok(RunOutcome::Completed(*summary)),
                State::Idle => {
                    return Ok(RunOutcome::Cancelled {
                        index: self.machine.session().index,
                    })
                }
                _ => {}
            }

            self.honour_pause_request();
            let event = self.ask_reviewer().await?;
            self.apply(event, &mut queue)?;
        }
    }

    async fn execute(&mut self, effect: Effect) -> Result<Option<Event>> {
        match effect {
            Effect::Fetch { index, id } => {
                self.progress.report(BatchProgressEvent::ItemStarted {
                    id: id.clone(),
                    n: index + 1,
                    total: self.machine.session().total(),
                });
                let (item, history) = tokio::join!(
                    self.source.fetch_item(&id),
                    self.source.fetch_history(&id)
                );
                let event = match (item, history) {
                    (Ok(item), Ok(history)) => Event::Fetched {
                        index,
                        item,
                        history,
                    },
                    (Err(error), _) | (_, Err(error)) => Event::FetchFailed { index, error },
                };
                Ok(Some(event))
            }
            Effect::Observe(delay) => {
                tokio::time::sleep(delay).await;
                self.honour_pause_request();
                Ok(Some(Event::ObservationElapsed))
            }
            Effect::Submit { id, patch } => {
                tracing::debug!(%id, transport = self.transport.name(), "submitting patch");
                let event = match self.transport.submit(&id, &patch).await {
                    Ok(()) => Event::Submitted { id },
                    Err(error) => Event::SubmitFailed { id, error },
                };
                Ok(Some(event))
            }
            Effect::Resolved(entry) => {
                self.progress.report(BatchProgressEvent::ItemResolved {
                    id: entry.id,
                    name: entry.name,
                    status: entry.status,
                    message: entry.message,
                });
                Ok(None)
            }
            Effect::Checkpoint => {
                self.store.save(self.machine.session()).await?;
                Ok(None)
            }
            Effect::Completed(summary) => {
                self.progress.report(BatchProgressEvent::Completed(summary));
                Ok(None)
            }
        }
    }

    /// Feed one event to the machine and queue its effects.
    ///
    /// Decisions that are invalid for the current state are logged and
    /// dropped so the reviewer is simply asked again.
    fn apply(&mut self, event: Event, queue: &mut VecDeque<Effect>) -> Result<()> {
        let was_recency_paused = self.machine.pause_reason() == Some(PauseReason::Recency);
        let effects = match self.machine.step(event, Utc::now()) {
            Ok(effects) => effects,
            Err(BatchError::Precondition(reason)) => {
                tracing::warn!(%reason, "decision rejected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let retrying = effects.iter().any(|e| matches!(e, Effect::Observe(_)));
        match self.machine.state() {
            State::FetchFailed { id, attempts, .. } if retrying => {
                self.progress.report(BatchProgressEvent::Retrying {
                    id: id.clone(),
                    attempt: *attempts,
                    cap: self.machine.policy().retry_cap,
                });
            }
            State::SubmitFailed {
                review, attempts, ..
            } if retrying => {
                self.progress.report(BatchProgressEvent::Retrying {
                    id: review.item.id.clone(),
                    attempt: *attempts,
                    cap: self.machine.policy().retry_cap,
                });
            }
            State::Reviewing(review)
                if !was_recency_paused
                    && self.machine.pause_reason() == Some(PauseReason::Recency) =>
            {
                self.progress.report(BatchProgressEvent::Paused {
                    id: Some(review.item.id.clone()),
                    reason: "modified recently".to_string(),
                });
            }
            _ => {}
        }

        queue.extend(effects);
        Ok(())
    }

    fn honour_pause_request(&mut self) {
        if !self.pause_requested.load(Ordering::SeqCst) || !self.machine.can_pause() {
            return;
        }
        self.pause_requested.store(false, Ordering::SeqCst);
        if self.machine.step(Event::Pause, Utc::now()).is_ok() {
            let id = self.machine.session().current_row().map(|r| r.id.clone());
            self.progress.report(BatchProgressEvent::Paused {
                id,
                reason: "requested".to_string(),
            });
        }
    }

    async fn ask_reviewer(&mut self) -> Result<Event> {
        let paused = self.machine.is_paused();
        let total = self.machine.session().total();
        let prompt = match self.machine.state() {
            State::Reviewing(review) => Prompt::Review { review, paused },
            State::FetchFailed {
                id,
                error,
                attempts,
                ..
            } => Prompt::FetchFailed {
                id,
                error,
                attempts: *attempts,
            },
            State::SubmitFailed {
                review,
                error,
                attempts,
                ..
            } => Prompt::SubmitFailed {
                review,
                error,
                attempts: *attempts,
            },
            State::AwaitingItem { index } if paused => Prompt::Paused {
                index: *index,
                total,
            },
            other => anyhow::bail!("run stalled in state {}", other.label()),
        };
        let decision = self.reviewer.decide(prompt).await?;
        Ok(decision.into())
    }
}
