//! End-to-end runs of the batch controller against in-memory collaborators.
//!
//! The item source, transport and reviewer are scripted fakes; the session
//! store is the real [`MemoryStore`], so every checkpoint goes through the
//! same encode/decode path as SQLite.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use wiki_batch::controller::{BatchController, RunOutcome};
use wiki_batch::error::{TransportError, TransportErrorKind};
use wiki_batch::machine::{Machine, Policy};
use wiki_batch::models::{ExecutionMode, HistoryEntry, ItemState, LogStatus, Patch, RowRecord};
use wiki_batch::recency::RecencyPolicy;
use wiki_batch::session::Session;
use wiki_batch::store::MemoryStore;
use wiki_batch::traits::{Decision, ItemSource, ProgressStore, Prompt, Reviewer, Transport};

// ─── Fakes ──────────────────────────────────────────────────────────

struct FakeSource {
    items: HashMap<String, ItemState>,
    history: Vec<HistoryEntry>,
    /// Remaining forced failures per id.
    failures: Mutex<HashMap<String, u32>>,
    fetches: Mutex<Vec<String>>,
}

impl FakeSource {
    fn new(items: Vec<ItemState>) -> Self {
        Self {
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
            history: Vec::new(),
            failures: Mutex::new(HashMap::new()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }

    fn failing(self, id: &str, times: u32) -> Self {
        self.failures.lock().unwrap().insert(id.to_string(), times);
        self
    }

    fn fetch_count(&self, id: &str) -> usize {
        self.fetches.lock().unwrap().iter().filter(|f| *f == id).count()
    }
}

#[async_trait]
impl ItemSource for FakeSource {
    async fn fetch_item(&self, id: &str) -> Result<ItemState, TransportError> {
        self.fetches.lock().unwrap().push(id.to_string());
        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::new(TransportErrorKind::Network, "connection reset"));
            }
        }
        self.items
            .get(id)
            .cloned()
            .ok_or_else(|| TransportError::http(404, "not found"))
    }

    async fn fetch_history(&self, _id: &str) -> Result<Vec<HistoryEntry>, TransportError> {
        Ok(self.history.clone())
    }
}

#[derive(Default)]
struct FakeTransport {
    /// Failures to return before succeeding; `u32::MAX` means always.
    failures: Mutex<u32>,
    submitted: Mutex<Vec<(String, Patch)>>,
    attempts: Mutex<usize>,
}

impl FakeTransport {
    fn failing(times: u32) -> Self {
        Self {
            failures: Mutex::new(times),
            ..Self::default()
        }
    }

    fn submitted(&self) -> Vec<(String, Patch)> {
        self.submitted.lock().unwrap().clone()
    }

    fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &str {
        "fake"
    }

    async fn submit(&self, id: &str, patch: &Patch) -> Result<(), TransportError> {
        *self.attempts.lock().unwrap() += 1;
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            if *failures != u32::MAX {
                *failures -= 1;
            }
            return Err(TransportError::http(500, "internal error"));
        }
        self.submitted
            .lock()
            .unwrap()
            .push((id.to_string(), patch.clone()));
        Ok(())
    }
}

enum Step {
    ConfirmProposed,
    Decide(Decision),
}

/// Replays a fixed script of decisions and records every prompt it saw.
/// Cancels once the script runs out.
struct ScriptedReviewer {
    steps: VecDeque<Step>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl ScriptedReviewer {
    fn new(steps: Vec<Step>) -> (Self, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                steps: steps.into(),
                seen: Arc::clone(&seen),
            },
            seen,
        )
    }
}

#[async_trait]
impl Reviewer for ScriptedReviewer {
    async fn decide(&mut self, prompt: Prompt<'_>) -> Result<Decision> {
        let label = match &prompt {
            Prompt::Review { paused: true, .. } => "review(paused)",
            Prompt::Review { .. } => "review",
            Prompt::FetchFailed { .. } => "fetch_failed",
            Prompt::SubmitFailed { .. } => "submit_failed",
            Prompt::Paused { .. } => "paused",
        };
        self.seen.lock().unwrap().push(label.to_string());

        Ok(match (self.steps.pop_front(), &prompt) {
            (Some(Step::ConfirmProposed), Prompt::Review { review, .. }) => {
                Decision::Confirm(review.proposed_patch())
            }
            (Some(Step::Decide(decision)), _) => decision,
            _ => Decision::Cancel,
        })
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

fn item(id: &str, kind: &str) -> ItemState {
    ItemState {
        id: id.to_string(),
        name: format!("Item {}", id),
        text: format!("{{{{Infobox animanga/TVAnime\n|中文名= x\n|type= {}\n}}}}", kind),
        tags: vec!["anime".to_string()],
        flags: BTreeMap::new(),
        fetched_at: Utc::now(),
    }
}

fn session(ids: &[&str]) -> Session {
    Session {
        credential: "token".to_string(),
        rows: ids
            .iter()
            .map(|id| RowRecord::new(*id).with("type", "TV"))
            .collect(),
        columns: vec!["type".to_string()],
        ..Session::default()
    }
}

fn policy(mode: ExecutionMode) -> Policy {
    Policy {
        mode,
        observe_delay: Duration::ZERO,
        retry_delay: Duration::ZERO,
        recency: RecencyPolicy::Disabled,
        ..Policy::default()
    }
}

struct Harness {
    controller: BatchController,
    source: Arc<FakeSource>,
    transport: Arc<FakeTransport>,
    store: Arc<MemoryStore>,
    seen: Arc<Mutex<Vec<String>>>,
}

fn harness(
    policy: Policy,
    session: Session,
    source: FakeSource,
    transport: FakeTransport,
    steps: Vec<Step>,
) -> Harness {
    let source = Arc::new(source);
    let transport = Arc::new(transport);
    let store = Arc::new(MemoryStore::new());
    let (reviewer, seen) = ScriptedReviewer::new(steps);
    let controller = BatchController::new(
        Machine::new(policy, session),
        source.clone(),
        transport.clone(),
        store.clone(),
        Box::new(reviewer),
    );
    Harness {
        controller,
        source,
        transport,
        store,
        seen,
    }
}

fn seen(h: &Harness) -> Vec<String> {
    h.seen.lock().unwrap().clone()
}

// ─── Interactive ────────────────────────────────────────────────────

#[tokio::test]
async fn test_interactive_confirm_each_item() {
    let mut h = harness(
        policy(ExecutionMode::Interactive),
        session(&["1", "2"]),
        FakeSource::new(vec![item("1", "OVA"), item("2", "WEB")]),
        FakeTransport::default(),
        vec![Step::ConfirmProposed, Step::ConfirmProposed],
    );

    let outcome = h.controller.run().await.unwrap();
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(summary.total, 2);
    assert_eq!(summary.success, 2);
    assert_eq!(seen(&h), vec!["review", "review"]);

    let submitted = h.transport.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].0, "1");
    assert!(submitted[0].1.text.contains("|type= TV"));
    assert!(submitted[0].1.text.contains("|中文名= x"));
    assert_eq!(submitted[0].1.tags, vec!["anime"]);
    assert_eq!(submitted[0].1.message, "updated: type");

    let stored = h.store.load().await.unwrap();
    assert_eq!(stored.index, 2);
    assert_eq!(stored.previous_item.as_deref(), Some("2"));
    assert_eq!(stored.results.len(), 2);
    assert_eq!(
        stored.results.entries()[0].message,
        "updated: type (message: updated: type)"
    );
    assert!(h.store.save_count() >= 2);
}

#[tokio::test]
async fn test_confirm_without_changes_is_skipped() {
    let mut h = harness(
        policy(ExecutionMode::Interactive),
        session(&["1"]),
        FakeSource::new(vec![item("1", "TV")]),
        FakeTransport::default(),
        vec![Step::ConfirmProposed],
    );

    let outcome = h.controller.run().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(s) if s.skipped == 1));
    assert_eq!(h.transport.attempts(), 0);

    let stored = h.store.load().await.unwrap();
    let entry = &stored.results.entries()[0];
    assert_eq!(entry.status, LogStatus::Skip);
    assert_eq!(entry.message, "no changes needed");
}

#[tokio::test]
async fn test_skip_with_reason() {
    let mut h = harness(
        policy(ExecutionMode::Interactive),
        session(&["1", "2"]),
        FakeSource::new(vec![item("1", "OVA"), item("2", "OVA")]),
        FakeTransport::default(),
        vec![
            Step::Decide(Decision::Skip(Some("wrong entry".to_string()))),
            Step::ConfirmProposed,
        ],
    );

    let outcome = h.controller.run().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(s) if s.skipped == 1 && s.success == 1));
    let submitted = h.transport.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, "2");

    let stored = h.store.load().await.unwrap();
    assert_eq!(stored.results.entries()[0].message, "wrong entry");
}

#[tokio::test]
async fn test_locked_message_is_used() {
    let mut session = session(&["1"]);
    session.lock_message("batch fix of broadcast types");
    let mut h = harness(
        policy(ExecutionMode::Interactive),
        session,
        FakeSource::new(vec![item("1", "OVA")]),
        FakeTransport::default(),
        vec![Step::ConfirmProposed],
    );

    h.controller.run().await.unwrap();
    let submitted = h.transport.submitted();
    assert_eq!(submitted[0].1.message, "batch fix of broadcast types");
}

#[tokio::test]
async fn test_interactive_submit_failure_waits_for_retry() {
    let mut h = harness(
        policy(ExecutionMode::Interactive),
        session(&["1"]),
        FakeSource::new(vec![item("1", "OVA")]),
        FakeTransport::failing(1),
        vec![Step::ConfirmProposed, Step::Decide(Decision::Retry)],
    );

    let outcome = h.controller.run().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(s) if s.success == 1));
    assert_eq!(seen(&h), vec!["review", "submit_failed"]);
    assert_eq!(h.transport.attempts(), 2);
}

#[tokio::test]
async fn test_interactive_fetch_failure_skipped() {
    let mut h = harness(
        policy(ExecutionMode::Interactive),
        session(&["404", "1"]),
        FakeSource::new(vec![item("1", "OVA")]),
        FakeTransport::default(),
        vec![Step::Decide(Decision::Skip(None)), Step::ConfirmProposed],
    );

    let outcome = h.controller.run().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(s) if s.failed == 1 && s.success == 1));
    assert_eq!(seen(&h), vec!["fetch_failed", "review"]);

    let stored = h.store.load().await.unwrap();
    let entry = &stored.results.entries()[0];
    assert_eq!(entry.id, "404");
    assert_eq!(entry.status, LogStatus::Failed);
    assert!(entry.message.ends_with("(skipped)"), "{}", entry.message);
}

// ─── Unattended ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_unattended_runs_without_reviewer() {
    let mut h = harness(
        policy(ExecutionMode::Unattended),
        session(&["1", "2", "3"]),
        FakeSource::new(vec![item("1", "OVA"), item("2", "TV"), item("3", "WEB")]),
        FakeTransport::default(),
        Vec::new(),
    );

    let outcome = h.controller.run().await.unwrap();
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(summary.success, 2);
    assert_eq!(summary.skipped, 1);
    assert!(seen(&h).is_empty());
    assert_eq!(h.transport.submitted().len(), 2);
}

#[tokio::test]
async fn test_unattended_fetch_retries_then_succeeds() {
    let mut h = harness(
        policy(ExecutionMode::Unattended),
        session(&["1"]),
        FakeSource::new(vec![item("1", "OVA")]).failing("1", 2),
        FakeTransport::default(),
        Vec::new(),
    );

    let outcome = h.controller.run().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(s) if s.success == 1));
    assert_eq!(h.source.fetch_count("1"), 3);
}

#[tokio::test]
async fn test_unattended_submit_gives_up_at_cap() {
    let mut h = harness(
        policy(ExecutionMode::Unattended),
        session(&["1", "2"]),
        FakeSource::new(vec![item("1", "OVA"), item("2", "TV")]),
        FakeTransport::failing(u32::MAX),
        Vec::new(),
    );

    let outcome = h.controller.run().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(s) if s.failed == 1 && s.skipped == 1));
    assert_eq!(h.transport.attempts(), 3);

    let stored = h.store.load().await.unwrap();
    let entry = &stored.results.entries()[0];
    assert_eq!(entry.status, LogStatus::Failed);
    assert!(
        entry.message.ends_with("(max retries reached)"),
        "{}",
        entry.message
    );
    assert!(entry.message.contains("HTTP 500"), "{}", entry.message);
}

#[tokio::test]
async fn test_unattended_recent_item_pauses_until_resume() {
    let recent = vec![HistoryEntry {
        created_at: Utc::now() - chrono::Duration::hours(1),
        creator: "someone".to_string(),
        commit_message: "just edited".to_string(),
    }];
    let mut h = harness(
        Policy {
            recency: RecencyPolicy::Rolling {
                window: chrono::Duration::hours(24),
            },
            ..policy(ExecutionMode::Unattended)
        },
        session(&["1"]),
        FakeSource::new(vec![item("1", "OVA")]).with_history(recent),
        FakeTransport::default(),
        vec![Step::Decide(Decision::Resume)],
    );

    let outcome = h.controller.run().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(s) if s.success == 1));
    assert_eq!(seen(&h), vec!["review(paused)"]);
    // Resuming re-fetches before submitting.
    assert_eq!(h.source.fetch_count("1"), 2);
    assert_eq!(h.transport.submitted().len(), 1);
}

#[tokio::test]
async fn test_requested_pause_holds_until_resume() {
    let mut h = harness(
        policy(ExecutionMode::Unattended),
        session(&["1"]),
        FakeSource::new(vec![item("1", "OVA")]),
        FakeTransport::default(),
        vec![Step::Decide(Decision::Resume)],
    );
    h.controller.pause_handle().store(true, Ordering::SeqCst);

    let outcome = h.controller.run().await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(s) if s.success == 1));
    assert_eq!(seen(&h), vec!["review(paused)"]);
    assert_eq!(h.transport.submitted().len(), 1);
}

// ─── Cancel and resume ──────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_then_resume_from_checkpoint() {
    let mut h = harness(
        policy(ExecutionMode::Interactive),
        session(&["1", "2"]),
        FakeSource::new(vec![item("1", "OVA"), item("2", "OVA")]),
        FakeTransport::default(),
        vec![Step::ConfirmProposed, Step::Decide(Decision::Cancel)],
    );

    let outcome = h.controller.run().await.unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled { index: 1 });

    let saved = h.store.load().await.unwrap();
    assert_eq!(saved.index, 1);
    assert_eq!(saved.results.len(), 1);

    let transport = Arc::new(FakeTransport::default());
    let (reviewer, _) = ScriptedReviewer::new(vec![Step::ConfirmProposed]);
    let mut resumed = BatchController::new(
        Machine::new(policy(ExecutionMode::Interactive), saved),
        h.source.clone(),
        transport.clone(),
        h.store.clone(),
        Box::new(reviewer),
    );

    let outcome = resumed.run().await.unwrap();
    let RunOutcome::Completed(summary) = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(summary.total, 2);
    assert_eq!(summary.success, 2);
    let submitted = transport.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, "2");
}

#[tokio::test]
async fn test_run_without_credential_fails() {
    let mut session = session(&["1"]);
    session.credential.clear();
    let mut h = harness(
        policy(ExecutionMode::Interactive),
        session,
        FakeSource::new(vec![item("1", "OVA")]),
        FakeTransport::default(),
        Vec::new(),
    );

    let err = h.controller.run().await.unwrap_err();
    assert!(err.to_string().contains("no credential"), "{}", err);
    assert_eq!(h.source.fetch_count("1"), 0);
    assert_eq!(h.store.save_count(), 0);
}
