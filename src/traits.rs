//! Seams between the batch engine and the outside world.
//!
//! The state machine is pure; everything that talks to the network, the
//! disk or a human goes through one of these traits, so each can be swapped
//! for an in-memory fake in tests.
//!
//! | Trait | Collaborator | Implementations |
//! |-------|--------------|-----------------|
//! | [`ItemSource`] | item state + history fetch | [`WikiClient`](crate::client::WikiClient) |
//! | [`Transport`] | patch submission | [`PatchTransport`](crate::transport::PatchTransport), [`LegacyFormTransport`](crate::transport::LegacyFormTransport) |
//! | [`ProgressStore`] | persistent key-value store | [`SqliteStore`](crate::store::SqliteStore), [`MemoryStore`](crate::store::MemoryStore) |
//! | [`Reviewer`] | presentation layer | [`TerminalReviewer`](crate::review::TerminalReviewer) |

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{BatchError, TransportError};
use crate::machine::Review;
use crate::models::{HistoryEntry, ItemState, Patch};
use crate::session::Session;

// ═══════════════════════════════════════════════════════════════════════
// Network
// ═══════════════════════════════════════════════════════════════════════

/// Read access to the live item store.
///
/// Both calls are issued together for every item and awaited jointly.
#[async_trait]
pub trait ItemSource: Send + Sync {
    async fn fetch_item(&self, id: &str) -> Result<ItemState, TransportError>;

    /// Edit history, most recent first.
    async fn fetch_history(&self, id: &str) -> Result<Vec<HistoryEntry>, TransportError>;
}

/// A submission strategy.
///
/// Implementations never retry; retry policy belongs to the state machine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short identifier used in logs (`"patch"`, `"legacy"`).
    fn name(&self) -> &str;

    async fn submit(&self, id: &str, patch: &Patch) -> Result<(), TransportError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Persistence
// ═══════════════════════════════════════════════════════════════════════

/// Load/save of the session snapshot.
///
/// `load` on an empty store returns [`Session::default`].
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn load(&self) -> Result<Session>;

    async fn save(&self, session: &Session) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// Presentation
// ═══════════════════════════════════════════════════════════════════════

/// What the reviewer is being asked about.
#[derive(Debug)]
pub enum Prompt<'a> {
    /// A fetched item with its proposed patch.
    Review { review: &'a Review, paused: bool },
    FetchFailed {
        id: &'a str,
        error: &'a BatchError,
        attempts: u32,
    },
    SubmitFailed {
        review: &'a Review,
        error: &'a BatchError,
        attempts: u32,
    },
    /// The run is held before fetching item `index`.
    Paused { index: usize, total: usize },
}

/// A human decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Confirm(Patch),
    Skip(Option<String>),
    Retry,
    Pause,
    Resume,
    Cancel,
}

/// The presentation layer. It renders prompts and returns decisions; it
/// never mutates run state itself.
#[async_trait]
pub trait Reviewer: Send {
    async fn decide(&mut self, prompt: Prompt<'_>) -> Result<Decision>;
}
