//! # Wiki Batch
//!
//! A resumable batch editor for wiki-style item metadata.
//!
//! Wiki Batch walks a tabular dataset (one row per item, keyed by `id`),
//! fetches the live state of each item, derives the minimal set of field, tag
//! and flag changes the row asks for, merges them into the item's key-value
//! text without disturbing anything else, lets a human review the result as a
//! diff, and submits it through one of two interchangeable transports.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────┐   ┌──────────┐
//! │ tabular  │──▶│ updates  │──▶│  merge  │──▶│ machine  │
//! │ (rows)   │   │ (derive) │   │ (patch) │   │ (state)  │
//! └──────────┘   └──────────┘   └─────────┘   └────┬─────┘
//!                                                  │ effects
//!                                   ┌──────────────┼──────────────┐
//!                                   ▼              ▼              ▼
//!                              ┌─────────┐   ┌──────────┐   ┌──────────┐
//!                              │ client  │   │transport │   │  store   │
//!                              │ (fetch) │   │ (submit) │   │ (SQLite) │
//!                              └─────────┘   └──────────┘   └──────────┘
//! ```
//!
//! The [`machine`] is a pure `(State, Event) -> Effects` transition function.
//! The [`controller`] executes its effects against the seams in [`traits`].
//!
//! ## Quick Start
//!
//! ```bash
//! wbatch load rows.csv            # parse and persist the dataset
//! wbatch select type episodes     # optional: restrict columns
//! wbatch run                      # review item by item
//! wbatch run --mode unattended    # auto-advance, pause on recent edits
//! wbatch status
//! wbatch log export --output results.txt
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`tabular`] | Delimited input parsing |
//! | [`updates`] | Update derivation with no-op suppression |
//! | [`merge`] | Surgical key-value text, tag and flag merge |
//! | [`machine`] | Batch state machine |
//! | [`controller`] | Async effect executor |
//! | [`client`] | Item state and history fetch |
//! | [`transport`] | Patch and legacy-form submission |
//! | [`recency`] | Recent-modification guard |
//! | [`results`] | Append-only result log |
//! | [`session`] | Persisted session snapshot |
//! | [`store`] | SQLite and in-memory session stores |
//! | [`review`] | Terminal reviewer and diff rendering |
//! | [`progress`] | Run progress on stderr |
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |

pub mod batch_cmd;
pub mod client;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod db;
pub mod error;
pub mod export;
pub mod machine;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod recency;
pub mod results;
pub mod review;
pub mod session;
pub mod status;
pub mod store;
pub mod tabular;
pub mod traits;
pub mod transport;
pub mod updates;
