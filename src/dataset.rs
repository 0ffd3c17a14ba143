//! Session-level commands: dataset load, column selection, progress reset,
//! log clearing and the commit-message lock.
//!
//! Each operation loads the session, changes it, and saves it back in one
//! step. None of them touch the network.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::session::Session;
use crate::store::SqliteStore;
use crate::tabular;
use crate::traits::ProgressStore;

/// Parse `text` and make it the session's dataset. Progress starts over.
pub async fn load_dataset(
    store: &dyn ProgressStore,
    text: &str,
    select: Vec<String>,
) -> Result<Session> {
    let table = tabular::parse(text)?;
    let mut session = store.load().await?;
    session.load_dataset(table);
    if !select.is_empty() {
        session.select_columns(select)?;
    }
    store.save(&session).await?;
    tracing::info!(
        rows = session.total(),
        columns = session.columns.len(),
        "dataset loaded"
    );
    Ok(session)
}

/// Load, apply `change`, save.
pub async fn update_session<F>(store: &dyn ProgressStore, change: F) -> Result<Session>
where
    F: FnOnce(&mut Session) -> Result<()>,
{
    let mut session = store.load().await?;
    change(&mut session)?;
    store.save(&session).await?;
    Ok(session)
}

async fn with_store<F>(config: &Config, change: F) -> Result<Session>
where
    F: FnOnce(&mut Session) -> Result<()>,
{
    let store = SqliteStore::open(&config.state.path).await?;
    let result = update_session(&store, change).await;
    store.close().await;
    result
}

pub async fn run_load(config: &Config, path: &Path, select: Vec<String>) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;

    let store = SqliteStore::open(&config.state.path).await?;
    let result = load_dataset(&store, &text, select).await;
    store.close().await;
    let session = result?;

    println!("load {}", path.display());
    println!("  rows:     {}", session.total());
    println!("  columns:  {}", session.columns.join(", "));
    if !session.selected_columns.is_empty() {
        println!("  selected: {}", session.selected_columns.join(", "));
    }
    Ok(())
}

pub async fn run_select(config: &Config, columns: Vec<String>) -> Result<()> {
    let session = with_store(config, |s| Ok(s.select_columns(columns)?)).await?;
    if session.selected_columns.is_empty() {
        println!("select: all columns");
    } else {
        println!("select: {}", session.selected_columns.join(", "));
    }
    Ok(())
}

pub async fn run_reset(config: &Config) -> Result<()> {
    let session = with_store(config, |s| {
        s.reset_progress();
        Ok(())
    })
    .await?;
    println!("reset: {} rows, starting from the first", session.total());
    Ok(())
}

pub async fn run_clear_log(config: &Config) -> Result<()> {
    with_store(config, |s| {
        s.results.clear();
        Ok(())
    })
    .await?;
    println!("log cleared");
    Ok(())
}

pub async fn run_lock_message(config: &Config, message: String) -> Result<()> {
    if message.trim().is_empty() {
        anyhow::bail!("locked message must not be empty");
    }
    let session = with_store(config, |s| {
        s.lock_message(message);
        Ok(())
    })
    .await?;
    println!("message locked: {}", session.message_lock.message);
    Ok(())
}

pub async fn run_unlock_message(config: &Config) -> Result<()> {
    with_store(config, |s| {
        s.unlock_message();
        Ok(())
    })
    .await?;
    println!("message unlocked");
    Ok(())
}
