//! Export the result log as plain text.
//!
//! One line per entry, `timestamp [status] name (id): message`, oldest
//! first. Used by `wbatch log export`.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::store::SqliteStore;
use crate::traits::ProgressStore;

/// Export the persisted result log.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let store = SqliteStore::open(&config.state.path).await?;
    let session = store.load().await?;
    store.close().await;

    let count = session.results.len();
    let text = session.results.export_text();

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let mut content = text;
            if !content.is_empty() {
                content.push('\n');
            }
            std::fs::write(path, &content)?;
            eprintln!("Exported {} log entries to {}", count, path.display());
        }
        None => {
            if !text.is_empty() {
                println!("{}", text);
            }
        }
    }

    Ok(())
}
