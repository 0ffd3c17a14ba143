use anyhow::Result;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::client::WikiClient;
use crate::config::{Config, TransportStrategy};
use crate::controller::{BatchController, RunOutcome};
use crate::machine::Machine;
use crate::models::ExecutionMode;
use crate::progress::ProgressMode;
use crate::review::TerminalReviewer;
use crate::store::SqliteStore;
use crate::traits::ProgressStore;
use crate::transport::build_transport;

/// Run (or resume) the batch over the persisted dataset.
pub async fn run_batch(
    config: &Config,
    mode: Option<ExecutionMode>,
    strategy: Option<TransportStrategy>,
    progress: ProgressMode,
) -> Result<()> {
    let policy = config.policy(mode)?;
    let store = Arc::new(SqliteStore::open(&config.state.path).await?);
    let mut session = store.load().await?;

    // A configured credential wins over the one saved by a previous run
    if let Some(credential) = config.api.credential() {
        session.credential = credential;
    }

    let client = WikiClient::from_config(&config.api, &session.credential)?;
    let transport = build_transport(
        config,
        strategy.unwrap_or(config.transport.strategy),
        &client,
    )?;

    println!(
        "run  {} rows from item {}  mode={} transport={}",
        session.total(),
        session.index + 1,
        policy.mode,
        transport.name()
    );

    let machine = Machine::new(policy, session);
    let mut controller = BatchController::new(
        machine,
        Arc::new(client),
        transport,
        store.clone(),
        Box::new(TerminalReviewer::stdio()),
    )
    .with_progress(progress.reporter());

    let pause = controller.pause_handle();
    let ctrl_c = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            pause.store(true, Ordering::SeqCst);
            eprintln!("pause requested; finishing the current step");
        }
    });

    let outcome = controller.run().await;
    ctrl_c.abort();
    store.close().await;

    match outcome? {
        RunOutcome::Completed(summary) => {
            println!(
                "done  {} items: {} success, {} failed, {} skipped",
                summary.total, summary.success, summary.failed, summary.skipped
            );
        }
        RunOutcome::Cancelled { index } => {
            println!("cancelled before item {}; run again to resume", index + 1);
        }
    }
    Ok(())
}
