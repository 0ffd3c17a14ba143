//! Terminal reviewer.
//!
//! Renders each prompt as plain text (unified diff of the key-value block,
//! tag and flag changes, suggested message, last modification) and reads
//! single-letter commands from input. Diff rendering problems are reported
//! inline and never block the decision.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use similar::TextDiff;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::error::BatchError;
use crate::machine::Review;
use crate::models::Patch;
use crate::traits::{Decision, Prompt, Reviewer};

/// Texts larger than this are not diffed.
const MAX_DIFF_BYTES: usize = 512 * 1024;

/// Unified diff between the current and proposed text.
///
/// # Errors
///
/// [`BatchError::DiffRender`] when either side is too large to diff.
pub fn render_diff(current: &str, proposed: &str) -> Result<String, BatchError> {
    if current.len() > MAX_DIFF_BYTES || proposed.len() > MAX_DIFF_BYTES {
        return Err(BatchError::DiffRender(format!(
            "text exceeds {} bytes",
            MAX_DIFF_BYTES
        )));
    }
    if current == proposed {
        return Ok("(text unchanged)\n".to_string());
    }
    let diff = TextDiff::from_lines(current, proposed);
    Ok(diff
        .unified_diff()
        .context_radius(3)
        .header("current", "proposed")
        .to_string())
}

/// Interactive reviewer over any line-oriented input and writer.
pub struct TerminalReviewer<R, W> {
    input: Lines<BufReader<R>>,
    output: W,
    editor: Option<String>,
}

impl TerminalReviewer<tokio::io::Stdin, std::io::Stdout> {
    /// Reviewer on stdin/stdout, using `$VISUAL` or `$EDITOR` for edits.
    pub fn stdio() -> Self {
        let editor = std::env::var("VISUAL")
            .or_else(|_| std::env::var("EDITOR"))
            .ok();
        Self::new(tokio::io::stdin(), std::io::stdout(), editor)
    }
}

impl<R, W> TerminalReviewer<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: Write + Send,
{
    pub fn new(input: R, output: W, editor: Option<String>) -> Self {
        Self {
            input: BufReader::new(input).lines(),
            output,
            editor,
        }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    async fn ask(&mut self, question: &str) -> Result<Option<String>> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;
        Ok(self.input.next_line().await?.map(|l| l.trim().to_string()))
    }

    fn show_review(&mut self, review: &Review, patch: &Patch, paused: bool) -> Result<()> {
        let out = &mut self.output;
        writeln!(out)?;
        writeln!(
            out,
            "── item {}: {} (id {}), fetched {}",
            review.index + 1,
            review.item.name,
            review.item.id,
            review.item.fetched_at.format("%H:%M:%S UTC")
        )?;
        match review.last_modified() {
            Some(last) => {
                write!(
                    out,
                    "last modified {} by {}: {:?}",
                    last.created_at.format("%Y-%m-%d %H:%M UTC"),
                    last.creator,
                    last.commit_message
                )?;
                if review.recent {
                    write!(out, "   [! modified recently, check before overwriting]")?;
                }
                writeln!(out)?;
            }
            None => writeln!(out, "no edit history")?,
        }

        match render_diff(&review.item.text, &patch.text) {
            Ok(diff) => write!(out, "{}", diff)?,
            Err(e) => {
                tracing::warn!(id = %review.item.id, error = %e, "diff render failed");
                writeln!(out, "(diff unavailable: {})", e)?;
            }
        }

        let updates = &review.updates;
        if !updates.tag_add.is_empty() || !updates.tag_remove.is_empty() {
            let changes: Vec<String> = updates
                .tag_add
                .iter()
                .map(|t| format!("+{}", t))
                .chain(updates.tag_remove.iter().map(|t| format!("-{}", t)))
                .collect();
            writeln!(out, "tags: {}", changes.join(" "))?;
        }
        for (name, value) in &updates.flags {
            writeln!(out, "flag: {} = {}", name, value)?;
        }
        writeln!(out, "message: {}", patch.message)?;
        if paused {
            writeln!(out, "(run is paused)")?;
        }
        Ok(())
    }

    async fn decide_review(&mut self, review: &Review, paused: bool) -> Result<Decision> {
        let mut patch = review.proposed_patch();
        self.show_review(review, &patch, paused)?;

        loop {
            let menu = if paused {
                "[c]onfirm [m]essage [e]dit [s]kip [r]esume [q]uit > "
            } else {
                "[c]onfirm [m]essage [e]dit [s]kip [p]ause [q]uit > "
            };
            let Some(answer) = self.ask(menu).await? else {
                return Ok(Decision::Cancel);
            };
            match answer.as_str() {
                "c" | "" => return Ok(Decision::Confirm(patch)),
                "m" => {
                    if let Some(message) = self.ask("new message: ").await? {
                        if !message.is_empty() {
                            patch.message = message;
                        }
                    }
                    writeln!(self.output, "message: {}", patch.message)?;
                }
                "e" => match self.edit_text(&review.item.id, &patch.text).await {
                    Ok(text) => {
                        patch.text = text;
                        match render_diff(&review.item.text, &patch.text) {
                            Ok(diff) => write!(self.output, "{}", diff)?,
                            Err(e) => writeln!(self.output, "(diff unavailable: {})", e)?,
                        }
                    }
                    Err(e) => writeln!(self.output, "edit failed: {:#}", e)?,
                },
                "s" => {
                    let reason = self.ask("reason (optional): ").await?;
                    return Ok(Decision::Skip(reason.filter(|r| !r.is_empty())));
                }
                "p" if !paused => return Ok(Decision::Pause),
                "r" if paused => return Ok(Decision::Resume),
                "q" => return Ok(Decision::Cancel),
                other => writeln!(self.output, "unknown command {:?}", other)?,
            }
        }
    }

    async fn decide_error(&mut self, id: &str, error: &BatchError, attempts: u32) -> Result<Decision> {
        writeln!(self.output)?;
        writeln!(self.output, "── item {} failed (attempt {})", id, attempts)?;
        writeln!(self.output, "{}", error)?;
        loop {
            let Some(answer) = self.ask("[r]etry [s]kip [p]ause [q]uit > ").await? else {
                return Ok(Decision::Cancel);
            };
            match answer.as_str() {
                "r" | "" => return Ok(Decision::Retry),
                "s" => return Ok(Decision::Skip(None)),
                "p" => return Ok(Decision::Pause),
                "q" => return Ok(Decision::Cancel),
                other => writeln!(self.output, "unknown command {:?}", other)?,
            }
        }
    }

    async fn decide_paused(&mut self, index: usize, total: usize) -> Result<Decision> {
        writeln!(self.output)?;
        writeln!(self.output, "── paused before item {} of {}", index + 1, total)?;
        loop {
            let Some(answer) = self.ask("[r]esume [q]uit > ").await? else {
                return Ok(Decision::Cancel);
            };
            match answer.as_str() {
                "r" | "" => return Ok(Decision::Resume),
                "q" => return Ok(Decision::Cancel),
                other => writeln!(self.output, "unknown command {:?}", other)?,
            }
        }
    }

    async fn edit_text(&mut self, id: &str, text: &str) -> Result<String> {
        let editor = self
            .editor
            .clone()
            .ok_or_else(|| anyhow::anyhow!("set $EDITOR to edit the text"))?;
        let path: PathBuf =
            std::env::temp_dir().join(format!("wbatch-{}-{}.txt", std::process::id(), id));
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        let edit_path = path.clone();
        let status = tokio::task::spawn_blocking(move || {
            std::process::Command::new(&editor).arg(&edit_path).status()
        })
        .await?
        .context("Failed to launch editor")?;

        let edited = std::fs::read_to_string(&path);
        let _ = std::fs::remove_file(&path);
        if !status.success() {
            anyhow::bail!("editor exited with {}", status);
        }
        Ok(edited?)
    }
}

#[async_trait]
impl<R, W> Reviewer for TerminalReviewer<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: Write + Send,
{
    async fn decide(&mut self, prompt: Prompt<'_>) -> Result<Decision> {
        match prompt {
            Prompt::Review { review, paused } => self.decide_review(review, paused).await,
            Prompt::FetchFailed {
                id,
                error,
                attempts,
            } => self.decide_error(id, error, attempts).await,
            Prompt::SubmitFailed {
                review,
                error,
                attempts,
            } => self.decide_error(&review.item.id, error, attempts).await,
            Prompt::Paused { index, total } => self.decide_paused(index, total).await,
        }
    }
}
