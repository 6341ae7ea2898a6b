//! Concurrent execution of a parsed [`Pipeline`].
//!
//! Wiring happens up front: every inter-stage pipe is created and the redirect
//! target opened before any stage is spawned, so a bad target fails the whole
//! line without side effects. Each stage then runs as its own task on a
//! [`TaskTracker`]. The first stage to finish with anything other than
//! `Continue` fills a single-slot channel; later results are dropped.
//!
//! Siblings are never cancelled when one stage fails. A failed stage does not
//! drain its input either: it drops its pipe ends on return, so the producer
//! upstream sees a broken pipe and the consumer downstream sees EOF.

use std::fs::OpenOptions;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::commands::{self, Control};
use super::parser::{Pipeline, RedirectMode};
use super::stage_io::{StageInput, StageOutput};
use super::{Outcome, Shell};
use crate::error::ShellError;

/// Handle to a started pipeline.
pub struct PipelineRun {
    first: mpsc::Receiver<Outcome>,
    tracker: TaskTracker,
}

impl PipelineRun {
    /// Wait for the first non-`Continue` stage result, or for every stage to
    /// finish cleanly.
    pub async fn outcome(mut self) -> Outcome {
        tokio::select! {
            biased;
            Some(outcome) = self.first.recv() => return outcome,
            _ = self.tracker.wait() => {}
        }
        // A stage may have reported in the same instant the barrier opened.
        self.first.try_recv().unwrap_or(Outcome::Continue)
    }

    /// The tracker holding every stage task. Closed; `wait()` resolves once all
    /// stages have returned.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }
}

/// Wire and spawn every stage of `pipeline`.
///
/// `first_input` feeds stage 0: the shell's stdin for a typed line, or
/// [`StageInput::Empty`] for a sub-pipeline.
pub fn start(
    shell: &Arc<Shell>,
    pipeline: Pipeline,
    first_input: StageInput,
    cancel: &CancellationToken,
) -> Result<PipelineRun, ShellError> {
    let count = pipeline.stages.len();

    // 1. Resolve the last stage's output.
    let last_output = match &pipeline.redirect {
        Some(redirect) => {
            let mut options = OpenOptions::new();
            options.create(true);
            match redirect.mode {
                RedirectMode::Append => options.append(true),
                RedirectMode::Truncate => options.write(true).truncate(true),
            };
            let file = options
                .open(&redirect.path)
                .map_err(|source| ShellError::Redirect {
                    path: redirect.path.clone(),
                    source,
                })?;
            StageOutput::File(file)
        }
        None => StageOutput::Stdout,
    };

    // 2. One anonymous pipe per adjacent pair.
    let mut inputs = Vec::with_capacity(count);
    let mut outputs = Vec::with_capacity(count);
    inputs.push(first_input);
    for _ in 1..count {
        let (reader, writer) = std::io::pipe()?;
        outputs.push(StageOutput::Pipe(writer));
        inputs.push(StageInput::Pipe(reader));
    }
    outputs.push(last_output);
    tracing::debug!(stages = count, redirect = ?pipeline.redirect, "Starting pipeline");

    // 3. Spawn.
    let tracker = TaskTracker::new();
    let (tx, rx) = mpsc::channel(1);
    let staged = count > 1;
    let stages = pipeline.stages.into_iter().zip(inputs).zip(outputs);
    for (index, ((argv, input), output)) in stages.enumerate() {
        let shell = Arc::clone(shell);
        let cancel = cancel.clone();
        let tx = tx.clone();
        tracker.spawn(async move {
            let result = commands::dispatch(&shell, argv, input, output, &cancel).await;
            let outcome = match result {
                Ok(Control::Continue) => return,
                Ok(Control::Exit) => Outcome::Exit,
                Err(e) => {
                    tracing::debug!(stage = index, error = %e, "Stage failed");
                    if staged {
                        Outcome::Failed(ShellError::Stage {
                            index,
                            source: Box::new(e),
                        })
                    } else {
                        Outcome::Failed(e)
                    }
                }
            };
            // Only the first report is kept.
            let _ = tx.try_send(outcome);
        });
    }
    tracker.close();

    Ok(PipelineRun { first: rx, tracker })
}
