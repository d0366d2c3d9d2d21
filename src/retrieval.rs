//! Output/error channel pair owned by one background retrieval task.

use crate::error::Error;
use std::future::Future;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;

/// Receiving end of a poll or stream retrieval.
///
/// The background task is the only sender on both channels and closes them
/// when it returns. A value on `output` followed by closure means success; a
/// value on `errors` means failure. Dropping the `Retrieval` closes the output
/// channel, which stops the task even while it waits on the network.
pub struct Retrieval {
    output: Receiver<String>,
    errors: Receiver<Error>,
    task: JoinHandle<()>,
    output_open: bool,
    errors_open: bool,
}

impl Retrieval {
    /// Spawn `run` with fresh senders.
    ///
    /// The error channel holds one item because a task emits at most one error.
    pub(crate) fn spawn<F, Fut>(capacity: usize, run: F) -> Self
    where
        F: FnOnce(Sender<String>, Sender<Error>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (output_tx, output) = mpsc::channel(capacity.max(1));
        let (errors_tx, errors) = mpsc::channel(1);
        let task = tokio::spawn(run(output_tx, errors_tx));

        Self {
            output,
            errors,
            task,
            output_open: true,
            errors_open: true,
        }
    }

    /// Next output string or error.
    ///
    /// Pending output is always returned before a pending error, so every
    /// output sent ahead of a failure is seen first. `None` once both channels
    /// are closed.
    pub async fn next(&mut self) -> Option<Result<String, Error>> {
        loop {
            tokio::select! {
                biased;

                item = self.output.recv(), if self.output_open => match item {
                    Some(text) => return Some(Ok(text)),
                    None => self.output_open = false,
                },
                item = self.errors.recv(), if self.errors_open => match item {
                    Some(e) => return Some(Err(e)),
                    None => self.errors_open = false,
                },
                else => return None,
            }
        }
    }

    /// Drain everything and concatenate the outputs.
    ///
    /// Returns the first error instead if one arrives.
    pub async fn concat(mut self) -> Result<String, Error> {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            text.push_str(&item?);
        }
        Ok(text)
    }

    /// Stop the background task. Both channels close once it unwinds.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Whether the background task has returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Hand out the raw receivers. The task keeps running detached.
    pub fn into_channels(self) -> (Receiver<String>, Receiver<Error>) {
        (self.output, self.errors)
    }
}
