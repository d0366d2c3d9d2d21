//! Poll-until-finished retrieval.
//!
//! By default the loop re-polls immediately once a document reports itself
//! unfinished; set [`crate::ClientBuilder::poll_interval`] to space requests
//! out.

use crate::client::Client;
use crate::error::Error;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc::Sender;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

/// Background body of [`Client::poll_with`]. Emits exactly one item.
pub(crate) async fn run_poll<O, P, X>(
    client: Client,
    url: String,
    is_finished: P,
    extract: X,
    output: Sender<String>,
    errors: Sender<Error>,
) where
    O: DeserializeOwned,
    P: Fn(&O) -> bool,
    X: FnOnce(O) -> Result<String, Error>,
{
    let mut polls: u32 = 0;

    let finished = loop {
        if output.is_closed() {
            debug!(%url, polls, "receiver dropped, polling stopped");
            return;
        }
        if let Some(max) = client.config.max_polls {
            if polls >= max {
                warn!(%url, polls, "poll limit reached");
                let _ = errors.send(Error::PollLimit(max)).await;
                return;
            }
        }

        polls += 1;
        let fetched = tokio::select! {
            fetched = client.get_json(&url) => fetched,
            () = output.closed() => {
                debug!(%url, polls, "receiver dropped, polling stopped");
                return;
            }
        };
        let document: O = match fetched {
            Ok(document) => document,
            Err(e) => {
                warn!(%url, polls, error = %e, "poll failed");
                let _ = errors.send(e).await;
                return;
            }
        };

        if is_finished(&document) {
            break document;
        }

        trace!(%url, polls, "prediction not finished");
        if let Some(delay) = jittered(client.config.poll_interval) {
            tokio::select! {
                () = sleep(delay) => {}
                () = output.closed() => {}
            }
        }
    };

    debug!(%url, polls, "prediction finished");
    match extract(finished) {
        Ok(text) => {
            let _ = output.send(text).await;
        }
        Err(e) => {
            let _ = errors.send(e).await;
        }
    }
}

/// Spread `interval` over 0.85–1.15x. `None` for a zero interval.
fn jittered(interval: Duration) -> Option<Duration> {
    if interval.is_zero() {
        return None;
    }
    let jitter = fastrand::f32() * 0.3 + 0.85;
    Some(Duration::from_secs_f32(interval.as_secs_f32() * jitter))
}
