//! Event-stream retrieval: one GET, framed and routed onto channels.

use crate::client::Client;
use crate::error::Error;
use crate::router::{route, EventNames};
use crate::sse::TokenStream;
use tokio::sync::mpsc::Sender;
use tracing::{debug, warn};

/// Background body of [`Client::stream`].
///
/// Owns both senders, so every return path closes both channels.
pub(crate) async fn run_stream(
    client: Client,
    url: String,
    names: EventNames,
    output: Sender<String>,
    errors: Sender<Error>,
) {
    debug!(%url, "opening prediction stream");

    let response = match client.get_stream(&url).await {
        Ok(response) => response,
        Err(e) => {
            warn!(%url, error = %e, "stream request failed");
            let _ = errors.send(e).await;
            return;
        }
    };

    let tokens = TokenStream::with_max_frame_len(response.bytes_stream(), client.config.max_frame_len);
    let end = route(tokens, &output, &errors, &names).await;

    debug!(%url, ?end, "prediction stream closed");
}
