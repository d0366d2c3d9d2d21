//! Routes framed event-stream tokens onto output and error channels.

use crate::error::Error;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc::Sender;
use tracing::trace;

/// Event names that drive routing, plus the framing artifact width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNames {
    /// Terminates the stream successfully.
    pub done: String,
    /// Carries a chunk of output in its data field.
    pub output: String,
    /// Carries a failure message in its data field.
    pub error: String,
    /// Bytes dropped from the front of every token before parsing.
    ///
    /// Tokens after the first start with the leftover boundary newline, so the
    /// default of 1 strips exactly that. Servers that open the body without a
    /// leading byte lose the first byte of the first block under this default;
    /// setting 0 is safe for them because a leftover newline only produces an
    /// empty line, which is ignored.
    pub leading_artifact: usize,
}

impl EventNames {
    pub fn new(done: impl Into<String>, output: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            done: done.into(),
            output: output.into(),
            error: error.into(),
            leading_artifact: 1,
        }
    }

    /// Override how many leading bytes are dropped per token.
    pub fn leading_artifact(mut self, bytes: usize) -> Self {
        self.leading_artifact = bytes;
        self
    }
}

impl Default for EventNames {
    fn default() -> Self {
        Self::new("done", "output", "error")
    }
}

/// One parsed event block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSentEvent {
    pub event: String,
    pub data: String,
}

impl ServerSentEvent {
    /// Parse a token after dropping `skip` leading bytes.
    ///
    /// `event: ` sets the name (last one wins); every `data: ` line is appended
    /// to the data with no separator. Other lines are ignored.
    pub fn parse(token: &[u8], skip: usize) -> Self {
        let body = token.get(skip..).unwrap_or_default();
        let text = String::from_utf8_lossy(body);

        let mut event = Self::default();
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(name) = line.strip_prefix("event: ") {
                event.event.clear();
                event.event.push_str(name);
            } else if let Some(data) = line.strip_prefix("data: ") {
                event.data.push_str(data);
            }
        }
        event
    }
}

/// Why routing stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The done event arrived.
    Done,
    /// An error event or a token-source error was forwarded.
    Failed,
    /// The token source ended without a done event.
    Exhausted,
    /// The output receiver was dropped.
    Disconnected,
}

/// Consume `tokens`, dispatching each event by name.
///
/// Never closes the channels; the caller owns the senders and drops them
/// once this returns.
pub async fn route<S, B>(
    tokens: S,
    output: &Sender<String>,
    errors: &Sender<Error>,
    names: &EventNames,
) -> Termination
where
    S: Stream<Item = Result<B, Error>>,
    B: AsRef<[u8]>,
{
    futures::pin_mut!(tokens);

    loop {
        // Events that never reach the output channel must not keep a
        // dropped receiver's connection open.
        let next = tokio::select! {
            next = tokens.next() => next,
            () = output.closed() => return Termination::Disconnected,
        };
        let Some(token) = next else {
            break;
        };
        let token = match token {
            Ok(token) => token,
            Err(e) => {
                let _ = errors.send(e).await;
                return Termination::Failed;
            }
        };

        let event = ServerSentEvent::parse(token.as_ref(), names.leading_artifact);
        trace!(event = %event.event, data_len = event.data.len(), "event received");

        if event.event == names.done {
            return Termination::Done;
        } else if event.event == names.output {
            if output.send(event.data).await.is_err() {
                return Termination::Disconnected;
            }
        } else if event.event == names.error {
            let _ = errors.send(Error::Remote(event.data)).await;
            return Termination::Failed;
        }
    }

    Termination::Exhausted
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn source(tokens: &[&'static str]) -> impl Stream<Item = Result<Bytes, Error>> {
        futures::stream::iter(
            tokens
                .iter()
                .copied()
                .map(|t| Ok::<_, Error>(Bytes::from_static(t.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    /// Route on a spawned task that owns the senders, then drain both channels
    /// until they close.
    async fn run<S>(tokens: S, names: EventNames) -> (Vec<String>, Vec<Error>, Termination)
    where
        S: Stream<Item = Result<Bytes, Error>> + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (err_tx, mut err_rx) = mpsc::channel(16);
        let task = tokio::spawn(async move { route(tokens, &out_tx, &err_tx, &names).await });

        let mut outputs = Vec::new();
        while let Some(s) = out_rx.recv().await {
            outputs.push(s);
        }
        let mut errors = Vec::new();
        while let Some(e) = err_rx.recv().await {
            errors.push(e);
        }
        (outputs, errors, task.await.unwrap())
    }

    #[test]
    fn test_parse_event_and_data() {
        let event = ServerSentEvent::parse(b"\nevent: output\ndata: hello", 1);
        assert_eq!(event.event, "output");
        assert_eq!(event.data, "hello");
    }

    #[test]
    fn test_parse_multiline_data_merges_without_separator() {
        let event = ServerSentEvent::parse(b"xevent: output\ndata: foo\ndata: bar\n", 1);
        assert_eq!(event.data, "foobar");
    }

    #[test]
    fn test_parse_crlf_lines() {
        let event = ServerSentEvent::parse(b"\nevent: output\r\ndata: hi\r\n", 1);
        assert_eq!(event.event, "output");
        assert_eq!(event.data, "hi");
    }

    #[test]
    fn test_parse_ignores_other_fields() {
        let event = ServerSentEvent::parse(b"\nid: 42\nevent: output\n: keep-alive\ndata: x", 1);
        assert_eq!(event.event, "output");
        assert_eq!(event.data, "x");
    }

    #[test]
    fn test_parse_drops_exactly_one_leading_byte() {
        // No leading artifact: the first byte of the event line is lost.
        let event = ServerSentEvent::parse(b"event: output\ndata: hi", 1);
        assert_eq!(event.event, "");
        assert_eq!(event.data, "hi");

        let event = ServerSentEvent::parse(b"event: output\ndata: hi", 0);
        assert_eq!(event.event, "output");
    }

    #[test]
    fn test_parse_short_tokens() {
        assert_eq!(ServerSentEvent::parse(b"", 1), ServerSentEvent::default());
        assert_eq!(ServerSentEvent::parse(b"\n", 1), ServerSentEvent::default());
    }

    #[test]
    fn test_parse_data_prefix_requires_space() {
        let event = ServerSentEvent::parse(b"\nevent: output\ndata:tight", 1);
        assert_eq!(event.data, "");
    }

    #[tokio::test]
    async fn test_route_happy_path() {
        let tokens = source(&["xevent: output\ndata: hello\n\n", "xevent: done\n\n"]);
        let (outputs, errors, end) = run(tokens, EventNames::default()).await;

        assert_eq!(outputs, vec!["hello"]);
        assert!(errors.is_empty());
        assert_eq!(end, Termination::Done);
    }

    #[tokio::test]
    async fn test_route_error_event_stops() {
        let tokens = source(&[
            "\nevent: error\ndata: boom",
            "\nevent: output\ndata: late",
            "\nevent: done",
        ]);
        let (outputs, errors, end) = run(tokens, EventNames::default()).await;

        assert!(outputs.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], Error::Remote(m) if m == "boom"));
        assert_eq!(errors[0].to_string(), "boom");
        assert_eq!(end, Termination::Failed);
    }

    #[tokio::test]
    async fn test_route_done_stops_reading() {
        let tokens = source(&["\nevent: done", "\nevent: output\ndata: never"]);
        let (outputs, errors, end) = run(tokens, EventNames::default()).await;

        assert!(outputs.is_empty());
        assert!(errors.is_empty());
        assert_eq!(end, Termination::Done);
    }

    #[tokio::test]
    async fn test_route_ignores_unknown_and_unnamed() {
        let tokens = source(&[
            "\nevent: logs\ndata: loading weights",
            "\ndata: orphan",
            "\nevent: output\ndata: a",
            "\nevent: output\ndata: b",
        ]);
        let (outputs, errors, end) = run(tokens, EventNames::default()).await;

        assert_eq!(outputs, vec!["a", "b"]);
        assert!(errors.is_empty());
        assert_eq!(end, Termination::Exhausted);
    }

    #[tokio::test]
    async fn test_route_custom_names() {
        let names = EventNames::new("end", "token", "fail");
        let tokens = source(&["\nevent: output\ndata: skipped", "\nevent: token\ndata: kept", "\nevent: end"]);
        let (outputs, _, end) = run(tokens, names).await;

        assert_eq!(outputs, vec!["kept"]);
        assert_eq!(end, Termination::Done);
    }

    #[tokio::test]
    async fn test_route_forwards_source_error() {
        let tokens = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"\nevent: output\ndata: a")),
            Err(Error::FrameTooLarge(4)),
            Ok(Bytes::from_static(b"\nevent: output\ndata: b")),
        ]);
        let (outputs, errors, end) = run(tokens, EventNames::default()).await;

        assert_eq!(outputs, vec!["a"]);
        assert!(matches!(errors[..], [Error::FrameTooLarge(4)]));
        assert_eq!(end, Termination::Failed);
    }

    #[tokio::test]
    async fn test_route_stops_when_receiver_dropped() {
        let (out_tx, out_rx) = mpsc::channel(1);
        let (err_tx, _err_rx) = mpsc::channel(1);
        drop(out_rx);

        let tokens = source(&["\nevent: output\ndata: a", "\nevent: done"]);
        let end = route(tokens, &out_tx, &err_tx, &EventNames::default()).await;
        assert_eq!(end, Termination::Disconnected);
    }

    #[tokio::test]
    async fn test_route_idle_stream_stops_when_receiver_dropped() {
        // Log events only, then a body that never ends.
        let tokens = source(&["\nevent: logs\ndata: loading", "\nevent: logs\ndata: warming up"])
            .chain(futures::stream::pending());
        let (out_tx, out_rx) = mpsc::channel(1);
        let (err_tx, _err_rx) = mpsc::channel(1);
        let task = tokio::spawn(async move { route(tokens, &out_tx, &err_tx, &EventNames::default()).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        drop(out_rx);

        let end = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("route kept reading after the receiver was dropped")
            .unwrap();
        assert_eq!(end, Termination::Disconnected);
    }
}
