//! Async client for long-running remote prediction jobs.
//!
//! Submit a prediction, then retrieve its result either by polling the `get`
//! URL until the output reports itself finished, or by consuming the live
//! event stream at the `stream` URL. Both strategies run on a background task
//! and hand back a [`Retrieval`]: an output channel and an error channel that
//! the task closes when it is done.
//!
//! # Example
//! ```no_run
//! use replicate_stream::{Client, EventNames};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Input {
//!     prompt: String,
//!     max_new_tokens: u32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), replicate_stream::Error> {
//!     let client = Client::from_env()?;
//!     let predictor = client
//!         .predictor(
//!             "https://api.replicate.com/v1/models/meta/llama-2-13b-chat/predictions",
//!             Input { prompt: String::new(), max_new_tokens: 500 },
//!         )
//!         .streaming(true)
//!         .events(EventNames::default());
//!
//!     let prediction = predictor
//!         .create(|input| Input { prompt: "Hello!".into(), ..input })
//!         .await?;
//!
//!     let mut retrieval = predictor.stream_output(&prediction);
//!     while let Some(chunk) = retrieval.next().await {
//!         print!("{}", chunk?);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
mod poll;
pub mod retrieval;
pub mod router;
pub mod sse;
mod stream;
pub mod types;

pub use client::{Client, ClientBuilder, ClientConfig, Predictor};
pub use error::Error;
pub use retrieval::Retrieval;
pub use router::{EventNames, ServerSentEvent, Termination};
pub use sse::{split_frame, Frame, TokenStream};
pub use types::*;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
