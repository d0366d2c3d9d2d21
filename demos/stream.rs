//! Streaming a Llama 2 chat prediction.
//!
//! Run with: REPLICATE_API_TOKEN=... cargo run --example stream
//! Set RUST_LOG=replicate_stream=debug to watch the request lifecycle.

use replicate_stream::{Client, EventNames};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const CREATE_URL: &str = "https://api.replicate.com/v1/models/meta/llama-2-13b-chat/predictions";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Input {
    prompt: String,
    system_prompt: String,
    temperature: f64,
    top_p: f64,
    max_new_tokens: u32,
}

impl Default for Input {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            system_prompt: "You are a helpful assistant. Be concise.".into(),
            temperature: 0.75,
            top_p: 0.9,
            max_new_tokens: 256,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Create client from environment
    let client = Client::from_env()?;

    let predictor = client
        .predictor(CREATE_URL, Input::default())
        .streaming(true)
        .events(EventNames::default());

    let prediction = predictor
        .create(|input| Input {
            prompt: "Write a haiku about Rust programming.".into(),
            ..input
        })
        .await?
        .into_result()?;

    println!("Prediction {} ({})\n", prediction.id, prediction.status);

    // Print chunks as they arrive
    let mut retrieval = predictor.stream_output(&prediction);
    while let Some(chunk) = retrieval.next().await {
        print!("{}", chunk?);
    }
    println!();

    Ok(())
}
