use crate::error::Error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Body of a prediction creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest<I> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Ask the server to expose an event stream for the result.
    #[serde(default)]
    pub stream: bool,
    pub input: I,
}

impl<I> PredictionRequest<I> {
    pub fn new(input: I) -> Self {
        Self {
            version: None,
            stream: false,
            input,
        }
    }

    /// Pin a model version. An empty string clears it.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.version = (!version.is_empty()).then_some(version);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// Lifecycle state of a prediction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    #[default]
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    /// No further status changes will happen.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PredictionStatus::Starting => "starting",
            PredictionStatus::Processing => "processing",
            PredictionStatus::Succeeded => "succeeded",
            PredictionStatus::Failed => "failed",
            PredictionStatus::Canceled => "canceled",
            PredictionStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Follow-up URLs for a prediction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionUrls {
    #[serde(default, deserialize_with = "null_as_default")]
    pub cancel: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub get: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stream: String,
}

/// Server reply to a creation request. `input` echoes what was sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse<I> {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: String,
    pub input: I,
    #[serde(default, deserialize_with = "joined_output")]
    pub output: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub logs: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub error: String,
    #[serde(default)]
    pub status: PredictionStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub urls: PredictionUrls,
}

impl<I> PredictionResponse<I> {
    /// A non-empty error marks failure whatever the status says.
    pub fn is_failed(&self) -> bool {
        !self.error.is_empty()
            || matches!(self.status, PredictionStatus::Failed | PredictionStatus::Canceled)
    }

    /// Turn a failed prediction into [`Error::Remote`].
    pub fn into_result(self) -> Result<Self, Error> {
        if !self.error.is_empty() {
            return Err(Error::Remote(self.error));
        }
        match self.status {
            PredictionStatus::Failed | PredictionStatus::Canceled => {
                Err(Error::Remote(format!("prediction {}", self.status)))
            }
            _ => Ok(self),
        }
    }
}

/// A document fetched by the polling retriever.
///
/// Decoding goes through serde; the two methods are the completion predicate
/// and the extraction step.
pub trait PredictionOutput: DeserializeOwned + Send + 'static {
    /// Whether polling can stop.
    fn is_finished(&self) -> bool;

    /// Produce the final string, or the failure the document describes.
    fn extract(self) -> Result<String, Error>;
}

/// Output for models whose GET document follows the common prediction shape.
#[derive(Debug, Clone, Deserialize)]
pub struct DefaultOutput<I> {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default)]
    pub status: PredictionStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub error: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub logs: String,
    /// Output chunks; a plain string output becomes a single chunk.
    #[serde(default, deserialize_with = "output_chunks")]
    pub output: Vec<String>,
    pub input: Option<I>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub urls: PredictionUrls,
}

impl<I> PredictionOutput for DefaultOutput<I>
where
    I: DeserializeOwned + Send + 'static,
{
    fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    fn extract(self) -> Result<String, Error> {
        if !self.error.is_empty() {
            return Err(Error::Remote(self.error));
        }
        match self.status {
            PredictionStatus::Failed | PredictionStatus::Canceled => {
                Err(Error::Remote(format!("prediction {} {}", self.id, self.status)))
            }
            _ => Ok(self.output.concat()),
        }
    }
}

/// Decode `null` as the type's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOutput {
    Text(String),
    Chunks(Vec<String>),
}

fn output_chunks<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RawOutput>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(RawOutput::Text(text)) => vec![text],
        Some(RawOutput::Chunks(chunks)) => chunks,
    })
}

fn joined_output<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(output_chunks(deserializer)?.concat())
}

/// Decode a JSON body into `T`.
pub(crate) fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    #[cfg(feature = "simd-json")]
    {
        let mut scratch = body.to_vec();
        simd_json::from_slice(&mut scratch).map_err(|e| Error::decode(e.to_string()))
    }

    #[cfg(not(feature = "simd-json"))]
    {
        serde_json::from_slice(body).map_err(|e| Error::decode(e.to_string()))
    }
}
