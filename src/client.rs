//! HTTP client, configuration and prediction submission.

use crate::error::Error;
use crate::poll::run_poll;
use crate::retrieval::Retrieval;
use crate::router::EventNames;
use crate::sse::DEFAULT_MAX_FRAME_LEN;
use crate::stream::run_stream;
use crate::types::*;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Environment variable read by [`ClientBuilder::from_env`].
pub const API_TOKEN_ENV: &str = "REPLICATE_API_TOKEN";

/// Client for creating predictions and retrieving their results.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    auth: HeaderValue,
    pub(crate) config: ClientConfig,
}

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Timeout for submission and each polling GET. Never applied to streams.
    pub timeout: Duration,
    /// TCP connect timeout for every request.
    pub connect_timeout: Duration,
    /// Delay between polls. Zero re-polls immediately.
    pub poll_interval: Duration,
    /// Give up polling after this many GETs.
    pub max_polls: Option<u32>,
    /// Output channel capacity of each retrieval.
    pub channel_capacity: usize,
    /// Largest event block the stream retriever buffers.
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
            poll_interval: Duration::ZERO,
            max_polls: None,
            channel_capacity: 1,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

/// Builder for Client.
pub struct ClientBuilder {
    api_key: Option<String>,
    config: ClientConfig,
    http_builder: reqwest::ClientBuilder,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            api_key: None,
            config: ClientConfig::default(),
            http_builder: reqwest::Client::builder()
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_nodelay(true),
        }
    }

    /// Set the API key sent as a bearer token.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the submission/polling request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Wait roughly this long between polls (jittered ±15%).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Cap the number of polling GETs.
    pub fn max_polls(mut self, polls: u32) -> Self {
        self.config.max_polls = Some(polls);
        self
    }

    /// Set the output channel capacity of each retrieval.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the largest event block the stream retriever buffers.
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.config.max_frame_len = len;
        self
    }

    /// Load the API key from `REPLICATE_API_TOKEN` if set.
    pub fn from_env(mut self) -> Self {
        if let Ok(key) = env::var(API_TOKEN_ENV) {
            self.api_key = Some(key);
        }
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client, Error> {
        let api_key = self
            .api_key
            .filter(|key| !key.is_empty())
            .ok_or(Error::MissingApiKey)?;

        if self.config.channel_capacity == 0 {
            return Err(Error::Config("channel capacity must be at least 1".into()));
        }
        if self.config.max_frame_len == 0 {
            return Err(Error::Config("max frame length must be at least 1".into()));
        }

        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| Error::Config(format!("api key: {e}")))?;
        auth.set_sensitive(true);

        let http = self
            .http_builder
            .connect_timeout(self.config.connect_timeout)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Client {
            http,
            auth,
            config: self.config,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self, Error> {
        ClientBuilder::new().from_env().build()
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start a predictor for one model endpoint.
    ///
    /// `base_input` carries the model defaults; each submission starts from a
    /// copy of it.
    pub fn predictor<I>(&self, create_url: impl Into<String>, base_input: I) -> Predictor<I> {
        Predictor {
            client: self.clone(),
            create_url: create_url.into(),
            base: PredictionRequest::new(base_input),
            events: EventNames::default(),
        }
    }

    /// POST a creation request and decode the reply. No retry.
    pub async fn submit<I>(
        &self,
        url: &str,
        request: &PredictionRequest<I>,
    ) -> Result<PredictionResponse<I>, Error>
    where
        I: Serialize + DeserializeOwned,
    {
        let response = self
            .http
            .post(url)
            .headers(self.json_headers())
            .timeout(self.config.timeout)
            .json(request)
            .send()
            .await?;

        let body = error_for_status(response).await?.bytes().await?;
        let prediction: PredictionResponse<I> = decode_json(&body)?;

        debug!(
            id = %prediction.id,
            status = %prediction.status,
            stream = request.stream,
            "prediction created"
        );
        Ok(prediction)
    }

    /// Poll `url` until the output reports itself finished.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn poll<O: PredictionOutput>(&self, url: impl Into<String>) -> Retrieval {
        self.poll_with(url, O::is_finished, O::extract)
    }

    /// Poll `url` with an explicit completion predicate and extraction step.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn poll_with<O, P, X>(&self, url: impl Into<String>, is_finished: P, extract: X) -> Retrieval
    where
        O: DeserializeOwned + Send + 'static,
        P: Fn(&O) -> bool + Send + 'static,
        X: FnOnce(O) -> Result<String, Error> + Send + 'static,
    {
        let client = self.clone();
        let url = url.into();
        Retrieval::spawn(self.config.channel_capacity, move |output, errors| {
            run_poll(client, url, is_finished, extract, output, errors)
        })
    }

    /// Consume the event stream at `url`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn stream(&self, url: impl Into<String>, names: EventNames) -> Retrieval {
        let client = self.clone();
        let url = url.into();
        Retrieval::spawn(self.config.channel_capacity, move |output, errors| {
            run_stream(client, url, names, output, errors)
        })
    }

    /// GET `url` and decode the JSON body.
    pub(crate) async fn get_json<O: DeserializeOwned>(&self, url: &str) -> Result<O, Error> {
        let response = self
            .http
            .get(url)
            .headers(self.json_headers())
            .timeout(self.config.timeout)
            .send()
            .await?;

        let body = error_for_status(response).await?.bytes().await?;
        decode_json(&body)
    }

    /// Open an event-stream GET on `url`.
    pub(crate) async fn get_stream(&self, url: &str) -> Result<reqwest::Response, Error> {
        let response = self
            .http
            .get(url)
            .headers(self.stream_headers())
            .send()
            .await?;
        error_for_status(response).await
    }

    fn json_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.auth.clone());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn stream_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.auth.clone());
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers
    }
}

/// Convert a non-success response into [`Error::Api`].
async fn error_for_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(Error::api(status.as_u16(), error_message(body)))
}

/// Pull a human-readable message out of an error body.
fn error_message(body: String) -> String {
    serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v["detail"]
                .as_str()
                .or_else(|| v["error"].as_str())
                .or_else(|| v["error"]["message"].as_str())
                .map(std::string::ToString::to_string)
        })
        .unwrap_or(body)
}

/// Prediction submission for one model endpoint.
///
/// Holds the baseline request; [`Predictor::create`] never mutates it.
pub struct Predictor<I> {
    client: Client,
    create_url: String,
    base: PredictionRequest<I>,
    events: EventNames,
}

impl<I> Predictor<I> {
    /// Pin a model version. An empty string means "none".
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.base = self.base.with_version(version);
        self
    }

    /// Ask the server to serve results as an event stream.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.base.stream = stream;
        self
    }

    /// Event names used by [`Predictor::stream_output`].
    pub fn events(mut self, names: EventNames) -> Self {
        self.events = names;
        self
    }

    pub fn base_input(&self) -> &I {
        &self.base.input
    }

    pub fn create_url(&self) -> &str {
        &self.create_url
    }

    /// Poll `prediction.urls.get` for output of type `O`.
    pub fn poll_output<O: PredictionOutput>(&self, prediction: &PredictionResponse<I>) -> Retrieval {
        self.client.poll::<O>(prediction.urls.get.as_str())
    }

    /// Stream `prediction.urls.stream` using this predictor's event names.
    pub fn stream_output(&self, prediction: &PredictionResponse<I>) -> Retrieval {
        self.client
            .stream(prediction.urls.stream.as_str(), self.events.clone())
    }
}

impl<I> Predictor<I>
where
    I: Clone + Serialize + DeserializeOwned,
{
    /// Submit a prediction.
    ///
    /// `customize` receives a copy of the baseline input and returns the
    /// complete input to send.
    pub async fn create<F>(&self, customize: F) -> Result<PredictionResponse<I>, Error>
    where
        F: FnOnce(I) -> I,
    {
        let request = PredictionRequest {
            version: self.base.version.clone(),
            stream: self.base.stream,
            input: customize(self.base.input.clone()),
        };
        self.client.submit(&self.create_url, &request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builder() {
        let client = Client::builder()
            .api_key("test-key")
            .timeout(Duration::from_secs(60))
            .poll_interval(Duration::from_millis(250))
            .max_polls(5)
            .channel_capacity(4)
            .build()
            .unwrap();

        assert_eq!(client.config.timeout, Duration::from_secs(60));
        assert_eq!(client.config.poll_interval, Duration::from_millis(250));
        assert_eq!(client.config.max_polls, Some(5));
        assert_eq!(client.config.channel_capacity, 4);
    }

    #[test]
    fn test_defaults_repoll_immediately() {
        let config = ClientConfig::default();
        assert_eq!(config.poll_interval, Duration::ZERO);
        assert_eq!(config.max_polls, None);
        assert_eq!(config.channel_capacity, 1);
    }

    #[test]
    fn test_missing_api_key() {
        assert!(matches!(Client::builder().build(), Err(Error::MissingApiKey)));
        assert!(matches!(
            Client::builder().api_key("").build(),
            Err(Error::MissingApiKey)
        ));
    }

    #[test]
    fn test_invalid_settings() {
        let err = Client::builder().api_key("k").channel_capacity(0).build();
        assert!(matches!(err, Err(Error::Config(_))));

        let err = Client::builder().api_key("bad\nkey").build();
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_headers() {
        let client = Client::builder().api_key("secret").build().unwrap();

        let json = client.json_headers();
        assert_eq!(json[AUTHORIZATION], "Bearer secret");
        assert_eq!(json[CONTENT_TYPE], "application/json");

        let stream = client.stream_headers();
        assert_eq!(stream[AUTHORIZATION], "Bearer secret");
        assert_eq!(stream[ACCEPT], "text/event-stream");
        assert_eq!(stream[CACHE_CONTROL], "no-store");
        assert!(stream.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_predictor_builder() {
        let client = Client::builder().api_key("k").build().unwrap();
        let predictor = client
            .predictor("https://api.example.com/v1/predictions", "base".to_string())
            .version("")
            .streaming(true)
            .events(EventNames::new("end", "token", "fail"));

        assert_eq!(predictor.base.version, None);
        assert!(predictor.base.stream);
        assert_eq!(predictor.base_input(), "base");
        assert_eq!(predictor.events.output, "token");
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"detail":"Invalid token."}"#.into()), "Invalid token.");
        assert_eq!(error_message(r#"{"error":{"message":"nope"}}"#.into()), "nope");
        assert_eq!(error_message("bad gateway".into()), "bad gateway");
    }
}
