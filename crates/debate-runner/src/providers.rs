//! OpenAI-compatible HTTP adapters for the engine's two injected capabilities.
//!
//! One [`OpenAiCompatClient`] serves both `/chat/completions` (as an
//! [`InferenceClient`]) and `/embeddings` (as an [`EmbeddingClient`]).
//! Transient failures are retried here with exponential backoff; the engine
//! itself never retries.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use consensus_engine::{
    EmbeddingClient, EmbeddingError, InferenceClient, InferenceRequest, TransportError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ProviderConfig;

/// Embedding input is cut to this many characters before sending.
pub const EMBEDDING_INPUT_CHARS: usize = 8000;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Base URL plus optional bearer token.
#[derive(Debug, Clone)]
struct Endpoint {
    base_url: String,
    api_key: Option<String>,
}

impl Endpoint {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// reqwest-backed client for any OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    chat: Endpoint,
    embeddings: Endpoint,
    embedding_model: String,
    max_retries: u32,
    request_timeout: Duration,
}

impl OpenAiCompatClient {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            chat: Endpoint {
                base_url: config.base_url.clone(),
                api_key: config.api_key.clone(),
            },
            embeddings: Endpoint {
                base_url: config.embedding_base_url.clone(),
                api_key: config.embedding_key().map(str::to_string),
            },
            embedding_model: config.embedding_model.clone(),
            max_retries: config.max_retries,
            request_timeout,
        })
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        endpoint: &Endpoint,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, TransportError> {
        let mut request = self.http.post(endpoint.url(path)).json(body);
        if let Some(key) = &endpoint.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status { status, body });
        }
        Ok(response)
    }

    fn map_reqwest_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.request_timeout.as_millis() as u64)
        } else {
            TransportError::RequestFailed(e.to_string())
        }
    }

    async fn chat_once(&self, request: &InferenceRequest) -> Result<String, TransportError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self.post_json(&self.chat, "chat/completions", &body).await?;
        let raw = response
            .text()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;
        parse_chat_response(&raw)
    }

    async fn embed_once(&self, input: &str) -> Result<Vec<f32>, TransportError> {
        let body = EmbeddingRequest {
            model: &self.embedding_model,
            input: vec![input.to_string()],
        };
        let response = self
            .post_json(&self.embeddings, "embeddings", &body)
            .await?;
        let raw = response
            .text()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;
        parse_embedding_response(&raw)
    }
}

#[async_trait]
impl InferenceClient for OpenAiCompatClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, TransportError> {
        with_retry(&request.model, self.max_retries, backoff_for, || {
            self.chat_once(request)
        })
        .await
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiCompatClient {
    fn model(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let input = prepare_embedding_input(text);
        with_retry(&self.embedding_model, self.max_retries, backoff_for, || {
            self.embed_once(&input)
        })
        .await
        .map_err(|e| match e {
            TransportError::InvalidResponse(msg) => EmbeddingError::InvalidResponse(msg),
            other => EmbeddingError::RequestFailed(other.to_string()),
        })
    }
}

/// Extract the first choice's content.
fn parse_chat_response(raw: &str) -> Result<String, TransportError> {
    let chat: ChatResponse =
        serde_json::from_str(raw).map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
    let choice = chat
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TransportError::InvalidResponse("no choices in response".into()))?;
    Ok(choice.message.content.unwrap_or_default())
}

fn parse_embedding_response(raw: &str) -> Result<Vec<f32>, TransportError> {
    let parsed: EmbeddingResponse =
        serde_json::from_str(raw).map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
    match parsed.data.into_iter().next() {
        Some(data) if !data.embedding.is_empty() => Ok(data.embedding),
        _ => Err(TransportError::InvalidResponse(
            "embedding response contained no vector".into(),
        )),
    }
}

/// Flatten newlines and cut to [`EMBEDDING_INPUT_CHARS`].
pub fn prepare_embedding_input(text: &str) -> String {
    text.chars()
        .take(EMBEDDING_INPUT_CHARS)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// Connection errors, timeouts, 429, 502 and 503 are worth another attempt.
pub fn is_transient(error: &TransportError) -> bool {
    match error {
        TransportError::RequestFailed(_) | TransportError::Timeout(_) => true,
        TransportError::Status { status, .. } => matches!(status, 429 | 502 | 503),
        TransportError::InvalidResponse(_) => false,
    }
}

/// 2s, 4s, 8s, ...
fn backoff_for(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt.saturating_add(1)))
}

/// Longest time one call can take: every attempt hits the request timeout
/// and every retry sleeps its full backoff.
pub fn worst_case_duration(max_retries: u32, request_timeout: Duration) -> Duration {
    (0..max_retries).fold(
        request_timeout.saturating_mul(max_retries.saturating_add(1)),
        |total, attempt| total.saturating_add(backoff_for(attempt)),
    )
}

/// Run `call` up to `max_retries + 1` times, sleeping `backoff(attempt)`
/// between transient failures. Non-transient errors fail immediately.
async fn with_retry<T, F, Fut, B>(
    target: &str,
    max_retries: u32,
    backoff: B,
    mut call: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
    B: Fn(u32) -> Duration,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(target_model = target, attempt, "Request succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if !is_transient(&e) || attempt >= max_retries {
                    return Err(e);
                }
                let delay = backoff(attempt);
                warn!(
                    target_model = target,
                    attempt = attempt + 1,
                    max_retries,
                    backoff_secs = delay.as_secs(),
                    error = %e,
                    "Transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_parse_chat_response() {
        let raw = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"VOTE: A"}}]}"#;
        assert_eq!(parse_chat_response(raw).unwrap(), "VOTE: A");
    }

    #[test]
    fn test_parse_chat_response_null_content_is_empty() {
        let raw = r#"{"choices":[{"message":{"content":null}}]}"#;
        assert_eq!(parse_chat_response(raw).unwrap(), "");
    }

    #[test]
    fn test_parse_chat_response_without_choices() {
        let err = parse_chat_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, TransportError::InvalidResponse(_)));
        assert!(matches!(
            parse_chat_response("<html>").unwrap_err(),
            TransportError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_parse_embedding_response() {
        let raw = r#"{"object":"list","data":[{"object":"embedding","index":0,"embedding":[0.5,-0.25,1.0]}],"model":"m"}"#;
        assert_eq!(parse_embedding_response(raw).unwrap(), vec![0.5, -0.25, 1.0]);
        assert!(parse_embedding_response(r#"{"data":[]}"#).is_err());
        assert!(parse_embedding_response(r#"{"data":[{"embedding":[]}]}"#).is_err());
    }

    #[test]
    fn test_prepare_embedding_input() {
        assert_eq!(prepare_embedding_input("a\nb\r\nc"), "a b  c");
        let long = "é".repeat(EMBEDDING_INPUT_CHARS + 10);
        assert_eq!(
            prepare_embedding_input(&long).chars().count(),
            EMBEDDING_INPUT_CHARS
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient(&TransportError::RequestFailed("connection refused".into())));
        assert!(is_transient(&TransportError::Timeout(1000)));
        for status in [429, 502, 503] {
            assert!(is_transient(&TransportError::Status {
                status,
                body: String::new()
            }));
        }
        for status in [400, 401, 404, 500] {
            assert!(!is_transient(&TransportError::Status {
                status,
                body: String::new()
            }));
        }
        assert!(!is_transient(&TransportError::InvalidResponse("bad".into())));
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_for(0), Duration::from_secs(2));
        assert_eq!(backoff_for(1), Duration::from_secs(4));
        assert_eq!(backoff_for(2), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_saturates_for_large_attempts() {
        assert_eq!(backoff_for(63), Duration::from_secs(u64::MAX));
        assert_eq!(backoff_for(u32::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_worst_case_duration() {
        assert_eq!(
            worst_case_duration(0, Duration::from_secs(30)),
            Duration::from_secs(30)
        );
        // 4 attempts of 25s plus 2 + 4 + 8 seconds of backoff
        assert_eq!(
            worst_case_duration(3, Duration::from_secs(25)),
            Duration::from_secs(114)
        );
    }

    #[test]
    fn test_endpoint_url_joins_cleanly() {
        let endpoint = Endpoint {
            base_url: "http://localhost:8080/v1/".into(),
            api_key: None,
        };
        assert_eq!(
            endpoint.url("chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = with_retry("m", 3, backoff_for, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TransportError::Status {
                        status: 503,
                        body: "busy".into(),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("m", 2, backoff_for, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::RequestFailed("reset by peer".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_skips_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry("m", 5, |_| Duration::ZERO, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(TransportError::Status {
                    status: 401,
                    body: "unauthorized".into(),
                })
            }
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            TransportError::Status { status: 401, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_client_builds_from_config() {
        let mut config = ProviderConfig::default();
        config.api_key = Some("k".into());
        let client = OpenAiCompatClient::from_config(&config).unwrap();
        assert_eq!(client.model(), config.embedding_model);
        assert_eq!(client.embeddings.api_key.as_deref(), Some("k"));
        assert_eq!(client.max_retries, config.max_retries);
    }
}
