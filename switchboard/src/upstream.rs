//! Upstream clients: one per configured provider.
//!
//! An [`Upstream`] owns its HTTP client and its circuit breaker, knows its
//! wire format, and carries an optional fallback pointer. The whole HTTP
//! round trip runs inside the breaker; transport-level retries happen
//! *inside* one breaker operation so only the final outcome is recorded.
//! Format translation happens here when the upstream speaks the
//! chat-completions protocol; A-format upstreams get the inbound body
//! verbatim (header normalisation only).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::error::Error;
use crate::protocol::anthropic::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::protocol::openai::{ChatCompletionChunk, ChatCompletionResponse};
use crate::translate::{request_a_to_b, response_b_to_a};
use crate::translate::stream::StreamTranslator;

const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Wire format an upstream speaks. Two cases only; no further variants are
/// planned, so this is a closed enum rather than a trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// The messages protocol (`POST {base}/v1/messages`).
    Anthropic,
    /// The chat-completions protocol (`POST {base}/v1/chat/completions`).
    OpenAi,
}

/// Static configuration for one upstream.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub name: String,
    pub format: WireFormat,
    pub base_url: String,
    pub api_key: Option<String>,
    pub max_retries: u32,
    pub breaker: BreakerConfig,
    pub fallback: Option<String>,
}

/// Everything needed to forward one request, reusable across the primary
/// and fallback attempts.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// Parsed inbound envelope.
    pub request: MessagesRequest,
    /// Raw inbound body, forwarded verbatim on the passthrough path.
    pub raw_body: Bytes,
    /// Model name the upstream should see (routing may have rewritten it).
    pub target_model: String,
    /// Inbound `x-api-key`, passed through to A-format upstreams that have
    /// no key of their own.
    pub client_api_key: Option<String>,
    /// Inbound `anthropic-version`, echoed to A-format upstreams.
    pub anthropic_version: Option<String>,
}

/// What came back from an upstream, already in protocol-A terms.
pub enum UpstreamReply {
    /// Verbatim A-format JSON body.
    Body { status: u16, body: Bytes },
    /// Translated response from a chat-completions upstream.
    Translated(Box<MessagesResponse>),
    /// Verbatim A-format SSE bytes.
    ByteStream(futures_util::stream::BoxStream<'static, Result<Bytes, Error>>),
    /// Translated A-format event stream. Mid-stream failures terminate it
    /// with the synthetic error trailer; the transport error itself is
    /// logged for the orchestrator.
    Events(ReceiverStream<StreamEvent>),
}

/// True for the failure kinds the breaker counts: transport errors, 5xx,
/// and 429. Other 4xx mean the upstream is healthy and the caller is wrong.
pub fn counts_against_breaker(error: &Error) -> bool {
    match error {
        Error::UpstreamTransport(_) => true,
        Error::UpstreamHttp { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

pub struct Upstream {
    name: String,
    format: WireFormat,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    fallback: Option<String>,
    breaker: CircuitBreaker,
    http: reqwest::Client,
}

impl Upstream {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            name: config.name,
            format: config.format,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            max_retries: config.max_retries,
            fallback: config.fallback,
            breaker: CircuitBreaker::new(config.breaker),
            http: reqwest::Client::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Forwards one request through the breaker. Transport retries with
    /// exponential backoff (100 ms × 2^attempt, capped at 2 s) happen
    /// inside; the breaker sees one operation and its final outcome.
    pub async fn forward(&self, forward: &ForwardRequest) -> Result<UpstreamReply, Error> {
        if self.breaker.admit().is_err() {
            return Err(Error::CircuitOpen(self.name.clone()));
        }
        let result = self.round_trip(forward).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(error) if counts_against_breaker(error) => {
                tracing::warn!(upstream = %self.name, %error, "breaker-counted failure");
                self.breaker.record_failure();
            }
            // Client-fault statuses prove the upstream healthy.
            Err(_) => self.breaker.record_success(),
        }
        result
    }

    async fn round_trip(&self, forward: &ForwardRequest) -> Result<UpstreamReply, Error> {
        let mut attempt: u32 = 0;
        loop {
            match self.send_once(forward).await {
                Err(Error::UpstreamTransport(message)) if attempt < self.max_retries => {
                    let delay = Duration::from_millis(
                        100u64.saturating_mul(1u64 << attempt.min(5)),
                    )
                    .min(Duration::from_secs(2));
                    tracing::debug!(
                        upstream = %self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient transport error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send_once(&self, forward: &ForwardRequest) -> Result<UpstreamReply, Error> {
        match self.format {
            WireFormat::Anthropic => self.send_messages(forward).await,
            WireFormat::OpenAi => self.send_chat_completions(forward).await,
        }
    }

    async fn send_messages(&self, forward: &ForwardRequest) -> Result<UpstreamReply, Error> {
        let url = format!("{}/v1/messages", self.base_url);
        let api_key = self
            .api_key
            .as_deref()
            .or(forward.client_api_key.as_deref());
        let version = forward
            .anthropic_version
            .as_deref()
            .unwrap_or(DEFAULT_ANTHROPIC_VERSION);

        let mut builder = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .header("anthropic-version", version)
            .body(forward.raw_body.clone());
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::UpstreamTransport(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamHttp { status, body });
        }

        if forward.request.stream {
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| Error::UpstreamTransport(e.to_string())))
                .boxed();
            Ok(UpstreamReply::ByteStream(stream))
        } else {
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::UpstreamTransport(e.to_string()))?;
            Ok(UpstreamReply::Body { status, body })
        }
    }

    async fn send_chat_completions(&self, forward: &ForwardRequest) -> Result<UpstreamReply, Error> {
        let translated = request_a_to_b(&forward.request, &forward.target_model)?;
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut builder = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&translated);
        if let Some(key) = self.api_key.as_deref() {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::UpstreamTransport(e.to_string()))?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamHttp { status, body });
        }

        if forward.request.stream {
            Ok(UpstreamReply::Events(spawn_stream_translation(
                response,
                forward.request.model.clone(),
            )))
        } else {
            let body: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|e| Error::TranslationInput(e.to_string()))?;
            let translated = response_b_to_a(&body, &forward.request.model)?;
            Ok(UpstreamReply::Translated(Box::new(translated)))
        }
    }
}

/// Drives the chat-completions SSE stream through a [`StreamTranslator`] on
/// its own task, delivering A-format events over a channel (the receiver
/// side is the response body).
fn spawn_stream_translation(
    response: reqwest::Response,
    client_model: String,
) -> ReceiverStream<StreamEvent> {
    let (tx, rx) = mpsc::channel::<StreamEvent>(64);
    let message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
    let mut translator = StreamTranslator::new(message_id, client_model);
    let mut events = response.bytes_stream().eventsource();

    tokio::spawn(async move {
        async fn emit(tx: &mpsc::Sender<StreamEvent>, events: Vec<StreamEvent>) -> bool {
            for event in events {
                if tx.send(event).await.is_err() {
                    return false;
                }
            }
            true
        }

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if event.data.trim() == "[DONE]" {
                        let _ = emit(&tx, translator.finalize()).await;
                        return;
                    }
                    match serde_json::from_str::<ChatCompletionChunk>(&event.data) {
                        Ok(chunk) => {
                            if !emit(&tx, translator.process(&chunk)).await {
                                return;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(%error, "malformed upstream stream chunk");
                            let _ = emit(
                                &tx,
                                translator.fail(
                                    "translation_input_error",
                                    &format!("malformed upstream chunk: {error}"),
                                ),
                            )
                            .await;
                            return;
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "upstream stream transport error");
                    let _ = emit(
                        &tx,
                        translator
                            .fail("upstream_transport_error", &error.to_string()),
                    )
                    .await;
                    return;
                }
            }
        }
        // Stream ended without the [DONE] sentinel; close out what we have.
        let _ = emit(&tx, translator.finalize()).await;
    });

    ReceiverStream::new(rx)
}

/// Outcome of [`UpstreamRegistry::forward_with_fallback`].
pub struct ForwardResult {
    pub reply: UpstreamReply,
    /// Name of the upstream that actually served the request.
    pub upstream: String,
    pub fallback_used: bool,
}

/// All configured upstreams, keyed by name. Read-only after startup; each
/// upstream's breaker is the only mutable state inside.
pub struct UpstreamRegistry {
    upstreams: HashMap<String, Arc<Upstream>>,
}

impl UpstreamRegistry {
    pub fn new(configs: impl IntoIterator<Item = UpstreamConfig>) -> Self {
        let upstreams = configs
            .into_iter()
            .map(|config| (config.name.clone(), Arc::new(Upstream::new(config))))
            .collect();
        Self { upstreams }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Upstream>> {
        self.upstreams.get(name).cloned()
    }

    /// Forwards via the named upstream; on a breaker-counted failure (or a
    /// fail-fast open circuit) retries the whole request once against the
    /// configured fallback. The fallback attempt is terminal: its own
    /// breaker applies, its own fallback pointer does not.
    pub async fn forward_with_fallback(
        &self,
        name: &str,
        forward: &ForwardRequest,
    ) -> Result<ForwardResult, Error> {
        let primary = self
            .get(name)
            .ok_or_else(|| Error::Validation(format!("unknown upstream '{name}'")))?;

        let primary_error = match primary.forward(forward).await {
            Ok(reply) => {
                return Ok(ForwardResult {
                    reply,
                    upstream: primary.name().to_string(),
                    fallback_used: false,
                })
            }
            Err(error) => error,
        };

        let eligible = counts_against_breaker(&primary_error)
            || matches!(primary_error, Error::CircuitOpen(_));
        let fallback = primary.fallback().and_then(|name| self.get(name));
        let (Some(fallback), true) = (fallback, eligible) else {
            return Err(primary_error);
        };

        tracing::info!(
            primary = %primary.name(),
            fallback = %fallback.name(),
            error = %primary_error,
            "primary failed, retrying against fallback"
        );
        let reply = fallback.forward(forward).await?;
        Ok(ForwardResult {
            reply,
            upstream: fallback.name().to_string(),
            fallback_used: true,
        })
    }
}
