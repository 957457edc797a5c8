//! HTTP client for `rollcall-server`.
//!
//! Documents live at `/documents/{collection}/{key}`. Live updates come from a
//! Server-Sent Events stream at `/documents/{collection}/{key}/events`; the
//! first event of every connection is the current document, so a reconnect
//! also resynchronizes.

use super::{Listener, RemoteChange, RemoteDocument, RemoteResult, RemoteStore, Subscription, WriteAck};
use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::wire::{AckBody, DocumentBody, DocumentEvent, WriteBody};
use crate::StoreKey;
use futures::future::BoxFuture;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Remote store backed by the Rollcall document server.
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: Url,
    collection: String,
    token: Option<String>,
}

impl HttpRemoteStore {
    /// Build a client. Fails when the base URL cannot address documents.
    pub fn new(config: &RemoteConfig) -> RemoteResult<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| RemoteError::Transport(format!("invalid remote url: {}", e)))?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(RemoteError::Transport(format!(
                "remote url must be http(s): {}",
                config.base_url
            )));
        }
        if config.collection.is_empty() || config.collection.contains('/') {
            return Err(RemoteError::Transport(format!(
                "invalid collection name: {:?}",
                config.collection
            )));
        }

        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            collection: config.collection.clone(),
            token: config.token.clone(),
        })
    }

    /// URL of a document, or of its event stream when `events` is set.
    pub fn document_url(&self, key: StoreKey, events: bool) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["documents", self.collection.as_str(), key.as_str()]);
            if events {
                segments.push("events");
            }
        }
        url
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_document(&self, key: StoreKey) -> RemoteResult<Option<RemoteDocument>> {
        let response = self
            .request(reqwest::Method::GET, self.document_url(key, false))
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let body: DocumentBody = response
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;

        Ok(Some(RemoteDocument {
            value: body.value,
            revision: body.revision,
        }))
    }

    async fn put_document(&self, key: StoreKey, value: Value) -> RemoteResult<WriteAck> {
        let response = self
            .request(reqwest::Method::PUT, self.document_url(key, false))
            .json(&WriteBody { value })
            .send()
            .await
            .map_err(transport)?;

        let response = check_status(response).await?;
        let ack: AckBody = response
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;

        Ok(WriteAck {
            revision: ack.revision,
        })
    }

    /// Follow the event stream for `key` until it ends or fails.
    ///
    /// Returns `true` when at least one event was delivered, which resets the
    /// reconnect backoff.
    async fn follow(&self, key: StoreKey, listener: &Listener) -> RemoteResult<bool> {
        let response = self
            .request(reqwest::Method::GET, self.document_url(key, true))
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response).await?;

        let mut delivered = false;
        let mut decoder = SseDecoder::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transport)?;
            for data in decoder.push(&chunk) {
                match serde_json::from_str::<DocumentEvent>(&data) {
                    Ok(event) => {
                        delivered = true;
                        listener(RemoteChange {
                            key,
                            value: event.value,
                            revision: event.revision,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Ignoring malformed document event");
                    }
                }
            }
        }

        Ok(delivered)
    }
}

impl RemoteStore for HttpRemoteStore {
    fn read(&self, key: StoreKey) -> BoxFuture<'_, RemoteResult<Option<RemoteDocument>>> {
        Box::pin(self.get_document(key))
    }

    fn write(&self, key: StoreKey, value: Value) -> BoxFuture<'_, RemoteResult<WriteAck>> {
        Box::pin(self.put_document(key, value))
    }

    fn subscribe(&self, key: StoreKey, listener: Listener) -> Subscription {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key = %key, "Cannot subscribe outside a tokio runtime");
            return Subscription::inert();
        };

        let store = self.clone();
        let task = runtime.spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                match store.follow(key, &listener).await {
                    Ok(true) => {
                        tracing::debug!(key = %key, "Event stream ended, reconnecting");
                        backoff = INITIAL_BACKOFF;
                    }
                    Ok(false) => {
                        tracing::debug!(key = %key, "Event stream closed without events");
                    }
                    Err(e) => {
                        tracing::warn!(
                            key = %key,
                            error = %e,
                            retry_in_ms = backoff.as_millis() as u64,
                            "Event stream failed"
                        );
                    }
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        });

        let abort = task.abort_handle();
        Subscription::new(move || abort.abort())
    }
}

fn transport(e: reqwest::Error) -> RemoteError {
    RemoteError::Transport(e.to_string())
}

async fn check_status(response: reqwest::Response) -> RemoteResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Incremental decoder for `text/event-stream` bodies.
///
/// Yields the `data` payload of each complete event. Comment lines (used as
/// keep-alives) and other fields are ignored. Bytes are buffered until a full
/// line arrives, so a multi-byte character split across chunks survives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }
        events
    }
}
