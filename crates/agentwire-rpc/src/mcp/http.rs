use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{JsonRpcMessage, McpTransport};
use crate::error::{Result, RpcError};

const SESSION_HEADER: &str = "mcp-session-id";

/// Streamable HTTP: each message is a POST, answered with JSON or an SSE stream.
pub struct HttpTransport {
    server: String,
    url: String,
    client: Client,
    session: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new(server: &str, url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| RpcError::Mcp {
                server: server.to_string(),
                message: format!("failed to build HTTP client: {err}"),
            })?;
        Ok(Self {
            server: server.to_string(),
            url: url.to_string(),
            client,
            session: Mutex::new(None),
        })
    }

    fn error(&self, message: impl Into<String>) -> RpcError {
        RpcError::Mcp {
            server: self.server.clone(),
            message: message.into(),
        }
    }

    async fn post(&self, message: &JsonRpcMessage) -> Result<Response> {
        let mut request = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(session) = self.session.lock().await.as_deref() {
            request = request.header(SESSION_HEADER, session);
        }
        let response = request
            .send()
            .await
            .map_err(|err| self.error(format!("request failed: {err}")))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            let mut current = self.session.lock().await;
            if current.as_deref() != Some(session) {
                debug!(server = %self.server, session, "captured MCP session");
                *current = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.error(format!("HTTP {status}: {}", body.trim())));
        }
        Ok(response)
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, message: &JsonRpcMessage) -> Result<JsonRpcMessage> {
        let response = self.post(message).await?;
        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value: &HeaderValue| value.to_str().ok())
            .is_some_and(|kind| kind.starts_with("text/event-stream"));
        let body = response
            .text()
            .await
            .map_err(|err| self.error(format!("failed to read response: {err}")))?;

        if !is_stream {
            return serde_json::from_str(&body)
                .map_err(|err| self.error(format!("bad JSON-RPC response: {err}")));
        }
        for data in sse_data(&body) {
            match serde_json::from_str::<JsonRpcMessage>(&data) {
                Ok(reply) if reply.is_response() && reply.id == message.id => return Ok(reply),
                Ok(other) => {
                    debug!(server = %self.server, method = ?other.method, "skipping stream event")
                }
                Err(err) => warn!(server = %self.server, error = %err, "bad stream event"),
            }
        }
        Err(self.error("stream ended without a response"))
    }

    async fn notify(&self, message: &JsonRpcMessage) -> Result<()> {
        self.post(message).await.map(drop)
    }

    async fn close(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        let closed = self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, &session)
            .send()
            .await;
        if let Err(err) = closed {
            debug!(server = %self.server, error = %err, "failed to end MCP session");
        }
    }
}

/// The `data` payloads of the `message` events in an SSE body.
fn sse_data(body: &str) -> Vec<String> {
    let body = body.replace("\r\n", "\n");
    body.split("\n\n")
        .filter_map(|event| {
            let mut kind = None;
            let mut data: Option<String> = None;
            for line in event.lines().filter(|line| !line.starts_with(':')) {
                let (field, value) = line.split_once(':').unwrap_or((line, ""));
                let value = value.strip_prefix(' ').unwrap_or(value);
                match field {
                    "event" => kind = Some(value),
                    "data" => match data.as_mut() {
                        Some(data) => {
                            data.push('\n');
                            data.push_str(value);
                        }
                        None => data = Some(value.to_string()),
                    },
                    _ => {}
                }
            }
            data.filter(|_| kind.is_none_or(|kind| kind == "message"))
        })
        .filter(|data| !data.is_empty())
        .collect()
}
