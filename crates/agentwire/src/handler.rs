use agentwire_channels::{ChannelError, IncomingMessage, MessageHandler};
use agentwire_rpc::{RpcDispatcher, RpcReply};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Token cap for channel-originated completions.
pub const CHANNEL_MAX_TOKENS: u64 = 4096;

const NO_TEXT: &str = "(no text in response)";

/// Answers chat messages by forwarding them as `api` requests through the
/// same dispatcher devices use.
pub struct CompletionHandler {
    dispatcher: RpcDispatcher,
}

impl CompletionHandler {
    pub fn new(dispatcher: RpcDispatcher) -> Self {
        Self { dispatcher }
    }
}

fn api_request(text: &str) -> Vec<u8> {
    let body = json!({
        "messages": [{"role": "user", "content": text}],
        "max_tokens": CHANNEL_MAX_TOKENS,
    });
    json!({"type": "api", "body": body.to_string()})
        .to_string()
        .into_bytes()
}

/// Join the text blocks of a Messages API response.
fn response_text(body: &str) -> Result<String, ChannelError> {
    let body: Value = serde_json::from_str(body)?;
    let parts: Vec<&str> = body["content"]
        .as_array()
        .map(|blocks| {
            blocks
                .iter()
                .filter(|block| block["type"] == "text")
                .filter_map(|block| block["text"].as_str())
                .collect()
        })
        .unwrap_or_default();
    if parts.is_empty() {
        Ok(NO_TEXT.to_string())
    } else {
        Ok(parts.join("\n"))
    }
}

#[async_trait]
impl MessageHandler for CompletionHandler {
    async fn handle(&self, message: &IncomingMessage) -> agentwire_channels::Result<String> {
        match self.dispatcher.dispatch_reply(&api_request(&message.text)).await {
            RpcReply::Api(result) => match (result.body, result.error) {
                (_, Some(error)) => Err(ChannelError::Handler(error)),
                (Some(body), None) => response_text(&body),
                (None, None) => Ok(NO_TEXT.to_string()),
            },
            RpcReply::Error { error } => Err(ChannelError::Handler(error)),
            RpcReply::Tool(result) => Err(ChannelError::Handler(format!(
                "unexpected tool reply: {}",
                result.output
            ))),
        }
    }
}
