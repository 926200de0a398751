//! Minimal JSON-RPC 2.0 client over reqwest
//!
//! Shared by the bundler relay and the gas price oracle, which both speak
//! JSON-RPC against the same endpoint.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default per-request HTTP timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

/// JSON-RPC client bound to one endpoint
#[derive(Debug)]
pub struct JsonRpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Call `method` and decode its `result`; a `null` result decodes into
    /// `Option::None` when `R` is an `Option`
    pub async fn request<P, R>(&self, method: &str, params: P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::trace!(method, id, "JSON-RPC request");

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RpcError::Http(e.to_string()))?;

        let parsed: Response = serde_json::from_str(&text).map_err(|e| {
            if status.is_success() {
                RpcError::Decode(e.to_string())
            } else {
                RpcError::Http(format!("status {}: {}", status, truncate(&text)))
            }
        })?;

        if let Some(error) = parsed.error {
            let message = match error.data {
                Some(Value::String(detail)) if !error.message.contains(&detail) => {
                    format!("{} ({})", error.message, detail)
                }
                _ => error.message,
            };
            return Err(RpcError::Rpc {
                code: error.code,
                message,
            });
        }

        serde_json::from_value(parsed.result.unwrap_or(Value::Null))
            .map_err(|e| RpcError::Decode(format!("{}: {}", method, e)))
    }
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(200) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
