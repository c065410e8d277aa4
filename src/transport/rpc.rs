use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::models::common::Config;
use crate::models::errors::{DecodeError, IndexerError, TransportError};
use crate::transport::{EventStream, EventTransport, websocket};
use crate::utils::hex_to_u64;

pub const RPC_VERSION: &str = "2.0";
pub const BLOCK_NUMBER_METHOD: &str = "eth_blockNumber";
pub const SUBSCRIBE_METHOD: &str = "eth_subscribe";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(method: &str, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: RPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    /// Splits a response into its result or the node's error object.
    pub fn into_result(self, method: &str) -> Result<Value, IndexerError> {
        if let Some(error) = self.error {
            return Err(TransportError::Rejected {
                method: method.to_string(),
                code: error.code,
                message: error.message,
            }
            .into());
        }

        self.result.ok_or_else(|| {
            DecodeError::MissingResult {
                method: method.to_string(),
            }
            .into()
        })
    }
}

/// JSON-RPC node client: HTTP for point queries, websocket for log streams.
pub struct JsonRpcTransport {
    http: reqwest::Client,
    rpc_url: String,
    ws_url: String,
    queue_capacity: usize,
    request_timeout: Duration,
    metrics: Option<Metrics>,
}

impl JsonRpcTransport {
    pub fn new(config: &Config, metrics: Option<Metrics>) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url: config.rpc_url.clone(),
            ws_url: config.ws_url.clone(),
            queue_capacity: config.stream.queue_capacity,
            request_timeout: config.stream.request_timeout(),
            metrics,
        }
    }

    /// Raw `eth_blockNumber` result, still hex encoded.
    pub async fn block_number(&self) -> Result<String, IndexerError> {
        let result = self
            .timed(BLOCK_NUMBER_METHOD, self.call(RpcRequest::new(BLOCK_NUMBER_METHOD, vec![])))
            .await?;

        match result {
            Value::String(hex) => Ok(hex),
            other => {
                warn!("Unexpected {} result: {}", BLOCK_NUMBER_METHOD, other);
                Err(DecodeError::MissingResult {
                    method: BLOCK_NUMBER_METHOD.to_string(),
                }
                .into())
            }
        }
    }

    async fn call(&self, request: RpcRequest) -> Result<Value, IndexerError> {
        let method = request.method.clone();
        let body = serde_json::to_vec(&request).map_err(DecodeError::from)?;

        let response = self
            .http
            .post(&self.rpc_url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Send {
                method: method.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http {
                method,
                status: status.as_u16(),
            }
            .into());
        }

        let bytes = response.bytes().await.map_err(|e| TransportError::Receive {
            method: method.clone(),
            reason: e.to_string(),
        })?;
        debug!("{} response: {}", method, String::from_utf8_lossy(&bytes));

        let response: RpcResponse = serde_json::from_slice(&bytes).map_err(DecodeError::from)?;
        response.into_result(&method)
    }

    /// Bounds `operation` by the request timeout and records RPC metrics.
    async fn timed<T, E, F>(&self, method: &'static str, operation: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<TransportError>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.request_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                method: method.to_string(),
                timeout: self.request_timeout,
            }
            .into()),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_rpc(method, start.elapsed().as_secs_f64(), result.is_err());
        }
        result
    }
}

#[async_trait]
impl EventTransport for JsonRpcTransport {
    async fn open_stream(&self, address: &str) -> Result<EventStream, TransportError> {
        let subscribe = websocket::subscribe_logs(
            &self.ws_url,
            address,
            self.queue_capacity,
            self.metrics.clone(),
        );

        self.timed(SUBSCRIBE_METHOD, subscribe).await
    }

    async fn current_block(&self) -> Result<u64, IndexerError> {
        let hex = self.block_number().await?;
        Ok(hex_to_u64(&hex)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_request_shape() {
        let request = RpcRequest::new(
            SUBSCRIBE_METHOD,
            vec![
                Value::String("logs".to_string()),
                serde_json::json!({ "address": "0xabc" }),
            ],
        );

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(
            encoded,
            serde_json::json!({
                "jsonrpc": "2.0",
                "method": "eth_subscribe",
                "params": ["logs", { "address": "0xabc" }],
                "id": 1
            })
        );
    }

    #[test]
    fn test_into_result_prefers_error_object() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32602,"message":"invalid params"}}"#,
        )
        .unwrap();

        match response.into_result(SUBSCRIBE_METHOD) {
            Err(IndexerError::Transport(TransportError::Rejected { code, .. })) => {
                assert_eq!(code, -32602)
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_into_result_requires_result() {
        let response: RpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1}"#).unwrap();
        assert!(matches!(
            response.into_result(BLOCK_NUMBER_METHOD),
            Err(IndexerError::Decode(DecodeError::MissingResult { .. }))
        ));
    }
}
