use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("Failed to send {method} request: {reason}")]
    Send { method: String, reason: String },
    #[error("Failed to receive {method} response: {reason}")]
    Receive { method: String, reason: String },
    #[error("Timed out after {timeout:?} waiting for {method}")]
    Timeout { method: String, timeout: Duration },
    #[error("Node rejected {method}: {message} (code {code})")]
    Rejected {
        method: String,
        code: i64,
        message: String,
    },
    #[error("Unexpected HTTP status {status} from {method}")]
    Http { method: String, status: u16 },
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid hex quantity: expected 0x-prefixed hex, got {got:?}")]
    InvalidHex { got: String },
    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("Response to {method} carried no string result")]
    MissingResult { method: String },
}

// Reserved for persistent backends. The in-memory store never returns it.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Address {address:?} already subscribed")]
    AlreadySubscribed { address: String },
    #[error("Watcher is shutting down, not accepting new subscriptions")]
    ShuttingDown,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
