use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StandardResponse {
    pub status: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct StandardError {
    pub status: String,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn reason(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or_default().to_string()
}

pub fn json_response(status: StatusCode, message: &str, data: Option<Value>) -> Response {
    let body = StandardResponse {
        status: reason(status),
        message: message.to_string(),
        data,
    };
    (status, Json(body)).into_response()
}

pub fn json_error(status: StatusCode, error: impl ToString, data: Option<Value>) -> Response {
    let body = StandardError {
        status: reason(status),
        error: error.to_string(),
        data,
    };
    (status, Json(body)).into_response()
}
