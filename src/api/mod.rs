pub mod response;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::api::response::{json_error, json_response};
use crate::indexer::SubscriptionCoordinator;
use crate::models::errors::IndexerError;

type AppState = Arc<SubscriptionCoordinator>;

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    pub address: Option<String>,
}

pub fn router(coordinator: Arc<SubscriptionCoordinator>) -> Router {
    Router::new()
        .route("/subscribe", post(subscribe_handler))
        .route("/transactions", get(get_transactions_handler))
        .route("/blocknumber", get(get_block_number_handler))
        .route("/subscriptions", get(get_subscriptions_handler))
        .with_state(coordinator)
}

fn status_for(error: &IndexerError) -> StatusCode {
    match error {
        IndexerError::AlreadySubscribed { .. } => StatusCode::CONFLICT,
        IndexerError::Transport(_) => StatusCode::BAD_GATEWAY,
        IndexerError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        IndexerError::Decode(_) | IndexerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn subscribe_handler(
    State(coordinator): State<AppState>,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                format!("failed to decode request: {}", rejection.body_text()),
                None,
            );
        }
    };

    let address = request.address.trim();
    if address.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "address is required", None);
    }

    match coordinator.subscribe(address).await {
        Ok(()) => {
            info!("Address {} subscribed", address);
            json_response(
                StatusCode::CREATED,
                "Address subscribed",
                Some(json!({ "address": address })),
            )
        }
        Err(e) => json_error(
            status_for(&e),
            format!("failed to subscribe to address: {e}"),
            None,
        ),
    }
}

async fn get_transactions_handler(
    State(coordinator): State<AppState>,
    Query(query): Query<AddressQuery>,
) -> Response {
    let Some(address) = query
        .address
        .as_deref()
        .map(str::trim)
        .filter(|address| !address.is_empty())
    else {
        return json_error(StatusCode::BAD_REQUEST, "address query parameter is required", None);
    };

    let transactions = match coordinator.get_transactions(address) {
        Ok(transactions) => transactions,
        Err(e) => {
            return json_error(
                status_for(&e),
                format!("failed to get transactions: {e}"),
                None,
            );
        }
    };

    if transactions.is_empty() {
        return json_error(StatusCode::NOT_FOUND, "no transactions found", None);
    }

    json_response(
        StatusCode::OK,
        "Transactions for address",
        Some(json!({ "transactions": transactions })),
    )
}

async fn get_block_number_handler(State(coordinator): State<AppState>) -> Response {
    match coordinator.get_current_block().await {
        Ok(block_number) => json_response(
            StatusCode::OK,
            "Current block number",
            Some(json!({ "blockNumber": block_number })),
        ),
        Err(e) => json_error(
            status_for(&e),
            format!("failed to get block number: {e}"),
            None,
        ),
    }
}

async fn get_subscriptions_handler(State(coordinator): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        "Active subscriptions",
        Some(json!({ "addresses": coordinator.active_addresses() })),
    )
}
