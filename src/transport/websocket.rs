use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::models::errors::{DecodeError, TransportError};
use crate::models::event::Event;
use crate::transport::rpc::{RpcRequest, RpcResponse, SUBSCRIBE_METHOD};
use crate::transport::{Delivery, EventSender, EventStream, event_queue};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsFrames = SplitStream<WsStream>;

const NOTIFICATION_METHOD: &str = "eth_subscription";

/// Dials `ws_url`, subscribes to logs emitted by `address` and waits for the
/// node's acknowledgment. A background task then drains the connection into
/// the returned stream.
pub async fn subscribe_logs(
    ws_url: &str,
    address: &str,
    capacity: usize,
    metrics: Option<Metrics>,
) -> Result<EventStream, TransportError> {
    info!("Connecting to {} to watch {}", ws_url, address);
    let (ws, _) = connect_async(ws_url)
        .await
        .map_err(|e| TransportError::Connect {
            url: ws_url.to_string(),
            reason: e.to_string(),
        })?;
    let (mut sink, mut frames) = ws.split();

    let request = RpcRequest::new(
        SUBSCRIBE_METHOD,
        vec![Value::String("logs".to_string()), json!({ "address": address })],
    );
    let payload = serde_json::to_string(&request).map_err(|e| TransportError::Send {
        method: SUBSCRIBE_METHOD.to_string(),
        reason: e.to_string(),
    })?;
    sink.send(Message::Text(payload.into()))
        .await
        .map_err(|e| TransportError::Send {
            method: SUBSCRIBE_METHOD.to_string(),
            reason: e.to_string(),
        })?;

    // The first frame is the acknowledgment, not an event
    let subscription_id = read_ack(&mut frames).await?;
    info!(
        "Subscribed to logs for {} (subscription {})",
        address, subscription_id
    );

    let (queue, stream) = event_queue(address, capacity, metrics.clone());
    tokio::spawn(drain_frames(sink, frames, queue, metrics));

    Ok(stream)
}

async fn read_ack(frames: &mut WsFrames) -> Result<String, TransportError> {
    let receive_error = |reason: String| TransportError::Receive {
        method: SUBSCRIBE_METHOD.to_string(),
        reason,
    };

    loop {
        let payload = match frames.next().await {
            Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
            Some(Ok(Message::Close(frame))) => {
                return Err(receive_error(format!(
                    "connection closed before acknowledgment: {frame:?}"
                )));
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(receive_error(e.to_string())),
            None => {
                return Err(receive_error(
                    "connection ended before acknowledgment".to_string(),
                ));
            }
        };

        let Ok(ack) = serde_json::from_slice::<RpcResponse>(&payload) else {
            debug!("Acknowledgment was not a JSON-RPC response, discarding it");
            return Ok("unknown".to_string());
        };

        if let Some(error) = ack.error {
            return Err(TransportError::Rejected {
                method: SUBSCRIBE_METHOD.to_string(),
                code: error.code,
                message: error.message,
            });
        }

        return Ok(match ack.result {
            Some(Value::String(id)) => id,
            Some(other) => other.to_string(),
            None => "unknown".to_string(),
        });
    }
}

/// Decodes one stream frame into an event. Accepts a bare log object or an
/// `eth_subscription` notification wrapping one.
pub fn decode_frame(frame: &[u8]) -> Result<Event, DecodeError> {
    let mut value: Value = serde_json::from_slice(frame)?;

    if value.get("method").and_then(Value::as_str) == Some(NOTIFICATION_METHOD) {
        value = value
            .get_mut("params")
            .and_then(|params| params.get_mut("result"))
            .map(Value::take)
            .unwrap_or(Value::Null);
    }

    Ok(serde_json::from_value(value)?)
}

// Errors after which the connection can still be read.
fn is_recoverable(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::Capacity(_) | tungstenite::Error::Utf8 { .. }
    )
}

/// Reads frames until the connection ends or the consumer goes away. Never
/// waits on the consumer: events that do not fit in the queue are dropped.
async fn drain_frames(
    mut sink: WsSink,
    mut frames: WsFrames,
    queue: EventSender,
    metrics: Option<Metrics>,
) {
    let address = queue.address().to_string();

    loop {
        let frame = tokio::select! {
            _ = queue.closed() => {
                info!("Event stream for {} dropped, closing connection", address);
                break;
            }
            frame = frames.next() => frame,
        };

        let payload = match frame {
            Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
            Some(Ok(Message::Close(frame))) => {
                info!("Node closed the connection for {}: {:?}", address, frame);
                break;
            }
            // Ping/pong are answered by the websocket layer
            Some(Ok(_)) => continue,
            Some(Err(e)) if is_recoverable(&e) => {
                warn!("Skipping unreadable frame for {}: {}", address, e);
                continue;
            }
            Some(Err(e)) => {
                error!("Connection for {} failed: {}", address, e);
                break;
            }
            None => {
                info!("Connection for {} ended", address);
                break;
            }
        };

        match decode_frame(&payload) {
            Ok(event) => {
                if queue.push(event) == Delivery::Closed {
                    info!("Event stream for {} dropped, closing connection", address);
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to decode frame for {}: {}", address, e);
                if let Some(metrics) = &metrics {
                    metrics.decode_errors.add(1, &[]);
                }
            }
        }
    }

    if let Err(e) = sink.close().await {
        debug!("Error closing connection for {}: {}", address, e);
    }
}
