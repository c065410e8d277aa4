//! In-process stand-ins for an Ethereum node.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use address_watcher::models::common::{Config, StreamConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// What the node does after the subscribe request arrives.
#[derive(Clone)]
pub struct Script {
    pub frames: Vec<Message>,
    pub close_after: bool,
}

/// Websocket server that replays a fixed script to every connection.
pub struct ScriptedNode {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Value>>>,
    disconnected: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ScriptedNode {
    pub async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let disconnected = Arc::new(AtomicBool::new(false));

        let handle = {
            let requests = requests.clone();
            let disconnected = disconnected.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(Self::handle_connection(
                        stream,
                        script.clone(),
                        requests.clone(),
                        disconnected.clone(),
                    ));
                }
            })
        };

        Self {
            addr,
            requests,
            disconnected,
            handle,
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        script: Script,
        requests: Arc<Mutex<Vec<Value>>>,
        disconnected: Arc<AtomicBool>,
    ) {
        let Ok(ws_stream) = accept_async(stream).await else { return };
        let (mut write, mut read) = ws_stream.split();

        // Wait for the subscribe request before replaying anything
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Ok(request) = serde_json::from_str(text.as_str()) {
                    requests.lock().await.push(request);
                }
            }
            _ => return,
        }

        for frame in script.frames {
            if write.send(frame).await.is_err() {
                return;
            }
        }

        if script.close_after {
            let _ = write.send(Message::Close(None)).await;
            return;
        }

        // Hold the connection until the client goes away
        while let Some(Ok(message)) = read.next().await {
            if message.is_close() {
                break;
            }
        }
        disconnected.store(true, Ordering::SeqCst);
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn requests(&self) -> Vec<Value> {
        self.requests.lock().await.clone()
    }

    pub fn client_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Drop for ScriptedNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn ack() -> Message {
    text(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x9ce59a13059e417087c02d3236a0b1cc" }))
}

pub fn log(address: &str, tx: &str) -> Value {
    json!({
        "address": address,
        "blockHash": "0x61cdb2a09ab99abf791d474f20c2ea89bf8de2923a2d42bb49944c8c993cbf04",
        "blockNumber": "0x29e87",
        "data": "0x00000000000000000000000000000000000000000000000000000000000000030000000000000000000000000000000000000000000000000000000000000003",
        "logIndex": "0x0",
        "topics": ["0xd78a0cb8bb633d06981248b816e7bd33c2a35a6089241d099fa519e361cab902"],
        "transactionHash": tx,
        "transactionIndex": "0x0",
        "removed": false
    })
}

pub fn notification(result: Value) -> Message {
    text(json!({
        "jsonrpc": "2.0",
        "method": "eth_subscription",
        "params": { "subscription": "0x9ce59a13059e417087c02d3236a0b1cc", "result": result }
    }))
}

pub fn text(value: Value) -> Message {
    Message::Text(value.to_string().into())
}

pub fn config(rpc_url: &str, ws_url: &str, queue_capacity: usize) -> Config {
    Config {
        rpc_url: rpc_url.to_string(),
        ws_url: ws_url.to_string(),
        stream: StreamConfig {
            queue_capacity,
            request_timeout_secs: 2,
        },
        ..Config::default()
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
