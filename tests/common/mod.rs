#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use bing_chat::config::{ClientConfig, ExchangeConfig, ServiceConfig};
use bing_chat::stream::codec::handshake_ack;
use bing_chat::BingChatClient;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

pub const HANDSHAKE: &str = "{\"protocol\":\"json\",\"version\":1}\u{1e}";
pub const KEEPALIVE: &str = "{\"type\":6}\u{1e}";

pub fn frame(value: &Value) -> String {
    format!("{value}\u{1e}")
}

pub fn update(text: &str) -> String {
    frame(&json!({
        "type": 1,
        "target": "update",
        "arguments": [{"messages": [{"author": "bot", "text": text}]}]
    }))
}

pub fn card_request() -> String {
    frame(&json!({
        "type": 1,
        "target": "update",
        "arguments": [{"messages": [{"author": "bot", "messageType": "RenderCardRequest"}]}]
    }))
}

pub fn completion(item: &Value) -> String {
    frame(&json!({"type": 2, "invocationId": "0", "item": item}))
}

pub fn bot_message(text: &str) -> Value {
    json!({
        "author": "bot",
        "text": text,
        "adaptiveCards": [{"type": "AdaptiveCard", "body": [{"type": "TextBlock", "text": text}]}],
        "suggestedResponses": [{"text": "Tell me more"}]
    })
}

/// What the mock hub does on each connection.
#[derive(Clone, Default)]
pub struct HubScript {
    /// Sent after the handshake record, before the acknowledgement.
    pub before_ack: Vec<String>,
    /// Appended to the acknowledgement message.
    pub with_ack: Option<String>,
    /// Sent, one message each, after an invocation record arrives.
    pub on_invocation: Vec<String>,
    pub refuse_handshake: bool,
    pub close_after_invocation: bool,
}

pub struct MockHub {
    pub url: String,
    received: Arc<Mutex<Vec<String>>>,
    accepted: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockHub {
    pub async fn spawn(script: HubScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock hub");
        let addr = listener.local_addr().expect("local addr");
        let received = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let task = {
            let received = Arc::clone(&received);
            let accepted = Arc::clone(&accepted);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_connection(
                        stream,
                        script.clone(),
                        Arc::clone(&received),
                        Arc::clone(&closed),
                    ));
                }
            })
        };

        Self {
            url: format!("ws://{addr}/sydney/ChatHub"),
            received,
            accepted,
            closed,
            task,
        }
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }

    pub fn keepalives(&self) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|text| text.as_str() == KEEPALIVE)
            .count()
    }

    pub fn invocations(&self) -> Vec<Value> {
        self.received
            .lock()
            .iter()
            .filter_map(|text| serde_json::from_str::<Value>(text.trim_end_matches('\u{1e}')).ok())
            .filter(|value| value["type"] == 4)
            .collect()
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until `count` connections have ended on the hub side.
    pub async fn wait_closed(&self, count: usize) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        while tokio::time::Instant::now() < deadline {
            if self.closed() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_connection(
    stream: TcpStream,
    script: HubScript,
    received: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    'conn: while let Some(Ok(message)) = ws.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        received.lock().push(text.clone());

        if text.contains("\"protocol\":\"json\"") {
            for frame in &script.before_ack {
                if ws.send(Message::Text(frame.clone())).await.is_err() {
                    break 'conn;
                }
            }
            if script.refuse_handshake {
                let _ = ws.close(None).await;
                break;
            }
            let mut ack = handshake_ack();
            if let Some(extra) = &script.with_ack {
                ack.push_str(extra);
            }
            if ws.send(Message::Text(ack)).await.is_err() {
                break;
            }
        } else if text.contains("\"type\":4") {
            for frame in &script.on_invocation {
                if ws.send(Message::Text(frame.clone())).await.is_err() {
                    break 'conn;
                }
            }
            if script.close_after_invocation {
                let _ = ws.close(None).await;
                break;
            }
        }
    }
    closed.fetch_add(1, Ordering::SeqCst);
}

pub fn session_body() -> Value {
    json!({
        "conversationId": "conv-1",
        "conversationSignature": "sig-1",
        "clientId": "client-1",
        "result": {"value": "Success", "message": null}
    })
}

/// Mock conversation-create endpoint that always answers with `body`.
pub struct SessionServer {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl SessionServer {
    pub async fn spawn(body: Value) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/turing/conversation/create",
            get(move || {
                let counter = Arc::clone(&counter);
                let body = body.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(body)
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock session endpoint");
        let addr = listener.local_addr().expect("local addr");
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            hits,
            task,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for SessionServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn test_config(sessions: &SessionServer, hub: &MockHub) -> ClientConfig {
    ClientConfig {
        service: ServiceConfig {
            host: sessions.base_url.clone(),
            hub_url: hub.url.clone(),
            user_token: Some("test-token".to_string()),
            use_env_proxy: false,
            ..ServiceConfig::default()
        },
        exchange: ExchangeConfig {
            response_timeout_ms: 3_000,
            keepalive_interval_ms: 50,
            connect_timeout_ms: 2_000,
            ..ExchangeConfig::default()
        },
        ..ClientConfig::default()
    }
}

pub async fn harness(script: HubScript) -> (BingChatClient, MockHub, SessionServer) {
    let hub = MockHub::spawn(script).await;
    let sessions = SessionServer::spawn(session_body()).await;
    let client = BingChatClient::new(test_config(&sessions, &hub)).expect("build client");
    (client, hub, sessions)
}

/// Progress callback that records every delta.
pub fn progress_recorder() -> (Arc<Mutex<Vec<String>>>, Box<dyn FnMut(&str) + Send>) {
    let deltas = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&deltas);
    let callback: Box<dyn FnMut(&str) + Send> =
        Box::new(move |delta: &str| sink.lock().push(delta.to_string()));
    (deltas, callback)
}
