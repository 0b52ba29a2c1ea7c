//! Common test utilities for gateway integration tests

#![allow(dead_code)]

use gateway::{
    handler_fn, DispatchHandler, GatewayConfig, SessionLimits, ShardEvent, StaticSessionLimits,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// How the mock gateway behaves
#[derive(Debug, Clone)]
pub struct MockGatewayOptions {
    pub heartbeat_interval_ms: u64,
    /// Answer op 1 with op 11
    pub ack_heartbeats: bool,
    /// Sent as `resume_gateway_url` in READY
    pub resume_url: Option<String>,
    /// Prefix of the session ids handed out on Identify
    pub session_prefix: String,
    /// Answer each heartbeat with a dispatch frame written before the ACK
    pub dispatch_on_heartbeat: bool,
}

impl Default for MockGatewayOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            ack_heartbeats: true,
            resume_url: None,
            session_prefix: "session".to_string(),
            dispatch_on_heartbeat: false,
        }
    }
}

/// A frame the mock received from a client
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    /// 0-based index of the connection it arrived on
    pub connection: usize,
    pub at: Instant,
    pub payload: Value,
}

impl ReceivedFrame {
    pub fn op(&self) -> u64 {
        self.payload["op"].as_u64().unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Clone)]
enum ServerAction {
    Send(String),
    Close(u16),
}

/// Scripted gateway server
///
/// Every connection gets Hello first. Identify is answered with READY,
/// Resume with RESUMED and heartbeats with ACKs (unless disabled). Tests push
/// extra frames or a close with [`MockGateway::push`] and
/// [`MockGateway::close_with`].
pub struct MockGateway {
    pub addr: SocketAddr,
    frames: Arc<Mutex<Vec<ReceivedFrame>>>,
    connections: Arc<AtomicUsize>,
    actions: broadcast::Sender<ServerAction>,
    shutdown: CancellationToken,
}

impl MockGateway {
    pub async fn start(options: MockGatewayOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (actions, _) = broadcast::channel(64);
        let shutdown = CancellationToken::new();

        {
            let frames = Arc::clone(&frames);
            let connections = Arc::clone(&connections);
            let actions = actions.clone();
            let shutdown = shutdown.clone();
            let options = Arc::new(options);

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            let Ok((stream, _)) = result else { break };
                            let index = connections.fetch_add(1, Ordering::SeqCst);
                            tokio::spawn(handle_connection(
                                stream,
                                index,
                                Arc::clone(&options),
                                Arc::clone(&frames),
                                actions.subscribe(),
                                shutdown.clone(),
                            ));
                        }
                        _ = shutdown.cancelled() => break,
                    }
                }
            });
        }

        Self {
            addr,
            frames,
            connections,
            actions,
            shutdown,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Send a frame to every open connection
    pub fn push(&self, frame: Value) {
        let _ = self.actions.send(ServerAction::Send(frame.to_string()));
    }

    /// Close every open connection with `code`
    pub fn close_with(&self, code: u16) {
        let _ = self.actions.send(ServerAction::Close(code));
    }

    pub fn frames(&self) -> Vec<ReceivedFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn frames_with_op(&self, op: u64) -> Vec<ReceivedFrame> {
        self.frames().into_iter().filter(|f| f.op() == op).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` frames with `op` arrived
    pub async fn wait_for_ops(&self, op: u64, count: usize, timeout: Duration) -> Vec<ReceivedFrame> {
        let deadline = Instant::now() + timeout;
        loop {
            let frames = self.frames_with_op(op);
            if frames.len() >= count {
                return frames;
            }
            if Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {} frame(s) with op {}, got {}",
                    count,
                    op,
                    frames.len()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    index: usize,
    options: Arc<MockGatewayOptions>,
    frames: Arc<Mutex<Vec<ReceivedFrame>>>,
    mut actions: broadcast::Receiver<ServerAction>,
    shutdown: CancellationToken,
) {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Message;

    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(_) => return,
    };

    let mut seq = 1u64;
    let hello = json!({"op": 10, "d": {"heartbeat_interval": options.heartbeat_interval_ms}});
    if ws.send(Message::Text(hello.to_string())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = ws.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };

                let payload: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                let op = payload["op"].as_u64();
                let resume_seq = payload["d"]["seq"].as_u64().unwrap_or(0);
                frames.lock().unwrap().push(ReceivedFrame {
                    connection: index,
                    at: Instant::now(),
                    payload,
                });

                let mut replies = Vec::new();
                if op == Some(1) && options.dispatch_on_heartbeat {
                    seq += 1;
                    replies.push(json!({"op": 0, "t": "HEARTBEAT_ECHO", "s": seq, "d": {}}));
                }
                let reply = match op {
                    Some(1) if options.ack_heartbeats => Some(json!({"op": 11})),
                    Some(2) => Some(json!({
                        "op": 0,
                        "t": "READY",
                        "s": 1,
                        "d": {
                            "v": 10,
                            "session_id": format!("{}-{}", options.session_prefix, index),
                            "resume_gateway_url": options.resume_url,
                        }
                    })),
                    Some(6) => Some(json!({"op": 0, "t": "RESUMED", "s": resume_seq + 1, "d": {}})),
                    _ => None,
                };

                replies.extend(reply);
                let mut failed = false;
                for reply in replies {
                    if ws.send(Message::Text(reply.to_string())).await.is_err() {
                        failed = true;
                        break;
                    }
                }
                if failed {
                    break;
                }
            }
            action = actions.recv() => {
                match action {
                    Ok(ServerAction::Send(text)) => {
                        if ws.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Ok(ServerAction::Close(code)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "scripted".into(),
                        };
                        let _ = ws.close(Some(frame)).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}

/// A dispatch event as seen by the application callback
#[derive(Debug, Clone)]
pub struct Delivered {
    pub shard_id: u32,
    pub event: Option<String>,
    pub sequence: Option<u64>,
    pub payload: Value,
}

/// Handler forwarding every item to a channel
pub fn recording_handler() -> (Arc<dyn DispatchHandler>, mpsc::UnboundedReceiver<Delivered>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |item| {
        let tx = tx.clone();
        async move {
            let delivered = Delivered {
                shard_id: item.shard_id,
                event: item.event_type().map(str::to_string),
                sequence: item.sequence(),
                payload: serde_json::from_str(item.payload())?,
            };
            let _ = tx.send(delivered);
            Ok(())
        }
    });
    (Arc::new(handler), rx)
}

/// Config with a token and fast reconnects
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::from_yaml("{}").unwrap();
    config.token = "test-token".to_string();
    config.shard_count = Some(1);
    config.identify_window_ms = Some(100);
    config.reconnect.delay_ms = 10;
    config.reconnect.backoff_initial_ms = 50;
    config.reconnect.backoff_max_ms = 200;
    config.dispatch.workers = 2;
    config.dispatch.queue_capacity = 16;
    config
}

pub fn static_limits(url: &str, shards: u32, max_concurrency: u32) -> Arc<StaticSessionLimits> {
    Arc::new(StaticSessionLimits(SessionLimits {
        url: url.to_string(),
        shard_count_hint: shards,
        max_concurrency,
        reset_after: Duration::from_secs(5),
        remaining: 1000,
        total: 1000,
    }))
}

/// Wait for the first event matching `pred`
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<ShardEvent>,
    timeout: Duration,
    pred: F,
) -> ShardEvent
where
    F: Fn(&ShardEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(event) => verbose_println!("  Skipping event: {:?}", event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for shard event")
}

pub fn dispatch_frame(event: &str, seq: u64, data: Value) -> Value {
    json!({"op": 0, "t": event, "s": seq, "d": data})
}
