/*!
 * ============================================================================
 * DEVTOOLS PROTOCOL CLIENT
 * ============================================================================
 *
 * PURPOSE: JSON-RPC over WebSocket to a single Chrome page target
 *
 * - Commands carry an incrementing id; replies are routed back by id
 * - Messages without an id are events, queued for `wait_for_event`
 * - A dropped socket fails every pending command instead of hanging it
 *
 * ============================================================================
 */

use crate::error::RecorderError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

/// One decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reply { id: u64, result: Result<Value, String> },
    Event(CdpEvent),
}

// Decode a protocol frame; None for anything that is neither reply nor event
pub fn decode(text: &str) -> Option<Inbound> {
    let frame: Value = serde_json::from_str(text).ok()?;

    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        let result = match frame.get("error") {
            Some(err) => {
                let message = err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown protocol error");
                let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
                Err(format!("{} (code {})", message, code))
            }
            None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
        };
        return Some(Inbound::Reply { id, result });
    }

    let method = frame.get("method").and_then(Value::as_str)?;
    Some(Inbound::Event(CdpEvent {
        method: method.to_string(),
        params: frame.get("params").cloned().unwrap_or(Value::Null),
    }))
}

pub struct CdpClient {
    next_id: u64,
    pending: PendingMap,
    sink: SplitSink<Socket, Message>,
    events: mpsc::UnboundedReceiver<CdpEvent>,
    reader: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    pub async fn connect(ws_url: &str) -> Result<Self, RecorderError> {
        log::debug!("[BROWSER] Connecting to DevTools at {}", ws_url);

        let (socket, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| RecorderError::Browser {
                message: format!("DevTools connect to {} failed: {}", ws_url, e),
            })?;

        let (sink, stream) = socket.split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, events) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(stream, Arc::clone(&pending), event_tx));

        Ok(Self {
            next_id: 1,
            pending,
            sink,
            events,
            reader,
        })
    }

    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value, RecorderError> {
        self.call_with_timeout(method, params, DEFAULT_COMMAND_TIMEOUT).await
    }

    pub async fn call_with_timeout(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RecorderError> {
        let id = self.next_id;
        self.next_id += 1;

        let frame = json!({ "id": id, "method": method, "params": params }).to_string();

        // Register before sending so a fast reply is never lost
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.sink.send(Message::Text(frame)).await {
            self.pending.lock().await.remove(&id);
            return Err(RecorderError::Browser {
                message: format!("{} send failed: {}", method, e),
            });
        }

        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(RecorderError::Browser {
                    message: format!("{}: DevTools connection closed", method),
                });
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(RecorderError::Timeout {
                    operation: method.to_string(),
                    duration: timeout,
                });
            }
        };

        reply.map_err(|message| RecorderError::Browser {
            message: format!("{}: {}", method, message),
        })
    }

    /// Discard events queued before a new navigation
    pub fn drain_events(&mut self) {
        while self.events.try_recv().is_ok() {}
    }

    /**
     * Wait for the first event that satisfies `matches`
     * Non-matching events are consumed and dropped
     */
    pub async fn wait_for_event<F>(
        &mut self,
        matches: F,
        timeout: Duration,
    ) -> Result<CdpEvent, RecorderError>
    where
        F: Fn(&CdpEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) if matches(&event) => return Ok(event),
                Ok(Some(_)) => continue,
                Ok(None) => {
                    return Err(RecorderError::Browser {
                        message: "DevTools connection closed while waiting for page event".to_string(),
                    });
                }
                Err(_) => {
                    return Err(RecorderError::Timeout {
                        operation: "page event".to_string(),
                        duration: timeout,
                    });
                }
            }
        }
    }

    pub async fn close(&mut self) {
        let _ = self.sink.close().await;
        self.reader.abort();
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut stream: SplitStream<Socket>,
    pending: PendingMap,
    events: mpsc::UnboundedSender<CdpEvent>,
) {
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => {
                log::debug!("[BROWSER] DevTools socket closed by browser");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                log::warn!("[BROWSER] DevTools read error: {}", e);
                break;
            }
        };

        match decode(&text) {
            Some(Inbound::Reply { id, result }) => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(result);
                }
            }
            Some(Inbound::Event(event)) => {
                let _ = events.send(event);
            }
            None => log::debug!("[BROWSER] Ignoring undecodable frame"),
        }
    }

    // Wake every waiter with an error
    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err("DevTools connection closed".to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reply() {
        let inbound = decode(r#"{"id": 3, "result": {"frameId": "F1"}}"#).unwrap();
        match inbound {
            Inbound::Reply { id, result } => {
                assert_eq!(id, 3);
                assert_eq!(result.unwrap()["frameId"], "F1");
            }
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_reply() {
        let inbound =
            decode(r#"{"id": 4, "error": {"code": -32000, "message": "Cannot navigate"}}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Reply {
                id: 4,
                result: Err("Cannot navigate (code -32000)".to_string()),
            }
        );
    }

    #[test]
    fn test_decode_event() {
        let inbound = decode(
            r#"{"method": "Page.lifecycleEvent", "params": {"name": "networkIdle"}}"#,
        )
        .unwrap();
        match inbound {
            Inbound::Event(event) => {
                assert_eq!(event.method, "Page.lifecycleEvent");
                assert_eq!(event.params["name"], "networkIdle");
            }
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_drain_discards_queued_events() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Answers one command, preceded by a burst of lifecycle events
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let Some(Ok(Message::Text(request))) = ws.next().await else {
                panic!("expected a command frame");
            };
            let id = serde_json::from_str::<Value>(&request).unwrap()["id"]
                .as_u64()
                .unwrap();
            for i in 0..50 {
                let event = json!({ "method": "Page.lifecycleEvent", "params": { "name": format!("e{}", i) } });
                ws.send(Message::Text(event.to_string())).await.unwrap();
            }
            ws.send(Message::Text(json!({ "id": id, "result": {} }).to_string()))
                .await
                .unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut client = CdpClient::connect(&format!("ws://{}", addr)).await.unwrap();
        client.call("Page.enable", json!({})).await.unwrap();

        client.drain_events();
        let waited = client
            .wait_for_event(|_| true, Duration::from_millis(50))
            .await;
        assert!(matches!(waited, Err(RecorderError::Timeout { .. })));

        client.close().await;
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("not json").is_none());
        assert!(decode(r#"{"params": {}}"#).is_none());
    }
}
