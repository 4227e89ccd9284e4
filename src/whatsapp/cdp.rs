//! Chrome DevTools Protocol connection
//!
//! JSON-RPC over a websocket: every request carries a fresh id and the reader
//! task routes the matching reply back through a oneshot channel. Events are
//! only traced; the session polls page state instead of subscribing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// One frame received from the browser.
#[derive(Debug, Deserialize)]
pub struct Incoming {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<ProtocolError>,
    pub method: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<String>,
}

impl Incoming {
    /// Reply to request `id`, or `None` for events.
    pub fn into_reply(self) -> Option<(u64, Result<Value>)> {
        let id = self.id?;
        let reply = match self.error {
            Some(err) => {
                let detail = err.data.map(|d| format!(": {}", d)).unwrap_or_default();
                Err(Error::Cdp(format!("{} ({}){}", err.message, err.code, detail)))
            }
            None => Ok(self.result.unwrap_or(Value::Null)),
        };
        Some((id, reply))
    }
}

pub fn encode_request(id: u64, method: &str, params: Value, session_id: Option<&str>) -> Value {
    let mut request = json!({ "id": id, "method": method, "params": params });
    if let Some(session) = session_id {
        request["sessionId"] = json!(session);
    }
    request
}

pub struct CdpConnection {
    outgoing: mpsc::UnboundedSender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    call_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl CdpConnection {
    /// Connect to a browser-level DevTools websocket.
    pub async fn connect(ws_url: &str, call_timeout: Duration) -> Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
        debug!(%ws_url, "DevTools connected");
        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::default();

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(err) = sink.send(message).await {
                    warn!("DevTools write failed: {}", err);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let routes = pending.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        debug!("DevTools read ended: {}", err);
                        break;
                    }
                };

                let incoming = match serde_json::from_str::<Incoming>(&text) {
                    Ok(incoming) => incoming,
                    Err(err) => {
                        warn!("Undecodable DevTools frame: {}", err);
                        continue;
                    }
                };

                if let Some(method) = incoming.method.as_deref() {
                    trace!(method, "DevTools event");
                }
                if let Some((id, reply)) = incoming.into_reply() {
                    if let Some(tx) = routes.lock().await.remove(&id) {
                        let _ = tx.send(reply);
                    }
                }
            }

            for (_, tx) in routes.lock().await.drain() {
                let _ = tx.send(Err(Error::Cdp("connection closed".into())));
            }
        });

        Ok(Self {
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            call_timeout,
            reader,
            writer,
        })
    }

    /// Issue a command and wait for its reply.
    pub async fn call(&self, method: &str, params: Value, session_id: Option<&str>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = encode_request(id, method, params, session_id);
        if self.outgoing.send(Message::Text(request.to_string().into())).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(Error::Cdp("connection closed".into()));
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(Error::Cdp(format!("{} dropped without a reply", method))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout(format!(
                    "{} got no reply within {:?}",
                    method, self.call_timeout
                )))
            }
        }
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
