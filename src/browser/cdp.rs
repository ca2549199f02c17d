use crate::error::{ReposterError, Result};
use crate::job::PageId;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_RETRIES: u32 = 30;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// A CDP event (a message without `id`).
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

/// CDP client for one page target, over a raw WebSocket
pub struct CdpClient {
    ws_tx: Arc<Mutex<WsSink>>,
    responses: Arc<Mutex<HashMap<u32, oneshot::Sender<Value>>>>,
    msg_id: AtomicU32,
    events: broadcast::Sender<CdpEvent>,
    target_id: PageId,
}

impl CdpClient {
    /// Wait for a page target on `port` and connect to it.
    pub async fn connect(port: u16) -> Result<Self> {
        let list_url = format!("http://127.0.0.1:{}/json/list", port);
        let mut last_error = String::new();

        for attempt in 1..=CONNECT_RETRIES {
            match find_page_target(&list_url).await {
                Ok((target_id, ws_url)) => {
                    tracing::info!("Connecting to page target {} at {}", target_id, ws_url);
                    match connect_async(ws_url.as_str()).await {
                        Ok((ws_stream, _)) => {
                            let client = Self::start(ws_stream, PageId::new(target_id));
                            client.send_command("Page.enable", json!({})).await?;
                            client.send_command("Runtime.enable", json!({})).await?;
                            tracing::info!("CDP domains enabled");
                            return Ok(client);
                        }
                        Err(e) => last_error = format!("Failed to connect WebSocket: {}", e),
                    }
                }
                Err(e) => last_error = e,
            }
            tracing::debug!("Retry {}/{}: {}", attempt, CONNECT_RETRIES, last_error);
            tokio::time::sleep(CONNECT_RETRY_DELAY).await;
        }

        Err(ReposterError::Cdp(format!(
            "Failed to connect to Chrome on port {} after {} retries: {}",
            port, CONNECT_RETRIES, last_error
        )))
    }

    fn start(ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>, target_id: PageId) -> Self {
        let (tx, mut rx) = ws_stream.split();
        let responses: Arc<Mutex<HashMap<u32, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(256);

        let reader_responses = responses.clone();
        let reader_events = events.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        let Ok(json) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        if let Some(id) = json.get("id").and_then(|i| i.as_u64()) {
                            if let Some(sender) = reader_responses.lock().await.remove(&(id as u32)) {
                                let _ = sender.send(json);
                            }
                        } else if let Some(method) = json.get("method").and_then(|m| m.as_str()) {
                            tracing::trace!("CDP event: {}", method);
                            let _ = reader_events.send(CdpEvent {
                                method: method.to_string(),
                                params: json.get("params").cloned().unwrap_or(Value::Null),
                            });
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        tracing::warn!("CDP WebSocket closed");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!("CDP WebSocket error: {:?}", e);
                    }
                    _ => {}
                }
            }
            // Fail whatever is still waiting
            reader_responses.lock().await.clear();
            let _ = reader_events.send(CdpEvent {
                method: "Inspector.detached".to_string(),
                params: json!({"reason": "websocket closed"}),
            });
        });

        tracing::info!("CDP client connected to target {}", target_id);
        Self {
            ws_tx: Arc::new(Mutex::new(tx)),
            responses,
            msg_id: AtomicU32::new(1),
            events,
            target_id,
        }
    }

    pub fn target_id(&self) -> &PageId {
        &self.target_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    /// Send a CDP command and wait for its `result`
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.msg_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.responses.lock().await.insert(id, tx);

        let command = json!({
            "id": id,
            "method": method,
            "params": params
        });

        {
            let mut sink = self.ws_tx.lock().await;
            if let Err(e) = sink.send(WsMessage::Text(command.to_string())).await {
                self.responses.lock().await.remove(&id);
                return Err(ReposterError::Cdp(format!("Failed to send {}: {}", method, e)));
            }
        }

        let response = match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(ReposterError::Cdp(format!("{}: response channel closed", method)))
            }
            Err(_) => {
                self.responses.lock().await.remove(&id);
                return Err(ReposterError::Cdp(format!("{}: command timeout", method)));
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(ReposterError::Cdp(format!("{}: {}", method, message)));
        }
        Ok(response.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Evaluate `expression` in the page and return its value. Promises are awaited.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .or_else(|| details.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("script exception");
            return Err(ReposterError::Cdp(format!("evaluate: {}", text)));
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let result = self
            .send_command("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error) = result.get("errorText").and_then(|e| e.as_str()) {
            return Err(ReposterError::Browser(format!(
                "Navigation to {} failed: {}",
                url, error
            )));
        }
        tracing::info!("Navigated to: {}", url);
        Ok(())
    }

    pub async fn reload(&self) -> Result<()> {
        self.send_command("Page.reload", json!({ "ignoreCache": false }))
            .await?;
        tracing::info!("Reloaded page {}", self.target_id);
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String> {
        let value = self.evaluate("window.location.href").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ReposterError::Cdp("location.href is not a string".to_string()))
    }

    pub async fn go_back(&self) -> Result<()> {
        let history = self
            .send_command("Page.getNavigationHistory", json!({}))
            .await?;
        let current = history
            .get("currentIndex")
            .and_then(|i| i.as_i64())
            .unwrap_or(0);
        let entry_id = history
            .get("entries")
            .and_then(|e| e.as_array())
            .and_then(|entries| entries.get((current - 1).max(0) as usize))
            .and_then(|e| e.get("id"))
            .and_then(|id| id.as_i64());

        match entry_id {
            Some(entry_id) if current > 0 => {
                self.send_command("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
                    .await?;
                tracing::debug!("Navigated back");
                Ok(())
            }
            _ => Err(ReposterError::Browser("No history entry to go back to".to_string())),
        }
    }

    pub async fn close(&self) {
        let mut sink = self.ws_tx.lock().await;
        let _ = sink.close().await;
        tracing::info!("CDP client closed for target {}", self.target_id);
    }
}

async fn find_page_target(list_url: &str) -> std::result::Result<(String, String), String> {
    let response = reqwest::get(list_url)
        .await
        .map_err(|e| format!("Connection error: {}", e))?;
    if !response.status().is_success() {
        return Err(format!("HTTP error: {}", response.status()));
    }
    let targets: Value = response
        .json()
        .await
        .map_err(|e| format!("Failed to parse targets response: {}", e))?;
    let target = targets
        .as_array()
        .and_then(|arr| {
            arr.iter()
                .find(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        })
        .ok_or_else(|| "No page target found".to_string())?;

    let id = target
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Page target without id".to_string())?;
    let ws_url = target
        .get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "No webSocketDebuggerUrl in page target".to_string())?;
    Ok((id.to_string(), ws_url.to_string()))
}
