//! Passive navigation observer for the bound page.
//!
//! Main-frame URL changes go to the controller as navigation events (the
//! authoritative trigger for transitions whose sender may not survive).
//! Leaving a document aborts its agent; a finished load starts a new one.

use crate::browser::CdpEvent;
use crate::controller::{ControllerHandle, NavigationEvent};
use crate::job::PageId;
use crate::runtime::AgentDispatcher;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// The main frame committed a new document
    Navigated(String),
    /// URL changed without a new document (history API, fragment)
    SameDocument(String),
    Loaded,
    Detached,
}

pub struct NavigationObserver {
    page: PageId,
    controller: ControllerHandle,
    dispatcher: Arc<AgentDispatcher>,
    main_frame: Option<String>,
}

impl NavigationObserver {
    pub fn new(page: PageId, controller: ControllerHandle, dispatcher: Arc<AgentDispatcher>) -> Self {
        Self {
            page,
            controller,
            dispatcher,
            main_frame: None,
        }
    }

    pub async fn run(mut self, mut events: broadcast::Receiver<CdpEvent>) {
        tracing::info!("Observing navigation on page {}", self.page);
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Navigation observer lagged, {} events dropped", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let Some(signal) = interpret(&mut self.main_frame, &event) else {
                continue;
            };
            match signal {
                Signal::Navigated(url) => {
                    tracing::info!("Page {} navigated to {}", self.page, url);
                    self.dispatcher.abort();
                    self.report(url).await;
                }
                Signal::SameDocument(url) => {
                    tracing::debug!("Page {} same-document navigation to {}", self.page, url);
                    self.report(url).await;
                }
                Signal::Loaded => self.dispatcher.dispatch(&self.page),
                Signal::Detached => {
                    tracing::warn!("Page {} detached, observer stopping", self.page);
                    self.dispatcher.abort();
                    break;
                }
            }
        }
    }

    async fn report(&self, url: String) {
        let event = NavigationEvent {
            page: self.page.clone(),
            url,
        };
        if let Err(e) = self.controller.navigation(event).await {
            tracing::error!("Cannot deliver navigation event: {}", e);
        }
    }
}

/// Map a raw CDP event to a navigation signal, tracking the main frame id.
pub fn interpret(main_frame: &mut Option<String>, event: &CdpEvent) -> Option<Signal> {
    match event.method.as_str() {
        "Page.frameNavigated" => {
            let frame = event.params.get("frame")?;
            if frame.get("parentId").is_some() {
                return None;
            }
            if let Some(id) = frame.get("id").and_then(|v| v.as_str()) {
                *main_frame = Some(id.to_string());
            }
            let url = frame.get("url").and_then(|v| v.as_str())?;
            let fragment = frame
                .get("urlFragment")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Some(Signal::Navigated(format!("{}{}", url, fragment)))
        }
        "Page.navigatedWithinDocument" => {
            let frame_id = event.params.get("frameId").and_then(|v| v.as_str());
            if main_frame.is_some() && frame_id != main_frame.as_deref() {
                return None;
            }
            let url = event.params.get("url").and_then(|v| v.as_str())?;
            Some(Signal::SameDocument(url.to_string()))
        }
        "Page.loadEventFired" => Some(Signal::Loaded),
        "Inspector.detached" | "Target.detachedFromTarget" => Some(Signal::Detached),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, params: serde_json::Value) -> CdpEvent {
        CdpEvent {
            method: method.to_string(),
            params,
        }
    }

    #[test]
    fn test_main_frame_navigation() {
        let mut main = None;
        let signal = interpret(
            &mut main,
            &event(
                "Page.frameNavigated",
                json!({"frame": {"id": "F1", "url": "https://www.marktplaats.nl/my-account/sell/index.html?previousAction=deleteAdSuccess"}}),
            ),
        );
        assert_eq!(
            signal,
            Some(Signal::Navigated(
                "https://www.marktplaats.nl/my-account/sell/index.html?previousAction=deleteAdSuccess"
                    .to_string()
            ))
        );
        assert_eq!(main.as_deref(), Some("F1"));
    }

    #[test]
    fn test_subframes_ignored() {
        let mut main = Some("F1".to_string());
        let sub = event(
            "Page.frameNavigated",
            json!({"frame": {"id": "F2", "parentId": "F1", "url": "https://ads.example/"}}),
        );
        assert_eq!(interpret(&mut main, &sub), None);

        let within = event(
            "Page.navigatedWithinDocument",
            json!({"frameId": "F2", "url": "https://ads.example/#x"}),
        );
        assert_eq!(interpret(&mut main, &within), None);
    }

    #[test]
    fn test_same_document_and_load() {
        let mut main = Some("F1".to_string());
        let within = event(
            "Page.navigatedWithinDocument",
            json!({"frameId": "F1", "url": "https://www.marktplaats.nl/plaats#step2"}),
        );
        assert_eq!(
            interpret(&mut main, &within),
            Some(Signal::SameDocument("https://www.marktplaats.nl/plaats#step2".to_string()))
        );
        assert_eq!(
            interpret(&mut main, &event("Page.loadEventFired", json!({"timestamp": 1.0}))),
            Some(Signal::Loaded)
        );
        assert_eq!(
            interpret(&mut main, &event("Runtime.consoleAPICalled", json!({}))),
            None
        );
    }
}
