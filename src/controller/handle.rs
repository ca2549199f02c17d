//! Message channel into the controller loop.

use super::Ack;
use crate::error::{ReposterError, Result};
use crate::job::{JobEvent, JobRecord, PageId};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Operator commands (HTTP API, MCP).
#[derive(Debug)]
pub enum Command {
    Start {
        url: String,
        reply: oneshot::Sender<Ack>,
    },
    Cleanup {
        reply: oneshot::Sender<Ack>,
    },
    Status {
        reply: oneshot::Sender<Result<Option<JobRecord>>>,
    },
}

/// A main-frame URL change seen on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationEvent {
    pub page: PageId,
    pub url: String,
}

#[derive(Debug)]
pub enum ControllerInput {
    Command(Command),
    /// Message from a page agent; `reply` is absent for fire-and-forget sends
    Agent {
        event: JobEvent,
        reply: Option<oneshot::Sender<Ack>>,
    },
    Navigation(NavigationEvent),
}

#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerInput>,
    reply_timeout: Duration,
}

impl ControllerHandle {
    pub fn new(tx: mpsc::Sender<ControllerInput>, reply_timeout: Duration) -> Self {
        Self { tx, reply_timeout }
    }

    async fn push(&self, input: ControllerInput) -> Result<()> {
        self.tx
            .send(input)
            .await
            .map_err(|_| ReposterError::Browser("controller is not running".to_string()))
    }

    async fn await_reply<T>(&self, rx: oneshot::Receiver<T>) -> Result<T> {
        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ReposterError::Browser(
                "controller dropped the reply".to_string(),
            )),
            Err(_) => Err(ReposterError::Browser(format!(
                "no reply from controller within {:?}",
                self.reply_timeout
            ))),
        }
    }

    /// Fire-and-forget; the caller may be gone before the event is handled.
    pub async fn send(&self, event: JobEvent) -> Result<()> {
        self.push(ControllerInput::Agent { event, reply: None }).await
    }

    /// Send and wait (bounded) for the decision.
    pub async fn request(&self, event: JobEvent) -> Result<Ack> {
        let (reply, rx) = oneshot::channel();
        self.push(ControllerInput::Agent {
            event,
            reply: Some(reply),
        })
        .await?;
        self.await_reply(rx).await
    }

    pub async fn navigation(&self, event: NavigationEvent) -> Result<()> {
        self.push(ControllerInput::Navigation(event)).await
    }

    pub async fn start(&self, url: &str) -> Result<Ack> {
        let (reply, rx) = oneshot::channel();
        self.push(ControllerInput::Command(Command::Start {
            url: url.to_string(),
            reply,
        }))
        .await?;
        self.await_reply(rx).await
    }

    pub async fn cleanup(&self) -> Result<Ack> {
        let (reply, rx) = oneshot::channel();
        self.push(ControllerInput::Command(Command::Cleanup { reply }))
            .await?;
        self.await_reply(rx).await
    }

    pub async fn status(&self) -> Result<Option<JobRecord>> {
        let (reply, rx) = oneshot::channel();
        self.push(ControllerInput::Command(Command::Status { reply }))
            .await?;
        self.await_reply(rx).await?
    }
}
