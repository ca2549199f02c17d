//! Wiring: the controller loop, agent dispatch, and browser attachment.

use crate::agent::{self, AgentContext, Verdict};
use crate::browser::{launcher, CdpClient, CdpPage, PageCapabilities};
use crate::config::AppConfig;
use crate::controller::{
    Command, Controller, ControllerHandle, ControllerInput, Navigator, Outcome,
};
use crate::error::Result;
use crate::history::TransitionLog;
use crate::images::{HttpImageFetcher, ImageFetcher};
use crate::job::{JobEvent, JobRecord, PageId};
use crate::observer::NavigationObserver;
use crate::store::JobStore;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const INBOX_CAPACITY: usize = 64;

pub fn controller_channel(config: &AppConfig) -> (ControllerHandle, mpsc::Receiver<ControllerInput>) {
    let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
    let handle = ControllerHandle::new(tx, Duration::from_millis(config.timing.reply_timeout_ms));
    (handle, rx)
}

/// Runs at most one page agent at a time on the bound page.
pub struct AgentDispatcher {
    ctx: AgentContext,
    running: Mutex<Option<JoinHandle<()>>>,
}

impl AgentDispatcher {
    pub fn new(ctx: AgentContext) -> Self {
        Self {
            ctx,
            running: Mutex::new(None),
        }
    }

    /// Start a fresh agent, aborting the previous one.
    pub fn dispatch(&self, page: &PageId) {
        if page != self.ctx.page.id() {
            tracing::warn!("No agent for unattached page {}", page);
            return;
        }
        let ctx = self.ctx.clone();
        let handle = tokio::spawn(async move {
            match agent::run(&ctx).await {
                Ok(Verdict::Ran(phase)) => tracing::info!("Agent finished {:?}", phase),
                Ok(Verdict::Skipped(reason)) => tracing::debug!("Agent idle: {}", reason),
                Err(e) => tracing::warn!("Agent stopped: {}", e),
            }
        });
        if let Some(previous) = self.running.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Abandon the running agent (its page is going away).
    pub fn abort(&self) {
        if let Some(previous) = self.running.lock().take() {
            previous.abort();
        }
    }

    /// Whether an agent task is still running.
    pub fn is_busy(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

/// Drains the controller inbox one input at a time.
pub struct ControllerLoop {
    controller: Controller,
    inbox: mpsc::Receiver<ControllerInput>,
    dispatcher: Option<Arc<AgentDispatcher>>,
}

impl ControllerLoop {
    pub fn new(
        controller: Controller,
        inbox: mpsc::Receiver<ControllerInput>,
        dispatcher: Option<Arc<AgentDispatcher>>,
    ) -> Self {
        Self {
            controller,
            inbox,
            dispatcher,
        }
    }

    pub async fn run(mut self) {
        while let Some(input) = self.inbox.recv().await {
            self.step(input).await;
        }
        tracing::info!("Controller inbox closed");
    }

    pub async fn step(&mut self, input: ControllerInput) {
        match input {
            ControllerInput::Command(Command::Start { url, reply }) => {
                let outcome = self.controller.start(&url).await;
                let _ = reply.send(outcome.ack.clone());
                self.after(outcome);
            }
            ControllerInput::Command(Command::Cleanup { reply }) => {
                let outcome = self.controller.cleanup().await;
                let _ = reply.send(outcome.ack.clone());
                self.after(outcome);
            }
            ControllerInput::Command(Command::Status { reply }) => {
                let _ = reply.send(self.controller.current());
            }
            ControllerInput::Agent { event, reply } => {
                let outcome = self.controller.handle(event).await;
                if let Some(reply) = reply {
                    let _ = reply.send(outcome.ack.clone());
                }
                self.after(outcome);
            }
            ControllerInput::Navigation(nav) => {
                let outcome = self
                    .controller
                    .handle(JobEvent::NavigationObserved {
                        page: nav.page,
                        url: nav.url,
                    })
                    .await;
                self.after(outcome);
            }
        }
    }

    fn after(&self, outcome: Outcome) {
        if let (Some(page), Some(dispatcher)) = (outcome.handoff, &self.dispatcher) {
            dispatcher.dispatch(&page);
        }
    }
}

/// A stored job bound to a page other than `page`. Target ids do not
/// survive a browser restart, so such a record can never be picked up again
/// and only an operator cleanup removes it.
pub fn orphaned_job(store: &JobStore, page: &PageId) -> Result<Option<JobRecord>> {
    Ok(store.load()?.filter(|record| record.bound_page != *page))
}

/// A running browser-attached controller.
pub struct Runtime {
    pub controller: ControllerHandle,
    pub page: PageId,
    pub client: Arc<CdpClient>,
}

/// Launch (or attach to) Chrome, bind to its first tab, and start the
/// controller loop and navigation observer.
pub async fn start(config: Arc<AppConfig>, store: JobStore, history: TransitionLog) -> Result<Runtime> {
    launcher::launch(&config.browser)?;
    let client = Arc::new(CdpClient::connect(config.browser.cdp_port).await?);
    let page = Arc::new(CdpPage::new(client.clone()));
    let page_id = page.id().clone();
    tracing::info!("Bound to page {}", page_id);

    let fetcher: Arc<dyn ImageFetcher> = Arc::new(HttpImageFetcher::new(&config.images)?);
    let navigator: Arc<dyn Navigator> = page.clone();
    let capabilities: Arc<dyn PageCapabilities> = page;

    let (handle, inbox) = controller_channel(&config);
    let controller = Controller::new(
        config.clone(),
        store.clone(),
        navigator,
        fetcher,
        history,
        page_id.clone(),
    );
    let dispatcher = Arc::new(AgentDispatcher::new(AgentContext::new(
        capabilities,
        store,
        config,
        handle.clone(),
    )));

    let events = client.subscribe();
    tokio::spawn(ControllerLoop::new(controller, inbox, Some(dispatcher.clone())).run());
    tokio::spawn(NavigationObserver::new(page_id.clone(), handle.clone(), dispatcher.clone()).run(events));

    // Resume whatever the current page has to do for an existing job
    dispatcher.dispatch(&page_id);

    Ok(Runtime {
        controller: handle,
        page: page_id,
        client,
    })
}
