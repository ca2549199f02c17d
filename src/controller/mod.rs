//! The controller: single writer of the job record.
//!
//! Every input becomes a `JobEvent`, goes through `job::decide`, and the
//! resulting effects are applied here: guards first, then the record is
//! persisted, then navigation runs.

pub mod handle;

pub use handle::{Command, ControllerHandle, ControllerInput, NavigationEvent};

use crate::config::AppConfig;
use crate::error::Result;
use crate::guard::{GuardFlag, OneShotGuard};
use crate::history::{TransitionEntry, TransitionLog};
use crate::images::{self, ImageFetcher};
use crate::job::{
    decide, now_ms, Decision, Effect, JobEvent, JobRecord, JobStatus, PageId, Rejection,
};
use crate::store::JobStore;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Moves the bound page. Never opens a new tab.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, page: &PageId, url: &str) -> Result<()>;
    async fn reload(&self, page: &PageId) -> Result<()>;
}

/// Reply to a request sent to the controller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Ack {
    Accepted { status: JobStatus },
    Rejected { rejection: Rejection },
    Failed { message: String },
}

impl Ack {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Ack::Accepted { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub ack: Ack,
    /// The bound page should get a fresh agent without navigating
    pub handoff: Option<PageId>,
}

impl Outcome {
    fn ack(ack: Ack) -> Self {
        Self { ack, handoff: None }
    }
}

enum Nav {
    To(String),
    Reload,
}

pub struct Controller {
    config: Arc<AppConfig>,
    store: JobStore,
    guard: OneShotGuard,
    navigator: Arc<dyn Navigator>,
    fetcher: Arc<dyn ImageFetcher>,
    history: TransitionLog,
    /// Page new jobs are bound to
    page: PageId,
}

impl Controller {
    pub fn new(
        config: Arc<AppConfig>,
        store: JobStore,
        navigator: Arc<dyn Navigator>,
        fetcher: Arc<dyn ImageFetcher>,
        history: TransitionLog,
        page: PageId,
    ) -> Self {
        Self {
            config,
            guard: OneShotGuard::new(store.clone()),
            store,
            navigator,
            fetcher,
            history,
            page,
        }
    }

    pub fn page(&self) -> &PageId {
        &self.page
    }

    pub fn current(&self) -> Result<Option<JobRecord>> {
        self.store.load()
    }

    pub async fn start(&self, url: &str) -> Outcome {
        self.handle(JobEvent::Start {
            url: url.to_string(),
            page: self.page.clone(),
        })
        .await
    }

    pub async fn cleanup(&self) -> Outcome {
        self.handle(JobEvent::Cleanup).await
    }

    /// Fully handle one event. A navigation that fails twice turns into a
    /// `PhaseFailed` for the bound page.
    pub async fn handle(&self, event: JobEvent) -> Outcome {
        let (mut outcome, mut pending) = self.handle_once(&event).await;
        while let Some(failure) = pending.take() {
            let (followup, next) = self.handle_once(&failure).await;
            if let Ack::Accepted { status } = followup.ack {
                outcome.ack = Ack::Accepted { status };
            }
            pending = next;
        }
        outcome
    }

    async fn handle_once(&self, event: &JobEvent) -> (Outcome, Option<JobEvent>) {
        if !self.config.enabled && matches!(event, JobEvent::Start { .. }) {
            return (self.reject(None, event, Rejection::Disabled), None);
        }

        let record = match self.store.load() {
            Ok(record) => record,
            Err(e) => {
                tracing::error!("Cannot read job record: {}", e);
                return (
                    Outcome::ack(Ack::Failed {
                        message: e.to_string(),
                    }),
                    None,
                );
            }
        };

        let decision = match decide(record.as_ref(), event, &self.config.site) {
            Ok(decision) => decision,
            Err(rejection) => return (self.reject(record.as_ref(), event, rejection), None),
        };

        match self.apply(record, event, decision).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Failed to apply {}: {}", event.trigger(), e);
                (
                    Outcome::ack(Ack::Failed {
                        message: e.to_string(),
                    }),
                    None,
                )
            }
        }
    }

    fn reject(&self, record: Option<&JobRecord>, event: &JobEvent, rejection: Rejection) -> Outcome {
        let status = record.map(|r| r.status).unwrap_or(JobStatus::Idle);
        if rejection.is_benign() {
            tracing::debug!("{} ignored in {}: {}", event.trigger(), status, rejection);
        } else {
            tracing::warn!("{} rejected in {}: {}", event.trigger(), status, rejection);
        }
        let job_id = record.map(|r| r.id.as_str()).unwrap_or_default();
        self.history.push(
            TransitionEntry::new(job_id, event.trigger(), status, status)
                .with_page(event.page())
                .rejected(rejection.to_string()),
        );
        Outcome::ack(Ack::Rejected { rejection })
    }

    /// Apply `decision`. Guards claimed on the way are released again when
    /// the record cannot be persisted, so a retry of the same event can
    /// still get through.
    async fn apply(
        &self,
        record: Option<JobRecord>,
        event: &JobEvent,
        decision: Decision,
    ) -> Result<(Outcome, Option<JobEvent>)> {
        let mut claimed = Vec::new();
        let result = self.apply_effects(record, event, decision, &mut claimed).await;
        if result.is_err() {
            for flag in claimed {
                if let Err(e) = self.guard.clear(flag) {
                    tracing::error!("Could not release {:?} guard: {}", flag, e);
                }
            }
        }
        result
    }

    async fn apply_effects(
        &self,
        mut record: Option<JobRecord>,
        event: &JobEvent,
        decision: Decision,
        claimed: &mut Vec<GuardFlag>,
    ) -> Result<(Outcome, Option<JobEvent>)> {
        let mut navigations = Vec::new();
        let mut handoff = false;
        let mut delete = false;

        for effect in decision.effects.iter() {
            match effect {
                Effect::ClaimGuard(flag) => {
                    if !self.guard.claim(*flag)? {
                        let rejection = Rejection::GuardHeld { flag: *flag };
                        return Ok((self.reject(record.as_ref(), event, rejection), None));
                    }
                    claimed.push(*flag);
                }
                Effect::ClearGuard(flag) => self.guard.clear(*flag)?,
                Effect::ClearGuards => self.guard.clear_all()?,
                Effect::CreateRecord { url, page } => {
                    record = Some(JobRecord::new(url.clone(), page.clone()));
                }
                Effect::StoreExtraction(listing) => {
                    if let Some(r) = record.as_mut() {
                        let mut listing = (**listing).clone();
                        let captured = r.captured_rich_text.take();
                        if listing.description.rich_html.is_none() {
                            listing.description.rich_html = captured;
                        }
                        r.images =
                            images::fetch_all(self.fetcher.as_ref(), &listing.image_urls).await;
                        r.extracted = Some(listing);
                    }
                }
                Effect::AppendRichText(html) => {
                    if let Some(r) = record.as_mut() {
                        match r.extracted.as_mut() {
                            Some(listing) => {
                                let empty = listing
                                    .description
                                    .rich_html
                                    .as_deref()
                                    .map(str::is_empty)
                                    .unwrap_or(true);
                                if empty {
                                    listing.description.rich_html = Some(html.clone());
                                }
                            }
                            None => r.captured_rich_text = Some(html.clone()),
                        }
                    }
                }
                Effect::RecordError(message) => {
                    if let Some(r) = record.as_mut() {
                        tracing::error!("Job {} failed in {}: {}", r.id, r.status, message);
                        r.error_message = Some(message.clone());
                        r.error_at = Some(now_ms());
                    }
                }
                Effect::Navigate(url) => navigations.push(Nav::To(url.clone())),
                Effect::Reload => navigations.push(Nav::Reload),
                Effect::Handoff => handoff = true,
                Effect::DeleteRecord => delete = true,
            }
        }

        let Some(mut record) = record else {
            return Ok((
                Outcome::ack(Ack::Failed {
                    message: "decision left no job record".to_string(),
                }),
                None,
            ));
        };

        let final_status = if delete {
            self.store.delete()?;
            let secs = now_ms().saturating_sub(record.started_at) as f64 / 1000.0;
            tracing::info!(
                "Job {} for {} finished ({}) after {:.1}s",
                record.id,
                record.source_url,
                decision.next,
                secs
            );
            JobStatus::Idle
        } else {
            record.status = decision.next;
            self.store.save(&record)?;
            decision.next
        };

        tracing::info!(
            "Job {}: {} -{}-> {}",
            record.id,
            decision.from,
            decision.trigger,
            decision.next
        );
        self.history.push(
            TransitionEntry::new(&record.id, decision.trigger, decision.from, decision.next)
                .with_page(event.page()),
        );

        for nav in navigations {
            if let Err(e) = self.navigate_with_retry(&record.bound_page, &nav).await {
                if delete || final_status == JobStatus::Error {
                    tracing::error!("Navigation failed after job left the live states: {}", e);
                    break;
                }
                let failure = JobEvent::PhaseFailed {
                    page: record.bound_page.clone(),
                    phase: final_status,
                    message: format!("navigation failed: {}", e),
                };
                return Ok((
                    Outcome::ack(Ack::Accepted {
                        status: final_status,
                    }),
                    Some(failure),
                ));
            }
        }

        let handoff = (handoff && !delete).then(|| record.bound_page.clone());
        Ok((
            Outcome {
                ack: Ack::Accepted {
                    status: final_status,
                },
                handoff,
            },
            None,
        ))
    }

    async fn navigate_with_retry(&self, page: &PageId, nav: &Nav) -> Result<()> {
        let attempt = || async {
            match nav {
                Nav::To(url) => self.navigator.navigate(page, url).await,
                Nav::Reload => self.navigator.reload(page).await,
            }
        };
        match attempt().await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("Navigation failed, retrying once: {}", e);
                tokio::time::sleep(Duration::from_millis(
                    self.config.timing.navigation_retry_ms,
                ))
                .await;
                attempt().await
            }
        }
    }
}
