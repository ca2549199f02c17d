//! Page agents: short-lived, re-entrant executors bound to one loaded page.
//!
//! Every run starts from the durable record alone. With no record, a record
//! bound to another page, or a status this page has no work for, the agent
//! does nothing.

pub mod delete;
pub mod post;
pub mod scrape;
pub mod wait;

use crate::browser::PageCapabilities;
use crate::config::AppConfig;
use crate::controller::ControllerHandle;
use crate::error::{ReposterError, Result};
use crate::guard::{GuardFlag, OneShotGuard};
use crate::job::{JobEvent, JobRecord, JobStatus};
use crate::site::{self, PageKind};
use crate::store::JobStore;
use std::sync::Arc;

/// Everything an agent run needs; cheap to clone.
#[derive(Clone)]
pub struct AgentContext {
    pub page: Arc<dyn PageCapabilities>,
    pub store: JobStore,
    pub guard: OneShotGuard,
    pub config: Arc<AppConfig>,
    pub controller: ControllerHandle,
}

impl AgentContext {
    pub fn new(
        page: Arc<dyn PageCapabilities>,
        store: JobStore,
        config: Arc<AppConfig>,
        controller: ControllerHandle,
    ) -> Self {
        Self {
            page,
            guard: OneShotGuard::new(store.clone()),
            store,
            config,
            controller,
        }
    }

    /// Report a critical failure of work started in `phase`; the job moves
    /// to ERROR unless it has already left that status.
    async fn fail(&self, phase: JobStatus, err: &ReposterError) {
        tracing::error!("Phase failed on {} in {}: {}", self.page.id(), phase, err);
        let event = JobEvent::PhaseFailed {
            page: self.page.id().clone(),
            phase,
            message: err.to_string(),
        };
        if let Err(e) = self.controller.send(event).await {
            tracing::error!("Could not report failure: {}", e);
        }
    }
}

/// One bounded unit of page work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    OpenEditForm,
    CaptureRichText,
    Extract,
    Delete,
    Post(JobStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Skipped(&'static str),
    Ran(Phase),
}

/// Dispatch table: which phase a page of `kind` runs in `status`.
pub fn select(status: JobStatus, kind: PageKind, edit_copy_done: bool) -> Option<Phase> {
    match (status, kind) {
        (JobStatus::Scraping, PageKind::Source) if !edit_copy_done => Some(Phase::OpenEditForm),
        (JobStatus::Scraping, PageKind::Source) => Some(Phase::Extract),
        (JobStatus::Scraping, PageKind::EditForm) => Some(Phase::CaptureRichText),
        (JobStatus::PendingDelete, PageKind::Source) => Some(Phase::Delete),
        (status, PageKind::CreateForm) if status.is_posting() => Some(Phase::Post(status)),
        _ => None,
    }
}

/// Run the agent once for the page in `ctx`.
pub async fn run(ctx: &AgentContext) -> Result<Verdict> {
    if !ctx.config.enabled {
        return Ok(Verdict::Skipped("disabled"));
    }

    wait::settle(ctx.config.timing.page_settle_ms).await;

    let Some(record) = ctx.store.load()? else {
        return Ok(Verdict::Skipped("no job"));
    };
    if record.bound_page != *ctx.page.id() {
        tracing::debug!(
            "Page {} is not bound to job {} (bound to {})",
            ctx.page.id(),
            record.id,
            record.bound_page
        );
        return Ok(Verdict::Skipped("stale page"));
    }
    if record.status.is_terminal() {
        return Ok(Verdict::Skipped("job finished"));
    }

    let url = ctx.page.current_url().await?;
    let kind = site::classify(&ctx.config.site, &record.source_url, &url);
    let edit_copy_done = ctx.guard.is_set(GuardFlag::EditCopy)?;

    let Some(phase) = select(record.status, kind, edit_copy_done) else {
        tracing::debug!("Nothing to do on {:?} page in {}", kind, record.status);
        return Ok(Verdict::Skipped("no phase for page"));
    };

    tracing::info!("Running {:?} on {} ({})", phase, ctx.page.id(), url);
    let result = run_phase(ctx, &record, phase).await;
    if let Err(e) = &result {
        ctx.fail(record.status, e).await;
    }
    result
}

async fn run_phase(ctx: &AgentContext, record: &JobRecord, phase: Phase) -> Result<Verdict> {
    match phase {
        Phase::OpenEditForm => scrape::open_edit_form(ctx, record).await,
        Phase::CaptureRichText => scrape::capture_rich_text(ctx, record).await,
        Phase::Extract => scrape::extract(ctx).await,
        Phase::Delete => delete::delete_listing(ctx).await,
        Phase::Post(status) => post::run_posting_phase(ctx, record, status).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_table() {
        use JobStatus::*;
        assert_eq!(select(Scraping, PageKind::Source, false), Some(Phase::OpenEditForm));
        assert_eq!(select(Scraping, PageKind::Source, true), Some(Phase::Extract));
        assert_eq!(select(Scraping, PageKind::EditForm, true), Some(Phase::CaptureRichText));
        assert_eq!(select(PendingDelete, PageKind::Source, true), Some(Phase::Delete));
        assert_eq!(
            select(Posting3Price, PageKind::CreateForm, false),
            Some(Phase::Post(Posting3Price))
        );
        assert_eq!(select(PendingDelete, PageKind::DeleteSuccess, false), None);
        assert_eq!(select(Posting1Details, PageKind::Source, false), None);
        assert_eq!(select(Scraping, PageKind::CreateForm, false), None);
        assert_eq!(select(Error, PageKind::Source, false), None);
    }
}
