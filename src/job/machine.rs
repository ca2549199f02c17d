//! Pure, table-driven transition function.
//!
//! `decide` looks only at the current record and the incoming event and
//! returns the next status plus the effects the controller must apply. It
//! never touches the store, the browser or the network.

use super::schema::{JobEvent, JobRecord, JobStatus, ListingData, PageId, Trigger};
use crate::config::SiteConfig;
use crate::guard::GuardFlag;
use crate::site;
use serde::Serialize;
use thiserror::Error;

/// One row of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: JobStatus,
    pub trigger: Trigger,
    pub to: JobStatus,
}

const fn row(from: JobStatus, trigger: Trigger, to: JobStatus) -> Transition {
    Transition { from, trigger, to }
}

use JobStatus::*;

/// Every `(from, trigger, to)` the machine may produce.
pub static TRANSITIONS: &[Transition] = &[
    row(Idle, Trigger::Start, Scraping),
    // Extraction
    row(Scraping, Trigger::DataExtracted, PendingDelete),
    row(Scraping, Trigger::DataExtracted, Error),
    row(Scraping, Trigger::RichTextCaptured, Scraping),
    row(PendingDelete, Trigger::RichTextCaptured, PendingDelete),
    // Deletion is only confirmed by observing the redirect
    row(PendingDelete, Trigger::NavigationObserved, Posting1Details),
    // Posting
    row(Posting1Details, Trigger::StepCompleted, Posting2Images),
    row(Posting2Images, Trigger::StepCompleted, Posting3Price),
    row(Posting3Price, Trigger::StepCompleted, Posting4Location),
    row(Posting4Location, Trigger::StepCompleted, Posting5Attributes),
    row(Posting5Attributes, Trigger::StepCompleted, Posting6Final),
    row(Posting6Final, Trigger::StepCompleted, Done),
    row(Posting1Details, Trigger::RichTextCaptured, Posting1Details),
    row(Posting2Images, Trigger::RichTextCaptured, Posting2Images),
    row(Posting3Price, Trigger::RichTextCaptured, Posting3Price),
    row(Posting4Location, Trigger::RichTextCaptured, Posting4Location),
    row(Posting5Attributes, Trigger::RichTextCaptured, Posting5Attributes),
    row(Posting6Final, Trigger::RichTextCaptured, Posting6Final),
    // Failures
    row(Scraping, Trigger::PhaseFailed, Error),
    row(PendingDelete, Trigger::PhaseFailed, Error),
    row(Posting1Details, Trigger::PhaseFailed, Error),
    row(Posting2Images, Trigger::PhaseFailed, Error),
    row(Posting3Price, Trigger::PhaseFailed, Error),
    row(Posting4Location, Trigger::PhaseFailed, Error),
    row(Posting5Attributes, Trigger::PhaseFailed, Error),
    row(Posting6Final, Trigger::PhaseFailed, Error),
    // Cleanup
    row(Scraping, Trigger::Cleanup, Idle),
    row(PendingDelete, Trigger::Cleanup, Idle),
    row(Posting1Details, Trigger::Cleanup, Idle),
    row(Posting2Images, Trigger::Cleanup, Idle),
    row(Posting3Price, Trigger::Cleanup, Idle),
    row(Posting4Location, Trigger::Cleanup, Idle),
    row(Posting5Attributes, Trigger::Cleanup, Idle),
    row(Posting6Final, Trigger::Cleanup, Idle),
    row(Error, Trigger::Cleanup, Idle),
];

pub fn is_listed(from: JobStatus, trigger: Trigger, to: JobStatus) -> bool {
    TRANSITIONS
        .iter()
        .any(|t| t.from == from && t.trigger == trigger && t.to == to)
}

/// Side effects of an accepted decision, applied by the controller in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    CreateRecord { url: String, page: PageId },
    /// Fetch the listing's images, then persist listing and images
    StoreExtraction(Box<ListingData>),
    AppendRichText(String),
    RecordError(String),
    Navigate(String),
    Reload,
    /// Start a fresh page agent on the bound page without navigating
    Handoff,
    /// Must succeed before anything else is applied
    ClaimGuard(GuardFlag),
    ClearGuard(GuardFlag),
    ClearGuards,
    /// Log the job duration and remove the record
    DeleteRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub from: JobStatus,
    pub trigger: Trigger,
    pub next: JobStatus,
    pub effects: Vec<Effect>,
}

/// Why an event did not change the job.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum Rejection {
    #[error("a job is already active ({status})")]
    JobExists { status: JobStatus },

    #[error("no active job")]
    NoJob,

    #[error("page {actual} is not bound to the active job (bound to {expected})")]
    StalePage { expected: PageId, actual: PageId },

    #[error("{trigger} is not accepted in state {status}")]
    WrongState { status: JobStatus, trigger: Trigger },

    #[error("{from} cannot advance to {to}")]
    IllegalTarget { from: JobStatus, to: JobStatus },

    #[error("one-shot action {flag} already ran for this job")]
    GuardHeld { flag: GuardFlag },

    #[error("navigation to {url} carries no transition")]
    Unmatched { url: String },

    #[error("reposting is disabled")]
    Disabled,
}

impl Rejection {
    /// Expected noise (navigation events that match nothing, repeated guards).
    pub fn is_benign(&self) -> bool {
        matches!(self, Rejection::Unmatched { .. } | Rejection::GuardHeld { .. })
    }
}

/// Decide the next status and effects for `event` given the current record.
pub fn decide(
    record: Option<&JobRecord>,
    event: &JobEvent,
    site: &SiteConfig,
) -> Result<Decision, Rejection> {
    let trigger = event.trigger();

    let record = match (record, event) {
        (Some(existing), JobEvent::Start { .. }) => {
            return Err(Rejection::JobExists {
                status: existing.status,
            })
        }
        (None, JobEvent::Start { url, page }) => {
            return accept(
                Idle,
                trigger,
                Scraping,
                vec![
                    Effect::ClearGuards,
                    Effect::CreateRecord {
                        url: url.clone(),
                        page: page.clone(),
                    },
                    Effect::Navigate(url.clone()),
                ],
            );
        }
        (None, _) => return Err(Rejection::NoJob),
        (Some(record), _) => record,
    };

    if let Some(page) = event.page() {
        if *page != record.bound_page {
            return Err(Rejection::StalePage {
                expected: record.bound_page.clone(),
                actual: page.clone(),
            });
        }
    }

    let from = record.status;
    let wrong_state = || Rejection::WrongState {
        status: from,
        trigger,
    };

    match event {
        JobEvent::Start { .. } => Err(wrong_state()),

        JobEvent::DataExtracted { listing, .. } => {
            if from != Scraping {
                return Err(wrong_state());
            }
            if listing.is_empty() {
                return accept(
                    from,
                    trigger,
                    Error,
                    vec![Effect::RecordError(
                        "extraction produced neither title nor description".to_string(),
                    )],
                );
            }
            accept(
                from,
                trigger,
                PendingDelete,
                vec![
                    Effect::StoreExtraction(Box::new(listing.clone())),
                    Effect::ClearGuard(GuardFlag::EditCopy),
                    Effect::Reload,
                ],
            )
        }

        JobEvent::RichTextCaptured { html, .. } => {
            if !is_listed(from, trigger, from) {
                return Err(wrong_state());
            }
            accept(from, trigger, from, vec![Effect::AppendRichText(html.clone())])
        }

        JobEvent::NavigationObserved { url, .. } => {
            if from != PendingDelete || !site::is_delete_success(site, url) {
                return Err(Rejection::Unmatched { url: url.clone() });
            }
            accept(
                from,
                trigger,
                Posting1Details,
                vec![
                    Effect::ClaimGuard(GuardFlag::DeleteObserved),
                    Effect::Navigate(site::create_form_url(site)),
                ],
            )
        }

        JobEvent::StepCompleted { next, .. } => {
            let expected = from.next_posting().ok_or_else(wrong_state)?;
            if *next != expected {
                return Err(Rejection::IllegalTarget { from, to: *next });
            }
            let effects = if expected == Done {
                vec![Effect::ClearGuards, Effect::DeleteRecord]
            } else {
                vec![Effect::Handoff]
            };
            accept(from, trigger, expected, effects)
        }

        JobEvent::PhaseFailed { phase, message, .. } => {
            // A failure from a phase the job already left is stale
            if from.is_terminal() || *phase != from {
                return Err(wrong_state());
            }
            accept(
                from,
                trigger,
                Error,
                vec![Effect::RecordError(message.clone())],
            )
        }

        JobEvent::Cleanup => accept(
            from,
            trigger,
            Idle,
            vec![Effect::ClearGuards, Effect::DeleteRecord],
        ),
    }
}

fn accept(
    from: JobStatus,
    trigger: Trigger,
    next: JobStatus,
    effects: Vec<Effect>,
) -> Result<Decision, Rejection> {
    if !is_listed(from, trigger, next) {
        return Err(Rejection::IllegalTarget { from, to: next });
    }
    Ok(Decision {
        from,
        trigger,
        next,
        effects,
    })
}
