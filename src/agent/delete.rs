//! PENDING_DELETE phase: delete the source listing.
//!
//! Success is never reported from here. The host site redirects away right
//! after the confirm click, and the controller picks that redirect up from
//! the navigation observer.

use super::{wait, AgentContext, Phase, Verdict};
use crate::error::{ReposterError, Result};
use crate::guard::GuardFlag;

pub async fn delete_listing(ctx: &AgentContext) -> Result<Verdict> {
    let page = ctx.page.as_ref();
    let locators = &ctx.config.site.locators;
    let timing = &ctx.config.timing;

    let ran = ctx
        .guard
        .run_once(GuardFlag::DeleteClick, || async {
            let button = page.locate(&locators.delete_button).await?.ok_or_else(|| {
                ReposterError::Browser("delete button not found".to_string())
            })?;
            page.click(&button).await?;
            tracing::info!("Clicked delete, waiting for confirmation dialog");

            wait::settle(timing.action_settle_ms).await;
            let confirm = wait::wait_for(page, &locators.delete_confirm, timing)
                .await?
                .ok_or_else(|| {
                    ReposterError::Browser("delete confirmation button never appeared".to_string())
                })?;
            page.click(&confirm).await?;
            tracing::info!("Confirmed delete, waiting for redirect");
            Ok(())
        })
        .await?;

    match ran {
        Some(()) => Ok(Verdict::Ran(Phase::Delete)),
        None => {
            tracing::info!("Delete already clicked for this job, waiting for redirect");
            Ok(Verdict::Skipped("delete already clicked"))
        }
    }
}
