//! POSTING phases on the listing creation form. Each run fills one phase and
//! reports it; the controller hands the page to a fresh agent for the next.

use super::{wait, AgentContext, Phase, Verdict};
use crate::browser::{ElementHandle, Locator};
use crate::error::{ReposterError, Result};
use crate::guard::GuardFlag;
use crate::images;
use crate::job::{JobEvent, JobRecord, JobStatus, ListingData, PriceKind};
use std::time::Duration;

pub async fn run_posting_phase(
    ctx: &AgentContext,
    record: &JobRecord,
    status: JobStatus,
) -> Result<Verdict> {
    let listing = record
        .extracted
        .as_ref()
        .ok_or_else(|| ReposterError::Browser("job has no extracted listing".to_string()))?;

    match status {
        JobStatus::Posting1Details => fill_details(ctx, listing).await?,
        JobStatus::Posting2Images => upload_images(ctx, record).await?,
        JobStatus::Posting3Price => fill_price(ctx, listing).await?,
        JobStatus::Posting4Location => fill_location(ctx, listing).await?,
        JobStatus::Posting5Attributes => fill_attributes(ctx, listing).await?,
        JobStatus::Posting6Final => return submit(ctx).await,
        other => {
            return Err(ReposterError::Browser(format!(
                "{} is not a posting phase",
                other
            )))
        }
    }

    let next = status
        .next_posting()
        .ok_or_else(|| ReposterError::Browser(format!("{} has no successor", status)))?;
    let ack = ctx
        .controller
        .request(JobEvent::StepCompleted {
            page: ctx.page.id().clone(),
            next,
        })
        .await?;
    if !ack.is_accepted() {
        tracing::warn!("{} -> {} not accepted: {:?}", status, next, ack);
    }
    Ok(Verdict::Ran(Phase::Post(status)))
}

async fn required(ctx: &AgentContext, chain: &[Locator], what: &str) -> Result<ElementHandle> {
    wait::wait_for(ctx.page.as_ref(), chain, &ctx.config.timing)
        .await?
        .ok_or_else(|| ReposterError::Browser(format!("{} not found", what)))
}

/// Plain text as editor markup, one paragraph per line.
pub fn text_to_html(text: &str) -> String {
    text.lines()
        .map(|line| {
            let escaped = line
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;");
            if escaped.trim().is_empty() {
                "<p><br></p>".to_string()
            } else {
                format!("<p>{}</p>", escaped)
            }
        })
        .collect()
}

async fn fill_details(ctx: &AgentContext, listing: &ListingData) -> Result<()> {
    let page = ctx.page.as_ref();
    let locators = &ctx.config.site.locators;
    let timing = &ctx.config.timing;

    let title = required(ctx, &locators.form_title, "title field").await?;
    page.fill(&title, &listing.title).await?;
    wait::settle(timing.action_settle_ms).await;

    let editor = required(ctx, &locators.form_description, "description editor").await?;
    let html = match listing.description.rich_html.as_deref() {
        Some(rich) if !rich.trim().is_empty() => rich.to_string(),
        _ => text_to_html(&listing.description.text),
    };
    page.fill_rich_text(&editor, &html).await?;

    // The editor renders asynchronously; wait until it holds the content
    let expected = timing
        .rich_text_min_len
        .min(listing.description.text.trim().len());
    let rendered = wait::poll_until(
        Duration::from_millis(timing.element_timeout_ms),
        Duration::from_millis(timing.poll_interval_ms),
        || async {
            let text = page.read_text(&editor).await?;
            Ok((text.trim().len() >= expected).then_some(()))
        },
    )
    .await?;
    if rendered.is_none() {
        return Err(ReposterError::Browser(
            "description editor did not take the content".to_string(),
        ));
    }
    Ok(())
}

async fn upload_images(ctx: &AgentContext, record: &JobRecord) -> Result<()> {
    if record.images.is_empty() {
        tracing::info!("No images to upload");
        return Ok(());
    }
    let input = required(ctx, &ctx.config.site.locators.file_input, "image file input").await?;
    let files = images::prepare_uploads(&record.images, &ctx.config.images);
    tracing::info!("Uploading {} images", files.len());
    ctx.page.upload_files(&input, &files).await?;
    wait::settle(ctx.config.timing.upload_settle_ms).await;

    let previews = ctx
        .page
        .locate_all(&ctx.config.site.locators.upload_previews)
        .await?;
    if previews.len() < files.len() {
        tracing::warn!(
            "{} of {} image previews visible after upload",
            previews.len(),
            files.len()
        );
    }
    Ok(())
}

/// "12,50" / "40"; the form expects a decimal comma.
pub fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{}", amount as i64)
    } else {
        format!("{:.2}", amount).replace('.', ",")
    }
}

async fn fill_price(ctx: &AgentContext, listing: &ListingData) -> Result<()> {
    let page = ctx.page.as_ref();
    let site = &ctx.config.site;
    let values = &site.price_kind_values;

    let kind_value = match listing.price.kind {
        PriceKind::Fixed => &values.fixed,
        PriceKind::Bidding => &values.bidding,
        PriceKind::Free => &values.free,
    };
    let dropdown = required(ctx, &site.locators.price_kind, "price type dropdown").await?;
    page.select_value(&dropdown, kind_value).await?;
    wait::settle(ctx.config.timing.action_settle_ms).await;

    if listing.price.kind == PriceKind::Free {
        return Ok(());
    }
    match (listing.price.amount, page.locate(&site.locators.price_input).await?) {
        (Some(amount), Some(input)) => page.fill(&input, &format_amount(amount)).await?,
        (None, _) => tracing::warn!("No price amount in {:?}", listing.price.raw),
        (_, None) => tracing::warn!("Price field not found"),
    }
    Ok(())
}

async fn fill_location(ctx: &AgentContext, listing: &ListingData) -> Result<()> {
    let page = ctx.page.as_ref();
    let locators = &ctx.config.site.locators;

    if let Some(postcode) = &listing.postcode {
        match page.locate(&locators.postcode_input).await? {
            Some(input) => page.fill(&input, postcode).await?,
            None => tracing::debug!("No postcode field, keeping account default"),
        }
    }
    match page.locate(&locators.delivery_pickup).await? {
        Some(pickup) => {
            page.click(&pickup).await?;
            wait::settle(ctx.config.timing.action_settle_ms).await;
        }
        None => tracing::warn!("Pickup option not found"),
    }
    Ok(())
}

async fn fill_attributes(ctx: &AgentContext, listing: &ListingData) -> Result<()> {
    let page = ctx.page.as_ref();
    let template = &ctx.config.site.attribute_field_template;
    let mut filled = 0;
    for (key, value) in &listing.attributes {
        let css = template.replace("{key}", &key.replace('"', "\\\""));
        match page.locate(&[Locator::css(css)]).await? {
            Some(field) => {
                page.fill(&field, value).await?;
                filled += 1;
            }
            None => tracing::debug!("No field for attribute {:?}", key),
        }
    }
    tracing::info!("Filled {}/{} attributes", filled, listing.attributes.len());
    Ok(())
}

/// Final phase. Submit is one-shot; completion is sent fire-and-forget since
/// the click navigates the page away.
async fn submit(ctx: &AgentContext) -> Result<Verdict> {
    let page = ctx.page.as_ref();
    let locators = &ctx.config.site.locators;
    let timing = &ctx.config.timing;

    if let Some(bundle) = page.locate(&locators.free_bundle).await? {
        page.click(&bundle).await?;
        wait::settle(timing.action_settle_ms).await;
    }

    let clicked = ctx
        .guard
        .run_once(GuardFlag::Submit, || async {
            let button = required(ctx, &locators.submit, "submit button").await?;
            let enabled = wait::poll_until(
                Duration::from_millis(timing.element_timeout_ms),
                Duration::from_millis(timing.poll_interval_ms),
                || async { Ok(page.is_enabled(&button).await?.then_some(())) },
            )
            .await?;
            if enabled.is_none() {
                return Err(ReposterError::Browser(
                    "submit button stayed disabled".to_string(),
                ));
            }
            page.click(&button).await?;
            tracing::info!("Submitted the new listing");
            Ok(())
        })
        .await?;

    if clicked.is_none() {
        tracing::info!("Submit already clicked, re-sending completion");
    }
    ctx.controller
        .send(JobEvent::StepCompleted {
            page: page.id().clone(),
            next: JobStatus::Done,
        })
        .await?;

    Ok(match clicked {
        Some(()) => Verdict::Ran(Phase::Post(JobStatus::Posting6Final)),
        None => Verdict::Skipped("submit already clicked"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_to_html() {
        assert_eq!(
            text_to_html("Mooie bank\n\n3 <zits>"),
            "<p>Mooie bank</p><p><br></p><p>3 &lt;zits&gt;</p>"
        );
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(40.0), "40");
        assert_eq!(format_amount(12.5), "12,50");
        assert_eq!(format_amount(1250.0), "1250");
    }
}
