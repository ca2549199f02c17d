//! SCRAPING phases: edit-form rich text copy, then listing extraction.

use super::{wait, AgentContext, Phase, Verdict};
use crate::browser::{Locator, PageCapabilities};
use crate::error::Result;
use crate::guard::GuardFlag;
use crate::job::{now_ms, Description, JobEvent, JobRecord, ListingData, Price, PriceKind};
use crate::site;
use std::collections::BTreeMap;
use std::time::Duration;

/// Claim the edit-copy guard, then leave for the edit form. Without a
/// listing id the copy is skipped and extraction runs right away.
pub async fn open_edit_form(ctx: &AgentContext, record: &JobRecord) -> Result<Verdict> {
    if !ctx.guard.claim(GuardFlag::EditCopy)? {
        return Ok(Verdict::Skipped("edit copy already started"));
    }

    match site::listing_id(&ctx.config.site, &record.source_url) {
        Some(id) => {
            let url = site::edit_url(&ctx.config.site, &id);
            tracing::info!("Opening edit form {} to copy the description", url);
            ctx.page.navigate(&url).await?;
            Ok(Verdict::Ran(Phase::OpenEditForm))
        }
        None => {
            tracing::warn!(
                "No listing id in {}, extracting without rich text",
                record.source_url
            );
            extract(ctx).await
        }
    }
}

/// Wait for the editor to fill, report its markup, and return to the listing.
pub async fn capture_rich_text(ctx: &AgentContext, record: &JobRecord) -> Result<Verdict> {
    let timing = &ctx.config.timing;
    let page = ctx.page.as_ref();

    let html = match wait::wait_for(page, &ctx.config.site.locators.edit_rich_text, timing).await? {
        Some(editor) => {
            let min_len = timing.rich_text_min_len;
            let loaded = wait::poll_until(
                Duration::from_millis(timing.element_timeout_ms),
                Duration::from_millis(timing.poll_interval_ms),
                || async {
                    let html = page.read_html(&editor).await?;
                    Ok((html.trim().len() >= min_len).then_some(html))
                },
            )
            .await?;
            match loaded {
                Some(html) => Some(html),
                // Short descriptions never reach the threshold
                None => Some(page.read_html(&editor).await?).filter(|h| !h.trim().is_empty()),
            }
        }
        None => {
            tracing::warn!("Edit form editor not found, continuing without rich text");
            None
        }
    };

    if let Some(html) = html {
        let event = JobEvent::RichTextCaptured {
            page: page.id().clone(),
            html,
        };
        let ack = ctx.controller.request(event).await?;
        tracing::debug!("Rich text capture: {:?}", ack);
    }

    if let Err(e) = page.go_back().await {
        tracing::warn!("History back failed ({}), opening listing directly", e);
        page.navigate(&record.source_url).await?;
    }
    Ok(Verdict::Ran(Phase::CaptureRichText))
}

/// Read the listing and hand it to the controller. Missing fields degrade to
/// empty values; the controller decides whether the result is usable.
pub async fn extract(ctx: &AgentContext) -> Result<Verdict> {
    let listing = read_listing(ctx).await?;
    tracing::info!(
        "Extracted {:?}: {} images, {} attributes",
        listing.title,
        listing.image_urls.len(),
        listing.attributes.len()
    );

    // The controller reloads this page once it accepts
    ctx.controller
        .send(JobEvent::DataExtracted {
            page: ctx.page.id().clone(),
            listing,
        })
        .await?;
    Ok(Verdict::Ran(Phase::Extract))
}

pub async fn read_listing(ctx: &AgentContext) -> Result<ListingData> {
    let site = &ctx.config.site;
    let loc = &site.locators;
    let page = ctx.page.as_ref();

    let title = first_text(page, &loc.title).await?.unwrap_or_else(|| {
        tracing::warn!("No title found");
        String::new()
    });

    let description = match page.locate(&loc.description).await? {
        Some(el) => Description {
            text: page.read_text(&el).await?,
            html: page.read_html(&el).await?.trim().to_string(),
            rich_html: None,
        },
        None => {
            tracing::warn!("No description found");
            Description::default()
        }
    };

    let raw_price = first_text(page, &loc.price).await?.unwrap_or_default();
    let body_text = first_text(page, &loc.page_body)
        .await?
        .unwrap_or_default()
        .to_lowercase();
    let kind = price_kind(&body_text, &site.free_keyword, &site.bidding_keyword);

    let mut category_path = Vec::new();
    for el in page.locate_all(&loc.category_items).await? {
        let text = page.read_text(&el).await?;
        if !text.is_empty() {
            category_path.push(text);
        }
    }

    let location = first_text(page, &loc.location).await?.unwrap_or_default();
    let postcode = find_postcode(&location).or_else(|| find_postcode(&body_text));

    let mut attributes = BTreeMap::new();
    for el in page.locate_all(&loc.attribute_rows).await? {
        if let Some((key, value)) = split_attribute(&page.read_text(&el).await?) {
            attributes.insert(key, value);
        }
    }

    // Every image source contributes, hero first
    let mut image_urls: Vec<String> = Vec::new();
    for locator in &loc.images {
        for el in page.locate_all(std::slice::from_ref(locator)).await? {
            if let Some(src) = page.read_attribute(&el, "src").await? {
                if src.starts_with("http") && !image_urls.contains(&src) {
                    image_urls.push(src);
                }
            }
        }
    }

    Ok(ListingData {
        title,
        description,
        price: Price {
            amount: parse_amount(&raw_price),
            raw: raw_price,
            kind,
        },
        location,
        postcode,
        category_path,
        attributes,
        image_urls,
        scraped_at: now_ms(),
    })
}

async fn first_text(page: &dyn PageCapabilities, chain: &[Locator]) -> Result<Option<String>> {
    match page.locate(chain).await? {
        Some(el) => Ok(Some(page.read_text(&el).await?)),
        None => Ok(None),
    }
}

/// "€ 1.250,00" -> 1250.0. Thousands dots are dropped, the decimal comma kept.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.replacen(',', ".", 1).parse().ok()
}

pub fn price_kind(page_text_lower: &str, free_keyword: &str, bidding_keyword: &str) -> PriceKind {
    if !free_keyword.is_empty() && page_text_lower.contains(free_keyword) {
        PriceKind::Free
    } else if !bidding_keyword.is_empty() && page_text_lower.contains(bidding_keyword) {
        PriceKind::Bidding
    } else {
        PriceKind::Fixed
    }
}

/// First Dutch postcode ("1234 AB" / "1234AB") in `text`, normalized to "1234 AB".
pub fn find_postcode(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    for start in 0..chars.len() {
        if start > 0 && chars[start - 1].is_ascii_digit() {
            continue;
        }
        let digits: String = chars[start..].iter().take(4).collect();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let mut i = start + 4;
        while i < chars.len() && chars[i] == ' ' {
            i += 1;
        }
        let letters: String = chars[i..].iter().take(2).collect();
        if letters.chars().count() == 2 && letters.chars().all(|c| c.is_ascii_alphabetic()) {
            let after = chars.get(i + 2);
            if after.map(|c| c.is_ascii_alphabetic()).unwrap_or(false) {
                continue;
            }
            return Some(format!("{} {}", digits, letters.to_uppercase()));
        }
    }
    None
}

/// "Conditie: Gebruikt" or "Conditie\nGebruikt" -> ("Conditie", "Gebruikt").
pub fn split_attribute(row: &str) -> Option<(String, String)> {
    let (key, value) = row.split_once(':').or_else(|| row.split_once('\n'))?;
    let (key, value) = (key.trim(), value.trim());
    (!key.is_empty() && !value.is_empty()).then(|| (key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("€ 1.250,00"), Some(1250.0));
        assert_eq!(parse_amount("€ 12,50"), Some(12.5));
        assert_eq!(parse_amount("€ 40"), Some(40.0));
        assert_eq!(parse_amount("Bieden"), None);
    }

    #[test]
    fn test_price_kind() {
        assert_eq!(price_kind("prijs: gratis af te halen", "gratis", "bieden"), PriceKind::Free);
        assert_eq!(price_kind("bieden vanaf € 10", "gratis", "bieden"), PriceKind::Bidding);
        assert_eq!(price_kind("€ 10", "gratis", "bieden"), PriceKind::Fixed);
    }

    #[test]
    fn test_find_postcode() {
        assert_eq!(find_postcode("Ophalen in 1234ab Utrecht"), Some("1234 AB".to_string()));
        assert_eq!(find_postcode("3511 LX"), Some("3511 LX".to_string()));
        assert_eq!(find_postcode("Tel 0612345678"), None);
        assert_eq!(find_postcode("2024 bought"), None);
        assert_eq!(find_postcode(""), None);
    }

    #[test]
    fn test_split_attribute() {
        assert_eq!(
            split_attribute("Conditie: Gebruikt"),
            Some(("Conditie".to_string(), "Gebruikt".to_string()))
        );
        assert_eq!(
            split_attribute("Merk\nIKEA"),
            Some(("Merk".to_string(), "IKEA".to_string()))
        );
        assert_eq!(split_attribute("Leeg:"), None);
    }
}
