//! `PageCapabilities` over CDP `Runtime.evaluate`.
//!
//! Locators and values are embedded as JSON literals, never spliced in as
//! raw text.

use super::capability::{ElementHandle, Locator, PageCapabilities, UploadFile};
use super::cdp::CdpClient;
use crate::controller::Navigator;
use crate::error::{ReposterError, Result};
use crate::job::PageId;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;

const FIND_JS: &str = r#"const __find = (loc) => {
  let els = [];
  try { els = Array.from(document.querySelectorAll(loc.css)); } catch (e) { return []; }
  if (loc.text) {
    const t = loc.text.toLowerCase();
    els = els.filter(el => (el.textContent || '').toLowerCase().includes(t));
  }
  if (loc.visible) {
    els = els.filter(el => el.offsetParent !== null || el.getClientRects().length > 0);
  }
  return els;
};"#;

fn js_literal<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn count_script(locator: &Locator) -> Result<String> {
    Ok(format!(
        "(() => {{ {} return __find({}).length; }})()",
        FIND_JS,
        js_literal(locator)?
    ))
}

/// Wrap `body` (which sees the element as `el`) so the result is
/// `{found, value}`.
fn element_script(element: &ElementHandle, body: &str) -> Result<String> {
    Ok(format!(
        "(async () => {{ {} const el = __find({})[{}]; if (!el) return {{ found: false }}; \
         const value = await (async () => {{ {} }})(); return {{ found: true, value }}; }})()",
        FIND_JS,
        js_literal(&element.locator)?,
        element.index,
        body
    ))
}

pub struct CdpPage {
    client: Arc<CdpClient>,
    id: PageId,
}

impl CdpPage {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let id = client.target_id().clone();
        Self { client, id }
    }

    async fn with_element(&self, element: &ElementHandle, body: &str) -> Result<Value> {
        let result = self.client.evaluate(&element_script(element, body)?).await?;
        if result.get("found").and_then(|f| f.as_bool()) != Some(true) {
            return Err(ReposterError::Browser(format!(
                "Element {} #{} is gone",
                element.locator, element.index
            )));
        }
        Ok(result.get("value").cloned().unwrap_or(Value::Null))
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        let value = self.client.evaluate(&count_script(locator)?).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    fn check_page(&self, page: &PageId) -> Result<()> {
        if *page != self.id {
            return Err(ReposterError::Browser(format!(
                "Page {} is not attached (attached: {})",
                page, self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PageCapabilities for CdpPage {
    fn id(&self) -> &PageId {
        &self.id
    }

    async fn current_url(&self) -> Result<String> {
        self.client.current_url().await
    }

    async fn locate(&self, chain: &[Locator]) -> Result<Option<ElementHandle>> {
        for locator in chain {
            if self.count(locator).await? > 0 {
                tracing::debug!("Located {}", locator);
                return Ok(Some(ElementHandle::new(locator.clone(), 0)));
            }
        }
        Ok(None)
    }

    async fn locate_all(&self, chain: &[Locator]) -> Result<Vec<ElementHandle>> {
        for locator in chain {
            let n = self.count(locator).await?;
            if n > 0 {
                tracing::debug!("Located {} x{}", locator, n);
                return Ok((0..n)
                    .map(|i| ElementHandle::new(locator.clone(), i))
                    .collect());
            }
        }
        Ok(Vec::new())
    }

    async fn read_text(&self, element: &ElementHandle) -> Result<String> {
        let value = self
            .with_element(
                element,
                "return (el.innerText || el.value || el.textContent || '').trim();",
            )
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn read_html(&self, element: &ElementHandle) -> Result<String> {
        let value = self.with_element(element, "return el.innerHTML;").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn read_attribute(&self, element: &ElementHandle, name: &str) -> Result<Option<String>> {
        // Prefer the resolved DOM property (absolute `src`, `href`)
        let body = format!(
            "const n = {}; return (n in el && typeof el[n] === 'string') ? el[n] : el.getAttribute(n);",
            js_literal(name)?
        );
        let value = self.with_element(element, &body).await?;
        Ok(value
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> Result<()> {
        let body = format!(
            "el.focus(); \
             const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype; \
             const desc = Object.getOwnPropertyDescriptor(proto, 'value'); \
             if (desc && desc.set) {{ desc.set.call(el, {v}); }} else {{ el.value = {v}; }} \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             el.blur(); return true;",
            v = js_literal(value)?
        );
        self.with_element(element, &body).await?;
        tracing::debug!("Filled {}", element.locator);
        Ok(())
    }

    async fn fill_rich_text(&self, element: &ElementHandle, html: &str) -> Result<()> {
        let body = format!(
            "el.focus(); el.innerHTML = {}; \
             el.dispatchEvent(new InputEvent('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;",
            js_literal(html)?
        );
        self.with_element(element, &body).await?;
        tracing::debug!("Filled rich text {}", element.locator);
        Ok(())
    }

    async fn select_value(&self, element: &ElementHandle, value: &str) -> Result<()> {
        let body = format!(
            "const v = {}; \
             if (el instanceof HTMLSelectElement && !Array.from(el.options).some(o => o.value === v)) return false; \
             el.value = v; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;",
            js_literal(value)?
        );
        let selected = self.with_element(element, &body).await?;
        if selected.as_bool() != Some(true) {
            return Err(ReposterError::Browser(format!(
                "Option {:?} not available in {}",
                value, element.locator
            )));
        }
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> Result<()> {
        self.with_element(
            element,
            "el.scrollIntoView({ block: 'center' }); el.click(); return true;",
        )
        .await?;
        tracing::debug!("Clicked {}", element.locator);
        Ok(())
    }

    async fn is_enabled(&self, element: &ElementHandle) -> Result<bool> {
        let value = self
            .with_element(
                element,
                "return !el.disabled && el.getAttribute('aria-disabled') !== 'true';",
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn upload_files(&self, element: &ElementHandle, files: &[UploadFile]) -> Result<()> {
        let payload: Vec<Value> = files
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "type": f.mime_type,
                    "data": STANDARD.encode(&f.bytes),
                })
            })
            .collect();
        let body = format!(
            "const dt = new DataTransfer(); \
             for (const f of {}) {{ \
               const bin = atob(f.data); const arr = new Uint8Array(bin.length); \
               for (let i = 0; i < bin.length; i++) arr[i] = bin.charCodeAt(i); \
               dt.items.add(new File([arr], f.name, {{ type: f.type }})); \
             }} \
             el.files = dt.files; \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             return dt.files.length;",
            js_literal(&payload)?
        );
        let attached = self.with_element(element, &body).await?;
        tracing::debug!("Attached {} files to {}", attached, element.locator);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.client.navigate(url).await
    }

    async fn go_back(&self) -> Result<()> {
        self.client.go_back().await
    }
}

#[async_trait]
impl Navigator for CdpPage {
    async fn navigate(&self, page: &PageId, url: &str) -> Result<()> {
        self.check_page(page)?;
        self.client.navigate(url).await
    }

    async fn reload(&self, page: &PageId) -> Result<()> {
        self.check_page(page)?;
        self.client.reload().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_embedded_as_json() {
        let handle = ElementHandle::new(Locator::text("button[data-x='a\"b']", "niet verkocht"), 2);
        let script = element_script(&handle, "return 1;").unwrap();
        assert!(script.contains(r#""css":"button[data-x='a\"b']""#));
        assert!(script.contains(r#""text":"niet verkocht""#));
        assert!(script.contains("__find({"));
        assert!(script.contains("})[2]"));
    }

    #[test]
    fn test_values_are_escaped() {
        let literal = js_literal("it's a \"sofa\"\n</script>").unwrap();
        assert_eq!(literal, r#""it's a \"sofa\"\n</script>""#);
    }

    #[test]
    fn test_count_script_has_no_index() {
        let script = count_script(&Locator::css("h1")).unwrap();
        assert!(script.ends_with(".length; })()"));
    }
}
