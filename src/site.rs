//! URL knowledge about the marketplace: page classification, listing ids,
//! and the delete-success redirect.

use crate::config::SiteConfig;
use reqwest::Url;

/// What the bound page is currently showing, relative to the active job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// The listing being reposted
    Source,
    /// Edit form of the listing being reposted
    EditForm,
    /// Listing creation form
    CreateForm,
    /// Redirect target after a successful delete
    DeleteSuccess,
    Other,
}

pub fn create_form_url(site: &SiteConfig) -> String {
    format!("{}{}", site.base_url, site.create_form_path)
}

pub fn edit_url(site: &SiteConfig, listing_id: &str) -> String {
    format!(
        "{}{}",
        site.base_url,
        site.edit_path_template.replace("{id}", listing_id)
    )
}

/// Listing id taken from the path segment after the first matching marker.
pub fn listing_id(site: &SiteConfig, url: &str) -> Option<String> {
    let path = Url::parse(url).ok()?.path().to_string();
    site.listing_id_markers
        .iter()
        .filter(|m| !m.is_empty())
        .find_map(|marker| {
            let rest = &path[path.find(marker.as_str())? + marker.len()..];
            let id = rest.split('/').next().unwrap_or_default();
            (!id.is_empty()).then(|| id.to_string())
        })
}

/// True when `url` carries every configured delete-success marker.
pub fn is_delete_success(site: &SiteConfig, url: &str) -> bool {
    !site.delete_success_markers.is_empty()
        && site
            .delete_success_markers
            .iter()
            .all(|marker| url.contains(marker.as_str()))
}

/// Same host and path, ignoring query, fragment and trailing slash.
pub fn same_page(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            a.host_str() == b.host_str()
                && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
        }
        _ => false,
    }
}

fn on_site_path(site: &SiteConfig, url: &Url, path: &str) -> bool {
    let base_host = Url::parse(&site.base_url)
        .ok()
        .and_then(|b| b.host_str().map(str::to_string));
    url.host_str().map(str::to_string) == base_host
        && url.path().trim_end_matches('/') == path.trim_end_matches('/')
}

pub fn classify(site: &SiteConfig, source_url: &str, current_url: &str) -> PageKind {
    if is_delete_success(site, current_url) {
        return PageKind::DeleteSuccess;
    }
    if same_page(source_url, current_url) {
        return PageKind::Source;
    }
    let Ok(current) = Url::parse(current_url) else {
        return PageKind::Other;
    };
    if let Some(id) = listing_id(site, source_url) {
        let edit_path = site.edit_path_template.replace("{id}", &id);
        if on_site_path(site, &current, &edit_path) {
            return PageKind::EditForm;
        }
    }
    if on_site_path(site, &current, &site.create_form_path) {
        return PageKind::CreateForm;
    }
    PageKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "https://www.marktplaats.nl/seller/view/m2087654321";

    #[test]
    fn test_listing_id() {
        let site = SiteConfig::default();
        assert_eq!(
            listing_id(&site, "https://www.marktplaats.nl/seller/view/m2087654321?foo=1"),
            Some("m2087654321".to_string())
        );
        assert_eq!(listing_id(&site, "https://www.marktplaats.nl/my-account"), None);
        assert_eq!(listing_id(&site, "not a url"), None);
    }

    #[test]
    fn test_edit_and_create_urls() {
        let site = SiteConfig::default();
        assert_eq!(
            edit_url(&site, "m1"),
            "https://www.marktplaats.nl/plaats/m1/edit"
        );
        assert_eq!(create_form_url(&site), "https://www.marktplaats.nl/plaats");
    }

    #[test]
    fn test_classify() {
        let site = SiteConfig::default();
        assert_eq!(
            classify(&site, SOURCE, "https://www.marktplaats.nl/seller/view/m2087654321/#top"),
            PageKind::Source
        );
        assert_eq!(
            classify(&site, SOURCE, "https://www.marktplaats.nl/plaats/m2087654321/edit"),
            PageKind::EditForm
        );
        assert_eq!(
            classify(&site, SOURCE, "https://www.marktplaats.nl/plaats/m999/edit"),
            PageKind::Other
        );
        assert_eq!(
            classify(&site, SOURCE, "https://www.marktplaats.nl/plaats"),
            PageKind::CreateForm
        );
        assert_eq!(
            classify(
                &site,
                SOURCE,
                "https://www.marktplaats.nl/my-account/sell/index.html?previousAction=deleteAdSuccess"
            ),
            PageKind::DeleteSuccess
        );
        assert_eq!(
            classify(&site, SOURCE, "https://elsewhere.example/plaats"),
            PageKind::Other
        );
    }

    #[test]
    fn test_delete_success_requires_all_markers() {
        let site = SiteConfig::default();
        assert!(!is_delete_success(
            &site,
            "https://www.marktplaats.nl/my-account/sell/index.html"
        ));
        assert!(!is_delete_success(
            &site,
            "https://www.marktplaats.nl/?previousAction=deleteAdSuccess"
        ));
    }
}
