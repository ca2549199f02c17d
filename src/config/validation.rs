use crate::config::schema::{AppConfig, ImageConfig, SiteConfig};
use crate::error::{ReposterError, Result};
use std::path::Path;

/// Validate Chrome executable path
pub fn validate_chrome_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(ReposterError::Validation(format!(
            "Chrome executable not found at {:?}",
            path
        )));
    }

    if !path.is_file() {
        return Err(ReposterError::Validation(format!(
            "Chrome path {:?} is not a file",
            path
        )));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = path.metadata().map_err(|e| {
            ReposterError::Validation(format!("Cannot read Chrome file metadata: {}", e))
        })?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(ReposterError::Validation(format!(
                "Chrome executable {:?} is not executable",
                path
            )));
        }
    }

    Ok(())
}

/// Validate a whole configuration. Chrome path existence is checked at launch,
/// not here, so attach-only setups on machines without Chrome still load.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.browser.cdp_port == 0 {
        return Err(ReposterError::Validation(
            "browser.cdp_port cannot be 0".to_string(),
        ));
    }
    if config.api.port == 0 {
        return Err(ReposterError::Validation("api.port cannot be 0".to_string()));
    }
    if let Some(key) = &config.api.api_key {
        if key.trim().is_empty() {
            return Err(ReposterError::Validation(
                "api.api_key is set but empty".to_string(),
            ));
        }
    }
    if config.store.path.as_os_str().is_empty() {
        return Err(ReposterError::Validation(
            "store.path cannot be empty".to_string(),
        ));
    }
    if config.timing.poll_interval_ms == 0 {
        return Err(ReposterError::Validation(
            "timing.poll_interval_ms must be positive".to_string(),
        ));
    }
    validate_site(&config.site)?;
    validate_images(&config.images)?;
    Ok(())
}

/// Validate site URLs and markers
pub fn validate_site(site: &SiteConfig) -> Result<()> {
    if !site.base_url.starts_with("http://") && !site.base_url.starts_with("https://") {
        return Err(ReposterError::Validation(format!(
            "Invalid site.base_url: {}. Must start with http:// or https://",
            site.base_url
        )));
    }
    if site.base_url.ends_with('/') {
        return Err(ReposterError::Validation(
            "site.base_url must not end with '/'".to_string(),
        ));
    }
    if !site.create_form_path.starts_with('/') {
        return Err(ReposterError::Validation(
            "site.create_form_path must start with '/'".to_string(),
        ));
    }
    if !site.edit_path_template.contains("{id}") {
        return Err(ReposterError::Validation(
            "site.edit_path_template must contain {id}".to_string(),
        ));
    }
    if site.listing_id_markers.iter().all(|m| m.is_empty()) {
        return Err(ReposterError::Validation(
            "site.listing_id_markers needs at least one marker".to_string(),
        ));
    }
    if site.delete_success_markers.is_empty() {
        return Err(ReposterError::Validation(
            "site.delete_success_markers needs at least one marker".to_string(),
        ));
    }
    if site.locators.delete_button.is_empty() || site.locators.submit.is_empty() {
        return Err(ReposterError::Validation(
            "site.locators.delete_button and site.locators.submit cannot be empty".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_images(images: &ImageConfig) -> Result<()> {
    if images.max_dimension == 0 {
        return Err(ReposterError::Validation(
            "images.max_dimension must be positive".to_string(),
        ));
    }
    if images.initial_quality == 0 || images.initial_quality > 100 {
        return Err(ReposterError::Validation(format!(
            "images.initial_quality {} out of range 1..=100",
            images.initial_quality
        )));
    }
    if images.min_quality == 0 || images.min_quality > images.initial_quality {
        return Err(ReposterError::Validation(format!(
            "images.min_quality {} must be in 1..={}",
            images.min_quality, images.initial_quality
        )));
    }
    if images.quality_step == 0 {
        return Err(ReposterError::Validation(
            "images.quality_step must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_bad_base_url() {
        let mut config = AppConfig::default();
        config.site.base_url = "marktplaats.nl".to_string();
        assert!(validate_config(&config).is_err());

        config.site.base_url = "https://www.marktplaats.nl/".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_edit_template_needs_id() {
        let mut config = AppConfig::default();
        config.site.edit_path_template = "/plaats/edit".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_quality_range() {
        let mut config = AppConfig::default();
        config.images.min_quality = 95;
        assert!(validate_config(&config).is_err());

        config.images.min_quality = 40;
        config.images.quality_step = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_empty_api_key() {
        let mut config = AppConfig::default();
        config.api.api_key = Some("  ".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_missing_chrome() {
        assert!(validate_chrome_path(Path::new("/definitely/not/chrome")).is_err());
    }
}
