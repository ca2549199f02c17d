//! Image pipeline: fetch and encode on extraction, decode and shrink on upload.

use crate::browser::UploadFile;
use crate::config::ImageConfig;
use crate::error::{ReposterError, Result};
use crate::job::ImageBlob;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use std::time::Duration;

const FALLBACK_MIME: &str = "image/jpeg";

#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedImage>;
}

pub struct HttpImageFetcher {
    client: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(config: &ImageConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty());
        let bytes = resp.bytes().await?.to_vec();
        Ok(FetchedImage { bytes, mime_type })
    }
}

pub fn encode_blob(source_url: &str, image: FetchedImage) -> ImageBlob {
    ImageBlob {
        source_url: source_url.to_string(),
        size: image.bytes.len(),
        data: STANDARD.encode(&image.bytes),
        mime_type: image
            .mime_type
            .unwrap_or_else(|| FALLBACK_MIME.to_string()),
    }
}

pub fn decode_blob(blob: &ImageBlob) -> Result<Vec<u8>> {
    STANDARD
        .decode(blob.data.as_bytes())
        .map_err(|e| ReposterError::Image(format!("{}: {}", blob.source_url, e)))
}

/// Fetch every URL in order. Failed images are skipped.
pub async fn fetch_all(fetcher: &dyn ImageFetcher, urls: &[String]) -> Vec<ImageBlob> {
    let mut blobs = Vec::with_capacity(urls.len());
    for url in urls {
        match fetcher.fetch(url).await {
            Ok(image) if image.bytes.is_empty() => {
                tracing::warn!("Skipping image {}: empty body", url);
            }
            Ok(image) => blobs.push(encode_blob(url, image)),
            Err(e) => tracing::warn!("Skipping image {}: {}", url, e),
        }
    }
    tracing::info!("Fetched {}/{} images", blobs.len(), urls.len());
    blobs
}

/// Shrink `bytes` below `config.max_upload_bytes` if needed. Images that
/// cannot be decoded are returned unchanged.
pub fn recompress(bytes: Vec<u8>, config: &ImageConfig) -> Vec<u8> {
    if bytes.len() <= config.max_upload_bytes {
        return bytes;
    }

    let img = match image::load_from_memory(&bytes) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!("Cannot decode image for recompression: {}", e);
            return bytes;
        }
    };

    let img = if img.width() > config.max_dimension || img.height() > config.max_dimension {
        img.resize(config.max_dimension, config.max_dimension, FilterType::Lanczos3)
    } else {
        img
    };
    let rgb = img.to_rgb8();

    let mut quality = config.initial_quality;
    let mut best: Option<Vec<u8>> = None;
    loop {
        let mut out = Vec::new();
        let encoded = JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb);
        match encoded {
            Ok(()) => {
                let fits = out.len() <= config.max_upload_bytes;
                tracing::debug!("Recompressed at quality {}: {} bytes", quality, out.len());
                best = Some(out);
                if fits {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("JPEG encode at quality {} failed: {}", quality, e);
                break;
            }
        }
        if quality <= config.min_quality {
            break;
        }
        quality = quality
            .saturating_sub(config.quality_step)
            .max(config.min_quality);
    }

    best.unwrap_or(bytes)
}

/// Decode, shrink and name the stored images for upload, keeping order.
pub fn prepare_uploads(blobs: &[ImageBlob], config: &ImageConfig) -> Vec<UploadFile> {
    blobs
        .iter()
        .filter_map(|blob| match decode_blob(blob) {
            Ok(bytes) => Some((blob, bytes)),
            Err(e) => {
                tracing::warn!("Dropping undecodable image: {}", e);
                None
            }
        })
        .enumerate()
        .map(|(i, (blob, bytes))| {
            let original = bytes.len();
            let bytes = recompress(bytes, config);
            let mime_type = if bytes.len() != original {
                FALLBACK_MIME.to_string()
            } else {
                blob.mime_type.clone()
            };
            UploadFile {
                name: format!("image_{}.jpg", i + 1),
                mime_type,
                bytes,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeFetcher {
        images: HashMap<String, Vec<u8>>,
    }

    #[async_trait]
    impl ImageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedImage> {
            self.images
                .get(url)
                .map(|bytes| FetchedImage {
                    bytes: bytes.clone(),
                    mime_type: None,
                })
                .ok_or_else(|| ReposterError::Image(format!("404 {}", url)))
        }
    }

    fn noisy_png(width: u32, height: u32) -> Vec<u8> {
        let mut seed: u32 = 12345;
        let img = image::RgbImage::from_fn(width, height, |_, _| {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let b = seed.to_be_bytes();
            image::Rgb([b[0], b[1], b[2]])
        });
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_fetch_all_skips_failures_in_order() {
        let fetcher = FakeFetcher {
            images: HashMap::from([
                ("b.jpg".to_string(), vec![1, 2, 3]),
                ("c.jpg".to_string(), vec![4, 5]),
            ]),
        };
        let urls = vec!["a.jpg".to_string(), "b.jpg".to_string(), "c.jpg".to_string()];
        let blobs = fetch_all(&fetcher, &urls).await;

        assert_eq!(blobs.len(), 2);
        assert_eq!(blobs[0].source_url, "b.jpg");
        assert_eq!(blobs[0].size, 3);
        assert_eq!(blobs[0].mime_type, "image/jpeg");
        assert_eq!(decode_blob(&blobs[1]).unwrap(), vec![4, 5]);
    }

    #[test]
    fn test_small_images_untouched() {
        let bytes = vec![9u8; 100];
        let config = ImageConfig::default();
        assert_eq!(recompress(bytes.clone(), &config), bytes);
    }

    #[test]
    fn test_recompress_shrinks_and_downscales() {
        let png = noisy_png(300, 200);
        let config = ImageConfig {
            max_upload_bytes: png.len() / 2,
            max_dimension: 150,
            ..ImageConfig::default()
        };
        let out = recompress(png.clone(), &config);
        assert!(out.len() < png.len());
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 150);
        assert_eq!(decoded.height(), 100);
    }

    #[test]
    fn test_recompress_accepts_floor_result() {
        let png = noisy_png(64, 64);
        let config = ImageConfig {
            max_upload_bytes: 1,
            ..ImageConfig::default()
        };
        let out = recompress(png, &config);
        // JPEG SOI marker
        assert_eq!(&out[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_undecodable_image_uploaded_as_is() {
        let config = ImageConfig {
            max_upload_bytes: 4,
            ..ImageConfig::default()
        };
        let junk = vec![0u8; 64];
        assert_eq!(recompress(junk.clone(), &config), junk);
    }

    #[test]
    fn test_prepare_uploads_names_in_order() {
        let blobs = vec![
            encode_blob(
                "x.png",
                FetchedImage {
                    bytes: vec![1, 2],
                    mime_type: Some("image/png".to_string()),
                },
            ),
            encode_blob(
                "y.jpg",
                FetchedImage {
                    bytes: vec![3],
                    mime_type: None,
                },
            ),
        ];
        let files = prepare_uploads(&blobs, &ImageConfig::default());
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "image_1.jpg");
        assert_eq!(files[0].mime_type, "image/png");
        assert_eq!(files[1].name, "image_2.jpg");
        assert_eq!(files[1].bytes, vec![3]);
    }
}
