use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::errors::{AppError, AppResult};

const MAX_PHOTO_BYTES: usize = 10 * 1024 * 1024;
const DIGEST_CHARS: usize = 10;

#[async_trait]
pub trait PhotoUploader: Send + Sync {
    /// Copies the provider photo into our own storage. `Ok(None)` means the
    /// provider had no usable photo; errors are transport failures.
    async fn upload_photo(&self, photo_ref: &str, display_name: &str) -> AppResult<Option<String>>;
}

/// Used when no blob container is configured.
#[derive(Default)]
pub struct DisabledPhotoUploader;

#[async_trait]
impl PhotoUploader for DisabledPhotoUploader {
    async fn upload_photo(&self, _photo_ref: &str, _display_name: &str) -> AppResult<Option<String>> {
        Ok(None)
    }
}

pub struct BlobPhotoUploader {
    http: Client,
    places_api_base: String,
    api_key: SecretString,
    container_url: String,
    container_sas: Option<SecretString>,
    max_width_px: u32,
}

impl BlobPhotoUploader {
    pub fn new(
        http: Client,
        places_api_base: impl Into<String>,
        api_key: SecretString,
        container_url: impl Into<String>,
        container_sas: Option<SecretString>,
        max_width_px: u32,
    ) -> Self {
        Self {
            http,
            places_api_base: places_api_base.into().trim_end_matches('/').to_string(),
            api_key,
            container_url: container_url.into().trim_end_matches('/').to_string(),
            container_sas,
            max_width_px: max_width_px.max(1),
        }
    }

    async fn resolve_photo_uri(&self, photo_ref: &str) -> AppResult<Option<String>> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct MediaResponse {
            photo_uri: Option<String>,
        }

        let response = self
            .http
            .get(format!("{}/{}/media", self.places_api_base, photo_ref))
            .query(&[
                ("maxWidthPx", self.max_width_px.to_string()),
                ("skipHttpRedirect", "true".to_string()),
            ])
            .header("X-Goog-Api-Key", self.api_key.expose_secret())
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        let media: MediaResponse = response.json().await?;
        Ok(media.photo_uri.filter(|uri| !uri.is_empty()))
    }

    async fn download(&self, uri: &str) -> AppResult<(Vec<u8>, Option<String>)> {
        let response = self.http.get(uri).send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if bytes.len() + chunk.len() > MAX_PHOTO_BYTES {
                return Err(AppError::upstream(
                    "photos",
                    format!("photo exceeds {MAX_PHOTO_BYTES} bytes"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok((bytes, content_type))
    }

    fn blob_url(&self, blob_name: &str) -> String {
        format!("{}/{}", self.container_url, blob_name)
    }
}

#[async_trait]
impl PhotoUploader for BlobPhotoUploader {
    async fn upload_photo(&self, photo_ref: &str, display_name: &str) -> AppResult<Option<String>> {
        let Some(uri) = self.resolve_photo_uri(photo_ref).await? else {
            debug!(target: "photos", photo_ref, "provider has no media for photo");
            return Ok(None);
        };
        let (bytes, content_type) = self.download(&uri).await?;
        if bytes.is_empty() {
            return Ok(None);
        }

        let extension = extension_for(content_type.as_deref());
        let blob_url = self.blob_url(&blob_name(display_name, photo_ref, extension));
        let mut upload_url = blob_url.clone();
        if let Some(sas) = &self.container_sas {
            upload_url.push('?');
            upload_url.push_str(sas.expose_secret().trim_start_matches('?'));
        }

        self.http
            .put(&upload_url)
            .header("x-ms-blob-type", "BlockBlob")
            .header(
                CONTENT_TYPE,
                content_type.as_deref().unwrap_or("image/jpeg"),
            )
            .body(bytes)
            .send()
            .await?
            .error_for_status()?;

        info!(target: "photos", blob = %blob_url, "uploaded park photo");
        Ok(Some(blob_url))
    }
}

/// `<Display_Name>_<digest><ext>`; the digest keeps re-uploads of the same
/// provider photo on the same blob.
pub fn blob_name(display_name: &str, photo_ref: &str, extension: &str) -> String {
    let base: String = display_name
        .trim()
        .chars()
        .map(|c| match c {
            ' ' => '_',
            '/' | '\\' | '?' | '#' | '%' => '-',
            other => other,
        })
        .collect();
    let base = if base.is_empty() { "park".to_string() } else { base };
    let digest = URL_SAFE_NO_PAD.encode(Sha256::digest(photo_ref.as_bytes()));
    format!("{base}_{}{extension}", &digest[..DIGEST_CHARS])
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase());
    match mime.as_deref() {
        Some("image/png") => ".png",
        Some("image/webp") => ".webp",
        Some("image/gif") => ".gif",
        _ => ".jpg",
    }
}
