//! Object storage client (Supabase Storage REST + TUS resumable uploads)

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use reqwest::{header, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::error::{AppError, Result};

const TUS_VERSION: &str = "1.0.0";

/// Storage operations used by the persistence pipeline
///
/// The pipeline decides between single-shot and chunked transfer; both
/// store the object under the same path.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put_object(&self, object_path: &str, data: Bytes, content_type: &str) -> Result<()>;
    async fn put_object_chunked(
        &self,
        object_path: &str,
        file: &Path,
        size: u64,
        content_type: &str,
        chunk_size: u64,
    ) -> Result<()>;
    fn public_url(&self, object_path: &str) -> String;
}

/// Reachability check for an uploaded object
#[async_trait]
pub trait UrlVerifier: Send + Sync {
    /// Whether a HEAD request returns 200
    async fn verify(&self, url: &str) -> Result<bool>;
}

pub struct SupabaseStorage {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    bucket: String,
    cache_control: String,
}

impl SupabaseStorage {
    /// Returns `None` when the storage URL or key is missing
    pub fn from_config(config: &StorageConfig) -> Result<Option<Self>> {
        let (Some(url), Some(key)) = (config.url.as_ref(), config.api_key.as_ref()) else {
            return Ok(None);
        };
        if url.is_empty() || key.is_empty() {
            return Ok(None);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.upload_timeout_secs.max(1)))
            .build()?;

        Ok(Some(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            api_key: key.clone(),
            bucket: config.bucket.clone(),
            cache_control: config.cache_control.clone(),
        }))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
    }

    fn upload_metadata(&self, object_path: &str, content_type: &str) -> String {
        [
            ("bucketName", self.bucket.as_str()),
            ("objectName", object_path),
            ("contentType", content_type),
            ("cacheControl", self.cache_control.as_str()),
        ]
        .iter()
        .map(|(k, v)| format!("{} {}", k, BASE64.encode(v)))
        .collect::<Vec<_>>()
        .join(",")
    }

    fn resolve_location(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else {
            format!("{}/{}", self.base_url, location.trim_start_matches('/'))
        }
    }
}

async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>())
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    async fn put_object(&self, object_path: &str, data: Bytes, content_type: &str) -> Result<()> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, object_path
        );
        let size = data.len();
        let response = self
            .authorized(self.client.post(&url))
            .header("x-upsert", "true")
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CACHE_CONTROL, format!("max-age={}", self.cache_control))
            .body(data)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Storage(format!(
                "Upload of {} failed: {}",
                object_path,
                error_body(response).await
            )));
        }
        info!("Uploaded {} ({} bytes)", object_path, size);
        Ok(())
    }

    async fn put_object_chunked(
        &self,
        object_path: &str,
        file: &Path,
        size: u64,
        content_type: &str,
        chunk_size: u64,
    ) -> Result<()> {
        let endpoint = format!("{}/storage/v1/upload/resumable", self.base_url);
        let response = self
            .authorized(self.client.post(&endpoint))
            .header("Tus-Resumable", TUS_VERSION)
            .header("Upload-Length", size.to_string())
            .header("Upload-Metadata", self.upload_metadata(object_path, content_type))
            .header("x-upsert", "true")
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(AppError::Storage(format!(
                "Resumable upload of {} was not created: {}",
                object_path,
                error_body(response).await
            )));
        }
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| self.resolve_location(v))
            .ok_or_else(|| AppError::Storage("Resumable upload without Location".into()))?;
        debug!("Resumable upload created at {}", location);

        let mut reader = tokio::fs::File::open(file).await?;
        let chunk_size = chunk_size.max(1) as usize;
        let mut offset = 0u64;
        let mut buffer = vec![0u8; chunk_size];

        while offset < size {
            let mut filled = 0;
            while filled < chunk_size {
                let n = reader.read(&mut buffer[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                return Err(AppError::Storage(format!(
                    "{} ended at {} of {} bytes",
                    file.display(),
                    offset,
                    size
                )));
            }

            let response = self
                .authorized(self.client.patch(&location))
                .header("Tus-Resumable", TUS_VERSION)
                .header("Upload-Offset", offset.to_string())
                .header(header::CONTENT_TYPE, "application/offset+octet-stream")
                .body(buffer[..filled].to_vec())
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(AppError::Storage(format!(
                    "Chunk at offset {} of {} failed: {}",
                    offset,
                    object_path,
                    error_body(response).await
                )));
            }
            offset = response
                .headers()
                .get("Upload-Offset")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(offset + filled as u64);
            debug!("Uploaded {}/{} bytes of {}", offset, size, object_path);
        }

        info!("Uploaded {} in chunks ({} bytes)", object_path, size);
        Ok(())
    }

    fn public_url(&self, object_path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, object_path
        )
    }
}

/// HEAD-based reachability check
pub struct HttpVerifier {
    client: reqwest::Client,
}

impl HttpVerifier {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl UrlVerifier for HttpVerifier {
    async fn verify(&self, url: &str) -> Result<bool> {
        let response = self.client.head(url).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(format!("HEAD {}", url))
            } else {
                AppError::Http(e)
            }
        })?;
        debug!("HEAD {} -> {}", url, response.status());
        Ok(response.status() == StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode as AxumStatus, routing::get, Router};

    fn storage() -> SupabaseStorage {
        let config = StorageConfig {
            url: Some("https://project.supabase.co/".into()),
            api_key: Some("key".into()),
            ..Default::default()
        };
        SupabaseStorage::from_config(&config).unwrap().unwrap()
    }

    #[test]
    fn test_public_url() {
        assert_eq!(
            storage().public_url("recordings/1/a.mp4"),
            "https://project.supabase.co/storage/v1/object/public/filmagens/recordings/1/a.mp4"
        );
    }

    #[test]
    fn test_upload_metadata_encoding() {
        let metadata = storage().upload_metadata("r/1/a.mp4", "video/mp4");
        let pairs: Vec<&str> = metadata.split(',').collect();
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0], format!("bucketName {}", BASE64.encode("filmagens")));
        assert_eq!(pairs[1], format!("objectName {}", BASE64.encode("r/1/a.mp4")));
    }

    #[test]
    fn test_resolve_location() {
        let s = storage();
        assert_eq!(
            s.resolve_location("/storage/v1/upload/resumable/abc"),
            "https://project.supabase.co/storage/v1/upload/resumable/abc"
        );
        assert_eq!(s.resolve_location("https://x/y"), "https://x/y");
    }

    #[test]
    fn test_missing_credentials_disable_storage() {
        assert!(SupabaseStorage::from_config(&StorageConfig::default())
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_head_verifier() {
        let router = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/gone", get(|| async { AxumStatus::NOT_FOUND }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let verifier = HttpVerifier::new(Duration::from_secs(5)).unwrap();
        assert!(verifier.verify(&format!("http://{}/ok?t=1", addr)).await.unwrap());
        assert!(!verifier.verify(&format!("http://{}/gone?t=1", addr)).await.unwrap());
    }
}
