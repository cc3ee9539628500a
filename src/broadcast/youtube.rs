//! Public live-platform binding (YouTube Data API v3)
//!
//! Creates an ingest stream, creates a broadcast and binds the two. The three
//! calls are not idempotent and nothing is rolled back: a bind failure after
//! both resources exist is reported as
//! [`PlatformError::BindFailedAfterCreate`] so the orphaned ids reach the log.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};

use super::types::LiveBinding;
use crate::config::LivePlatformConfig;
use crate::error::{AppError, PlatformError, Result};

const WATCH_URL_BASE: &str = "https://www.youtube.com/watch?v=";

#[async_trait]
pub trait LivePlatform: Send + Sync {
    /// Run the create-stream, create-broadcast, bind transaction
    async fn create_binding(&self) -> Result<LiveBinding>;
}

pub struct YouTubePlatform {
    client: reqwest::Client,
    api_base: String,
    access_token: String,
    title: String,
    description: String,
    privacy_status: String,
}

impl YouTubePlatform {
    /// Returns `None` when no access token is configured
    pub fn from_config(config: &LivePlatformConfig) -> Result<Option<Self>> {
        let Some(token) = config.access_token.clone().filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Some(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            access_token: token,
            title: config.title.clone(),
            description: config.description.clone(),
            privacy_status: config.privacy_status.clone(),
        }))
    }

    async fn post(&self, step: &str, path: &str, query: &[(&str, &str)], body: Option<Value>) -> Result<Value> {
        let url = format!("{}/{}", self.api_base, path);
        let mut request = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .query(query);
        request = match body {
            Some(body) => request.json(&body),
            None => request.header(reqwest::header::CONTENT_LENGTH, 0),
        };

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(format!("{}: {}", step, e))
            } else {
                AppError::Http(e)
            }
        })?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(classify_failure(step, status.as_u16(), &text).into());
        }
        serde_json::from_str(&text).map_err(|e| {
            PlatformError::UnexpectedResponse {
                step: step.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    async fn create_stream(&self) -> Result<(String, String, String)> {
        let step = "create ingest stream";
        let body = json!({
            "snippet": { "title": format!("{} ingest", self.title) },
            "cdn": {
                "frameRate": "30fps",
                "ingestionType": "rtmp",
                "resolution": "720p",
            },
            "contentDetails": { "isReusable": false },
        });
        let data = self
            .post(step, "liveStreams", &[("part", "snippet,cdn,contentDetails,status")], Some(body))
            .await?;

        let id = required_str(step, &data, &["id"])?;
        let address = required_str(step, &data, &["cdn", "ingestionInfo", "ingestionAddress"])?;
        let key = required_str(step, &data, &["cdn", "ingestionInfo", "streamName"])?;
        Ok((id, address, key))
    }

    async fn create_broadcast(&self) -> Result<String> {
        let step = "create broadcast";
        let body = json!({
            "snippet": {
                "title": self.title,
                "description": self.description,
                "scheduledStartTime": chrono::Utc::now().to_rfc3339(),
            },
            "status": {
                "privacyStatus": self.privacy_status,
                "selfDeclaredMadeForKids": false,
            },
            "contentDetails": {
                "enableAutoStart": true,
                "enableAutoStop": true,
            },
        });
        let data = self
            .post(step, "liveBroadcasts", &[("part", "snippet,contentDetails,status")], Some(body))
            .await?;
        required_str(step, &data, &["id"])
    }

    async fn bind(&self, broadcast_id: &str, stream_id: &str) -> Result<()> {
        self.post(
            "bind",
            "liveBroadcasts/bind",
            &[("id", broadcast_id), ("part", "id,contentDetails"), ("streamId", stream_id)],
            None,
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl LivePlatform for YouTubePlatform {
    async fn create_binding(&self) -> Result<LiveBinding> {
        let (stream_id, ingest_url, stream_key) = self.create_stream().await?;
        let broadcast_id = self.create_broadcast().await?;

        if let Err(e) = self.bind(&broadcast_id, &stream_id).await {
            error!(
                "Live platform bind failed; stream {} and broadcast {} were created and are left in place",
                stream_id, broadcast_id
            );
            return Err(PlatformError::BindFailedAfterCreate {
                stream_id,
                broadcast_id,
                reason: e.to_string(),
            }
            .into());
        }

        let watch_url = format!("{}{}", WATCH_URL_BASE, broadcast_id);
        info!("Live broadcast bound: {}", watch_url);
        Ok(LiveBinding {
            stream_id,
            broadcast_id,
            ingest_url,
            stream_key,
            watch_url,
        })
    }
}

/// Map a failed platform response to actionable guidance
pub fn classify_failure(step: &str, status: u16, body: &str) -> PlatformError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect());
    let step = step.to_string();

    match status {
        400 => PlatformError::BadRequest { step, message },
        401 => PlatformError::Unauthorized { step, message },
        403 => PlatformError::Forbidden { step, message },
        _ => PlatformError::Api { step, status, message },
    }
}

fn required_str(step: &str, data: &Value, path: &[&str]) -> Result<String> {
    let mut current = data;
    for key in path {
        current = current.get(key).ok_or_else(|| PlatformError::UnexpectedResponse {
            step: step.to_string(),
            message: format!("missing field {}", path.join(".")),
        })?;
    }
    current
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| {
            PlatformError::UnexpectedResponse {
                step: step.to_string(),
                message: format!("field {} is not a string", path.join(".")),
            }
            .into()
        })
}
