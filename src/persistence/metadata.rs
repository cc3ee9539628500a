//! Session log and live-status records
//!
//! Two backends share the [`MetadataStore`] trait: the local SQLite database
//! (same pool as the configuration) and a PostgREST endpoint (Supabase).

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::time::Duration;

use crate::config::{MetadataConfig, StorageConfig};
use crate::error::{AppError, Result};

/// One row of the session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub url: String,
    /// Local calendar date of the start (YYYY-MM-DD)
    pub date: String,
    /// Local wall-clock start (HH:MM:SS)
    pub start_time: String,
    pub end_time: String,
    pub event: String,
    pub device_id: String,
    pub uploaded: bool,
    pub size_mb: f64,
}

impl SessionRecord {
    pub fn new(
        user_id: &str,
        device_id: &str,
        event: &str,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        url: &str,
        size_bytes: u64,
    ) -> Self {
        let local_start = started_at.with_timezone(&Local);
        let local_end = ended_at.with_timezone(&Local);
        let size_mb = (size_bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;

        Self {
            user_id: user_id.to_string(),
            started_at,
            ended_at,
            duration_secs: (ended_at - started_at).num_seconds(),
            url: url.to_string(),
            date: local_start.format("%Y-%m-%d").to_string(),
            start_time: local_start.format("%H:%M:%S").to_string(),
            end_time: local_end.format("%H:%M:%S").to_string(),
            event: event.to_string(),
            device_id: device_id.to_string(),
            uploaded: true,
            size_mb,
        }
    }
}

/// The is-live flag row for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: i64,
    pub user_id: String,
    pub is_live: bool,
    pub live_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert_session(&self, record: &SessionRecord) -> Result<()>;
    async fn sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>>;
    /// Most recent status row for `user_id`
    async fn latest_status(&self, user_id: &str) -> Result<Option<StatusRecord>>;
    async fn update_status(&self, id: i64, is_live: bool, live_url: Option<&str>) -> Result<()>;
    async fn insert_status(&self, user_id: &str, is_live: bool, live_url: Option<&str>) -> Result<()>;
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Metadata(format!("Bad timestamp '{}': {}", value, e)))
}

/// Metadata in the local SQLite database
pub struct SqliteMetadataStore {
    pool: Pool<Sqlite>,
    sessions_table: String,
    status_table: String,
}

type SessionRow = (
    String,
    String,
    String,
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    bool,
    f64,
);

impl SqliteMetadataStore {
    pub async fn new(pool: Pool<Sqlite>, config: &MetadataConfig) -> Result<Self> {
        let store = Self {
            pool,
            sessions_table: config.sessions_table.clone(),
            status_table: config.status_table.clone(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT NOT NULL,
                duration_secs INTEGER NOT NULL,
                url TEXT NOT NULL,
                date TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                event TEXT NOT NULL,
                device_id TEXT NOT NULL,
                uploaded INTEGER NOT NULL,
                size_mb REAL NOT NULL
            )
            "#,
            self.sessions_table
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                is_live INTEGER NOT NULL,
                live_url TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
            self.status_table
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (user_id, started_at, ended_at, duration_secs, url, date,
                start_time, end_time, event, device_id, uploaded, size_mb)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            self.sessions_table
        ))
        .bind(&record.user_id)
        .bind(record.started_at.to_rfc3339())
        .bind(record.ended_at.to_rfc3339())
        .bind(record.duration_secs)
        .bind(&record.url)
        .bind(&record.date)
        .bind(&record.start_time)
        .bind(&record.end_time)
        .bind(&record.event)
        .bind(&record.device_id)
        .bind(record.uploaded)
        .bind(record.size_mb)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            r#"
            SELECT user_id, started_at, ended_at, duration_secs, url, date, start_time,
                end_time, event, device_id, uploaded, size_mb
            FROM {} WHERE user_id = ?1 ORDER BY id
            "#,
            self.sessions_table
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(SessionRecord {
                    user_id: row.0,
                    started_at: parse_timestamp(&row.1)?,
                    ended_at: parse_timestamp(&row.2)?,
                    duration_secs: row.3,
                    url: row.4,
                    date: row.5,
                    start_time: row.6,
                    end_time: row.7,
                    event: row.8,
                    device_id: row.9,
                    uploaded: row.10,
                    size_mb: row.11,
                })
            })
            .collect()
    }

    async fn latest_status(&self, user_id: &str) -> Result<Option<StatusRecord>> {
        let row: Option<(i64, String, bool, Option<String>, String)> = sqlx::query_as(&format!(
            "SELECT id, user_id, is_live, live_url, updated_at FROM {} \
             WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
            self.status_table
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(id, user_id, is_live, live_url, updated_at)| {
            Ok(StatusRecord {
                id,
                user_id,
                is_live,
                live_url,
                updated_at: parse_timestamp(&updated_at)?,
            })
        })
        .transpose()
    }

    async fn update_status(&self, id: i64, is_live: bool, live_url: Option<&str>) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET is_live = ?1, live_url = COALESCE(?2, live_url), updated_at = ?3 WHERE id = ?4",
            self.status_table
        ))
        .bind(is_live)
        .bind(live_url)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_status(&self, user_id: &str, is_live: bool, live_url: Option<&str>) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (user_id, is_live, live_url, updated_at) VALUES (?1, ?2, ?3, ?4)",
            self.status_table
        ))
        .bind(user_id)
        .bind(is_live)
        .bind(live_url)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Metadata behind a PostgREST API
pub struct PostgrestMetadataStore {
    client: reqwest::Client,
    rest_url: String,
    api_key: String,
    sessions_table: String,
    status_table: String,
}

/// Session log row in the companion app's schema
#[derive(Serialize, Deserialize)]
struct RemoteSession {
    #[serde(rename = "ID_Usuarios", deserialize_with = "text_or_number")]
    user_id: String,
    #[serde(rename = "inicio", deserialize_with = "remote_timestamp")]
    started_at: DateTime<Utc>,
    #[serde(rename = "fim", deserialize_with = "remote_timestamp")]
    ended_at: DateTime<Utc>,
    #[serde(rename = "duracao")]
    duration_secs: i64,
    #[serde(rename = "url_video")]
    url: String,
    #[serde(rename = "data")]
    date: String,
    #[serde(rename = "hora_inicio")]
    start_time: String,
    #[serde(rename = "hora_fim")]
    end_time: String,
    #[serde(rename = "evento")]
    event: String,
    #[serde(rename = "dispositivo")]
    device_id: String,
    #[serde(rename = "enviado_com_sucesso")]
    uploaded: bool,
    #[serde(rename = "tamanho_arquivo_mb")]
    size_mb: f64,
}

impl From<&SessionRecord> for RemoteSession {
    fn from(record: &SessionRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            started_at: record.started_at,
            ended_at: record.ended_at,
            duration_secs: record.duration_secs,
            url: record.url.clone(),
            date: record.date.clone(),
            start_time: record.start_time.clone(),
            end_time: record.end_time.clone(),
            event: record.event.clone(),
            device_id: record.device_id.clone(),
            uploaded: record.uploaded,
            size_mb: record.size_mb,
        }
    }
}

impl From<RemoteSession> for SessionRecord {
    fn from(row: RemoteSession) -> Self {
        Self {
            user_id: row.user_id,
            started_at: row.started_at,
            ended_at: row.ended_at,
            duration_secs: row.duration_secs,
            url: row.url,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            event: row.event,
            device_id: row.device_id,
            uploaded: row.uploaded,
            size_mb: row.size_mb,
        }
    }
}

/// Live flag row in the companion app's schema
#[derive(Deserialize)]
struct RemoteStatus {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "ID_Usuarios", deserialize_with = "text_or_number")]
    user_id: String,
    #[serde(rename = "AoVivo", default)]
    is_live: bool,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

impl From<RemoteStatus> for StatusRecord {
    fn from(row: RemoteStatus) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            is_live: row.is_live,
            live_url: row.url.filter(|u| !u.is_empty()),
            updated_at: row
                .updated_at
                .and_then(|t| parse_remote_timestamp(&t))
                .unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Serialize)]
struct StatusInsert<'a> {
    #[serde(rename = "ID_Usuarios")]
    user_id: &'a str,
    #[serde(rename = "AoVivo")]
    is_live: bool,
    url: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct StatusUpdate<'a> {
    #[serde(rename = "AoVivo")]
    is_live: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

/// PostgREST returns `timestamp` columns without an offset; those are UTC
fn parse_remote_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

fn remote_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    parse_remote_timestamp(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("bad timestamp '{}'", value)))
}

/// User ids are integers in some deployments and text in others
fn text_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected user id {}", other))),
    }
}

impl PostgrestMetadataStore {
    pub fn new(storage: &StorageConfig, config: &MetadataConfig) -> Result<Self> {
        let (Some(url), Some(key)) = (storage.url.as_ref(), storage.api_key.as_ref()) else {
            return Err(AppError::Config(
                "PostgREST metadata backend needs the storage URL and key".into(),
            ));
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            rest_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            api_key: key.clone(),
            sessions_table: config.remote_sessions_table.clone(),
            status_table: config.remote_status_table.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, table: &str, query: &str) -> reqwest::RequestBuilder {
        let url = if query.is_empty() {
            format!("{}/{}", self.rest_url, table)
        } else {
            format!("{}/{}?{}", self.rest_url, table, query)
        };
        self.client
            .request(method, url)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header("Prefer", "return=minimal")
    }

    async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Metadata(format!("{} failed with HTTP {}: {}", action, status, body)))
    }
}

#[async_trait]
impl MetadataStore for PostgrestMetadataStore {
    async fn insert_session(&self, record: &SessionRecord) -> Result<()> {
        let response = self
            .request(reqwest::Method::POST, &self.sessions_table, "")
            .json(&RemoteSession::from(record))
            .send()
            .await?;
        Self::check(response, "insert session").await.map(|_| ())
    }

    async fn sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let query = format!("ID_Usuarios=eq.{}&order=inicio.asc", urlencoding::encode(user_id));
        let response = self
            .request(reqwest::Method::GET, &self.sessions_table, &query)
            .send()
            .await?;
        let response = Self::check(response, "list sessions").await?;
        let rows: Vec<RemoteSession> = response.json().await?;
        Ok(rows.into_iter().map(SessionRecord::from).collect())
    }

    async fn latest_status(&self, user_id: &str) -> Result<Option<StatusRecord>> {
        let query = format!(
            "ID_Usuarios=eq.{}&order=created_at.desc&limit=1",
            urlencoding::encode(user_id)
        );
        let response = self
            .request(reqwest::Method::GET, &self.status_table, &query)
            .send()
            .await?;
        let response = Self::check(response, "read status").await?;
        let rows: Vec<RemoteStatus> = response.json().await?;
        Ok(rows.into_iter().next().map(StatusRecord::from))
    }

    async fn update_status(&self, id: i64, is_live: bool, live_url: Option<&str>) -> Result<()> {
        let body = StatusUpdate {
            is_live,
            url: live_url,
            updated_at: Utc::now(),
        };
        let response = self
            .request(reqwest::Method::PATCH, &self.status_table, &format!("ID=eq.{}", id))
            .json(&body)
            .send()
            .await?;
        Self::check(response, "update status").await.map(|_| ())
    }

    async fn insert_status(&self, user_id: &str, is_live: bool, live_url: Option<&str>) -> Result<()> {
        let now = Utc::now();
        let body = StatusInsert {
            user_id,
            is_live,
            url: live_url.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        let response = self
            .request(reqwest::Method::POST, &self.status_table, "")
            .json(&body)
            .send()
            .await?;
        Self::check(response, "insert status").await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigStore;
    use chrono::TimeZone;
    use std::sync::Arc;

    async fn sqlite_store() -> (tempfile::TempDir, SqliteMetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::new(&dir.path().join("sentinel.db")).await.unwrap();
        let store = SqliteMetadataStore::new(config.pool().clone(), &MetadataConfig::default())
            .await
            .unwrap();
        (dir, store)
    }

    #[test]
    fn test_session_record_derived_fields() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 1, 12, 1, 30).unwrap();
        let record = SessionRecord::new("1", "CAM", "access denied", start, end, "u", 3 * 1024 * 1024 + 512 * 1024);

        assert_eq!(record.duration_secs, 90);
        assert_eq!(record.size_mb, 3.5);
        assert!(record.uploaded);
        assert_eq!(
            record.date,
            start.with_timezone(&Local).format("%Y-%m-%d").to_string()
        );
    }

    #[tokio::test]
    async fn test_sqlite_session_round_trip() {
        let (_dir, store) = sqlite_store().await;
        let start = Utc.with_ymd_and_hms(2024, 5, 10, 8, 30, 15).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 10, 8, 32, 0).unwrap();
        let record = SessionRecord::new(
            "7",
            "ESP32_CAM_01",
            "access denied",
            start,
            end,
            "https://x/storage/v1/object/public/b/a.mp4?t=1",
            2_000_000,
        );

        store.insert_session(&record).await.unwrap();
        let rows = store.sessions("7").await.unwrap();

        assert_eq!(rows, vec![record.clone()]);
        assert_eq!(rows[0].duration_secs, (rows[0].ended_at - rows[0].started_at).num_seconds());
        assert!(store.sessions("8").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_status_latest_row() {
        let (_dir, store) = sqlite_store().await;
        assert!(store.latest_status("1").await.unwrap().is_none());

        store.insert_status("1", true, Some("https://watch")).await.unwrap();
        let status = store.latest_status("1").await.unwrap().unwrap();
        assert!(status.is_live);

        store.update_status(status.id, false, None).await.unwrap();
        let status = store.latest_status("1").await.unwrap().unwrap();
        assert!(!status.is_live);
        assert_eq!(status.live_url.as_deref(), Some("https://watch"));
    }

    #[test]
    fn test_postgrest_requires_credentials() {
        let result = PostgrestMetadataStore::new(&StorageConfig::default(), &MetadataConfig::default());
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[derive(Debug, Clone)]
    struct LoggedRequest {
        method: String,
        table: String,
        query: String,
        body: serde_json::Value,
    }

    #[derive(Clone)]
    struct RestState {
        rows: serde_json::Value,
        log: Arc<parking_lot::Mutex<Vec<LoggedRequest>>>,
    }

    async fn rest_handler(
        axum::extract::State(state): axum::extract::State<RestState>,
        method: axum::http::Method,
        axum::extract::Path(table): axum::extract::Path<String>,
        axum::extract::RawQuery(query): axum::extract::RawQuery,
        body: bytes::Bytes,
    ) -> axum::Json<serde_json::Value> {
        state.log.lock().push(LoggedRequest {
            method: method.to_string(),
            table,
            query: query.unwrap_or_default(),
            body: serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null),
        });
        if method == axum::http::Method::GET {
            axum::Json(state.rows.clone())
        } else {
            axum::Json(serde_json::json!([]))
        }
    }

    /// PostgREST stand-in answering every GET with `rows`
    async fn rest_server(
        rows: serde_json::Value,
    ) -> (String, Arc<parking_lot::Mutex<Vec<LoggedRequest>>>) {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let app = axum::Router::new()
            .route("/rest/v1/:table", axum::routing::any(rest_handler))
            .with_state(RestState {
                rows,
                log: log.clone(),
            });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), log)
    }

    #[tokio::test]
    async fn test_postgrest_uses_companion_app_schema() {
        let (base, log) = rest_server(serde_json::json!([{
            "ID": 4,
            "ID_Usuarios": 1,
            "AoVivo": false,
            "url": "",
            "created_at": "2024-05-10T08:00:00",
            "updated_at": "2024-05-10T08:30:15.123456"
        }]))
        .await;
        let storage = StorageConfig {
            url: Some(base),
            api_key: Some("service-key".into()),
            ..Default::default()
        };
        let store = PostgrestMetadataStore::new(&storage, &MetadataConfig::default()).unwrap();

        let status = store.latest_status("1").await.unwrap().unwrap();
        assert_eq!(status.id, 4);
        assert_eq!(status.user_id, "1");
        assert!(!status.is_live);
        assert_eq!(status.live_url, None);
        assert_eq!(
            status.updated_at,
            Utc.with_ymd_and_hms(2024, 5, 10, 8, 30, 15).unwrap()
                + chrono::Duration::microseconds(123_456)
        );

        store.update_status(4, true, Some("https://watch")).await.unwrap();

        let start = Utc.with_ymd_and_hms(2024, 5, 10, 8, 30, 15).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 10, 8, 32, 0).unwrap();
        let record = SessionRecord::new("7", "ESP32_CAM_01", "acesso negado", start, end, "https://v", 0);
        store.insert_session(&record).await.unwrap();

        let log = log.lock().clone();
        assert_eq!(log.len(), 3);

        assert_eq!(log[0].method, "GET");
        assert_eq!(log[0].table, "ngrok_links");
        assert_eq!(log[0].query, "ID_Usuarios=eq.1&order=created_at.desc&limit=1");

        assert_eq!(log[1].method, "PATCH");
        assert_eq!(log[1].query, "ID=eq.4");
        assert_eq!(log[1].body["AoVivo"], true);
        assert_eq!(log[1].body["url"], "https://watch");

        assert_eq!(log[2].method, "POST");
        assert_eq!(log[2].table, "Tb_Filmagens");
        assert_eq!(log[2].body["ID_Usuarios"], "7");
        assert_eq!(log[2].body["duracao"], 105);
        assert_eq!(log[2].body["url_video"], "https://v");
        assert_eq!(log[2].body["evento"], "acesso negado");
        assert_eq!(log[2].body["dispositivo"], "ESP32_CAM_01");
        assert!(log[2].body.get("user_id").is_none());
    }

    #[tokio::test]
    async fn test_postgrest_insert_status_sets_created_at() {
        let (base, log) = rest_server(serde_json::json!([])).await;
        let storage = StorageConfig {
            url: Some(base),
            api_key: Some("service-key".into()),
            ..Default::default()
        };
        let store = PostgrestMetadataStore::new(&storage, &MetadataConfig::default()).unwrap();

        assert!(store.latest_status("1").await.unwrap().is_none());
        store.insert_status("1", false, None).await.unwrap();

        let log = log.lock().clone();
        let body = &log[1].body;
        assert_eq!(log[1].method, "POST");
        assert_eq!(body["ID_Usuarios"], "1");
        assert_eq!(body["AoVivo"], false);
        assert_eq!(body["url"], "");
        assert!(body["created_at"].is_string());
    }
}
