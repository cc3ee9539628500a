use arc_swap::ArcSwap;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::AppConfig;
use crate::error::{AppError, Result};

/// Row key of the configuration document
const CONFIG_KEY: &str = "app_config";

/// Configuration document stored in SQLite, cached behind an `ArcSwap`
///
/// The pool is shared with the local metadata tables.
#[derive(Clone)]
pub struct ConfigStore {
    pool: Pool<Sqlite>,
    cache: Arc<ArcSwap<AppConfig>>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

impl ConfigStore {
    /// Open (or create) the database and load the stored configuration
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        // Single writer: the capture loop never touches the database, so two
        // connections cover config reads and metadata writes
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(&db_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let config = Self::load(&pool).await?;
        let (change_tx, _) = broadcast::channel(16);

        Ok(Self {
            pool,
            cache: Arc::new(ArcSwap::from_pointee(config)),
            change_tx,
        })
    }

    async fn load(pool: &Pool<Sqlite>) -> Result<AppConfig> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?1")
            .bind(CONFIG_KEY)
            .fetch_optional(pool)
            .await?;

        match row {
            Some((json,)) => serde_json::from_str(&json)
                .map_err(|e| AppError::Config(format!("Stored configuration is invalid: {}", e))),
            None => {
                info!("No stored configuration, writing defaults");
                let config = AppConfig::default();
                Self::save(pool, &config).await?;
                Ok(config)
            }
        }
    }

    async fn save(pool: &Pool<Sqlite>, config: &AppConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        sqlx::query(
            r#"
            INSERT INTO config (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
        )
        .bind(CONFIG_KEY)
        .bind(&json)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Modify, persist, then publish the configuration
    ///
    /// Read-modify-write; concurrent updates are last-write-wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (**self.cache.load()).clone();
        f(&mut config);

        Self::save(&self.pool, &config).await?;
        self.cache.store(Arc::new(config));
        debug!("Configuration updated");

        let _ = self.change_tx.send(ConfigChange {
            key: CONFIG_KEY.to_string(),
        });
        Ok(())
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_store() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let store = ConfigStore::new(&db_path).await.unwrap();

        let config = store.get();
        assert_eq!(config.relay.port, 5000);
        assert!(config.broadcaster.password.is_none());

        let mut changes = store.subscribe();
        store
            .update(|c| {
                c.relay.port = 9000;
                c.broadcaster.scene = "Lobby".to_string();
            })
            .await
            .unwrap();
        assert_eq!(changes.recv().await.unwrap().key, "app_config");

        let config = store.get();
        assert_eq!(config.relay.port, 9000);

        // Reopen and verify persistence
        let store2 = ConfigStore::new(&db_path).await.unwrap();
        let config = store2.get();
        assert_eq!(config.relay.port, 9000);
        assert_eq!(config.broadcaster.scene, "Lobby");
    }

    #[tokio::test]
    async fn test_corrupt_config_is_reported() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = ConfigStore::new(&db_path).await.unwrap();
        sqlx::query("UPDATE config SET value = 'not json' WHERE key = 'app_config'")
            .execute(store.pool())
            .await
            .unwrap();
        drop(store);

        let result = ConfigStore::new(&db_path).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
