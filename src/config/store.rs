use arc_swap::ArcSwap;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use super::AppConfig;
use crate::error::{AppError, Result};

const CONFIG_KEY: &str = "app_config";

/// Configuration store backed by SQLite
///
/// Reads go through an `ArcSwap` cache; writes persist first, then swap.
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
    /// Open (or create) the store at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            // Single writer; one spare connection for reads
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(&db_url)
            .await?;

        Self::init_schema(&pool).await?;

        let config = Self::load_config(&pool).await?;
        info!("Configuration loaded from {}", db_path.display());
        let cache = Arc::new(ArcSwap::from_pointee(config));

        let (change_tx, _) = broadcast::channel(16);

        Ok(Self {
            pool,
            cache,
            change_tx,
        })
    }

    async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn load_config(pool: &Pool<Sqlite>) -> Result<AppConfig> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?1")
            .bind(CONFIG_KEY)
            .fetch_optional(pool)
            .await?;

        match row {
            Some((json,)) => {
                serde_json::from_str(&json).map_err(|e| AppError::Config(e.to_string()))
            }
            None => {
                let config = AppConfig::default();
                Self::save_config_to_db(pool, &config).await?;
                Ok(config)
            }
        }
    }

    async fn save_config_to_db(pool: &Pool<Sqlite>, config: &AppConfig) -> Result<()> {
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

    /// Read-modify-write; concurrent updates are last-write-wins
    pub async fn update<F>(&self, f: F) -> Result<Arc<AppConfig>>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (**self.cache.load()).clone();
        f(&mut config);

        Self::save_config_to_db(&self.pool, &config).await?;

        let config = Arc::new(config);
        self.cache.store(config.clone());

        let _ = self.change_tx.send(ConfigChange {
            key: CONFIG_KEY.to_string(),
        });

        Ok(config)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
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
        assert_eq!(store.get().inject.batch_size, 16);

        let mut changes = store.subscribe();
        store
            .update(|c| {
                c.inject.batch_size = 8;
                c.web.http_port = 9000;
            })
            .await
            .unwrap();
        assert_eq!(changes.recv().await.unwrap().key, CONFIG_KEY);

        let config = store.get();
        assert_eq!(config.inject.batch_size, 8);
        assert_eq!(config.web.http_port, 9000);

        // Reopen and verify persistence
        let store2 = ConfigStore::new(&db_path).await.unwrap();
        let config = store2.get();
        assert_eq!(config.inject.batch_size, 8);
        assert_eq!(config.web.http_port, 9000);
    }
}
