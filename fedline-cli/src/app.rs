//! Wiring of config, store, transport and session for one invocation.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use fedline_client::{
    ClientConfig, Clock, HttpTransport, SessionManager, SystemClock, TimelineSynchronizer,
};
use fedline_store::LocalStore;

/// Name of the config file looked up in the data directory.
pub const CONFIG_FILE: &str = "fedline.toml";

/// Everything a command needs.
pub struct App {
    pub config: ClientConfig,
    pub store: LocalStore,
    pub sessions: SessionManager<HttpTransport>,
    pub clock: Arc<dyn Clock>,
}

impl App {
    /// Open the cache in `data_dir` and restore the persisted session.
    pub async fn open(data_dir: &Path, config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(data_dir, config_path)?;

        // An absolute database path replaces the data directory.
        let database = data_dir.join(&config.storage.database);
        let store = LocalStore::open(&database)
            .await
            .with_context(|| format!("Failed to open cache {}", database.display()))?;

        let transport = HttpTransport::new(&config.service.url, config.network.request_timeout())
            .context("Failed to set up HTTP client")?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sessions = SessionManager::new(
            transport,
            Arc::new(store.key_value_store()),
            Arc::clone(&clock),
            config.clone(),
        );
        sessions
            .restore()
            .await
            .context("Failed to restore session")?;

        Ok(Self {
            config,
            store,
            sessions,
            clock,
        })
    }

    /// Timeline synchronizer over this app's store and session.
    pub fn timelines(&self) -> TimelineSynchronizer<SessionManager<HttpTransport>> {
        TimelineSynchronizer::new(
            Arc::new(self.sessions.clone()),
            self.store.clone(),
            Arc::clone(&self.clock),
            self.config.timeline.clone(),
        )
    }
}

/// Explicit config file, else `fedline.toml` in the data directory, else defaults.
pub fn load_config(data_dir: &Path, explicit: Option<&Path>) -> Result<ClientConfig> {
    if let Some(path) = explicit {
        return Ok(ClientConfig::from_file(path)?);
    }
    let path = data_dir.join(CONFIG_FILE);
    if path.exists() {
        Ok(ClientConfig::from_file(&path)?)
    } else {
        Ok(ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_without_config_file() {
        let dir = tempdir().unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.service.url, "https://bsky.social");
    }

    #[test]
    fn config_file_in_data_dir_is_used() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[service]\nurl = \"https://pds.example\"\n",
        )
        .unwrap();
        let config = load_config(dir.path(), None).unwrap();
        assert_eq!(config.service.url, "https://pds.example");
    }

    #[test]
    fn explicit_config_must_exist() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(dir.path(), Some(&missing)).is_err());
    }

    #[tokio::test]
    async fn open_creates_cache_signed_out() {
        let dir = tempdir().unwrap();
        let app = App::open(dir.path(), None).await.unwrap();
        assert!(dir.path().join("fedline.db").exists());
        assert!(app.sessions.current_session().is_none());
    }
}
