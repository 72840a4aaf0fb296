//! Wires the SQLite store, project cache, engine and reaper together.

use std::sync::Arc;

use anyhow::{Context, Result};
use wt_core::{
    Clock, ProjectCache, ProjectValidator, SessionEvents, StaleSessionReaper, SystemClock,
    TimeEngine,
};
use wt_db::SqliteStore;

use crate::Config;

pub struct App {
    pub store: Arc<SqliteStore>,
    pub engine: TimeEngine,
    pub reaper: Arc<StaleSessionReaper>,
}

impl App {
    /// Opens the configured database, creating its directory if needed.
    pub fn open(config: &Config) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create database directory")?;
        }
        let store = SqliteStore::open(&config.database_path, config.busy_timeout())
            .with_context(|| format!("failed to open {}", config.database_path.display()))?;
        Self::with_clock(config, Arc::new(store), Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &Config,
        store: Arc<SqliteStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let events = SessionEvents::default();
        let cache = Arc::new(ProjectCache::new(config.project_cache_ttl()?));
        let validator = ProjectValidator::new(store.clone(), cache.clone(), clock.clone());
        let engine = TimeEngine::new(store.clone(), validator, clock.clone(), config.engine_config()?)
            .with_events(events.clone());
        let reaper = StaleSessionReaper::new(store.clone(), cache, clock, config.reaper_config()?)
            .with_events(events);

        tracing::debug!(database = %config.database_path.display(), "tracker ready");
        Ok(Self {
            store,
            engine,
            reaper: Arc::new(reaper),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_cache_ttl_fails_startup() {
        let config = Config {
            project_cache_ttl_secs: u64::MAX,
            ..Config::default()
        };
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let Err(err) = App::with_clock(&config, store, Arc::new(SystemClock)) else {
            panic!("startup should fail");
        };
        assert!(err.to_string().contains("project_cache_ttl_secs"), "{err}");
    }
}
