use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{DbError, DbResult};
use crate::file::{DEFAULT_PAGE_SIZE, DEFAULT_POOL_PAGES};

/// Engine-wide settings, passed explicitly to everything that needs them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes per page, on disk and in memory
    pub page_size: usize,
    /// Buffer pool capacity in pages
    pub pool_pages: usize,
    /// Upper bound on a single lock wait; `None` waits until cancelled
    pub lock_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_pages: DEFAULT_POOL_PAGES,
            lock_timeout_ms: Some(5000),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            DbError::InvalidConfig(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> DbResult<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| DbError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_pages(mut self, pool_pages: usize) -> Self {
        self.pool_pages = pool_pages;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout_ms = timeout.map(|t| t.as_millis() as u64);
        self
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.page_size == 0 {
            return Err(DbError::InvalidConfig("page_size must be positive".into()));
        }
        if self.pool_pages == 0 {
            return Err(DbError::InvalidConfig("pool_pages must be positive".into()));
        }
        Ok(())
    }
}
