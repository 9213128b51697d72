//! Cached provider selection
//!
//! Remembers the last provider that connected successfully so startup can try
//! a silent reconnect. Nothing here is allowed to fail loudly: a missing,
//! unreadable or corrupt entry is simply "no cached selection".

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::provider::ProviderKind;

/// Persisted record of the last successful provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSelection {
    pub provider: String,
    pub saved_at: DateTime<Utc>,
}

impl CachedSelection {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider: provider.key().to_string(),
            saved_at: Utc::now(),
        }
    }
}

/// Key-value store for the cached selection
#[async_trait]
pub trait SelectionCache: Send + Sync {
    async fn load(&self) -> Option<CachedSelection>;
    async fn store(&self, provider: ProviderKind);
    async fn clear(&self);
}

/// JSON file backed cache
pub struct FileSelectionCache {
    path: PathBuf,
}

impl FileSelectionCache {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SelectionCache for FileSelectionCache {
    async fn load(&self) -> Option<CachedSelection> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cached selection at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Cannot read cached selection {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<CachedSelection>(&data) {
            Ok(selection) => {
                debug!("Loaded cached selection: {}", selection.provider);
                Some(selection)
            }
            Err(e) => {
                warn!("Ignoring corrupt cached selection {}: {}", self.path.display(), e);
                None
            }
        }
    }

    async fn store(&self, provider: ProviderKind) {
        let selection = CachedSelection::new(provider);
        let data = match serde_json::to_string_pretty(&selection) {
            Ok(data) => data,
            Err(e) => {
                warn!("Failed to serialize cached selection: {}", e);
                return;
            }
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("Cannot create cache directory {}: {}", parent.display(), e);
                return;
            }
        }

        match tokio::fs::write(&self.path, data).await {
            Ok(()) => info!("Saved provider selection '{}' to {}", provider, self.path.display()),
            Err(e) => warn!("Failed to save provider selection: {}", e),
        }
    }

    async fn clear(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("Cleared cached selection {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to clear cached selection: {}", e),
        }
    }
}

/// In-process cache, for headless runs and tests
#[derive(Default)]
pub struct MemorySelectionCache {
    entry: RwLock<Option<CachedSelection>>,
}

impl MemorySelectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with an arbitrary (possibly stale) provider key
    pub fn with_entry(provider: &str) -> Self {
        Self {
            entry: RwLock::new(Some(CachedSelection {
                provider: provider.to_string(),
                saved_at: Utc::now(),
            })),
        }
    }
}

#[async_trait]
impl SelectionCache for MemorySelectionCache {
    async fn load(&self) -> Option<CachedSelection> {
        self.entry.read().await.clone()
    }

    async fn store(&self, provider: ProviderKind) {
        *self.entry.write().await = Some(CachedSelection::new(provider));
    }

    async fn clear(&self) {
        *self.entry.write().await = None;
    }
}
