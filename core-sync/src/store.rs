//! # Watermark Stores
//!
//! Durable persistence of the single [`Watermark`] record.
//!
//! ## Overview
//!
//! - [`FileWatermarkStore`]: one JSON document, replaced atomically
//! - [`InMemoryWatermarkStore`]: process-local, for tests and embedding
//! - [`SqliteWatermarkStore`](crate::sqlite_store::SqliteWatermarkStore):
//!   one row in a shared SQLite database
//!
//! Every store bootstraps the same way: if nothing is persisted, or what is
//! persisted cannot be parsed, a default watermark (`now - lookback`, id 0)
//! is written and returned.

use crate::{watermark::default_lookback, Result, SyncError, Watermark};
use async_trait::async_trait;
use bridge_traits::{Clock, SystemClock};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default location of the watermark file, relative to the working directory.
pub const DEFAULT_WATERMARK_PATH: &str = "data/sync-watermark.json";

/// Persistence contract for the watermark.
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Return the persisted watermark, bootstrapping a default one when none
    /// exists or the stored record is unreadable.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the medium cannot be read or the
    /// bootstrap write fails.
    async fn read(&self) -> Result<Watermark>;

    /// Durably replace the persisted watermark.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Storage`] if the write fails.
    async fn write(&self, watermark: &Watermark) -> Result<()>;
}

/// Produces the default watermark for stores with nothing persisted.
#[derive(Clone)]
pub struct WatermarkBootstrap {
    clock: Arc<dyn Clock>,
    lookback: chrono::Duration,
}

impl WatermarkBootstrap {
    pub fn new(clock: Arc<dyn Clock>, lookback: chrono::Duration) -> Self {
        Self { clock, lookback }
    }

    /// Default watermark as of the clock's current time.
    pub fn initial(&self) -> Watermark {
        Watermark::bootstrap(self.clock.now(), self.lookback)
    }

    pub fn lookback(&self) -> chrono::Duration {
        self.lookback
    }
}

impl Default for WatermarkBootstrap {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), default_lookback())
    }
}

impl fmt::Debug for WatermarkBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatermarkBootstrap")
            .field("lookback_secs", &self.lookback.num_seconds())
            .finish()
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Watermark held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryWatermarkStore {
    current: Mutex<Option<Watermark>>,
    bootstrap: WatermarkBootstrap,
}

impl InMemoryWatermarkStore {
    pub fn new(bootstrap: WatermarkBootstrap) -> Self {
        Self {
            current: Mutex::new(None),
            bootstrap,
        }
    }

    /// Store pre-seeded with `watermark`.
    pub fn with_watermark(watermark: Watermark) -> Self {
        Self {
            current: Mutex::new(Some(watermark)),
            bootstrap: WatermarkBootstrap::default(),
        }
    }

    /// Current value without bootstrapping.
    pub async fn peek(&self) -> Option<Watermark> {
        self.current.lock().await.clone()
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarkStore {
    async fn read(&self) -> Result<Watermark> {
        let mut current = self.current.lock().await;
        Ok(current
            .get_or_insert_with(|| self.bootstrap.initial())
            .clone())
    }

    async fn write(&self, watermark: &Watermark) -> Result<()> {
        *self.current.lock().await = Some(watermark.clone());
        Ok(())
    }
}

// ============================================================================
// File store
// ============================================================================

/// Watermark persisted as a JSON document on the local filesystem.
///
/// Writes go to `<path>.tmp`, are synced to disk, then renamed over the
/// target so a crash never leaves a half-written file behind.
#[derive(Debug)]
pub struct FileWatermarkStore {
    path: PathBuf,
    bootstrap: WatermarkBootstrap,
    write_lock: Mutex<()>,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_bootstrap(path, WatermarkBootstrap::default())
    }

    pub fn with_bootstrap(path: impl Into<PathBuf>, bootstrap: WatermarkBootstrap) -> Self {
        Self {
            path: path.into(),
            bootstrap,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    async fn write_atomic(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn read(&self) -> Result<Watermark> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<Watermark>(&bytes) {
                Ok(watermark) => {
                    debug!(
                        last_id = watermark.last_id,
                        last_timestamp = %watermark.last_timestamp,
                        "Loaded watermark"
                    );
                    return Ok(watermark);
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "Watermark file is unreadable, recreating default"
                    );
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No watermark found, bootstrapping default");
            }
            Err(e) => {
                return Err(SyncError::Storage(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        }

        let initial = self.bootstrap.initial();
        self.write(&initial).await?;
        Ok(initial)
    }

    async fn write(&self, watermark: &Watermark) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(watermark)
            .map_err(|e| SyncError::Storage(format!("Failed to serialize watermark: {}", e)))?;

        let _guard = self.write_lock.lock().await;
        self.write_atomic(&bytes).await.map_err(|e| {
            SyncError::Storage(format!("Failed to write {}: {}", self.path.display(), e))
        })?;

        debug!(
            last_id = watermark.last_id,
            last_timestamp = %watermark.last_timestamp,
            total_processed = watermark.total_processed,
            "Watermark persisted"
        );
        Ok(())
    }
}
