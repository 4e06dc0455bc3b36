//! Application state shared across handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use podwatch_core::{DeviceLink, PodConfig, PodMonitor};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// State handed to every handler.
pub type SharedState = AppState;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    monitor: PodMonitor,
    config: RwLock<PodConfig>,
    config_path: Option<PathBuf>,
}

impl AppState {
    /// Create application state around `link`.
    ///
    /// Configuration changes are written back to `config_path` when set.
    #[must_use]
    pub fn new(config: PodConfig, link: Arc<dyn DeviceLink>, config_path: Option<PathBuf>) -> Self {
        let monitor = PodMonitor::new(&config, link);
        Self::with_monitor(config, monitor, config_path)
    }

    /// Create application state backed by the simulated pod.
    #[cfg(feature = "simulator")]
    #[must_use]
    pub fn simulated(config: PodConfig, config_path: Option<PathBuf>) -> Self {
        let monitor = PodMonitor::simulated(&config);
        Self::with_monitor(config, monitor, config_path)
    }

    fn with_monitor(config: PodConfig, monitor: PodMonitor, config_path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                monitor,
                config: RwLock::new(config),
                config_path,
            }),
        }
    }

    /// The pod monitor.
    #[must_use]
    pub fn monitor(&self) -> &PodMonitor {
        &self.inner.monitor
    }

    /// Get read access to config.
    pub async fn config(&self) -> RwLockReadGuard<'_, PodConfig> {
        self.inner.config.read().await
    }

    /// Get write access to config.
    pub async fn config_mut(&self) -> RwLockWriteGuard<'_, PodConfig> {
        self.inner.config.write().await
    }

    /// Where configuration changes are persisted, if anywhere.
    #[must_use]
    pub fn config_path(&self) -> Option<&Path> {
        self.inner.config_path.as_deref()
    }
}
