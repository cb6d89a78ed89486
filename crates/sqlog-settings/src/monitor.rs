//! Hot-swappable options.
//!
//! [`OptionsMonitor`] owns the current [`SinkOptions`] snapshot. Updates
//! replace the snapshot wholesale (`Arc` swap through a `watch` channel), so a
//! reader always sees one consistent set of values. Receivers never block:
//! they read the latest snapshot at their own decision points.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::loader::load_options_from_path;
use crate::types::SinkOptions;

/// Receiving side of an [`OptionsMonitor`].
pub type OptionsReceiver = watch::Receiver<Arc<SinkOptions>>;

/// Holder and publisher of the current options snapshot.
#[derive(Clone, Debug)]
pub struct OptionsMonitor {
    tx: Arc<watch::Sender<Arc<SinkOptions>>>,
}

impl OptionsMonitor {
    /// Start with the given options.
    pub fn new(options: SinkOptions) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(options));
        Self { tx: Arc::new(tx) }
    }

    /// The current snapshot.
    pub fn current(&self) -> Arc<SinkOptions> {
        Arc::clone(&self.tx.borrow())
    }

    /// Replace the snapshot and notify subscribers.
    pub fn update(&self, options: SinkOptions) {
        let _ = self.tx.send_replace(Arc::new(options));
    }

    /// Subscribe to changes. The receiver starts at the current snapshot.
    pub fn subscribe(&self) -> OptionsReceiver {
        self.tx.subscribe()
    }
}

impl Default for OptionsMonitor {
    fn default() -> Self {
        Self::new(SinkOptions::default())
    }
}

/// Keeps an [`OptionsMonitor`] in sync with a settings file.
///
/// Watching stops when this value is dropped.
pub struct OptionsWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl OptionsWatcher {
    /// The file being watched.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for OptionsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionsWatcher")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Watch `path` and publish reloaded options through `monitor` on change.
///
/// The parent directory is watched rather than the file itself, so editors
/// that replace the file on save are still picked up. A file that fails to
/// load leaves the previous snapshot in place.
pub fn watch_file(monitor: OptionsMonitor, path: &Path) -> Result<OptionsWatcher> {
    let target = path.to_path_buf();
    let file_name = target.file_name().map(std::ffi::OsStr::to_os_string);
    let watched_dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let reload_target = target.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                if !(event.kind.is_modify() || event.kind.is_create()) {
                    return;
                }
                let touches_target = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(std::ffi::OsStr::to_os_string) == file_name);
                if touches_target {
                    let _ = reload(&monitor, &reload_target);
                }
            }
            Err(e) => warn!(error = %e, "settings watcher error"),
        }
    })?;
    watcher.watch(&watched_dir, RecursiveMode::NonRecursive)?;

    info!(path = %target.display(), "watching sink settings");
    Ok(OptionsWatcher {
        path: target,
        _watcher: watcher,
    })
}

/// Reload `path` into `monitor`. Returns whether a new snapshot was published.
pub fn reload(monitor: &OptionsMonitor, path: &Path) -> bool {
    match load_options_from_path(path) {
        Ok(options) => {
            if *monitor.current() == options {
                debug!(path = %path.display(), "settings unchanged");
                return false;
            }
            info!(path = %path.display(), "sink settings reloaded");
            monitor.update(options);
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to reload sink settings, keeping previous");
            false
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
