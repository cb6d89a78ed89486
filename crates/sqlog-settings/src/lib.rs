//! # sqlog-settings
//!
//! Options for the SQL log sink, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SinkOptions::default()`]
//! 2. **Settings file**: `~/.sqlog/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SQLOG_*` overrides (highest priority)
//!
//! Options are hot-reloadable. An [`OptionsMonitor`] holds the current
//! snapshot and publishes replacements; consumers hold a receiver and pick
//! up the newest snapshot whenever they next look. [`watch_file`] keeps a
//! monitor in sync with a settings file on disk.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod monitor;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_options, load_options_from_path, settings_path};
pub use monitor::{OptionsMonitor, OptionsReceiver, OptionsWatcher, reload, watch_file};
pub use types::SinkOptions;
