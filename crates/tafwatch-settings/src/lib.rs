//! # tafwatch-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TafwatchSettings::default()`]
//! 2. **Settings file**: `~/.tafwatch/settings.json` or `--config`, deep-merged over defaults
//! 3. **Environment variables**: `TAFWATCH_*` overrides
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_file_layer, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;
