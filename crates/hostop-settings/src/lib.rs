//! # hostop-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`HostopSettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `HOSTOP_*` overrides (highest priority)
//!
//! The loaded value is passed explicitly to the components that need it.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path};
pub use types::*;
