//! # strata-core
//!
//! Foundation types shared by every strata crate: the migration error
//! taxonomy, settings and their loaders, and tracing-based logging setup.
//!
//! ## Modules
//!
//! - [`error`] - `MigrationError` and the `MigrationResult` alias
//! - [`settings`] - Engine settings with sensible defaults
//! - [`settings_loader`] - TOML/JSON loading and environment overrides
//! - [`logging`] - Tracing subscriber setup and migration spans

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{MigrationError, MigrationResult};
pub use settings::{DatabaseSettings, MigrationSettings, Settings};
