//! Settings for the strata migration engine.
//!
//! [`Settings`] holds everything the engine reads from configuration: logging,
//! the database connection, and migration execution defaults. Every field has
//! a sensible default so partial configuration files are accepted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// The database engine (`sqlite` or `postgresql`).
    pub engine: String,
    /// The database name (or file path for `SQLite`, `:memory:` for in-memory).
    pub name: String,
    /// Additional engine-specific options.
    pub options: HashMap<String, String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: "sqlite".to_string(),
            name: "db.sqlite3".to_string(),
            options: HashMap::new(),
        }
    }
}

/// Defaults applied when executing migrations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Whether each migration runs inside a transaction when the engine
    /// supports transactional DDL. Individual migrations may still opt out.
    pub atomic: bool,
    /// The table used to record applied migrations.
    pub recorder_table: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            atomic: true,
            recorder_table: "strata_migrations".to_string(),
        }
    }
}

/// The complete set of engine settings.
///
/// # Examples
///
/// ```
/// use strata_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.log_level, "info");
/// assert!(settings.migrations.atomic);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Whether debug mode is enabled (pretty log output).
    pub debug: bool,
    /// The log level filter (e.g. "info", "debug", "strata_migrations=trace").
    pub log_level: String,
    /// The database connection to migrate.
    pub database: DatabaseSettings,
    /// Migration execution defaults.
    pub migrations: MigrationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: true,
            log_level: "info".to_string(),
            database: DatabaseSettings::default(),
            migrations: MigrationSettings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_database() {
        let db = DatabaseSettings::default();
        assert_eq!(db.engine, "sqlite");
        assert_eq!(db.name, "db.sqlite3");
        assert!(db.options.is_empty());
    }

    #[test]
    fn test_default_migrations() {
        let m = MigrationSettings::default();
        assert!(m.atomic);
        assert_eq!(m.recorder_table, "strata_migrations");
    }

    #[test]
    fn test_settings_serde_round_trip() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }
}
