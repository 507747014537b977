//! # strata-migrations
//!
//! Declarative, reversible schema migrations. Every operation drives two
//! independent tracks: a state track that edits an in-memory
//! [`ProjectState`], and a database track that issues DDL through a
//! [`SchemaEditor`].
//!
//! ## Architecture
//!
//! - [`ProjectState`] is a snapshot of every model, field, and option.
//! - [`Operation`]s change the state and the database, forwards and backwards.
//! - [`Registry`] renders a state into historical models with resolved
//!   references, for DDL generation and for data migrations.
//! - [`Migration`] is a named list of operations; [`MigrationGraph`] orders
//!   migrations by their dependencies.
//! - [`DatabaseSchemaEditor`] generates `SQLite` or PostgreSQL DDL and owns the
//!   migration's transaction.
//! - [`MigrationExecutor`] plans and runs migrations and records them.
//!
//! ## Module Overview
//!
//! - [`state`] - `ProjectState`, `ModelState`, `FieldSpec`
//! - [`registry`] - `Registry`, `HistoricalModel`
//! - [`operations`] - `Operation` trait and all concrete operations
//! - [`migration`] - `Migration`, `MigrationGraph`
//! - [`schema_editor`] - `SchemaEditor` trait, `Dialect`, `DatabaseSchemaEditor`
//! - [`connection`] - `Connection` trait, `SQLite` and recording connections
//! - [`executor`] - `MigrationExecutor`, `MigrationPlan`, `MigrationRecorder`
//! - [`sql`] - statement splitting for raw SQL

// Clippy overrides appropriate for a DDL generation / migration crate.
#![allow(clippy::too_many_lines)]
#![allow(clippy::result_large_err)]
#![allow(clippy::format_push_string)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::use_self)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::unnecessary_literal_bound)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::single_char_pattern)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::cognitive_complexity)]

pub mod connection;
pub mod executor;
pub mod migration;
pub mod operations;
pub mod registry;
pub mod schema_editor;
pub mod sql;
pub mod state;

// Re-export key types at the crate root.
pub use connection::{connect, Connection, RecordingConnection, SqliteConnection};
pub use executor::{
    CancelHandle, MigrationExecutor, MigrationPlan, MigrationRecorder, MigrationStep,
    MigrationTarget, Progress,
};
pub use migration::{ApplyObserver, Migration, MigrationGraph, MigrationKey};
pub use operations::Operation;
pub use registry::{HistoricalField, HistoricalModel, Registry};
pub use schema_editor::{DatabaseSchemaEditor, Dialect, SchemaEditor};
pub use state::{
    FieldKind, FieldSpec, IndexSpec, ModelBase, ModelOptions, ModelState, OnDelete, ProjectState,
    Value,
};
pub use strata_core::{MigrationError, MigrationResult};
