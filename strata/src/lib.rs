//! # strata
//!
//! Declarative, reversible schema migrations with independent state and
//! database tracks.
//!
//! This is the meta-crate that re-exports the strata sub-crates. Depend on
//! `strata` for everything, or on the individual crates for finer-grained
//! control.

/// Error taxonomy, settings, and logging setup.
pub use strata_core as core;

/// Project state, operations, migrations, schema editors, and the executor.
pub use strata_migrations as migrations;

pub use serde;
pub use serde_json;
pub use tracing;
pub use tracing_subscriber;

/// The types needed to write and run migrations.
///
/// # Examples
///
/// ```
/// use strata::prelude::*;
///
/// let migration = Migration::new("library", "0001_initial").add_operation(Box::new(
///     CreateModel::new(
///         "Book",
///         vec![
///             ("id", FieldSpec::auto()),
///             ("title", FieldSpec::new(FieldKind::CharField { max_length: 200 })),
///         ],
///     ),
/// ));
/// let graph = MigrationGraph::build(vec![migration]).unwrap();
///
/// let mut conn = SqliteConnection::memory().unwrap();
/// let mut executor = MigrationExecutor::new(&mut conn, graph);
/// executor.migrate(&executor.leaf_targets(), false).unwrap();
/// ```
pub mod prelude {
    pub use strata_core::{MigrationError, MigrationResult, Settings};
    pub use strata_migrations::operations::{
        AddField, AddIndex, AlterField, AlterIndexTogether, AlterModelOptions, AlterModelTable,
        AlterUniqueTogether, CreateModel, DeleteModel, RemoveField, RemoveIndex, RenameField,
        RenameModel, RunRust, RunSql, SeparateDatabaseAndState,
    };
    pub use strata_migrations::{
        connect, Connection, DatabaseSchemaEditor, Dialect, FieldKind, FieldSpec, IndexSpec,
        Migration, MigrationExecutor, MigrationGraph, MigrationTarget, ModelOptions, ModelState,
        OnDelete, Operation, ProjectState, Registry, SchemaEditor, SqliteConnection,
    };
}
