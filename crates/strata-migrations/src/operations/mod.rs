//! Migration operations that describe schema changes.
//!
//! Each operation has two independent tracks. The state track
//! ([`Operation::state_forwards`], [`Operation::state_backwards`]) edits a
//! [`ProjectState`]; the database track ([`Operation::database_forwards`],
//! [`Operation::database_backwards`]) drives a [`SchemaEditor`] using models
//! rendered from the states on either side of the operation.
//!
//! - [`models`] - model-level operations (create, delete, rename, options)
//! - [`fields`] - field-level operations (add, remove, alter, rename)
//! - [`special`] - raw SQL, Rust code, and state/database separation

pub mod fields;
pub mod models;
pub mod special;

pub use fields::{AddField, AlterField, RemoveField, RenameField};
pub use models::{
    AddIndex, AlterIndexTogether, AlterModelOptions, AlterModelTable, AlterUniqueTogether,
    CreateModel, DeleteModel, RemoveIndex, RenameModel,
};
pub use special::{RunRust, RunSql, SeparateDatabaseAndState};

use strata_core::{MigrationError, MigrationResult};

use crate::registry::{HistoricalModel, Registry};
use crate::schema_editor::SchemaEditor;
use crate::state::ProjectState;

/// A single migration operation that can be applied forwards or backwards.
///
/// In `database_forwards`, `from_state` is the state before the operation and
/// `to_state` the state after it. In `database_backwards` the roles swap:
/// `from_state` is the newer state and `to_state` the older one the database
/// is being returned to.
pub trait Operation: Send + Sync {
    /// Returns a human-readable description of this operation.
    fn describe(&self) -> String;

    /// Applies this operation's effect to the project state.
    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()>;

    /// Undoes this operation's effect on `state`.
    ///
    /// `prior` is the state as it was before the operation was applied, so
    /// removed models and fields can be restored exactly.
    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()>;

    /// Applies this operation to the database.
    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()>;

    /// Reverses this operation on the database.
    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()>;

    /// Whether this operation can be reversed at all.
    fn reversible(&self) -> bool {
        true
    }

    /// Whether the database track can be rendered as SQL text.
    fn reduces_to_sql(&self) -> bool {
        true
    }

    /// Checks, before any database call, that reversing this operation back
    /// to `to_state` (the state before it was applied) is possible.
    fn check_reversible(&self, app_label: &str, to_state: &ProjectState) -> MigrationResult<()> {
        let _ = (app_label, to_state);
        if self.reversible() {
            Ok(())
        } else {
            Err(MigrationError::Irreversible(self.describe()))
        }
    }
}

/// Renders `state` and returns one of its historical models.
pub(crate) fn render_model(
    state: &ProjectState,
    app_label: &str,
    name: &str,
) -> MigrationResult<HistoricalModel> {
    Registry::from_state(state)?.get_model(app_label, name).cloned()
}

/// Replays `operations` backwards on `state`, giving each one the state that
/// preceded it as its prior.
pub(crate) fn state_backwards_all(
    operations: &[Box<dyn Operation>],
    app_label: &str,
    state: &mut ProjectState,
    prior: &ProjectState,
) -> MigrationResult<()> {
    let mut priors = Vec::with_capacity(operations.len());
    let mut replay = prior.clone();
    for operation in operations {
        priors.push(replay.clone());
        operation.state_forwards(app_label, &mut replay)?;
    }
    for (operation, before) in operations.iter().zip(&priors).rev() {
        operation.state_backwards(app_label, state, before)?;
    }
    Ok(())
}

/// Applies every operation's state effect in order.
pub(crate) fn state_forwards_all(
    operations: &[Box<dyn Operation>],
    app_label: &str,
    state: &mut ProjectState,
) -> MigrationResult<()> {
    operations
        .iter()
        .try_for_each(|operation| operation.state_forwards(app_label, state))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::state::{FieldKind, FieldSpec, ModelState, ProjectState};

    pub fn char_field(max_length: usize) -> FieldSpec {
        FieldSpec::new(FieldKind::CharField { max_length })
    }

    /// A state holding `library.Book(id, title)`.
    pub fn book_state() -> ProjectState {
        let mut state = ProjectState::new();
        state
            .add_model(ModelState::new(
                "library",
                "Book",
                vec![
                    ("id".into(), FieldSpec::auto()),
                    ("title".into(), char_field(200)),
                ],
            ))
            .unwrap();
        state
    }
}
