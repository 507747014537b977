//! Operations that escape the declarative vocabulary.
//!
//! [`RunSql`] executes raw SQL, [`RunRust`] runs arbitrary Rust code against
//! the historical models, and [`SeparateDatabaseAndState`] lets the state
//! track and the database track diverge on purpose.

use std::fmt;

use strata_core::{MigrationError, MigrationResult};

use super::{state_backwards_all, state_forwards_all, Operation};
use crate::registry::Registry;
use crate::schema_editor::SchemaEditor;
use crate::sql::split_statements;
use crate::state::ProjectState;

// ── RunSql ───────────────────────────────────────────────────────────────

/// Executes raw SQL.
///
/// Reversible only when `reverse_sql` is given and non-empty. Raw SQL has no
/// state effect of its own; `state_operations` describe what the SQL did to
/// the schema so the project state stays accurate.
///
/// # Examples
///
/// ```
/// use strata_migrations::operations::{Operation, RunSql};
///
/// let op = RunSql::new("CREATE INDEX title_idx ON library_book (title)")
///     .reverse("DROP INDEX title_idx");
/// assert!(op.reversible());
/// assert!(!RunSql::new("DELETE FROM library_book").reversible());
/// ```
pub struct RunSql {
    pub sql: String,
    pub reverse_sql: Option<String>,
    pub state_operations: Vec<Box<dyn Operation>>,
    /// Split the SQL into statements and execute them one by one.
    pub multiple: bool,
}

impl RunSql {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            reverse_sql: None,
            state_operations: Vec::new(),
            multiple: false,
        }
    }

    pub fn reverse(mut self, reverse_sql: impl Into<String>) -> Self {
        self.reverse_sql = Some(reverse_sql.into());
        self
    }

    pub fn state_operations(mut self, operations: Vec<Box<dyn Operation>>) -> Self {
        self.state_operations = operations;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    fn run(&self, schema_editor: &mut dyn SchemaEditor, sql: &str) -> MigrationResult<()> {
        if self.multiple {
            for statement in split_statements(sql) {
                schema_editor.execute(&statement)?;
            }
            Ok(())
        } else {
            schema_editor.execute(sql)
        }
    }
}

impl fmt::Debug for RunSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunSql")
            .field("sql", &self.sql)
            .field("reverse_sql", &self.reverse_sql)
            .field("state_operations", &self.state_operations.len())
            .field("multiple", &self.multiple)
            .finish()
    }
}

impl Operation for RunSql {
    fn describe(&self) -> String {
        "Raw SQL operation".to_string()
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        state_forwards_all(&self.state_operations, app_label, state)
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()> {
        state_backwards_all(&self.state_operations, app_label, state, prior)
    }

    fn database_forwards(
        &self,
        _app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> MigrationResult<()> {
        self.run(schema_editor, &self.sql)
    }

    fn database_backwards(
        &self,
        _app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> MigrationResult<()> {
        match self.reverse_sql.as_deref() {
            Some(sql) if !sql.trim().is_empty() => self.run(schema_editor, sql),
            _ => Err(MigrationError::Irreversible(self.describe())),
        }
    }

    fn reversible(&self) -> bool {
        self.reverse_sql
            .as_deref()
            .is_some_and(|sql| !sql.trim().is_empty())
    }
}

// ── RunRust ──────────────────────────────────────────────────────────────

/// Code run by [`RunRust`]: it receives the historical models of the state
/// before the operation and the schema editor.
pub type RustMigrationFn =
    Box<dyn Fn(&Registry, &mut dyn SchemaEditor) -> MigrationResult<()> + Send + Sync>;

/// Runs Rust code, typically a data migration.
///
/// The code sees historical models, never the application's current ones.
/// It cannot be rendered as SQL.
pub struct RunRust {
    pub description: String,
    code: RustMigrationFn,
    reverse_code: Option<RustMigrationFn>,
}

impl RunRust {
    pub fn new<F>(description: impl Into<String>, code: F) -> Self
    where
        F: Fn(&Registry, &mut dyn SchemaEditor) -> MigrationResult<()> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            code: Box::new(code),
            reverse_code: None,
        }
    }

    pub fn reverse<F>(mut self, reverse_code: F) -> Self
    where
        F: Fn(&Registry, &mut dyn SchemaEditor) -> MigrationResult<()> + Send + Sync + 'static,
    {
        self.reverse_code = Some(Box::new(reverse_code));
        self
    }

    /// Code that does nothing, for data migrations with nothing to undo.
    pub fn noop(_: &Registry, _: &mut dyn SchemaEditor) -> MigrationResult<()> {
        Ok(())
    }
}

impl fmt::Debug for RunRust {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRust")
            .field("description", &self.description)
            .field("reversible", &self.reverse_code.is_some())
            .finish_non_exhaustive()
    }
}

impl Operation for RunRust {
    fn describe(&self) -> String {
        format!("Run Rust: {}", self.description)
    }

    fn state_forwards(&self, _app_label: &str, _state: &mut ProjectState) -> MigrationResult<()> {
        Ok(())
    }

    fn state_backwards(
        &self,
        _app_label: &str,
        _state: &mut ProjectState,
        _prior: &ProjectState,
    ) -> MigrationResult<()> {
        Ok(())
    }

    fn database_forwards(
        &self,
        _app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let registry = Registry::from_state(from_state)?;
        (self.code)(&registry, schema_editor)
    }

    fn database_backwards(
        &self,
        _app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let reverse = self
            .reverse_code
            .as_ref()
            .ok_or_else(|| MigrationError::Irreversible(self.describe()))?;
        let registry = Registry::from_state(from_state)?;
        reverse(&registry, schema_editor)
    }

    fn reversible(&self) -> bool {
        self.reverse_code.is_some()
    }

    fn reduces_to_sql(&self) -> bool {
        false
    }
}

// ── SeparateDatabaseAndState ─────────────────────────────────────────────

/// Applies one list of operations to the database and another to the state.
///
/// Used when the schema was already changed by other means, or when the
/// database change must differ from what the state records.
pub struct SeparateDatabaseAndState {
    pub database_operations: Vec<Box<dyn Operation>>,
    pub state_operations: Vec<Box<dyn Operation>>,
}

impl SeparateDatabaseAndState {
    pub fn new(
        database_operations: Vec<Box<dyn Operation>>,
        state_operations: Vec<Box<dyn Operation>>,
    ) -> Self {
        Self {
            database_operations,
            state_operations,
        }
    }
}

impl fmt::Debug for SeparateDatabaseAndState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let describe = |ops: &[Box<dyn Operation>]| -> Vec<String> {
            ops.iter().map(|op| op.describe()).collect()
        };
        f.debug_struct("SeparateDatabaseAndState")
            .field("database_operations", &describe(&self.database_operations))
            .field("state_operations", &describe(&self.state_operations))
            .finish()
    }
}

impl Operation for SeparateDatabaseAndState {
    fn describe(&self) -> String {
        "Custom state/database change combination".to_string()
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        state_forwards_all(&self.state_operations, app_label, state)
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()> {
        state_backwards_all(&self.state_operations, app_label, state, prior)
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> MigrationResult<()> {
        // Database operations see their own intermediate states, not the
        // states produced by `state_operations`.
        let mut from_state = from_state.clone();
        for operation in &self.database_operations {
            let mut to_state = from_state.clone();
            operation.state_forwards(app_label, &mut to_state)?;
            operation.database_forwards(app_label, schema_editor, &from_state, &to_state)?;
            from_state = to_state;
        }
        Ok(())
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let mut states = Vec::with_capacity(self.database_operations.len() + 1);
        let mut state = to_state.clone();
        for operation in &self.database_operations {
            states.push(state.clone());
            operation.state_forwards(app_label, &mut state)?;
        }
        states.push(state);
        for (index, operation) in self.database_operations.iter().enumerate().rev() {
            operation.database_backwards(
                app_label,
                schema_editor,
                &states[index + 1],
                &states[index],
            )?;
        }
        Ok(())
    }

    fn reversible(&self) -> bool {
        self.database_operations.iter().all(|op| op.reversible())
    }

    fn reduces_to_sql(&self) -> bool {
        self.database_operations.iter().all(|op| op.reduces_to_sql())
    }

    fn check_reversible(&self, app_label: &str, to_state: &ProjectState) -> MigrationResult<()> {
        let mut state = to_state.clone();
        for operation in &self.database_operations {
            operation.check_reversible(app_label, &state)?;
            operation.state_forwards(app_label, &mut state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::{book_state, char_field};
    use crate::operations::{AddField, CreateModel, RemoveField};
    use crate::schema_editor::{DatabaseSchemaEditor, Dialect};
    use crate::state::FieldSpec;

    // ── RunSql ──────────────────────────────────────────────────────

    #[test]
    fn test_run_sql_multiple_splits() {
        let op = RunSql::new("CREATE TABLE a(); CREATE TABLE b();").multiple();
        let state = ProjectState::new();
        let mut editor = DatabaseSchemaEditor::collecting(Dialect::Sqlite);
        op.database_forwards("app", &mut editor, &state, &state)
            .unwrap();
        assert_eq!(editor.take_sql(), vec!["CREATE TABLE a()", "CREATE TABLE b()"]);
    }

    #[test]
    fn test_run_sql_single_call_without_splitting() {
        let op = RunSql::new("CREATE TABLE a(); CREATE TABLE b();");
        let state = ProjectState::new();
        let mut editor = DatabaseSchemaEditor::collecting(Dialect::Sqlite);
        op.database_forwards("app", &mut editor, &state, &state)
            .unwrap();
        assert_eq!(editor.executed_sql().len(), 1);
    }

    #[test]
    fn test_run_sql_reversibility() {
        assert!(!RunSql::new("SELECT 1").reverse("   ").reversible());
        let op = RunSql::new("SELECT 1");
        let state = ProjectState::new();
        let err = op.check_reversible("app", &state).unwrap_err();
        assert!(err.is_irreversible());

        let mut editor = DatabaseSchemaEditor::collecting(Dialect::Sqlite);
        assert!(op
            .database_backwards("app", &mut editor, &state, &state)
            .is_err());
        assert!(editor.executed_sql().is_empty());
    }

    #[test]
    fn test_run_sql_state_operations() {
        let op = RunSql::new("ALTER TABLE library_book ADD COLUMN isbn TEXT NULL").state_operations(
            vec![Box::new(AddField::new(
                "Book",
                "isbn",
                char_field(13).nullable(),
            ))],
        );
        let before = book_state();
        let mut after = before.clone();
        op.state_forwards("library", &mut after).unwrap();
        assert!(after.get_model("library", "Book").unwrap().has_field("isbn"));

        op.state_backwards("library", &mut after, &before).unwrap();
        assert_eq!(after, before);
    }

    // ── RunRust ─────────────────────────────────────────────────────

    #[test]
    fn test_run_rust_sees_historical_models() {
        let op = RunRust::new("touch books", |registry, editor| {
            let book = registry.get_model("library", "Book")?;
            editor.execute(&format!("UPDATE \"{}\" SET title = upper(title)", book.db_table))
        });
        assert!(!op.reduces_to_sql());
        assert!(!op.reversible());

        let state = book_state();
        let mut editor = DatabaseSchemaEditor::collecting(Dialect::Sqlite);
        op.database_forwards("library", &mut editor, &state, &state)
            .unwrap();
        assert_eq!(
            editor.take_sql(),
            vec!["UPDATE \"library_book\" SET title = upper(title)"]
        );
    }

    #[test]
    fn test_run_rust_noop_reverse() {
        let op = RunRust::new("seed", RunRust::noop).reverse(RunRust::noop);
        assert!(op.reversible());
        let state = ProjectState::new();
        let mut editor = DatabaseSchemaEditor::collecting(Dialect::Postgres);
        op.database_backwards("app", &mut editor, &state, &state)
            .unwrap();
    }

    // ── SeparateDatabaseAndState ────────────────────────────────────

    #[test]
    fn test_separate_state_only_issues_no_ddl() {
        let op = SeparateDatabaseAndState::new(
            vec![],
            vec![Box::new(CreateModel::new(
                "Author",
                vec![("id", FieldSpec::auto()), ("name", char_field(50))],
            ))],
        );
        let before = book_state();
        let mut after = before.clone();
        op.state_forwards("library", &mut after).unwrap();
        assert!(after.contains_model("library", "Author"));

        let mut editor = DatabaseSchemaEditor::collecting(Dialect::Sqlite);
        op.database_forwards("library", &mut editor, &before, &after)
            .unwrap();
        op.database_backwards("library", &mut editor, &after, &before)
            .unwrap();
        assert!(editor.executed_sql().is_empty());
    }

    #[test]
    fn test_separate_database_operations_use_own_states() {
        let op = SeparateDatabaseAndState::new(
            vec![Box::new(AddField::new("Book", "isbn", char_field(13).nullable()))],
            vec![],
        );
        let before = book_state();
        let mut after = before.clone();
        op.state_forwards("library", &mut after).unwrap();
        assert_eq!(after, before);

        let mut editor = DatabaseSchemaEditor::collecting(Dialect::Postgres);
        op.database_forwards("library", &mut editor, &before, &after)
            .unwrap();
        op.database_backwards("library", &mut editor, &after, &before)
            .unwrap();
        let sql = editor.take_sql();
        assert_eq!(sql.len(), 2);
        assert!(sql[0].contains("ADD COLUMN \"isbn\""));
        assert!(sql[1].contains("DROP COLUMN \"isbn\""));
    }

    #[test]
    fn test_separate_reversibility_checks_database_operations() {
        let op = SeparateDatabaseAndState::new(
            vec![Box::new(RemoveField::new("Book", "title"))],
            vec![],
        );
        assert!(op.reversible());
        let err = op.check_reversible("library", &book_state()).unwrap_err();
        assert!(err.is_irreversible());
    }
}
