//! Migrations and the dependency graph between them.
//!
//! A [`Migration`] is a named unit of schema change containing an ordered
//! sequence of [`Operation`]s. It knows how to replay its operations on a
//! [`ProjectState`] and how to drive both tracks (state and database) forwards
//! and backwards through a [`DatabaseSchemaEditor`].
//!
//! The [`MigrationGraph`] owns every migration of a project and resolves the
//! dependency DAG between them, across apps.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::fmt;

use strata_core::{MigrationError, MigrationResult};

use crate::operations::Operation;
use crate::registry::Registry;
use crate::schema_editor::DatabaseSchemaEditor;
use crate::state::ProjectState;

/// Identifies a migration: `(app_label, name)`.
pub type MigrationKey = (String, String);

/// Formats a migration key as `app.name`.
pub fn key_label(key: &MigrationKey) -> String {
    format!("{}.{}", key.0, key.1)
}

/// Hook called before each operation while a migration runs.
///
/// The executor uses it to report progress and to honour cancellation; an
/// error returned here stops the migration before the operation starts.
pub trait ApplyObserver {
    /// Called before an operation runs. `completed` operations of the
    /// current pass have already finished.
    fn before_operation(
        &mut self,
        migration: &Migration,
        completed: usize,
        operation: &dyn Operation,
    ) -> MigrationResult<()> {
        let _ = (migration, completed, operation);
        Ok(())
    }
}

impl ApplyObserver for () {}

/// A single migration containing a sequence of operations.
///
/// Migrations are identified by `(app_label, name)` and may declare
/// dependencies on other migrations. Operations within a migration
/// are applied in order.
///
/// # Examples
///
/// ```
/// use strata_migrations::migration::Migration;
/// use strata_migrations::operations::CreateModel;
/// use strata_migrations::state::{FieldKind, FieldSpec, ProjectState};
///
/// let migration = Migration::new("library", "0001_initial")
///     .initial()
///     .add_operation(Box::new(CreateModel::new(
///         "Book",
///         vec![("title", FieldSpec::new(FieldKind::CharField { max_length: 200 }))],
///     )));
///
/// let mut state = ProjectState::new();
/// migration.mutate_state(&mut state).unwrap();
/// assert!(state.contains_model("library", "Book"));
/// ```
pub struct Migration {
    /// The application label this migration belongs to.
    pub app_label: String,
    /// The migration name (e.g., "0001_initial").
    pub name: String,
    /// Migrations that must be applied before this one.
    pub dependencies: Vec<MigrationKey>,
    /// Migrations that must be applied after this one, even though they do
    /// not declare the dependency themselves.
    pub run_before: Vec<MigrationKey>,
    /// The operations to apply, in order.
    pub operations: Vec<Box<dyn Operation>>,
    /// Whether this is the initial migration for the app.
    pub initial: bool,
    /// Whether the database track runs inside one transaction.
    pub atomic: bool,
}

impl Migration {
    /// Creates a new, atomic migration with no operations.
    pub fn new(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
            dependencies: Vec::new(),
            run_before: Vec::new(),
            operations: Vec::new(),
            initial: false,
            atomic: true,
        }
    }

    /// Marks this migration as the initial migration.
    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    /// Adds a dependency on another migration.
    pub fn depends_on(mut self, app_label: impl Into<String>, name: impl Into<String>) -> Self {
        self.dependencies.push((app_label.into(), name.into()));
        self
    }

    /// Requires another migration to run after this one.
    pub fn run_before(mut self, app_label: impl Into<String>, name: impl Into<String>) -> Self {
        self.run_before.push((app_label.into(), name.into()));
        self
    }

    /// Adds an operation to this migration.
    pub fn add_operation(mut self, op: Box<dyn Operation>) -> Self {
        self.operations.push(op);
        self
    }

    /// Runs the database track outside a transaction.
    pub fn non_atomic(mut self) -> Self {
        self.atomic = false;
        self
    }

    /// Returns the `(app_label, name)` key for this migration.
    pub fn key(&self) -> MigrationKey {
        (self.app_label.clone(), self.name.clone())
    }

    /// Returns `app.name`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.app_label, self.name)
    }

    fn failed(
        &self,
        index: usize,
        operation: &dyn Operation,
        source: MigrationError,
    ) -> MigrationError {
        MigrationError::OperationFailed {
            migration: self.label(),
            operation: operation.describe(),
            index,
            source: Box::new(source),
        }
    }

    /// Replays the state track of every operation on `state`.
    ///
    /// The resulting state is rendered once to check that every lazy
    /// reference still resolves.
    pub fn mutate_state(&self, state: &mut ProjectState) -> MigrationResult<()> {
        for (index, operation) in self.operations.iter().enumerate() {
            operation
                .state_forwards(&self.app_label, state)
                .map_err(|err| self.failed(index, operation.as_ref(), err))?;
        }
        Registry::from_state(state).map_err(|err| match err {
            MigrationError::InvalidStateTransition(message) => {
                MigrationError::InvalidStateTransition(format!(
                    "After migration {}: {message}",
                    self.label()
                ))
            }
            other => other,
        })?;
        Ok(())
    }

    /// Replays the operations on a copy of `state` and returns, for each
    /// one, the states immediately before and after it.
    fn replay(&self, state: &ProjectState) -> MigrationResult<Vec<(ProjectState, ProjectState)>> {
        let mut steps = Vec::with_capacity(self.operations.len());
        let mut current = state.clone();
        for (index, operation) in self.operations.iter().enumerate() {
            let before = current.clone();
            operation
                .state_forwards(&self.app_label, &mut current)
                .map_err(|err| self.failed(index, operation.as_ref(), err))?;
            steps.push((before, current.clone()));
        }
        Ok(steps)
    }

    /// Checks that every operation can be reversed, starting from the state
    /// the project had before this migration.
    pub fn check_reversible(&self, state: &ProjectState) -> MigrationResult<()> {
        for (index, (operation, (before, _))) in
            self.operations.iter().zip(self.replay(state)?).enumerate()
        {
            operation
                .check_reversible(&self.app_label, &before)
                .map_err(|err| self.failed(index, operation.as_ref(), err))?;
        }
        Ok(())
    }

    /// Applies this migration: for each operation, the state track runs
    /// first, then the database track with the states on either side.
    ///
    /// When the editor only collects SQL, operations that cannot be rendered
    /// as SQL are skipped with a comment. Failures are wrapped in
    /// [`MigrationError::OperationFailed`]; errors raised by the observer
    /// (such as cancellation) are returned as they are.
    pub fn apply(
        &self,
        mut state: ProjectState,
        schema_editor: &mut DatabaseSchemaEditor<'_>,
        observer: &mut dyn ApplyObserver,
    ) -> MigrationResult<ProjectState> {
        for (index, operation) in self.operations.iter().enumerate() {
            observer.before_operation(self, index, operation.as_ref())?;
            schema_editor.push_comment(&operation.describe());
            let old_state = state.clone();
            operation
                .state_forwards(&self.app_label, &mut state)
                .map_err(|err| self.failed(index, operation.as_ref(), err))?;
            if schema_editor.is_collecting() && !operation.reduces_to_sql() {
                schema_editor.push_comment("Cannot be written as SQL; skipped");
                continue;
            }
            operation
                .database_forwards(&self.app_label, schema_editor, &old_state, &state)
                .map_err(|err| self.failed(index, operation.as_ref(), err))?;
        }
        Ok(state)
    }

    /// Reverses this migration. `state` is the project state before this
    /// migration was applied; the returned state equals it.
    ///
    /// Reversibility of every operation is checked before the first database
    /// call, so an irreversible operation never leaves a partial reversal.
    pub fn unapply(
        &self,
        state: ProjectState,
        schema_editor: &mut DatabaseSchemaEditor<'_>,
        observer: &mut dyn ApplyObserver,
    ) -> MigrationResult<ProjectState> {
        let steps = self.replay(&state)?;
        for (index, (operation, (before, _))) in self.operations.iter().zip(&steps).enumerate() {
            operation
                .check_reversible(&self.app_label, before)
                .map_err(|err| self.failed(index, operation.as_ref(), err))?;
        }

        let mut current = steps.last().map_or(state, |(_, after)| after.clone());
        for (completed, (index, (operation, (before, after)))) in self
            .operations
            .iter()
            .zip(&steps)
            .enumerate()
            .rev()
            .enumerate()
        {
            observer.before_operation(self, completed, operation.as_ref())?;
            schema_editor.push_comment(&operation.describe());
            if schema_editor.is_collecting() && !operation.reduces_to_sql() {
                schema_editor.push_comment("Cannot be written as SQL; skipped");
            } else {
                operation
                    .database_backwards(&self.app_label, schema_editor, after, before)
                    .map_err(|err| self.failed(index, operation.as_ref(), err))?;
            }
            operation
                .state_backwards(&self.app_label, &mut current, before)
                .map_err(|err| self.failed(index, operation.as_ref(), err))?;
        }
        Ok(current)
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operations: Vec<String> = self.operations.iter().map(|op| op.describe()).collect();
        f.debug_struct("Migration")
            .field("app_label", &self.app_label)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("run_before", &self.run_before)
            .field("operations", &operations)
            .field("initial", &self.initial)
            .field("atomic", &self.atomic)
            .finish()
    }
}

// ── MigrationGraph ───────────────────────────────────────────────────────

/// A directed acyclic graph (DAG) of migrations.
///
/// The graph owns the migrations and tracks their dependency relationships.
/// It provides topological ordering and per-target plans so migrations can
/// be applied or reversed in the correct sequence.
#[derive(Debug, Default)]
pub struct MigrationGraph {
    migrations: BTreeMap<MigrationKey, Migration>,
    /// From dependent to dependency.
    parents: BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
    /// From dependency to dependent.
    children: BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
}

impl MigrationGraph {
    /// Creates a new empty migration graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from a set of migrations.
    ///
    /// Fails with [`MigrationError::NodeNotFound`] when a dependency or
    /// `run_before` entry names a missing migration, and with
    /// [`MigrationError::DependencyCycle`] when the graph is not acyclic.
    pub fn build(migrations: Vec<Migration>) -> MigrationResult<Self> {
        let mut graph = Self::new();
        for migration in migrations {
            graph.add_migration(migration)?;
        }

        let mut edges = Vec::new();
        for migration in graph.migrations.values() {
            let key = migration.key();
            for dependency in &migration.dependencies {
                edges.push((key.clone(), dependency.clone()));
            }
            for later in &migration.run_before {
                edges.push((later.clone(), key.clone()));
            }
        }
        for (child, parent) in &edges {
            graph.add_dependency(child, parent)?;
        }

        graph.validate()?;
        Ok(graph)
    }

    /// Adds a migration node without wiring its dependencies.
    pub fn add_migration(&mut self, migration: Migration) -> MigrationResult<()> {
        let key = migration.key();
        if self.migrations.contains_key(&key) {
            return Err(MigrationError::InvalidPlan(format!(
                "Duplicate migration {}",
                key_label(&key)
            )));
        }
        self.parents.entry(key.clone()).or_default();
        self.children.entry(key.clone()).or_default();
        self.migrations.insert(key, migration);
        Ok(())
    }

    /// Adds a dependency edge: `child` depends on `parent`.
    ///
    /// Both nodes must have been added previously.
    pub fn add_dependency(
        &mut self,
        child: &MigrationKey,
        parent: &MigrationKey,
    ) -> MigrationResult<()> {
        if !self.migrations.contains_key(child) {
            return Err(MigrationError::NodeNotFound {
                node: key_label(child),
                referenced_by: key_label(parent),
            });
        }
        if !self.migrations.contains_key(parent) {
            return Err(MigrationError::NodeNotFound {
                node: key_label(parent),
                referenced_by: key_label(child),
            });
        }
        self.children
            .entry(parent.clone())
            .or_default()
            .insert(child.clone());
        self.parents
            .entry(child.clone())
            .or_default()
            .insert(parent.clone());
        Ok(())
    }

    /// Returns a migration by key.
    pub fn migration(&self, key: &MigrationKey) -> MigrationResult<&Migration> {
        self.migrations
            .get(key)
            .ok_or_else(|| MigrationError::NodeNotFound {
                node: key_label(key),
                referenced_by: "migration plan".to_string(),
            })
    }

    /// Returns whether the graph contains a given node.
    pub fn contains(&self, key: &MigrationKey) -> bool {
        self.migrations.contains_key(key)
    }

    /// Returns the number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Returns whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Returns all node keys in the graph, sorted.
    pub fn node_keys(&self) -> Vec<MigrationKey> {
        self.migrations.keys().cloned().collect()
    }

    /// Returns the app labels that have migrations.
    pub fn app_labels(&self) -> Vec<String> {
        let apps: BTreeSet<&String> = self.migrations.keys().map(|(app, _)| app).collect();
        apps.into_iter().cloned().collect()
    }

    /// Returns the direct dependencies of a node.
    pub fn dependencies(&self, key: &MigrationKey) -> Vec<MigrationKey> {
        self.parents
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the direct dependents of a node.
    pub fn dependents(&self, key: &MigrationKey) -> Vec<MigrationKey> {
        self.children
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns all migrations in topological order (dependencies first).
    ///
    /// Ties are broken by key order, so the result is deterministic.
    /// Returns [`MigrationError::DependencyCycle`] if the graph has a cycle.
    pub fn topological_order(&self) -> MigrationResult<Vec<MigrationKey>> {
        let mut in_degree: BTreeMap<&MigrationKey, usize> = self
            .migrations
            .keys()
            .map(|key| (key, self.parents.get(key).map_or(0, BTreeSet::len)))
            .collect();

        let mut queue: VecDeque<MigrationKey> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(key, _)| (*key).clone())
            .collect();

        let mut result = Vec::with_capacity(self.migrations.len());
        while let Some(node) = queue.pop_front() {
            if let Some(children) = self.children.get(&node) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(child.clone());
                        }
                    }
                }
            }
            result.push(node);
        }

        if result.len() != self.migrations.len() {
            let stuck: Vec<String> = in_degree
                .iter()
                .filter(|(_, &degree)| degree > 0)
                .map(|(key, _)| key_label(key))
                .collect();
            return Err(MigrationError::DependencyCycle(stuck.join(", ")));
        }
        Ok(result)
    }

    /// Validates that the graph has no cycles.
    pub fn validate(&self) -> MigrationResult<()> {
        self.topological_order().map(|_| ())
    }

    /// Returns `target` and everything it depends on, dependencies first.
    pub fn forwards_plan(&self, target: &MigrationKey) -> MigrationResult<Vec<MigrationKey>> {
        self.migration(target)?;
        Ok(post_order(target, &self.parents))
    }

    /// Returns `target` and everything that depends on it, dependents first.
    pub fn backwards_plan(&self, target: &MigrationKey) -> MigrationResult<Vec<MigrationKey>> {
        self.migration(target)?;
        Ok(post_order(target, &self.children))
    }

    /// Returns the leaf nodes of an app: migrations no other migration of the
    /// same app depends on.
    pub fn leaf_nodes(&self, app_label: &str) -> Vec<MigrationKey> {
        self.same_app_nodes(app_label, &self.children)
    }

    /// Returns the root nodes of an app: migrations that depend on no other
    /// migration of the same app.
    pub fn root_nodes(&self, app_label: &str) -> Vec<MigrationKey> {
        self.same_app_nodes(app_label, &self.parents)
    }

    fn same_app_nodes(
        &self,
        app_label: &str,
        edges: &BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
    ) -> Vec<MigrationKey> {
        self.migrations
            .keys()
            .filter(|key| key.0 == app_label)
            .filter(|key| {
                edges
                    .get(*key)
                    .map_or(true, |linked| linked.iter().all(|other| other.0 != app_label))
            })
            .cloned()
            .collect()
    }

    /// Builds the project state produced by the given migrations, replayed in
    /// topological order.
    pub fn make_state(&self, applied: &HashSet<MigrationKey>) -> MigrationResult<ProjectState> {
        let mut state = ProjectState::new();
        for key in self.topological_order()? {
            if applied.contains(&key) {
                self.migration(&key)?.mutate_state(&mut state)?;
            }
        }
        Ok(state)
    }
}

/// Depth-first post-order from `start` along `edges`, visiting neighbours in
/// key order.
fn post_order(
    start: &MigrationKey,
    edges: &BTreeMap<MigrationKey, BTreeSet<MigrationKey>>,
) -> Vec<MigrationKey> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![(start.clone(), false)];
    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            order.push(node);
            continue;
        }
        if !visited.insert(node.clone()) {
            continue;
        }
        stack.push((node.clone(), true));
        if let Some(next) = edges.get(&node) {
            for neighbour in next.iter().rev() {
                if !visited.contains(neighbour) {
                    stack.push((neighbour.clone(), false));
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{RecordingConnection, SqliteConnection};
    use crate::operations::test_support::char_field;
    use crate::operations::{AddField, CreateModel, RunSql};
    use crate::schema_editor::Dialect;
    use crate::state::{FieldKind, FieldSpec, OnDelete};

    fn key(app: &str, name: &str) -> MigrationKey {
        (app.to_string(), name.to_string())
    }

    fn create_book() -> Migration {
        Migration::new("library", "0001_initial")
            .initial()
            .add_operation(Box::new(CreateModel::new(
                "Book",
                vec![("id", FieldSpec::auto()), ("title", char_field(200))],
            )))
    }

    fn add_isbn() -> Migration {
        Migration::new("library", "0002_isbn")
            .depends_on("library", "0001_initial")
            .add_operation(Box::new(AddField::new("Book", "isbn", char_field(13).nullable())))
    }

    // ── Migration tests ─────────────────────────────────────────────

    #[test]
    fn test_migration_new() {
        let m = Migration::new("blog", "0001_initial");
        assert_eq!(m.app_label, "blog");
        assert_eq!(m.name, "0001_initial");
        assert!(!m.initial);
        assert!(m.atomic);
        assert!(m.dependencies.is_empty());
        assert!(m.operations.is_empty());
    }

    #[test]
    fn test_migration_builders() {
        let m = Migration::new("blog", "0002_add_author")
            .depends_on("blog", "0001_initial")
            .depends_on("auth", "0001_initial")
            .run_before("shop", "0001_initial")
            .non_atomic();
        assert_eq!(m.dependencies.len(), 2);
        assert_eq!(m.run_before, vec![key("shop", "0001_initial")]);
        assert!(!m.atomic);
        assert_eq!(m.key(), key("blog", "0002_add_author"));
        assert_eq!(m.label(), "blog.0002_add_author");
    }

    #[test]
    fn test_mutate_state() {
        let mut state = ProjectState::new();
        create_book().mutate_state(&mut state).unwrap();
        let book = state.get_model("library", "Book").unwrap();
        assert_eq!(book.fields.len(), 2);
    }

    #[test]
    fn test_mutate_state_wraps_failure() {
        let mut state = ProjectState::new();
        let err = add_isbn().mutate_state(&mut state).unwrap_err();
        match &err {
            MigrationError::OperationFailed {
                migration, index, ..
            } => {
                assert_eq!(migration, "library.0002_isbn");
                assert_eq!(*index, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_invalid_state_transition());
    }

    #[test]
    fn test_mutate_state_rejects_dangling_reference() {
        let m = Migration::new("shop", "0001_initial").add_operation(Box::new(CreateModel::new(
            "Order",
            vec![
                ("id", FieldSpec::auto()),
                (
                    "book",
                    FieldSpec::new(FieldKind::ForeignKey {
                        to: "library.Book".into(),
                        on_delete: OnDelete::Cascade,
                    }),
                ),
            ],
        )));
        let err = m.mutate_state(&mut ProjectState::new()).unwrap_err();
        assert!(err.is_invalid_state_transition());
        assert!(err.to_string().contains("shop.0001_initial"));
    }

    #[test]
    fn test_apply_and_unapply_sqlite() {
        let mut conn = SqliteConnection::memory().unwrap();
        let migration = create_book();

        let mut editor = DatabaseSchemaEditor::begin(&mut conn, true).unwrap();
        let state = migration
            .apply(ProjectState::new(), &mut editor, &mut ())
            .unwrap();
        editor.finish().unwrap();
        assert!(conn.table_exists("library_book").unwrap());
        assert!(state.contains_model("library", "Book"));

        let mut editor = DatabaseSchemaEditor::begin(&mut conn, true).unwrap();
        let state = migration
            .unapply(ProjectState::new(), &mut editor, &mut ())
            .unwrap();
        editor.finish().unwrap();
        assert!(!conn.table_exists("library_book").unwrap());
        assert!(state.is_empty());
    }

    #[test]
    fn test_apply_failure_names_operation() {
        let mut conn = RecordingConnection::new(Dialect::Postgres).fail_on("CREATE TABLE");
        let mut editor = DatabaseSchemaEditor::begin(&mut conn, true).unwrap();
        let err = create_book()
            .apply(ProjectState::new(), &mut editor, &mut ())
            .unwrap_err();
        assert!(err.is_database_transition());
        match err {
            MigrationError::OperationFailed { operation, .. } => {
                assert!(operation.contains("Book"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unapply_checks_reversibility_first() {
        let migration = create_book().add_operation(Box::new(RunSql::new(
            "INSERT INTO library_book (title) VALUES ('x')",
        )));
        let mut state = ProjectState::new();
        let before = state.clone();
        migration.mutate_state(&mut state).unwrap();

        let mut conn = RecordingConnection::new(Dialect::Postgres).without_transactional_ddl();
        let mut editor = DatabaseSchemaEditor::begin(&mut conn, true).unwrap();
        let err = migration
            .unapply(before, &mut editor, &mut ())
            .unwrap_err();
        assert!(err.is_irreversible());
        assert!(editor.executed_sql().is_empty());
        drop(editor);
        assert!(conn.executed().is_empty());
    }

    #[test]
    fn test_check_reversible() {
        let state = ProjectState::new();
        assert!(create_book().check_reversible(&state).is_ok());
        let irreversible = create_book().add_operation(Box::new(RunSql::new("SELECT 1")));
        let err = irreversible.check_reversible(&state).unwrap_err();
        assert!(err.is_irreversible());
    }

    #[test]
    fn test_observer_stops_before_operation() {
        struct StopAt(usize);
        impl ApplyObserver for StopAt {
            fn before_operation(
                &mut self,
                migration: &Migration,
                completed: usize,
                operation: &dyn Operation,
            ) -> MigrationResult<()> {
                if completed == self.0 {
                    return Err(MigrationError::Cancelled {
                        migration: migration.label(),
                        operation: operation.describe(),
                        completed,
                    });
                }
                Ok(())
            }
        }

        let migration = create_book().add_operation(Box::new(RunSql::new("SELECT 1")));
        let mut editor = DatabaseSchemaEditor::collecting(Dialect::Sqlite);
        let err = migration
            .apply(ProjectState::new(), &mut editor, &mut StopAt(1))
            .unwrap_err();
        match err {
            MigrationError::Cancelled {
                completed, operation, ..
            } => {
                assert_eq!(completed, 1);
                assert_eq!(operation, "Raw SQL operation");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(editor.executed_sql().iter().any(|s| s.starts_with("CREATE TABLE")));
        assert!(!editor.executed_sql().iter().any(|s| s == "SELECT 1"));
    }

    // ── MigrationGraph tests ────────────────────────────────────────

    #[test]
    fn test_graph_new() {
        let g = MigrationGraph::new();
        assert!(g.is_empty());
        assert_eq!(g.len(), 0);
    }

    #[test]
    fn test_graph_build() {
        let g = MigrationGraph::build(vec![add_isbn(), create_book()]).unwrap();
        assert_eq!(g.len(), 2);
        assert!(g.contains(&key("library", "0001_initial")));
        assert_eq!(
            g.dependencies(&key("library", "0002_isbn")),
            vec![key("library", "0001_initial")]
        );
        assert_eq!(
            g.dependents(&key("library", "0001_initial")),
            vec![key("library", "0002_isbn")]
        );
    }

    #[test]
    fn test_graph_missing_dependency() {
        let err = MigrationGraph::build(vec![add_isbn()]).unwrap_err();
        match err {
            MigrationError::NodeNotFound {
                node,
                referenced_by,
            } => {
                assert_eq!(node, "library.0001_initial");
                assert_eq!(referenced_by, "library.0002_isbn");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_graph_duplicate_migration() {
        let err = MigrationGraph::build(vec![create_book(), create_book()]).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidPlan(_)));
    }

    #[test]
    fn test_graph_cycle() {
        let err = MigrationGraph::build(vec![
            Migration::new("a", "0001").depends_on("b", "0001"),
            Migration::new("b", "0001").depends_on("a", "0001"),
        ])
        .unwrap_err();
        assert!(err.is_dependency_cycle());
        assert!(err.to_string().contains("a.0001"));
    }

    #[test]
    fn test_graph_run_before() {
        let g = MigrationGraph::build(vec![
            Migration::new("a", "0001"),
            Migration::new("b", "0001").run_before("a", "0001"),
        ])
        .unwrap();
        assert_eq!(
            g.topological_order().unwrap(),
            vec![key("b", "0001"), key("a", "0001")]
        );
    }

    #[test]
    fn test_graph_topological_order_is_deterministic() {
        let g = MigrationGraph::build(vec![
            Migration::new("shop", "0001"),
            Migration::new("blog", "0002").depends_on("blog", "0001"),
            Migration::new("blog", "0001"),
        ])
        .unwrap();
        assert_eq!(
            g.topological_order().unwrap(),
            vec![key("blog", "0001"), key("shop", "0001"), key("blog", "0002")]
        );
    }

    #[test]
    fn test_graph_forwards_and_backwards_plans() {
        let g = MigrationGraph::build(vec![
            Migration::new("auth", "0001"),
            Migration::new("blog", "0001").depends_on("auth", "0001"),
            Migration::new("blog", "0002").depends_on("blog", "0001"),
        ])
        .unwrap();
        assert_eq!(
            g.forwards_plan(&key("blog", "0002")).unwrap(),
            vec![key("auth", "0001"), key("blog", "0001"), key("blog", "0002")]
        );
        assert_eq!(
            g.backwards_plan(&key("auth", "0001")).unwrap(),
            vec![key("blog", "0002"), key("blog", "0001"), key("auth", "0001")]
        );
        assert!(g.forwards_plan(&key("blog", "0009")).is_err());
    }

    #[test]
    fn test_graph_leaf_and_root_nodes() {
        let g = MigrationGraph::build(vec![
            Migration::new("auth", "0001"),
            Migration::new("blog", "0001").depends_on("auth", "0001"),
            Migration::new("blog", "0002").depends_on("blog", "0001"),
        ])
        .unwrap();
        assert_eq!(g.root_nodes("blog"), vec![key("blog", "0001")]);
        assert_eq!(g.leaf_nodes("blog"), vec![key("blog", "0002")]);
        assert_eq!(g.leaf_nodes("auth"), vec![key("auth", "0001")]);
        assert_eq!(g.app_labels(), vec!["auth".to_string(), "blog".to_string()]);
    }

    #[test]
    fn test_graph_make_state() {
        let g = MigrationGraph::build(vec![create_book(), add_isbn()]).unwrap();
        let applied: HashSet<MigrationKey> = [key("library", "0001_initial")].into_iter().collect();
        let state = g.make_state(&applied).unwrap();
        assert!(!state.get_model("library", "Book").unwrap().has_field("isbn"));

        let all: HashSet<MigrationKey> = g.node_keys().into_iter().collect();
        let state = g.make_state(&all).unwrap();
        assert!(state.get_model("library", "Book").unwrap().has_field("isbn"));
    }
}
