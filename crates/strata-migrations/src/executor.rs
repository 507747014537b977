//! Migration execution engine.
//!
//! The [`MigrationExecutor`] computes a [`MigrationPlan`] from the graph and
//! the set of applied migrations, then applies or reverts the migrations in
//! order. Each migration runs through one [`DatabaseSchemaEditor`], which owns
//! the migration's transaction when it is atomic. The [`MigrationRecorder`]
//! tracks which migrations have been applied, in memory and in the recorder
//! table; its writes go through the same editor, so they commit or roll back
//! together with the schema change.
//!
//! A run can be cancelled through a [`CancelHandle`]. Cancellation takes
//! effect between two operations: the current migration's transaction is
//! rolled back and the migration is not recorded.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use strata_core::logging::migration_span;
use strata_core::{MigrationError, MigrationResult, MigrationSettings};

use crate::connection::Connection;
use crate::migration::{key_label, ApplyObserver, Migration, MigrationGraph, MigrationKey};
use crate::operations::Operation;
use crate::schema_editor::{DatabaseSchemaEditor, Dialect, SchemaEditor};
use crate::state::{ProjectState, Value};

// ── Plan ─────────────────────────────────────────────────────────────────

/// Where an app should be migrated to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MigrationTarget {
    pub app_label: String,
    /// The migration to stop at, or `None` to unapply every migration of
    /// the app.
    pub name: Option<String>,
}

impl MigrationTarget {
    /// Migrates `app_label` up or down to the named migration.
    pub fn to(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            name: Some(name.into()),
        }
    }

    /// Unapplies every migration of `app_label`.
    pub fn zero(app_label: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            name: None,
        }
    }
}

/// A single step in a migration plan.
///
/// Each step references a migration by its `(app_label, name)` key and
/// indicates whether the migration should be applied or reversed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    /// The migration key: `(app_label, migration_name)`.
    pub migration: MigrationKey,
    /// If `true`, this step reverses the migration.
    pub backwards: bool,
}

impl MigrationStep {
    /// Creates a forward migration step.
    pub fn forward(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            migration: (app_label.into(), name.into()),
            backwards: false,
        }
    }

    /// Creates a backward (reverse) migration step.
    pub fn backward(app_label: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            migration: (app_label.into(), name.into()),
            backwards: true,
        }
    }
}

/// A plan describing which migrations to apply or reverse.
///
/// The plan is an ordered list of [`MigrationStep`]s that should be executed
/// sequentially.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationPlan {
    /// The ordered steps to execute.
    pub steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    /// Creates a new empty migration plan.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Adds a step to the plan.
    pub fn add_step(&mut self, step: MigrationStep) {
        self.steps.push(step);
    }

    /// Returns whether the plan is empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns whether every step runs backwards.
    ///
    /// Plans mixing both directions are rejected with
    /// [`MigrationError::InvalidPlan`]. An empty plan counts as forwards.
    pub fn is_backwards(&self) -> MigrationResult<bool> {
        let backwards = self.steps.iter().filter(|step| step.backwards).count();
        if backwards == 0 {
            Ok(false)
        } else if backwards == self.steps.len() {
            Ok(true)
        } else {
            Err(MigrationError::InvalidPlan(
                "Migration plans with both forwards and backwards migrations are not supported"
                    .to_string(),
            ))
        }
    }
}

// ── Recorder ─────────────────────────────────────────────────────────────

/// Tracks which migrations have been applied.
///
/// The in-memory set is the source of truth for plan building; the recorder
/// table provides persistence across runs.
#[derive(Debug, Clone)]
pub struct MigrationRecorder {
    table: String,
    applied_migrations: HashSet<MigrationKey>,
}

impl Default for MigrationRecorder {
    fn default() -> Self {
        Self::new(MigrationSettings::default().recorder_table)
    }
}

impl MigrationRecorder {
    /// Creates a recorder backed by `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            applied_migrations: HashSet::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the DDL creating the recorder table.
    pub fn ensure_schema_sql(&self, dialect: Dialect) -> String {
        let (id, applied) = match dialect {
            Dialect::Sqlite => ("integer NOT NULL PRIMARY KEY AUTOINCREMENT", "datetime"),
            Dialect::Postgres => ("bigserial NOT NULL PRIMARY KEY", "timestamp with time zone"),
        };
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\"id\" {id}, \"app\" varchar(255) NOT NULL, \
             \"name\" varchar(255) NOT NULL, \"applied\" {applied} NOT NULL)",
            dialect.quote_name(&self.table)
        )
    }

    /// Creates the recorder table if it does not exist.
    pub fn ensure_schema(&self, connection: &mut dyn Connection) -> MigrationResult<()> {
        let sql = self.ensure_schema_sql(connection.dialect());
        connection.execute(&sql)
    }

    /// Replaces the in-memory set with the rows of the recorder table.
    pub fn load(&mut self, connection: &mut dyn Connection) -> MigrationResult<()> {
        let quote = |name: &str| connection.dialect().quote_name(name);
        let sql = format!(
            "SELECT {}, {} FROM {}",
            quote("app"),
            quote("name"),
            quote(&self.table)
        );
        let rows = connection.query(&sql)?;

        self.applied_migrations.clear();
        for row in rows {
            let mut columns = row.into_iter();
            match (columns.next(), columns.next()) {
                (Some(app), Some(name)) => {
                    self.applied_migrations.insert((app, name));
                }
                _ => {
                    return Err(MigrationError::database_message(format!(
                        "Malformed row in {}",
                        self.table
                    )))
                }
            }
        }
        Ok(())
    }

    /// Writes the "applied" row through `editor`.
    pub fn record_applied(
        &self,
        editor: &mut dyn SchemaEditor,
        key: &MigrationKey,
    ) -> MigrationResult<()> {
        let dialect = editor.dialect();
        let now = chrono::Utc::now()
            .format("%Y-%m-%d %H:%M:%S%.6f")
            .to_string();
        let sql = format!(
            "INSERT INTO {} ({}, {}, {}) VALUES ({}, {}, {})",
            dialect.quote_name(&self.table),
            dialect.quote_name("app"),
            dialect.quote_name("name"),
            dialect.quote_name("applied"),
            Value::from(key.0.as_str()).to_sql_literal(),
            Value::from(key.1.as_str()).to_sql_literal(),
            Value::from(now).to_sql_literal(),
        );
        editor.execute(&sql)
    }

    /// Deletes the "applied" row through `editor`.
    pub fn record_unapplied(
        &self,
        editor: &mut dyn SchemaEditor,
        key: &MigrationKey,
    ) -> MigrationResult<()> {
        let dialect = editor.dialect();
        let sql = format!(
            "DELETE FROM {} WHERE {} = {} AND {} = {}",
            dialect.quote_name(&self.table),
            dialect.quote_name("app"),
            Value::from(key.0.as_str()).to_sql_literal(),
            dialect.quote_name("name"),
            Value::from(key.1.as_str()).to_sql_literal(),
        );
        editor.execute(&sql)
    }

    /// Records a migration as applied (in-memory only).
    pub fn apply(&mut self, key: MigrationKey) {
        self.applied_migrations.insert(key);
    }

    /// Records a migration as unapplied (in-memory only).
    pub fn unapply(&mut self, key: &MigrationKey) {
        self.applied_migrations.remove(key);
    }

    /// Returns the set of applied migrations.
    pub fn applied(&self) -> &HashSet<MigrationKey> {
        &self.applied_migrations
    }

    /// Returns whether a specific migration has been applied.
    pub fn is_applied(&self, key: &MigrationKey) -> bool {
        self.applied_migrations.contains(key)
    }
}

// ── Cancellation and progress ────────────────────────────────────────────

/// A shareable flag that stops a running migration between operations.
///
/// # Examples
///
/// ```
/// use strata_migrations::executor::CancelHandle;
///
/// let handle = CancelHandle::new();
/// let remote = handle.clone();
/// remote.cancel();
/// assert!(handle.is_cancelled());
/// handle.reset();
/// assert!(!remote.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clears a previous cancellation request.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Progress events reported while the executor runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    ApplyStart(MigrationKey),
    ApplySuccess { migration: MigrationKey, fake: bool },
    UnapplyStart(MigrationKey),
    UnapplySuccess { migration: MigrationKey, fake: bool },
    /// An operation is about to run. `index` counts the operations already
    /// completed in the current pass.
    Operation {
        migration: MigrationKey,
        index: usize,
        description: String,
    },
}

type ProgressCallback<'c> = Box<dyn FnMut(&Progress) + 'c>;

fn emit(progress: &mut Option<ProgressCallback<'_>>, event: Progress) {
    if let Some(callback) = progress.as_mut() {
        callback(&event);
    }
}

/// Checks for cancellation and reports each operation.
struct RunObserver<'a, 'c> {
    cancel: &'a CancelHandle,
    progress: &'a mut Option<ProgressCallback<'c>>,
}

impl ApplyObserver for RunObserver<'_, '_> {
    fn before_operation(
        &mut self,
        migration: &Migration,
        completed: usize,
        operation: &dyn Operation,
    ) -> MigrationResult<()> {
        let description = operation.describe();
        if self.cancel.is_cancelled() {
            return Err(MigrationError::Cancelled {
                migration: migration.label(),
                operation: description,
                completed,
            });
        }
        tracing::info!(operation = %description, "Running operation");
        emit(
            self.progress,
            Progress::Operation {
                migration: migration.key(),
                index: completed,
                description,
            },
        );
        Ok(())
    }
}

/// Rolls back `editor` and turns a failure or cancellation of a
/// non-transactional migration that already changed the database into
/// [`MigrationError::PartiallyApplied`].
fn abort(editor: DatabaseSchemaEditor<'_>, err: MigrationError) -> MigrationError {
    let partial = !editor.is_atomic() && !editor.executed_sql().is_empty();
    let err = match err {
        MigrationError::OperationFailed {
            migration,
            operation,
            index,
            source,
        } if partial => MigrationError::PartiallyApplied {
            migration,
            operation,
            completed: index,
            source,
        },
        MigrationError::Cancelled {
            migration,
            operation,
            completed,
        } if partial => MigrationError::PartiallyApplied {
            migration: migration.clone(),
            operation: operation.clone(),
            completed,
            source: Box::new(MigrationError::Cancelled {
                migration,
                operation,
                completed,
            }),
        },
        other => other,
    };
    if let Err(rollback_err) = editor.rollback() {
        tracing::warn!(error = %rollback_err, "Rollback failed");
    }
    tracing::error!(error = %err, "Migration failed");
    err
}

// ── Executor ─────────────────────────────────────────────────────────────

/// Plans and runs migrations against one connection.
///
/// # Examples
///
/// ```
/// use strata_migrations::connection::SqliteConnection;
/// use strata_migrations::executor::{MigrationExecutor, MigrationTarget};
/// use strata_migrations::migration::{Migration, MigrationGraph};
/// use strata_migrations::operations::CreateModel;
/// use strata_migrations::state::{FieldKind, FieldSpec};
///
/// let graph = MigrationGraph::build(vec![Migration::new("library", "0001_initial")
///     .add_operation(Box::new(CreateModel::new(
///         "Book",
///         vec![
///             ("id", FieldSpec::auto()),
///             ("title", FieldSpec::new(FieldKind::CharField { max_length: 200 })),
///         ],
///     )))])
/// .unwrap();
///
/// let mut conn = SqliteConnection::memory().unwrap();
/// let mut executor = MigrationExecutor::new(&mut conn, graph);
/// let state = executor
///     .migrate(&[MigrationTarget::to("library", "0001_initial")], false)
///     .unwrap();
/// assert!(state.contains_model("library", "Book"));
/// ```
pub struct MigrationExecutor<'c> {
    connection: &'c mut dyn Connection,
    graph: MigrationGraph,
    recorder: MigrationRecorder,
    atomic: bool,
    loaded: bool,
    progress: Option<ProgressCallback<'c>>,
    cancel: CancelHandle,
}

impl<'c> MigrationExecutor<'c> {
    /// Creates an executor with default migration settings.
    pub fn new(connection: &'c mut dyn Connection, graph: MigrationGraph) -> Self {
        Self {
            connection,
            graph,
            recorder: MigrationRecorder::default(),
            atomic: true,
            loaded: false,
            progress: None,
            cancel: CancelHandle::new(),
        }
    }

    /// Applies the atomic default and the recorder table from `settings`.
    pub fn with_settings(mut self, settings: &MigrationSettings) -> Self {
        self.atomic = settings.atomic;
        self.recorder = MigrationRecorder::new(settings.recorder_table.clone());
        self.loaded = false;
        self
    }

    /// Registers a callback receiving [`Progress`] events.
    pub fn on_progress(mut self, callback: impl FnMut(&Progress) + 'c) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Returns a handle that cancels the run from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn graph(&self) -> &MigrationGraph {
        &self.graph
    }

    /// Returns a reference to the recorder.
    pub fn recorder(&self) -> &MigrationRecorder {
        &self.recorder
    }

    /// Returns a mutable reference to the recorder.
    pub fn recorder_mut(&mut self) -> &mut MigrationRecorder {
        &mut self.recorder
    }

    /// Creates the recorder table if needed and loads the applied set.
    pub fn load_applied(&mut self) -> MigrationResult<()> {
        self.recorder.ensure_schema(&mut *self.connection)?;
        self.recorder.load(&mut *self.connection)?;
        self.loaded = true;
        Ok(())
    }

    fn ensure_loaded(&mut self) -> MigrationResult<()> {
        if self.loaded {
            Ok(())
        } else {
            self.load_applied()
        }
    }

    /// The project state produced by the applied migrations.
    pub fn applied_state(&self) -> MigrationResult<ProjectState> {
        self.graph.make_state(self.recorder.applied())
    }

    /// Targets that bring every app to its latest migrations.
    pub fn leaf_targets(&self) -> Vec<MigrationTarget> {
        self.graph
            .app_labels()
            .iter()
            .flat_map(|app| self.graph.leaf_nodes(app))
            .map(|(app, name)| MigrationTarget::to(app, name))
            .collect()
    }

    /// Computes the steps needed to reach `targets` from the applied set.
    ///
    /// Migrating to an applied migration unapplies its dependents within the
    /// same app and nothing further; migrating to an unapplied one applies
    /// it and everything it depends on.
    pub fn migration_plan(&self, targets: &[MigrationTarget]) -> MigrationResult<MigrationPlan> {
        let mut plan = MigrationPlan::new();
        let mut applied = self.recorder.applied().clone();

        for target in targets {
            let Some(name) = &target.name else {
                for root in self.graph.root_nodes(&target.app_label) {
                    for key in self.graph.backwards_plan(&root)? {
                        if applied.remove(&key) {
                            plan.add_step(MigrationStep::backward(key.0, key.1));
                        }
                    }
                }
                continue;
            };

            let target_key = (target.app_label.clone(), name.clone());
            self.graph.migration(&target_key)?;
            if applied.contains(&target_key) {
                let next_in_app: Vec<MigrationKey> = self
                    .graph
                    .dependents(&target_key)
                    .into_iter()
                    .filter(|key| key.0 == target.app_label)
                    .collect();
                for node in next_in_app {
                    for key in self.graph.backwards_plan(&node)? {
                        if applied.remove(&key) {
                            plan.add_step(MigrationStep::backward(key.0, key.1));
                        }
                    }
                }
            } else {
                for key in self.graph.forwards_plan(&target_key)? {
                    if applied.insert(key.clone()) {
                        plan.add_step(MigrationStep::forward(key.0, key.1));
                    }
                }
            }
        }
        Ok(plan)
    }

    /// Migrates to `targets` and returns the resulting project state.
    ///
    /// With `fake`, migrations are recorded (or unrecorded) without touching
    /// the schema.
    pub fn migrate(
        &mut self,
        targets: &[MigrationTarget],
        fake: bool,
    ) -> MigrationResult<ProjectState> {
        self.ensure_loaded()?;
        let plan = self.migration_plan(targets)?;
        self.run_plan(&plan, fake)
    }

    /// Runs a plan that is entirely forwards or entirely backwards.
    ///
    /// Before a backward plan touches the database, every operation of
    /// every migration in it is checked for reversibility.
    pub fn run_plan(&mut self, plan: &MigrationPlan, fake: bool) -> MigrationResult<ProjectState> {
        self.ensure_loaded()?;
        let backwards = plan.is_backwards()?;
        tracing::info!(steps = plan.len(), backwards, fake, "Running migration plan");

        if !backwards {
            let mut state = self.applied_state()?;
            for step in &plan.steps {
                state = self.apply_migration(state, &step.migration, fake)?;
            }
            return Ok(state);
        }

        let states = self.backward_states(plan)?;
        if !fake {
            for step in &plan.steps {
                let before = state_for(&states, &step.migration)?;
                self.graph.migration(&step.migration)?.check_reversible(before)?;
            }
        }
        for step in &plan.steps {
            let before = state_for(&states, &step.migration)?.clone();
            self.unapply_migration(before, &step.migration, fake)?;
        }
        self.applied_state()
    }

    /// The project state before each migration of a backward plan, built
    /// by replaying the applied migrations in topological order.
    fn backward_states(
        &self,
        plan: &MigrationPlan,
    ) -> MigrationResult<HashMap<MigrationKey, ProjectState>> {
        let wanted: HashSet<&MigrationKey> =
            plan.steps.iter().map(|step| &step.migration).collect();
        let mut states = HashMap::with_capacity(wanted.len());
        let mut state = ProjectState::new();
        for key in self.graph.topological_order()? {
            if states.len() == wanted.len() {
                break;
            }
            if self.recorder.is_applied(&key) {
                if wanted.contains(&key) {
                    states.insert(key.clone(), state.clone());
                }
                self.graph.migration(&key)?.mutate_state(&mut state)?;
            }
        }
        Ok(states)
    }

    /// Applies one migration on top of `state` and records it.
    pub fn apply_migration(
        &mut self,
        state: ProjectState,
        key: &MigrationKey,
        fake: bool,
    ) -> MigrationResult<ProjectState> {
        let Self {
            connection,
            graph,
            recorder,
            atomic,
            progress,
            cancel,
            ..
        } = self;
        let migration = graph.migration(key)?;
        let span = migration_span(&migration.app_label, &migration.name, "forwards");
        let _enter = span.enter();
        emit(progress, Progress::ApplyStart(key.clone()));

        let mut editor =
            DatabaseSchemaEditor::begin(&mut **connection, *atomic && migration.atomic)?;
        let state = if fake {
            let mut state = state;
            migration.mutate_state(&mut state)?;
            state
        } else {
            let mut observer = RunObserver {
                cancel: &*cancel,
                progress: &mut *progress,
            };
            match migration.apply(state, &mut editor, &mut observer) {
                Ok(state) => state,
                Err(err) => return Err(abort(editor, err)),
            }
        };
        if let Err(err) = recorder.record_applied(&mut editor, key) {
            return Err(abort(editor, err));
        }
        editor.finish()?;
        recorder.apply(key.clone());

        tracing::info!(fake, "Applied migration");
        emit(
            progress,
            Progress::ApplySuccess {
                migration: key.clone(),
                fake,
            },
        );
        Ok(state)
    }

    /// Reverses one migration. `state` is the project state before the
    /// migration was applied.
    pub fn unapply_migration(
        &mut self,
        state: ProjectState,
        key: &MigrationKey,
        fake: bool,
    ) -> MigrationResult<ProjectState> {
        let Self {
            connection,
            graph,
            recorder,
            atomic,
            progress,
            cancel,
            ..
        } = self;
        let migration = graph.migration(key)?;
        let span = migration_span(&migration.app_label, &migration.name, "backwards");
        let _enter = span.enter();
        emit(progress, Progress::UnapplyStart(key.clone()));

        let mut editor =
            DatabaseSchemaEditor::begin(&mut **connection, *atomic && migration.atomic)?;
        let state = if fake {
            state
        } else {
            let mut observer = RunObserver {
                cancel: &*cancel,
                progress: &mut *progress,
            };
            match migration.unapply(state, &mut editor, &mut observer) {
                Ok(state) => state,
                Err(err) => return Err(abort(editor, err)),
            }
        };
        if let Err(err) = recorder.record_unapplied(&mut editor, key) {
            return Err(abort(editor, err));
        }
        editor.finish()?;
        recorder.unapply(key);

        tracing::info!(fake, "Unapplied migration");
        emit(
            progress,
            Progress::UnapplySuccess {
                migration: key.clone(),
                fake,
            },
        );
        Ok(state)
    }

    /// Renders the SQL a plan would run, without touching the database.
    ///
    /// Each statement ends with `;`. Atomic migrations are wrapped in
    /// `BEGIN;`/`COMMIT;` when the connection supports transactional DDL.
    /// Operations that cannot be written as SQL appear as comments.
    pub fn collect_sql(&self, plan: &MigrationPlan) -> MigrationResult<Vec<String>> {
        let dialect = self.connection.dialect();
        let transactional = self.atomic && self.connection.supports_transactional_ddl();
        let backwards = plan.is_backwards()?;
        let states = if backwards {
            self.backward_states(plan)?
        } else {
            HashMap::new()
        };

        let mut statements = Vec::new();
        let mut state = if backwards {
            ProjectState::new()
        } else {
            self.applied_state()?
        };
        for step in &plan.steps {
            let migration = self.graph.migration(&step.migration)?;
            let mut editor = DatabaseSchemaEditor::collecting(dialect);
            if step.backwards {
                let before = state_for(&states, &step.migration)?.clone();
                migration.unapply(before, &mut editor, &mut ())?;
                statements.push(format!("-- Unapply {}", migration.label()));
            } else {
                state = migration.apply(state, &mut editor, &mut ())?;
                statements.push(format!("-- Apply {}", migration.label()));
            }

            let atomic = transactional && migration.atomic;
            if atomic {
                statements.push("BEGIN;".to_string());
            }
            statements.extend(editor.take_sql().into_iter().map(|sql| {
                if sql.starts_with("--") {
                    sql
                } else {
                    format!("{sql};")
                }
            }));
            if atomic {
                statements.push("COMMIT;".to_string());
            }
        }
        Ok(statements)
    }
}

fn state_for<'s>(
    states: &'s HashMap<MigrationKey, ProjectState>,
    key: &MigrationKey,
) -> MigrationResult<&'s ProjectState> {
    states.get(key).ok_or_else(|| {
        MigrationError::InvalidPlan(format!(
            "Cannot unapply {}: it is not applied",
            key_label(key)
        ))
    })
}
