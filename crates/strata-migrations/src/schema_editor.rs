//! Schema editors: the database track of a migration.
//!
//! The [`SchemaEditor`] trait is the vocabulary operations use to change the
//! database. Every method receives [`HistoricalModel`]s rendered from a
//! project state, so DDL is always generated from the schema as it existed
//! at that point in history.
//!
//! [`DatabaseSchemaEditor`] implements the trait for `SQLite` and PostgreSQL
//! over a [`Connection`]. It owns the migration's transaction when the
//! migration is atomic, and can instead collect SQL without executing it.
//!
//! `SQLite` cannot alter columns in place. Alterations and column removals
//! rebuild the table: create `new__<table>`, copy the rows, drop the old
//! table, rename the new one, and recreate its indexes.

use strata_core::{MigrationError, MigrationResult};

use crate::connection::Connection;
use crate::registry::{HistoricalField, HistoricalModel};
use crate::state::{FieldKind, FieldSpec, IndexSpec, StorageClass};

/// Generates and runs DDL for schema changes.
///
/// For field-level methods, `model` is the model as it exists after the
/// change; `delete_model` receives the model being dropped.
pub trait SchemaEditor {
    /// The dialect DDL is generated for.
    fn dialect(&self) -> Dialect;

    /// Runs one raw statement.
    fn execute(&mut self, sql: &str) -> MigrationResult<()>;

    fn create_model(&mut self, model: &HistoricalModel) -> MigrationResult<()>;

    fn delete_model(&mut self, model: &HistoricalModel) -> MigrationResult<()>;

    fn alter_db_table(
        &mut self,
        model: &HistoricalModel,
        old_table: &str,
        new_table: &str,
    ) -> MigrationResult<()>;

    fn alter_unique_together(
        &mut self,
        model: &HistoricalModel,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> MigrationResult<()>;

    fn alter_index_together(
        &mut self,
        model: &HistoricalModel,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> MigrationResult<()>;

    fn add_index(&mut self, model: &HistoricalModel, index: &IndexSpec) -> MigrationResult<()>;

    fn remove_index(&mut self, model: &HistoricalModel, index: &IndexSpec) -> MigrationResult<()>;

    fn add_field(&mut self, model: &HistoricalModel, field: &HistoricalField)
        -> MigrationResult<()>;

    fn remove_field(
        &mut self,
        model: &HistoricalModel,
        field: &HistoricalField,
    ) -> MigrationResult<()>;

    /// Alters a field in place. Fails with
    /// [`MigrationError::UnsupportedAlteration`] before running anything when
    /// the engine has no conversion between the two kinds.
    fn alter_field(
        &mut self,
        model: &HistoricalModel,
        old_field: &HistoricalField,
        new_field: &HistoricalField,
    ) -> MigrationResult<()>;

    fn rename_field(
        &mut self,
        model: &HistoricalModel,
        old_field: &HistoricalField,
        new_field: &HistoricalField,
    ) -> MigrationResult<()>;
}

// ── Dialect ──────────────────────────────────────────────────────────────

/// A supported SQL dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Parses an engine name from settings.
    pub fn from_engine(engine: &str) -> MigrationResult<Self> {
        match engine.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(MigrationError::Configuration(format!(
                "Unknown database engine '{other}'"
            ))),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgresql",
        }
    }

    /// Quotes an identifier.
    pub fn quote_name(self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Returns the column type for a field kind.
    pub fn column_type(self, kind: &FieldKind) -> String {
        match self {
            Self::Postgres => pg_type_sql(kind),
            Self::Sqlite => sqlite_type_sql(kind).to_string(),
        }
    }

    /// Returns `true` if a column of kind `old` can be converted in place to
    /// kind `new`, preserving its data.
    ///
    /// # Examples
    ///
    /// ```
    /// use strata_migrations::schema_editor::Dialect;
    /// use strata_migrations::state::FieldKind;
    ///
    /// assert!(!Dialect::Sqlite.can_convert(&FieldKind::TextField, &FieldKind::IntegerField));
    /// assert!(Dialect::Postgres.can_convert(&FieldKind::TextField, &FieldKind::IntegerField));
    /// assert!(Dialect::Sqlite.can_convert(&FieldKind::IntegerField, &FieldKind::TextField));
    /// ```
    pub fn can_convert(self, old: &FieldKind, new: &FieldKind) -> bool {
        use StorageClass::{Binary, Boolean, Decimal, Integer, Json, Real, Text};

        let (from, to) = (old.storage_class(), new.storage_class());
        if from == to {
            return true;
        }
        match (from, to) {
            (_, Text)
            | (Integer, Real | Decimal | Boolean)
            | (Boolean, Integer)
            | (Real, Decimal)
            | (Decimal, Real)
            | (Text, Json) => true,
            // PostgreSQL casts through USING; rows that do not parse fail the
            // statement rather than being silently truncated.
            (Text | Json, _) => self == Self::Postgres && to != Binary,
            _ => false,
        }
    }
}

/// Returns the PostgreSQL type name for a field kind.
fn pg_type_sql(kind: &FieldKind) -> String {
    match kind {
        FieldKind::AutoField => "SERIAL".to_string(),
        FieldKind::BigAutoField => "BIGSERIAL".to_string(),
        FieldKind::CharField { max_length } => format!("VARCHAR({max_length})"),
        FieldKind::TextField => "TEXT".to_string(),
        FieldKind::IntegerField => "INTEGER".to_string(),
        FieldKind::BigIntegerField => "BIGINT".to_string(),
        FieldKind::SmallIntegerField => "SMALLINT".to_string(),
        FieldKind::FloatField => "DOUBLE PRECISION".to_string(),
        FieldKind::DecimalField {
            max_digits,
            decimal_places,
        } => format!("NUMERIC({max_digits}, {decimal_places})"),
        FieldKind::BooleanField => "BOOLEAN".to_string(),
        FieldKind::DateField => "DATE".to_string(),
        FieldKind::DateTimeField => "TIMESTAMP WITH TIME ZONE".to_string(),
        FieldKind::TimeField => "TIME".to_string(),
        FieldKind::DurationField => "INTERVAL".to_string(),
        FieldKind::UuidField => "UUID".to_string(),
        FieldKind::BinaryField => "BYTEA".to_string(),
        FieldKind::JsonField => "JSONB".to_string(),
        FieldKind::ForeignKey { .. } | FieldKind::OneToOneField { .. } => "BIGINT".to_string(),
    }
}

/// PostgreSQL type used in `ALTER COLUMN ... TYPE`, where serial
/// pseudo-types are not accepted.
fn pg_cast_type(kind: &FieldKind) -> String {
    match kind {
        FieldKind::AutoField => "INTEGER".to_string(),
        FieldKind::BigAutoField => "BIGINT".to_string(),
        other => pg_type_sql(other),
    }
}

/// Returns the `SQLite` type affinity for a field kind.
fn sqlite_type_sql(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::AutoField
        | FieldKind::BigAutoField
        | FieldKind::IntegerField
        | FieldKind::BigIntegerField
        | FieldKind::SmallIntegerField
        | FieldKind::BooleanField
        | FieldKind::ForeignKey { .. }
        | FieldKind::OneToOneField { .. } => "INTEGER",
        FieldKind::CharField { .. }
        | FieldKind::TextField
        | FieldKind::DateField
        | FieldKind::DateTimeField
        | FieldKind::TimeField
        | FieldKind::DurationField
        | FieldKind::UuidField
        | FieldKind::JsonField => "TEXT",
        FieldKind::FloatField => "REAL",
        FieldKind::DecimalField { .. } => "DECIMAL",
        FieldKind::BinaryField => "BLOB",
    }
}

/// Whether two fields differ at most in column name or relation target.
fn same_definition(old: &FieldSpec, new: &FieldSpec) -> bool {
    let related = old.kind.related_model().is_some() && new.kind.related_model().is_some();
    let kinds_match = if related {
        old.kind.name() == new.kind.name() && old.kind.on_delete() == new.kind.on_delete()
    } else {
        old.kind == new.kind
    };
    kinds_match
        && old.null == new.null
        && old.unique == new.unique
        && old.primary_key == new.primary_key
        && old.db_index == new.db_index
        && old.default == new.default
}

fn constraint_name(table: &str, columns: &[String], suffix: &str) -> String {
    format!("{table}_{}_{suffix}", columns.join("_"))
}

// ── Database schema editor ───────────────────────────────────────────────

/// A [`SchemaEditor`] that runs DDL against a [`Connection`], or collects it.
///
/// # Examples
///
/// ```
/// use strata_migrations::connection::SqliteConnection;
/// use strata_migrations::schema_editor::{DatabaseSchemaEditor, SchemaEditor};
///
/// let mut conn = SqliteConnection::memory().unwrap();
/// let mut editor = DatabaseSchemaEditor::begin(&mut conn, true).unwrap();
/// editor.execute("CREATE TABLE t (id INTEGER)").unwrap();
/// editor.finish().unwrap();
/// assert!(conn.table_exists("t").unwrap());
/// ```
pub struct DatabaseSchemaEditor<'c> {
    connection: Option<&'c mut dyn Connection>,
    dialect: Dialect,
    atomic: bool,
    in_transaction: bool,
    executed: Vec<String>,
}

impl<'c> DatabaseSchemaEditor<'c> {
    /// Creates an editor over `connection`.
    ///
    /// A transaction is opened when `atomic` is requested and the connection
    /// supports transactional DDL; otherwise statements run immediately.
    pub fn begin(connection: &'c mut dyn Connection, atomic: bool) -> MigrationResult<Self> {
        let dialect = connection.dialect();
        let atomic = atomic && connection.supports_transactional_ddl();
        if atomic {
            connection.begin()?;
        }
        Ok(Self {
            connection: Some(connection),
            dialect,
            atomic,
            in_transaction: atomic,
            executed: Vec::new(),
        })
    }

    /// Creates an editor that records SQL without touching any database.
    pub fn collecting(dialect: Dialect) -> Self {
        Self {
            connection: None,
            dialect,
            atomic: false,
            in_transaction: false,
            executed: Vec::new(),
        }
    }

    /// Whether this editor's statements run inside one transaction.
    pub const fn is_atomic(&self) -> bool {
        self.atomic
    }

    pub const fn is_collecting(&self) -> bool {
        self.connection.is_none()
    }

    /// Statements executed (or collected) so far.
    pub fn executed_sql(&self) -> &[String] {
        &self.executed
    }

    /// Takes the executed (or collected) statements, leaving the list empty.
    pub fn take_sql(&mut self) -> Vec<String> {
        std::mem::take(&mut self.executed)
    }

    /// Adds a `--` comment line to the collected SQL.
    pub fn push_comment(&mut self, text: &str) {
        if self.is_collecting() {
            self.executed.push(format!("-- {text}"));
        }
    }

    /// Commits the transaction, if one is open.
    pub fn finish(mut self) -> MigrationResult<()> {
        if self.in_transaction {
            if let Some(conn) = self.connection.as_mut() {
                conn.commit()?;
            }
            self.in_transaction = false;
        }
        Ok(())
    }

    /// Rolls the transaction back, if one is open.
    pub fn rollback(mut self) -> MigrationResult<()> {
        if self.in_transaction {
            self.in_transaction = false;
            if let Some(conn) = self.connection.as_mut() {
                conn.rollback()?;
            }
        }
        Ok(())
    }

    fn quote(&self, name: &str) -> String {
        self.dialect.quote_name(name)
    }

    fn quote_columns(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn columns_for(model: &HistoricalModel, fields: &[String]) -> Vec<String> {
        fields.iter().map(|f| model.column_for(f)).collect()
    }

    /// Renders a column definition. Defaults only appear when `with_default`
    /// is set; tables never keep them.
    fn column_sql(&self, field: &HistoricalField, with_unique: bool, with_default: bool) -> String {
        let spec = &field.spec;
        let mut sql = format!(
            "{} {}",
            self.quote(&field.column),
            self.dialect.column_type(&spec.kind)
        );
        if spec.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.dialect == Dialect::Sqlite && spec.kind.is_auto() {
                sql.push_str(" AUTOINCREMENT");
            }
        } else if spec.null {
            sql.push_str(" NULL");
        } else {
            sql.push_str(" NOT NULL");
        }
        if spec.unique && !spec.primary_key && with_unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = spec.default.as_ref().filter(|_| with_default) {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql_literal());
        }
        if let Some(target) = &field.target {
            sql.push_str(&format!(
                " REFERENCES {} ({})",
                self.quote(&target.table),
                self.quote(&target.column)
            ));
            if let Some(action) = spec.kind.on_delete() {
                sql.push_str(" ON DELETE ");
                sql.push_str(action.as_sql());
            }
            if self.dialect == Dialect::Postgres {
                sql.push_str(" DEFERRABLE INITIALLY DEFERRED");
            }
        }
        sql
    }

    /// Creates the indexes and constraints that live outside `CREATE TABLE`.
    fn create_model_indexes(&mut self, model: &HistoricalModel) -> MigrationResult<()> {
        for field in &model.fields {
            if field.spec.db_index && !field.spec.unique && !field.spec.primary_key {
                self.create_field_index(model, field)?;
            }
        }
        for group in &model.options.unique_together {
            self.create_unique_together(model, group)?;
        }
        for group in &model.options.index_together {
            self.create_index_together(model, group)?;
        }
        for index in &model.options.indexes {
            self.add_index(model, index)?;
        }
        Ok(())
    }

    fn create_field_index(
        &mut self,
        model: &HistoricalModel,
        field: &HistoricalField,
    ) -> MigrationResult<()> {
        let columns = vec![field.column.clone()];
        let sql = format!(
            "CREATE INDEX {} ON {} ({})",
            self.quote(&constraint_name(&model.db_table, &columns, "idx")),
            self.quote(&model.db_table),
            self.quote_columns(&columns)
        );
        self.execute(&sql)
    }

    fn drop_field_index(&mut self, field: &HistoricalField) -> MigrationResult<()> {
        let name = constraint_name(&field.table, &[field.column.clone()], "idx");
        let sql = format!("DROP INDEX IF EXISTS {}", self.quote(&name));
        self.execute(&sql)
    }

    fn create_unique_together(
        &mut self,
        model: &HistoricalModel,
        group: &[String],
    ) -> MigrationResult<()> {
        let columns = Self::columns_for(model, group);
        let name = self.quote(&constraint_name(&model.db_table, &columns, "uniq"));
        let table = self.quote(&model.db_table);
        let cols = self.quote_columns(&columns);
        let sql = match self.dialect {
            Dialect::Sqlite => format!("CREATE UNIQUE INDEX {name} ON {table} ({cols})"),
            Dialect::Postgres => {
                format!("ALTER TABLE {table} ADD CONSTRAINT {name} UNIQUE ({cols})")
            }
        };
        self.execute(&sql)
    }

    fn drop_unique_together(
        &mut self,
        model: &HistoricalModel,
        group: &[String],
    ) -> MigrationResult<()> {
        let columns = Self::columns_for(model, group);
        let name = self.quote(&constraint_name(&model.db_table, &columns, "uniq"));
        let sql = match self.dialect {
            Dialect::Sqlite => format!("DROP INDEX {name}"),
            Dialect::Postgres => format!(
                "ALTER TABLE {} DROP CONSTRAINT {name}",
                self.quote(&model.db_table)
            ),
        };
        self.execute(&sql)
    }

    fn create_index_together(
        &mut self,
        model: &HistoricalModel,
        group: &[String],
    ) -> MigrationResult<()> {
        let columns = Self::columns_for(model, group);
        let sql = format!(
            "CREATE INDEX {} ON {} ({})",
            self.quote(&constraint_name(&model.db_table, &columns, "together_idx")),
            self.quote(&model.db_table),
            self.quote_columns(&columns)
        );
        self.execute(&sql)
    }

    fn drop_index_together(
        &mut self,
        model: &HistoricalModel,
        group: &[String],
    ) -> MigrationResult<()> {
        let columns = Self::columns_for(model, group);
        let name = constraint_name(&model.db_table, &columns, "together_idx");
        let sql = format!("DROP INDEX {}", self.quote(&name));
        self.execute(&sql)
    }

    /// Rebuilds `model`'s table with `columns`, each paired with the SELECT
    /// expression that fills it from the old table.
    fn remake_table(
        &mut self,
        model: &HistoricalModel,
        columns: &[(&HistoricalField, String)],
    ) -> MigrationResult<()> {
        let table = self.quote(&model.db_table);
        let temp = self.quote(&format!("new__{}", model.db_table));
        let definitions: Vec<String> = columns
            .iter()
            .map(|(field, _)| self.column_sql(field, true, false))
            .collect();
        let targets: Vec<String> = columns
            .iter()
            .map(|(field, _)| self.quote(&field.column))
            .collect();
        let sources: Vec<&str> = columns.iter().map(|(_, expr)| expr.as_str()).collect();

        self.execute(&format!("CREATE TABLE {temp} ({})", definitions.join(", ")))?;
        self.execute(&format!(
            "INSERT INTO {temp} ({}) SELECT {} FROM {table}",
            targets.join(", "),
            sources.join(", ")
        ))?;
        self.execute(&format!("DROP TABLE {table}"))?;
        self.execute(&format!("ALTER TABLE {temp} RENAME TO {table}"))?;
        self.create_model_indexes(model)
    }

    fn check_conversion(
        &self,
        model: &HistoricalModel,
        old_field: &HistoricalField,
        new_field: &HistoricalField,
    ) -> MigrationResult<()> {
        if self
            .dialect
            .can_convert(&old_field.spec.kind, &new_field.spec.kind)
        {
            Ok(())
        } else {
            Err(MigrationError::UnsupportedAlteration {
                model: model.label(),
                field: new_field.name.clone(),
                old_kind: old_field.spec.kind.name().to_string(),
                new_kind: new_field.spec.kind.name().to_string(),
            })
        }
    }

    fn sqlite_alter_field(
        &mut self,
        model: &HistoricalModel,
        old_field: &HistoricalField,
        new_field: &HistoricalField,
    ) -> MigrationResult<()> {
        if same_definition(&old_field.spec, &new_field.spec) {
            // Relation retargets follow table renames automatically.
            return self.rename_field(model, old_field, new_field);
        }

        let old_column = self.quote(&old_field.column);
        let source = match (&new_field.spec.default, old_field.spec.null, new_field.spec.null) {
            (Some(default), true, false) => {
                format!("COALESCE({old_column}, {})", default.to_sql_literal())
            }
            _ => old_column,
        };
        let mut columns: Vec<(&HistoricalField, String)> = model
            .fields
            .iter()
            .map(|f| {
                if f.name == new_field.name {
                    (new_field, source.clone())
                } else {
                    (f, self.quote(&f.column))
                }
            })
            .collect();
        if model.get_field(&new_field.name).is_none() {
            columns.push((new_field, source));
        }
        self.remake_table(model, &columns)
    }

    fn postgres_alter_field(
        &mut self,
        model: &HistoricalModel,
        old_field: &HistoricalField,
        new_field: &HistoricalField,
    ) -> MigrationResult<()> {
        let table = self.quote(&model.db_table);
        let column = self.quote(&new_field.column);
        let (old, new) = (&old_field.spec, &new_field.spec);

        if old_field.column != new_field.column {
            self.rename_field(model, old_field, new_field)?;
        }

        if self.dialect.column_type(&old.kind) != self.dialect.column_type(&new.kind) {
            let cast = pg_cast_type(&new.kind);
            self.execute(&format!(
                "ALTER TABLE {table} ALTER COLUMN {column} TYPE {cast} USING {column}::{cast}"
            ))?;
        }

        if old.null != new.null && !new.primary_key {
            if new.null {
                self.execute(&format!(
                    "ALTER TABLE {table} ALTER COLUMN {column} DROP NOT NULL"
                ))?;
            } else {
                if let Some(default) = &new.default {
                    self.execute(&format!(
                        "UPDATE {table} SET {column} = {} WHERE {column} IS NULL",
                        default.to_sql_literal()
                    ))?;
                }
                self.execute(&format!(
                    "ALTER TABLE {table} ALTER COLUMN {column} SET NOT NULL"
                ))?;
            }
        }

        let old_unique = old.unique && !old.primary_key;
        let new_unique = new.unique && !new.primary_key;
        if old_unique && !new_unique {
            let name = self.quote(&format!("{}_{}_key", old_field.table, old_field.column));
            self.execute(&format!("ALTER TABLE {table} DROP CONSTRAINT {name}"))?;
        } else if new_unique && !old_unique {
            let name = self.quote(&format!("{}_{}_key", model.db_table, new_field.column));
            self.execute(&format!(
                "ALTER TABLE {table} ADD CONSTRAINT {name} UNIQUE ({column})"
            ))?;
        }

        if old_field.target != new_field.target {
            if old_field.target.is_some() {
                // Renaming a table keeps its constraint names.
                let name = self.quote(&format!("{}_{}_fkey", old_field.table, old_field.column));
                self.execute(&format!(
                    "ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {name}"
                ))?;
            }
            if let Some(target) = &new_field.target {
                let name = self.quote(&format!("{}_{}_fkey", model.db_table, new_field.column));
                let action = new.kind.on_delete().map_or("NO ACTION", |a| a.as_sql());
                self.execute(&format!(
                    "ALTER TABLE {table} ADD CONSTRAINT {name} FOREIGN KEY ({column}) \
                     REFERENCES {} ({}) ON DELETE {action} DEFERRABLE INITIALLY DEFERRED",
                    self.quote(&target.table),
                    self.quote(&target.column)
                ))?;
            }
        }

        let old_indexed = old.db_index && !old_unique;
        let new_indexed = new.db_index && !new_unique;
        if old_indexed && !new_indexed {
            self.drop_field_index(old_field)?;
        } else if new_indexed && !old_indexed {
            self.create_field_index(model, new_field)?;
        }
        Ok(())
    }
}

impl Drop for DatabaseSchemaEditor<'_> {
    fn drop(&mut self) {
        if self.in_transaction {
            if let Some(conn) = self.connection.as_mut() {
                // Nothing useful can be done with a failed rollback here.
                let _ = conn.rollback();
            }
        }
    }
}

impl SchemaEditor for DatabaseSchemaEditor<'_> {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn execute(&mut self, sql: &str) -> MigrationResult<()> {
        if let Some(conn) = self.connection.as_mut() {
            tracing::debug!(sql, "Executing schema statement");
            conn.execute(sql)?;
        }
        self.executed.push(sql.to_string());
        Ok(())
    }

    fn create_model(&mut self, model: &HistoricalModel) -> MigrationResult<()> {
        let definitions: Vec<String> = model
            .fields
            .iter()
            .map(|field| self.column_sql(field, true, false))
            .collect();
        self.execute(&format!(
            "CREATE TABLE {} ({})",
            self.quote(&model.db_table),
            definitions.join(", ")
        ))?;
        self.create_model_indexes(model)
    }

    fn delete_model(&mut self, model: &HistoricalModel) -> MigrationResult<()> {
        let table = self.quote(&model.db_table);
        let sql = match self.dialect {
            Dialect::Sqlite => format!("DROP TABLE {table}"),
            Dialect::Postgres => format!("DROP TABLE {table} CASCADE"),
        };
        self.execute(&sql)
    }

    fn alter_db_table(
        &mut self,
        _model: &HistoricalModel,
        old_table: &str,
        new_table: &str,
    ) -> MigrationResult<()> {
        if old_table == new_table {
            return Ok(());
        }
        self.execute(&format!(
            "ALTER TABLE {} RENAME TO {}",
            self.quote(old_table),
            self.quote(new_table)
        ))
    }

    fn alter_unique_together(
        &mut self,
        model: &HistoricalModel,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> MigrationResult<()> {
        for group in old.iter().filter(|g| !new.contains(g)) {
            self.drop_unique_together(model, group)?;
        }
        for group in new.iter().filter(|g| !old.contains(g)) {
            self.create_unique_together(model, group)?;
        }
        Ok(())
    }

    fn alter_index_together(
        &mut self,
        model: &HistoricalModel,
        old: &[Vec<String>],
        new: &[Vec<String>],
    ) -> MigrationResult<()> {
        for group in old.iter().filter(|g| !new.contains(g)) {
            self.drop_index_together(model, group)?;
        }
        for group in new.iter().filter(|g| !old.contains(g)) {
            self.create_index_together(model, group)?;
        }
        Ok(())
    }

    fn add_index(&mut self, model: &HistoricalModel, index: &IndexSpec) -> MigrationResult<()> {
        let columns = Self::columns_for(model, &index.fields);
        let unique = if index.unique { "UNIQUE " } else { "" };
        self.execute(&format!(
            "CREATE {unique}INDEX {} ON {} ({})",
            self.quote(&index.name),
            self.quote(&model.db_table),
            self.quote_columns(&columns)
        ))
    }

    fn remove_index(&mut self, _model: &HistoricalModel, index: &IndexSpec) -> MigrationResult<()> {
        self.execute(&format!("DROP INDEX {}", self.quote(&index.name)))
    }

    fn add_field(
        &mut self,
        model: &HistoricalModel,
        field: &HistoricalField,
    ) -> MigrationResult<()> {
        let spec = &field.spec;
        let table = self.quote(&model.db_table);

        if self.dialect == Dialect::Sqlite
            && (spec.primary_key || spec.unique || !spec.null || spec.default.is_some())
        {
            // SQLite cannot drop a column default afterwards; rebuild instead.
            let fill = spec
                .default
                .as_ref()
                .map_or_else(|| "NULL".to_string(), |d| d.to_sql_literal());
            let mut columns: Vec<(&HistoricalField, String)> = model
                .fields
                .iter()
                .map(|f| {
                    if f.name == field.name {
                        (field, fill.clone())
                    } else {
                        (f, self.quote(&f.column))
                    }
                })
                .collect();
            if model.get_field(&field.name).is_none() {
                columns.push((field, fill));
            }
            return self.remake_table(model, &columns);
        }

        self.execute(&format!(
            "ALTER TABLE {table} ADD COLUMN {}",
            self.column_sql(field, true, true)
        ))?;
        if self.dialect == Dialect::Postgres && spec.default.is_some() {
            // The default only backfills existing rows.
            self.execute(&format!(
                "ALTER TABLE {table} ALTER COLUMN {} DROP DEFAULT",
                self.quote(&field.column)
            ))?;
        }
        if spec.db_index && !spec.unique && !spec.primary_key {
            self.create_field_index(model, field)?;
        }
        Ok(())
    }

    fn remove_field(
        &mut self,
        model: &HistoricalModel,
        field: &HistoricalField,
    ) -> MigrationResult<()> {
        match self.dialect {
            Dialect::Sqlite => {
                let columns: Vec<(&HistoricalField, String)> = model
                    .fields
                    .iter()
                    .filter(|f| f.name != field.name)
                    .map(|f| (f, self.quote(&f.column)))
                    .collect();
                self.remake_table(model, &columns)
            }
            Dialect::Postgres => self.execute(&format!(
                "ALTER TABLE {} DROP COLUMN {} CASCADE",
                self.quote(&model.db_table),
                self.quote(&field.column)
            )),
        }
    }

    fn alter_field(
        &mut self,
        model: &HistoricalModel,
        old_field: &HistoricalField,
        new_field: &HistoricalField,
    ) -> MigrationResult<()> {
        self.check_conversion(model, old_field, new_field)?;
        if old_field.spec == new_field.spec
            && old_field.column == new_field.column
            && old_field.target == new_field.target
        {
            return Ok(());
        }
        match self.dialect {
            Dialect::Sqlite => self.sqlite_alter_field(model, old_field, new_field),
            Dialect::Postgres => self.postgres_alter_field(model, old_field, new_field),
        }
    }

    fn rename_field(
        &mut self,
        model: &HistoricalModel,
        old_field: &HistoricalField,
        new_field: &HistoricalField,
    ) -> MigrationResult<()> {
        if old_field.column == new_field.column {
            return Ok(());
        }
        self.execute(&format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.quote(&model.db_table),
            self.quote(&old_field.column),
            self.quote(&new_field.column)
        ))
    }
}
