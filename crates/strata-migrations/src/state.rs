//! Project state: the in-memory description of every model at one point in
//! migration history.
//!
//! A [`ProjectState`] is built by replaying operations' state effects; it is
//! never read back from the database. Model lookups are case-insensitive on
//! the model name, so `blog.Post` and `blog.post` are the same model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strata_core::{MigrationError, MigrationResult};

/// Key identifying a model: `(app_label, lowercased model name)`.
pub type ModelKey = (String, String);

/// Builds the [`ModelKey`] for a model.
pub fn model_key(app_label: &str, name: &str) -> ModelKey {
    (app_label.to_string(), name.to_lowercase())
}

/// Referential action applied when the target row of a relation is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnDelete {
    /// Delete the referencing rows as well.
    Cascade,
    /// Refuse to delete the target.
    Protect,
    /// Set the referencing column to NULL.
    SetNull,
    /// Set the referencing column to its default.
    SetDefault,
    /// Leave enforcement to the database.
    DoNothing,
}

impl OnDelete {
    /// Returns the SQL referential action keyword.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::Protect => "RESTRICT",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
            Self::DoNothing => "NO ACTION",
        }
    }
}

/// Coarse storage class of a field kind.
///
/// Engines decide whether a column can be converted in place by comparing
/// storage classes rather than exact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Integer,
    Real,
    Decimal,
    Text,
    Boolean,
    Temporal,
    Binary,
    Json,
    Uuid,
}

/// The kind of a field, carrying kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FieldKind {
    AutoField,
    BigAutoField,
    CharField {
        max_length: usize,
    },
    TextField,
    IntegerField,
    BigIntegerField,
    SmallIntegerField,
    FloatField,
    DecimalField {
        max_digits: u32,
        decimal_places: u32,
    },
    BooleanField,
    DateField,
    DateTimeField,
    TimeField,
    DurationField,
    UuidField,
    BinaryField,
    JsonField,
    /// A many-to-one relation. `to` is `"app.Model"` or a bare model name in
    /// the same app.
    ForeignKey {
        to: String,
        on_delete: OnDelete,
    },
    /// A one-to-one relation.
    OneToOneField {
        to: String,
        on_delete: OnDelete,
    },
}

impl FieldKind {
    /// Returns the kind's name, e.g. `"CharField"`.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AutoField => "AutoField",
            Self::BigAutoField => "BigAutoField",
            Self::CharField { .. } => "CharField",
            Self::TextField => "TextField",
            Self::IntegerField => "IntegerField",
            Self::BigIntegerField => "BigIntegerField",
            Self::SmallIntegerField => "SmallIntegerField",
            Self::FloatField => "FloatField",
            Self::DecimalField { .. } => "DecimalField",
            Self::BooleanField => "BooleanField",
            Self::DateField => "DateField",
            Self::DateTimeField => "DateTimeField",
            Self::TimeField => "TimeField",
            Self::DurationField => "DurationField",
            Self::UuidField => "UUIDField",
            Self::BinaryField => "BinaryField",
            Self::JsonField => "JSONField",
            Self::ForeignKey { .. } => "ForeignKey",
            Self::OneToOneField { .. } => "OneToOneField",
        }
    }

    /// Returns the storage class used for conversion checks.
    pub const fn storage_class(&self) -> StorageClass {
        match self {
            Self::AutoField
            | Self::BigAutoField
            | Self::IntegerField
            | Self::BigIntegerField
            | Self::SmallIntegerField
            | Self::ForeignKey { .. }
            | Self::OneToOneField { .. } => StorageClass::Integer,
            Self::FloatField => StorageClass::Real,
            Self::DecimalField { .. } => StorageClass::Decimal,
            Self::CharField { .. } | Self::TextField => StorageClass::Text,
            Self::BooleanField => StorageClass::Boolean,
            Self::DateField | Self::DateTimeField | Self::TimeField | Self::DurationField => {
                StorageClass::Temporal
            }
            Self::BinaryField => StorageClass::Binary,
            Self::JsonField => StorageClass::Json,
            Self::UuidField => StorageClass::Uuid,
        }
    }

    /// Returns `true` for database-generated identifiers.
    pub const fn is_auto(&self) -> bool {
        matches!(self, Self::AutoField | Self::BigAutoField)
    }

    /// Returns the relation target reference for relational kinds.
    pub fn related_model(&self) -> Option<&str> {
        match self {
            Self::ForeignKey { to, .. } | Self::OneToOneField { to, .. } => Some(to),
            _ => None,
        }
    }

    /// Returns the referential action for relational kinds.
    pub const fn on_delete(&self) -> Option<OnDelete> {
        match self {
            Self::ForeignKey { on_delete, .. } | Self::OneToOneField { on_delete, .. } => {
                Some(*on_delete)
            }
            _ => None,
        }
    }

    fn set_related_model(&mut self, target: String) {
        if let Self::ForeignKey { to, .. } | Self::OneToOneField { to, .. } = self {
            *to = target;
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A literal default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Renders the value as a SQL literal.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// The state of one field.
///
/// # Examples
///
/// ```
/// use strata_migrations::state::{FieldKind, FieldSpec};
///
/// let title = FieldSpec::new(FieldKind::CharField { max_length: 200 }).default("untitled");
/// assert!(title.has_default());
/// assert_eq!(title.column("title"), "title");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub null: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub db_index: bool,
    /// Explicit column name; derived from the field name when absent.
    pub db_column: Option<String>,
    pub default: Option<Value>,
}

impl FieldSpec {
    /// Creates a NOT NULL field with no default.
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            null: false,
            unique: false,
            primary_key: false,
            db_index: false,
            db_column: None,
            default: None,
        }
    }

    /// Shorthand for an auto-incrementing primary key.
    pub fn auto() -> Self {
        Self::new(FieldKind::BigAutoField).primary_key()
    }

    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn db_index(mut self) -> Self {
        self.db_index = true;
        self
    }

    pub fn db_column(mut self, column: impl Into<String>) -> Self {
        self.db_column = Some(column.into());
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Returns `true` if the field carries a default value.
    pub const fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Returns the column name for a field called `name`.
    ///
    /// Relations store their key in `<name>_id` unless `db_column` is set.
    pub fn column(&self, name: &str) -> String {
        if let Some(column) = &self.db_column {
            return column.clone();
        }
        if self.kind.related_model().is_some() {
            format!("{name}_id")
        } else {
            name.to_string()
        }
    }
}

/// A named index over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, fields: &[&str]) -> Self {
        Self {
            name: name.into(),
            fields: fields.iter().map(ToString::to_string).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Model-level options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Explicit table name; `<app_label>_<model>` when absent.
    pub db_table: Option<String>,
    /// Field-name groups whose combined values must be unique.
    pub unique_together: Vec<Vec<String>>,
    /// Field-name groups indexed together.
    pub index_together: Vec<Vec<String>>,
    pub indexes: Vec<IndexSpec>,
    /// Options with no schema effect (ordering, verbose names, permissions).
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ModelOptions {
    /// Rewrites every field-name reference in the option sets.
    fn rename_field_references(&mut self, old: &str, new: &str) {
        let rename = |group: &mut Vec<String>| {
            for name in group.iter_mut() {
                if name == old {
                    *name = new.to_string();
                }
            }
        };
        self.unique_together.iter_mut().for_each(rename);
        self.index_together.iter_mut().for_each(rename);
        for index in &mut self.indexes {
            rename(&mut index.fields);
        }
    }
}

/// A model base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelBase {
    /// A lazy reference to another model in the project state, resolved when
    /// the state is rendered.
    Model(String),
    /// An opaque base with no schema meaning, such as a mixin.
    Literal(String),
}

/// The state of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub app_label: String,
    pub name: String,
    /// Fields in declaration order.
    pub fields: Vec<(String, FieldSpec)>,
    pub options: ModelOptions,
    pub bases: Vec<ModelBase>,
}

impl ModelState {
    pub fn new(
        app_label: impl Into<String>,
        name: impl Into<String>,
        fields: Vec<(String, FieldSpec)>,
    ) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
            fields,
            options: ModelOptions::default(),
            bases: Vec::new(),
        }
    }

    pub fn key(&self) -> ModelKey {
        model_key(&self.app_label, &self.name)
    }

    pub fn name_lower(&self) -> String {
        self.name.to_lowercase()
    }

    /// Returns `app.Name`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.app_label, self.name)
    }

    /// Returns the table name, explicit or derived.
    pub fn db_table(&self) -> String {
        self.options
            .db_table
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.app_label, self.name_lower()))
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|(n, _)| n == name)
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn get_field_mut(&mut self, name: &str) -> Option<&mut FieldSpec> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_index(name).is_some()
    }

    /// Returns the field, or an [`MigrationError::InvalidStateTransition`].
    pub fn require_field(&self, name: &str) -> MigrationResult<&FieldSpec> {
        self.get_field(name).ok_or_else(|| {
            MigrationError::InvalidStateTransition(format!(
                "Model {} has no field named '{name}'",
                self.label()
            ))
        })
    }

    /// Renames a field and every option reference to it.
    pub fn rename_field(&mut self, old: &str, new: &str) -> MigrationResult<()> {
        let index = self.field_index(old).ok_or_else(|| {
            MigrationError::InvalidStateTransition(format!(
                "Model {} has no field named '{old}'",
                self.label()
            ))
        })?;
        if old != new && self.has_field(new) {
            return Err(MigrationError::InvalidStateTransition(format!(
                "Model {} already has a field named '{new}'",
                self.label()
            )));
        }
        self.fields[index].0 = new.to_string();
        self.options.rename_field_references(old, new);
        Ok(())
    }

    /// Checks that every option field reference names an existing field.
    pub fn check_option_fields(&self) -> MigrationResult<()> {
        let groups = self
            .options
            .unique_together
            .iter()
            .chain(&self.options.index_together)
            .chain(self.options.indexes.iter().map(|i| &i.fields));
        for group in groups {
            for name in group {
                if !self.has_field(name) {
                    return Err(MigrationError::InvalidStateTransition(format!(
                        "Model {} option refers to unknown field '{name}'",
                        self.label()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Resolves a model reference (`"app.Model"` or bare `"Model"`) against the
/// app it appears in.
pub fn resolve_reference(reference: &str, app_label: &str) -> ModelKey {
    match reference.split_once('.') {
        Some((app, name)) => model_key(app, name),
        None => model_key(app_label, reference),
    }
}

/// The set of all models at one point in migration history.
///
/// # Examples
///
/// ```
/// use strata_migrations::state::{FieldKind, FieldSpec, ModelState, ProjectState};
///
/// let mut state = ProjectState::new();
/// state
///     .add_model(ModelState::new(
///         "library",
///         "Book",
///         vec![("title".into(), FieldSpec::new(FieldKind::CharField { max_length: 200 }))],
///     ))
///     .unwrap();
/// assert!(state.get_model("library", "book").is_some());
/// assert!(state.add_model(ModelState::new("library", "BOOK", vec![])).is_err());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    models: BTreeMap<ModelKey, ModelState>,
}

impl ProjectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a model. Fails if a model with the same key already exists.
    pub fn add_model(&mut self, model: ModelState) -> MigrationResult<()> {
        let key = model.key();
        if self.models.contains_key(&key) {
            return Err(MigrationError::InvalidStateTransition(format!(
                "Model {} already exists in the project state",
                model.label()
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for (name, _) in &model.fields {
            if !seen.insert(name.as_str()) {
                return Err(MigrationError::InvalidStateTransition(format!(
                    "Model {} declares field '{name}' more than once",
                    model.label()
                )));
            }
        }
        self.models.insert(key, model);
        Ok(())
    }

    /// Removes and returns a model.
    pub fn remove_model(&mut self, app_label: &str, name: &str) -> MigrationResult<ModelState> {
        self.models
            .remove(&model_key(app_label, name))
            .ok_or_else(|| missing_model(app_label, name))
    }

    pub fn get_model(&self, app_label: &str, name: &str) -> Option<&ModelState> {
        self.models.get(&model_key(app_label, name))
    }

    pub fn get_model_mut(&mut self, app_label: &str, name: &str) -> Option<&mut ModelState> {
        self.models.get_mut(&model_key(app_label, name))
    }

    /// Returns the model, or an [`MigrationError::InvalidStateTransition`].
    pub fn require_model(&self, app_label: &str, name: &str) -> MigrationResult<&ModelState> {
        self.get_model(app_label, name)
            .ok_or_else(|| missing_model(app_label, name))
    }

    pub fn require_model_mut(
        &mut self,
        app_label: &str,
        name: &str,
    ) -> MigrationResult<&mut ModelState> {
        self.get_model_mut(app_label, name)
            .ok_or_else(|| missing_model(app_label, name))
    }

    pub fn contains_model(&self, app_label: &str, name: &str) -> bool {
        self.models.contains_key(&model_key(app_label, name))
    }

    /// Iterates over all models in key order.
    pub fn models(&self) -> impl Iterator<Item = &ModelState> {
        self.models.values()
    }

    pub fn models_in_app<'a>(&'a self, app_label: &'a str) -> impl Iterator<Item = &'a ModelState> {
        self.models
            .values()
            .filter(move |model| model.app_label == app_label)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Renames a model and retargets every relation and base that refers to it.
    pub fn rename_model(&mut self, app_label: &str, old: &str, new: &str) -> MigrationResult<()> {
        let old_key = model_key(app_label, old);
        let new_key = model_key(app_label, new);
        if old_key != new_key && self.models.contains_key(&new_key) {
            return Err(MigrationError::InvalidStateTransition(format!(
                "Cannot rename {app_label}.{old} to {new}: model already exists"
            )));
        }
        let mut model = self.remove_model(app_label, old)?;
        model.name = new.to_string();
        self.models.insert(new_key, model);

        // Qualified references stay qualified; bare ones stay bare.
        let retarget = |reference: &str| {
            if reference.contains('.') {
                format!("{app_label}.{new}")
            } else {
                new.to_string()
            }
        };
        for model in self.models.values_mut() {
            let owner = model.app_label.clone();
            for (_, field) in &mut model.fields {
                let target = field
                    .kind
                    .related_model()
                    .filter(|to| resolve_reference(to, &owner) == old_key)
                    .map(retarget);
                if let Some(target) = target {
                    field.kind.set_related_model(target);
                }
            }
            for base in &mut model.bases {
                if let ModelBase::Model(reference) = base {
                    if resolve_reference(reference, &owner) == old_key {
                        *reference = retarget(reference);
                    }
                }
            }
        }
        Ok(())
    }

    /// Copies the spelling of the model at `target`, and of every relation or
    /// base referring to it, back from `prior`. References are matched by the
    /// key they resolve to, so only their text changes.
    pub fn restore_reference_spelling(&mut self, prior: &Self, target: &ModelKey) {
        let points_at =
            |reference: &str, owner: &str| resolve_reference(reference, owner) == *target;
        for (key, model) in &mut self.models {
            let Some(original) = prior.models.get(key) else {
                continue;
            };
            if key == target {
                model.name.clone_from(&original.name);
            }
            let owner = model.app_label.clone();
            for (name, field) in &mut model.fields {
                let previous = original
                    .get_field(name)
                    .and_then(|f| f.kind.related_model())
                    .filter(|to| points_at(*to, owner.as_str()));
                let current = field
                    .kind
                    .related_model()
                    .is_some_and(|to| points_at(to, owner.as_str()));
                if let (Some(previous), true) = (previous, current) {
                    field.kind.set_related_model(previous.to_string());
                }
            }
            for (base, previous) in model.bases.iter_mut().zip(&original.bases) {
                if let (ModelBase::Model(reference), ModelBase::Model(previous)) =
                    (base, previous)
                {
                    if points_at(reference.as_str(), owner.as_str())
                        && points_at(previous.as_str(), owner.as_str())
                    {
                        reference.clone_from(previous);
                    }
                }
            }
        }
    }

    /// Serializes the state to JSON.
    pub fn to_json(&self) -> MigrationResult<String> {
        let models: Vec<_> = self.models.values().collect();
        serde_json::to_string_pretty(&models).map_err(|e| {
            MigrationError::InvalidStateTransition(format!("Failed to serialize state: {e}"))
        })
    }

    /// Rebuilds a state from [`ProjectState::to_json`] output.
    pub fn from_json(json: &str) -> MigrationResult<Self> {
        let models: Vec<ModelState> = serde_json::from_str(json).map_err(|e| {
            MigrationError::InvalidStateTransition(format!("Failed to deserialize state: {e}"))
        })?;
        let mut state = Self::new();
        for model in models {
            state.add_model(model)?;
        }
        Ok(state)
    }
}

fn missing_model(app_label: &str, name: &str) -> MigrationError {
    MigrationError::InvalidStateTransition(format!(
        "No model named '{name}' in app '{app_label}'"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> ModelState {
        ModelState::new(
            "library",
            "Book",
            vec![
                ("id".into(), FieldSpec::auto()),
                (
                    "title".into(),
                    FieldSpec::new(FieldKind::CharField { max_length: 200 }),
                ),
            ],
        )
    }

    fn review() -> ModelState {
        ModelState::new(
            "reviews",
            "Review",
            vec![
                ("id".into(), FieldSpec::auto()),
                (
                    "book".into(),
                    FieldSpec::new(FieldKind::ForeignKey {
                        to: "library.Book".into(),
                        on_delete: OnDelete::Cascade,
                    }),
                ),
            ],
        )
    }

    #[test]
    fn test_add_and_lookup_case_insensitive() {
        let mut state = ProjectState::new();
        state.add_model(book()).unwrap();
        assert!(state.contains_model("library", "BOOK"));
        assert_eq!(state.get_model("library", "book").unwrap().name, "Book");
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_add_duplicate_fails() {
        let mut state = ProjectState::new();
        state.add_model(book()).unwrap();
        let err = state.add_model(book()).unwrap_err();
        assert!(err.is_invalid_state_transition());
    }

    #[test]
    fn test_add_duplicate_field_fails() {
        let mut state = ProjectState::new();
        let model = ModelState::new(
            "library",
            "Shelf",
            vec![
                ("id".into(), FieldSpec::auto()),
                ("id".into(), FieldSpec::auto()),
            ],
        );
        assert!(state.add_model(model).is_err());
    }

    #[test]
    fn test_remove_missing_model() {
        let mut state = ProjectState::new();
        let err = state.remove_model("library", "Book").unwrap_err();
        assert!(err.to_string().contains("No model named 'Book'"));
    }

    #[test]
    fn test_db_table_default_and_explicit() {
        let mut model = book();
        assert_eq!(model.db_table(), "library_book");
        model.options.db_table = Some("books".into());
        assert_eq!(model.db_table(), "books");
    }

    #[test]
    fn test_relation_column() {
        let model = review();
        assert_eq!(model.get_field("book").unwrap().column("book"), "book_id");
        let spec = FieldSpec::new(FieldKind::IntegerField).db_column("n");
        assert_eq!(spec.column("count"), "n");
    }

    #[test]
    fn test_rename_field_updates_options() {
        let mut model = book();
        model.options.unique_together = vec![vec!["title".into(), "id".into()]];
        model.options.indexes = vec![IndexSpec::new("book_title_idx", &["title"])];
        model.rename_field("title", "name").unwrap();
        assert!(model.has_field("name"));
        assert_eq!(model.options.unique_together[0][0], "name");
        assert_eq!(model.options.indexes[0].fields, vec!["name".to_string()]);
        model.check_option_fields().unwrap();
    }

    #[test]
    fn test_rename_field_collision() {
        let mut model = book();
        let err = model.rename_field("title", "id").unwrap_err();
        assert!(err.is_invalid_state_transition());
    }

    #[test]
    fn test_rename_model_retargets_relations() {
        let mut state = ProjectState::new();
        state.add_model(book()).unwrap();
        state.add_model(review()).unwrap();
        state.rename_model("library", "Book", "Volume").unwrap();

        assert!(state.get_model("library", "Book").is_none());
        let review = state.get_model("reviews", "Review").unwrap();
        assert_eq!(
            review.get_field("book").unwrap().kind.related_model(),
            Some("library.Volume")
        );
    }

    #[test]
    fn test_rename_model_round_trip_keeps_spelling() {
        let mut before = ProjectState::new();
        before.add_model(book()).unwrap();
        let mut review = review();
        review
            .get_field_mut("book")
            .unwrap()
            .kind
            .set_related_model("library.book".into());
        before.add_model(review).unwrap();

        let mut state = before.clone();
        state.rename_model("library", "Book", "Volume").unwrap();
        state.rename_model("library", "Volume", "Book").unwrap();
        assert_ne!(state, before);

        state.restore_reference_spelling(&before, &model_key("library", "Book"));
        assert_eq!(state, before);
    }

    #[test]
    fn test_rename_model_case_only() {
        let mut state = ProjectState::new();
        state.add_model(book()).unwrap();
        state.rename_model("library", "Book", "BOOK").unwrap();
        assert_eq!(state.get_model("library", "book").unwrap().name, "BOOK");
    }

    #[test]
    fn test_resolve_reference() {
        assert_eq!(
            resolve_reference("library.Book", "reviews"),
            ("library".to_string(), "book".to_string())
        );
        assert_eq!(
            resolve_reference("Review", "reviews"),
            ("reviews".to_string(), "review".to_string())
        );
    }

    #[test]
    fn test_value_literals() {
        assert_eq!(Value::from("it's").to_sql_literal(), "'it''s'");
        assert_eq!(Value::from(3).to_sql_literal(), "3");
        assert_eq!(Value::Null.to_sql_literal(), "NULL");
        assert_eq!(Value::from(true).to_sql_literal(), "TRUE");
    }

    #[test]
    fn test_storage_classes() {
        assert_eq!(
            FieldKind::CharField { max_length: 10 }.storage_class(),
            StorageClass::Text
        );
        assert_eq!(
            FieldKind::ForeignKey {
                to: "a.B".into(),
                on_delete: OnDelete::Cascade
            }
            .storage_class(),
            StorageClass::Integer
        );
        assert_eq!(FieldKind::UuidField.to_string(), "UUIDField");
    }

    #[test]
    fn test_json_round_trip() {
        let mut state = ProjectState::new();
        state.add_model(book()).unwrap();
        state.add_model(review()).unwrap();
        let json = state.to_json().unwrap();
        let back = ProjectState::from_json(&json).unwrap();
        assert_eq!(back, state);
    }
}
