//! Model-level operations.

use std::collections::BTreeMap;

use strata_core::{MigrationError, MigrationResult};

use super::{render_model, Operation};
use crate::registry::Registry;
use crate::schema_editor::SchemaEditor;
use crate::state::{
    model_key, FieldSpec, IndexSpec, ModelBase, ModelOptions, ModelState, ProjectState,
};

/// Creates a new model and its table.
#[derive(Debug, Clone)]
pub struct CreateModel {
    pub name: String,
    pub fields: Vec<(String, FieldSpec)>,
    pub options: ModelOptions,
    pub bases: Vec<ModelBase>,
}

impl CreateModel {
    pub fn new(name: impl Into<String>, fields: Vec<(&str, FieldSpec)>) -> Self {
        Self {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(n, f)| (n.to_string(), f))
                .collect(),
            options: ModelOptions::default(),
            bases: Vec::new(),
        }
    }

    pub fn options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn bases(mut self, bases: Vec<ModelBase>) -> Self {
        self.bases = bases;
        self
    }
}

impl Operation for CreateModel {
    fn describe(&self) -> String {
        format!("Create model {}", self.name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        let model = ModelState {
            app_label: app_label.to_string(),
            name: self.name.clone(),
            fields: self.fields.clone(),
            options: self.options.clone(),
            bases: self.bases.clone(),
        };
        model.check_option_fields()?;
        state.add_model(model)
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        _prior: &ProjectState,
    ) -> MigrationResult<()> {
        state.remove_model(app_label, &self.name).map(|_| ())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let model = render_model(to_state, app_label, &self.name)?;
        schema_editor.create_model(&model)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let model = render_model(from_state, app_label, &self.name)?;
        schema_editor.delete_model(&model)
    }
}

/// Deletes a model and drops its table.
#[derive(Debug, Clone)]
pub struct DeleteModel {
    pub name: String,
}

impl DeleteModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Operation for DeleteModel {
    fn describe(&self) -> String {
        format!("Delete model {}", self.name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        state.remove_model(app_label, &self.name).map(|_| ())
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()> {
        let model = prior.require_model(app_label, &self.name)?.clone();
        state.add_model(model)
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let model = render_model(from_state, app_label, &self.name)?;
        schema_editor.delete_model(&model)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let model = render_model(to_state, app_label, &self.name)?;
        schema_editor.create_model(&model)
    }
}

/// Renames a model, retargeting relations and bases that point at it.
#[derive(Debug, Clone)]
pub struct RenameModel {
    pub old_name: String,
    pub new_name: String,
}

impl RenameModel {
    pub fn new(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self {
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }
}

/// Renames the table of `from_name` in `from_state` to the table of `to_name`
/// in `to_state`, then re-points every relation aimed at it.
fn rename_model_tables(
    app_label: &str,
    schema_editor: &mut dyn SchemaEditor,
    (from_state, from_name): (&ProjectState, &str),
    (to_state, to_name): (&ProjectState, &str),
) -> MigrationResult<()> {
    let old_model = render_model(from_state, app_label, from_name)?;
    let to_registry = Registry::from_state(to_state)?;
    let new_model = to_registry.get_model(app_label, to_name)?;
    schema_editor.alter_db_table(new_model, &old_model.db_table, &new_model.db_table)?;

    let from_registry = Registry::from_state(from_state)?;
    for (related_model, new_field) in to_registry.related_fields(app_label, to_name) {
        // A self-referential relation lives on the renamed model itself.
        let old_owner = if related_model.key() == new_model.key() {
            from_registry.get_model(app_label, from_name)?
        } else {
            from_registry.get_model(&related_model.app_label, &related_model.name)?
        };
        let old_field = old_owner.require_field(&new_field.name)?;
        schema_editor.alter_field(related_model, old_field, new_field)?;
    }
    Ok(())
}

impl Operation for RenameModel {
    fn describe(&self) -> String {
        format!("Rename model {} to {}", self.old_name, self.new_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        state.rename_model(app_label, &self.old_name, &self.new_name)
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()> {
        state.rename_model(app_label, &self.new_name, &self.old_name)?;
        state.restore_reference_spelling(prior, &model_key(app_label, &self.old_name));
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        rename_model_tables(
            app_label,
            schema_editor,
            (from_state, &self.old_name),
            (to_state, &self.new_name),
        )
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        rename_model_tables(
            app_label,
            schema_editor,
            (from_state, &self.new_name),
            (to_state, &self.old_name),
        )
    }
}

/// Sets (or clears) a model's explicit table name.
#[derive(Debug, Clone)]
pub struct AlterModelTable {
    pub name: String,
    pub table: Option<String>,
}

impl AlterModelTable {
    pub fn new(name: impl Into<String>, table: Option<&str>) -> Self {
        Self {
            name: name.into(),
            table: table.map(ToString::to_string),
        }
    }
}

/// Renames a model's table between two states.
fn rename_table_between(
    app_label: &str,
    name: &str,
    schema_editor: &mut dyn SchemaEditor,
    from_state: &ProjectState,
    to_state: &ProjectState,
) -> MigrationResult<()> {
    let old_model = render_model(from_state, app_label, name)?;
    let new_model = render_model(to_state, app_label, name)?;
    schema_editor.alter_db_table(&new_model, &old_model.db_table, &new_model.db_table)
}

impl Operation for AlterModelTable {
    fn describe(&self) -> String {
        format!(
            "Rename table for {} to {}",
            self.name,
            self.table.as_deref().unwrap_or("(default)")
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        state.require_model_mut(app_label, &self.name)?.options.db_table = self.table.clone();
        Ok(())
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()> {
        let table = prior.require_model(app_label, &self.name)?.options.db_table.clone();
        state.require_model_mut(app_label, &self.name)?.options.db_table = table;
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        rename_table_between(app_label, &self.name, schema_editor, from_state, to_state)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        rename_table_between(app_label, &self.name, schema_editor, from_state, to_state)
    }
}

/// Which field-group option a together operation edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Together {
    Unique,
    Index,
}

impl Together {
    const fn option_name(self) -> &'static str {
        match self {
            Self::Unique => "unique_together",
            Self::Index => "index_together",
        }
    }

    fn groups(self, options: &ModelOptions) -> &Vec<Vec<String>> {
        match self {
            Self::Unique => &options.unique_together,
            Self::Index => &options.index_together,
        }
    }

    fn groups_mut(self, options: &mut ModelOptions) -> &mut Vec<Vec<String>> {
        match self {
            Self::Unique => &mut options.unique_together,
            Self::Index => &mut options.index_together,
        }
    }

    fn set(
        self,
        app_label: &str,
        name: &str,
        state: &mut ProjectState,
        groups: Vec<Vec<String>>,
    ) -> MigrationResult<()> {
        let model = state.require_model_mut(app_label, name)?;
        *self.groups_mut(&mut model.options) = groups;
        model.check_option_fields()
    }

    fn apply(
        self,
        app_label: &str,
        name: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let old_model = render_model(from_state, app_label, name)?;
        let new_model = render_model(to_state, app_label, name)?;
        let old = self.groups(&old_model.options);
        let new = self.groups(&new_model.options);
        match self {
            Self::Unique => schema_editor.alter_unique_together(&new_model, old, new),
            Self::Index => schema_editor.alter_index_together(&new_model, old, new),
        }
    }
}

/// Replaces a model's `unique_together` groups.
#[derive(Debug, Clone)]
pub struct AlterUniqueTogether {
    pub name: String,
    pub unique_together: Vec<Vec<String>>,
}

impl AlterUniqueTogether {
    pub fn new(name: impl Into<String>, groups: &[&[&str]]) -> Self {
        Self {
            name: name.into(),
            unique_together: to_groups(groups),
        }
    }
}

fn to_groups(groups: &[&[&str]]) -> Vec<Vec<String>> {
    groups
        .iter()
        .map(|g| g.iter().map(ToString::to_string).collect())
        .collect()
}

impl Operation for AlterUniqueTogether {
    fn describe(&self) -> String {
        format!(
            "Alter {} for {} ({} constraint(s))",
            Together::Unique.option_name(),
            self.name,
            self.unique_together.len()
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        Together::Unique.set(app_label, &self.name, state, self.unique_together.clone())
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()> {
        let groups = prior.require_model(app_label, &self.name)?.options.unique_together.clone();
        Together::Unique.set(app_label, &self.name, state, groups)
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        Together::Unique.apply(app_label, &self.name, schema_editor, from_state, to_state)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        Together::Unique.apply(app_label, &self.name, schema_editor, from_state, to_state)
    }
}

/// Replaces a model's `index_together` groups.
#[derive(Debug, Clone)]
pub struct AlterIndexTogether {
    pub name: String,
    pub index_together: Vec<Vec<String>>,
}

impl AlterIndexTogether {
    pub fn new(name: impl Into<String>, groups: &[&[&str]]) -> Self {
        Self {
            name: name.into(),
            index_together: to_groups(groups),
        }
    }
}

impl Operation for AlterIndexTogether {
    fn describe(&self) -> String {
        format!(
            "Alter {} for {} ({} constraint(s))",
            Together::Index.option_name(),
            self.name,
            self.index_together.len()
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        Together::Index.set(app_label, &self.name, state, self.index_together.clone())
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()> {
        let groups = prior.require_model(app_label, &self.name)?.options.index_together.clone();
        Together::Index.set(app_label, &self.name, state, groups)
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        Together::Index.apply(app_label, &self.name, schema_editor, from_state, to_state)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        Together::Index.apply(app_label, &self.name, schema_editor, from_state, to_state)
    }
}

/// Replaces a model's schema-free options (ordering, verbose names, ...).
///
/// Has no database effect.
#[derive(Debug, Clone)]
pub struct AlterModelOptions {
    pub name: String,
    pub options: BTreeMap<String, serde_json::Value>,
}

impl AlterModelOptions {
    pub fn new(name: impl Into<String>, options: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

impl Operation for AlterModelOptions {
    fn describe(&self) -> String {
        format!("Change Meta options on {}", self.name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        state.require_model_mut(app_label, &self.name)?.options.extra = self.options.clone();
        Ok(())
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()> {
        let extra = prior.require_model(app_label, &self.name)?.options.extra.clone();
        state.require_model_mut(app_label, &self.name)?.options.extra = extra;
        Ok(())
    }

    fn database_forwards(
        &self,
        _app_label: &str,
        _schema_editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> MigrationResult<()> {
        Ok(())
    }

    fn database_backwards(
        &self,
        _app_label: &str,
        _schema_editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> MigrationResult<()> {
        Ok(())
    }
}

/// Adds a named index to a model.
#[derive(Debug, Clone)]
pub struct AddIndex {
    pub model_name: String,
    pub index: IndexSpec,
}

impl AddIndex {
    pub fn new(model_name: impl Into<String>, index: IndexSpec) -> Self {
        Self {
            model_name: model_name.into(),
            index,
        }
    }
}

impl Operation for AddIndex {
    fn describe(&self) -> String {
        format!(
            "Create index {} on field(s) {} of model {}",
            self.index.name,
            self.index.fields.join(", "),
            self.model_name
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        let model = state.require_model_mut(app_label, &self.model_name)?;
        if model.options.indexes.iter().any(|i| i.name == self.index.name) {
            return Err(MigrationError::InvalidStateTransition(format!(
                "Model {} already has an index named '{}'",
                model.label(),
                self.index.name
            )));
        }
        model.options.indexes.push(self.index.clone());
        model.check_option_fields()
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        _prior: &ProjectState,
    ) -> MigrationResult<()> {
        let model = state.require_model_mut(app_label, &self.model_name)?;
        model.options.indexes.retain(|i| i.name != self.index.name);
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let model = render_model(to_state, app_label, &self.model_name)?;
        schema_editor.add_index(&model, &self.index)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let model = render_model(from_state, app_label, &self.model_name)?;
        schema_editor.remove_index(&model, &self.index)
    }
}

/// Removes a named index from a model.
#[derive(Debug, Clone)]
pub struct RemoveIndex {
    pub model_name: String,
    pub name: String,
}

impl RemoveIndex {
    pub fn new(model_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            name: name.into(),
        }
    }

    fn find_index(&self, app_label: &str, state: &ProjectState) -> MigrationResult<IndexSpec> {
        let model = state.require_model(app_label, &self.model_name)?;
        model
            .options
            .indexes
            .iter()
            .find(|i| i.name == self.name)
            .cloned()
            .ok_or_else(|| {
                MigrationError::InvalidStateTransition(format!(
                    "Model {} has no index named '{}'",
                    model.label(),
                    self.name
                ))
            })
    }
}

impl Operation for RemoveIndex {
    fn describe(&self) -> String {
        format!("Remove index {} from {}", self.name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        self.find_index(app_label, state)?;
        let model = state.require_model_mut(app_label, &self.model_name)?;
        model.options.indexes.retain(|i| i.name != self.name);
        Ok(())
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()> {
        let indexes = prior.require_model(app_label, &self.model_name)?.options.indexes.clone();
        state.require_model_mut(app_label, &self.model_name)?.options.indexes = indexes;
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        _to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let index = self.find_index(app_label, from_state)?;
        let model = render_model(from_state, app_label, &self.model_name)?;
        schema_editor.remove_index(&model, &index)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let index = self.find_index(app_label, to_state)?;
        let model = render_model(to_state, app_label, &self.model_name)?;
        schema_editor.add_index(&model, &index)
    }
}
