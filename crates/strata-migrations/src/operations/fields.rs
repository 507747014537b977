//! Field-level operations.

use strata_core::{MigrationError, MigrationResult};

use super::{render_model, Operation};
use crate::schema_editor::SchemaEditor;
use crate::state::{FieldSpec, ProjectState};

/// Adds a field to a model.
///
/// With `preserve_default` set to `false`, the default is used once to fill
/// existing rows and is not recorded in the project state.
#[derive(Debug, Clone)]
pub struct AddField {
    pub model_name: String,
    pub name: String,
    pub field: FieldSpec,
    pub preserve_default: bool,
}

impl AddField {
    pub fn new(model_name: impl Into<String>, name: impl Into<String>, field: FieldSpec) -> Self {
        Self {
            model_name: model_name.into(),
            name: name.into(),
            field,
            preserve_default: true,
        }
    }

    /// Uses the default only to backfill existing rows.
    pub fn one_off_default(mut self) -> Self {
        self.preserve_default = false;
        self
    }
}

impl Operation for AddField {
    fn describe(&self) -> String {
        format!("Add field {} to {}", self.name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        let model = state.require_model_mut(app_label, &self.model_name)?;
        if model.has_field(&self.name) {
            return Err(MigrationError::InvalidStateTransition(format!(
                "Model {} already has a field named '{}'",
                model.label(),
                self.name
            )));
        }
        let mut field = self.field.clone();
        if !self.preserve_default {
            field.default = None;
        }
        model.fields.push((self.name.clone(), field));
        Ok(())
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        _prior: &ProjectState,
    ) -> MigrationResult<()> {
        let model = state.require_model_mut(app_label, &self.model_name)?;
        model.require_field(&self.name)?;
        model.fields.retain(|(name, _)| name != &self.name);
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
        let mut field = model.require_field(&self.name)?.clone();
        if !self.preserve_default {
            field.spec.default.clone_from(&self.field.default);
        }
        schema_editor.add_field(&model, &field)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let field = render_model(from_state, app_label, &self.model_name)?
            .require_field(&self.name)?
            .clone();
        let model = render_model(to_state, app_label, &self.model_name)?;
        schema_editor.remove_field(&model, &field)
    }
}

/// Removes a field from a model.
///
/// Reversal re-adds the column, so it is only possible when the field can be
/// filled for existing rows: it is nullable, has a default, or is generated
/// by the database.
#[derive(Debug, Clone)]
pub struct RemoveField {
    pub model_name: String,
    pub name: String,
}

impl RemoveField {
    pub fn new(model_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            name: name.into(),
        }
    }
}

impl Operation for RemoveField {
    fn describe(&self) -> String {
        format!("Remove field {} from {}", self.name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        let model = state.require_model_mut(app_label, &self.model_name)?;
        model.require_field(&self.name)?;
        if let Some(index) = model
            .options
            .indexes
            .iter()
            .find(|i| i.fields.contains(&self.name))
        {
            return Err(MigrationError::InvalidStateTransition(format!(
                "Field {}.{} is used by index '{}'; remove the index first",
                model.label(),
                self.name,
                index.name
            )));
        }
        model.fields.retain(|(name, _)| name != &self.name);
        let name = &self.name;
        model.options.unique_together.retain(|g| !g.contains(name));
        model.options.index_together.retain(|g| !g.contains(name));
        Ok(())
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()> {
        let original = prior.require_model(app_label, &self.model_name)?;
        let position = original.field_index(&self.name).ok_or_else(|| {
            MigrationError::InvalidStateTransition(format!(
                "Model {} had no field named '{}'",
                original.label(),
                self.name
            ))
        })?;
        let field = original.fields[position].clone();
        let options = original.options.clone();

        let model = state.require_model_mut(app_label, &self.model_name)?;
        model.fields.insert(position.min(model.fields.len()), field);
        model.options.unique_together = options.unique_together;
        model.options.index_together = options.index_together;
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let field = render_model(from_state, app_label, &self.model_name)?
            .require_field(&self.name)?
            .clone();
        let model = render_model(to_state, app_label, &self.model_name)?;
        schema_editor.remove_field(&model, &field)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        _from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let model = render_model(to_state, app_label, &self.model_name)?;
        let field = model.require_field(&self.name)?;
        schema_editor.add_field(&model, field)
    }

    fn check_reversible(&self, app_label: &str, to_state: &ProjectState) -> MigrationResult<()> {
        let field = to_state
            .require_model(app_label, &self.model_name)?
            .require_field(&self.name)?;
        if field.null || field.has_default() || field.kind.is_auto() {
            Ok(())
        } else {
            Err(MigrationError::Irreversible(format!(
                "{}: field is NOT NULL without a default, so existing rows cannot be refilled",
                self.describe()
            )))
        }
    }
}

/// Changes the definition of an existing field.
#[derive(Debug, Clone)]
pub struct AlterField {
    pub model_name: String,
    pub name: String,
    pub field: FieldSpec,
    pub preserve_default: bool,
}

impl AlterField {
    pub fn new(model_name: impl Into<String>, name: impl Into<String>, field: FieldSpec) -> Self {
        Self {
            model_name: model_name.into(),
            name: name.into(),
            field,
            preserve_default: true,
        }
    }

    /// Uses the default only to fill NULLs in existing rows.
    pub fn one_off_default(mut self) -> Self {
        self.preserve_default = false;
        self
    }
}

impl Operation for AlterField {
    fn describe(&self) -> String {
        format!("Alter field {} on {}", self.name, self.model_name)
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        let model = state.require_model_mut(app_label, &self.model_name)?;
        let label = model.label();
        let field = model.get_field_mut(&self.name).ok_or_else(|| {
            MigrationError::InvalidStateTransition(format!(
                "Model {label} has no field named '{}'",
                self.name
            ))
        })?;
        *field = self.field.clone();
        if !self.preserve_default {
            field.default = None;
        }
        Ok(())
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        prior: &ProjectState,
    ) -> MigrationResult<()> {
        let original = prior
            .require_model(app_label, &self.model_name)?
            .require_field(&self.name)?
            .clone();
        let model = state.require_model_mut(app_label, &self.model_name)?;
        let label = model.label();
        let field = model.get_field_mut(&self.name).ok_or_else(|| {
            MigrationError::InvalidStateTransition(format!(
                "Model {label} has no field named '{}'",
                self.name
            ))
        })?;
        *field = original;
        Ok(())
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let old_field = render_model(from_state, app_label, &self.model_name)?
            .require_field(&self.name)?
            .clone();
        let model = render_model(to_state, app_label, &self.model_name)?;
        let mut new_field = model.require_field(&self.name)?.clone();
        if !self.preserve_default {
            new_field.spec.default.clone_from(&self.field.default);
        }
        schema_editor.alter_field(&model, &old_field, &new_field)
    }

    fn database_backwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        let newer_field = render_model(from_state, app_label, &self.model_name)?
            .require_field(&self.name)?
            .clone();
        let model = render_model(to_state, app_label, &self.model_name)?;
        let older_field = model.require_field(&self.name)?;
        schema_editor.alter_field(&model, &newer_field, older_field)
    }
}

/// Renames a field. Columns follow the field name unless `db_column` pins them.
#[derive(Debug, Clone)]
pub struct RenameField {
    pub model_name: String,
    pub old_name: String,
    pub new_name: String,
}

impl RenameField {
    pub fn new(
        model_name: impl Into<String>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            old_name: old_name.into(),
            new_name: new_name.into(),
        }
    }
}

/// Renames the column of `from_name` (in `from_state`) to that of `to_name`
/// (in `to_state`).
fn rename_column_between(
    app_label: &str,
    model_name: &str,
    schema_editor: &mut dyn SchemaEditor,
    (from_state, from_name): (&ProjectState, &str),
    (to_state, to_name): (&ProjectState, &str),
) -> MigrationResult<()> {
    let old_field = render_model(from_state, app_label, model_name)?
        .require_field(from_name)?
        .clone();
    let model = render_model(to_state, app_label, model_name)?;
    let new_field = model.require_field(to_name)?;
    schema_editor.rename_field(&model, &old_field, new_field)
}

impl Operation for RenameField {
    fn describe(&self) -> String {
        format!(
            "Rename field {} on {} to {}",
            self.old_name, self.model_name, self.new_name
        )
    }

    fn state_forwards(&self, app_label: &str, state: &mut ProjectState) -> MigrationResult<()> {
        state
            .require_model_mut(app_label, &self.model_name)?
            .rename_field(&self.old_name, &self.new_name)
    }

    fn state_backwards(
        &self,
        app_label: &str,
        state: &mut ProjectState,
        _prior: &ProjectState,
    ) -> MigrationResult<()> {
        state
            .require_model_mut(app_label, &self.model_name)?
            .rename_field(&self.new_name, &self.old_name)
    }

    fn database_forwards(
        &self,
        app_label: &str,
        schema_editor: &mut dyn SchemaEditor,
        from_state: &ProjectState,
        to_state: &ProjectState,
    ) -> MigrationResult<()> {
        rename_column_between(
            app_label,
            &self.model_name,
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
        rename_column_between(
            app_label,
            &self.model_name,
            schema_editor,
            (from_state, &self.new_name),
            (to_state, &self.old_name),
        )
    }
}
