//! Historical model registry.
//!
//! A [`Registry`] is a rendered, read-only view of a [`ProjectState`]: every
//! lazy reference (relation targets, model bases) is resolved to a concrete
//! model, and every field carries its column name. Schema editors and Rust
//! data migrations work against these historical models, never against the
//! application's current model definitions.
//!
//! Rendering is pure. A state whose references cannot be resolved fails to
//! render with [`MigrationError::InvalidStateTransition`].

use std::collections::{BTreeMap, HashSet};

use strata_core::{MigrationError, MigrationResult};

use crate::state::{
    model_key, resolve_reference, FieldSpec, ModelBase, ModelKey, ModelOptions, ProjectState,
};

/// The resolved target of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationTarget {
    pub model: ModelKey,
    pub table: String,
    pub column: String,
}

/// A field of a historical model.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalField {
    pub name: String,
    pub column: String,
    /// The table the column lived in when this field was rendered.
    pub table: String,
    pub spec: FieldSpec,
    /// Present for relational fields.
    pub target: Option<RelationTarget>,
}

/// A model rendered from a project state.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalModel {
    pub app_label: String,
    pub name: String,
    pub db_table: String,
    pub fields: Vec<HistoricalField>,
    /// Resolved model bases, nearest first.
    pub bases: Vec<ModelKey>,
    pub options: ModelOptions,
}

impl HistoricalModel {
    pub fn key(&self) -> ModelKey {
        model_key(&self.app_label, &self.name)
    }

    /// Returns `app.Name`.
    pub fn label(&self) -> String {
        format!("{}.{}", self.app_label, self.name)
    }

    pub fn get_field(&self, name: &str) -> Option<&HistoricalField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn require_field(&self, name: &str) -> MigrationResult<&HistoricalField> {
        self.get_field(name).ok_or_else(|| {
            MigrationError::InvalidStateTransition(format!(
                "Model {} has no field named '{name}'",
                self.label()
            ))
        })
    }

    /// Returns the column for a field name, falling back to the name itself.
    pub fn column_for(&self, field_name: &str) -> String {
        self.get_field(field_name)
            .map_or_else(|| field_name.to_string(), |f| f.column.clone())
    }

    /// Returns the primary key column, `id` when none is declared.
    pub fn pk_column(&self) -> String {
        self.fields
            .iter()
            .find(|f| f.spec.primary_key)
            .map_or_else(|| "id".to_string(), |f| f.column.clone())
    }
}

/// All historical models of one project state.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    models: BTreeMap<ModelKey, HistoricalModel>,
}

impl Registry {
    /// Renders a project state, resolving every lazy reference.
    pub fn from_state(state: &ProjectState) -> MigrationResult<Self> {
        let mut bases: BTreeMap<ModelKey, Vec<ModelKey>> = BTreeMap::new();
        for model in state.models() {
            let mut resolved = Vec::new();
            for base in &model.bases {
                if let ModelBase::Model(reference) = base {
                    let key = resolve_reference(reference, &model.app_label);
                    if !state.contains_model(&key.0, &key.1) {
                        return Err(MigrationError::InvalidStateTransition(format!(
                            "Model {} has base '{reference}' which is not in the project state",
                            model.label()
                        )));
                    }
                    resolved.push(key);
                }
            }
            bases.insert(model.key(), resolved);
        }
        check_base_cycles(&bases)?;

        let mut models = BTreeMap::new();
        for model in state.models() {
            let mut fields = Vec::with_capacity(model.fields.len());
            for (name, spec) in &model.fields {
                let target = match spec.kind.related_model() {
                    Some(reference) => {
                        let key = resolve_reference(reference, &model.app_label);
                        let target = state.get_model(&key.0, &key.1).ok_or_else(|| {
                            MigrationError::InvalidStateTransition(format!(
                                "Field {}.{name} references unknown model '{reference}'",
                                model.label()
                            ))
                        })?;
                        let column = target
                            .fields
                            .iter()
                            .find(|(_, f)| f.primary_key)
                            .map_or_else(|| "id".to_string(), |(n, f)| f.column(n));
                        Some(RelationTarget {
                            model: key,
                            table: target.db_table(),
                            column,
                        })
                    }
                    None => None,
                };
                fields.push(HistoricalField {
                    name: name.clone(),
                    column: spec.column(name),
                    table: model.db_table(),
                    spec: spec.clone(),
                    target,
                });
            }
            let key = model.key();
            let model_bases = bases.remove(&key).unwrap_or_default();
            models.insert(
                key,
                HistoricalModel {
                    app_label: model.app_label.clone(),
                    name: model.name.clone(),
                    db_table: model.db_table(),
                    fields,
                    bases: model_bases,
                    options: model.options.clone(),
                },
            );
        }
        Ok(Self { models })
    }

    /// Returns a historical model, or an [`MigrationError::InvalidStateTransition`].
    pub fn get_model(&self, app_label: &str, name: &str) -> MigrationResult<&HistoricalModel> {
        self.models.get(&model_key(app_label, name)).ok_or_else(|| {
            MigrationError::InvalidStateTransition(format!(
                "No model named '{name}' in app '{app_label}'"
            ))
        })
    }

    pub fn models(&self) -> impl Iterator<Item = &HistoricalModel> {
        self.models.values()
    }

    /// Returns every relational field, across all models, pointing at the
    /// given model.
    pub fn related_fields(
        &self,
        app_label: &str,
        name: &str,
    ) -> Vec<(&HistoricalModel, &HistoricalField)> {
        let key = model_key(app_label, name);
        self.models
            .values()
            .flat_map(|model| model.fields.iter().map(move |field| (model, field)))
            .filter(|(_, field)| field.target.as_ref().is_some_and(|t| t.model == key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn check_base_cycles(bases: &BTreeMap<ModelKey, Vec<ModelKey>>) -> MigrationResult<()> {
    fn visit(
        key: &ModelKey,
        bases: &BTreeMap<ModelKey, Vec<ModelKey>>,
        path: &mut Vec<ModelKey>,
        done: &mut HashSet<ModelKey>,
    ) -> MigrationResult<()> {
        if done.contains(key) {
            return Ok(());
        }
        if path.contains(key) {
            let chain: Vec<String> = path.iter().map(|(a, m)| format!("{a}.{m}")).collect();
            return Err(MigrationError::InvalidStateTransition(format!(
                "Model bases form a cycle: {} -> {}.{}",
                chain.join(" -> "),
                key.0,
                key.1
            )));
        }
        path.push(key.clone());
        for parent in bases.get(key).into_iter().flatten() {
            visit(parent, bases, path, done)?;
        }
        path.pop();
        done.insert(key.clone());
        Ok(())
    }

    let mut done = HashSet::new();
    for key in bases.keys() {
        visit(key, bases, &mut Vec::new(), &mut done)?;
    }
    Ok(())
}
