//! Administrator-defined extra fields on patients, appointments and medications.
//!
//! Definitions live in `custom_fields` under an id derived from `(entity, key)`, which makes
//! each key unique per entity. Entities carry their values in a `custom` map that is checked
//! against the active definitions on every write.

use crate::constants::{CUSTOM_FIELDS, CUSTOM_FIELD_ID_SCOPE};
use crate::store::{Collection, DocumentStore, Entity, Query, Stored};
use crate::validation::{required_text, validate_key};
use crate::{HmsError, HmsResult};
use chrono::NaiveDate;
use hms_types::NonEmptyText;
use hms_uuid::DocumentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

/// Values of custom fields, keyed by definition key.
pub type CustomValues = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CustomFieldEntity {
    Patient,
    Appointment,
    Medication,
}

impl CustomFieldEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomFieldEntity::Patient => "patient",
            CustomFieldEntity::Appointment => "appointment",
            CustomFieldEntity::Medication => "medication",
        }
    }
}

impl fmt::Display for CustomFieldEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    /// ISO `YYYY-MM-DD`.
    Date,
    Boolean,
    /// One of the definition's `options`.
    Select,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CustomField {
    pub entity: CustomFieldEntity,
    pub key: String,
    #[schema(value_type = String)]
    pub label: NonEmptyText,
    pub field_type: FieldType,
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    pub active: bool,
}

impl Entity for CustomField {
    const COLLECTION: &'static str = CUSTOM_FIELDS;
    const NAME: &'static str = "custom field";
}

impl CustomField {
    /// Checks one value against this definition.
    fn check(&self, value: &Value) -> HmsResult<()> {
        let ok = match self.field_type {
            FieldType::Text => value.as_str().map(|s| !s.trim().is_empty()).unwrap_or(false),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Date => value
                .as_str()
                .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
                .unwrap_or(false),
            FieldType::Select => value
                .as_str()
                .map(|s| self.options.iter().any(|o| o == s))
                .unwrap_or(false),
        };

        if ok {
            Ok(())
        } else {
            Err(HmsError::invalid(format!(
                "custom field '{}' expects a {:?} value",
                self.key, self.field_type
            )))
        }
    }
}

fn field_id(entity: CustomFieldEntity, key: &str) -> DocumentId {
    DocumentId::derived(CUSTOM_FIELD_ID_SCOPE, &format!("{entity}:{key}"))
}

fn clean_options(field_type: FieldType, options: Vec<String>) -> HmsResult<Vec<String>> {
    let mut cleaned: Vec<String> = options
        .into_iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .collect();
    cleaned.dedup();

    match field_type {
        FieldType::Select if cleaned.is_empty() => Err(HmsError::invalid(
            "select fields need at least one option",
        )),
        FieldType::Select => Ok(cleaned),
        _ if !cleaned.is_empty() => Err(HmsError::invalid(
            "options are only allowed on select fields",
        )),
        _ => Ok(cleaned),
    }
}

#[derive(Clone, Debug, Deserialize, ToSchema)]
pub struct NewCustomField {
    pub entity: CustomFieldEntity,
    pub key: String,
    pub label: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

/// Entity, key and type are fixed once created.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct CustomFieldUpdate {
    pub label: Option<String>,
    pub required: Option<bool>,
    pub options: Option<Vec<String>>,
    pub active: Option<bool>,
}

#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CustomFieldQuery {
    pub entity: Option<CustomFieldEntity>,
}

#[derive(Clone, Debug)]
pub struct CustomFieldService {
    fields: Collection<CustomField>,
}

impl CustomFieldService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            fields: Collection::new(store),
        }
    }

    pub async fn list(&self, query: CustomFieldQuery) -> HmsResult<Vec<Stored<CustomField>>> {
        let mut q = Query::new().order(crate::store::Order::CreatedAsc);
        if let Some(entity) = query.entity {
            q = q.where_eq("entity", entity.as_str());
        }
        self.fields.all(q).await
    }

    pub async fn get(&self, id: &DocumentId) -> HmsResult<Stored<CustomField>> {
        self.fields.require(id).await
    }

    pub async fn create(&self, input: NewCustomField) -> HmsResult<Stored<CustomField>> {
        let key = input.key.trim().to_string();
        validate_key(&key)?;

        let field = CustomField {
            entity: input.entity,
            label: required_text("label", &input.label)?,
            field_type: input.field_type,
            required: input.required,
            options: clean_options(input.field_type, input.options)?,
            active: true,
            key,
        };

        let id = field_id(field.entity, &field.key);
        match self.fields.create_with_id(id, field.clone()).await {
            Ok(created) => {
                tracing::info!("created custom field {}.{}", field.entity, field.key);
                Ok(created)
            }
            Err(HmsError::AlreadyExists { .. }) => Err(HmsError::AlreadyExists {
                entity: "custom field",
                detail: format!("{} already has a field '{}'", field.entity, field.key),
            }),
            Err(e) => Err(e),
        }
    }

    pub async fn update(
        &self,
        id: &DocumentId,
        input: CustomFieldUpdate,
    ) -> HmsResult<Stored<CustomField>> {
        let label = input
            .label
            .as_deref()
            .map(|l| required_text("label", l))
            .transpose()?;

        self.fields
            .modify(id, |field| {
                if let Some(label) = &label {
                    field.label = label.clone();
                }
                if let Some(required) = input.required {
                    field.required = required;
                }
                if let Some(options) = &input.options {
                    field.options = clean_options(field.field_type, options.clone())?;
                }
                if let Some(active) = input.active {
                    field.active = active;
                }
                Ok(())
            })
            .await
    }

    /// Deleting a definition leaves stored values in place; they are dropped the next time
    /// the owning entity is updated (see [`CustomFieldService::merge_values`]).
    pub async fn delete(&self, id: &DocumentId) -> HmsResult<()> {
        if !self.fields.delete(id).await? {
            return Err(HmsError::not_found(CustomField::NAME, id));
        }
        Ok(())
    }

    async fn definitions(&self, entity: CustomFieldEntity) -> HmsResult<Vec<Stored<CustomField>>> {
        self.list(CustomFieldQuery {
            entity: Some(entity),
        })
        .await
    }

    /// Validates and normalises `values` for a new entity. Nulls are removed.
    pub async fn validate_values(
        &self,
        entity: CustomFieldEntity,
        values: &mut CustomValues,
    ) -> HmsResult<()> {
        let definitions = self.definitions(entity).await?;
        values.retain(|_, v| !v.is_null());
        check_values(entity, &definitions, values)
    }

    /// Applies `changes` to an entity's existing values and validates the result.
    ///
    /// A `null` change removes the key. Existing values whose definition was deleted or
    /// deactivated are dropped instead of failing the write.
    pub async fn merge_values(
        &self,
        entity: CustomFieldEntity,
        existing: &CustomValues,
        changes: CustomValues,
    ) -> HmsResult<CustomValues> {
        self.prepare_merge(entity, changes).await?.apply(existing)
    }

    /// Loads the definitions for `entity`. The returned merge can be applied to any
    /// revision of the owning document, including inside a `modify` retry.
    pub async fn prepare_merge(
        &self,
        entity: CustomFieldEntity,
        changes: CustomValues,
    ) -> HmsResult<CustomMerge> {
        Ok(CustomMerge {
            entity,
            definitions: self.definitions(entity).await?,
            changes,
        })
    }
}

/// Pending custom value changes with the definitions they are checked against.
#[derive(Clone, Debug)]
pub struct CustomMerge {
    entity: CustomFieldEntity,
    definitions: Vec<Stored<CustomField>>,
    changes: CustomValues,
}

impl CustomMerge {
    pub fn apply(&self, existing: &CustomValues) -> HmsResult<CustomValues> {
        let mut merged: CustomValues = existing
            .iter()
            .filter(|(key, _)| {
                self.definitions
                    .iter()
                    .any(|d| d.data.active && d.data.key == **key)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (key, value) in &self.changes {
            if value.is_null() {
                merged.remove(key);
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }

        check_values(self.entity, &self.definitions, &merged)?;
        Ok(merged)
    }
}

/// Unknown keys, inactive keys, type mismatches and missing required keys are all
/// `InvalidInput`.
fn check_values(
    entity: CustomFieldEntity,
    definitions: &[Stored<CustomField>],
    values: &CustomValues,
) -> HmsResult<()> {
    let by_key: BTreeMap<&str, &CustomField> = definitions
        .iter()
        .map(|d| (d.data.key.as_str(), &d.data))
        .collect();

    for (key, value) in values.iter() {
        match by_key.get(key.as_str()) {
            Some(def) if def.active => def.check(value)?,
            Some(_) => {
                return Err(HmsError::invalid(format!(
                    "custom field '{key}' is no longer active"
                )))
            }
            None => {
                return Err(HmsError::invalid(format!(
                    "unknown custom field '{key}' for {entity}"
                )))
            }
        }
    }

    for def in by_key.values() {
        if def.active && def.required && !values.contains_key(&def.key) {
            return Err(HmsError::invalid(format!(
                "custom field '{}' is required",
                def.key
            )));
        }
    }

    Ok(())
}
