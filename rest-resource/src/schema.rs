//! Serialization capability
//!
//! A [`Schema`] validates inbound payloads into resources and renders
//! resources back to JSON. Two stock schemas are provided:
//!
//! - [`FieldsSchema`] for JSON-record resources described by [`ResourceFields`]
//! - [`SerdeSchema`] for resources that are plain serde types
//!
//! [`FieldSelection`] implements the `schema_only` / `schema_exclude` query
//! parameters on top of any schema's output.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;

use crate::error::{Error, Result, ValidationErrors};
use crate::fields::ResourceFields;
use crate::request::QueryParams;

/// Key used for errors that concern the payload as a whole
pub const SCHEMA_ERROR_KEY: &str = "_schema";

/// How a payload is being loaded
#[derive(Debug)]
pub struct LoadContext<'a, R> {
    /// Missing required fields are allowed
    pub partial: bool,

    /// Existing resource the payload updates
    pub instance: Option<&'a R>,
}

impl<R> Clone for LoadContext<'_, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for LoadContext<'_, R> {}

impl<R> Default for LoadContext<'_, R> {
    fn default() -> Self {
        Self {
            partial: false,
            instance: None,
        }
    }
}

/// Validates payloads into resources and renders resources as JSON
pub trait Schema<R>: Send + Sync {
    /// Validate one payload
    fn load(&self, raw: Value, ctx: LoadContext<'_, R>) -> std::result::Result<R, ValidationErrors>;

    /// Render one resource
    fn dump(&self, resource: &R) -> Result<Value>;

    /// Validate a batch; errors are keyed by the failing item's index
    fn load_many(
        &self,
        raw: Vec<Value>,
        partial: bool,
    ) -> std::result::Result<Vec<R>, ValidationErrors> {
        let mut loaded = Vec::with_capacity(raw.len());
        let mut errors = ValidationErrors::new();
        for (index, item) in raw.into_iter().enumerate() {
            let ctx = LoadContext {
                partial,
                instance: None,
            };
            match self.load(item, ctx) {
                Ok(resource) => loaded.push(resource),
                Err(item_errors) => errors.nest(index.to_string(), item_errors),
            }
        }
        if errors.is_empty() {
            Ok(loaded)
        } else {
            Err(errors)
        }
    }

    /// Render a batch
    fn dump_many(&self, resources: &[R]) -> Result<Vec<Value>> {
        resources.iter().map(|r| self.dump(r)).collect()
    }
}

fn invalid_input() -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    errors.add(SCHEMA_ERROR_KEY, "Invalid input type.");
    errors
}

/// Schema for JSON-object resources driven by field metadata
///
/// Declared fields are coerced to their type and unknown keys are dropped.
/// With no declared fields any object is accepted as is. Loading onto an
/// instance merges the payload over the instance's keys.
#[derive(Debug, Clone, Default)]
pub struct FieldsSchema {
    fields: ResourceFields,
}

impl FieldsSchema {
    pub fn new(fields: ResourceFields) -> Self {
        Self { fields }
    }
}

impl Schema<Value> for FieldsSchema {
    fn load(
        &self,
        raw: Value,
        ctx: LoadContext<'_, Value>,
    ) -> std::result::Result<Value, ValidationErrors> {
        let Value::Object(payload) = raw else {
            return Err(invalid_input());
        };

        let mut record = match ctx.instance {
            Some(Value::Object(existing)) => existing.clone(),
            _ => Map::new(),
        };

        if !self.fields.is_typed() {
            record.extend(payload);
            return Ok(Value::Object(record));
        }

        let mut errors = ValidationErrors::new();
        for def in self.fields.iter() {
            match payload.get(&def.name) {
                Some(value) => match def.kind.coerce(value) {
                    Ok(value) => {
                        record.insert(def.name.clone(), value);
                    }
                    Err(message) => errors.add(def.name.as_str(), message),
                },
                None if def.required && !ctx.partial => {
                    errors.add(def.name.as_str(), "Missing data for required field.")
                }
                None => {}
            }
        }

        if errors.is_empty() {
            Ok(Value::Object(record))
        } else {
            Err(errors)
        }
    }

    fn dump(&self, resource: &Value) -> Result<Value> {
        Ok(resource.clone())
    }
}

/// Schema for serde types
///
/// ```rust
/// use rest_resource::schema::{LoadContext, Schema, SerdeSchema};
/// use serde::{Deserialize, Serialize};
/// use serde_json::json;
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct Pet {
///     id: Option<u64>,
///     name: String,
/// }
///
/// let schema = SerdeSchema::<Pet>::new();
/// let pet = schema.load(json!({"name": "Tom"}), LoadContext::default()).unwrap();
/// assert_eq!(schema.dump(&pet).unwrap(), json!({"id": null, "name": "Tom"}));
/// ```
pub struct SerdeSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeSchema<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Schema<T> for SerdeSchema<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self, raw: Value, ctx: LoadContext<'_, T>) -> std::result::Result<T, ValidationErrors> {
        let raw = match (ctx.instance, raw) {
            (Some(instance), Value::Object(payload)) if ctx.partial => {
                match serde_json::to_value(instance) {
                    Ok(Value::Object(mut merged)) => {
                        merged.extend(payload);
                        Value::Object(merged)
                    }
                    _ => Value::Object(payload),
                }
            }
            (_, raw) => raw,
        };

        serde_json::from_value(raw).map_err(|e| {
            let mut errors = ValidationErrors::new();
            errors.add(SCHEMA_ERROR_KEY, e.to_string());
            errors
        })
    }

    fn dump(&self, resource: &T) -> Result<Value> {
        serde_json::to_value(resource)
            .map_err(|e| Error::Internal(format!("Failed to serialize resource: {}", e)))
    }
}

/// Top-level key projection from `schema_only` / `schema_exclude`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSelection {
    only: Option<Vec<String>>,
    exclude: Vec<String>,
}

impl FieldSelection {
    pub const ONLY_PARAM: &'static str = "schema_only";
    pub const EXCLUDE_PARAM: &'static str = "schema_exclude";

    pub fn from_query(query: &QueryParams) -> Self {
        let split = |raw: &str| -> Vec<String> {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        };
        Self {
            only: query.get(Self::ONLY_PARAM).map(split),
            exclude: query.get(Self::EXCLUDE_PARAM).map(split).unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.only.is_none() && self.exclude.is_empty()
    }

    /// Project an object, or every object of an array
    pub fn apply(&self, value: Value) -> Value {
        if self.is_empty() {
            return value;
        }
        match value {
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.apply(v)).collect()),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .filter(|(key, _)| self.keeps(key))
                    .collect(),
            ),
            other => other,
        }
    }

    fn keeps(&self, key: &str) -> bool {
        let included = match &self.only {
            Some(only) => only.iter().any(|k| k == key),
            None => true,
        };
        included && !self.exclude.iter().any(|k| k == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldDef, FieldType};
    use serde::Deserialize;
    use serde_json::json;

    fn pets() -> FieldsSchema {
        FieldsSchema::new(
            ResourceFields::new()
                .field(FieldDef::new("name", FieldType::String).required())
                .field(FieldDef::new("age", FieldType::Integer)),
        )
    }

    #[test]
    fn test_fields_schema_coerces_and_drops_unknown_keys() {
        let loaded = pets()
            .load(json!({"name": "Tom", "age": "3", "owner": "x"}), LoadContext::default())
            .unwrap();
        assert_eq!(loaded, json!({"name": "Tom", "age": 3}));
    }

    #[test]
    fn test_fields_schema_reports_missing_and_invalid() {
        let errors = pets()
            .load(json!({"age": "old"}), LoadContext::default())
            .unwrap_err();
        assert_eq!(errors.as_map()["name"], json!(["Missing data for required field."]));
        assert_eq!(errors.as_map()["age"], json!(["Not a valid integer."]));
    }

    #[test]
    fn test_fields_schema_partial_merges_onto_instance() {
        let instance = json!({"id": 1, "name": "Tom", "age": 3});
        let loaded = pets()
            .load(
                json!({"age": 4}),
                LoadContext {
                    partial: true,
                    instance: Some(&instance),
                },
            )
            .unwrap();
        assert_eq!(loaded, json!({"id": 1, "name": "Tom", "age": 4}));
    }

    #[test]
    fn test_non_object_payload_is_invalid() {
        let errors = pets().load(json!([1, 2]), LoadContext::default()).unwrap_err();
        assert!(errors.contains(SCHEMA_ERROR_KEY));
    }

    #[test]
    fn test_load_many_keys_errors_by_index() {
        let errors = pets()
            .load_many(vec![json!({"name": "Tom"}), json!({})], false)
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.as_map()["1"]["name"], json!(["Missing data for required field."]));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pet {
        id: u64,
        name: String,
    }

    #[test]
    fn test_serde_schema_partial_update() {
        let schema = SerdeSchema::<Pet>::new();
        let tom = Pet {
            id: 1,
            name: "Tom".into(),
        };
        let renamed = schema
            .load(
                json!({"name": "Jerry"}),
                LoadContext {
                    partial: true,
                    instance: Some(&tom),
                },
            )
            .unwrap();
        assert_eq!(renamed, Pet { id: 1, name: "Jerry".into() });

        let errors = schema.load(json!({"name": "Jerry"}), LoadContext::default()).unwrap_err();
        assert!(errors.contains(SCHEMA_ERROR_KEY));
    }

    #[test]
    fn test_field_selection() {
        let query: QueryParams = [("schema_only", "id,name"), ("schema_exclude", "name")]
            .into_iter()
            .collect();
        let selection = FieldSelection::from_query(&query);
        assert_eq!(
            selection.apply(json!([{"id": 1, "name": "Tom", "age": 3}])),
            json!([{"id": 1}])
        );
        assert!(FieldSelection::from_query(&QueryParams::default()).is_empty());
    }
}
