//! Resource field metadata and type coercion
//!
//! A [`ResourceFields`] list tells the filter and sort engines which logical
//! names exist on a resource and how query values should be coerced before
//! they reach a storage adapter. An empty list means the resource is untyped:
//! every declared name resolves and values pass through unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use std::str::FromStr;

/// Scalar type of a resource field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    #[default]
    Any,
}

impl FieldType {
    /// Coerce a JSON value into this type
    ///
    /// Query strings carry everything as text, so numeric and boolean fields
    /// accept their string spellings. `null` passes for every type.
    ///
    /// ```rust
    /// use rest_resource::fields::FieldType;
    /// use serde_json::json;
    ///
    /// assert_eq!(FieldType::Integer.coerce(&json!("42")).unwrap(), json!(42));
    /// assert!(FieldType::Integer.coerce(&json!("forty")).is_err());
    /// ```
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            FieldType::Any => Ok(value.clone()),

            FieldType::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                _ => Err("Not a valid string.".to_string()),
            },

            FieldType::Integer => {
                let invalid = || "Not a valid integer.".to_string();
                match value {
                    Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                    Value::Number(n) => match n.as_f64() {
                        // i64::MAX rounds up to 2^63 as f64, so the upper bound is exclusive
                        Some(f)
                            if f.fract() == 0.0
                                && f >= i64::MIN as f64
                                && f < i64::MAX as f64 =>
                        {
                            Ok(Value::from(f as i64))
                        }
                        _ => Err(invalid()),
                    },
                    Value::String(s) => s
                        .trim()
                        .parse::<i64>()
                        .map(Value::from)
                        .map_err(|_| invalid()),
                    _ => Err(invalid()),
                }
            }

            FieldType::Float => {
                let invalid = || "Not a valid number.".to_string();
                let parsed = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                parsed
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(invalid)
            }

            FieldType::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::Number(n) => match n.as_i64() {
                    Some(0) => Ok(Value::Bool(false)),
                    Some(1) => Ok(Value::Bool(true)),
                    _ => Err("Not a valid boolean.".to_string()),
                },
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "t" | "yes" | "y" | "on" | "1" => Ok(Value::Bool(true)),
                    "false" | "f" | "no" | "n" | "off" | "0" => Ok(Value::Bool(false)),
                    _ => Err("Not a valid boolean.".to_string()),
                },
                _ => Err("Not a valid boolean.".to_string()),
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Any => "any",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "string" | "str" => Ok(FieldType::String),
            "integer" | "int" => Ok(FieldType::Integer),
            "float" | "number" => Ok(FieldType::Float),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "any" => Ok(FieldType::Any),
            other => Err(format!("unknown field type: {}", other)),
        }
    }
}

/// One field of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Logical name used in payloads and query parameters
    pub name: String,

    /// Value type
    #[serde(default)]
    pub kind: FieldType,

    /// Whether a full (non-partial) load must carry this field
    #[serde(default)]
    pub required: bool,

    /// Backend attribute the name maps to
    pub attribute: String,
}

impl FieldDef {
    /// Create a field whose attribute equals its name
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        let name = name.into();
        Self {
            attribute: name.clone(),
            name,
            kind,
            required: false,
        }
    }

    /// Mark the field as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Map the field onto a differently named backend attribute
    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = attribute.into();
        self
    }
}

/// Ordered field list of a resource
///
/// ```rust
/// use rest_resource::fields::{FieldDef, FieldType, ResourceFields};
///
/// let fields = ResourceFields::new()
///     .field(FieldDef::new("name", FieldType::String).required())
///     .field(FieldDef::new("age", FieldType::Integer));
///
/// assert!(fields.is_typed());
/// assert_eq!(fields.get("age").unwrap().kind, FieldType::Integer);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceFields {
    fields: Vec<FieldDef>,
}

impl ResourceFields {
    /// Empty (untyped) field list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field; a field with the same name is replaced in place
    pub fn field(mut self, def: FieldDef) -> Self {
        match self.fields.iter_mut().find(|f| f.name == def.name) {
            Some(existing) => *existing = def,
            None => self.fields.push(def),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether any field is declared
    pub fn is_typed(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<FieldDef> for ResourceFields {
    fn from_iter<I: IntoIterator<Item = FieldDef>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), Self::field)
    }
}
