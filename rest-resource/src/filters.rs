//! Filter engine
//!
//! The `where` query parameter carries a JSON object keyed by logical filter
//! names. Each value is either a bare literal (compared with the filter's
//! default operator) or an object of operators:
//!
//! ```text
//! where={"name": "Tom", "age": {"$ge": 2, "$lt": 10}, "kind": {"$in": ["cat", "dog"]}}
//! ```
//!
//! Operators under one name are ANDed; `$or` takes a list of literals or
//! operator objects and ORs them. Declared filters run in declaration order,
//! each narrowing the collection returned by the previous one.
//!
//! A `where` value that is not a JSON object is ignored with a warning and the
//! listing stays unfiltered. Keys that name no declared filter are ignored.
//! For a declared filter, an unknown operator, a badly shaped operand or a
//! value that fails type coercion is a `400 Bad Request`.

use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::fields::{FieldDef, FieldType};
use crate::mutate::{Mutate, Mutation, Mutator};
use crate::request::RestRequest;
use crate::storage::Storage;

/// Query parameter carrying the filter expression
pub const WHERE_PARAM: &str = "where";

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `$eq`, `==`
    Eq,
    /// `$ne`, `!=`
    Ne,
    /// `$lt`, `<`
    Lt,
    /// `$le`, `<=`
    Le,
    /// `$gt`, `>`
    Gt,
    /// `$ge`, `>=`
    Ge,
    /// `$in`
    In,
    /// `$nin`
    NotIn,
    /// `$between`, inclusive on both ends
    Between,
    /// `$starts`
    Starts,
    /// `$ends`
    Ends,
    /// `$contains`
    Contains,
    /// `$like`, SQL LIKE pattern
    Like,
    /// `$ilike`, case-insensitive LIKE
    ILike,
    /// `$regexp`
    Regexp,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Lt => "$lt",
            Operator::Le => "$le",
            Operator::Gt => "$gt",
            Operator::Ge => "$ge",
            Operator::In => "$in",
            Operator::NotIn => "$nin",
            Operator::Between => "$between",
            Operator::Starts => "$starts",
            Operator::Ends => "$ends",
            Operator::Contains => "$contains",
            Operator::Like => "$like",
            Operator::ILike => "$ilike",
            Operator::Regexp => "$regexp",
        }
    }

    /// Operators whose operand is matched as text
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            Operator::Starts | Operator::Ends | Operator::Like | Operator::ILike | Operator::Regexp
        )
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let op = match s {
            "$eq" | "==" => Operator::Eq,
            "$ne" | "!=" => Operator::Ne,
            "$lt" | "<" => Operator::Lt,
            "$le" | "<=" => Operator::Le,
            "$gt" | ">" => Operator::Gt,
            "$ge" | ">=" => Operator::Ge,
            "$in" => Operator::In,
            "$nin" => Operator::NotIn,
            "$between" => Operator::Between,
            "$starts" => Operator::Starts,
            "$ends" => Operator::Ends,
            "$contains" => Operator::Contains,
            "$like" => Operator::Like,
            "$ilike" => Operator::ILike,
            "$regexp" => Operator::Regexp,
            other => {
                return Err(Error::bad_request(format!(
                    "Unsupported filter operator: {}",
                    other
                )))
            }
        };
        Ok(op)
    }
}

const OR_KEY: &str = "$or";
const ALIASES: [&str; 6] = ["==", "!=", "<", "<=", ">", ">="];

fn is_operator_key(key: &str) -> bool {
    key.starts_with('$') || ALIASES.contains(&key)
}

/// Parsed filter condition handed to a storage adapter
///
/// A slice of predicates passed to [`Storage::filter`] is ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Compare the filter's attribute with a coerced operand
    ///
    /// `In`/`NotIn` carry an array, `Between` a two-element array.
    Compare { op: Operator, value: Value },
    /// Any of the nested predicates holds
    Or(Vec<Predicate>),
    /// All of the nested predicates hold
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(op: Operator, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            op,
            value: value.into(),
        }
    }
}

/// A declared filter over one attribute
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    mutation: Mutation,
    kind: FieldType,
    default_operator: Operator,
}

impl Filter {
    /// Untyped equality filter whose attribute equals its name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            mutation: Mutation::new(name),
            kind: FieldType::Any,
            default_operator: Operator::Eq,
        }
    }

    /// Backend attribute to filter on
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.mutation.field = field.into();
        self
    }

    /// Value type used to coerce operands
    pub fn kind(mut self, kind: FieldType) -> Self {
        self.kind = kind;
        self
    }

    /// Operator applied to bare literals
    pub fn operator(mut self, op: Operator) -> Self {
        self.default_operator = op;
        self
    }

    pub fn name(&self) -> &str {
        &self.mutation.name
    }

    pub fn attribute(&self) -> &str {
        &self.mutation.field
    }

    pub fn field_type(&self) -> FieldType {
        self.kind
    }

    pub fn default_operator(&self) -> Operator {
        self.default_operator
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Parse the raw `where` value for this filter into predicates
    pub fn parse(&self, raw: &Value) -> Result<Vec<Predicate>> {
        match raw {
            Value::Object(ops) if ops.keys().any(|k| is_operator_key(k)) => ops
                .iter()
                .map(|(key, operand)| self.parse_entry(key, operand))
                .collect(),
            literal => Ok(vec![self.compare(self.default_operator, literal)?]),
        }
    }

    fn parse_entry(&self, key: &str, operand: &Value) -> Result<Predicate> {
        if key != OR_KEY {
            return self.compare(key.parse()?, operand);
        }

        let Value::Array(options) = operand else {
            return Err(self.invalid("$or expects a list"));
        };

        options
            .iter()
            .map(|option| {
                let mut parsed = self.parse(option)?;
                Ok(if parsed.len() == 1 {
                    parsed.remove(0)
                } else {
                    Predicate::And(parsed)
                })
            })
            .collect::<Result<Vec<_>>>()
            .map(Predicate::Or)
    }

    fn compare(&self, op: Operator, operand: &Value) -> Result<Predicate> {
        let value = match op {
            Operator::In | Operator::NotIn => match operand {
                Value::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| self.coerce(item))
                        .collect::<Result<_>>()?,
                ),
                _ => return Err(self.invalid(&format!("{} expects a list", op))),
            },
            Operator::Between => match operand {
                Value::Array(items) if items.len() == 2 => Value::Array(vec![
                    self.coerce(&items[0])?,
                    self.coerce(&items[1])?,
                ]),
                _ => return Err(self.invalid("$between expects a list of two values")),
            },
            op if op.is_textual() => match operand {
                Value::String(_) => operand.clone(),
                _ => return Err(self.invalid(&format!("{} expects a string", op))),
            },
            Operator::Contains => operand.clone(),
            _ => self.coerce(operand)?,
        };
        Ok(Predicate::Compare { op, value })
    }

    fn coerce(&self, value: &Value) -> Result<Value> {
        self.kind.coerce(value).map_err(|msg| self.invalid(&msg))
    }

    fn invalid(&self, message: &str) -> Error {
        Error::bad_request(format!("Invalid filter '{}': {}", self.name(), message))
    }
}

impl Mutate for Filter {
    fn name(&self) -> &str {
        &self.mutation.name
    }

    fn from_mutation(mutation: Mutation, field: Option<&FieldDef>) -> Option<Self> {
        let default_operator = match mutation.meta_str("operator") {
            Some(raw) => match raw.parse() {
                Ok(op) => op,
                Err(_) => {
                    tracing::warn!(filter = %mutation.name, operator = raw, "Skipping filter with an unknown operator");
                    return None;
                }
            },
            None => Operator::Eq,
        };

        let kind = match mutation.meta_str("type") {
            Some(raw) => match raw.parse() {
                Ok(kind) => kind,
                Err(err) => {
                    tracing::warn!(filter = %mutation.name, "Skipping filter: {}", err);
                    return None;
                }
            },
            None => field.map(|def| def.kind).unwrap_or_default(),
        };

        Some(Self {
            mutation,
            kind,
            default_operator,
        })
    }
}

/// Filters declared for one resource
pub type Filters = Mutator<Filter>;

impl Mutator<Filter> {
    /// Narrow `collection` by the request's `where` parameter
    pub async fn apply<S: Storage>(
        &self,
        storage: &S,
        request: &RestRequest,
        mut collection: S::Collection,
    ) -> Result<S::Collection> {
        if self.is_empty() {
            return Ok(collection);
        }

        let Some(data) = Self::where_object(request) else {
            return Ok(collection);
        };

        for filter in self.iter() {
            let Some(raw) = data.get(filter.name()) else {
                continue;
            };
            let predicates = filter.parse(raw)?;
            if predicates.is_empty() {
                continue;
            }
            tracing::debug!(filter = filter.name(), ?predicates, "Applying filter");
            collection = storage.filter(collection, filter, &predicates).await?;
        }

        Ok(collection)
    }

    fn where_object(request: &RestRequest) -> Option<Map<String, Value>> {
        let raw = request.query().get(WHERE_PARAM)?;
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(data)) => Some(data),
            Ok(_) => {
                tracing::warn!(value = raw, "Ignoring non-object where parameter");
                None
            }
            Err(err) => {
                tracing::warn!(value = raw, error = %err, "Ignoring malformed where parameter");
                None
            }
        }
    }
}
