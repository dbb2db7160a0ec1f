//! In-memory storage adapter
//!
//! Keeps JSON records behind a [`tokio::sync::RwLock`]. Every request works
//! on a snapshot ([`MemoryQuery`]): filters narrow it eagerly, sort keys are
//! accumulated and applied as one stable multi-key sort when the query is
//! paginated or fetched.
//!
//! ```rust
//! use rest_resource::memory::MemoryStorage;
//! use serde_json::json;
//!
//! let storage = MemoryStorage::new()
//!     .with_name("pets")
//!     .with_records([json!({"name": "Tom"}), json!({"name": "Jerry"})]);
//! ```

use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::fields::ResourceFields;
use crate::filters::{Filter, Operator, Predicate};
use crate::request::RestRequest;
use crate::schema::{FieldsSchema, Schema};
use crate::sorting::{SortDirection, SortKey};
use crate::storage::{RemoveTarget, Storage};

/// Reads an attribute from a record
pub type Accessor = Arc<dyn Fn(&Value, &str) -> Option<Value> + Send + Sync>;

fn object_accessor(record: &Value, attribute: &str) -> Option<Value> {
    record.get(attribute).cloned()
}

struct State {
    records: Vec<Value>,
    next_id: u64,
}

/// JSON records kept in process memory
pub struct MemoryStorage {
    name: Option<String>,
    id_field: String,
    accessor: Accessor,
    state: RwLock<State>,
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("name", &self.name)
            .field("id_field", &self.id_field)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Empty storage keyed by `id`
    pub fn new() -> Self {
        Self {
            name: None,
            id_field: "id".to_string(),
            accessor: Arc::new(object_accessor),
            state: RwLock::new(State {
                records: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Resource name reported to the handler
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attribute holding the record id
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    /// Replace the attribute accessor
    ///
    /// Lets scalar collections be filtered and sorted, e.g.
    /// `with_accessor(|record, _| Some(record.clone()))`.
    pub fn with_accessor<F>(mut self, accessor: F) -> Self
    where
        F: Fn(&Value, &str) -> Option<Value> + Send + Sync + 'static,
    {
        self.accessor = Arc::new(accessor);
        self
    }

    /// Seed records; objects without an id get the next free one
    pub fn with_records<I>(mut self, records: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let state = self.state.get_mut();
        for record in records {
            if let Some(id) = numeric_id(&record, &self.id_field) {
                state.next_id = state.next_id.max(id + 1);
            }
            state.records.push(record);
        }

        for record in state.records.iter_mut() {
            if let Value::Object(map) = record {
                if map.get(&self.id_field).map_or(true, Value::is_null) {
                    map.insert(self.id_field.clone(), Value::from(state.next_id));
                    state.next_id += 1;
                }
            }
        }
        self
    }

    /// Snapshot of the stored records in insertion order
    pub async fn records(&self) -> Vec<Value> {
        self.state.read().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn get(&self, record: &Value, attribute: &str) -> Option<Value> {
        (self.accessor)(record, attribute)
    }

    fn id_of(&self, record: &Value) -> Option<Value> {
        self.get(record, &self.id_field).filter(|id| !id.is_null())
    }

    fn ordered(&self, query: MemoryQuery) -> Vec<Value> {
        let MemoryQuery { mut items, order } = query;
        if order.is_empty() {
            return items;
        }

        // slice::sort_by is stable, so equal keys keep their stored order
        items.sort_by(|a, b| {
            for (attribute, direction) in &order {
                let left = self.get(a, attribute).unwrap_or(Value::Null);
                let right = self.get(b, attribute).unwrap_or(Value::Null);
                let ordering = total_cmp(&left, &right);
                let ordering = if direction.is_desc() {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        items
    }
}

fn numeric_id(record: &Value, id_field: &str) -> Option<u64> {
    record.get(id_field).and_then(Value::as_u64)
}

/// Snapshot of records with pending ordering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryQuery {
    items: Vec<Value>,
    order: Vec<(String, SortDirection)>,
}

impl MemoryQuery {
    /// Records in their current (unsorted) order
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl Storage for MemoryStorage {
    type Collection = MemoryQuery;
    type Resource = Value;

    fn resource_name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn prepare_collection(&self, _request: &RestRequest) -> Result<MemoryQuery> {
        Ok(MemoryQuery {
            items: self.records().await,
            order: Vec::new(),
        })
    }

    async fn prepare_resource(
        &self,
        _request: &RestRequest,
        collection: &MemoryQuery,
        id: &str,
    ) -> Result<Option<Value>> {
        Ok(collection
            .items
            .iter()
            .find(|record| self.id_of(record).is_some_and(|rid| id_matches(&rid, id)))
            .cloned())
    }

    async fn filter(
        &self,
        mut collection: MemoryQuery,
        filter: &Filter,
        predicates: &[Predicate],
    ) -> Result<MemoryQuery> {
        let matchers = predicates
            .iter()
            .map(Matcher::compile)
            .collect::<Result<Vec<_>>>()?;
        let attribute = filter.attribute();

        collection.items.retain(|record| {
            let value = self.get(record, attribute);
            matchers.iter().all(|m| m.matches(value.as_ref()))
        });
        Ok(collection)
    }

    async fn sort(&self, mut collection: MemoryQuery, keys: &[SortKey<'_>]) -> Result<MemoryQuery> {
        collection.order.extend(
            keys.iter()
                .map(|key| (key.sort.attribute().to_string(), key.direction)),
        );
        Ok(collection)
    }

    async fn paginate(
        &self,
        _request: &RestRequest,
        collection: MemoryQuery,
        limit: usize,
        offset: usize,
        with_total: bool,
    ) -> Result<(MemoryQuery, Option<u64>)> {
        let items = self.ordered(collection);
        let total = with_total.then_some(items.len() as u64);
        let items = items.into_iter().skip(offset).take(limit).collect();
        Ok((
            MemoryQuery {
                items,
                order: Vec::new(),
            },
            total,
        ))
    }

    async fn fetch(&self, collection: MemoryQuery) -> Result<Vec<Value>> {
        Ok(self.ordered(collection))
    }

    async fn save(&self, _request: &RestRequest, mut resource: Value, update: bool) -> Result<Value> {
        let mut state = self.state.write().await;

        let Some(id) = self.id_of(&resource) else {
            if update {
                return Err(Error::resource_not_found());
            }
            if let Value::Object(map) = &mut resource {
                map.insert(self.id_field.clone(), Value::from(state.next_id));
                state.next_id += 1;
            }
            state.records.push(resource.clone());
            return Ok(resource);
        };

        let position = state
            .records
            .iter()
            .position(|record| self.id_of(record).is_some_and(|rid| loose_eq(&rid, &id)));

        match (position, update) {
            (Some(index), true) => state.records[index] = resource.clone(),
            (None, true) => return Err(Error::resource_not_found()),
            (Some(_), false) => {
                return Err(Error::bad_request(format!(
                    "Resource with {} {} already exists",
                    self.id_field, id
                )))
            }
            (None, false) => {
                if let Some(numeric) = id.as_u64() {
                    state.next_id = state.next_id.max(numeric + 1);
                }
                state.records.push(resource.clone());
            }
        }

        Ok(resource)
    }

    async fn remove(
        &self,
        _request: &RestRequest,
        collection: MemoryQuery,
        target: RemoveTarget<Value>,
    ) -> Result<Vec<Value>> {
        let requested: Vec<Value> = match target {
            RemoveTarget::Resource(resource) => self.id_of(&resource).into_iter().collect(),
            RemoveTarget::Ids(ids) => ids,
        };

        // Only records visible in the request's collection can be removed
        let scoped: Vec<Value> = collection
            .items
            .iter()
            .filter_map(|record| self.id_of(record))
            .filter(|rid| requested.iter().any(|id| loose_eq(rid, id)))
            .collect();

        let mut removed = Vec::new();
        let mut state = self.state.write().await;
        state.records.retain(|record| match self.id_of(record) {
            Some(rid) if scoped.iter().any(|id| loose_eq(&rid, id)) => {
                removed.push(rid);
                false
            }
            _ => true,
        });

        Ok(removed)
    }

    fn default_schema(&self, fields: &ResourceFields) -> Option<Arc<dyn Schema<Value>>> {
        Some(Arc::new(FieldsSchema::new(fields.clone())))
    }
}

// ============================================================================
// Value comparison
// ============================================================================

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        _ => a == b,
    }
}

fn id_matches(id: &Value, raw: &str) -> bool {
    match id {
        Value::String(s) => s == raw,
        Value::Number(n) => raw.parse::<f64>().ok() == n.as_f64(),
        Value::Bool(b) => raw.parse::<bool>().ok() == Some(*b),
        _ => false,
    }
}

fn partial_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn total_cmp(a: &Value, b: &Value) -> Ordering {
    rank(a)
        .cmp(&rank(b))
        .then_with(|| partial_cmp(a, b).unwrap_or(Ordering::Equal))
}

fn text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s)),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

fn like_regex(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    let mut source = String::from(if case_insensitive { "(?is)^" } else { "(?s)^" });
    let mut buf = [0u8; 4];
    for ch in pattern.chars() {
        match ch {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut buf))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| Error::bad_request(format!("Invalid pattern: {}", e)))
}

/// Predicate with its pattern compiled once per request
enum Matcher {
    Compare {
        op: Operator,
        value: Value,
        pattern: Option<Regex>,
    },
    Or(Vec<Matcher>),
    And(Vec<Matcher>),
}

impl Matcher {
    fn compile(predicate: &Predicate) -> Result<Self> {
        match predicate {
            Predicate::Or(options) => options
                .iter()
                .map(Self::compile)
                .collect::<Result<Vec<_>>>()
                .map(Matcher::Or),
            Predicate::And(parts) => parts
                .iter()
                .map(Self::compile)
                .collect::<Result<Vec<_>>>()
                .map(Matcher::And),
            Predicate::Compare { op, value } => {
                let raw = value.as_str().unwrap_or_default();
                let pattern = match op {
                    Operator::Like => Some(like_regex(raw, false)?),
                    Operator::ILike => Some(like_regex(raw, true)?),
                    Operator::Regexp => Some(
                        Regex::new(raw)
                            .map_err(|e| Error::bad_request(format!("Invalid pattern: {}", e)))?,
                    ),
                    _ => None,
                };
                Ok(Matcher::Compare {
                    op: *op,
                    value: value.clone(),
                    pattern,
                })
            }
        }
    }

    fn matches(&self, attribute: Option<&Value>) -> bool {
        match self {
            Matcher::Or(options) => options.iter().any(|m| m.matches(attribute)),
            Matcher::And(parts) => parts.iter().all(|m| m.matches(attribute)),
            Matcher::Compare { op, value, pattern } => {
                let actual = attribute.unwrap_or(&Value::Null);
                match op {
                    Operator::Eq => loose_eq(actual, value),
                    Operator::Ne => !loose_eq(actual, value),
                    Operator::Lt => partial_cmp(actual, value) == Some(Ordering::Less),
                    Operator::Le => matches!(
                        partial_cmp(actual, value),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                    Operator::Gt => partial_cmp(actual, value) == Some(Ordering::Greater),
                    Operator::Ge => matches!(
                        partial_cmp(actual, value),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                    Operator::In => in_list(actual, value),
                    Operator::NotIn => !in_list(actual, value),
                    Operator::Between => match value.as_array().map(Vec::as_slice) {
                        Some([low, high]) => {
                            matches!(
                                partial_cmp(actual, low),
                                Some(Ordering::Greater | Ordering::Equal)
                            ) && matches!(
                                partial_cmp(actual, high),
                                Some(Ordering::Less | Ordering::Equal)
                            )
                        }
                        _ => false,
                    },
                    Operator::Starts => match (text(actual), value.as_str()) {
                        (Some(a), Some(v)) => a.starts_with(v),
                        _ => false,
                    },
                    Operator::Ends => match (text(actual), value.as_str()) {
                        (Some(a), Some(v)) => a.ends_with(v),
                        _ => false,
                    },
                    Operator::Contains => match actual {
                        Value::Array(items) => items.iter().any(|item| loose_eq(item, value)),
                        _ => match (text(actual), value.as_str()) {
                            (Some(a), Some(v)) => a.contains(v),
                            _ => false,
                        },
                    },
                    Operator::Like | Operator::ILike | Operator::Regexp => {
                        match (text(actual), pattern) {
                            (Some(a), Some(re)) => re.is_match(&a),
                            _ => false,
                        }
                    }
                }
            }
        }
    }
}

fn in_list(actual: &Value, list: &Value) -> bool {
    list.as_array()
        .is_some_and(|items| items.iter().any(|item| loose_eq(actual, item)))
}
