//! Sort engine
//!
//! `sort=name,-age` orders by `name` ascending, then by `age` descending.
//! Unknown names are ignored. When the parameter is absent the sorts flagged
//! with a `default` direction are applied instead, in declaration order.
//! A present but empty (or all-unknown) `sort` parameter disables the default
//! ordering.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::Result;
use crate::fields::FieldDef;
use crate::mutate::{Mutate, Mutation, Mutator};
use crate::request::RestRequest;
use crate::storage::Storage;

/// Query parameter carrying the sort expression
pub const SORT_PARAM: &str = "sort";

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn is_desc(&self) -> bool {
        matches!(self, SortDirection::Desc)
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "ASC"),
            SortDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// A declared sort over one attribute
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    mutation: Mutation,
    default: Option<SortDirection>,
}

impl Sort {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            mutation: Mutation::new(name),
            default: None,
        }
    }

    /// Backend attribute to order by
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.mutation.field = field.into();
        self
    }

    /// Include this sort in the default ordering
    pub fn default_direction(mut self, direction: SortDirection) -> Self {
        self.default = Some(direction);
        self
    }

    pub fn name(&self) -> &str {
        &self.mutation.name
    }

    pub fn attribute(&self) -> &str {
        &self.mutation.field
    }

    /// Direction used when no `sort` parameter is given, if any
    pub fn default(&self) -> Option<SortDirection> {
        self.default
    }
}

impl Mutate for Sort {
    fn name(&self) -> &str {
        &self.mutation.name
    }

    fn from_mutation(mutation: Mutation, _field: Option<&FieldDef>) -> Option<Self> {
        // "desc" sorts descending, any other truthy value ascending
        let default = match mutation.meta.get("default") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::String(s)) if s.eq_ignore_ascii_case("desc") => Some(SortDirection::Desc),
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::Number(n)) if n.as_f64() == Some(0.0) => None,
            Some(_) => Some(SortDirection::Asc),
        };
        Some(Self { mutation, default })
    }
}

/// One resolved ordering term; the first key of a slice is the primary one
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortKey<'a> {
    pub sort: &'a Sort,
    pub direction: SortDirection,
}

/// Sorts declared for one resource
pub type Sorting = Mutator<Sort>;

impl Mutator<Sort> {
    /// Default ordering in declaration order
    pub fn defaults(&self) -> Vec<SortKey<'_>> {
        self.iter()
            .filter_map(|sort| {
                sort.default.map(|direction| SortKey { sort, direction })
            })
            .collect()
    }

    /// Resolve a `sort` parameter value into keys, skipping unknown and repeated names
    pub fn parse(&self, raw: &str) -> Vec<SortKey<'_>> {
        let mut keys: Vec<SortKey<'_>> = Vec::new();
        for term in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (name, direction) = match term.strip_prefix('-') {
                Some(name) => (name, SortDirection::Desc),
                None => (term.strip_prefix('+').unwrap_or(term), SortDirection::Asc),
            };
            let Some(sort) = self.get(name) else {
                continue;
            };
            if keys.iter().any(|k| k.sort.name() == name) {
                continue;
            }
            keys.push(SortKey { sort, direction });
        }
        keys
    }

    /// Order `collection` by the request's `sort` parameter or the default ordering
    pub async fn apply<S: Storage>(
        &self,
        storage: &S,
        request: &RestRequest,
        collection: S::Collection,
    ) -> Result<S::Collection> {
        let keys = match request.query().get(SORT_PARAM) {
            Some(raw) => self.parse(raw),
            None => self.defaults(),
        };

        if keys.is_empty() {
            return Ok(collection);
        }

        tracing::debug!(
            keys = ?keys.iter().map(|k| (k.sort.name(), k.direction)).collect::<Vec<_>>(),
            "Applying sort"
        );
        storage.sort(collection, &keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::ResourceFields;
    use crate::mutate::Param;
    use serde_json::json;

    fn sorting() -> Sorting {
        Sorting::build(
            [
                Param::from("name"),
                Param::from(("created", json!({"default": "desc"}))),
                Param::from("age"),
                Param::from(("id", json!({"default": true}))),
            ],
            &ResourceFields::new(),
        )
    }

    fn names(keys: &[SortKey<'_>]) -> Vec<(String, SortDirection)> {
        keys.iter()
            .map(|k| (k.sort.name().to_string(), k.direction))
            .collect()
    }

    #[test]
    fn test_parse_keeps_priority_order() {
        let sorting = sorting();
        assert_eq!(
            names(&sorting.parse("age,-name")),
            vec![
                ("age".to_string(), SortDirection::Asc),
                ("name".to_string(), SortDirection::Desc),
            ]
        );
    }

    #[test]
    fn test_parse_ignores_unknown_and_repeated_names() {
        let sorting = sorting();
        assert_eq!(
            names(&sorting.parse(" ,unknown,-age,age,")),
            vec![("age".to_string(), SortDirection::Desc)]
        );
        assert!(sorting.parse("").is_empty());
    }

    #[test]
    fn test_defaults_follow_declaration_order() {
        let sorting = sorting();
        assert_eq!(
            names(&sorting.defaults()),
            vec![
                ("created".to_string(), SortDirection::Desc),
                ("id".to_string(), SortDirection::Asc),
            ]
        );
    }

    #[test]
    fn test_default_meta_values() {
        let sorting = Sorting::build(
            [
                ("a", json!({"default": "asc"})),
                ("b", json!({"default": false})),
                ("c", json!({"default": 0})),
                ("d", json!({"default": 1})),
            ],
            &ResourceFields::new(),
        );
        assert_eq!(sorting.get("a").unwrap().default(), Some(SortDirection::Asc));
        assert_eq!(sorting.get("b").unwrap().default(), None);
        assert_eq!(sorting.get("c").unwrap().default(), None);
        assert_eq!(sorting.get("d").unwrap().default(), Some(SortDirection::Asc));
    }
}
