//! Mutation primitives shared by the filter and sort engines
//!
//! A [`Mutation`] binds a logical query name to a backend attribute plus
//! free-form metadata. A [`Mutator`] holds the mutations declared for one
//! resource, in declaration order, and is built once from a list of
//! [`Param`] shorthands.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fields::{FieldDef, ResourceFields};

/// A named, single-field transformation unit
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    /// Logical name accepted in query parameters
    pub name: String,

    /// Backend attribute reference
    pub field: String,

    /// Free-form metadata (`default`, `operator`, `type`, ...)
    pub meta: Map<String, Value>,
}

impl Mutation {
    /// Mutation whose field equals its name
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            field: name.clone(),
            name,
            meta: Map::new(),
        }
    }

    /// Build from a name and metadata; a string `field` key overrides the attribute
    pub fn with_meta(name: impl Into<String>, meta: Map<String, Value>) -> Self {
        let mut mutation = Self::new(name);
        if let Some(field) = meta.get("field").and_then(Value::as_str) {
            mutation.field = field.to_string();
        }
        mutation.meta = meta;
        mutation
    }

    /// Look up a string metadata value
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key).and_then(Value::as_str)
    }
}

/// Types that can be built from a resolved [`Mutation`]
pub trait Mutate: Sized {
    /// Logical name of this mutation
    fn name(&self) -> &str;

    /// Build from a mutation and the matching field definition, if the resource is typed
    ///
    /// Returning `None` drops the entry from the mutator.
    fn from_mutation(mutation: Mutation, field: Option<&FieldDef>) -> Option<Self>;
}

/// Declaration shorthand: a bare name, a name with metadata, or a built instance
#[derive(Debug, Clone)]
pub enum Param<M> {
    Name(String),
    WithMeta(String, Map<String, Value>),
    Built(M),
}

impl<M> From<&str> for Param<M> {
    fn from(name: &str) -> Self {
        Param::Name(name.to_string())
    }
}

impl<M> From<String> for Param<M> {
    fn from(name: String) -> Self {
        Param::Name(name)
    }
}

impl<M> From<(&str, Value)> for Param<M> {
    fn from((name, meta): (&str, Value)) -> Self {
        match meta {
            Value::Object(meta) => Param::WithMeta(name.to_string(), meta),
            _ => Param::Name(name.to_string()),
        }
    }
}

impl<M> From<MutationSpec> for Param<M> {
    fn from(spec: MutationSpec) -> Self {
        match spec {
            MutationSpec::Name(name) => Param::Name(name),
            MutationSpec::WithMeta(name, meta) => Param::WithMeta(name, meta),
        }
    }
}

/// Serializable form of a [`Param`] used by configuration layers
///
/// Either `"name"` or `["name", {"default": "desc"}]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MutationSpec {
    Name(String),
    WithMeta(String, Map<String, Value>),
}

impl MutationSpec {
    pub fn name(&self) -> &str {
        match self {
            MutationSpec::Name(name) | MutationSpec::WithMeta(name, _) => name,
        }
    }
}

impl From<&str> for MutationSpec {
    fn from(name: &str) -> Self {
        MutationSpec::Name(name.to_string())
    }
}

impl From<String> for MutationSpec {
    fn from(name: String) -> Self {
        MutationSpec::Name(name)
    }
}

impl From<(&str, Value)> for MutationSpec {
    fn from((name, meta): (&str, Value)) -> Self {
        match meta {
            Value::Object(meta) => MutationSpec::WithMeta(name.to_string(), meta),
            _ => MutationSpec::Name(name.to_string()),
        }
    }
}

/// Ordered, name-unique collection of mutations
#[derive(Debug, Clone)]
pub struct Mutator<M> {
    mutations: Vec<M>,
}

impl<M> Default for Mutator<M> {
    fn default() -> Self {
        Self {
            mutations: Vec::new(),
        }
    }
}

impl<M: Mutate> Mutator<M> {
    /// Resolve every param against the resource fields
    ///
    /// On a typed resource, names that match no field are skipped with a
    /// warning. A later param with an already used name replaces the earlier
    /// one without changing its position.
    pub fn build<I, P>(params: I, fields: &ResourceFields) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Param<M>>,
    {
        let mut mutator = Self::default();
        for param in params {
            if let Some(mutation) = Self::convert(param.into(), fields) {
                mutator.insert(mutation);
            }
        }
        mutator
    }

    fn convert(param: Param<M>, fields: &ResourceFields) -> Option<M> {
        let mut mutation = match param {
            Param::Built(built) => return Some(built),
            Param::Name(name) => Mutation::new(name),
            Param::WithMeta(name, meta) => Mutation::with_meta(name, meta),
        };

        if !fields.is_typed() {
            return M::from_mutation(mutation, None);
        }

        match fields.get(&mutation.field) {
            Some(def) => {
                mutation.field = def.attribute.clone();
                M::from_mutation(mutation, Some(def))
            }
            None => {
                tracing::warn!(
                    name = %mutation.name,
                    field = %mutation.field,
                    "Skipping mutation for an unknown field"
                );
                None
            }
        }
    }

    /// Add a mutation, replacing one with the same name in place
    pub fn insert(&mut self, mutation: M) {
        match self
            .mutations
            .iter_mut()
            .find(|m| m.name() == mutation.name())
        {
            Some(existing) => *existing = mutation,
            None => self.mutations.push(mutation),
        }
    }

    pub fn get(&self, name: &str) -> Option<&M> {
        self.mutations.iter().find(|m| m.name() == name)
    }

    /// Logical names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.mutations.iter().map(Mutate::name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &M> {
        self.mutations.iter()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldType;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Named(Mutation);

    impl Mutate for Named {
        fn name(&self) -> &str {
            &self.0.name
        }

        fn from_mutation(mutation: Mutation, _field: Option<&FieldDef>) -> Option<Self> {
            Some(Named(mutation))
        }
    }

    #[test]
    fn test_untyped_build_keeps_declaration_order() {
        let mutator: Mutator<Named> =
            Mutator::build(["b", "a", "c"], &ResourceFields::new());
        assert_eq!(mutator.names().collect::<Vec<_>>(), ["b", "a", "c"]);
        assert_eq!(mutator.len(), 3);
    }

    #[test]
    fn test_meta_field_overrides_attribute() {
        let mutator: Mutator<Named> = Mutator::build(
            [Param::from(("title", json!({"field": "name", "default": "desc"})))],
            &ResourceFields::new(),
        );
        let title = mutator.get("title").unwrap();
        assert_eq!(title.0.field, "name");
        assert_eq!(title.0.meta_str("default"), Some("desc"));
    }

    #[test]
    fn test_typed_build_skips_unknown_names() {
        let fields = ResourceFields::new()
            .field(FieldDef::new("name", FieldType::String).attribute("pet_name"));
        let mutator: Mutator<Named> = Mutator::build(["name", "missing"], &fields);

        assert_eq!(mutator.names().collect::<Vec<_>>(), ["name"]);
        assert_eq!(mutator.get("name").unwrap().0.field, "pet_name");
        assert!(mutator.get("missing").is_none());
    }

    #[test]
    fn test_duplicate_name_replaces_in_place() {
        let mutator: Mutator<Named> = Mutator::build(
            [
                Param::from("a"),
                Param::from("b"),
                Param::from(("a", json!({"default": true}))),
            ],
            &ResourceFields::new(),
        );
        assert_eq!(mutator.names().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(mutator.get("a").unwrap().0.meta["default"], json!(true));
    }

    #[test]
    fn test_built_param_bypasses_field_check() {
        let fields = ResourceFields::new().field(FieldDef::new("name", FieldType::String));
        let mutator: Mutator<Named> = Mutator::build(
            [Param::Built(Named(Mutation::new("computed")))],
            &fields,
        );
        assert!(mutator.get("computed").is_some());
    }

    #[test]
    fn test_mutation_spec_deserializes_both_forms() {
        let specs: Vec<MutationSpec> =
            serde_json::from_value(json!(["name", ["age", {"operator": "$ge"}]])).unwrap();
        assert_eq!(specs[0], MutationSpec::Name("name".into()));
        assert_eq!(specs[1].name(), "age");
        assert!(Mutator::<Named>::default().is_empty());
    }
}
