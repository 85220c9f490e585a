//! Query algebra
//!
//! A [`Query`] is an ordered list of [`QueryItem`]s. Each item expands into
//! one [`MatchClause`]: the AND of its conditions. The query matches the OR
//! of its clauses. The empty query is the identity "match everything" and
//! expands into no clauses at all; callers check [`Query::is_all`] first.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Index key under which event types are posted.
pub const TYPE_INDEX_KEY: &str = "type";

/// Prefix of index keys for payload attributes (`data.<attr>`).
const DATA_KEY_PREFIX: &str = "data.";

// =============================================================================
// Condition
// =============================================================================

/// A single predicate over one index key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Payload attribute equals a value (compared by canonical text)
    Equals {
        /// Attribute name inside `data`
        attribute: String,
        /// Canonical text of the expected value
        value: String,
    },
    /// Event type is one of the set (case-insensitive, whole-name match)
    TypeIn(BTreeSet<String>),
}

impl Condition {
    /// Build an equality condition from a JSON value
    pub fn equals(attribute: impl Into<String>, value: &Value) -> Self {
        Self::Equals {
            attribute: attribute.into(),
            value: value_text(value),
        }
    }

    /// Build a type-set condition; names are folded to lowercase
    pub fn type_in<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::TypeIn(types.into_iter().map(|t| t.as_ref().to_lowercase()).collect())
    }

    /// Index key this condition is resolved against
    pub fn index_key(&self) -> String {
        match self {
            Condition::Equals { attribute, .. } => data_index_key(attribute),
            Condition::TypeIn(_) => TYPE_INDEX_KEY.to_string(),
        }
    }

    /// Whether a type name satisfies a `TypeIn` condition.
    ///
    /// The whole name must equal one member ignoring case: `ItemAdded` does
    /// not match `ItemAddedLater` or `Item`.
    pub fn matches_type(&self, type_name: &str) -> bool {
        match self {
            Condition::TypeIn(types) => types.contains(&type_name.to_lowercase()),
            Condition::Equals { .. } => false,
        }
    }

    /// Stable textual form used for lock key derivation.
    ///
    /// Each part is a JSON string, so separators inside names or values
    /// cannot make two different conditions collide.
    pub fn canonical(&self) -> String {
        let parts = match self {
            Condition::Equals { attribute, value } => {
                serde_json::json!([data_index_key(attribute), value])
            }
            Condition::TypeIn(types) => serde_json::json!([TYPE_INDEX_KEY, types]),
        };
        parts.to_string()
    }
}

/// Index key for a payload attribute
pub fn data_index_key(attribute: &str) -> String {
    format!("{}{}", DATA_KEY_PREFIX, attribute)
}

/// Canonical text of a payload value, shared by indexing and lookups.
///
/// Strings are taken verbatim, `null` is `null`, everything else is its
/// compact JSON text.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// =============================================================================
// MatchClause
// =============================================================================

/// One AND-combined clause of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchClause {
    /// Conditions that must all hold
    pub conditions: Vec<Condition>,
}

impl MatchClause {
    /// A clause with no conditions matches nothing
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Sorted, deduplicated canonical forms of the conditions
    pub fn canonical(&self) -> Vec<String> {
        let set: BTreeSet<String> = self.conditions.iter().map(Condition::canonical).collect();
        set.into_iter().collect()
    }
}

// =============================================================================
// QueryItem
// =============================================================================

/// One alternative of a query: a type set plus required attribute values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryItem {
    /// Accepted event types; empty means "any type"
    #[serde(default)]
    pub types: Vec<String>,
    /// Attribute values that must all match
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl QueryItem {
    /// Create an empty item
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the given types
    pub fn types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Require an attribute value
    pub fn property(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(attribute.into(), value.into());
        self
    }

    /// Expand into its match clause
    pub fn to_match_clause(&self) -> MatchClause {
        let mut conditions = Vec::with_capacity(self.properties.len() + 1);
        if !self.types.is_empty() {
            conditions.push(Condition::type_in(&self.types));
        }
        for (attribute, value) in &self.properties {
            conditions.push(Condition::equals(attribute.clone(), value));
        }
        MatchClause { conditions }
    }
}

// =============================================================================
// Query
// =============================================================================

/// Ordered list of query items, combined with OR.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query {
    /// Alternatives
    pub items: Vec<QueryItem>,
}

impl Query {
    /// Query matching every event
    pub fn all() -> Self {
        Self { items: Vec::new() }
    }

    /// Query from items
    pub fn new(items: Vec<QueryItem>) -> Self {
        Self { items }
    }

    /// Query with a single item
    pub fn item(item: QueryItem) -> Self {
        Self { items: vec![item] }
    }

    /// Whether this is the "match everything" query
    pub fn is_all(&self) -> bool {
        self.items.is_empty()
    }

    /// One clause per item, in declaration order
    pub fn to_match_variants(&self) -> Vec<MatchClause> {
        self.items.iter().map(QueryItem::to_match_clause).collect()
    }

    /// Canonical shape: each clause's sorted conditions, then the clauses
    /// sorted and deduplicated.
    ///
    /// Two queries differing only in declaration order share a shape.
    pub fn canonical_shape(&self) -> Vec<Vec<String>> {
        let clauses: BTreeSet<Vec<String>> = self
            .to_match_variants()
            .iter()
            .map(MatchClause::canonical)
            .collect();
        clauses.into_iter().collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_all_has_no_variants() {
        let query = Query::all();
        assert!(query.is_all());
        assert!(query.to_match_variants().is_empty());
    }

    #[test]
    fn test_item_expands_to_type_and_data_conditions() {
        let item = QueryItem::new()
            .types(["ItemAdded", "ItemRemoved"])
            .property("cart_id", "X");

        let clause = item.to_match_clause();
        assert_eq!(clause.conditions.len(), 2);
        assert_eq!(clause.conditions[0].index_key(), "type");
        assert_eq!(clause.conditions[1].index_key(), "data.cart_id");
    }

    #[test]
    fn test_empty_item_is_empty_clause_not_all() {
        let query = Query::item(QueryItem::new());
        assert!(!query.is_all());
        let variants = query.to_match_variants();
        assert_eq!(variants.len(), 1);
        assert!(variants[0].is_empty());
    }

    #[test]
    fn test_type_matching_is_case_insensitive_and_anchored() {
        let condition = Condition::type_in(["ItemAdded"]);

        assert!(condition.matches_type("ItemAdded"));
        assert!(condition.matches_type("itemadded"));
        assert!(condition.matches_type("ITEMADDED"));
        assert!(!condition.matches_type("ItemAddedLater"));
        assert!(!condition.matches_type("Item"));
        assert!(!condition.matches_type("XItemAdded"));
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&json!("42")), "42");
        assert_eq!(value_text(&json!(42)), "42");
        assert_eq!(value_text(&json!(true)), "true");
        assert_eq!(value_text(&json!(null)), "null");
        assert_eq!(value_text(&json!([1, "a"])), "[1,\"a\"]");
    }

    #[test]
    fn test_canonical_shape_ignores_declaration_order() {
        let a = Query::item(
            QueryItem::new()
                .types(["ItemAdded", "ItemRemoved"])
                .property("cart_id", "42")
                .property("item_id", "7"),
        );
        let b = Query::item(
            QueryItem::new()
                .property("item_id", "7")
                .property("cart_id", "42")
                .types(["itemremoved", "ItemAdded"]),
        );

        assert_eq!(a.canonical_shape(), b.canonical_shape());
    }

    #[test]
    fn test_canonical_shape_sorts_clauses() {
        let first = QueryItem::new().types(["A"]);
        let second = QueryItem::new().property("k", "v");

        let a = Query::new(vec![first.clone(), second.clone()]);
        let b = Query::new(vec![second, first]);

        assert_eq!(a.canonical_shape(), b.canonical_shape());
    }

    #[test]
    fn test_canonical_shape_distinguishes_values() {
        let a = Query::item(QueryItem::new().property("cart_id", "1"));
        let b = Query::item(QueryItem::new().property("cart_id", "2"));
        assert_ne!(a.canonical_shape(), b.canonical_shape());
    }

    #[test]
    fn test_canonical_form_keeps_parts_apart() {
        let split_attribute = Condition::Equals {
            attribute: "a=b".to_string(),
            value: "c".to_string(),
        };
        let split_value = Condition::Equals {
            attribute: "a".to_string(),
            value: "b=c".to_string(),
        };
        assert_ne!(split_attribute.canonical(), split_value.canonical());

        let joined = Condition::type_in(["a|b"]);
        let pair = Condition::type_in(["a", "b"]);
        assert_ne!(joined.canonical(), pair.canonical());

        assert_eq!(pair.canonical(), r#"["type",["a","b"]]"#);
    }

    #[test]
    fn test_query_wire_shape() {
        let query: Query = serde_json::from_value(json!([
            {"types": ["ItemAdded"], "properties": {"cart_id": "X"}},
            {"properties": {"user": "u1"}}
        ]))
        .unwrap();

        assert_eq!(query.items.len(), 2);
        assert_eq!(query.items[0].types, vec!["ItemAdded".to_string()]);
        assert!(query.items[1].types.is_empty());
    }
}
