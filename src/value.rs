//! Stored value model: the closed set of shapes an attribute can hold.
//!
//! Everything an attribute stores is a [`Value`]: atomic scalars, ordered
//! sequences, key-unique mappings, sets, and references to other entities,
//! nested arbitrarily. Keeping the type closed lets encode/decode match
//! exhaustively instead of guessing at runtime.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;

/// Compact descriptor for a stored reference to another entity.
///
/// References are persisted as `(id, created_at)` rather than embedding the
/// target's data. The `created_at` stamp is compared against the live record
/// when the reference is resolved; ids are never reused, so a mismatch means
/// the target was deleted and the reference is stale.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: u64,
    pub created_at: DateTime<Utc>,
}

/// A storable value. Attribute round-trips preserve these shapes exactly.
///
/// `Map` keys and `Set` members may themselves be any `Value`: the manual
/// [`Ord`] below gives the type a total order (floats via `total_cmp`,
/// mixed variants ranked by discriminant) so `BTreeMap`/`BTreeSet` nesting
/// works for every supported shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<Value, Value>),
    Set(BTreeSet<Value>),
    Ref(EntityRef),
}

impl Value {
    /// Convenience constructor for text values.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Short name for the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Ref(_) => "ref",
        }
    }

    /// True for the container variants that read back as live proxies.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_) | Value::Set(_))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<Value, Value>> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<Value>> {
        match self {
            Value::Set(members) => Some(members),
            _ => None,
        }
    }

    pub fn as_ref_value(&self) -> Option<&EntityRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
            Value::List(_) => 5,
            Value::Map(_) => 6,
            Value::Set(_) => 7,
            Value::Ref(_) => 8,
        }
    }

    /// Render as JSON for display surfaces (CLI inspection). Non-text map
    /// keys are stringified; this is a one-way representation, not a wire
    /// format.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.key_repr(), v.to_json()))
                    .collect(),
            ),
            Value::Set(members) => {
                serde_json::Value::Array(members.iter().map(Value::to_json).collect())
            }
            Value::Ref(r) => serde_json::json!({
                "$ref": r.id,
                "created_at": r.created_at.to_rfc3339(),
            }),
        }
    }

    fn key_repr(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Ref(r) => format!("#{}", r.id),
            other => format!("<{}>", other.type_name()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Ref(a), Value::Ref(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<EntityRef> for Value {
    fn from(r: EntityRef) -> Self {
        Value::Ref(r)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<Value, Value>> for Value {
    fn from(entries: BTreeMap<Value, Value>) -> Self {
        Value::Map(entries)
    }
}

impl From<BTreeSet<Value>> for Value {
    fn from(members: BTreeSet<Value>) -> Self {
        Value::Set(members)
    }
}

/// Explicit conversion pair for custom aggregates that want to live in
/// attribute storage.
///
/// A type holding entity references that plain container iteration cannot
/// reach must implement this trait; the conversion runs before the generic
/// serialization walk, so embedded references stay visible to the store.
/// There is no fallback path: a type that does not implement `Storable`
/// cannot be written at all, which turns the silent-data-loss hazard into a
/// compile error.
pub trait Storable: Sized {
    /// Convert to the stored representation.
    fn to_stored(&self) -> Result<Value, StoreError>;

    /// Rebuild from the stored representation.
    fn from_stored(value: &Value) -> Result<Self, StoreError>;
}

fn type_error(expected: &str, got: &Value) -> StoreError {
    StoreError::Serialization(format!("expected {}, got {}", expected, got.type_name()))
}

impl Storable for bool {
    fn to_stored(&self) -> Result<Value, StoreError> {
        Ok(Value::Bool(*self))
    }

    fn from_stored(value: &Value) -> Result<Self, StoreError> {
        value.as_bool().ok_or_else(|| type_error("bool", value))
    }
}

impl Storable for i64 {
    fn to_stored(&self) -> Result<Value, StoreError> {
        Ok(Value::Int(*self))
    }

    fn from_stored(value: &Value) -> Result<Self, StoreError> {
        value.as_int().ok_or_else(|| type_error("int", value))
    }
}

impl Storable for f64 {
    fn to_stored(&self) -> Result<Value, StoreError> {
        Ok(Value::Float(*self))
    }

    fn from_stored(value: &Value) -> Result<Self, StoreError> {
        value.as_float().ok_or_else(|| type_error("float", value))
    }
}

impl Storable for String {
    fn to_stored(&self) -> Result<Value, StoreError> {
        Ok(Value::Text(self.clone()))
    }

    fn from_stored(value: &Value) -> Result<Self, StoreError> {
        value
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| type_error("text", value))
    }
}

impl Storable for EntityRef {
    fn to_stored(&self) -> Result<Value, StoreError> {
        Ok(Value::Ref(self.clone()))
    }

    fn from_stored(value: &Value) -> Result<Self, StoreError> {
        value
            .as_ref_value()
            .cloned()
            .ok_or_else(|| type_error("ref", value))
    }
}

impl<T: Storable> Storable for Option<T> {
    fn to_stored(&self) -> Result<Value, StoreError> {
        match self {
            Some(inner) => inner.to_stored(),
            None => Ok(Value::Null),
        }
    }

    fn from_stored(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_stored(other).map(Some),
        }
    }
}

impl<T: Storable> Storable for Vec<T> {
    fn to_stored(&self) -> Result<Value, StoreError> {
        let items = self
            .iter()
            .map(Storable::to_stored)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::List(items))
    }

    fn from_stored(value: &Value) -> Result<Self, StoreError> {
        let items = value.as_list().ok_or_else(|| type_error("list", value))?;
        items.iter().map(T::from_stored).collect()
    }
}

impl<T: Storable> Storable for BTreeMap<String, T> {
    fn to_stored(&self) -> Result<Value, StoreError> {
        let mut entries = BTreeMap::new();
        for (k, v) in self {
            entries.insert(Value::Text(k.clone()), v.to_stored()?);
        }
        Ok(Value::Map(entries))
    }

    fn from_stored(value: &Value) -> Result<Self, StoreError> {
        let entries = value.as_map().ok_or_else(|| type_error("map", value))?;
        let mut out = BTreeMap::new();
        for (k, v) in entries {
            let key = k.as_text().ok_or_else(|| type_error("text key", k))?;
            out.insert(key.to_string(), T::from_stored(v)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_variants_order_by_rank() {
        assert!(Value::Null < Value::Bool(false));
        assert!(Value::Int(99) < Value::Float(0.0));
        assert!(Value::Text("z".into()) < Value::List(vec![]));
    }

    #[test]
    fn floats_are_totally_ordered() {
        let mut set = BTreeSet::new();
        set.insert(Value::Float(f64::NAN));
        set.insert(Value::Float(1.5));
        set.insert(Value::Float(f64::NAN));
        // total_cmp deduplicates identical NaN bit patterns
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn containers_nest_as_map_keys() {
        let mut entries = BTreeMap::new();
        entries.insert(
            Value::List(vec![Value::Int(1), Value::Int(2)]),
            Value::text("pair"),
        );
        let map = Value::Map(entries);
        let fetched = map
            .as_map()
            .and_then(|m| m.get(&Value::List(vec![Value::Int(1), Value::Int(2)])));
        assert_eq!(fetched, Some(&Value::text("pair")));
    }

    #[test]
    fn json_rendering_stringifies_keys() {
        let mut entries = BTreeMap::new();
        entries.insert(Value::Int(7), Value::text("seven"));
        let json = Value::Map(entries).to_json();
        assert_eq!(json["7"], serde_json::json!("seven"));
    }

    #[test]
    fn storable_round_trip_for_option_vec() {
        let source: Vec<Option<i64>> = vec![Some(1), None, Some(3)];
        let stored = source.to_stored().expect("to_stored");
        let back: Vec<Option<i64>> = Storable::from_stored(&stored).expect("from_stored");
        assert_eq!(back, source);
    }
}
