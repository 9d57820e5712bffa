//! Data models for fieldsync
//!
//! Defines the fixed collection set, the schemaless domain `Record`, and the
//! mutation queue entry. Records are kept as JSON objects: the server owns
//! their shape, this crate only relies on `id` and the indexed keys.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A secondary index over one top-level JSON key of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name used by `get_by_index`
    pub name: &'static str,
    /// JSON key the index reads
    pub key: &'static str,
}

const fn index(name: &'static str) -> IndexSpec {
    IndexSpec { name, key: name }
}

const COMPANY: IndexSpec = index("companyId");
const FIELD: IndexSpec = index("fieldId");
const STATUS: IndexSpec = index("status");
const CATEGORY: IndexSpec = index("category");

/// A named partition of domain records mirrored from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Fields,
    Operations,
    Observations,
    Personnel,
    Machinery,
    WarehouseItems,
}

impl Collection {
    /// Every collection, in pull order
    pub const ALL: [Collection; 6] = [
        Collection::Fields,
        Collection::Operations,
        Collection::Observations,
        Collection::Personnel,
        Collection::Machinery,
        Collection::WarehouseItems,
    ];

    /// Name used for the local table and in the mutation queue
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Fields => "fields",
            Collection::Operations => "operations",
            Collection::Observations => "observations",
            Collection::Personnel => "personnel",
            Collection::Machinery => "machinery",
            Collection::WarehouseItems => "warehouse_items",
        }
    }

    /// Path segment under `/api/`
    pub fn endpoint(&self) -> &'static str {
        match self {
            Collection::WarehouseItems => "warehouse-items",
            other => other.as_str(),
        }
    }

    /// Secondary indices declared for this collection
    pub fn indices(&self) -> &'static [IndexSpec] {
        match self {
            Collection::Fields => &[COMPANY],
            Collection::Operations => &[COMPANY, FIELD, STATUS],
            Collection::Observations => &[COMPANY, FIELD],
            Collection::Personnel => &[COMPANY],
            Collection::Machinery => &[COMPANY, STATUS],
            Collection::WarehouseItems => &[COMPANY, CATEGORY],
        }
    }

    /// Look up an index declared on this collection
    pub fn index(&self, name: &str) -> Option<&'static IndexSpec> {
        self.indices().iter().find(|spec| spec.name == name)
    }

    /// Schema version that introduced this collection
    pub fn since_version(&self) -> u32 {
        match self {
            Collection::Machinery | Collection::WarehouseItems => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown collection name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown collection '{0}'")]
pub struct UnknownCollection(pub String);

impl FromStr for Collection {
    type Err = UnknownCollection;

    /// Accepts both the table name and the endpoint segment
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s || c.endpoint() == s)
            .ok_or_else(|| UnknownCollection(s.to_string()))
    }
}

/// A cached domain record (field, operation, observation, ...)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record with the given id
    pub fn with_id(id: impl Into<String>) -> Self {
        let mut record = Self::new();
        record.set("id", Value::String(id.into()));
        record
    }

    /// Build a record from a JSON value, which must be an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Primary key, normalized to a string
    ///
    /// Both `"id": "f1"` and `"id": 42` are accepted; anything else
    /// (missing, null, empty string, object) has no key.
    pub fn id(&self) -> Option<String> {
        match self.0.get("id")? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Tenant partition key
    pub fn company_id(&self) -> Option<String> {
        self.0.get("companyId").and_then(scalar_key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Set a field, returning self for chaining
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Builder-style field assignment
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Whether the indexed key equals `value`
    pub fn matches(&self, key: &str, value: &Value) -> bool {
        match (self.0.get(key), value) {
            (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
            (Some(field), value) => field == value,
            (None, _) => false,
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Render a scalar JSON value as a string key
pub(crate) fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The kind of local edit a queue entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationAction::Create => "create",
            MutationAction::Update => "update",
            MutationAction::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(MutationAction::Create),
            "update" => Ok(MutationAction::Update),
            "delete" => Ok(MutationAction::Delete),
            other => Err(format!("Unknown mutation action '{}'", other)),
        }
    }
}

/// A mutation that has not yet been assigned a sequence id
#[derive(Debug, Clone, PartialEq)]
pub struct NewMutation {
    pub action: MutationAction,
    pub collection: Collection,
    /// Primary key of the affected record
    pub record_id: String,
    /// Full record for create/update, `{"id": ...}` for delete
    pub payload: Record,
    pub enqueued_at: DateTime<Utc>,
}

impl NewMutation {
    /// Build a mutation for `payload`, stamped now
    ///
    /// Returns `None` when the payload has no usable `id`.
    pub fn new(action: MutationAction, collection: Collection, payload: Record) -> Option<Self> {
        let record_id = payload.id()?;
        Some(Self {
            action,
            collection,
            record_id,
            payload,
            enqueued_at: Utc::now(),
        })
    }
}

/// A durable entry of the mutation queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    /// Store-assigned, strictly increasing across the whole queue
    pub sequence_id: i64,
    pub action: MutationAction,
    pub collection: Collection,
    pub record_id: String,
    pub payload: Record,
    pub enqueued_at: DateTime<Utc>,
    pub synced: bool,
    /// Delivery attempts that failed so far
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collection_names_round_trip_through_from_str() {
        for collection in Collection::ALL {
            assert_eq!(collection.as_str().parse::<Collection>(), Ok(collection));
            assert_eq!(collection.endpoint().parse::<Collection>(), Ok(collection));
        }
        assert!("tractors".parse::<Collection>().is_err());
    }

    #[test]
    fn test_warehouse_endpoint_differs_from_table() {
        assert_eq!(Collection::WarehouseItems.as_str(), "warehouse_items");
        assert_eq!(Collection::WarehouseItems.endpoint(), "warehouse-items");
    }

    #[test]
    fn test_every_collection_is_company_indexed() {
        for collection in Collection::ALL {
            assert!(collection.index("companyId").is_some(), "{}", collection);
        }
        assert!(Collection::Operations.index("fieldId").is_some());
        assert!(Collection::Fields.index("fieldId").is_none());
    }

    #[test]
    fn test_record_id_normalization() {
        let string_id = Record::from_value(json!({"id": "f1"})).unwrap();
        assert_eq!(string_id.id().as_deref(), Some("f1"));

        let numeric_id = Record::from_value(json!({"id": 42})).unwrap();
        assert_eq!(numeric_id.id().as_deref(), Some("42"));

        let empty = Record::from_value(json!({"id": ""})).unwrap();
        assert!(empty.id().is_none());

        let missing = Record::from_value(json!({"name": "North Plot"})).unwrap();
        assert!(missing.id().is_none());

        assert!(Record::from_value(json!([1, 2])).is_none());
    }

    #[test]
    fn test_record_matches_numbers_by_value() {
        let record = Record::with_id("m1").with("year", 2020).with("status", "active");
        assert!(record.matches("year", &json!(2020.0)));
        assert!(record.matches("status", &json!("active")));
        assert!(!record.matches("status", &json!("idle")));
        assert!(!record.matches("missing", &json!("x")));
    }

    #[test]
    fn test_new_mutation_requires_id() {
        let record = Record::new().with("name", "North Plot");
        assert!(NewMutation::new(MutationAction::Create, Collection::Fields, record).is_none());

        let record = Record::with_id("f1");
        let mutation =
            NewMutation::new(MutationAction::Create, Collection::Fields, record).unwrap();
        assert_eq!(mutation.record_id, "f1");
    }

    #[test]
    fn test_queue_entry_serializes_camel_case() {
        let entry = QueueEntry {
            sequence_id: 7,
            action: MutationAction::Delete,
            collection: Collection::Observations,
            record_id: "o7".to_string(),
            payload: Record::with_id("o7"),
            enqueued_at: Utc::now(),
            synced: false,
            attempts: 0,
            last_error: None,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["sequenceId"], 7);
        assert_eq!(value["action"], "delete");
        assert_eq!(value["collection"], "observations");
    }
}
