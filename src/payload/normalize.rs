//! Turn list responses of any known envelope shape into one item list.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

use crate::error::{Result, SyncError};

/// Fields that may carry a record's identity, in lookup order.
pub const ID_FIELDS: &[&str] = &["id", "request_id", "order_id"];

/// Fields that may carry a record's status, in lookup order.
pub const STATUS_FIELDS: &[&str] = &["status", "request_status", "order_status"];

/// Fields that may carry a record's creation time, in lookup order.
pub const CREATED_FIELDS: &[&str] = &["created_at", "createdAt", "created", "date"];

/// Known list envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
  /// `[...]`
  Bare,
  /// `{"data": [...]}`
  Data,
  /// `{"requests": [...]}`
  Requests,
  /// `{"requests": {"data": [...]}}`
  RequestsData,
  /// `{"orders": [...]}`
  Orders,
  /// `{"orders": {"data": [...]}}`
  OrdersData,
}

/// Probing order. The first envelope that yields an array wins.
pub const ENVELOPE_ORDER: [Envelope; 6] = [
  Envelope::Bare,
  Envelope::Data,
  Envelope::Requests,
  Envelope::RequestsData,
  Envelope::Orders,
  Envelope::OrdersData,
];

impl Envelope {
  /// Object keys leading from the payload root to the list.
  pub fn path(self) -> &'static [&'static str] {
    match self {
      Envelope::Bare => &[],
      Envelope::Data => &["data"],
      Envelope::Requests => &["requests"],
      Envelope::RequestsData => &["requests", "data"],
      Envelope::Orders => &["orders"],
      Envelope::OrdersData => &["orders", "data"],
    }
  }

  /// The list this envelope points at, if the payload has that shape.
  pub fn extract(self, raw: &Value) -> Option<&Vec<Value>> {
    self
      .path()
      .iter()
      .try_fold(raw, |node, key| node.get(key))?
      .as_array()
  }

  pub fn extract_mut(self, raw: &mut Value) -> Option<&mut Vec<Value>> {
    self
      .path()
      .iter()
      .try_fold(raw, |node, key| node.get_mut(key))?
      .as_array_mut()
  }
}

/// Identity of a domain record.
///
/// Numeric ids are kept as their decimal text, so `1` and `"1"` name the
/// same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  fn from_value(value: &Value) -> Option<Self> {
    match value {
      Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
      Value::Number(n) => Some(Self(n.to_string())),
      _ => None,
    }
  }

  /// Identity of a raw record, from the first known id field that has one.
  pub fn of(record: &Map<String, Value>) -> Option<Self> {
    ID_FIELDS
      .iter()
      .find_map(|field| record.get(*field).and_then(Self::from_value))
  }
}

impl fmt::Display for ItemId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for ItemId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<String> for ItemId {
  fn from(s: String) -> Self {
    Self(s)
  }
}

impl From<u64> for ItemId {
  fn from(n: u64) -> Self {
    Self(n.to_string())
  }
}

/// A record in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedItem {
  /// `None` when the record has none of the known id fields
  pub id: Option<ItemId>,
  pub status: Option<String>,
  pub created_at: Option<String>,
  /// The record as received
  pub fields: Map<String, Value>,
}

impl NormalizedItem {
  fn from_record(record: &Map<String, Value>) -> Self {
    Self {
      id: ItemId::of(record),
      status: first_string(record, STATUS_FIELDS),
      created_at: first_string(record, CREATED_FIELDS),
      fields: record.clone(),
    }
  }

  /// Look up a field, preferring the canonical values for status and creation time.
  pub fn text(&self, field: &str) -> Option<&str> {
    match field {
      "status" => self.status.as_deref(),
      "created_at" => self.created_at.as_deref(),
      _ => self.fields.get(field).and_then(Value::as_str),
    }
  }
}

fn first_string(record: &Map<String, Value>, fields: &[&str]) -> Option<String> {
  fields
    .iter()
    .find_map(|field| record.get(*field).and_then(Value::as_str))
    .map(String::from)
}

/// The first known envelope the payload matches.
pub fn detect_envelope(raw: &Value) -> Option<Envelope> {
  ENVELOPE_ORDER
    .into_iter()
    .find(|envelope| envelope.extract(raw).is_some())
}

/// Normalize a payload, reporting unknown shapes as [`SyncError::Shape`].
pub fn try_normalize(raw: &Value) -> Result<Vec<NormalizedItem>> {
  let envelope = detect_envelope(raw).ok_or_else(|| SyncError::Shape(describe(raw)))?;
  let items = envelope
    .extract(raw)
    .map(|records| {
      records
        .iter()
        .filter_map(Value::as_object)
        .map(NormalizedItem::from_record)
        .collect()
    })
    .unwrap_or_default();
  Ok(items)
}

/// Normalize a payload. Unknown shapes yield an empty list.
pub fn normalize(raw: &Value) -> Vec<NormalizedItem> {
  try_normalize(raw).unwrap_or_else(|e| {
    debug!("{}", e);
    Vec::new()
  })
}

fn describe(raw: &Value) -> String {
  match raw {
    Value::Object(map) => {
      let keys: Vec<&str> = map.keys().map(String::as_str).collect();
      format!("object with keys [{}]", keys.join(", "))
    }
    Value::Null => "null".to_string(),
    Value::Bool(_) => "boolean".to_string(),
    Value::Number(_) => "number".to_string(),
    Value::String(_) => "string".to_string(),
    Value::Array(_) => "array".to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn records() -> Value {
    json!([
      {"id": 1, "status": "pending", "created_at": "2024-03-01T10:00:00Z", "user_id": "u1"},
      {"id": "2", "request_status": "approved", "createdAt": "2024-03-02T10:00:00Z"},
      {"order_id": 3, "order_status": "cancelled", "date": "2024-03-03"}
    ])
  }

  #[test]
  fn test_all_envelopes_normalize_identically() {
    let list = records();
    let payloads = [
      list.clone(),
      json!({ "data": list }),
      json!({ "requests": list }),
      json!({ "requests": { "data": list } }),
      json!({ "orders": list }),
      json!({ "orders": { "data": list } }),
    ];

    let expected = normalize(&payloads[0]);
    assert_eq!(expected.len(), 3);
    for payload in &payloads[1..] {
      assert_eq!(normalize(payload), expected);
    }
  }

  #[test]
  fn test_envelope_detection_follows_priority() {
    assert_eq!(detect_envelope(&json!([])), Some(Envelope::Bare));
    assert_eq!(
      detect_envelope(&json!({"requests": {"data": []}})),
      Some(Envelope::RequestsData)
    );
    // `data` outranks `orders` when both are present
    assert_eq!(
      detect_envelope(&json!({"orders": [], "data": []})),
      Some(Envelope::Data)
    );
  }

  #[test]
  fn test_field_aliases() {
    let items = normalize(&records());

    assert_eq!(items[0].id, Some(ItemId::from(1u64)));
    assert_eq!(items[0].status.as_deref(), Some("pending"));
    assert_eq!(items[1].id, Some(ItemId::from("2")));
    assert_eq!(items[1].status.as_deref(), Some("approved"));
    assert_eq!(items[1].created_at.as_deref(), Some("2024-03-02T10:00:00Z"));
    assert_eq!(items[2].id, Some(ItemId::from("3")));
    assert_eq!(items[2].status.as_deref(), Some("cancelled"));
    assert_eq!(items[2].created_at.as_deref(), Some("2024-03-03"));
  }

  #[test]
  fn test_unknown_shape_is_empty_not_fatal() {
    assert!(normalize(&json!({"items": [1, 2]})).is_empty());
    assert!(normalize(&Value::Null).is_empty());
    assert!(matches!(
      try_normalize(&json!({"items": []})),
      Err(SyncError::Shape(_))
    ));
  }

  #[test]
  fn test_non_object_records_are_skipped() {
    let items = normalize(&json!([{"id": 1}, "junk", 7, null]));
    assert_eq!(items.len(), 1);
  }

  #[test]
  fn test_record_without_identity_keeps_listing() {
    let items = normalize(&json!([{"name": "anonymous", "status": "pending"}]));
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, None);
  }

  #[test]
  fn test_normalize_is_idempotent() {
    let payload = json!({"data": records()});
    assert_eq!(normalize(&payload), normalize(&payload));
  }
}
