//! In-place edits of a raw list payload, applied across every known envelope.

use serde_json::{Map, Value};

use super::normalize::{ItemId, ENVELOPE_ORDER, STATUS_FIELDS};

/// Set the status of the record `id` in every known container of `raw`.
///
/// Returns how many records were updated.
pub fn set_status(raw: &mut Value, id: &ItemId, status: &str) -> usize {
  let mut updated = 0;
  for envelope in ENVELOPE_ORDER {
    let Some(records) = envelope.extract_mut(raw) else {
      continue;
    };
    for record in records.iter_mut().filter_map(Value::as_object_mut) {
      if ItemId::of(record).as_ref() != Some(id) {
        continue;
      }
      write_status(record, status);
      updated += 1;
    }
  }
  updated
}

/// Write `status` to the status alias `record` already uses, or `status`.
pub fn write_status(record: &mut Map<String, Value>, status: &str) {
  let field = STATUS_FIELDS
    .iter()
    .find(|f| record.contains_key(**f))
    .copied()
    .unwrap_or("status");
  record.insert(field.to_string(), Value::String(status.to_string()));
}

/// Remove the record `id` from every known container of `raw`.
///
/// Returns how many records were removed.
pub fn remove_item(raw: &mut Value, id: &ItemId) -> usize {
  let mut removed = 0;
  for envelope in ENVELOPE_ORDER {
    let Some(records) = envelope.extract_mut(raw) else {
      continue;
    };
    let before = records.len();
    records.retain(|record| {
      record
        .as_object()
        .map_or(true, |r| ItemId::of(r).as_ref() != Some(id))
    });
    removed += before - records.len();
  }
  removed
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::payload::normalize;
  use serde_json::json;

  #[test]
  fn test_set_status_uses_existing_alias() {
    let mut raw = json!({"requests": {"data": [
      {"request_id": 4, "request_status": "pending"},
      {"request_id": 5, "request_status": "pending"}
    ]}});

    assert_eq!(set_status(&mut raw, &ItemId::from(4u64), "approved"), 1);
    assert_eq!(raw["requests"]["data"][0]["request_status"], "approved");
    assert_eq!(raw["requests"]["data"][1]["request_status"], "pending");
    assert!(raw["requests"]["data"][0].get("status").is_none());
  }

  #[test]
  fn test_set_status_adds_field_when_missing() {
    let mut raw = json!([{"id": "a"}]);
    set_status(&mut raw, &ItemId::from("a"), "cancelled");
    assert_eq!(normalize(&raw)[0].status.as_deref(), Some("cancelled"));
  }

  #[test]
  fn test_edits_reach_every_container() {
    let mut raw = json!({
      "data": [{"id": 1, "status": "pending"}],
      "orders": {"data": [{"order_id": 1, "order_status": "pending"}]}
    });

    assert_eq!(set_status(&mut raw, &ItemId::from(1u64), "approved"), 2);
    assert_eq!(raw["orders"]["data"][0]["order_status"], "approved");

    assert_eq!(remove_item(&mut raw, &ItemId::from(1u64)), 2);
    assert_eq!(raw["data"], json!([]));
    assert_eq!(raw["orders"]["data"], json!([]));
  }

  #[test]
  fn test_remove_unknown_id_is_noop() {
    let mut raw = json!([{"id": 1}, {"name": "no id"}]);
    assert_eq!(remove_item(&mut raw, &ItemId::from(9u64)), 0);
    assert_eq!(raw.as_array().map(Vec::len), Some(2));
  }
}
