//! Raw list payloads: shape detection, normalization and structural edits.

mod edit;
mod normalize;

pub use edit::{remove_item, set_status, write_status};
pub use normalize::{
  detect_envelope, normalize, try_normalize, Envelope, ItemId, NormalizedItem, CREATED_FIELDS,
  ENVELOPE_ORDER, ID_FIELDS, STATUS_FIELDS,
};
