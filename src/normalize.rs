//! Response shape decoding.
//!
//! List endpoints of the marketplace API disagree on their response shape:
//! some return a bare JSON array, others wrap it as `{ "data": [...], "total": .. }`.
//! Responses are classified first and flattened second, so the fallback to an
//! empty list is an explicit, observable branch.

use serde_json::{Map, Value};

/// Classified shape of a list response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
  /// `[...]`
  Array(Vec<Value>),
  /// `{ "data": [...], ...meta }`; `meta` holds the remaining fields
  Envelope { data: Vec<Value>, meta: Map<String, Value> },
  /// Anything else: objects without an array `data`, scalars, null
  Unknown(Value),
}

impl ResponseShape {
  pub fn classify(value: Value) -> Self {
    match value {
      Value::Array(items) => Self::Array(items),
      Value::Object(mut obj) => match obj.remove("data") {
        Some(Value::Array(data)) => Self::Envelope { data, meta: obj },
        Some(other) => {
          obj.insert("data".to_string(), other);
          Self::Unknown(Value::Object(obj))
        }
        None => Self::Unknown(Value::Object(obj)),
      },
      other => Self::Unknown(other),
    }
  }

  pub fn kind(&self) -> ShapeKind {
    match self {
      Self::Array(_) => ShapeKind::Array,
      Self::Envelope { .. } => ShapeKind::Envelope,
      Self::Unknown(_) => ShapeKind::Unknown,
    }
  }

  /// Items of the list; `Unknown` yields an empty list.
  pub fn into_items(self) -> Vec<Value> {
    match self {
      Self::Array(items) => items,
      Self::Envelope { data, .. } => data,
      Self::Unknown(_) => Vec::new(),
    }
  }
}

/// Shape tag without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
  Array,
  Envelope,
  Unknown,
}

/// A list flattened out of a response, remembering where it came from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedList {
  pub items: Vec<Value>,
  /// Pagination fields of an envelope (`total`, `page`, ...)
  pub meta: Map<String, Value>,
  /// The response matched neither known shape and was read as empty
  pub shape_mismatch: bool,
}

impl NormalizedList {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  /// `total` from the envelope, falling back to the item count.
  pub fn total(&self) -> u64 {
    self
      .meta
      .get("total")
      .and_then(Value::as_u64)
      .unwrap_or(self.items.len() as u64)
  }
}

impl From<ResponseShape> for NormalizedList {
  fn from(shape: ResponseShape) -> Self {
    match shape {
      ResponseShape::Array(items) => Self {
        items,
        ..Self::default()
      },
      ResponseShape::Envelope { data, meta } => Self {
        items: data,
        meta,
        shape_mismatch: false,
      },
      ResponseShape::Unknown(value) => {
        tracing::debug!(
          kind = value_kind(&value),
          "response is neither an array nor a data envelope, reading as empty"
        );
        Self {
          shape_mismatch: true,
          ..Self::default()
        }
      }
    }
  }
}

/// Classify and flatten a response in one step.
pub fn normalize(value: Value) -> NormalizedList {
  ResponseShape::classify(value).into()
}

fn value_kind(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_bare_array() {
    let list = normalize(json!([{"id": 1}, {"id": 2}]));
    assert_eq!(list.items, vec![json!({"id": 1}), json!({"id": 2})]);
    assert!(!list.shape_mismatch);
  }

  #[test]
  fn test_envelope() {
    let list = normalize(json!({"data": [{"id": 1}], "total": 1, "page": 1}));
    assert_eq!(list.items, vec![json!({"id": 1})]);
    assert_eq!(list.total(), 1);
    assert_eq!(list.meta.get("page"), Some(&json!(1)));
    assert!(!list.meta.contains_key("data"));
  }

  #[test]
  fn test_missing_data_is_empty() {
    let list = normalize(json!({"total": 1}));
    assert!(list.is_empty());
    assert!(list.shape_mismatch);
  }

  #[test]
  fn test_non_array_data_is_unknown() {
    let shape = ResponseShape::classify(json!({"data": {"id": 1}}));
    assert_eq!(shape.kind(), ShapeKind::Unknown);
    assert_eq!(shape, ResponseShape::Unknown(json!({"data": {"id": 1}})));
    assert!(shape.into_items().is_empty());
  }

  #[test]
  fn test_scalars_are_unknown() {
    for value in [json!(null), json!(3), json!("list"), json!(true)] {
      let list = normalize(value);
      assert!(list.is_empty());
      assert!(list.shape_mismatch);
    }
  }

  #[test]
  fn test_total_falls_back_to_len() {
    let list = normalize(json!([1, 2, 3]));
    assert_eq!(list.total(), 3);
  }
}
