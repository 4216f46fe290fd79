//! Serde-deserializable types matching marketplace API responses.
//!
//! These are for call sites that want typed items. The untyped path goes
//! through [`crate::normalize`], which also accepts bare arrays.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::normalize::NormalizedList;

/// Paginated list envelope: `{ "data": [...], "total": 12, "page": 1, ... }`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
  pub data: Vec<T>,
  #[serde(default)]
  pub total: Option<u64>,
  #[serde(default)]
  pub page: Option<u64>,
  #[serde(default, alias = "perPage", alias = "limit")]
  pub per_page: Option<u64>,
  #[serde(default, alias = "totalPages")]
  pub total_pages: Option<u64>,
}

impl<T: DeserializeOwned> Envelope<T> {
  /// Rebuild a typed envelope from a normalized list.
  ///
  /// Items that fail to deserialize are skipped.
  pub fn from_list(list: &NormalizedList) -> Self {
    let meta_u64 = |name: &str| list.meta.get(name).and_then(Value::as_u64);
    Self {
      data: list
        .items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect(),
      total: meta_u64("total"),
      page: meta_u64("page"),
      per_page: meta_u64("per_page")
        .or_else(|| meta_u64("perPage"))
        .or_else(|| meta_u64("limit")),
      total_pages: meta_u64("total_pages").or_else(|| meta_u64("totalPages")),
    }
  }

  /// Whether another page is available after this one.
  pub fn has_more(&self) -> bool {
    match (self.page, self.total_pages, self.total, self.per_page) {
      (Some(page), Some(pages), _, _) => page < pages,
      (Some(page), None, Some(total), Some(per_page)) if per_page > 0 => page * per_page < total,
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::normalize::normalize;
  use serde_json::json;

  #[derive(Debug, Deserialize, PartialEq)]
  struct Professional {
    id: u64,
    name: String,
  }

  #[test]
  fn test_from_envelope_list() {
    let list = normalize(json!({
      "data": [{"id": 1, "name": "Amina"}, {"id": 2}],
      "total": 30,
      "page": 1,
      "perPage": 10
    }));
    let envelope: Envelope<Professional> = Envelope::from_list(&list);

    assert_eq!(
      envelope.data,
      vec![Professional {
        id: 1,
        name: "Amina".into()
      }]
    );
    assert_eq!(envelope.total, Some(30));
    assert_eq!(envelope.per_page, Some(10));
    assert!(envelope.has_more());
  }

  #[test]
  fn test_from_bare_array() {
    let list = normalize(json!([{"id": 3, "name": "Youssef"}]));
    let envelope: Envelope<Professional> = Envelope::from_list(&list);
    assert_eq!(envelope.data.len(), 1);
    assert_eq!(envelope.total, None);
    assert!(!envelope.has_more());
  }

  #[test]
  fn test_deserialize_aliases() {
    let envelope: Envelope<u32> =
      serde_json::from_value(json!({"data": [1, 2], "page": 2, "totalPages": 2})).unwrap();
    assert_eq!(envelope.total_pages, Some(2));
    assert!(!envelope.has_more());
  }
}
