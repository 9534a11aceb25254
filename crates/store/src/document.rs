//! The document model: JSON maps, deep merges and value ordering.

use dpr_types::Instant;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::{StoreError, StoreResult};

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Serialize a typed record into a [`Document`].
pub fn to_document<T: Serialize>(record: &T) -> StoreResult<Document> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(serde::ser::Error::custom(
            format!("expected a JSON object, got {other}"),
        ))),
    }
}

/// Deserialize a typed record out of a [`Document`].
pub fn from_document<T: DeserializeOwned>(doc: &Document) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(doc.clone()))?)
}

/// Merge `fields` into `target`, Firestore-merge style: given keys overwrite,
/// nested objects merge recursively, untouched sibling keys are preserved.
pub fn merge_into(target: &mut Document, fields: &Document) {
    for (key, incoming) in fields {
        match (target.get_mut(key), incoming) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                merge_into(existing, nested);
            }
            _ => {
                target.insert(key.clone(), incoming.clone());
            }
        }
    }
}

/// Total order over JSON values for filter and order-by evaluation.
///
/// Nulls sort first; numbers compare numerically; strings that both parse as
/// instants compare as instants (tolerates mixed wire formats), otherwise
/// lexicographically. Mismatched or composite types compare by a fixed type
/// rank so sorting stays stable.
pub fn value_cmp(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (Instant::parse(x), Instant::parse(y)) {
                (Some(ix), Some(iy)) => ix.cmp(&iy),
                _ => x.cmp(y),
            }
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Split a document path into its collection prefix and document id.
/// Document paths have an even, nonzero number of segments.
pub(crate) fn split_path(path: &str) -> StoreResult<(&str, &str)> {
    let (collection, id) = path
        .rsplit_once('/')
        .ok_or_else(|| StoreError::InvalidPath(path.to_string()))?;

    let segments = path.split('/').count();
    if segments % 2 != 0 || collection.is_empty() || id.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }

    Ok((collection, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_preserves_untouched_sibling_fields() {
        let mut doc = to_document(&json!({
            "first_names": "Ana",
            "contact": { "email": "ana@example.com", "mobile_phone": "8888-0000" },
        }))
        .unwrap();

        let patch = to_document(&json!({
            "contact": { "mobile_phone": "8888-9999" },
            "deleted": false,
        }))
        .unwrap();

        merge_into(&mut doc, &patch);

        assert_eq!(doc["first_names"], json!("Ana"));
        assert_eq!(doc["contact"]["email"], json!("ana@example.com"));
        assert_eq!(doc["contact"]["mobile_phone"], json!("8888-9999"));
        assert_eq!(doc["deleted"], json!(false));
    }

    #[test]
    fn merge_replaces_non_object_values_wholesale() {
        let mut doc = to_document(&json!({ "items": ["a", "b"] })).unwrap();
        let patch = to_document(&json!({ "items": ["c"] })).unwrap();
        merge_into(&mut doc, &patch);
        assert_eq!(doc["items"], json!(["c"]));
    }

    #[test]
    fn value_cmp_orders_timestamps_numbers_and_nulls() {
        assert_eq!(
            value_cmp(&json!("2026-01-02T00:00:00.000Z"), &json!("2026-01-10")),
            Ordering::Less
        );
        assert_eq!(value_cmp(&json!(5), &json!(12.0)), Ordering::Less);
        assert_eq!(value_cmp(&Value::Null, &json!("x")), Ordering::Less);
    }

    #[test]
    fn split_path_accepts_documents_and_rejects_collections() {
        let (col, id) = split_path("clinics/c1/patients/p1").unwrap();
        assert_eq!(col, "clinics/c1/patients");
        assert_eq!(id, "p1");

        assert!(split_path("clinics/c1/patients").is_err());
        assert!(split_path("p1").is_err());
    }
}
