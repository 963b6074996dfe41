//! Result normalization: native backend results to uniform tabular data.
//!
//! Pure functions only; no I/O. Column order comes from the backend's
//! declared order when one exists, otherwise from first appearance across
//! the rows (the first row leads). Missing fields are filled with JSON
//! null and extra fields are appended as new columns, never dropped, so
//! every returned row has the same shape.

use crate::types::{NativeResult, Row, Table};
use serde_json::{Map, Value as Json};

/// Normalize a native result into a [`Table`].
pub fn normalize(native: NativeResult) -> Table {
    let mut columns: Vec<String> = native.columns.unwrap_or_default();

    for row in &native.rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }

    let rows = native
        .rows
        .into_iter()
        .map(|mut row| {
            let mut uniform = Row::new();
            for column in &columns {
                let value = row.remove(column).unwrap_or(Json::Null);
                uniform.insert(column.clone(), value);
            }
            uniform
        })
        .collect();

    Table { columns, rows }
}

/// Flatten a document into a single-level row. Nested objects contribute
/// dotted column names; arrays and scalars pass through unchanged.
pub fn flatten_document(doc: &Json) -> Row {
    let mut row = Row::new();
    match doc {
        Json::Object(fields) => flatten_into(&mut row, "", fields),
        other => {
            row.insert("value".to_string(), other.clone());
        }
    }
    row
}

fn flatten_into(row: &mut Row, prefix: &str, fields: &Map<String, Json>) {
    for (key, value) in fields {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Json::Object(nested) => flatten_into(row, &name, nested),
            other => {
                row.insert(name, other.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Json) -> Row {
        match v {
            Json::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_first_row_defines_order() {
        let native = NativeResult::rows(vec![
            obj(json!({"branch": "east", "avg_cost": 12.5})),
            obj(json!({"avg_cost": 9.1, "branch": "west"})),
        ]);
        let table = normalize(native);
        assert_eq!(table.columns, vec!["branch", "avg_cost"]);
        let keys: Vec<&String> = table.rows[1].keys().collect();
        assert_eq!(keys, vec!["branch", "avg_cost"]);
    }

    #[test]
    fn test_declared_columns_take_precedence() {
        let native = NativeResult::with_columns(
            vec!["b".into(), "a".into()],
            vec![obj(json!({"a": 1, "b": 2}))],
        );
        let table = normalize(native);
        assert_eq!(table.columns, vec!["b", "a"]);
        let keys: Vec<&String> = table.rows[0].keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_missing_fields_filled_with_null() {
        let native = NativeResult::rows(vec![
            obj(json!({"a": 1, "b": 2})),
            obj(json!({"a": 3})),
        ]);
        let table = normalize(native);
        assert_eq!(table.rows[1]["b"], Json::Null);
        assert_eq!(table.rows[1].len(), 2);
    }

    #[test]
    fn test_extra_fields_appended_not_dropped() {
        let native = NativeResult::rows(vec![
            obj(json!({"a": 1})),
            obj(json!({"a": 2, "late": "x"})),
        ]);
        let table = normalize(native);
        assert_eq!(table.columns, vec!["a", "late"]);
        assert_eq!(table.rows[0]["late"], Json::Null);
        assert_eq!(table.rows[1]["late"], json!("x"));
    }

    #[test]
    fn test_empty_result() {
        let table = normalize(NativeResult::default());
        assert!(table.columns.is_empty());
        assert!(table.rows.is_empty());
    }

    #[test]
    fn test_flatten_nested_objects() {
        let row = flatten_document(&json!({
            "id": "doc-1",
            "address": {"city": "berlin", "geo": {"lat": 52.5}},
            "tags": ["a", "b"]
        }));
        assert_eq!(row["id"], json!("doc-1"));
        assert_eq!(row["address.city"], json!("berlin"));
        assert_eq!(row["address.geo.lat"], json!(52.5));
        assert_eq!(row["tags"], json!(["a", "b"]));
    }

    #[test]
    fn test_flatten_scalar_document() {
        let row = flatten_document(&json!(42));
        assert_eq!(row["value"], json!(42));
    }
}
