//! Field-level diffs for history payloads
//!
//! Compares the JSON form of a deal before and after an update. Nested
//! objects are walked recursively; paths use `.` as separator.

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;

/// Fields that never show up in an `updated` diff (bookkeeping, or changed
/// only through their own operations)
const EXCLUDED_FIELDS: &[&str] = &[
    "id",
    "pipeline_id",
    "stage_id",
    "position",
    "tag_ids",
    "created_at",
    "updated_at",
    "version",
];

/// One changed field
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub from: Value,
    pub to: Value,
}

impl FieldChange {
    pub fn to_value(&self) -> Value {
        json!({ "field": self.field, "from": self.from, "to": self.to })
    }
}

fn diff_json_recursive(from: &Value, to: &Value, path: &str, changes: &mut Vec<FieldChange>) {
    match (from, to) {
        (Value::Object(from_obj), Value::Object(to_obj)) => {
            // Sorted for a stable event order
            let keys: BTreeSet<&String> = from_obj.keys().chain(to_obj.keys()).collect();

            for key in keys {
                let field_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                let f = from_obj.get(key).unwrap_or(&Value::Null);
                let t = to_obj.get(key).unwrap_or(&Value::Null);
                diff_json_recursive(f, t, &field_path, changes);
            }
        }
        (f, t) => {
            if f != t {
                changes.push(FieldChange {
                    field: path.to_string(),
                    from: f.clone(),
                    to: t.clone(),
                });
            }
        }
    }
}

fn to_filtered_json<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(mut json) => {
            if let Value::Object(obj) = &mut json {
                for field in EXCLUDED_FIELDS {
                    obj.remove(*field);
                }
            }
            Some(json)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize value for history diff");
            None
        }
    }
}

/// Changed fields between `before` and `after`
pub fn diff_fields<T: Serialize>(before: &T, after: &T) -> Vec<FieldChange> {
    let (Some(from), Some(to)) = (to_filtered_json(before), to_filtered_json(after)) else {
        return Vec::new();
    };
    let mut changes = Vec::new();
    diff_json_recursive(&from, &to, "", &mut changes);
    changes
}

/// Snapshot payload for a `created` / `deleted` event
pub fn snapshot<T: Serialize>(value: &T) -> Value {
    to_filtered_json(value).unwrap_or_else(|| json!({ "error": "serialization_failed" }))
}

/// `{"changes": [...]}` payload of an `updated` event
pub fn changes_payload(changes: &[FieldChange]) -> Value {
    json!({ "changes": changes.iter().map(FieldChange::to_value).collect::<Vec<_>>() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::models::Deal;

    fn deal() -> Deal {
        Deal {
            id: 1,
            pipeline_id: 1,
            stage_id: 10,
            title: "Acme".into(),
            value: Decimal::from(100),
            position: 10_000,
            company_id: Some(3),
            person_id: None,
            partner_id: None,
            tag_ids: Default::default(),
            created_at: 0,
            updated_at: 0,
            version: 1,
        }
    }

    #[test]
    fn reports_changed_fields_in_name_order() {
        let before = deal();
        let mut after = deal();
        after.title = "Acme Corp".into();
        after.company_id = None;
        after.version = 2;
        after.updated_at = 99;

        let changes = diff_fields(&before, &after);
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["company_id", "title"]);
        assert_eq!(changes[0].from, json!(3));
        assert_eq!(changes[0].to, Value::Null);
    }

    #[test]
    fn bookkeeping_fields_are_ignored() {
        let before = deal();
        let mut after = deal();
        after.position = 1;
        after.stage_id = 20;
        after.tag_ids.insert(5);
        assert!(diff_fields(&before, &after).is_empty());
    }

    #[test]
    fn nested_objects_use_dotted_paths() {
        let changes = diff_fields(
            &json!({ "a": { "b": 1, "c": 2 } }),
            &json!({ "a": { "b": 1, "c": 3 } }),
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "a.c");
    }

    #[test]
    fn payload_shape() {
        let payload = changes_payload(&[FieldChange {
            field: "title".into(),
            from: json!("a"),
            to: json!("b"),
        }]);
        assert_eq!(payload["changes"][0]["field"], "title");
        assert_eq!(snapshot(&deal())["title"], "Acme");
        assert!(snapshot(&deal()).get("version").is_none());
    }
}
