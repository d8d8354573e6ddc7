//! Diff-based history of a record's data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::record::Record;
use crate::catalog::{FieldDef, FieldType};
use crate::security::{Ability, Action, Author, Subject};

/// Kind of a field change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Remove,
    Modify,
}

/// One field change between consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub field: String,
    pub label: String,
    #[serde(rename = "fieldType")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

/// Changes made by one write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub created_at: DateTime<Utc>,
    pub created_by: Author,
    /// May be empty: a write that changed nothing visible is still a boundary.
    pub changes: Vec<Change>,
}

/// Replays a record's version chain into an oldest-first change log.
pub struct HistoryEngine;

impl HistoryEngine {
    /// Build the history of `record` as seen through `ability`.
    ///
    /// Fields the ability cannot read are left out of every entry.
    pub fn build(record: &Record, fields: &[FieldDef], ability: &Ability) -> Vec<HistoryEntry> {
        let visible: Vec<&FieldDef> = fields
            .iter()
            .filter(|field| ability.can(Action::Read, Subject::Field(&field.name)))
            .collect();

        let snapshots: Vec<&Map<String, Value>> = record
            .versions
            .iter()
            .map(|version| &version.data)
            .chain(std::iter::once(&record.data))
            .collect();

        snapshots
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                // The next snapshot's author made this transition.
                let (created_by, created_at) = match record.versions.get(i + 1) {
                    Some(next) => (&next.created_by, next.created_at),
                    None => (&record.modified_by, record.modified_at),
                };
                HistoryEntry {
                    created_at,
                    created_by: created_by.clone(),
                    changes: diff(pair[0], pair[1], &visible),
                }
            })
            .collect()
    }
}

fn diff(prev: &Map<String, Value>, next: &Map<String, Value>, fields: &[&FieldDef]) -> Vec<Change> {
    fields
        .iter()
        .filter_map(|field| {
            let (kind, old, new) = match (prev.get(&field.name), next.get(&field.name)) {
                (None, Some(new)) => (ChangeKind::Add, None, Some(new.clone())),
                (Some(old), None) => (ChangeKind::Remove, Some(old.clone()), None),
                (Some(old), Some(new)) if old != new => {
                    (ChangeKind::Modify, Some(old.clone()), Some(new.clone()))
                }
                _ => return None,
            };
            Some(Change {
                kind,
                field: field.name.clone(),
                label: field.display_label().to_string(),
                field_type: field.field_type,
                old,
                new,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::User;
    use chrono::Duration;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn fields() -> Vec<FieldDef> {
        vec![
            FieldDef::new("a", FieldType::Number).with_label("Alpha"),
            FieldDef::new("b", FieldType::Number),
            FieldDef::new("secret", FieldType::Text),
        ]
    }

    fn ability(readable: &[&str]) -> Ability {
        let mut ability = Ability::deny_all("r");
        ability.readable_fields = readable.iter().map(|f| f.to_string()).collect();
        ability
    }

    fn author(name: &str) -> Author {
        Author::from(&User::new(name))
    }

    #[test]
    fn test_round_trip() {
        let t0 = Utc::now();
        let mut record = Record::new(
            "id".into(),
            "1".into(),
            "r".into(),
            None,
            obj(json!({"a": 1})),
            author("alice"),
            t0,
        );
        record.apply_update(obj(json!({"a": 1, "b": 2})), author("bob"), t0 + Duration::seconds(1));
        record.apply_update(obj(json!({"b": 3})), author("carol"), t0 + Duration::seconds(2));

        let history = HistoryEngine::build(&record, &fields(), &ability(&["a", "b", "secret"]));
        assert_eq!(history.len(), 2);

        assert_eq!(history[0].created_by.user, "bob");
        assert_eq!(history[0].created_at, t0 + Duration::seconds(1));
        assert_eq!(history[0].changes.len(), 1);
        assert_eq!(history[0].changes[0].kind, ChangeKind::Add);
        assert_eq!(history[0].changes[0].field, "b");
        assert_eq!(history[0].changes[0].new, Some(json!(2)));

        assert_eq!(history[1].created_by.user, "carol");
        let changes = &history[1].changes;
        assert_eq!(changes.len(), 2);
        assert_eq!((changes[0].kind, changes[0].field.as_str()), (ChangeKind::Remove, "a"));
        assert_eq!(changes[0].old, Some(json!(1)));
        assert_eq!(changes[0].label, "Alpha");
        assert_eq!((changes[1].kind, changes[1].field.as_str()), (ChangeKind::Modify, "b"));
        assert_eq!((changes[1].old.clone(), changes[1].new.clone()), (Some(json!(2)), Some(json!(3))));
    }

    #[test]
    fn test_hidden_fields_omitted_and_empty_entries_kept() {
        let t0 = Utc::now();
        let mut record = Record::new(
            "id".into(),
            "1".into(),
            "r".into(),
            None,
            obj(json!({"a": 1, "secret": "x"})),
            author("alice"),
            t0,
        );
        record.apply_update(obj(json!({"a": 1, "secret": "y"})), author("bob"), t0);

        let history = HistoryEngine::build(&record, &fields(), &ability(&["a"]));
        assert_eq!(history.len(), 1);
        assert!(history[0].changes.is_empty());
    }

    #[test]
    fn test_no_versions_no_entries() {
        let record = Record::new(
            "id".into(),
            "1".into(),
            "r".into(),
            None,
            obj(json!({"a": 1})),
            author("alice"),
            Utc::now(),
        );
        assert!(HistoryEngine::build(&record, &fields(), &ability(&["a"])).is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let change = Change {
            kind: ChangeKind::Add,
            field: "b".into(),
            label: "b".into(),
            field_type: FieldType::Number,
            old: None,
            new: Some(json!(2)),
        };
        assert_eq!(
            serde_json::to_value(&change).unwrap(),
            json!({"type": "add", "field": "b", "label": "b", "fieldType": "number", "new": 2})
        );
    }
}
