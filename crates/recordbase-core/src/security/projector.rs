//! Field-level redaction of record payloads.

use serde_json::{Map, Value};

use super::ability::{Ability, Action, Subject};
use crate::storage::Record;

/// Removes fields the ability cannot read.
///
/// Forbidden keys are dropped, never nulled, so a hidden field's existence is
/// not observable. Record metadata is left untouched.
pub struct FieldProjector;

impl FieldProjector {
    /// Project a data object, preserving key order.
    pub fn project_data(data: &Map<String, Value>, ability: &Ability) -> Map<String, Value> {
        data.iter()
            .filter(|(key, _)| ability.can(Action::Read, Subject::Field(key)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Project a record, including every stored version snapshot.
    pub fn project(record: &Record, ability: &Ability) -> Record {
        let mut projected = record.clone();
        projected.data = Self::project_data(&record.data, ability);
        for version in &mut projected.versions {
            version.data = Self::project_data(&version.data, ability);
        }
        projected
    }

    pub fn project_all(records: &[Record], ability: &Ability) -> Vec<Record> {
        records.iter().map(|r| Self::project(r, ability)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{Author, User};
    use chrono::Utc;
    use serde_json::json;

    fn ability(readable: &[&str]) -> Ability {
        let mut ability = Ability::deny_all("r");
        ability.readable_fields = readable.iter().map(|f| f.to_string()).collect();
        ability
    }

    fn record(data: Value) -> Record {
        let Value::Object(data) = data else {
            unreachable!()
        };
        Record::new(
            "id-1".into(),
            "2024-R0001".into(),
            "r".into(),
            None,
            data,
            Author::from(&User::new("u")),
            Utc::now(),
        )
    }

    #[test]
    fn test_keys_subset_of_readable() {
        let projected = FieldProjector::project(
            &record(json!({"a": 1, "b": 2, "c": 3})),
            &ability(&["a", "c", "zz"]),
        );
        assert_eq!(Value::Object(projected.data), json!({"a": 1, "c": 3}));
        assert_eq!(projected.id, "id-1");
    }

    #[test]
    fn test_existence_hiding() {
        let ability = ability(&["a"]);
        let mut first = record(json!({"a": 1, "secret": "x"}));
        let mut second = record(json!({"a": 1, "secret": "y"}));
        second.created_at = first.created_at;
        second.modified_at = first.modified_at;
        first = FieldProjector::project(&first, &ability);
        second = FieldProjector::project(&second, &ability);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_versions_projected() {
        let mut rec = record(json!({"a": 1, "secret": 1}));
        let Value::Object(next) = json!({"a": 2, "secret": 2}) else {
            unreachable!()
        };
        rec.apply_update(next, Author::from(&User::new("u")), Utc::now());

        let projected = FieldProjector::project(&rec, &ability(&["a"]));
        assert_eq!(Value::Object(projected.versions[0].data.clone()), json!({"a": 1}));
    }
}
