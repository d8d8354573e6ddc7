//! Acting users and immutable author snapshots.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::RoleId;

/// A user-held key/value used for attribute-based access control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionAttribute {
    /// Attribute category, e.g. `"region"`.
    pub category: String,
    /// Attribute value, e.g. `"EU"`.
    pub value: String,
}

impl PositionAttribute {
    pub fn new(category: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            value: value.into(),
        }
    }
}

/// The acting user as resolved by the authentication layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User identifier.
    pub id: String,
    /// Explicitly assigned role ids.
    #[serde(default)]
    pub roles: Vec<RoleId>,
    /// Position attributes.
    #[serde(default)]
    pub position_attributes: Vec<PositionAttribute>,
}

impl User {
    /// Create a user with no roles or attributes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Add a role.
    pub fn with_role(mut self, role: impl Into<RoleId>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Add a position attribute.
    pub fn with_attribute(mut self, category: impl Into<String>, value: impl Into<String>) -> Self {
        self.position_attributes
            .push(PositionAttribute::new(category, value));
        self
    }

    /// All attribute values held for a category.
    pub fn attribute_values(&self, category: &str) -> Vec<&str> {
        self.position_attributes
            .iter()
            .filter(|a| a.category == category)
            .map(|a| a.value.as_str())
            .collect()
    }

    /// Attribute value for filter binding: a string for a single value, an
    /// array when the user holds several, `None` when the user holds none.
    pub fn attribute_value(&self, category: &str) -> Option<Value> {
        let values = self.attribute_values(category);
        match values.as_slice() {
            [] => None,
            [single] => Some(Value::String(single.to_string())),
            many => Some(Value::Array(
                many.iter().map(|v| Value::String(v.to_string())).collect(),
            )),
        }
    }

    /// Attributes as a data object keyed by category.
    pub fn attribute_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for attribute in &self.position_attributes {
            if let Some(value) = self.attribute_value(&attribute.category) {
                map.insert(attribute.category.clone(), value);
            }
        }
        map
    }
}

/// Snapshot of a user's identity at the time of a write.
///
/// Never a live reference: later role changes do not alter stored authors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub user: String,
    #[serde(default)]
    pub roles: Vec<RoleId>,
    #[serde(default)]
    pub position_attributes: Vec<PositionAttribute>,
}

impl From<&User> for Author {
    fn from(user: &User) -> Self {
        Self {
            user: user.id.clone(),
            roles: user.roles.clone(),
            position_attributes: user.position_attributes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_value_shapes() {
        let user = User::new("u1")
            .with_attribute("region", "EU")
            .with_attribute("team", "a")
            .with_attribute("team", "b");

        assert_eq!(user.attribute_value("region"), Some(json!("EU")));
        assert_eq!(user.attribute_value("team"), Some(json!(["a", "b"])));
        assert_eq!(user.attribute_value("site"), None);
        assert_eq!(
            Value::Object(user.attribute_map()),
            json!({"region": "EU", "team": ["a", "b"]})
        );
    }

    #[test]
    fn test_author_is_snapshot() {
        let mut user = User::new("u1").with_role("editor");
        let author = Author::from(&user);
        user.roles.clear();
        assert_eq!(author.roles, vec!["editor".to_string()]);
        assert_eq!(author.user, "u1");
    }

    #[test]
    fn test_user_json() {
        let user: User = serde_json::from_value(json!({
            "id": "u2",
            "roles": ["r1"],
            "positionAttributes": [{"category": "region", "value": "EU"}]
        }))
        .unwrap();
        assert_eq!(user.roles, vec!["r1".to_string()]);
        assert_eq!(user.attribute_values("region"), vec!["EU"]);
    }
}
