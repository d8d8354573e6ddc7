//! Field definitions for resources.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::FieldType;
use super::RoleId;

/// Per-field role lists. Empty lists inherit resource-level visibility.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldPermissions {
    pub can_see: Vec<RoleId>,
    pub can_update: Vec<RoleId>,
}

impl FieldPermissions {
    /// Whether both lists are empty.
    pub fn is_empty(&self) -> bool {
        self.can_see.is_empty() && self.can_update.is_empty()
    }
}

/// A field definition within a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name, the key under which values live in record data.
    pub name: String,
    /// Field data type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Field-level role lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<FieldPermissions>,
}

impl FieldDef {
    /// Create a field without its own permissions.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            label: None,
            permissions: None,
        }
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Restrict who may read this field.
    pub fn visible_to(mut self, roles: &[&str]) -> Self {
        let permissions = self.permissions.get_or_insert_with(Default::default);
        permissions.can_see = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Restrict who may write this field.
    pub fn editable_by(mut self, roles: &[&str]) -> Self {
        let permissions = self.permissions.get_or_insert_with(Default::default);
        permissions.can_update = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Label shown in history entries: the label if set, otherwise the name.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Roles listed for reading, empty if inherited.
    pub fn read_roles(&self) -> &[RoleId] {
        self.permissions
            .as_ref()
            .map(|p| p.can_see.as_slice())
            .unwrap_or(&[])
    }

    /// Roles listed for writing, empty if inherited.
    pub fn update_roles(&self) -> &[RoleId] {
        self.permissions
            .as_ref()
            .map(|p| p.can_update.as_slice())
            .unwrap_or(&[])
    }

    /// Whether a value has the shape this field expects.
    ///
    /// Only structural checks; `null` is always accepted.
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self.field_type {
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            t if t.is_multi_valued() => value.is_array(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_builders() {
        let field = FieldDef::new("salary", FieldType::Number)
            .with_label("Salary")
            .visible_to(&["hr"])
            .editable_by(&["hr-admin"]);
        assert_eq!(field.display_label(), "Salary");
        assert_eq!(field.read_roles(), &["hr".to_string()]);
        assert_eq!(field.update_roles(), &["hr-admin".to_string()]);

        let plain = FieldDef::new("name", FieldType::Text);
        assert_eq!(plain.display_label(), "name");
        assert!(plain.read_roles().is_empty());
    }

    #[test]
    fn test_accepts() {
        let number = FieldDef::new("n", FieldType::Number);
        assert!(number.accepts(&json!(3)));
        assert!(number.accepts(&json!(null)));
        assert!(!number.accepts(&json!("3")));

        let tags = FieldDef::new("tags", FieldType::Tagbox);
        assert!(tags.accepts(&json!(["a"])));
        assert!(!tags.accepts(&json!("a")));
    }

    #[test]
    fn test_field_json() {
        let field: FieldDef = serde_json::from_value(json!({
            "name": "country",
            "type": "text",
            "permissions": {"canSee": ["r1"]}
        }))
        .unwrap();
        assert_eq!(field.read_roles(), &["r1".to_string()]);
        assert!(field.update_roles().is_empty());
    }
}
