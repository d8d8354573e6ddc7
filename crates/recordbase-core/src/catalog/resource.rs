//! Resource definitions: record schema, permissions and aggregations.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use super::field::FieldDef;
use super::{ResourceId, RoleId};
use crate::error::{Error, Result};
use crate::query::{AggregationDef, Filter};
use crate::storage::IdTemplate;

/// Default identifier template.
pub const DEFAULT_ID_SHAPE: &str = "{year}-{resourceInitial}{incremental}";

/// Default zero padding of the incremental counter.
pub const DEFAULT_ID_PADDING: usize = 8;

/// A record-scoped grant: holders of `role` may act on records matching `access`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRule {
    pub role: RoleId,
    /// Condition over record data; absent means every record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<Filter>,
}

impl AccessRule {
    /// Unconditional grant.
    pub fn all(role: impl Into<RoleId>) -> Self {
        Self {
            role: role.into(),
            access: None,
        }
    }

    /// Grant restricted to records matching `access`.
    pub fn when(role: impl Into<RoleId>, access: Filter) -> Self {
        Self {
            role: role.into(),
            access: Some(access),
        }
    }
}

/// Role lists governing a resource (or form) and its records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourcePermissions {
    pub can_see: Vec<RoleId>,
    pub can_update: Vec<RoleId>,
    pub can_delete: Vec<RoleId>,
    pub can_create_records: Vec<RoleId>,
    pub can_see_records: Vec<AccessRule>,
    pub can_update_records: Vec<AccessRule>,
    pub can_delete_records: Vec<AccessRule>,
}

impl ResourcePermissions {
    /// Every role id referenced by these lists.
    pub fn role_references(&self) -> BTreeSet<&str> {
        self.can_see
            .iter()
            .chain(&self.can_update)
            .chain(&self.can_delete)
            .chain(&self.can_create_records)
            .chain(
                self.can_see_records
                    .iter()
                    .chain(&self.can_update_records)
                    .chain(&self.can_delete_records)
                    .map(|rule| &rule.role),
            )
            .map(String::as_str)
            .collect()
    }

    /// Drop every reference to `role`. Returns whether anything changed.
    pub fn remove_role(&mut self, role: &str) -> bool {
        let contains = self.role_references().contains(role);
        for list in [
            &mut self.can_see,
            &mut self.can_update,
            &mut self.can_delete,
            &mut self.can_create_records,
        ] {
            list.retain(|r| r != role);
        }
        for rules in [
            &mut self.can_see_records,
            &mut self.can_update_records,
            &mut self.can_delete_records,
        ] {
            rules.retain(|rule| rule.role != role);
        }
        contains
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for rule in self
            .can_see_records
            .iter()
            .chain(&self.can_update_records)
            .chain(&self.can_delete_records)
        {
            if let Some(access) = &rule.access {
                access.validate()?;
            }
        }
        Ok(())
    }
}

/// Template and padding for incremental record identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdShape {
    pub shape: String,
    pub padding: usize,
}

impl Default for IdShape {
    fn default() -> Self {
        Self {
            shape: DEFAULT_ID_SHAPE.to_string(),
            padding: DEFAULT_ID_PADDING,
        }
    }
}

impl IdShape {
    pub fn new(shape: impl Into<String>, padding: usize) -> Self {
        Self {
            shape: shape.into(),
            padding,
        }
    }
}

/// A user-defined record schema with its permission and aggregation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDef {
    /// Resource id. Assigned by the catalog when empty.
    #[serde(default)]
    pub id: ResourceId,
    /// Unique resource name.
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub permissions: ResourcePermissions,
    #[serde(default)]
    pub id_shape: IdShape,
    /// Field used to match rows on import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_field: Option<String>,
    #[serde(default)]
    pub aggregations: Vec<AggregationDef>,
}

impl ResourceDef {
    /// Create an empty resource.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            fields: Vec::new(),
            permissions: ResourcePermissions::default(),
            id_shape: IdShape::default(),
            import_field: None,
            aggregations: Vec::new(),
        }
    }

    /// Set the id.
    pub fn with_id(mut self, id: impl Into<ResourceId>) -> Self {
        self.id = id.into();
        self
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Set the permissions.
    pub fn with_permissions(mut self, permissions: ResourcePermissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set the identifier shape.
    pub fn with_id_shape(mut self, shape: impl Into<String>, padding: usize) -> Self {
        self.id_shape = IdShape::new(shape, padding);
        self
    }

    /// Add an aggregation.
    pub fn with_aggregation(mut self, aggregation: AggregationDef) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up an aggregation by name.
    pub fn aggregation(&self, name: &str) -> Option<&AggregationDef> {
        self.aggregations.iter().find(|a| a.name == name)
    }

    /// Every role id referenced by resource- and field-level permissions.
    pub fn role_references(&self) -> BTreeSet<&str> {
        let mut roles = self.permissions.role_references();
        for field in &self.fields {
            roles.extend(field.read_roles().iter().map(String::as_str));
            roles.extend(field.update_roles().iter().map(String::as_str));
        }
        roles
    }

    /// Drop every reference to `role`. Returns whether anything changed.
    pub fn remove_role(&mut self, role: &str) -> bool {
        let mut changed = self.permissions.remove_role(role);
        for field in &mut self.fields {
            if let Some(permissions) = &mut field.permissions {
                let before = permissions.can_see.len() + permissions.can_update.len();
                permissions.can_see.retain(|r| r != role);
                permissions.can_update.retain(|r| r != role);
                changed |= permissions.can_see.len() + permissions.can_update.len() < before;
            }
        }
        changed
    }

    /// Check the definition is self-consistent.
    ///
    /// Role existence is checked by the catalog, which knows the role set.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("resource name must not be empty".into()));
        }

        let mut names = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(Error::Validation(format!(
                    "resource '{}' has a field without name",
                    self.name
                )));
            }
            if !names.insert(field.name.as_str()) {
                return Err(Error::Validation(format!(
                    "resource '{}' declares field '{}' twice",
                    self.name, field.name
                )));
            }
        }

        if let Some(import_field) = &self.import_field {
            if !names.contains(import_field.as_str()) {
                return Err(Error::Configuration(format!(
                    "resource '{}' import field '{}' is not a field",
                    self.name, import_field
                )));
            }
        }

        IdTemplate::parse(&self.id_shape.shape)?;
        self.permissions.validate()?;

        let mut aggregation_names = HashSet::new();
        for aggregation in &self.aggregations {
            if !aggregation_names.insert(aggregation.name.as_str()) {
                return Err(Error::Validation(format!(
                    "resource '{}' declares aggregation '{}' twice",
                    self.name, aggregation.name
                )));
            }
            if let Some(unknown) = aggregation
                .source_fields
                .iter()
                .find(|f| !names.contains(f.as_str()))
            {
                return Err(Error::Validation(format!(
                    "aggregation '{}' source field '{}' is not a field of '{}'",
                    aggregation.name, unknown, self.name
                )));
            }
            aggregation.validate()?;
        }
        Ok(())
    }
}

/// Initials of a resource name: the first letter of each word, upper-cased.
pub fn resource_initials(name: &str) -> String {
    name.split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}
