//! Form definitions: named view/edit configurations bound to a resource.

use serde::{Deserialize, Serialize};

use super::resource::ResourcePermissions;
use super::{FormId, ResourceId};
use crate::error::{Error, Result};

/// A form over a resource. Abilities resolved against a form use the form's
/// permission lists with the resource's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDef {
    /// Form id. Assigned by the catalog when empty.
    #[serde(default)]
    pub id: FormId,
    pub name: String,
    /// Owning resource.
    pub resource: ResourceId,
    #[serde(default)]
    pub permissions: ResourcePermissions,
}

impl FormDef {
    pub fn new(name: impl Into<String>, resource: impl Into<ResourceId>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            resource: resource.into(),
            permissions: ResourcePermissions::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<FormId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_permissions(mut self, permissions: ResourcePermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("form name must not be empty".into()));
        }
        if self.resource.is_empty() {
            return Err(Error::Validation(format!(
                "form '{}' is not bound to a resource",
                self.name
            )));
        }
        self.permissions.validate()
    }
}
