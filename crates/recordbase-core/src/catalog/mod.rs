//! Schema store for recordbase.
//!
//! The catalog stores resources, forms, roles and permissions. Definitions are
//! plain data; abilities are resolved from them per request.

mod catalog;
mod field;
mod form;
mod resource;
mod role;
mod types;

/// Resource identifier.
pub type ResourceId = String;
/// Form identifier.
pub type FormId = String;
/// Role identifier.
pub type RoleId = String;
/// Permission identifier.
pub type PermissionId = String;

pub use catalog::Catalog;
pub use field::{FieldDef, FieldPermissions};
pub use form::FormDef;
pub use resource::{
    resource_initials, AccessRule, IdShape, ResourceDef, ResourcePermissions, DEFAULT_ID_PADDING,
    DEFAULT_ID_SHAPE,
};
pub use role::{
    AutoAssignmentRule, PermissionDef, RoleDef, RoleDirectory, CREATE_RESOURCES, MANAGE_RESOURCES,
};
pub use types::FieldType;
