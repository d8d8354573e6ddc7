//! Catalog manager for resources, forms, roles and permissions.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::{debug, info};

use super::{FormDef, PermissionDef, ResourceDef, RoleDef, RoleDirectory};
use crate::error::{Error, Result};
use crate::storage::new_id;

/// Tree name for resource definitions.
const RESOURCE_TREE: &str = "catalog:resources";

/// Tree name for form definitions.
const FORM_TREE: &str = "catalog:forms";

/// Tree name for roles.
const ROLE_TREE: &str = "catalog:roles";

/// Tree name for permissions.
const PERMISSION_TREE: &str = "catalog:permissions";

/// Tree name for the resource name index (name -> resource id).
const NAME_TREE: &str = "catalog:names";

/// The catalog of administrator-defined configuration.
pub struct Catalog {
    resource_tree: Tree,
    form_tree: Tree,
    role_tree: Tree,
    permission_tree: Tree,
    name_tree: Tree,
    /// Decoded resources by id.
    resources: DashMap<String, Arc<ResourceDef>>,
    /// Role directory snapshot, rebuilt after any role or permission change.
    directory: RwLock<Option<Arc<RoleDirectory>>>,
}

impl Catalog {
    /// Open or create a catalog using the given sled database.
    pub fn open(db: &Db) -> Result<Self> {
        Ok(Self {
            resource_tree: db.open_tree(RESOURCE_TREE)?,
            form_tree: db.open_tree(FORM_TREE)?,
            role_tree: db.open_tree(ROLE_TREE)?,
            permission_tree: db.open_tree(PERMISSION_TREE)?,
            name_tree: db.open_tree(NAME_TREE)?,
            resources: DashMap::new(),
            directory: RwLock::new(None),
        })
    }

    // ---- resources ----

    /// Store a resource definition, assigning an id when it has none.
    ///
    /// Fails with a validation error for malformed definitions or a taken
    /// name, and with a configuration error when an unknown role is referenced.
    pub fn save_resource(&self, mut resource: ResourceDef) -> Result<Arc<ResourceDef>> {
        if resource.id.is_empty() {
            resource.id = new_id();
        }
        resource.validate()?;
        self.check_roles(&resource.name, resource.role_references())?;

        let bytes = serde_json::to_vec(&resource)?;
        let id = resource.id.clone();
        let name = resource.name.clone();

        let result: std::result::Result<(), TransactionError<Error>> = (
            &self.resource_tree,
            &self.name_tree,
        )
            .transaction(|(resource_tx, name_tx)| {
                if let Some(owner) = name_tx.get(name.as_bytes())? {
                    if owner.as_ref() != id.as_bytes() {
                        return Err(ConflictableTransactionError::Abort(Error::Validation(
                            format!("resource name '{}' is already taken", name),
                        )));
                    }
                }
                if let Some(previous) = resource_tx.get(id.as_bytes())? {
                    let previous: ResourceDef = serde_json::from_slice(&previous)
                        .map_err(|e| ConflictableTransactionError::Abort(e.into()))?;
                    if previous.name != name {
                        name_tx.remove(previous.name.as_bytes())?;
                    }
                }
                name_tx.insert(name.as_bytes(), id.as_bytes())?;
                resource_tx.insert(id.as_bytes(), bytes.as_slice())?;
                Ok(())
            });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => return Err(Error::Storage(e)),
        }

        info!(resource = %id, name = %name, "saved resource");
        let resource = Arc::new(resource);
        self.resources.insert(id, Arc::clone(&resource));
        Ok(resource)
    }

    /// Get a resource by id.
    pub fn resource(&self, id: &str) -> Result<Arc<ResourceDef>> {
        if let Some(cached) = self.resources.get(id) {
            return Ok(Arc::clone(cached.value()));
        }
        let bytes = self
            .resource_tree
            .get(id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("resource '{}'", id)))?;
        let resource: Arc<ResourceDef> = Arc::new(serde_json::from_slice(&bytes)?);
        self.resources.insert(id.to_string(), Arc::clone(&resource));
        Ok(resource)
    }

    /// Get a resource by its unique name.
    pub fn resource_by_name(&self, name: &str) -> Result<Arc<ResourceDef>> {
        let id = self
            .name_tree
            .get(name.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("resource named '{}'", name)))?;
        self.resource(&String::from_utf8_lossy(&id))
    }

    /// All resources, ordered by id.
    pub fn list_resources(&self) -> Result<Vec<Arc<ResourceDef>>> {
        let mut out = Vec::new();
        for entry in self.resource_tree.iter() {
            let (key, _) = entry?;
            out.push(self.resource(&String::from_utf8_lossy(&key))?);
        }
        Ok(out)
    }

    /// Delete a resource and its forms. Records are removed by the record store.
    pub fn delete_resource(&self, id: &str) -> Result<ResourceDef> {
        let bytes = self
            .resource_tree
            .remove(id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("resource '{}'", id)))?;
        let resource: ResourceDef = serde_json::from_slice(&bytes)?;
        self.name_tree.remove(resource.name.as_bytes())?;
        self.resources.remove(id);

        let forms = self.forms_for(id)?;
        for form in &forms {
            self.form_tree.remove(form.id.as_bytes())?;
        }
        info!(resource = %id, forms = forms.len(), "deleted resource");
        Ok(resource)
    }

    // ---- forms ----

    /// Store a form. Its resource must exist.
    pub fn save_form(&self, mut form: FormDef) -> Result<FormDef> {
        if form.id.is_empty() {
            form.id = new_id();
        }
        form.validate()?;
        if !self.resource_tree.contains_key(form.resource.as_bytes())? {
            return Err(Error::Configuration(format!(
                "form '{}' is bound to unknown resource '{}'",
                form.name, form.resource
            )));
        }
        self.check_roles(&form.name, form.permissions.role_references())?;

        self.form_tree
            .insert(form.id.as_bytes(), serde_json::to_vec(&form)?)?;
        info!(form = %form.id, resource = %form.resource, "saved form");
        Ok(form)
    }

    /// Get a form by id.
    pub fn form(&self, id: &str) -> Result<FormDef> {
        let bytes = self
            .form_tree
            .get(id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("form '{}'", id)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All forms bound to a resource.
    pub fn forms_for(&self, resource: &str) -> Result<Vec<FormDef>> {
        let mut out = Vec::new();
        for entry in self.form_tree.iter() {
            let (_, bytes) = entry?;
            let form: FormDef = serde_json::from_slice(&bytes)?;
            if form.resource == resource {
                out.push(form);
            }
        }
        Ok(out)
    }

    /// Delete a form.
    pub fn delete_form(&self, id: &str) -> Result<()> {
        self.form_tree
            .remove(id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("form '{}'", id)))?;
        info!(form = %id, "deleted form");
        Ok(())
    }

    // ---- roles and permissions ----

    /// Store a role. Every permission it grants must exist.
    pub fn save_role(&self, mut role: RoleDef) -> Result<RoleDef> {
        if role.id.is_empty() {
            role.id = new_id();
        }
        if role.title.trim().is_empty() {
            return Err(Error::Validation("role title must not be empty".into()));
        }
        for permission in &role.permissions {
            if !self.permission_tree.contains_key(permission.as_bytes())? {
                return Err(Error::Configuration(format!(
                    "role '{}' grants unknown permission '{}'",
                    role.id, permission
                )));
            }
        }
        for rule in &role.auto_assignment {
            if rule.category.is_empty() {
                return Err(Error::Validation(format!(
                    "role '{}' has an auto-assignment rule without category",
                    role.id
                )));
            }
        }

        self.role_tree
            .insert(role.id.as_bytes(), serde_json::to_vec(&role)?)?;
        self.invalidate_directory();
        info!(role = %role.id, "saved role");
        Ok(role)
    }

    /// Get a role by id.
    pub fn role(&self, id: &str) -> Result<RoleDef> {
        let bytes = self
            .role_tree
            .get(id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("role '{}'", id)))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// All roles, ordered by id.
    pub fn list_roles(&self) -> Result<Vec<RoleDef>> {
        decode_all(&self.role_tree)
    }

    /// Delete a role and strip it from every resource, field and form.
    pub fn delete_role(&self, id: &str) -> Result<()> {
        self.role_tree
            .remove(id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("role '{}'", id)))?;
        self.invalidate_directory();

        let mut touched = 0usize;
        for resource in self.list_resources()? {
            let mut resource = (*resource).clone();
            if resource.remove_role(id) {
                self.resource_tree
                    .insert(resource.id.as_bytes(), serde_json::to_vec(&resource)?)?;
                self.resources.insert(resource.id.clone(), Arc::new(resource));
                touched += 1;
            }
        }
        for mut form in decode_all::<FormDef>(&self.form_tree)? {
            if form.permissions.remove_role(id) {
                self.form_tree
                    .insert(form.id.as_bytes(), serde_json::to_vec(&form)?)?;
                touched += 1;
            }
        }
        info!(role = %id, definitions = touched, "deleted role");
        Ok(())
    }

    /// Store a permission.
    pub fn save_permission(&self, mut permission: PermissionDef) -> Result<PermissionDef> {
        if permission.id.is_empty() {
            permission.id = new_id();
        }
        if permission.permission_type.trim().is_empty() {
            return Err(Error::Validation("permission type must not be empty".into()));
        }
        self.permission_tree
            .insert(permission.id.as_bytes(), serde_json::to_vec(&permission)?)?;
        self.invalidate_directory();
        info!(permission = %permission.id, kind = %permission.permission_type, "saved permission");
        Ok(permission)
    }

    /// All permissions, ordered by id.
    pub fn list_permissions(&self) -> Result<Vec<PermissionDef>> {
        decode_all(&self.permission_tree)
    }

    /// Delete a permission and revoke it from every role.
    pub fn delete_permission(&self, id: &str) -> Result<()> {
        self.permission_tree
            .remove(id.as_bytes())?
            .ok_or_else(|| Error::NotFound(format!("permission '{}'", id)))?;
        for mut role in self.list_roles()? {
            let before = role.permissions.len();
            role.permissions.retain(|p| p != id);
            if role.permissions.len() != before {
                self.role_tree
                    .insert(role.id.as_bytes(), serde_json::to_vec(&role)?)?;
            }
        }
        self.invalidate_directory();
        info!(permission = %id, "deleted permission");
        Ok(())
    }

    /// Current role directory, built lazily and cached until roles change.
    pub fn role_directory(&self) -> Result<Arc<RoleDirectory>> {
        if let Some(directory) = self.directory.read().as_ref() {
            return Ok(Arc::clone(directory));
        }
        let directory = Arc::new(RoleDirectory::new(
            self.list_roles()?,
            self.list_permissions()?,
        ));
        debug!("rebuilt role directory");
        *self.directory.write() = Some(Arc::clone(&directory));
        Ok(directory)
    }

    /// Flush catalog trees to disk.
    pub fn flush(&self) -> Result<()> {
        for tree in [
            &self.resource_tree,
            &self.form_tree,
            &self.role_tree,
            &self.permission_tree,
            &self.name_tree,
        ] {
            tree.flush()?;
        }
        Ok(())
    }

    fn invalidate_directory(&self) {
        *self.directory.write() = None;
    }

    fn check_roles<'a>(
        &self,
        owner: &str,
        roles: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        for role in roles {
            if !self.role_tree.contains_key(role.as_bytes())? {
                return Err(Error::Configuration(format!(
                    "'{}' references unknown role '{}'",
                    owner, role
                )));
            }
        }
        Ok(())
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(tree: &Tree) -> Result<Vec<T>> {
    tree.iter()
        .values()
        .map(|bytes| Ok(serde_json::from_slice(&bytes?)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{
        AccessRule, FieldDef, FieldType, ResourcePermissions, CREATE_RESOURCES,
    };
    use crate::query::Filter;

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn seeded(db: &Db) -> Catalog {
        let catalog = Catalog::open(db).unwrap();
        catalog
            .save_permission(PermissionDef::global("p1", CREATE_RESOURCES))
            .unwrap();
        catalog
            .save_role(RoleDef::new("sales", "Sales").with_permission("p1"))
            .unwrap();
        catalog.save_role(RoleDef::new("finance", "Finance")).unwrap();
        catalog
    }

    fn orders() -> ResourceDef {
        ResourceDef::new("Orders")
            .with_field(FieldDef::new("country", FieldType::Text))
            .with_field(FieldDef::new("amount", FieldType::Number).visible_to(&["finance"]))
            .with_permissions(ResourcePermissions {
                can_see: vec!["sales".into()],
                can_see_records: vec![AccessRule::when("sales", Filter::eq("country", "FR"))],
                ..Default::default()
            })
    }

    #[test]
    fn test_save_and_get_resource() {
        let db = test_db();
        let catalog = seeded(&db);

        let saved = catalog.save_resource(orders()).unwrap();
        assert!(!saved.id.is_empty());
        assert_eq!(catalog.resource(&saved.id).unwrap().name, "Orders");
        assert_eq!(catalog.resource_by_name("Orders").unwrap().id, saved.id);
        assert_eq!(catalog.list_resources().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let db = test_db();
        let catalog = seeded(&db);

        catalog.save_resource(orders()).unwrap();
        let err = catalog.save_resource(orders()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_rename_frees_old_name() {
        let db = test_db();
        let catalog = seeded(&db);

        let saved = catalog.save_resource(orders()).unwrap();
        let mut renamed = (*saved).clone();
        renamed.name = "Sales orders".into();
        catalog.save_resource(renamed).unwrap();

        assert!(catalog.resource_by_name("Orders").unwrap_err().is_not_found());
        catalog.save_resource(orders()).unwrap();
    }

    #[test]
    fn test_unknown_role_is_configuration_error() {
        let db = test_db();
        let catalog = seeded(&db);

        let resource = orders().with_field(FieldDef::new("x", FieldType::Text).visible_to(&["ghost"]));
        let err = catalog.save_resource(resource).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_delete_role_cascades() {
        let db = test_db();
        let catalog = seeded(&db);

        let resource = catalog.save_resource(orders()).unwrap();
        let form = catalog
            .save_form(FormDef::new("Order entry", resource.id.clone()).with_permissions(
                ResourcePermissions {
                    can_create_records: vec!["sales".into()],
                    ..Default::default()
                },
            ))
            .unwrap();

        catalog.delete_role("sales").unwrap();

        let resource = catalog.resource(&resource.id).unwrap();
        assert!(!resource.role_references().contains("sales"));
        assert!(catalog.form(&form.id).unwrap().permissions.can_create_records.is_empty());
        assert!(!catalog.role_directory().unwrap().contains_role("sales"));
    }

    #[test]
    fn test_delete_resource_removes_forms() {
        let db = test_db();
        let catalog = seeded(&db);

        let resource = catalog.save_resource(orders()).unwrap();
        let form = catalog
            .save_form(FormDef::new("Order entry", resource.id.clone()))
            .unwrap();

        catalog.delete_resource(&resource.id).unwrap();
        assert!(catalog.resource(&resource.id).unwrap_err().is_not_found());
        assert!(catalog.form(&form.id).unwrap_err().is_not_found());
        assert!(catalog.resource_by_name("Orders").unwrap_err().is_not_found());
    }

    #[test]
    fn test_form_requires_resource() {
        let db = test_db();
        let catalog = seeded(&db);

        let err = catalog.save_form(FormDef::new("Orphan", "missing")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_delete_permission_revokes_from_roles() {
        let db = test_db();
        let catalog = seeded(&db);

        catalog.delete_permission("p1").unwrap();
        assert!(catalog.role("sales").unwrap().permissions.is_empty());
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let config = sled::Config::new().path(dir.path());

        let id = {
            let db = config.clone().open().unwrap();
            let catalog = seeded(&db);
            let id = catalog.save_resource(orders()).unwrap().id.clone();
            catalog.flush().unwrap();
            id
        };

        let db = config.open().unwrap();
        let catalog = Catalog::open(&db).unwrap();
        assert_eq!(catalog.resource(&id).unwrap().fields.len(), 2);
        assert_eq!(catalog.list_roles().unwrap().len(), 2);
    }
}
