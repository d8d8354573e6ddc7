//! Database handle wiring the catalog and the record store together.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sled::Db;
use tracing::{debug, info};

use crate::catalog::{Catalog, FormDef, PermissionDef, ResourceDef, RoleDef};
use crate::error::{Error, Result};
use crate::security::{Ability, AbilityResolver, Action, Subject, User};
use crate::storage::{RecordStore, StorageConfig};

/// A full configuration document: permissions, roles, resources and forms.
///
/// Forms may name their resource by id or by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaDocument {
    pub permissions: Vec<PermissionDef>,
    pub roles: Vec<RoleDef>,
    pub resources: Vec<ResourceDef>,
    pub forms: Vec<FormDef>,
}

/// Counts of definitions written by [`Database::apply_schema`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchemaSummary {
    pub permissions: usize,
    pub roles: usize,
    pub resources: usize,
    pub forms: usize,
}

/// An open recordbase database.
pub struct Database {
    db: Db,
    catalog: Arc<Catalog>,
    records: RecordStore,
}

impl Database {
    /// Open or create a database with the given configuration.
    pub fn open(config: StorageConfig) -> Result<Self> {
        let db = config.to_sled_config().open()?;
        let catalog = Arc::new(Catalog::open(&db)?);
        let records = RecordStore::open(&db, Arc::clone(&catalog), &config)?;
        debug!(recovered = db.was_recovered(), "opened database");
        Ok(Self {
            db,
            catalog,
            records,
        })
    }

    /// The catalog, without permission checks.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The record store.
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    /// Whether the database was recovered from a previous crash.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Ability of `user` on a resource.
    pub fn ability(&self, resource_id: &str, user: &User) -> Result<Ability> {
        let resource = self.catalog.resource(resource_id)?;
        self.records.ability(&resource, None, user)
    }

    /// Create or edit a resource on behalf of `user`.
    ///
    /// New resources require the global create or manage capability; edits
    /// require update access on the existing definition.
    pub fn save_resource(&self, resource: ResourceDef, user: &User) -> Result<Arc<ResourceDef>> {
        let existing = if resource.id.is_empty() {
            None
        } else {
            match self.catalog.resource(&resource.id) {
                Ok(existing) => Some(existing),
                Err(Error::NotFound(_)) => None,
                Err(e) => return Err(e),
            }
        };

        let allowed = match &existing {
            Some(existing) => self
                .records
                .ability(existing, None, user)?
                .can(Action::Update, Subject::Resource),
            None => self.blank_ability(user)?.can(Action::Create, Subject::Resource),
        };
        if !allowed {
            return Err(Error::PermissionDenied(format!(
                "cannot save resource '{}'",
                resource.name
            )));
        }
        self.catalog.save_resource(resource)
    }

    /// Delete a resource with its forms and records on behalf of `user`.
    pub fn delete_resource(&self, resource_id: &str, user: &User) -> Result<()> {
        let resource = self.catalog.resource(resource_id)?;
        if !self
            .records
            .ability(&resource, None, user)?
            .can(Action::Delete, Subject::Resource)
        {
            return Err(Error::PermissionDenied(format!(
                "cannot delete resource '{}'",
                resource.name
            )));
        }
        self.purge_resource(resource_id)
    }

    /// Create or edit a form on behalf of `user`.
    pub fn save_form(&self, form: FormDef, user: &User) -> Result<FormDef> {
        let resource = self.catalog.resource(&form.resource)?;
        let existing = if form.id.is_empty() {
            None
        } else {
            match self.catalog.form(&form.id) {
                Ok(existing) => Some(existing),
                Err(Error::NotFound(_)) => None,
                Err(e) => return Err(e),
            }
        };

        let directory = self.catalog.role_directory()?;
        let resolver = AbilityResolver::new(&directory);
        let allowed = match &existing {
            Some(existing) => resolver
                .for_form(user, existing, &resource)
                .can(Action::Update, Subject::Resource),
            None => resolver
                .for_resource(user, &resource)
                .can(Action::Create, Subject::Resource),
        };
        if !allowed {
            return Err(Error::PermissionDenied(format!("cannot save form '{}'", form.name)));
        }
        self.catalog.save_form(form)
    }

    /// Delete a form on behalf of `user`. Records created through it are kept.
    pub fn delete_form(&self, form_id: &str, user: &User) -> Result<()> {
        let form = self.catalog.form(form_id)?;
        let resource = self.catalog.resource(&form.resource)?;
        let directory = self.catalog.role_directory()?;
        if !AbilityResolver::new(&directory)
            .for_form(user, &form, &resource)
            .can(Action::Delete, Subject::Resource)
        {
            return Err(Error::PermissionDenied(format!("cannot delete form '{}'", form.name)));
        }
        self.catalog.delete_form(form_id)
    }

    /// Apply a configuration document as the local administrator.
    ///
    /// Resources and forms without an id reuse the id of an existing
    /// definition with the same name, so applying a document twice is
    /// idempotent.
    pub fn apply_schema(&self, document: SchemaDocument) -> Result<SchemaSummary> {
        let mut summary = SchemaSummary::default();

        for permission in document.permissions {
            self.catalog.save_permission(permission)?;
            summary.permissions += 1;
        }
        for role in document.roles {
            self.catalog.save_role(role)?;
            summary.roles += 1;
        }
        for mut resource in document.resources {
            if resource.id.is_empty() {
                match self.catalog.resource_by_name(&resource.name) {
                    Ok(existing) => resource.id = existing.id.clone(),
                    Err(Error::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            self.catalog.save_resource(resource)?;
            summary.resources += 1;
        }
        for mut form in document.forms {
            match self.catalog.resource(&form.resource) {
                Ok(_) => {}
                Err(Error::NotFound(_)) => {
                    form.resource = self.catalog.resource_by_name(&form.resource)?.id.clone();
                }
                Err(e) => return Err(e),
            }
            if form.id.is_empty() {
                if let Some(existing) = self
                    .catalog
                    .forms_for(&form.resource)?
                    .into_iter()
                    .find(|existing| existing.name == form.name)
                {
                    form.id = existing.id;
                }
            }
            self.catalog.save_form(form)?;
            summary.forms += 1;
        }

        info!(
            permissions = summary.permissions,
            roles = summary.roles,
            resources = summary.resources,
            forms = summary.forms,
            "applied schema"
        );
        Ok(summary)
    }

    /// Flush all data to disk.
    pub fn flush(&self) -> Result<()> {
        self.catalog.flush()?;
        self.records.flush()?;
        self.db.flush()?;
        Ok(())
    }

    fn purge_resource(&self, resource_id: &str) -> Result<()> {
        let records = self.records.delete_by_resource(resource_id)?;
        let resource = self.catalog.delete_resource(resource_id)?;
        info!(resource = %resource.name, records, "purged resource");
        Ok(())
    }

    /// Ability carrying only the user's global capabilities.
    fn blank_ability(&self, user: &User) -> Result<Ability> {
        let directory = self.catalog.role_directory()?;
        Ok(AbilityResolver::new(&directory).for_resource(user, &ResourceDef::new("")))
    }
}
