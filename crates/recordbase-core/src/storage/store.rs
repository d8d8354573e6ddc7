//! Record store: permission-checked record lifecycle on top of sled.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde_json::{Map, Value};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::{debug, info, instrument, warn};

use super::config::StorageConfig;
use super::history::{HistoryEngine, HistoryEntry};
use super::id_generator::IdGenerator;
use super::record::{new_id, Record};
use crate::catalog::{Catalog, FormId, ResourceDef};
use crate::error::{Error, Result};
use crate::query::{Filter, FilterEvaluator};
use crate::security::{Ability, AbilityResolver, Action, Author, FieldProjector, Subject, User};

/// Tree name for record documents (record id -> record).
const RECORD_TREE: &str = "records";

/// Tree name for the resource index (resource id + record id -> empty).
const RESOURCE_INDEX_TREE: &str = "index:resource";

/// Tree name for the identifier index (resource id + incremental id -> record id).
const INCREMENTAL_INDEX_TREE: &str = "index:incremental";

/// Options for [`RecordStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Include archived records.
    pub include_archived: bool,
    /// Caller filter, ANDed with the read filter and evaluated on projected data.
    pub filter: Option<Filter>,
    /// Resolve the ability against this form instead of the resource.
    pub form: Option<FormId>,
}

impl ListOptions {
    pub fn with_archived(mut self) -> Self {
        self.include_archived = true;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_form(mut self, form: impl Into<FormId>) -> Self {
        self.form = Some(form.into());
        self
    }
}

/// Owns record documents and enforces abilities on every operation.
pub struct RecordStore {
    catalog: Arc<Catalog>,
    records: Tree,
    resource_index: Tree,
    incremental_index: Tree,
    ids: IdGenerator,
    id_retry_limit: usize,
}

impl RecordStore {
    /// Open the record trees of `db`.
    pub fn open(db: &Db, catalog: Arc<Catalog>, config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            catalog,
            records: db.open_tree(RECORD_TREE)?,
            resource_index: db.open_tree(RESOURCE_INDEX_TREE)?,
            incremental_index: db.open_tree(INCREMENTAL_INDEX_TREE)?,
            ids: IdGenerator::open(db)?,
            id_retry_limit: config.id_retry_limit.max(1),
        })
    }

    /// Resolve the ability of `user` on a resource, or on one of its forms.
    pub fn ability(&self, resource: &ResourceDef, form: Option<&str>, user: &User) -> Result<Ability> {
        let directory = self.catalog.role_directory()?;
        let resolver = AbilityResolver::new(&directory);
        match form {
            None => Ok(resolver.for_resource(user, resource)),
            Some(form_id) => {
                let form = self.catalog.form(form_id)?;
                if form.resource != resource.id {
                    return Err(Error::Validation(format!(
                        "form '{}' does not belong to resource '{}'",
                        form_id, resource.name
                    )));
                }
                Ok(resolver.for_form(user, &form, resource))
            }
        }
    }

    /// Create a record and return it as the creator may see it.
    #[instrument(skip_all, fields(resource = %resource_id, user = %user.id))]
    pub fn create(
        &self,
        resource_id: &str,
        form: Option<&str>,
        data: Map<String, Value>,
        user: &User,
    ) -> Result<Record> {
        let resource = self.catalog.resource(resource_id)?;
        let ability = self.ability(&resource, form, user)?;
        if !ability.can(Action::Create, Subject::Records) {
            debug!("create denied");
            return Err(Error::PermissionDenied(format!(
                "cannot create records of '{}'",
                resource.name
            )));
        }
        check_fields(&resource, &data)?;
        if let Some(field) = data
            .keys()
            .find(|key| !ability.can(Action::Create, Subject::Field(key)))
        {
            debug!(field = %field, "field write denied");
            return Err(Error::PermissionDenied(format!("cannot set field '{}'", field)));
        }

        let now = Utc::now();
        let author = Author::from(user);
        for attempt in 1..=self.id_retry_limit {
            let incremental_id = self.ids.next(&resource, now.year())?;
            let record = Record::new(
                new_id(),
                incremental_id,
                resource.id.clone(),
                form.map(str::to_string),
                data.clone(),
                author.clone(),
                now,
            );
            if self.insert_new(&record)? {
                debug!(record = %record.id, incremental_id = %record.incremental_id, "created record");
                return Ok(FieldProjector::project(&record, &ability));
            }
            debug!(attempt, incremental_id = %record.incremental_id, "identifier taken, retrying");
        }

        warn!(attempts = self.id_retry_limit, "identifier retries exhausted");
        Err(Error::Validation(format!(
            "could not allocate a unique identifier for '{}' after {} attempts",
            resource.name, self.id_retry_limit
        )))
    }

    /// Get a visible, non-archived record.
    #[instrument(skip_all, fields(record = %record_id, user = %user.id))]
    pub fn get(&self, record_id: &str, user: &User) -> Result<Record> {
        let record = self.load(record_id)?;
        if record.archived {
            return Err(not_found(record_id));
        }
        let resource = self.catalog.resource(&record.resource)?;
        let ability = self.ability(&resource, None, user)?;
        check_access(&ability, Action::Read, &record)?;
        Ok(FieldProjector::project(&record, &ability))
    }

    /// Replace a record's data, snapshotting the previous data into a version.
    ///
    /// Fields the user cannot update must be omitted or unchanged; omitted
    /// ones are carried over, as are fields the user cannot read.
    #[instrument(skip_all, fields(record = %record_id, user = %user.id))]
    pub fn update(&self, record_id: &str, data: Map<String, Value>, user: &User) -> Result<Record> {
        let current = self.load(record_id)?;
        let resource = self.catalog.resource(&current.resource)?;
        let ability = self.ability(&resource, None, user)?;
        check_fields(&resource, &data)?;
        let author = Author::from(user);

        let record = self.mutate(record_id, |record| {
            if record.archived {
                return Err(not_found(record_id));
            }
            check_access(&ability, Action::Update, record)?;
            let merged = merge_update(&record.data, &data, &ability)?;
            record.apply_update(merged, author.clone(), Utc::now());
            Ok(())
        })?;

        debug!(versions = record.versions.len(), "updated record");
        Ok(FieldProjector::project(&record, &ability))
    }

    /// Archive a record. Requires delete access.
    #[instrument(skip_all, fields(record = %record_id, user = %user.id))]
    pub fn archive(&self, record_id: &str, user: &User) -> Result<Record> {
        self.set_archived(record_id, user, true)
    }

    /// Restore an archived record. Requires update access.
    #[instrument(skip_all, fields(record = %record_id, user = %user.id))]
    pub fn unarchive(&self, record_id: &str, user: &User) -> Result<Record> {
        self.set_archived(record_id, user, false)
    }

    /// Hard-delete records and their versions. Either all are deleted or none.
    #[instrument(skip_all, fields(count = record_ids.len(), user = %user.id))]
    pub fn delete(&self, record_ids: &[&str], user: &User) -> Result<usize> {
        let mut doomed = Vec::with_capacity(record_ids.len());
        for record_id in record_ids {
            let record = self.load(record_id)?;
            let resource = self.catalog.resource(&record.resource)?;
            let ability = self.ability(&resource, None, user)?;
            check_access(&ability, Action::Delete, &record)?;
            doomed.push(record);
        }

        let result: std::result::Result<(), TransactionError<Error>> = (
            &self.records,
            &self.resource_index,
            &self.incremental_index,
        )
            .transaction(|(records, resource_index, incremental_index)| {
                for record in &doomed {
                    records.remove(record.id.as_bytes())?;
                    resource_index.remove(index_key(&record.resource, &record.id))?;
                    incremental_index.remove(index_key(&record.resource, &record.incremental_id))?;
                }
                Ok(())
            });
        result.map_err(from_transaction)?;

        debug!(deleted = doomed.len(), "deleted records");
        Ok(doomed.len())
    }

    /// Records of a resource the user can read, projected, in creation order.
    #[instrument(skip_all, fields(resource = %resource_id, user = %user.id))]
    pub fn list(&self, resource_id: &str, user: &User, options: ListOptions) -> Result<Vec<Record>> {
        let resource = self.catalog.resource(resource_id)?;
        let ability = self.ability(&resource, options.form.as_deref(), user)?;
        let access = ability.record_access(Action::Read);
        if access.is_none() {
            debug!("no readable records");
            return Ok(Vec::new());
        }

        let filter = match &options.filter {
            Some(filter) => {
                filter.validate()?;
                let bound = filter
                    .bind(&|category| user.attribute_value(category))
                    .ok_or_else(|| {
                        Error::Validation(
                            "filter references a position attribute the user lacks".into(),
                        )
                    })?;
                Some(bound)
            }
            None => None,
        };

        let readable: Vec<Record> = self
            .scan_resource(&resource.id)?
            .into_iter()
            .filter(|record| options.include_archived || !record.archived)
            .filter(|record| access.matches(&record.data))
            .collect();

        let mut out = Vec::with_capacity(readable.len());
        for projected in FieldProjector::project_all(&readable, &ability) {
            if let Some(filter) = &filter {
                if !FilterEvaluator::evaluate(filter, &projected.data)? {
                    continue;
                }
            }
            out.push(projected);
        }
        Ok(out)
    }

    /// History of a visible, non-archived record, as the user may see it.
    #[instrument(skip_all, fields(record = %record_id, user = %user.id))]
    pub fn history(&self, record_id: &str, user: &User) -> Result<Vec<HistoryEntry>> {
        let record = self.load(record_id)?;
        if record.archived {
            return Err(not_found(record_id));
        }
        let resource = self.catalog.resource(&record.resource)?;
        let ability = self.ability(&resource, None, user)?;
        check_access(&ability, Action::Read, &record)?;
        Ok(HistoryEngine::build(&record, &resource.fields, &ability))
    }

    /// Run a named aggregation over the records the user can read.
    #[instrument(skip_all, fields(resource = %resource_id, aggregation = %name, user = %user.id))]
    pub fn aggregate(
        &self,
        resource_id: &str,
        name: &str,
        user: &User,
    ) -> Result<Vec<Map<String, Value>>> {
        let resource = self.catalog.resource(resource_id)?;
        let aggregation = resource.aggregation(name).ok_or_else(|| {
            Error::NotFound(format!("aggregation '{}' of '{}'", name, resource.name))
        })?;
        let rows: Vec<Map<String, Value>> = self
            .list(resource_id, user, ListOptions::default())?
            .into_iter()
            .map(|record| record.data)
            .collect();
        aggregation.execute(&rows)
    }

    /// Remove every record of a resource along with its counters.
    pub fn delete_by_resource(&self, resource_id: &str) -> Result<usize> {
        let prefix = index_prefix(resource_id);
        let mut deleted = 0usize;
        for entry in self.resource_index.scan_prefix(&prefix).keys() {
            let key = entry?;
            let record_id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            self.records.remove(record_id.as_bytes())?;
            self.resource_index.remove(&key)?;
            deleted += 1;
        }
        for key in self.incremental_index.scan_prefix(&prefix).keys() {
            self.incremental_index.remove(key?)?;
        }
        self.ids.reset(resource_id)?;
        info!(resource = %resource_id, deleted, "deleted records of resource");
        Ok(deleted)
    }

    /// Flush record trees to disk.
    pub fn flush(&self) -> Result<()> {
        self.records.flush()?;
        self.resource_index.flush()?;
        self.incremental_index.flush()?;
        Ok(())
    }

    fn set_archived(&self, record_id: &str, user: &User, archived: bool) -> Result<Record> {
        let current = self.load(record_id)?;
        let resource = self.catalog.resource(&current.resource)?;
        let ability = self.ability(&resource, None, user)?;
        let action = if archived { Action::Delete } else { Action::Update };

        let record = self.mutate(record_id, |record| {
            check_access(&ability, action, record)?;
            record.archived = archived;
            Ok(())
        })?;
        debug!(archived, "toggled archive flag");
        Ok(FieldProjector::project(&record, &ability))
    }

    fn load(&self, record_id: &str) -> Result<Record> {
        let bytes = self
            .records
            .get(record_id.as_bytes())?
            .ok_or_else(|| not_found(record_id))?;
        Record::from_bytes(&bytes)
    }

    fn scan_resource(&self, resource_id: &str) -> Result<Vec<Record>> {
        let prefix = index_prefix(resource_id);
        let mut out = Vec::new();
        for entry in self.resource_index.scan_prefix(&prefix).keys() {
            let key = entry?;
            if let Some(bytes) = self.records.get(&key[prefix.len()..])? {
                out.push(Record::from_bytes(&bytes)?);
            }
        }
        Ok(out)
    }

    /// Store a new record, claiming its identifier. Returns false when the
    /// identifier is already taken.
    fn insert_new(&self, record: &Record) -> Result<bool> {
        let bytes = record.to_bytes()?;
        let id_key = index_key(&record.resource, &record.incremental_id);

        let result: std::result::Result<bool, TransactionError<Error>> = (
            &self.records,
            &self.resource_index,
            &self.incremental_index,
        )
            .transaction(|(records, resource_index, incremental_index)| {
                if incremental_index.get(&id_key)?.is_some() {
                    return Ok(false);
                }
                incremental_index.insert(id_key.as_slice(), record.id.as_bytes())?;
                resource_index.insert(index_key(&record.resource, &record.id), &[])?;
                records.insert(record.id.as_bytes(), bytes.as_slice())?;
                Ok(true)
            });
        result.map_err(from_transaction)
    }

    /// Read-modify-write of one record document inside a transaction.
    ///
    /// Conflicting writers are retried by sled, so the closure always sees
    /// the latest stored version.
    fn mutate<F>(&self, record_id: &str, f: F) -> Result<Record>
    where
        F: Fn(&mut Record) -> Result<()>,
    {
        let result: std::result::Result<Record, TransactionError<Error>> =
            self.records.transaction(|records| {
                let bytes = records
                    .get(record_id.as_bytes())?
                    .ok_or_else(|| ConflictableTransactionError::Abort(not_found(record_id)))?;
                let mut record =
                    Record::from_bytes(&bytes).map_err(ConflictableTransactionError::Abort)?;
                f(&mut record).map_err(ConflictableTransactionError::Abort)?;
                let bytes = record.to_bytes().map_err(ConflictableTransactionError::Abort)?;
                records.insert(record_id.as_bytes(), bytes)?;
                Ok(record)
            });
        result.map_err(from_transaction)
    }
}

fn from_transaction(err: TransactionError<Error>) -> Error {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => Error::Storage(e),
    }
}

fn not_found(record_id: &str) -> Error {
    Error::NotFound(format!("record '{}'", record_id))
}

fn index_prefix(resource_id: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(resource_id.len() + 1);
    prefix.extend_from_slice(resource_id.as_bytes());
    prefix.push(0); // Null separator
    prefix
}

fn index_key(resource_id: &str, suffix: &str) -> Vec<u8> {
    let mut key = index_prefix(resource_id);
    key.extend_from_slice(suffix.as_bytes());
    key
}

/// Records the user cannot read are reported as missing; readable records
/// without the requested access are a permission denial.
fn check_access(ability: &Ability, action: Action, record: &Record) -> Result<()> {
    if ability.can(action, Subject::Record(&record.data)) {
        return Ok(());
    }
    if action != Action::Read && ability.can(Action::Read, Subject::Record(&record.data)) {
        debug!(record = %record.id, %action, "record access denied");
        return Err(Error::PermissionDenied(format!(
            "cannot {} record '{}'",
            action, record.incremental_id
        )));
    }
    Err(not_found(&record.id))
}

/// Reject keys that are not fields and values of the wrong shape.
fn check_fields(resource: &ResourceDef, data: &Map<String, Value>) -> Result<()> {
    for (key, value) in data {
        let field = resource.field(key).ok_or_else(|| {
            Error::Validation(format!("'{}' is not a field of '{}'", key, resource.name))
        })?;
        if !field.accepts(value) {
            return Err(Error::Validation(format!(
                "field '{}' expects a {} value",
                key, field.field_type
            )));
        }
    }
    Ok(())
}

fn merge_update(
    current: &Map<String, Value>,
    submitted: &Map<String, Value>,
    ability: &Ability,
) -> Result<Map<String, Value>> {
    let mut merged = Map::new();
    for (key, value) in submitted {
        // Unreadable fields are denied without looking at the stored value.
        let denied = !ability.can(Action::Update, Subject::Field(key))
            && (!ability.can(Action::Read, Subject::Field(key)) || current.get(key) != Some(value));
        if denied {
            debug!(field = %key, "field write denied");
            return Err(Error::PermissionDenied(format!("cannot update field '{}'", key)));
        }
        merged.insert(key.clone(), value.clone());
    }
    for (key, value) in current {
        let protected = !ability.can(Action::Update, Subject::Field(key))
            || !ability.can(Action::Read, Subject::Field(key));
        if protected && !submitted.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    Ok(merged)
}
