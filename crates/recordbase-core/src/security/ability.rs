//! Resolved per-user abilities.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::{FormId, ResourceId, CREATE_RESOURCES, MANAGE_RESOURCES};
use crate::query::{Filter, FilterEvaluator};

/// Action a user attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Update,
    Delete,
    Create,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Create => "create",
        };
        f.write_str(s)
    }
}

/// What an action is attempted on.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    /// The resource or form definition itself.
    Resource,
    /// Records of the resource in general.
    Records,
    /// A specific record, identified by its current data.
    Record(&'a Map<String, Value>),
    /// A field of the resource.
    Field(&'a str),
}

/// Record-scoped grant for one action.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RecordAccess {
    /// No contributing rule.
    #[default]
    None,
    /// Every record.
    All,
    /// Records matching the filter. Attribute references are already bound.
    Filtered(Filter),
}

impl RecordAccess {
    /// Whether any record can be reached at all.
    pub fn is_none(&self) -> bool {
        matches!(self, RecordAccess::None)
    }

    /// Whether a record with `data` is covered.
    ///
    /// A filter that cannot be evaluated against the data covers nothing.
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        match self {
            RecordAccess::None => false,
            RecordAccess::All => true,
            RecordAccess::Filtered(filter) => {
                FilterEvaluator::evaluate(filter, data).unwrap_or(false)
            }
        }
    }

    /// Filter for the store query, `None` when nothing is reachable.
    pub fn filter(&self) -> Option<Filter> {
        match self {
            RecordAccess::None => None,
            RecordAccess::All => Some(Filter::match_all()),
            RecordAccess::Filtered(filter) => Some(filter.clone()),
        }
    }
}

/// Permitted actions of one user on one resource (or form), plus the
/// record filters scoping them.
///
/// Built by [`AbilityResolver`](super::AbilityResolver); a user without any
/// applicable role gets [`Ability::deny_all`].
#[derive(Debug, Clone, Default)]
pub struct Ability {
    pub(crate) resource: ResourceId,
    pub(crate) form: Option<FormId>,
    pub(crate) global: BTreeSet<String>,
    pub(crate) applications: BTreeMap<String, BTreeSet<String>>,
    pub(crate) structural: HashSet<Action>,
    pub(crate) create_records: bool,
    pub(crate) records: HashMap<Action, RecordAccess>,
    pub(crate) readable_fields: HashSet<String>,
    pub(crate) editable_fields: HashSet<String>,
}

impl Ability {
    /// An ability granting nothing.
    pub fn deny_all(resource: impl Into<ResourceId>) -> Self {
        Self {
            resource: resource.into(),
            ..Default::default()
        }
    }

    /// Resource this ability is scoped to.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Form this ability was resolved against, if any.
    pub fn form(&self) -> Option<&str> {
        self.form.as_deref()
    }

    /// Check an action on a subject.
    pub fn can(&self, action: Action, subject: Subject<'_>) -> bool {
        match subject {
            Subject::Resource => match action {
                Action::Create => {
                    self.has_global(MANAGE_RESOURCES) || self.has_global(CREATE_RESOURCES)
                }
                _ => self.structural.contains(&action),
            },
            Subject::Records => match action {
                Action::Create => self.create_records,
                _ => !self.record_access(action).is_none(),
            },
            Subject::Record(data) => match action {
                Action::Create => self.create_records,
                _ => self.record_access(action).matches(data),
            },
            Subject::Field(field) => match action {
                Action::Read => self.readable_fields.contains(field),
                _ => self.editable_fields.contains(field),
            },
        }
    }

    /// Record-scoped grant for an action. Creation is not filter-scoped.
    pub fn record_access(&self, action: Action) -> &RecordAccess {
        const NONE: &RecordAccess = &RecordAccess::None;
        self.records.get(&action).unwrap_or(NONE)
    }

    /// Combinable data filter for an action, `None` when nothing is reachable.
    pub fn filter(&self, action: Action) -> Option<Filter> {
        self.record_access(action).filter()
    }

    /// Whether the user holds a global capability.
    pub fn has_global(&self, permission_type: &str) -> bool {
        self.global.contains(permission_type)
    }

    /// Global capabilities held by the user.
    pub fn global_capabilities(&self) -> &BTreeSet<String> {
        &self.global
    }

    /// Whether the user holds an application-scoped capability.
    pub fn has_application_permission(&self, application: &str, permission_type: &str) -> bool {
        self.applications
            .get(application)
            .is_some_and(|types| types.contains(permission_type))
    }

    pub fn readable_fields(&self) -> &HashSet<String> {
        &self.readable_fields
    }

    pub fn editable_fields(&self) -> &HashSet<String> {
        &self.editable_fields
    }
}
