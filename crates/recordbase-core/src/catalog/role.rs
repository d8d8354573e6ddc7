//! Roles, permissions and role resolution for users.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PermissionId, RoleId};
use crate::query::{Filter, FilterEvaluator, Operator};
use crate::security::User;

/// Global capability granting every structural action on resources and forms.
pub const MANAGE_RESOURCES: &str = "can_manage_resources";

/// Global capability allowing resources and forms to be created.
pub const CREATE_RESOURCES: &str = "can_create_resources";

/// A platform capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDef {
    #[serde(default)]
    pub id: PermissionId,
    /// Capability name, e.g. `can_manage_resources`.
    #[serde(rename = "type")]
    pub permission_type: String,
    /// Global permissions apply platform-wide; others are scoped by the
    /// granting role's application.
    #[serde(default)]
    pub global: bool,
}

impl PermissionDef {
    pub fn global(id: impl Into<PermissionId>, permission_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            permission_type: permission_type.into(),
            global: true,
        }
    }

    pub fn scoped(id: impl Into<PermissionId>, permission_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            permission_type: permission_type.into(),
            global: false,
        }
    }
}

/// Grants a role automatically to users holding a matching position attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoAssignmentRule {
    pub category: String,
    #[serde(default = "default_operator")]
    pub operator: Operator,
    pub value: Value,
}

fn default_operator() -> Operator {
    Operator::Eq
}

impl AutoAssignmentRule {
    pub fn new(category: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            category: category.into(),
            operator,
            value: value.into(),
        }
    }

    /// Whether the user's attributes satisfy this rule.
    pub fn matches(&self, user: &User) -> bool {
        let filter = Filter::condition(self.category.clone(), self.operator, self.value.clone());
        matches!(
            FilterEvaluator::evaluate(&filter, &user.attribute_map()),
            Ok(true)
        )
    }
}

/// A role: a bundle of permissions, optionally bound to an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDef {
    #[serde(default)]
    pub id: RoleId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(default)]
    pub permissions: Vec<PermissionId>,
    /// Any matching rule assigns the role.
    #[serde(default)]
    pub auto_assignment: Vec<AutoAssignmentRule>,
}

impl RoleDef {
    pub fn new(id: impl Into<RoleId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            application: None,
            permissions: Vec::new(),
            auto_assignment: Vec::new(),
        }
    }

    pub fn in_application(mut self, application: impl Into<String>) -> Self {
        self.application = Some(application.into());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<PermissionId>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    pub fn with_auto_assignment(mut self, rule: AutoAssignmentRule) -> Self {
        self.auto_assignment.push(rule);
        self
    }
}

/// Snapshot of every role and permission, used to resolve abilities.
#[derive(Debug, Clone, Default)]
pub struct RoleDirectory {
    roles: HashMap<RoleId, RoleDef>,
    permissions: HashMap<PermissionId, PermissionDef>,
}

impl RoleDirectory {
    pub fn new(roles: Vec<RoleDef>, permissions: Vec<PermissionDef>) -> Self {
        Self {
            roles: roles.into_iter().map(|r| (r.id.clone(), r)).collect(),
            permissions: permissions.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn role(&self, id: &str) -> Option<&RoleDef> {
        self.roles.get(id)
    }

    pub fn contains_role(&self, id: &str) -> bool {
        self.roles.contains_key(id)
    }

    /// Explicit roles plus every auto-assigned role.
    pub fn effective_roles(&self, user: &User) -> BTreeSet<RoleId> {
        let mut roles: BTreeSet<RoleId> = user.roles.iter().cloned().collect();
        for role in self.roles.values() {
            if role.auto_assignment.iter().any(|rule| rule.matches(user)) {
                roles.insert(role.id.clone());
            }
        }
        roles
    }

    fn granted<'a>(
        &'a self,
        roles: &'a BTreeSet<RoleId>,
    ) -> impl Iterator<Item = (&'a RoleDef, &'a PermissionDef)> + 'a {
        roles
            .iter()
            .filter_map(|id| self.roles.get(id))
            .flat_map(move |role| {
                role.permissions
                    .iter()
                    .filter_map(|p| self.permissions.get(p))
                    .map(move |p| (role, p))
            })
    }

    /// Union of the types of every global permission reachable through `roles`.
    pub fn global_capabilities(&self, roles: &BTreeSet<RoleId>) -> BTreeSet<String> {
        self.granted(roles)
            .filter(|(_, p)| p.global)
            .map(|(_, p)| p.permission_type.clone())
            .collect()
    }

    /// Non-global permission types per application of the granting role.
    pub fn application_capabilities(
        &self,
        roles: &BTreeSet<RoleId>,
    ) -> BTreeMap<String, BTreeSet<String>> {
        let mut out: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (role, permission) in self.granted(roles).filter(|(_, p)| !p.global) {
            if let Some(application) = &role.application {
                out.entry(application.clone())
                    .or_default()
                    .insert(permission.permission_type.clone());
            }
        }
        out
    }
}
