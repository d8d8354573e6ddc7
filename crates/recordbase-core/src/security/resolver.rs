//! Turns a user's roles and position attributes into an [`Ability`].

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::warn;

use super::ability::{Ability, Action, RecordAccess};
use super::user::User;
use crate::catalog::{
    AccessRule, FormDef, ResourceDef, ResourcePermissions, RoleDirectory, RoleId, MANAGE_RESOURCES,
};
use crate::query::Filter;

/// Resolves abilities against a role directory snapshot.
///
/// Resolution is pure: it reads definitions only and never fails. Absence of
/// permission yields a deny-everything ability.
pub struct AbilityResolver<'a> {
    directory: &'a RoleDirectory,
}

impl<'a> AbilityResolver<'a> {
    pub fn new(directory: &'a RoleDirectory) -> Self {
        Self { directory }
    }

    /// Ability of `user` on a resource.
    pub fn for_resource(&self, user: &User, resource: &ResourceDef) -> Ability {
        self.resolve(user, resource, &resource.permissions, None)
    }

    /// Ability of `user` on a form: the form's role lists over the resource's fields.
    pub fn for_form(&self, user: &User, form: &FormDef, resource: &ResourceDef) -> Ability {
        self.resolve(user, resource, &form.permissions, Some(form.id.clone()))
    }

    fn resolve(
        &self,
        user: &User,
        resource: &ResourceDef,
        permissions: &ResourcePermissions,
        form: Option<String>,
    ) -> Ability {
        let roles = self.directory.effective_roles(user);
        let global = self.directory.global_capabilities(&roles);
        let applications = self.directory.application_capabilities(&roles);

        let mut structural = HashSet::new();
        if global.contains(MANAGE_RESOURCES) {
            structural.extend([Action::Read, Action::Update, Action::Delete, Action::Create]);
        } else {
            for (action, list) in [
                (Action::Read, &permissions.can_see),
                (Action::Update, &permissions.can_update),
                (Action::Delete, &permissions.can_delete),
            ] {
                if holds_any(&roles, list) {
                    structural.insert(action);
                }
            }
        }

        let create_records = holds_any(&roles, &permissions.can_create_records);
        let mut records = HashMap::new();
        for (action, rules) in [
            (Action::Read, &permissions.can_see_records),
            (Action::Update, &permissions.can_update_records),
            (Action::Delete, &permissions.can_delete_records),
        ] {
            let access = compile_rules(rules, &roles, user);
            if !access.is_none() {
                records.insert(action, access);
            }
        }

        let inherit_read = structural.contains(&Action::Read) || records.contains_key(&Action::Read);
        let inherit_update = structural.contains(&Action::Update)
            || records.contains_key(&Action::Update)
            || create_records;

        let mut readable_fields = HashSet::new();
        let mut editable_fields = HashSet::new();
        for field in &resource.fields {
            if granted(&roles, field.read_roles(), inherit_read) {
                readable_fields.insert(field.name.clone());
            }
            if granted(&roles, field.update_roles(), inherit_update) {
                editable_fields.insert(field.name.clone());
            }
        }

        Ability {
            resource: resource.id.clone(),
            form,
            global,
            applications,
            structural,
            create_records,
            records,
            readable_fields,
            editable_fields,
        }
    }
}

fn holds_any(roles: &BTreeSet<RoleId>, list: &[RoleId]) -> bool {
    list.iter().any(|role| roles.contains(role))
}

/// Field-level grant: the field's own list when non-empty, else inherited.
fn granted(roles: &BTreeSet<RoleId>, list: &[RoleId], inherited: bool) -> bool {
    if list.is_empty() {
        inherited
    } else {
        holds_any(roles, list)
    }
}

/// OR of the access conditions of every rule whose role the user holds.
fn compile_rules(rules: &[AccessRule], roles: &BTreeSet<RoleId>, user: &User) -> RecordAccess {
    let mut filters = Vec::new();
    for rule in rules.iter().filter(|rule| roles.contains(&rule.role)) {
        let Some(access) = &rule.access else {
            return RecordAccess::All;
        };
        if access.is_match_all() {
            return RecordAccess::All;
        }
        match access.bind(&|category| user.attribute_value(category)) {
            Some(bound) => filters.push(bound),
            None => warn!(
                user = %user.id,
                role = %rule.role,
                "access rule references a position attribute the user lacks"
            ),
        }
    }

    match filters.len() {
        0 => RecordAccess::None,
        1 => RecordAccess::Filtered(filters.remove(0)),
        _ => RecordAccess::Filtered(Filter::or(filters)),
    }
}
