//! In-process policy engine.
//!
//! Holds roles, their permissions and parent edges, and user grants behind a
//! single lock so every check sees a consistent policy. Reads vastly
//! outnumber writes; a plain `std::sync::RwLock` is enough and keeps the
//! checks synchronous.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::ADMIN_ROLE;
use super::defaults;
use super::permission::{Permission, WILDCARD};
use crate::auth::AuthError;

/// A named role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    /// Roles this role inherits permissions from.
    #[serde(default)]
    pub parents: BTreeSet<String>,
}

impl Role {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            permissions: BTreeSet::new(),
            parents: BTreeSet::new(),
        }
    }

    pub fn with_permissions<I>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = Permission>,
    {
        self.permissions.extend(permissions);
        self
    }

    fn grants(&self, resource: &str, action: &str) -> bool {
        self.permissions.iter().any(|p| p.matches(resource, action))
    }
}

/// Complete policy state, suitable for export and wholesale replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub roles: BTreeMap<String, Role>,
    /// User id → granted role names.
    #[serde(default)]
    pub grants: BTreeMap<String, BTreeSet<String>>,
}

impl PolicySnapshot {
    /// Role names reachable from `roles` through parent edges, including
    /// the starting roles themselves. Unknown names are skipped.
    fn closure<S: AsRef<str>>(&self, roles: &[S]) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = roles.iter().map(|r| r.as_ref()).collect();
        while let Some(name) = queue.pop_front() {
            let Some(role) = self.roles.get(name) else {
                continue;
            };
            if !seen.insert(role.name.clone()) {
                continue;
            }
            queue.extend(role.parents.iter().map(String::as_str));
        }
        seen
    }

    fn allows<S: AsRef<str>>(&self, roles: &[S], resource: &str, action: &str) -> bool {
        self.closure(roles)
            .iter()
            .filter_map(|name| self.roles.get(name))
            .any(|role| role.grants(resource, action))
    }

    /// Check structural invariants: parents exist, grants name real roles,
    /// and the hierarchy is acyclic.
    fn validate(&self) -> Result<(), AuthError> {
        for (key, role) in &self.roles {
            if key != &role.name {
                return Err(AuthError::BadRequest(format!(
                    "role key '{key}' does not match role name '{}'",
                    role.name
                )));
            }
            check_role_name(&role.name)?;
            for parent in &role.parents {
                if !self.roles.contains_key(parent) {
                    return Err(AuthError::BadRequest(format!(
                        "role '{}' inherits from unknown role '{parent}'",
                        role.name
                    )));
                }
            }
        }
        for (user, roles) in &self.grants {
            if let Some(missing) = roles.iter().find(|r| !self.roles.contains_key(*r)) {
                return Err(AuthError::BadRequest(format!(
                    "user '{user}' is granted unknown role '{missing}'"
                )));
            }
        }
        for name in self.roles.keys() {
            let ancestors = self.ancestors_of(name);
            if ancestors.contains(name) {
                return Err(AuthError::BadRequest(format!(
                    "role hierarchy contains a cycle through '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Strict ancestors of `name` (parents, grandparents, ...).
    fn ancestors_of(&self, name: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&str> = self
            .roles
            .get(name)
            .map(|r| r.parents.iter().map(String::as_str).collect())
            .unwrap_or_default();
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.to_string()) {
                continue;
            }
            if let Some(role) = self.roles.get(next) {
                queue.extend(role.parents.iter().map(String::as_str));
            }
        }
        seen
    }
}

fn check_role_name(name: &str) -> Result<(), AuthError> {
    if name.trim().is_empty() || name == WILDCARD || name.contains(char::is_whitespace) {
        return Err(AuthError::BadRequest(format!("invalid role name '{name}'")));
    }
    Ok(())
}

/// Thread-safe RBAC policy engine.
#[derive(Debug, Default)]
pub struct PolicyEngine {
    state: RwLock<PolicySnapshot>,
}

impl PolicyEngine {
    /// An engine with no roles at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine seeded with the built-in admin, user, and guest roles.
    pub fn with_defaults() -> Self {
        let roles = defaults::default_roles()
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();
        Self {
            state: RwLock::new(PolicySnapshot {
                roles,
                grants: BTreeMap::new(),
            }),
        }
    }

    /// Build an engine from a snapshot after validating it.
    pub fn from_snapshot(snapshot: PolicySnapshot) -> Result<Self, AuthError> {
        snapshot.validate()?;
        Ok(Self {
            state: RwLock::new(snapshot),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, PolicySnapshot> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PolicySnapshot> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Checks ────────────────────────────────────────────────────

    /// Whether `role` (or any ancestor) grants `(resource, action)`.
    pub fn check(&self, role: &str, resource: &str, action: &str) -> bool {
        self.read().allows(&[role], resource, action)
    }

    /// Whether any of `roles` grants `(resource, action)`.
    pub fn check_any<S: AsRef<str>>(&self, roles: &[S], resource: &str, action: &str) -> bool {
        self.read().allows(roles, resource, action)
    }

    /// Whether the roles granted to `user` allow `(resource, action)`.
    pub fn check_user(&self, user: &str, resource: &str, action: &str) -> bool {
        let state = self.read();
        let Some(granted) = state.grants.get(user) else {
            return false;
        };
        let granted: Vec<&str> = granted.iter().map(String::as_str).collect();
        state.allows(&granted[..], resource, action)
    }

    pub fn enforce<S: AsRef<str>>(
        &self,
        roles: &[S],
        resource: &str,
        action: &str,
    ) -> Result<(), AuthError> {
        if self.check_any(roles, resource, action) {
            Ok(())
        } else {
            debug!(resource, action, "Permission denied");
            Err(AuthError::permission_denied(resource, action))
        }
    }

    /// Succeeds when at least one of `permissions` is allowed. An empty list
    /// is never satisfied.
    pub fn enforce_any<S: AsRef<str>>(
        &self,
        roles: &[S],
        permissions: &[Permission],
    ) -> Result<(), AuthError> {
        let state = self.read();
        if permissions
            .iter()
            .any(|p| state.allows(roles, &p.resource, &p.action))
        {
            return Ok(());
        }
        Err(match permissions.first() {
            Some(p) => AuthError::permission_denied(&p.resource, &p.action),
            None => AuthError::permission_denied(WILDCARD, WILDCARD),
        })
    }

    /// Succeeds when every one of `permissions` is allowed. Reports the first
    /// missing permission.
    pub fn enforce_all<S: AsRef<str>>(
        &self,
        roles: &[S],
        permissions: &[Permission],
    ) -> Result<(), AuthError> {
        let state = self.read();
        match permissions
            .iter()
            .find(|p| !state.allows(roles, &p.resource, &p.action))
        {
            Some(p) => Err(AuthError::permission_denied(&p.resource, &p.action)),
            None => Ok(()),
        }
    }

    /// Callers may act on their own resources; admins may act on anyone's
    /// when `allow_admin` is set.
    pub fn check_ownership<S: AsRef<str>>(
        &self,
        caller: &str,
        owner: &str,
        roles: &[S],
        allow_admin: bool,
    ) -> Result<(), AuthError> {
        if caller == owner {
            return Ok(());
        }
        if allow_admin && roles.iter().any(|r| r.as_ref() == ADMIN_ROLE) {
            return Ok(());
        }
        Err(AuthError::Forbidden(
            "resource belongs to another user".into(),
        ))
    }

    /// `roles` plus every ancestor, sorted. Unknown roles are dropped.
    pub fn effective_roles<S: AsRef<str>>(&self, roles: &[S]) -> Vec<String> {
        self.read().closure(roles).into_iter().collect()
    }

    /// Roles directly granted to `user`, sorted.
    pub fn roles_for_user(&self, user: &str) -> Vec<String> {
        self.read()
            .grants
            .get(user)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    // ── Grants ────────────────────────────────────────────────────

    /// Grant `role` to `user`. Idempotent.
    pub fn assign(&self, user: &str, role: &str) -> Result<(), AuthError> {
        let mut state = self.write();
        if !state.roles.contains_key(role) {
            return Err(AuthError::NotFound(format!("role '{role}'")));
        }
        state
            .grants
            .entry(user.to_string())
            .or_default()
            .insert(role.to_string());
        Ok(())
    }

    /// Remove `role` from `user`. Returns whether a grant was removed.
    pub fn revoke(&self, user: &str, role: &str) -> bool {
        let mut state = self.write();
        let Some(granted) = state.grants.get_mut(user) else {
            return false;
        };
        let removed = granted.remove(role);
        if granted.is_empty() {
            state.grants.remove(user);
        }
        removed
    }

    /// Drop every grant held by `user`.
    pub fn revoke_all(&self, user: &str) {
        self.write().grants.remove(user);
    }

    /// Bulk-load `(user, role)` grants, typically from the user store at
    /// startup. Grants for unknown roles are skipped. Returns the number
    /// loaded.
    pub fn load_grants<I>(&self, grants: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut state = self.write();
        let mut loaded = 0;
        for (user, role) in grants {
            if !state.roles.contains_key(&role) {
                warn!(%user, %role, "Skipping grant for unknown role");
                continue;
            }
            state.grants.entry(user).or_default().insert(role);
            loaded += 1;
        }
        loaded
    }

    // ── Roles ─────────────────────────────────────────────────────

    pub fn get_role(&self, name: &str) -> Option<Role> {
        self.read().roles.get(name).cloned()
    }

    /// All roles, sorted by name.
    pub fn list_roles(&self) -> Vec<Role> {
        self.read().roles.values().cloned().collect()
    }

    pub fn add_role(&self, role: Role) -> Result<(), AuthError> {
        check_role_name(&role.name)?;
        let mut state = self.write();
        if state.roles.contains_key(&role.name) {
            return Err(AuthError::Conflict(format!("role '{}' exists", role.name)));
        }
        if let Some(missing) = role.parents.iter().find(|p| !state.roles.contains_key(*p)) {
            return Err(AuthError::NotFound(format!("role '{missing}'")));
        }
        info!(role = %role.name, "Role created");
        state.roles.insert(role.name.clone(), role);
        Ok(())
    }

    /// Delete a role along with its grants and any parent edges pointing at
    /// it.
    pub fn delete_role(&self, name: &str) -> Result<(), AuthError> {
        let mut state = self.write();
        if state.roles.remove(name).is_none() {
            return Err(AuthError::NotFound(format!("role '{name}'")));
        }
        for role in state.roles.values_mut() {
            role.parents.remove(name);
        }
        state.grants.retain(|_, granted| {
            granted.remove(name);
            !granted.is_empty()
        });
        info!(role = name, "Role deleted");
        Ok(())
    }

    /// Add a permission to a role. Returns whether it was new.
    pub fn add_permission(&self, role: &str, permission: Permission) -> Result<bool, AuthError> {
        let mut state = self.write();
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| AuthError::NotFound(format!("role '{role}'")))?;
        Ok(entry.permissions.insert(permission))
    }

    /// Remove a permission from a role. Returns whether it was present.
    pub fn remove_permission(&self, role: &str, permission: &Permission) -> Result<bool, AuthError> {
        let mut state = self.write();
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| AuthError::NotFound(format!("role '{role}'")))?;
        Ok(entry.permissions.remove(permission))
    }

    /// Make `role` inherit from `parent`. Rejects edges that would close a
    /// cycle.
    pub fn add_parent(&self, role: &str, parent: &str) -> Result<(), AuthError> {
        let mut state = self.write();
        for name in [role, parent] {
            if !state.roles.contains_key(name) {
                return Err(AuthError::NotFound(format!("role '{name}'")));
            }
        }
        if role == parent || state.ancestors_of(parent).contains(role) {
            return Err(AuthError::BadRequest(format!(
                "'{role}' inheriting from '{parent}' would create a cycle"
            )));
        }
        if let Some(entry) = state.roles.get_mut(role) {
            entry.parents.insert(parent.to_string());
        }
        Ok(())
    }

    /// Returns whether the edge existed.
    pub fn remove_parent(&self, role: &str, parent: &str) -> Result<bool, AuthError> {
        let mut state = self.write();
        let entry = state
            .roles
            .get_mut(role)
            .ok_or_else(|| AuthError::NotFound(format!("role '{role}'")))?;
        Ok(entry.parents.remove(parent))
    }

    // ── Snapshots ─────────────────────────────────────────────────

    pub fn snapshot(&self) -> PolicySnapshot {
        self.read().clone()
    }

    /// Swap in a new policy atomically. The current policy is untouched if
    /// the snapshot is invalid.
    pub fn replace(&self, snapshot: PolicySnapshot) -> Result<(), AuthError> {
        snapshot.validate()?;
        *self.write() = snapshot;
        info!("Policy replaced");
        Ok(())
    }
}
