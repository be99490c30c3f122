//! Line-oriented policy files.
//!
//! ```text
//! # comment
//! r, auditor, Read-only access to everything
//! p, auditor, *, read
//! g, editor, user
//! ```
//!
//! `p` grants a permission to a role, `g` makes the first role inherit from
//! the second, and `r` declares a role with a description. Roles mentioned
//! by `p` or `g` lines are created implicitly. Grants to users are not part
//! of the file; they come from the user store.

use std::fmt::Write as _;

use super::engine::{PolicySnapshot, Role};
use super::permission::Permission;
use crate::auth::AuthError;

/// Parse policy text into a snapshot. The result is not yet validated for
/// cycles; [`PolicyEngine::from_snapshot`](super::PolicyEngine::from_snapshot)
/// does that.
pub fn parse(text: &str) -> Result<PolicySnapshot, AuthError> {
    let mut snapshot = PolicySnapshot::default();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let lineno = idx + 1;
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let bad = |msg: &str| AuthError::BadRequest(format!("policy line {lineno}: {msg}"));

        match fields.as_slice() {
            ["p", role, resource, action] => {
                if [*role, *resource, *action].iter().any(|f| f.is_empty()) {
                    return Err(bad("empty field"));
                }
                role_entry(&mut snapshot, role)
                    .permissions
                    .insert(Permission::new(*resource, *action));
            }
            ["g", role, parent] => {
                if role.is_empty() || parent.is_empty() {
                    return Err(bad("empty field"));
                }
                role_entry(&mut snapshot, parent);
                role_entry(&mut snapshot, role)
                    .parents
                    .insert(parent.to_string());
            }
            ["r", role, description @ ..] => {
                if role.is_empty() {
                    return Err(bad("empty role name"));
                }
                // Descriptions may themselves contain commas.
                role_entry(&mut snapshot, role).description = description.join(", ");
            }
            [kind, ..] => {
                return Err(bad(&format!("unrecognised rule '{kind}'")));
            }
            [] => {}
        }
    }

    Ok(snapshot)
}

fn role_entry<'a>(snapshot: &'a mut PolicySnapshot, name: &str) -> &'a mut Role {
    snapshot
        .roles
        .entry(name.to_string())
        .or_insert_with(|| Role::new(name, ""))
}

/// Render a snapshot back to policy text. Roles come out sorted by name.
pub fn render(snapshot: &PolicySnapshot) -> String {
    let mut out = String::new();
    for role in snapshot.roles.values() {
        if !role.description.is_empty() {
            let _ = writeln!(out, "r, {}, {}", role.name, role.description);
        }
        for p in &role.permissions {
            let _ = writeln!(out, "p, {}, {}, {}", role.name, p.resource, p.action);
        }
        for parent in &role.parents {
            let _ = writeln!(out, "g, {}, {parent}", role.name);
        }
    }
    out
}
