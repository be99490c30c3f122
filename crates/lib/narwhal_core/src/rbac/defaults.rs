//! Built-in roles seeded by [`PolicyEngine::with_defaults`](super::PolicyEngine::with_defaults).

use super::permission::{Permission, WILDCARD, actions, resources};
use super::{ADMIN_ROLE, GUEST_ROLE, Role, USER_ROLE};

/// The default admin, user, and guest roles.
pub fn default_roles() -> Vec<Role> {
    let admin = Role::new(ADMIN_ROLE, "Full access to every resource").with_permissions(
        actions::ALL
            .iter()
            .map(|action| Permission::new(WILDCARD, *action)),
    );

    let user_reads = [
        resources::LIBRARY,
        resources::MEDIA,
        resources::METADATA,
        resources::SCAN,
        resources::STREAMING,
        resources::USER,
        resources::ROLE,
        resources::SESSION,
    ]
    .into_iter()
    .map(|r| Permission::new(r, actions::READ));
    let user = Role::new(USER_ROLE, "Regular account").with_permissions(user_reads.chain([
        Permission::new(resources::MEDIA, actions::WRITE),
        Permission::new(resources::USER, actions::WRITE),
    ]));

    let guest = Role::new(GUEST_ROLE, "Browse and stream only").with_permissions(
        [resources::LIBRARY, resources::MEDIA, resources::STREAMING]
            .into_iter()
            .map(|r| Permission::new(r, actions::READ)),
    );

    vec![admin, user, guest]
}
