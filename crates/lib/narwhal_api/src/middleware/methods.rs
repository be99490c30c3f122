//! RPC method names, the anonymous list, and the method → permission table.

use std::collections::{HashMap, HashSet};

use narwhal_core::rbac::Permission;
use narwhal_core::rbac::permission::{actions, resources};

/// Protobuf package of every Narwhal service.
pub const PACKAGE: &str = "narwhal.v1";

/// Health check path, outside the Narwhal package.
pub const HEALTH_CHECK: &str = "/grpc.health.v1.Health/Check";

/// Full method path, e.g. `/narwhal.v1.AuthService/Login`.
pub fn method_path(service: &str, method: &str) -> String {
    format!("/{PACKAGE}.{service}/{method}")
}

/// Methods callable without a bearer credential.
const ANONYMOUS: &[(&str, &str)] = &[
    ("AuthService", "Login"),
    ("AuthService", "RefreshToken"),
    ("AuthService", "RequestPasswordReset"),
];

/// `(service, method, resource, action)`. Methods not listed only require
/// authentication.
const PERMISSIONS: &[(&str, &str, &str, &str)] = &[
    // Users
    ("UserService", "CreateUser", resources::USER, actions::ADMIN),
    ("UserService", "GetUser", resources::USER, actions::READ),
    ("UserService", "UpdateProfile", resources::USER, actions::WRITE),
    ("UserService", "SetUserActive", resources::USER, actions::ADMIN),
    ("UserService", "DeleteUser", resources::USER, actions::DELETE),
    ("UserService", "ListSessions", resources::SESSION, actions::READ),
    ("UserService", "RevokeSession", resources::SESSION, actions::ADMIN),
    ("UserService", "AssignRole", resources::ROLE, actions::ADMIN),
    ("UserService", "RevokeRole", resources::ROLE, actions::ADMIN),
    // Roles
    ("RoleService", "ListRoles", resources::ROLE, actions::READ),
    ("RoleService", "CreateRole", resources::ROLE, actions::ADMIN),
    ("RoleService", "DeleteRole", resources::ROLE, actions::ADMIN),
    ("RoleService", "AddPermission", resources::ROLE, actions::ADMIN),
    ("RoleService", "RemovePermission", resources::ROLE, actions::ADMIN),
    ("RoleService", "AddParent", resources::ROLE, actions::ADMIN),
    ("RoleService", "CheckPermission", resources::ROLE, actions::READ),
    // Libraries
    ("LibraryService", "ListLibraries", resources::LIBRARY, actions::READ),
    ("LibraryService", "GetLibrary", resources::LIBRARY, actions::READ),
    ("LibraryService", "CreateLibrary", resources::LIBRARY, actions::WRITE),
    ("LibraryService", "UpdateLibrary", resources::LIBRARY, actions::WRITE),
    ("LibraryService", "DeleteLibrary", resources::LIBRARY, actions::DELETE),
    // Media
    ("MediaService", "ListMedia", resources::MEDIA, actions::READ),
    ("MediaService", "GetMedia", resources::MEDIA, actions::READ),
    ("MediaService", "SearchMedia", resources::MEDIA, actions::READ),
    ("MediaService", "UpdateMedia", resources::MEDIA, actions::WRITE),
    ("MediaService", "DeleteMedia", resources::MEDIA, actions::DELETE),
    // Scanning
    ("ScanService", "StartScan", resources::SCAN, actions::WRITE),
    ("ScanService", "GetScanStatus", resources::SCAN, actions::READ),
    ("ScanService", "CancelScan", resources::SCAN, actions::WRITE),
    // Metadata
    ("MetadataService", "GetMetadata", resources::METADATA, actions::READ),
    ("MetadataService", "SearchMetadata", resources::METADATA, actions::READ),
    ("MetadataService", "RefreshMetadata", resources::METADATA, actions::WRITE),
    // Streaming
    ("StreamingService", "GetPlaybackInfo", resources::STREAMING, actions::READ),
    ("StreamingService", "StreamMedia", resources::STREAMING, actions::READ),
    ("StreamingService", "ReportProgress", resources::STREAMING, actions::READ),
    // System
    ("SystemService", "GetStats", resources::SYSTEM, actions::READ),
    ("SystemService", "CleanupSessions", resources::SYSTEM, actions::ADMIN),
];

/// Static routing policy consulted by the authorization gate.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    anonymous: HashSet<String>,
    permissions: HashMap<String, Permission>,
}

impl MethodTable {
    /// An empty table: every method requires authentication and nothing
    /// more.
    pub fn new() -> Self {
        Self::default()
    }

    /// The table for all Narwhal services.
    pub fn standard() -> Self {
        let mut table = Self::new().with_anonymous(HEALTH_CHECK);
        for (service, method) in ANONYMOUS {
            table = table.with_anonymous(method_path(service, method));
        }
        for (service, method, resource, action) in PERMISSIONS {
            table = table.with_permission(
                method_path(service, method),
                Permission::new(*resource, *action),
            );
        }
        table
    }

    pub fn with_anonymous(mut self, path: impl Into<String>) -> Self {
        self.anonymous.insert(path.into());
        self
    }

    pub fn with_permission(mut self, path: impl Into<String>, permission: Permission) -> Self {
        self.permissions.insert(path.into(), permission);
        self
    }

    pub fn is_anonymous(&self, path: &str) -> bool {
        self.anonymous.contains(path)
    }

    /// Permission required by `path`, if any.
    pub fn permission(&self, path: &str) -> Option<&Permission> {
        self.permissions.get(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table() {
        let table = MethodTable::standard();
        assert!(table.is_anonymous("/narwhal.v1.AuthService/Login"));
        assert!(table.is_anonymous("/narwhal.v1.AuthService/RefreshToken"));
        assert!(table.is_anonymous("/grpc.health.v1.Health/Check"));
        assert!(!table.is_anonymous("/narwhal.v1.AuthService/Logout"));

        assert_eq!(
            table.permission("/narwhal.v1.MediaService/GetMedia"),
            Some(&Permission::new("media", "read"))
        );
        assert_eq!(
            table.permission("/narwhal.v1.LibraryService/DeleteLibrary"),
            Some(&Permission::new("library", "delete"))
        );
        assert_eq!(table.permission("/narwhal.v1.AuthService/Me"), None);
    }

    #[test]
    fn anonymous_methods_carry_no_permission() {
        let table = MethodTable::standard();
        for (service, method) in ANONYMOUS {
            assert!(table.permission(&method_path(service, method)).is_none());
        }
    }
}
