//! User and role administration through the router, including ownership
//! checks.

mod common;

use axum::http::StatusCode;
use common::{access, harness};
use serde_json::json;

#[tokio::test]
async fn update_profile_requires_ownership() {
    let h = harness();
    let bob = h.user("bob", &["user"]).await;
    let carol = h.user("carol", &["user"]).await;
    h.user("root", &["admin"]).await;
    let bob_tokens = h.login("bob", "laptop").await;
    let admin_tokens = h.login("root", "console").await;

    let (status, body) = h
        .call(
            "UserService",
            "UpdateProfile",
            Some(access(&bob_tokens)),
            json!({ "userId": bob.id, "email": "Bob@Example.org" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["email"], "bob@example.org");

    let (status, body) = h
        .call(
            "UserService",
            "UpdateProfile",
            Some(access(&bob_tokens)),
            json!({ "userId": carol.id, "username": "mallory" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");

    let (status, body) = h
        .call(
            "UserService",
            "UpdateProfile",
            Some(access(&admin_tokens)),
            json!({ "userId": carol.id, "username": "caroline" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["username"], "caroline");
}

#[tokio::test]
async fn admin_manages_users() {
    let h = harness();
    h.user("root", &["admin"]).await;
    let admin = h.login("root", "console").await;

    let (status, created) = h
        .call(
            "UserService",
            "CreateUser",
            Some(access(&admin)),
            json!({ "username": "dave", "email": "dave@example.com", "password": "hunter22" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{created}");
    assert_eq!(created["roles"], json!(["user"]));
    let dave_id = created["id"].clone();

    let (status, _) = h
        .call(
            "UserService",
            "CreateUser",
            Some(access(&admin)),
            json!({ "username": "dave", "email": "other@example.com", "password": "hunter22" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = h
        .call(
            "UserService",
            "SetUserActive",
            Some(access(&admin)),
            json!({ "userId": dave_id, "active": false }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .call(
            "AuthService",
            "Login",
            None,
            json!({ "identifier": "dave", "password": "hunter22" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Account disabled");

    let (status, _) = h
        .call(
            "UserService",
            "DeleteUser",
            Some(access(&admin)),
            json!({ "userId": dave_id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .call(
            "UserService",
            "GetUser",
            Some(access(&admin)),
            json!({ "userId": dave_id }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn plain_users_cannot_administer() {
    let h = harness();
    let alice = h.user("alice", &[]).await;
    let tokens = h.login("alice", "laptop").await;

    for (service, method, body) in [
        (
            "UserService",
            "CreateUser",
            json!({ "username": "eve", "email": "eve@example.com", "password": "hunter22" }),
        ),
        ("UserService", "AssignRole", json!({ "userId": alice.id, "role": "admin" })),
        ("RoleService", "CreateRole", json!({ "name": "auditor" })),
        ("RoleService", "DeleteRole", json!({ "name": "guest" })),
    ] {
        let (status, body) = h.call(service, method, Some(access(&tokens)), body).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{service}/{method}: {body}");
    }
}

#[tokio::test]
async fn sessions_are_listed_and_revoked() {
    let h = harness();
    let alice = h.user("alice", &[]).await;
    h.user("root", &["admin"]).await;
    let laptop = h.login("alice", "laptop").await;
    let phone = h.login("alice", "phone").await;
    let admin = h.login("root", "console").await;

    let (status, body) = h
        .call("UserService", "ListSessions", Some(access(&laptop)), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    let sessions = body["sessions"].as_array().unwrap();
    assert_eq!(sessions.len(), 2);
    let current: Vec<_> = sessions.iter().filter(|s| s["current"] == true).collect();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0]["id"], laptop["sessionId"]);
    assert_eq!(current[0]["device"], "laptop");

    let (status, _) = h
        .call(
            "UserService",
            "RevokeSession",
            Some(access(&admin)),
            json!({ "sessionId": phone["sessionId"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .call(
            "UserService",
            "ListSessions",
            Some(access(&admin)),
            json!({ "userId": alice.id }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"].as_array().unwrap().len(), 1);

    let (status, _) = h
        .call("MediaService", "GetMedia", Some(access(&phone)), json!({}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn role_lifecycle() {
    let h = harness();
    let alice = h.user("alice", &[]).await;
    h.user("root", &["admin"]).await;
    let admin = h.login("root", "console").await;
    let root = access(&admin);

    let (status, body) = h
        .call(
            "RoleService",
            "CreateRole",
            Some(root),
            json!({
                "name": "auditor",
                "description": "Reads everything",
                "permissions": ["*:read"],
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["permissions"], json!(["*:read"]));

    let (status, _) = h
        .call("RoleService", "CreateRole", Some(root), json!({ "name": "auditor" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = h
        .call(
            "RoleService",
            "CreateRole",
            Some(root),
            json!({ "name": "broken", "permissions": ["no-colon"] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for (resource, action, allowed) in [
        ("library", "read", true),
        ("library", "delete", false),
        ("system", "read", true),
    ] {
        let (status, body) = h
            .call(
                "RoleService",
                "CheckPermission",
                Some(root),
                json!({ "roles": ["auditor"], "resource": resource, "action": action }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], allowed, "{resource}:{action}");
    }

    let (status, body) = h
        .call(
            "RoleService",
            "AddPermission",
            Some(root),
            json!({ "role": "auditor", "permission": "library:delete" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    let (status, body) = h
        .call(
            "RoleService",
            "RemovePermission",
            Some(root),
            json!({ "role": "auditor", "permission": "library:delete" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);

    let (status, _) = h
        .call(
            "UserService",
            "AssignRole",
            Some(root),
            json!({ "userId": alice.id, "role": "auditor" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .call(
            "RoleService",
            "CheckPermission",
            Some(root),
            json!({ "userId": alice.id, "resource": "system", "action": "read" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    let (status, body) = h
        .call("RoleService", "DeleteRole", Some(root), json!({ "name": "auditor" }))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["grantsRevoked"], 1);

    let (status, body) = h
        .call(
            "RoleService",
            "CheckPermission",
            Some(root),
            json!({ "userId": alice.id, "resource": "system", "action": "read" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], false);

    let (status, body) = h.call("RoleService", "ListRoles", Some(root), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body["roles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, ["admin", "guest", "user"]);
}

#[tokio::test]
async fn role_hierarchy_rejects_cycles() {
    let h = harness();
    h.user("root", &["admin"]).await;
    let admin = h.login("root", "console").await;
    let root = access(&admin);

    let (status, _) = h
        .call(
            "RoleService",
            "CreateRole",
            Some(root),
            json!({ "name": "editor", "permissions": ["metadata:write"], "parents": ["user"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h
        .call(
            "RoleService",
            "CheckPermission",
            Some(root),
            json!({ "roles": ["editor"], "resource": "media", "action": "read" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    let (status, _) = h
        .call(
            "RoleService",
            "AddParent",
            Some(root),
            json!({ "role": "user", "parent": "editor" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn permission_checks_for_other_users_need_admin() {
    let h = harness();
    let alice = h.user("alice", &["user"]).await;
    let bob = h.user("bob", &["user"]).await;
    h.user("root", &["admin"]).await;
    let alice_tokens = h.login("alice", "laptop").await;
    let admin = h.login("root", "console").await;
    let query = |user_id| json!({ "userId": user_id, "resource": "media", "action": "write" });

    let (status, body) = h
        .call(
            "RoleService",
            "CheckPermission",
            Some(access(&alice_tokens)),
            query(bob.id),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    let (status, body) = h
        .call(
            "RoleService",
            "CheckPermission",
            Some(access(&alice_tokens)),
            query(alice.id),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);

    let (status, body) = h
        .call("RoleService", "CheckPermission", Some(access(&admin)), query(bob.id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowed"], true);
}
