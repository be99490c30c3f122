//! `narwhal.v1.RoleService` handlers.

use axum::Json;
use axum::extract::State;
use narwhal_core::rbac::{Permission, Role};

use crate::AppState;
use crate::error::AppResult;
use crate::extract::Rpc;
use crate::middleware::AuthContext;
use crate::models::{
    AddParentRequest, ChangedResponse, CheckPermissionRequest, CheckPermissionResponse,
    CreateRoleRequest, DeleteRoleResponse, Empty, ListRolesResponse, RoleNameRequest,
    RolePermissionRequest, RoleResponse,
};

pub async fn list_roles(State(state): State<AppState>) -> AppResult<Json<ListRolesResponse>> {
    let roles = state
        .auth
        .policy()
        .list_roles()
        .into_iter()
        .map(RoleResponse::from)
        .collect();
    Ok(Json(ListRolesResponse { roles }))
}

pub async fn create_role(
    State(state): State<AppState>,
    Rpc(body): Rpc<CreateRoleRequest>,
) -> AppResult<Json<RoleResponse>> {
    let permissions = body
        .permissions
        .iter()
        .map(|p| p.parse::<Permission>())
        .collect::<Result<Vec<_>, _>>()?;
    let mut role = Role::new(body.name.trim(), body.description).with_permissions(permissions);
    role.parents.extend(body.parents);

    let policy = state.auth.policy();
    policy.add_role(role.clone())?;
    Ok(Json(role.into()))
}

/// Deletes the role and every grant of it.
pub async fn delete_role(
    State(state): State<AppState>,
    Rpc(body): Rpc<RoleNameRequest>,
) -> AppResult<Json<DeleteRoleResponse>> {
    let grants_revoked = state.auth.delete_role(&body.name).await?;
    Ok(Json(DeleteRoleResponse { grants_revoked }))
}

pub async fn add_permission(
    State(state): State<AppState>,
    Rpc(body): Rpc<RolePermissionRequest>,
) -> AppResult<Json<ChangedResponse>> {
    let permission: Permission = body.permission.parse()?;
    let changed = state.auth.policy().add_permission(&body.role, permission)?;
    Ok(Json(ChangedResponse { changed }))
}

pub async fn remove_permission(
    State(state): State<AppState>,
    Rpc(body): Rpc<RolePermissionRequest>,
) -> AppResult<Json<ChangedResponse>> {
    let permission: Permission = body.permission.parse()?;
    let changed = state
        .auth
        .policy()
        .remove_permission(&body.role, &permission)?;
    Ok(Json(ChangedResponse { changed }))
}

pub async fn add_parent(
    State(state): State<AppState>,
    Rpc(body): Rpc<AddParentRequest>,
) -> AppResult<Json<Empty>> {
    state.auth.policy().add_parent(&body.role, &body.parent)?;
    Ok(Json(Empty {}))
}

/// Evaluate a permission for a user, an explicit role set, or the caller.
/// Only the user themselves and admins may query a user's grants.
pub async fn check_permission(
    State(state): State<AppState>,
    ctx: AuthContext,
    Rpc(body): Rpc<CheckPermissionRequest>,
) -> AppResult<Json<CheckPermissionResponse>> {
    let policy = state.auth.policy();
    let allowed = match (body.user_id, body.roles) {
        (Some(user_id), _) => {
            ctx.require_owner(policy, user_id, true)?;
            policy.check_user(&user_id.to_string(), &body.resource, &body.action)
        }
        (None, Some(roles)) => policy.check_any(&roles, &body.resource, &body.action),
        (None, None) => policy.check_any(&ctx.roles, &body.resource, &body.action),
    };
    Ok(Json(CheckPermissionResponse { allowed }))
}
