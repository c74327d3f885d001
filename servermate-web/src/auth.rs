use crate::{prelude::*, AppState};
use actix_web::HttpRequest;
use anyhow::Result;
use servermate::{
    models::{GuildId, RoleId, UserId},
    permissions::CacheKey,
};
use servermate_sql::{AccessGrant, RolePermission};
use std::collections::HashSet;

/// The caller of an authenticated route: the Discord user behind the bearer
/// token in the Authorization header.
pub struct AuthUser {
    pub user_id: UserId,
    pub token: String,
}

pub fn bearer_token(request: &HttpRequest) -> ApiResult<&str> {
    request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::Unauthorized)
}

pub async fn authenticate(state: &AppState, request: &HttpRequest) -> ApiResult<AuthUser> {
    let token = bearer_token(request)?.to_owned();
    let user = match state.discord.current_user(&token).await {
        Ok(user) => user,
        Err(err) if err.is_unauthorized() => return Err(ApiError::Unauthorized),
        Err(err) => return Err(err).internal_error("failed to identify caller"),
    };
    tracing::debug!("authenticated {} ({})", user.username, user.id);
    Ok(AuthUser {
        user_id: user.id,
        token,
    })
}

/// Gate for all per-guild routes. 403s when the resolved decision is a deny.
pub async fn require_guild_access(
    state: &AppState,
    user_id: UserId,
    guild_id: GuildId,
) -> ApiResult<()> {
    let allowed = guild_access_allowed(state, user_id, guild_id)
        .await
        .internal_error("failed to resolve guild access")?;
    if allowed {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Resolves whether `user_id` may manage `guild_id` through the app, going
/// through the process-local TTL cache.
///
/// Resolution order: explicit access grant, Discord guild ownership, then the
/// guild's role permission rows. A guild with no rows is unrestricted. Errors
/// propagate: a database or Discord failure denies instead of allowing.
pub async fn guild_access_allowed(
    state: &AppState,
    user_id: UserId,
    guild_id: GuildId,
) -> Result<bool> {
    let key = CacheKey::new(user_id, guild_id);
    state
        .permissions
        .resolve(key, || resolve_access(state, user_id, guild_id))
        .await
}

async fn resolve_access(state: &AppState, user_id: UserId, guild_id: GuildId) -> Result<bool> {
    let grant = AccessGrant::fetch(guild_id, user_id)
        .fetch_optional(&state.sql)
        .await?;
    if grant.is_some() {
        return Ok(true);
    }

    if let Some(guild) = state.discord.guild(guild_id).await? {
        if guild.owner_id == user_id {
            return Ok(true);
        }
    }

    let rows = RolePermission::fetch_guild(guild_id)
        .fetch_all(&state.sql)
        .await?;
    if rows.is_empty() {
        return Ok(true);
    }

    let member = state.discord.guild_member(guild_id, user_id).await?;
    Ok(member_has_allowed_role(
        &rows,
        member.as_ref().map(|m| m.roles.as_slice()),
    ))
}

/// Decides access from a guild's (non-empty) role permission rows and the
/// member's role list. A missing member is a plain deny.
fn member_has_allowed_role(rows: &[RolePermission], member_roles: Option<&[RoleId]>) -> bool {
    let allowed: HashSet<RoleId> = rows
        .iter()
        .filter(|row| row.can_use_app)
        .map(|row| row.role_id())
        .collect();
    match member_roles {
        Some(roles) => roles.iter().any(|role| allowed.contains(role)),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(role_id: u64, can_use_app: bool) -> RolePermission {
        RolePermission {
            guild_id: 1,
            role_id: role_id as i64,
            can_use_app,
        }
    }

    fn roles(ids: &[u64]) -> Vec<RoleId> {
        ids.iter().map(|id| RoleId::new(*id)).collect()
    }

    #[test]
    fn test_member_with_allowed_role_passes() {
        let rows = vec![row(10, true), row(11, false)];
        assert!(member_has_allowed_role(&rows, Some(&roles(&[10, 99]))));
    }

    #[test]
    fn test_member_without_allowed_role_fails() {
        let rows = vec![row(10, true)];
        assert!(!member_has_allowed_role(&rows, Some(&roles(&[11, 12]))));
        assert!(!member_has_allowed_role(&rows, Some(&[])));
    }

    #[test]
    fn test_denied_roles_do_not_grant() {
        // Rows exist but none of them allow: everyone but the owner is out.
        let rows = vec![row(10, false), row(11, false)];
        assert!(!member_has_allowed_role(&rows, Some(&roles(&[10, 11]))));
    }

    #[test]
    fn test_missing_member_is_denied() {
        let rows = vec![row(10, true)];
        assert!(!member_has_allowed_role(&rows, None));
    }
}
