use crate::{
    auth,
    discord::{RestGuild, RestRole, UserGuild},
    prelude::*,
    AppState,
};
use actix_web::{delete, get, put, web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use servermate::{
    models::{guild_icon_url, GuildId, RoleId, UserId},
    permissions::CacheKey,
};
use serde::{Deserialize, Serialize};
use servermate_sql as sql;
use std::collections::HashMap;

/// Access checks for the guild listing fan out to Discord on a cold cache;
/// keep the fan-out bounded.
const ACCESS_CHECK_CONCURRENCY: usize = 8;

#[derive(Debug, Serialize)]
pub struct GroupRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct GuildSummary {
    pub id: GuildId,
    pub name: String,
    pub icon_url: Option<String>,
    pub member_count: i32,
    pub role_count: i32,
    pub premium: bool,
    pub group: Option<GroupRef>,
}

#[derive(Debug, Serialize)]
struct RoleInfo {
    id: RoleId,
    name: String,
    position: i64,
    permissions: String,
    managed: bool,
}

impl From<RestRole> for RoleInfo {
    fn from(role: RestRole) -> Self {
        Self {
            id: role.id,
            name: role.name,
            position: role.position,
            permissions: role.permissions,
            managed: role.managed,
        }
    }
}

#[derive(Debug, Serialize)]
struct GuildDetail {
    id: GuildId,
    name: String,
    icon_url: Option<String>,
    member_count: i32,
    role_count: i32,
    premium: bool,
    status: String,
    group: Option<GroupRef>,
    roles: Vec<RoleInfo>,
}

/// Builds the detail view from the database row, overlaid with whatever the
/// live guild fetch returned. Discord's copy of the name, icon, and member
/// count is fresher than the database one when the bot is still in the guild.
fn guild_detail(row: sql::Guild, live: Option<RestGuild>, roles: Vec<RestRole>) -> GuildDetail {
    let name = live
        .as_ref()
        .map(|guild| guild.name.clone())
        .unwrap_or_else(|| row.name.clone());
    let icon = live
        .as_ref()
        .map(|guild| guild.icon.clone())
        .unwrap_or_else(|| row.icon.clone());
    let member_count = live
        .as_ref()
        .and_then(|guild| guild.approximate_member_count)
        .map(|count| count as i32)
        .unwrap_or(row.member_count);
    GuildDetail {
        id: row.guild_id(),
        name,
        icon_url: guild_icon_url(row.guild_id(), icon.as_deref()),
        member_count,
        role_count: row.role_count,
        premium: row.premium,
        status: row.status.clone(),
        group: group_ref(&row),
        roles: roles.into_iter().map(RoleInfo::from).collect(),
    }
}

fn group_ref(row: &sql::Guild) -> Option<GroupRef> {
    match (row.group_id, row.group_name.as_ref()) {
        (Some(id), Some(name)) => Some(GroupRef {
            id,
            name: name.clone(),
        }),
        _ => None,
    }
}

/// Builds the guild list response from the user's Discord guilds and the
/// intersected database rows. Discord's copy of name and icon wins over the
/// database one; the database may lag behind a rename.
fn summarize(user_guilds: &[UserGuild], rows: Vec<sql::Guild>) -> Vec<GuildSummary> {
    let by_id: HashMap<GuildId, &UserGuild> =
        user_guilds.iter().map(|guild| (guild.id, guild)).collect();
    let mut summaries: Vec<GuildSummary> = rows
        .into_iter()
        .filter_map(|row| {
            let discord = by_id.get(&row.guild_id())?;
            let icon = discord.icon.as_deref().or(row.icon.as_deref());
            Some(GuildSummary {
                id: row.guild_id(),
                name: discord.name.clone(),
                icon_url: guild_icon_url(row.guild_id(), icon),
                member_count: row.member_count,
                role_count: row.role_count,
                premium: row.premium,
                group: group_ref(&row),
            })
        })
        .collect();
    summaries.sort_by(|a, b| a.name.cmp(&b.name));
    summaries
}

#[get("")]
async fn list_guilds(
    state: web::Data<AppState>,
    request: HttpRequest,
) -> JsonResult<Vec<GuildSummary>> {
    let user = auth::authenticate(&state, &request).await?;
    let user_guilds = state
        .discord
        .current_user_guilds(&user.token)
        .await
        .internal_error("failed to list the caller's guilds")?;

    let ids: Vec<GuildId> = user_guilds.iter().map(|guild| guild.id).collect();
    let rows = sql::Guild::fetch_active_by_ids(&state.sql, &ids)
        .await
        .internal_error("failed to intersect guilds")?;

    // Run the (cached) access gate on every candidate. A guild whose
    // resolution fails is left out of the listing rather than failing it.
    let accessible: Vec<sql::Guild> = stream::iter(rows)
        .map(|row| {
            let state = state.clone();
            let user_id = user.user_id;
            async move {
                let guild_id = row.guild_id();
                match auth::guild_access_allowed(&state, user_id, guild_id).await {
                    Ok(true) => Some(row),
                    Ok(false) => None,
                    Err(err) => {
                        tracing::warn!("dropping guild {} from listing: {:?}", guild_id, err);
                        None
                    }
                }
            }
        })
        .buffer_unordered(ACCESS_CHECK_CONCURRENCY)
        .filter_map(futures::future::ready)
        .collect()
        .await;

    Ok(web::Json(summarize(&user_guilds, accessible)))
}

#[get("/{guild_id}")]
async fn get_guild(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
) -> JsonResult<GuildDetail> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let row = sql::Guild::fetch(guild_id)
        .fetch_optional(&state.sql)
        .await
        .internal_error("failed to load guild")?
        .api_error(ApiError::not_found("unknown guild"))?;
    let live = state
        .discord
        .guild(guild_id)
        .await
        .internal_error("failed to fetch guild")?;
    let roles = state
        .discord
        .guild_roles(guild_id)
        .await
        .internal_error("failed to fetch guild roles")?;

    Ok(web::Json(guild_detail(row, live, roles)))
}

#[derive(Debug, Serialize)]
struct RolePermissionInfo {
    role_id: RoleId,
    can_use_app: bool,
}

#[derive(Debug, Deserialize)]
struct RolePermissionUpdate {
    role_id: RoleId,
    can_use_app: bool,
}

#[get("/{guild_id}/permissions")]
async fn list_role_permissions(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
) -> JsonResult<Vec<RolePermissionInfo>> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let rows = sql::RolePermission::fetch_guild(guild_id)
        .fetch_all(&state.sql)
        .await
        .internal_error("failed to load role permissions")?;
    Ok(web::Json(
        rows.into_iter()
            .map(|row| RolePermissionInfo {
                role_id: row.role_id(),
                can_use_app: row.can_use_app,
            })
            .collect(),
    ))
}

#[put("/{guild_id}/permissions")]
async fn put_role_permission(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
    update: web::Json<RolePermissionUpdate>,
) -> ApiResult<HttpResponse> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    sql::RolePermission::upsert(guild_id, update.role_id, update.can_use_app)
        .execute(&state.sql)
        .await
        .internal_error("failed to store role permission")?;
    state.permissions.purge_guild(guild_id);
    Ok(HttpResponse::NoContent().finish())
}

#[delete("/{guild_id}/permissions/{role_id}")]
async fn delete_role_permission(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<(u64, u64)>,
) -> ApiResult<HttpResponse> {
    let (guild_id, role_id) = path.into_inner();
    let guild_id: GuildId = path_id(guild_id, "guild")?;
    let role_id: RoleId = path_id(role_id, "role")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let result = sql::RolePermission::delete(guild_id, role_id)
        .execute(&state.sql)
        .await
        .internal_error("failed to delete role permission")?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("no permission row for that role"));
    }
    state.permissions.purge_guild(guild_id);
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Serialize)]
struct AccessGrantInfo {
    user_id: UserId,
    granted_by: UserId,
    created_at: DateTime<Utc>,
}

#[get("/{guild_id}/access")]
async fn list_access_grants(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
) -> JsonResult<Vec<AccessGrantInfo>> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let rows = sql::AccessGrant::fetch_guild(guild_id)
        .fetch_all(&state.sql)
        .await
        .internal_error("failed to load access grants")?;
    Ok(web::Json(
        rows.into_iter()
            .map(|row| AccessGrantInfo {
                user_id: row.user_id(),
                granted_by: UserId::new(row.granted_by as u64),
                created_at: row.created_at,
            })
            .collect(),
    ))
}

#[put("/{guild_id}/access/{user_id}")]
async fn put_access_grant(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<(u64, u64)>,
) -> ApiResult<HttpResponse> {
    let (guild_id, target_id) = path.into_inner();
    let guild_id: GuildId = path_id(guild_id, "guild")?;
    let target_id: UserId = path_id(target_id, "user")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    sql::AccessGrant::insert(guild_id, target_id, user.user_id)
        .execute(&state.sql)
        .await
        .internal_error("failed to store access grant")?;
    state.permissions.remove(&CacheKey::new(target_id, guild_id));
    Ok(HttpResponse::NoContent().finish())
}

#[delete("/{guild_id}/access/{user_id}")]
async fn delete_access_grant(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<(u64, u64)>,
) -> ApiResult<HttpResponse> {
    let (guild_id, target_id) = path.into_inner();
    let guild_id: GuildId = path_id(guild_id, "guild")?;
    let target_id: UserId = path_id(target_id, "user")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let result = sql::AccessGrant::delete(guild_id, target_id)
        .execute(&state.sql)
        .await
        .internal_error("failed to delete access grant")?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("no grant for that user"));
    }
    state.permissions.remove(&CacheKey::new(target_id, guild_id));
    Ok(HttpResponse::NoContent().finish())
}

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(list_guilds);
    cfg.service(list_role_permissions);
    cfg.service(put_role_permission);
    cfg.service(delete_role_permission);
    cfg.service(list_access_grants);
    cfg.service(put_access_grant);
    cfg.service(delete_access_grant);
    cfg.service(get_guild);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_guild(id: u64, name: &str, icon: Option<&str>) -> UserGuild {
        UserGuild {
            id: GuildId::new(id),
            name: name.to_owned(),
            icon: icon.map(str::to_owned),
            owner: false,
            permissions: Some("32".to_owned()),
        }
    }

    fn db_guild(id: u64, name: &str) -> sql::Guild {
        sql::Guild {
            guild_id: id as i64,
            name: name.to_owned(),
            icon: None,
            member_count: 100,
            role_count: 5,
            premium: false,
            group_id: None,
            status: "active".to_owned(),
            group_name: None,
        }
    }

    #[test]
    fn test_summarize_uses_discord_name_and_sorts() {
        let discord = vec![
            user_guild(2, "Zeta", None),
            user_guild(1, "Alpha (renamed)", Some("hash")),
        ];
        let rows = vec![db_guild(1, "Alpha"), db_guild(2, "Zeta")];

        let summaries = summarize(&discord, rows);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].name, "Alpha (renamed)");
        assert_eq!(
            summaries[0].icon_url.as_deref(),
            Some("https://cdn.discordapp.com/icons/1/hash.png")
        );
        assert_eq!(summaries[1].name, "Zeta");
        assert_eq!(summaries[1].member_count, 100);
    }

    #[test]
    fn test_summarize_skips_rows_without_discord_entry() {
        let discord = vec![user_guild(1, "Alpha", None)];
        let rows = vec![db_guild(1, "Alpha"), db_guild(9, "Orphan")];
        let summaries = summarize(&discord, rows);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, GuildId::new(1));
    }

    #[test]
    fn test_guild_detail_prefers_live_data() {
        let live = RestGuild {
            name: "Fresh Name".to_owned(),
            icon: Some("a_newhash".to_owned()),
            owner_id: UserId::new(42),
            approximate_member_count: Some(250),
        };
        let detail = guild_detail(db_guild(1, "Stale Name"), Some(live), Vec::new());
        assert_eq!(detail.name, "Fresh Name");
        assert_eq!(detail.member_count, 250);
        assert_eq!(
            detail.icon_url.as_deref(),
            Some("https://cdn.discordapp.com/icons/1/a_newhash.gif")
        );

        let detail = guild_detail(db_guild(1, "Stale Name"), None, Vec::new());
        assert_eq!(detail.name, "Stale Name");
        assert_eq!(detail.member_count, 100);
        assert!(detail.icon_url.is_none());
    }

    #[test]
    fn test_group_ref_requires_both_columns() {
        let mut row = db_guild(1, "Alpha");
        assert!(group_ref(&row).is_none());

        row.group_id = Some(7);
        row.group_name = Some("EU Cluster".to_owned());
        let group = group_ref(&row).unwrap();
        assert_eq!(group.id, 7);
        assert_eq!(group.name, "EU Cluster");
    }
}
