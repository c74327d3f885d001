use crate::{auth, auth::AuthUser, prelude::*, AppState};
use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use servermate::models::{guild_icon_url, GuildId, RoleId};
use servermate_sql as sql;

const MAX_NAME_LENGTH: usize = 100;
const MAX_DESCRIPTION_LENGTH: usize = 500;

#[derive(Debug, Serialize)]
struct GroupInfo {
    group_id: i64,
    name: String,
    description: Option<String>,
    ban_sync: bool,
    server_count: i64,
}

impl From<sql::ServerGroup> for GroupInfo {
    fn from(row: sql::ServerGroup) -> Self {
        Self {
            group_id: row.group_id,
            name: row.name,
            description: row.description,
            ban_sync: row.ban_sync,
            server_count: row.server_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct GroupGuild {
    id: GuildId,
    name: String,
    icon_url: Option<String>,
    member_count: i32,
}

#[derive(Debug, Serialize)]
struct RoleLinkInfo {
    rule_id: i64,
    source_guild_id: GuildId,
    source_role_id: RoleId,
    target_guild_id: GuildId,
    target_role_id: RoleId,
}

impl From<sql::RoleSyncRule> for RoleLinkInfo {
    fn from(row: sql::RoleSyncRule) -> Self {
        Self {
            rule_id: row.rule_id,
            source_guild_id: row.source_guild_id(),
            source_role_id: RoleId::new(row.source_role_id as u64),
            target_guild_id: row.target_guild_id(),
            target_role_id: RoleId::new(row.target_role_id as u64),
        }
    }
}

#[derive(Debug, Serialize)]
struct GroupDetail {
    #[serde(flatten)]
    info: GroupInfo,
    guilds: Vec<GroupGuild>,
    role_links: Vec<RoleLinkInfo>,
}

#[derive(Debug, Deserialize)]
struct GroupRequest {
    name: String,
    description: Option<String>,
}

fn validate_group(request: &GroupRequest) -> ApiResult<()> {
    let name = request.name.trim();
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return Err(ApiError::bad_request("group name must be 1-100 characters"));
    }
    if let Some(description) = request.description.as_deref() {
        if description.len() > MAX_DESCRIPTION_LENGTH {
            return Err(ApiError::bad_request("group description is too long"));
        }
    }
    Ok(())
}

async fn fetch_group(state: &AppState, group_id: i64) -> ApiResult<sql::ServerGroup> {
    sql::ServerGroup::fetch(group_id)
        .fetch_optional(&state.sql)
        .await
        .internal_error("failed to load server group")?
        .api_error(ApiError::not_found("unknown group"))
}

/// Mutating a group requires access to at least one of its member guilds. An
/// empty group is only gated on authentication. Returns the member guilds so
/// callers do not have to refetch them.
async fn require_group_access(
    state: &AppState,
    user: &AuthUser,
    group_id: i64,
) -> ApiResult<Vec<sql::Guild>> {
    let members = sql::Guild::fetch_group_members(group_id)
        .fetch_all(&state.sql)
        .await
        .internal_error("failed to load group members")?;
    for member in &members {
        let allowed = auth::guild_access_allowed(state, user.user_id, member.guild_id())
            .await
            .internal_error("failed to resolve guild access")?;
        if allowed {
            return Ok(members);
        }
    }
    if members.is_empty() {
        return Ok(members);
    }
    Err(ApiError::Forbidden)
}

#[get("")]
async fn list_groups(state: web::Data<AppState>, request: HttpRequest) -> JsonResult<Vec<GroupInfo>> {
    auth::authenticate(&state, &request).await?;
    let rows = sql::ServerGroup::fetch_all()
        .fetch_all(&state.sql)
        .await
        .internal_error("failed to list server groups")?;
    Ok(web::Json(rows.into_iter().map(GroupInfo::from).collect()))
}

#[post("")]
async fn create_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    body: web::Json<GroupRequest>,
) -> ApiResult<HttpResponse> {
    auth::authenticate(&state, &request).await?;
    validate_group(&body)?;

    let group_id = sql::ServerGroup::create(
        &state.sql,
        body.name.trim(),
        body.description.as_deref(),
    )
    .await
    .internal_error("failed to create server group")?;

    let group = fetch_group(&state, group_id as i64).await?;
    Ok(HttpResponse::Created().json(GroupInfo::from(group)))
}

#[get("/{group_id}")]
async fn get_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<i64>,
) -> JsonResult<GroupDetail> {
    let group_id = path.into_inner();
    auth::authenticate(&state, &request).await?;

    let group = fetch_group(&state, group_id).await?;
    let members = sql::Guild::fetch_group_members(group_id)
        .fetch_all(&state.sql)
        .await
        .internal_error("failed to load group members")?;
    let rules = sql::RoleSyncRule::fetch_group(group_id)
        .fetch_all(&state.sql)
        .await
        .internal_error("failed to load role links")?;

    Ok(web::Json(GroupDetail {
        info: GroupInfo::from(group),
        guilds: members
            .into_iter()
            .map(|row| GroupGuild {
                id: row.guild_id(),
                name: row.name.clone(),
                icon_url: guild_icon_url(row.guild_id(), row.icon.as_deref()),
                member_count: row.member_count,
            })
            .collect(),
        role_links: rules.into_iter().map(RoleLinkInfo::from).collect(),
    }))
}

#[delete("/{group_id}")]
async fn delete_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<i64>,
) -> ApiResult<HttpResponse> {
    let group_id = path.into_inner();
    let user = auth::authenticate(&state, &request).await?;
    fetch_group(&state, group_id).await?;
    require_group_access(&state, &user, group_id).await?;

    // Links, membership, and the group row go together or not at all.
    let mut txn = state
        .sql
        .begin()
        .await
        .internal_error("failed to start group deletion")?;
    sql::RoleSyncRule::clear_group(group_id)
        .execute(&mut txn)
        .await
        .internal_error("failed to clear role links")?;
    sql::Guild::clear_group(group_id)
        .execute(&mut txn)
        .await
        .internal_error("failed to detach group members")?;
    sql::ServerGroup::delete(group_id)
        .execute(&mut txn)
        .await
        .internal_error("failed to delete server group")?;
    txn.commit()
        .await
        .internal_error("failed to commit group deletion")?;
    Ok(HttpResponse::NoContent().finish())
}

#[put("/{group_id}/guilds/{guild_id}")]
async fn join_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<(i64, u64)>,
) -> ApiResult<HttpResponse> {
    let (group_id, guild_id) = path.into_inner();
    let guild_id: GuildId = path_id(guild_id, "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;
    fetch_group(&state, group_id).await?;

    let row = sql::Guild::fetch(guild_id)
        .fetch_optional(&state.sql)
        .await
        .internal_error("failed to load guild")?
        .api_error(ApiError::not_found("unknown guild"))?;
    if !row.is_active() {
        return Err(ApiError::conflict("the bot is no longer in that guild"));
    }
    if let Some(current) = row.group_id {
        if current != group_id {
            return Err(ApiError::conflict("guild already belongs to another group"));
        }
    }

    sql::Guild::set_group(guild_id, Some(group_id))
        .execute(&state.sql)
        .await
        .internal_error("failed to add guild to group")?;
    Ok(HttpResponse::NoContent().finish())
}

#[delete("/{group_id}/guilds/{guild_id}")]
async fn leave_group(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<(i64, u64)>,
) -> ApiResult<HttpResponse> {
    let (group_id, guild_id) = path.into_inner();
    let guild_id: GuildId = path_id(guild_id, "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let row = sql::Guild::fetch(guild_id)
        .fetch_optional(&state.sql)
        .await
        .internal_error("failed to load guild")?
        .api_error(ApiError::not_found("unknown guild"))?;
    if row.group_id != Some(group_id) {
        return Err(ApiError::conflict("guild is not in that group"));
    }

    sql::Guild::set_group(guild_id, None)
        .execute(&state.sql)
        .await
        .internal_error("failed to remove guild from group")?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize)]
struct RoleLinkRequest {
    source_guild_id: GuildId,
    source_role_id: RoleId,
    target_guild_id: GuildId,
    target_role_id: RoleId,
}

fn validate_role_link(request: &RoleLinkRequest, members: &[sql::Guild]) -> ApiResult<()> {
    let is_member = |guild_id: GuildId| members.iter().any(|row| row.guild_id() == guild_id);
    if !is_member(request.source_guild_id) || !is_member(request.target_guild_id) {
        return Err(ApiError::bad_request(
            "both guilds must be members of the group",
        ));
    }
    if request.source_guild_id == request.target_guild_id
        && request.source_role_id == request.target_role_id
    {
        return Err(ApiError::bad_request("a role cannot be linked to itself"));
    }
    Ok(())
}

#[get("/{group_id}/role-links")]
async fn list_role_links(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<i64>,
) -> JsonResult<Vec<RoleLinkInfo>> {
    let group_id = path.into_inner();
    auth::authenticate(&state, &request).await?;
    fetch_group(&state, group_id).await?;

    let rules = sql::RoleSyncRule::fetch_group(group_id)
        .fetch_all(&state.sql)
        .await
        .internal_error("failed to load role links")?;
    Ok(web::Json(rules.into_iter().map(RoleLinkInfo::from).collect()))
}

#[post("/{group_id}/role-links")]
async fn create_role_link(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<RoleLinkRequest>,
) -> ApiResult<HttpResponse> {
    let group_id = path.into_inner();
    let user = auth::authenticate(&state, &request).await?;
    fetch_group(&state, group_id).await?;
    let members = require_group_access(&state, &user, group_id).await?;
    validate_role_link(&body, &members)?;

    // Linking roles changes both ends; the caller needs access to each.
    auth::require_guild_access(&state, user.user_id, body.source_guild_id).await?;
    auth::require_guild_access(&state, user.user_id, body.target_guild_id).await?;

    let rule_id = sql::RoleSyncRule::create(
        &state.sql,
        group_id,
        body.source_guild_id,
        body.source_role_id,
        body.target_guild_id,
        body.target_role_id,
    )
    .await
    .internal_error("failed to store role link")?;

    Ok(HttpResponse::Created().json(RoleLinkInfo {
        rule_id: rule_id as i64,
        source_guild_id: body.source_guild_id,
        source_role_id: body.source_role_id,
        target_guild_id: body.target_guild_id,
        target_role_id: body.target_role_id,
    }))
}

#[delete("/{group_id}/role-links/{rule_id}")]
async fn delete_role_link(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<(i64, i64)>,
) -> ApiResult<HttpResponse> {
    let (group_id, rule_id) = path.into_inner();
    let user = auth::authenticate(&state, &request).await?;
    fetch_group(&state, group_id).await?;
    require_group_access(&state, &user, group_id).await?;

    let result = sql::RoleSyncRule::delete(group_id, rule_id)
        .execute(&state.sql)
        .await
        .internal_error("failed to delete role link")?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("unknown role link"));
    }
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize)]
struct BanSyncUpdate {
    enabled: bool,
}

#[put("/{group_id}/ban-sync")]
async fn put_ban_sync(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<i64>,
    body: web::Json<BanSyncUpdate>,
) -> ApiResult<HttpResponse> {
    let group_id = path.into_inner();
    let user = auth::authenticate(&state, &request).await?;
    fetch_group(&state, group_id).await?;
    require_group_access(&state, &user, group_id).await?;

    sql::ServerGroup::set_ban_sync(group_id, body.enabled)
        .execute(&state.sql)
        .await
        .internal_error("failed to update ban sync")?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(list_groups);
    cfg.service(create_group);
    cfg.service(get_group);
    cfg.service(delete_group);
    cfg.service(join_group);
    cfg.service(leave_group);
    cfg.service(list_role_links);
    cfg.service(create_role_link);
    cfg.service(delete_role_link);
    cfg.service(put_ban_sync);
}
