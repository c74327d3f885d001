use crate::{auth, prelude::*, AppState};
use actix_web::{get, patch, web, HttpRequest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use servermate::models::{GuildId, UserId};
use servermate_sql as sql;

const DEFAULT_PAGE_SIZE: u64 = 50;
const MAX_PAGE_SIZE: u64 = 200;

#[derive(Debug, Serialize)]
struct CaseInfo {
    case_id: i64,
    kind: String,
    target_id: UserId,
    moderator_id: UserId,
    reason: Option<String>,
    resolved: bool,
    created_at: DateTime<Utc>,
}

impl From<sql::ModerationCase> for CaseInfo {
    fn from(row: sql::ModerationCase) -> Self {
        Self {
            case_id: row.case_id,
            kind: row.kind,
            target_id: UserId::new(row.target_id as u64),
            moderator_id: UserId::new(row.moderator_id as u64),
            reason: row.reason,
            resolved: row.resolved,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CaseQuery {
    limit: Option<u64>,
}

fn page_size(requested: Option<u64>) -> u64 {
    requested.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

#[derive(Debug, Deserialize)]
struct CaseUpdate {
    reason: Option<String>,
    resolved: Option<bool>,
}

#[get("/{guild_id}/cases")]
async fn list_cases(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
    query: web::Query<CaseQuery>,
) -> JsonResult<Vec<CaseInfo>> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let rows = sql::ModerationCase::fetch_guild(guild_id, page_size(query.limit))
        .fetch_all(&state.sql)
        .await
        .internal_error("failed to load moderation cases")?;
    Ok(web::Json(rows.into_iter().map(CaseInfo::from).collect()))
}

#[get("/{guild_id}/cases/{case_id}")]
async fn get_case(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<(u64, i64)>,
) -> JsonResult<CaseInfo> {
    let (guild_id, case_id) = path.into_inner();
    let guild_id: GuildId = path_id(guild_id, "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let row = sql::ModerationCase::fetch(guild_id, case_id)
        .fetch_optional(&state.sql)
        .await
        .internal_error("failed to load moderation case")?
        .api_error(ApiError::not_found("unknown case"))?;
    Ok(web::Json(CaseInfo::from(row)))
}

#[patch("/{guild_id}/cases/{case_id}")]
async fn patch_case(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<(u64, i64)>,
    update: web::Json<CaseUpdate>,
) -> JsonResult<CaseInfo> {
    let (guild_id, case_id) = path.into_inner();
    let guild_id: GuildId = path_id(guild_id, "guild")?;
    if update.reason.is_none() && update.resolved.is_none() {
        return Err(ApiError::bad_request("nothing to update"));
    }
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let mut row = sql::ModerationCase::fetch(guild_id, case_id)
        .fetch_optional(&state.sql)
        .await
        .internal_error("failed to load moderation case")?
        .api_error(ApiError::not_found("unknown case"))?;

    if let Some(reason) = update.reason.clone() {
        row.reason = Some(reason);
    }
    if let Some(resolved) = update.resolved {
        row.resolved = resolved;
    }
    row.update()
        .execute(&state.sql)
        .await
        .internal_error("failed to update moderation case")?;
    Ok(web::Json(CaseInfo::from(row)))
}

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(list_cases);
    cfg.service(get_case);
    cfg.service(patch_case);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_bounds() {
        assert_eq!(page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(Some(0)), 1);
        assert_eq!(page_size(Some(25)), 25);
        assert_eq!(page_size(Some(100_000)), MAX_PAGE_SIZE);
    }
}
