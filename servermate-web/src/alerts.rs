use crate::{auth, prelude::*, AppState};
use actix_web::{delete, get, post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use servermate::models::{ChannelId, GuildId};
use servermate_sql as sql;

const PLATFORMS: &[&str] = &["twitch", "youtube"];
const MAX_TEMPLATE_LENGTH: usize = 500;

#[derive(Debug, Serialize)]
struct AlertInfo {
    alert_id: i64,
    platform: String,
    creator: String,
    channel_id: Option<ChannelId>,
    template: Option<String>,
}

impl From<sql::CreatorAlert> for AlertInfo {
    fn from(row: sql::CreatorAlert) -> Self {
        Self {
            alert_id: row.alert_id,
            platform: row.platform,
            creator: row.creator,
            channel_id: ChannelId::new_checked(row.channel_id as u64),
            template: row.template,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlertRequest {
    platform: String,
    creator: String,
    channel_id: ChannelId,
    template: Option<String>,
}

fn validate(request: &AlertRequest) -> ApiResult<()> {
    if !PLATFORMS.contains(&request.platform.as_str()) {
        return Err(ApiError::bad_request(format!(
            "unsupported platform '{}'",
            request.platform
        )));
    }
    if request.creator.trim().is_empty() {
        return Err(ApiError::bad_request("creator handle must not be empty"));
    }
    if let Some(template) = request.template.as_deref() {
        if template.len() > MAX_TEMPLATE_LENGTH {
            return Err(ApiError::bad_request("announcement template is too long"));
        }
    }
    Ok(())
}

#[get("/{guild_id}/alerts")]
async fn list_alerts(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
) -> JsonResult<Vec<AlertInfo>> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let rows = sql::CreatorAlert::fetch_guild(guild_id)
        .fetch_all(&state.sql)
        .await
        .internal_error("failed to load creator alerts")?;
    Ok(web::Json(rows.into_iter().map(AlertInfo::from).collect()))
}

#[post("/{guild_id}/alerts")]
async fn create_alert(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
    body: web::Json<AlertRequest>,
) -> ApiResult<HttpResponse> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;
    validate(&body)?;

    let alert = sql::CreatorAlert {
        alert_id: 0,
        guild_id: guild_id.get() as i64,
        platform: body.platform.clone(),
        creator: body.creator.trim().to_owned(),
        channel_id: body.channel_id.get() as i64,
        template: body.template.clone(),
    };
    let alert_id = sql::CreatorAlert::create(&state.sql, &alert)
        .await
        .internal_error("failed to store creator alert")?;

    Ok(HttpResponse::Created().json(AlertInfo::from(sql::CreatorAlert {
        alert_id: alert_id as i64,
        ..alert
    })))
}

#[delete("/{guild_id}/alerts/{alert_id}")]
async fn delete_alert(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<(u64, i64)>,
) -> ApiResult<HttpResponse> {
    let (guild_id, alert_id) = path.into_inner();
    let guild_id: GuildId = path_id(guild_id, "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let result = sql::CreatorAlert::delete(guild_id, alert_id)
        .execute(&state.sql)
        .await
        .internal_error("failed to delete creator alert")?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("unknown alert"));
    }
    Ok(HttpResponse::NoContent().finish())
}

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(list_alerts);
    cfg.service(create_alert);
    cfg.service(delete_alert);
}
