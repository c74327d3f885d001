use crate::{auth, prelude::*, AppState};
use actix_web::{get, put, web, HttpRequest};
use serde::{Deserialize, Serialize};
use servermate::models::{ChannelId, GuildId};
use servermate_sql as sql;

const SCHEDULES: &[&str] = &["daily", "weekly"];
const DEFAULT_SCHEDULE: &str = "daily";
const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Serialize)]
struct SummaryConfig {
    enabled: bool,
    channel_id: Option<ChannelId>,
    schedule: String,
    language: String,
}

impl SummaryConfig {
    fn from_row(row: sql::SummarySettings) -> Self {
        Self {
            enabled: row.enabled,
            channel_id: row
                .channel_id
                .and_then(|id| ChannelId::new_checked(id as u64)),
            schedule: row.schedule,
            language: row.language,
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel_id: None,
            schedule: DEFAULT_SCHEDULE.to_owned(),
            language: DEFAULT_LANGUAGE.to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SummaryUpdate {
    enabled: bool,
    channel_id: Option<ChannelId>,
    schedule: String,
    language: Option<String>,
}

fn validate(update: &SummaryUpdate) -> ApiResult<()> {
    if !SCHEDULES.contains(&update.schedule.as_str()) {
        return Err(ApiError::bad_request(format!(
            "unknown schedule '{}'",
            update.schedule
        )));
    }
    if let Some(language) = update.language.as_deref() {
        if language.is_empty() || language.len() > 8 {
            return Err(ApiError::bad_request("invalid language code"));
        }
    }
    if update.enabled && update.channel_id.is_none() {
        return Err(ApiError::bad_request(
            "summaries need an output channel before they can be enabled",
        ));
    }
    Ok(())
}

#[get("/{guild_id}/summaries")]
async fn get_summaries(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
) -> JsonResult<SummaryConfig> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let config = sql::SummarySettings::fetch(guild_id)
        .fetch_optional(&state.sql)
        .await
        .internal_error("failed to load summary settings")?
        .map(SummaryConfig::from_row)
        .unwrap_or_default();
    Ok(web::Json(config))
}

#[put("/{guild_id}/summaries")]
async fn put_summaries(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
    update: web::Json<SummaryUpdate>,
) -> JsonResult<SummaryConfig> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;
    validate(&update)?;

    let row = sql::SummarySettings {
        guild_id: guild_id.get() as i64,
        enabled: update.enabled,
        channel_id: update.channel_id.map(|id| id.get() as i64),
        schedule: update.schedule.clone(),
        language: update
            .language
            .clone()
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_owned()),
    };
    row.upsert()
        .execute(&state.sql)
        .await
        .internal_error("failed to store summary settings")?;
    Ok(web::Json(SummaryConfig::from_row(row)))
}

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(get_summaries);
    cfg.service(put_summaries);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(enabled: bool, channel: Option<u64>, schedule: &str) -> SummaryUpdate {
        SummaryUpdate {
            enabled,
            channel_id: channel.map(ChannelId::new),
            schedule: schedule.to_owned(),
            language: None,
        }
    }

    #[test]
    fn test_validate_schedule() {
        assert!(validate(&update(false, None, "daily")).is_ok());
        assert!(validate(&update(false, None, "weekly")).is_ok());
        assert!(validate(&update(false, None, "hourly")).is_err());
    }

    #[test]
    fn test_enabling_requires_a_channel() {
        assert!(validate(&update(true, None, "daily")).is_err());
        assert!(validate(&update(true, Some(42), "daily")).is_ok());
    }

    #[test]
    fn test_validate_language() {
        let mut bad = update(false, None, "daily");
        bad.language = Some(String::new());
        assert!(validate(&bad).is_err());

        bad.language = Some("x".repeat(9));
        assert!(validate(&bad).is_err());

        bad.language = Some("pt-BR".to_owned());
        assert!(validate(&bad).is_ok());
    }

    #[actix_web::test]
    async fn test_put_summaries_authenticates_before_validating() {
        use actix_web::{http::StatusCode, test, App};

        let app = test::init_service(
            App::new()
                .app_data(crate::test_util::state())
                .service(web::scope("/guilds").configure(scoped_config)),
        )
        .await;
        // Unknown schedule, no credentials: the missing credentials win.
        let request = test::TestRequest::put()
            .uri("/guilds/1/summaries")
            .set_json(serde_json::json!({"enabled": false, "schedule": "hourly"}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
