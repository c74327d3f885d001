use crate::{auth, prelude::*, AppState};
use actix_web::{get, put, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use servermate::models::GuildId;
use servermate_sql as sql;
use std::collections::HashMap;

/// Features a guild can toggle from the dashboard. Everything defaults to
/// off until the guild opts in.
const FEATURES: &[&str] = &[
    "analytics",
    "creator_alerts",
    "moderation",
    "role_sync",
    "summaries",
];

#[derive(Debug, Serialize, PartialEq, Eq)]
struct FeatureToggle {
    feature: &'static str,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct FeatureUpdate {
    feature: String,
    enabled: bool,
}

/// Projects the stored rows onto the full feature set; unknown rows left over
/// from removed features are ignored.
fn toggles(rows: Vec<sql::GuildFeature>) -> Vec<FeatureToggle> {
    let stored: HashMap<String, bool> = rows
        .into_iter()
        .map(|row| (row.feature, row.enabled))
        .collect();
    FEATURES
        .iter()
        .copied()
        .map(|feature| FeatureToggle {
            feature,
            enabled: stored.get(feature).copied().unwrap_or(false),
        })
        .collect()
}

#[get("/{guild_id}/features")]
async fn get_features(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
) -> JsonResult<Vec<FeatureToggle>> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;

    let rows = sql::GuildFeature::fetch_guild(guild_id)
        .fetch_all(&state.sql)
        .await
        .internal_error("failed to load feature toggles")?;
    Ok(web::Json(toggles(rows)))
}

#[put("/{guild_id}/features")]
async fn put_feature(
    state: web::Data<AppState>,
    request: HttpRequest,
    path: web::Path<u64>,
    update: web::Json<FeatureUpdate>,
) -> ApiResult<HttpResponse> {
    let guild_id: GuildId = path_id(path.into_inner(), "guild")?;
    let user = auth::authenticate(&state, &request).await?;
    auth::require_guild_access(&state, user.user_id, guild_id).await?;
    if !FEATURES.contains(&update.feature.as_str()) {
        return Err(ApiError::bad_request(format!(
            "unknown feature '{}'",
            update.feature
        )));
    }

    sql::GuildFeature::set(guild_id, &update.feature, update.enabled)
        .execute(&state.sql)
        .await
        .internal_error("failed to store feature toggle")?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(get_features);
    cfg.service(put_feature);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(feature: &str, enabled: bool) -> sql::GuildFeature {
        sql::GuildFeature {
            guild_id: 1,
            feature: feature.to_owned(),
            enabled,
        }
    }

    #[test]
    fn test_toggles_default_off() {
        let all = toggles(Vec::new());
        assert_eq!(all.len(), FEATURES.len());
        assert!(all.iter().all(|toggle| !toggle.enabled));
    }

    #[test]
    fn test_toggles_merge_stored_rows() {
        let all = toggles(vec![row("summaries", true), row("moderation", false)]);
        let enabled: Vec<&str> = all
            .iter()
            .filter(|toggle| toggle.enabled)
            .map(|toggle| toggle.feature)
            .collect();
        assert_eq!(enabled, vec!["summaries"]);
    }

    #[test]
    fn test_toggles_ignore_unknown_rows() {
        let all = toggles(vec![row("ancient_feature", true)]);
        assert!(all.iter().all(|toggle| !toggle.enabled));
        assert_eq!(all.len(), FEATURES.len());
    }

    #[actix_web::test]
    async fn test_put_feature_authenticates_before_validating() {
        use actix_web::{http::StatusCode, test, App};

        let app = test::init_service(
            App::new()
                .app_data(crate::test_util::state())
                .service(web::scope("/guilds").configure(scoped_config)),
        )
        .await;
        // Invalid feature name, no credentials: the missing credentials win.
        let request = test::TestRequest::put()
            .uri("/guilds/1/features")
            .set_json(serde_json::json!({"feature": "bogus", "enabled": true}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
