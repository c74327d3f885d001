use crate::{prelude::*, AppState};
use actix_web::{
    cookie::{time::Duration, Cookie, SameSite},
    get, post, web, HttpRequest, HttpResponse,
};
use serde::{Deserialize, Serialize};

const TOKEN_URL: &str = "https://discord.com/api/oauth2/token";
const COOKIE_KEY: &str = "servermate_refresh_token";
const REFRESH_PATH: &str = "/api/oauth/refresh";
const SCOPES: &str = "identify guilds";

#[derive(Deserialize)]
struct TokenRequest {
    code: String,
}

#[derive(Serialize)]
struct GrantRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    redirect_uri: &'a str,
    grant_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'a str>,
}

impl<'a> GrantRequest<'a> {
    fn authorization_code(state: &'a AppState, code: &'a str) -> Self {
        Self {
            client_id: &state.config.discord.client_id,
            client_secret: &state.config.discord.client_secret,
            redirect_uri: &state.config.discord.redirect_uri,
            grant_type: "authorization_code",
            code: Some(code),
            refresh_token: None,
            scope: None,
        }
    }

    fn refresh(state: &'a AppState, refresh_token: &'a str) -> Self {
        Self {
            client_id: &state.config.discord.client_id,
            client_secret: &state.config.discord.client_secret,
            redirect_uri: &state.config.discord.redirect_uri,
            grant_type: "refresh_token",
            code: None,
            refresh_token: Some(refresh_token),
            scope: Some(SCOPES),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TokenResponse {
    access_token: String,
    // The refresh token travels only in the HttpOnly cookie, never in JSON.
    #[serde(skip_serializing)]
    refresh_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_in: Option<u64>,
}

async fn exchange(state: &AppState, grant: GrantRequest<'_>) -> ApiResult<TokenResponse> {
    let body =
        serde_urlencoded::to_string(&grant).internal_error("failed to encode token request")?;

    let mut response = state
        .http
        .post(TOKEN_URL)
        .insert_header(("Accept", "application/json"))
        .insert_header(("Content-Type", "application/x-www-form-urlencoded"))
        .send_body(body)
        .await
        .internal_error("failed to reach Discord's token endpoint")?;

    let status = response.status();
    if status.is_success() {
        response
            .json()
            .await
            .internal_error("failed to decode token response")
    } else if status.is_client_error() {
        // Bad or revoked code/refresh token.
        Err(ApiError::Unauthorized)
    } else {
        Err(format!("Discord token endpoint returned {}", status))
            .internal_error("token exchange failed")
    }
}

fn refresh_cookie<'a>(state: &AppState, refresh_token: &'a str) -> Cookie<'a> {
    Cookie::build(COOKIE_KEY, refresh_token)
        .domain(state.config.web.cookie_domain.clone())
        .path(REFRESH_PATH)
        .max_age(Duration::days(30))
        .same_site(SameSite::Strict)
        .http_only(true)
        .secure(true)
        .finish()
}

#[post("/token")]
async fn token(
    state: web::Data<AppState>,
    request: web::Json<TokenRequest>,
) -> ApiResult<HttpResponse> {
    let data = exchange(&state, GrantRequest::authorization_code(&state, &request.code)).await?;
    let cookie = refresh_cookie(&state, data.refresh_token.as_str());
    Ok(HttpResponse::Ok().cookie(cookie).json(data))
}

#[get("/refresh")]
async fn refresh(state: web::Data<AppState>, request: HttpRequest) -> ApiResult<HttpResponse> {
    let refresh_token = match request.cookie(COOKIE_KEY) {
        Some(ref cookie) => cookie.value().to_owned(),
        None => return Err(ApiError::Unauthorized),
    };

    let data = exchange(&state, GrantRequest::refresh(&state, &refresh_token)).await?;

    // Discord rotates refresh tokens on use; store the new one.
    let cookie = refresh_cookie(&state, data.refresh_token.as_str());
    Ok(HttpResponse::Ok().cookie(cookie).json(data))
}

#[post("/logout")]
async fn logout(request: HttpRequest) -> ApiResult<HttpResponse> {
    if request.cookie(COOKIE_KEY).is_none() {
        return Err(ApiError::Unauthorized);
    }
    let mut removal = Cookie::new(COOKIE_KEY, "");
    removal.set_path(REFRESH_PATH);
    removal.make_removal();
    Ok(HttpResponse::NoContent().cookie(removal).finish())
}

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(token);
    cfg.service(refresh);
    cfg.service(logout);
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};

    #[actix_web::test]
    async fn test_logout_without_cookie_is_unauthorized() {
        let app = test::init_service(App::new().service(logout)).await;
        let request = test::TestRequest::post().uri("/logout").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_logout_expires_the_refresh_cookie() {
        let app = test::init_service(App::new().service(logout)).await;
        let request = test::TestRequest::post()
            .uri("/logout")
            .cookie(Cookie::new(COOKIE_KEY, "stored-token"))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let removal = response
            .response()
            .cookies()
            .find(|cookie| cookie.name() == COOKIE_KEY)
            .expect("logout must send a removal cookie");
        assert_eq!(removal.value(), "");
        assert_eq!(removal.max_age(), Some(Duration::ZERO));
    }

    #[actix_web::test]
    async fn test_refresh_without_cookie_is_unauthorized() {
        let app = test::init_service(
            App::new()
                .app_data(crate::test_util::state())
                .service(refresh),
        )
        .await;
        let request = test::TestRequest::get().uri("/refresh").to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
