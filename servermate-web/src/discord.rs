use actix_http::{encoding::Decoder, Payload};
use actix_web::http::{header::HeaderMap, StatusCode};
use awc::ClientResponse;
use serde::Deserialize;
use servermate::models::{parse_permissions, GuildId, Permissions, RoleId, UserId};
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://discord.com/api/v10";

/// Fallback delay when a 429 comes without a usable Retry-After header.
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(2);
const MAX_RETRY_WAIT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum DiscordError {
    #[error("failed to send request to Discord: {0}")]
    Send(String),
    #[error("failed to read Discord response: {0}")]
    Payload(String),
    #[error("Discord returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode Discord response: {0}")]
    Decode(String),
}

impl DiscordError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

enum Token<'a> {
    Bot,
    Bearer(&'a str),
}

/// The user authenticated by a Discord bearer token, from `/users/@me`.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub username: String,
}

/// An entry of the user's own guild list (`/users/@me/guilds`).
#[derive(Debug, Clone, Deserialize)]
pub struct UserGuild {
    pub id: GuildId,
    pub name: String,
    pub icon: Option<String>,
    #[serde(default)]
    pub owner: bool,
    #[serde(default)]
    pub permissions: Option<String>,
}

impl UserGuild {
    pub fn permissions(&self) -> Permissions {
        self.permissions
            .as_deref()
            .map(parse_permissions)
            .unwrap_or_else(Permissions::empty)
    }

    pub fn can_manage(&self) -> bool {
        self.owner
            || self
                .permissions()
                .intersects(Permissions::MANAGE_GUILD | Permissions::ADMINISTRATOR)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestGuild {
    pub name: String,
    pub icon: Option<String>,
    pub owner_id: UserId,
    #[serde(default)]
    pub approximate_member_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestRole {
    pub id: RoleId,
    pub name: String,
    pub position: i64,
    pub permissions: String,
    #[serde(default)]
    pub managed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestMember {
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

/// Thin client for Discord's v10 REST API. Calls authenticate with either the
/// configured bot token or a caller-supplied OAuth bearer token.
pub struct DiscordClient {
    http: awc::Client,
    bot_token: String,
}

impl DiscordClient {
    pub fn new(bot_token: String) -> Self {
        Self {
            http: awc::Client::new(),
            bot_token,
        }
    }

    pub async fn current_user(&self, access_token: &str) -> Result<CurrentUser, DiscordError> {
        self.get("/users/@me", Token::Bearer(access_token)).await
    }

    pub async fn current_user_guilds(
        &self,
        access_token: &str,
    ) -> Result<Vec<UserGuild>, DiscordError> {
        self.get("/users/@me/guilds", Token::Bearer(access_token))
            .await
    }

    /// Fetches a guild with the bot token. `None` if the bot is not in it.
    pub async fn guild(&self, guild_id: GuildId) -> Result<Option<RestGuild>, DiscordError> {
        optional(
            self.get(&format!("/guilds/{}?with_counts=true", guild_id), Token::Bot)
                .await,
        )
    }

    pub async fn guild_roles(&self, guild_id: GuildId) -> Result<Vec<RestRole>, DiscordError> {
        self.get(&format!("/guilds/{}/roles", guild_id), Token::Bot)
            .await
    }

    /// Fetches a guild member with the bot token. `None` if the user is not a
    /// member.
    pub async fn guild_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<RestMember>, DiscordError> {
        optional(
            self.get(
                &format!("/guilds/{}/members/{}", guild_id, user_id),
                Token::Bot,
            )
            .await,
        )
    }

    /// Issues a GET, retrying exactly once if Discord rate limits it.
    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        token: Token<'_>,
    ) -> Result<T, DiscordError> {
        let mut response = self.send(path, &token).await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let wait = retry_after(response.headers());
            tracing::warn!("rate limited on GET {}, retrying once in {:?}", path, wait);
            actix_web::rt::time::sleep(wait).await;
            response = self.send(path, &token).await?;
        }

        let status = response.status();
        let body = response
            .body()
            .await
            .map_err(|err| DiscordError::Payload(err.to_string()))?;
        if !status.is_success() {
            return Err(DiscordError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        serde_json::from_slice(&body).map_err(|err| DiscordError::Decode(err.to_string()))
    }

    async fn send(
        &self,
        path: &str,
        token: &Token<'_>,
    ) -> Result<ClientResponse<Decoder<Payload>>, DiscordError> {
        let authorization = match token {
            Token::Bot => format!("Bot {}", self.bot_token),
            Token::Bearer(bearer) => format!("Bearer {}", bearer),
        };
        self.http
            .get(format!("{}{}", API_BASE, path))
            .insert_header(("Authorization", authorization))
            .insert_header(("Accept", "application/json"))
            .send()
            .await
            .map_err(|err| DiscordError::Send(err.to_string()))
    }
}

fn optional<T>(result: Result<T, DiscordError>) -> Result<Option<T>, DiscordError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(DiscordError::Status { status, .. }) if status == StatusCode::NOT_FOUND => Ok(None),
        Err(err) => Err(err),
    }
}

fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get("Retry-After")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<f64>().ok())
        .map(Duration::from_secs_f64)
        .map(|wait| wait.min(MAX_RETRY_WAIT))
        .unwrap_or(DEFAULT_RETRY_WAIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    fn guild(owner: bool, permissions: Option<&str>) -> UserGuild {
        UserGuild {
            id: GuildId::new(1),
            name: "guild".to_owned(),
            icon: None,
            owner,
            permissions: permissions.map(str::to_owned),
        }
    }

    #[test]
    fn test_user_guild_can_manage() {
        assert!(guild(true, None).can_manage());
        // MANAGE_GUILD is 0x20, ADMINISTRATOR is 0x8.
        assert!(guild(false, Some("32")).can_manage());
        assert!(guild(false, Some("8")).can_manage());
        assert!(!guild(false, Some("0")).can_manage());
        assert!(!guild(false, None).can_manage());
    }

    #[test]
    fn test_user_guild_parses_discord_payload() {
        let raw = r#"{
            "id": "197038439483310086",
            "name": "Test Server",
            "icon": null,
            "owner": false,
            "permissions": "2147483647"
        }"#;
        let parsed: UserGuild = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.id, GuildId::new(197038439483310086));
        assert!(!parsed.owner);
        assert!(parsed.can_manage());
    }

    #[test]
    fn test_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), DEFAULT_RETRY_WAIT);

        headers.insert(
            HeaderName::from_static("retry-after"),
            HeaderValue::from_static("1.5"),
        );
        assert_eq!(retry_after(&headers), Duration::from_secs_f64(1.5));

        headers.insert(
            HeaderName::from_static("retry-after"),
            HeaderValue::from_static("3600"),
        );
        assert_eq!(retry_after(&headers), MAX_RETRY_WAIT);
    }

    #[test]
    fn test_optional_translates_404() {
        let missing: Result<(), _> = Err(DiscordError::Status {
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        });
        assert!(matches!(optional(missing), Ok(None)));

        let denied: Result<(), _> = Err(DiscordError::Status {
            status: StatusCode::FORBIDDEN,
            body: String::new(),
        });
        assert!(optional(denied).is_err());
    }
}
