use actix_web::{body::BoxBody, http::StatusCode, HttpResponse, ResponseError};
use servermate::models::Id;
use std::fmt::Display;
use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;
pub type JsonResult<T> = ApiResult<actix_web::web::Json<T>>;

/// The error surface of every route handler. Serialized as
/// `{"status": ..., "message": ...}`; internal errors never leak their
/// message to the client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing or invalid credentials")]
    Unauthorized,
    #[error("you do not have access to this server")]
    Forbidden,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    fn public_message(&self) -> String {
        if self.status_code().is_server_error() {
            self.status_code()
                .canonical_reason()
                .map(|reason| reason.to_owned())
                .unwrap_or_default()
        } else {
            self.to_string()
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse<BoxBody> {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "status": self.status_code().as_u16(),
            "message": self.public_message()
        }))
    }
}

pub trait IntoApiError<T> {
    fn api_error(self, error: ApiError) -> ApiResult<T>;

    fn internal_error(self, message: impl Display) -> ApiResult<T>
    where
        Self: std::marker::Sized,
    {
        let message = message.to_string();
        self.api_error(ApiError::Internal(message))
    }
}

impl<T, E: std::fmt::Debug> IntoApiError<T> for std::result::Result<T, E> {
    fn api_error(self, error: ApiError) -> ApiResult<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::error!("api_error: {:?}", err);
                Err(error)
            }
        }
    }
}

impl<T> IntoApiError<T> for Option<T> {
    fn api_error(self, error: ApiError) -> ApiResult<T> {
        self.ok_or(error)
    }
}

/// Converts a path-extracted integer into a typed snowflake, rejecting zero.
pub fn path_id<M>(value: u64, what: &str) -> ApiResult<Id<M>> {
    Id::new_checked(value).ok_or_else(|| ApiError::bad_request(format!("invalid {} id", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use servermate::models::GuildId;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::not_found("x").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::conflict("x").status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_internal_errors_hide_their_message() {
        let error = ApiError::Internal("sql password leaked".into());
        assert_eq!(error.public_message(), "Internal Server Error");

        let error = ApiError::bad_request("days must be positive");
        assert_eq!(error.public_message(), "days must be positive");
    }

    #[test]
    fn test_path_id() {
        let id: GuildId = path_id(42, "guild").unwrap();
        assert_eq!(id, GuildId::new(42));
        assert!(path_id::<servermate::models::marker::GuildMarker>(0, "guild").is_err());
    }
}
