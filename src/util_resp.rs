use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::WithRejection;
use serde::Serialize;

pub type StandardResponse<T> = Result<Json<T>, FailureResponse>;

/// A JSON request body whose rejections (missing content type, malformed
/// or mistyped fields) are reported as [`FailureResponse::BadRequest`].
pub type JsonBody<T> = WithRejection<Json<T>, FailureResponse>;

pub fn success<T>(body: T) -> StandardResponse<T> {
    Ok(Json(body))
}

pub fn bad_request<T>(msg: impl Into<String>) -> StandardResponse<T> {
    Err(FailureResponse::BadRequest(msg.into()))
}

pub fn forbidden<T>(msg: impl Into<String>) -> StandardResponse<T> {
    Err(FailureResponse::Forbidden(msg.into()))
}

/// Every way a request can fail. Converted into a JSON body of the form
/// `{"error": <code>, "message": <text>}`.
///
/// `ServerError` carries the internal detail for the log only; clients see a
/// generic message.
#[derive(Debug)]
pub enum FailureResponse {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    PayloadTooLarge(String),
    ServerError(String),
}

impl FailureResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            FailureResponse::BadRequest(_) => StatusCode::BAD_REQUEST,
            FailureResponse::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            FailureResponse::Forbidden(_) => StatusCode::FORBIDDEN,
            FailureResponse::NotFound(_) => StatusCode::NOT_FOUND,
            FailureResponse::PayloadTooLarge(_) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            FailureResponse::ServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            FailureResponse::BadRequest(_) => "bad_request",
            FailureResponse::Unauthorized(_) => "unauthorized",
            FailureResponse::Forbidden(_) => "forbidden",
            FailureResponse::NotFound(_) => "not_found",
            FailureResponse::PayloadTooLarge(_) => "payload_too_large",
            FailureResponse::ServerError(_) => "server_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: &'a str,
}

impl IntoResponse for FailureResponse {
    fn into_response(self) -> Response {
        let message = match &self {
            FailureResponse::ServerError(detail) => {
                tracing::error!("Request failed: {detail}");
                "Internal server error"
            }
            FailureResponse::BadRequest(msg)
            | FailureResponse::Unauthorized(msg)
            | FailureResponse::Forbidden(msg)
            | FailureResponse::NotFound(msg)
            | FailureResponse::PayloadTooLarge(msg) => {
                tracing::debug!("Rejected request ({}): {msg}", self.code());
                msg.as_str()
            }
        };

        let body = Json(ErrorBody {
            error: self.code(),
            message,
        });

        (self.status(), body).into_response()
    }
}

impl From<diesel::result::Error> for FailureResponse {
    fn from(err: diesel::result::Error) -> Self {
        FailureResponse::ServerError(format!("database error: {err}"))
    }
}

impl From<diesel::r2d2::PoolError> for FailureResponse {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        FailureResponse::ServerError(format!("connection pool error: {err}"))
    }
}

impl From<std::io::Error> for FailureResponse {
    fn from(err: std::io::Error) -> Self {
        FailureResponse::ServerError(format!("storage error: {err}"))
    }
}

impl From<argon2::password_hash::Error> for FailureResponse {
    fn from(err: argon2::password_hash::Error) -> Self {
        FailureResponse::ServerError(format!("password hashing error: {err}"))
    }
}

impl From<JsonRejection> for FailureResponse {
    fn from(rejection: JsonRejection) -> Self {
        FailureResponse::BadRequest(rejection.body_text())
    }
}

impl From<csv::Error> for FailureResponse {
    fn from(err: csv::Error) -> Self {
        FailureResponse::ServerError(format!("csv export error: {err}"))
    }
}
