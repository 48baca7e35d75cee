//! Error types for the HTTP surfaces.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use nb_gateway_common::{oai, ErrorEnvelope};

use crate::engine::EngineError;

/// Errors returned by request handlers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message}")]
    InvalidRequest {
        message: String,
        param: Option<&'static str>,
    },

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("model \"{0}\" not found")]
    ModelNotFound(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("{0} is not implemented")]
    NotImplemented(String),

    #[error("no route for {0}")]
    RouteNotFound(String),

    #[error("method {method} is not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: message.into(),
            param: None,
        }
    }

    pub fn invalid_param(param: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: message.into(),
            param: Some(param),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Error::ModelNotFound(_) | Error::RouteNotFound(_) => StatusCode::NOT_FOUND,
            Error::Engine(_) => StatusCode::BAD_GATEWAY,
            Error::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            Error::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code used by both envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRequest { .. } | Error::PayloadTooLarge(_) => "invalid_request",
            Error::ModelNotFound(_) => "model_not_found",
            Error::Engine(e) => e.code(),
            Error::NotImplemented(_) => "not_implemented",
            Error::RouteNotFound(_) => "not_found",
            Error::MethodNotAllowed { .. } => "method_not_allowed",
            Error::Internal(_) => "server_error",
        }
    }

    pub fn param(&self) -> Option<&'static str> {
        match self {
            Error::InvalidRequest { param, .. } => *param,
            Error::ModelNotFound(_) => Some("model"),
            _ => None,
        }
    }

    /// The `type` field of the compatibility envelope.
    pub fn compat_type(&self) -> &'static str {
        match self {
            Error::InvalidRequest { .. }
            | Error::PayloadTooLarge(_)
            | Error::ModelNotFound(_)
            | Error::RouteNotFound(_)
            | Error::MethodNotAllowed { .. } => "invalid_request_error",
            Error::Engine(_) => "api_error",
            Error::NotImplemented(_) => "not_implemented_error",
            Error::Internal(_) => "server_error",
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::new(self.to_string(), self.code(), self.param().map(str::to_string))
    }

    pub fn to_compat_body(&self) -> oai::ErrorBody {
        oai::ErrorBody::new(
            self.to_string(),
            self.compat_type(),
            self.param().map(str::to_string),
            Some(self.code().to_string()),
        )
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge(rejection.body_text())
        } else {
            Error::invalid(rejection.body_text())
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if self.status().is_server_error() {
            tracing::warn!(code = self.code(), error = %self, "request failed");
        }
        (self.status(), Json(self.to_envelope())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// [`Error`] rendered with the compatibility envelope.
#[derive(Debug)]
pub struct CompatError(pub Error);

impl From<Error> for CompatError {
    fn from(err: Error) -> Self {
        CompatError(err)
    }
}

impl From<EngineError> for CompatError {
    fn from(err: EngineError) -> Self {
        CompatError(Error::Engine(err))
    }
}

impl From<JsonRejection> for CompatError {
    fn from(rejection: JsonRejection) -> Self {
        CompatError(Error::from(rejection))
    }
}

impl IntoResponse for CompatError {
    fn into_response(self) -> Response {
        let err = self.0;
        if err.status().is_server_error() {
            tracing::warn!(code = err.code(), error = %err, "compat request failed");
        }
        let envelope = oai::ErrorEnvelope {
            error: err.to_compat_body(),
        };
        (err.status(), Json(envelope)).into_response()
    }
}

pub type CompatResult<T> = std::result::Result<T, CompatError>;
