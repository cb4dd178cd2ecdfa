use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use switchboard::errors::GatewayError;
use thiserror::Error;

pub const ENV_PREFIX: &str = "SWITCHBOARD";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Map a dotted settings key to the environment variable that sets it
pub fn to_env_var(field_path: &str) -> String {
    format!(
        "{}_{}",
        ENV_PREFIX,
        field_path.replace('.', "__").to_uppercase()
    )
}

/// Error body returned by every JSON route
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    upstream: Option<(u16, String)>,
}

impl ApiError {
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message: message.into(),
            upstream: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = match &err {
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::NoProvider => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream { .. }
            | GatewayError::Protocol(_)
            | GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
            GatewayError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let upstream = match &err {
            GatewayError::Upstream { status, body } => Some((*status, body.clone())),
            _ => None,
        };
        Self {
            status,
            kind: err.kind(),
            message: err.to_string(),
            upstream,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": true,
            "kind": self.kind,
            "message": self.message,
        });
        if let Some((status, upstream_body)) = self.upstream {
            body["status"] = json!(status);
            body["body"] = json!(upstream_body);
        }
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("server.port"), "SWITCHBOARD_SERVER__PORT");
        assert_eq!(
            to_env_var("providers.openai.api_key"),
            "SWITCHBOARD_PROVIDERS__OPENAI__API_KEY"
        );
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (GatewayError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (GatewayError::NoProvider, StatusCode::SERVICE_UNAVAILABLE),
            (
                GatewayError::Upstream {
                    status: 500,
                    body: "boom".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (GatewayError::Protocol("bad".into()), StatusCode::BAD_GATEWAY),
            (
                GatewayError::UpstreamTimeout("slow".into()),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                GatewayError::ToolLoopExceeded { limit: 8 },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
