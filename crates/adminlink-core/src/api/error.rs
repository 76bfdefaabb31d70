use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use super::request::ResponseBody;

/// Message used when an error response carries no `message` field.
pub const GENERIC_FAILURE_MESSAGE: &str = "Request failed";

/// Maximum length for error response bodies in log lines
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// A non-2xx response from the backend.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    pub status: StatusCode,
    /// Parsed error payload, for callers that need field-level detail
    pub body: Option<Value>,
}

impl ApiError {
    pub fn from_response(status: StatusCode, body: ResponseBody) -> Self {
        let body = match body {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Text(text) if !text.is_empty() => Some(Value::String(text)),
            _ => None,
        };
        let message = body
            .as_ref()
            .and_then(|b| b.get("message"))
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(GENERIC_FAILURE_MESSAGE)
            .to_string();

        Self {
            message,
            status,
            body,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    pub fn is_forbidden(&self) -> bool {
        self.status == StatusCode::FORBIDDEN
    }

    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS
    }

    /// 422: the payload carries field-level validation errors.
    pub fn is_validation(&self) -> bool {
        self.status == StatusCode::UNPROCESSABLE_ENTITY
    }

    pub fn is_server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Field errors from `body.errors`, flattened to `(field, message)`.
    /// Accepts both `{"field": "msg"}` and `{"field": ["msg", ...]}` shapes.
    pub fn field_errors(&self) -> Vec<(String, String)> {
        let Some(errors) = self
            .body
            .as_ref()
            .and_then(|b| b.get("errors"))
            .and_then(Value::as_object)
        else {
            return Vec::new();
        };

        let mut fields = Vec::new();
        for (field, messages) in errors {
            match messages {
                Value::String(message) => fields.push((field.clone(), message.clone())),
                Value::Array(items) => fields.extend(
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|message| (field.clone(), message.to_string())),
                ),
                _ => {}
            }
        }
        fields
    }

    /// Body rendered for log lines, truncated to avoid logging excessive data
    pub fn body_preview(&self) -> String {
        match self.body {
            Some(ref body) => truncate_body(&body.to_string()),
            None => String::new(),
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request cancelled")]
    Cancelled,

    /// Raised by domain wrappers before a request is issued.
    #[error("{0}")]
    Validation(String),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        ClientError::Validation(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Api(_) => "ApiError",
            ClientError::Network(_) => "NetworkError",
            ClientError::InvalidUrl(_) => "InvalidUrl",
            ClientError::Serialization(_) => "SerializationError",
            ClientError::Cancelled => "Cancelled",
            ClientError::Validation(_) => "ValidationError",
        }
    }

    pub fn as_api(&self) -> Option<&ApiError> {
        match self {
            ClientError::Api(e) => Some(e),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.as_api().map(|e| e.status)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_from_body() {
        let err = ApiError::from_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            ResponseBody::Json(json!({"message": "Failure"})),
        );
        assert_eq!(err.message, "Failure");
        assert_eq!(err.to_string(), "Failure");
        assert_eq!(err.status.as_u16(), 422);
        assert_eq!(err.body, Some(json!({"message": "Failure"})));
        assert!(err.is_validation());
    }

    #[test]
    fn test_generic_message_fallback() {
        let no_body =
            ApiError::from_response(StatusCode::INTERNAL_SERVER_ERROR, ResponseBody::Empty);
        assert_eq!(no_body.message, GENERIC_FAILURE_MESSAGE);
        assert_eq!(no_body.body, None);
        assert!(no_body.is_server_error());

        let blank = ApiError::from_response(
            StatusCode::BAD_REQUEST,
            ResponseBody::Json(json!({"message": "  ", "code": 7})),
        );
        assert_eq!(blank.message, GENERIC_FAILURE_MESSAGE);

        let text = ApiError::from_response(
            StatusCode::BAD_GATEWAY,
            ResponseBody::Text("upstream down".to_string()),
        );
        assert_eq!(text.message, GENERIC_FAILURE_MESSAGE);
        assert_eq!(text.body, Some(Value::String("upstream down".to_string())));
    }

    #[test]
    fn test_field_errors() {
        let err = ApiError::from_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            ResponseBody::Json(json!({
                "message": "Invalid",
                "errors": {"email": ["is taken", "is too long"], "name": "is required"}
            })),
        );
        let mut fields = err.field_errors();
        fields.sort();
        assert_eq!(
            fields,
            vec![
                ("email".to_string(), "is taken".to_string()),
                ("email".to_string(), "is too long".to_string()),
                ("name".to_string(), "is required".to_string()),
            ]
        );
    }

    #[test]
    fn test_truncate_body() {
        let short = "short body";
        assert_eq!(truncate_body(short), short);

        let long = "é".repeat(400);
        let truncated = truncate_body(&long);
        assert!(truncated.contains("truncated, 800 total bytes"));
    }

    #[test]
    fn test_client_error_kind() {
        let api: ClientError =
            ApiError::from_response(StatusCode::UNAUTHORIZED, ResponseBody::Empty).into();
        assert_eq!(api.kind(), "ApiError");
        assert_eq!(api.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(api.as_api().map(ApiError::is_unauthorized).unwrap_or(false));

        let validation = ClientError::validation("identifier is required");
        assert_eq!(validation.kind(), "ValidationError");
        assert_eq!(validation.to_string(), "identifier is required");
        assert_eq!(validation.status(), None);
    }
}
