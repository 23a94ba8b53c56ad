//! Error taxonomy for backend requests.
//!
//! `ApiError` is what the query cache stores on an errored entry and what a
//! mutation hands back to its caller. It is `Clone` so that one failure can be
//! shared by every deduplicated waiter and every subscriber of a key.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Error returned by a backend request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
  /// The request could not complete (connection refused, timeout, DNS...)
  #[error("network error: {message}")]
  Network { message: String },

  /// 401/403, or a gated request issued without a credential
  #[error("not authorized ({status})")]
  Auth { status: u16 },

  /// 4xx carrying a field-level detail message
  #[error("{detail}")]
  Validation { status: u16, detail: String },

  /// 404 for a detail lookup
  #[error("not found: {detail}")]
  NotFound { detail: String },

  /// 5xx
  #[error("server error ({status}): {detail}")]
  Server { status: u16, detail: String },

  /// The response body could not be decoded into the expected shape
  #[error("failed to decode response: {message}")]
  Decode { message: String },

  /// Any other non-success status
  #[error("unexpected response status {status}")]
  Unexpected { status: u16 },
}

impl ApiError {
  /// Error for a request that needs a credential when none is held.
  pub fn missing_credential() -> Self {
    ApiError::Auth { status: 401 }
  }

  /// Whether this error is the authoritative "unauthenticated" signal.
  pub fn is_auth(&self) -> bool {
    matches!(self, ApiError::Auth { .. })
  }

  /// Map a non-success status and its body to an error kind.
  pub fn from_status(status: StatusCode, body: &str) -> Self {
    let code = status.as_u16();
    match code {
      401 | 403 => ApiError::Auth { status: code },
      404 => ApiError::NotFound {
        detail: parse_detail(body).unwrap_or_else(|| "resource not found".to_string()),
      },
      400..=499 => ApiError::Validation {
        status: code,
        detail: parse_detail(body).unwrap_or_else(|| format!("request rejected ({})", code)),
      },
      500..=599 => ApiError::Server {
        status: code,
        detail: parse_detail(body).unwrap_or_default(),
      },
      _ => ApiError::Unexpected { status: code },
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      ApiError::Decode {
        message: err.to_string(),
      }
    } else {
      ApiError::Network {
        message: err.to_string(),
      }
    }
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(err: serde_json::Error) -> Self {
    ApiError::Decode {
      message: err.to_string(),
    }
  }
}

/// FastAPI error body: `detail` is either a message or a list of field errors.
#[derive(Debug, Deserialize)]
struct ErrorBody {
  detail: ErrorDetail,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorDetail {
  Message(String),
  Fields(Vec<FieldError>),
}

#[derive(Debug, Deserialize)]
struct FieldError {
  msg: String,
}

fn parse_detail(body: &str) -> Option<String> {
  let parsed: ErrorBody = serde_json::from_str(body).ok()?;
  match parsed.detail {
    ErrorDetail::Message(m) => Some(m),
    ErrorDetail::Fields(fields) => fields.into_iter().next().map(|f| f.msg),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_auth_statuses() {
    assert!(ApiError::from_status(StatusCode::UNAUTHORIZED, "").is_auth());
    assert!(ApiError::from_status(StatusCode::FORBIDDEN, "").is_auth());
    assert!(!ApiError::from_status(StatusCode::NOT_FOUND, "").is_auth());
  }

  #[test]
  fn test_validation_detail_string() {
    let err = ApiError::from_status(
      StatusCode::BAD_REQUEST,
      r#"{"detail": "Manga already in collection"}"#,
    );
    assert_eq!(
      err,
      ApiError::Validation {
        status: 400,
        detail: "Manga already in collection".to_string()
      }
    );
    assert_eq!(err.to_string(), "Manga already in collection");
  }

  #[test]
  fn test_validation_detail_field_list() {
    let body = r#"{"detail": [{
      "loc": ["body", "email"],
      "msg": "value is not a valid email address",
      "type": "value_error"
    }]}"#;
    let err = ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, body);
    assert_eq!(
      err,
      ApiError::Validation {
        status: 422,
        detail: "value is not a valid email address".to_string()
      }
    );
  }

  #[test]
  fn test_not_found_and_server() {
    let err = ApiError::from_status(StatusCode::NOT_FOUND, r#"{"detail": "Manga not found"}"#);
    assert_eq!(
      err,
      ApiError::NotFound {
        detail: "Manga not found".to_string()
      }
    );

    let err = ApiError::from_status(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
    assert_eq!(
      err,
      ApiError::Server {
        status: 502,
        detail: String::new()
      }
    );
  }
}
