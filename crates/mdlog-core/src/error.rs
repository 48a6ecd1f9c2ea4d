use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // auth layer
    InvalidKey,
    KeyExpired,
    KeyRevoked,
    PermissionDenied,
    Unauthorized,
    // operation layer
    AppendNotFound,
    AlreadyClaimed,
    InvalidRequest,
    AuthorMismatch,
    InvalidPath,
    WipLimitExceeded,
    // resource layer
    FileNotFound,
    #[serde(rename = "INTERNAL_ERROR")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidKey => "INVALID_KEY",
            ErrorCode::KeyExpired => "KEY_EXPIRED",
            ErrorCode::KeyRevoked => "KEY_REVOKED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::AppendNotFound => "APPEND_NOT_FOUND",
            ErrorCode::AlreadyClaimed => "ALREADY_CLAIMED",
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::AuthorMismatch => "AUTHOR_MISMATCH",
            ErrorCode::InvalidPath => "INVALID_PATH",
            ErrorCode::WipLimitExceeded => "WIP_LIMIT_EXCEEDED",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::Internal => "INTERNAL_ERROR",
        }
    }

    /// HTTP-equivalent status. Every key-layer failure maps to 404 so a caller
    /// cannot tell a revoked key from one that never existed.
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::InvalidKey | ErrorCode::KeyExpired | ErrorCode::KeyRevoked => 404,
            ErrorCode::PermissionDenied | ErrorCode::AuthorMismatch => 403,
            ErrorCode::Unauthorized => 401,
            ErrorCode::AppendNotFound | ErrorCode::FileNotFound => 404,
            ErrorCode::AlreadyClaimed | ErrorCode::WipLimitExceeded => 409,
            ErrorCode::InvalidRequest | ErrorCode::InvalidPath => 400,
            ErrorCode::Internal => 500,
        }
    }

    pub fn is_key_failure(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidKey | ErrorCode::KeyExpired | ErrorCode::KeyRevoked
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every orchestration operation.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("{code}: {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_key() -> Self {
        Self::new(ErrorCode::InvalidKey, "key not found")
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn append_not_found(append_id: i64) -> Self {
        Self::new(ErrorCode::AppendNotFound, format!("append {append_id} not found"))
    }

    pub fn file_not_found() -> Self {
        Self::new(ErrorCode::FileNotFound, "file not found")
    }

    /// Store failures are never described to the caller.
    pub fn internal<E: std::fmt::Display>(_err: E) -> Self {
        Self::new(ErrorCode::Internal, "internal server error")
    }

    pub fn status(&self) -> u16 {
        self.code.status()
    }

    /// Wire form: key-layer failures collapse into one indistinguishable answer.
    pub fn public(&self) -> Self {
        if self.code.is_key_failure() {
            return Self::invalid_key();
        }
        self.clone()
    }

    pub fn body(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorBody {
                code: self.code,
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// `{ok:false, error:{code, message, details?}}`
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_failures_share_one_public_answer() {
        for code in [ErrorCode::InvalidKey, ErrorCode::KeyExpired, ErrorCode::KeyRevoked] {
            let public = Error::new(code, "specific").public();
            assert_eq!(public.code, ErrorCode::InvalidKey);
            assert_eq!(public.message, "key not found");
            assert_eq!(public.status(), 404);
        }
    }

    #[test]
    fn operation_errors_pass_through_verbatim() {
        let err = Error::new(ErrorCode::AlreadyClaimed, "task 3 is claimed by bob");
        assert_eq!(err.public(), err);
        assert_eq!(err.status(), 409);
    }

    #[test]
    fn envelope_shape() {
        let err = Error::invalid_request("claim is completed").with_details(json!({"status": "completed"}));
        let body = serde_json::to_value(err.body()).unwrap();
        assert_eq!(
            body,
            json!({
                "ok": false,
                "error": {
                    "code": "INVALID_REQUEST",
                    "message": "claim is completed",
                    "details": {"status": "completed"}
                }
            })
        );
    }

    #[test]
    fn internal_hides_cause() {
        let err = Error::internal("disk I/O error at /var/db");
        assert_eq!(err.message, "internal server error");
        assert_eq!(serde_json::to_value(err.code).unwrap(), json!("INTERNAL_ERROR"));
    }
}
