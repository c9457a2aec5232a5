use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use greeter_core::{ClassifiedError, ErrorCategory, INTERNAL_MESSAGE};
use serde::Serialize;
use tonic::{Code, Status};

/// HTTP status for each category.
pub const fn http_status(category: ErrorCategory) -> StatusCode {
    match category {
        ErrorCategory::Success => StatusCode::OK,
        ErrorCategory::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCategory::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A failed gateway call, rendered as a grpc-gateway style JSON body:
///
/// ```json
/// {"code": 5, "message": "user 42 not found", "details": []}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    category: ErrorCategory,
    message: String,
}

impl GatewayError {
    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ClassifiedError> for GatewayError {
    fn from(err: ClassifiedError) -> Self {
        Self {
            category: err.category(),
            message: err.message().to_owned(),
        }
    }
}

impl From<Status> for GatewayError {
    fn from(status: Status) -> Self {
        let category = ErrorCategory::from_code(status.code());
        // Codes outside the taxonomy come from the channel, not the handler,
        // and their messages carry transport detail.
        let message = if category == ErrorCategory::Internal && status.code() != Code::Internal {
            tracing::warn!(code = ?status.code(), detail = status.message(), "upstream call failed outside the error taxonomy");
            INTERNAL_MESSAGE.to_owned()
        } else {
            status.message().to_owned()
        };
        Self { category, message }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: i32,
    message: &'a str,
    details: &'a [serde_json::Value],
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.category.code() as i32,
            message: &self.message,
            details: &[],
        };
        (http_status(self.category), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use greeter_core::{Condition, classify};

    #[test]
    fn every_category_has_its_own_status() {
        let statuses: Vec<u16> = ErrorCategory::ALL
            .iter()
            .map(|category| http_status(*category).as_u16())
            .collect();
        assert_eq!(statuses, [200, 404, 400, 403, 429, 500]);
    }

    #[test]
    fn status_keeps_category_and_message() {
        let err = GatewayError::from(Status::not_found("user 42 not found"));
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(err.message(), "user 42 not found");
    }

    #[test]
    fn foreign_codes_collapse_to_opaque_internal() {
        for status in [
            Status::unavailable("tcp connect error: connection refused"),
            Status::deadline_exceeded("timeout expired"),
            Status::cancelled("operation was canceled"),
        ] {
            let err = GatewayError::from(status);
            assert_eq!(err.category(), ErrorCategory::Internal);
            assert_eq!(err.message(), INTERNAL_MESSAGE);
        }
    }

    #[tokio::test]
    async fn renders_gateway_body() {
        let err = GatewayError::from(classify(Condition::QuotaExceeded));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "code": 8,
                "message": "rate limit exceeded, retry later",
                "details": [],
            })
        );
    }
}
