use application::{ApplicationError, ADMIN_ONLY};
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, IdentityError, RepositoryError};
use serde::Serialize;
use validator::ValidationErrors;

/// 统一响应信封 `{ ok, data? | message? }`
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        ok: true,
        data: Some(data),
    })
}

pub fn ok_empty() -> Json<Envelope<()>> {
    Json(Envelope {
        ok: true,
        data: None,
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub ok: bool,
    /// 粗粒度原因码
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str) -> Self {
        Self {
            status,
            body: ErrorBody {
                ok: false,
                message: code,
                detail: None,
            },
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.body.detail = Some(detail.into());
        self
    }

    pub fn bad_request(code: &'static str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code)
    }

    pub fn forbidden(code: &'static str) -> Self {
        Self::new(StatusCode::FORBIDDEN, code)
    }

    pub fn unauthorized(code: &'static str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code)
    }

    pub fn admin_only() -> Self {
        Self::forbidden(ADMIN_ONLY)
    }

    /// 上游故障：细节只写日志，客户端拿到通用提示
    pub fn upstream() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "UPSTREAM_FAILURE")
            .with_detail("temporary failure, please try again")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.message
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use ApplicationError as AppErr;

        match error {
            AppErr::Domain(DomainError::InvalidArgument { field, reason }) => {
                ApiError::bad_request("INVALID_ARGUMENT").with_detail(format!("{field}: {reason}"))
            }
            AppErr::Validation(message) => ApiError::bad_request("INVALID_ARGUMENT").with_detail(message),
            AppErr::Forbidden(code) => ApiError::forbidden(code),
            AppErr::Registration(reason) => ApiError::forbidden(reason.code()),
            AppErr::NotFound(what) => ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND").with_detail(what),
            AppErr::Repository(RepositoryError::NotFound) => {
                ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            AppErr::Repository(RepositoryError::Conflict) => {
                ApiError::new(StatusCode::CONFLICT, "CONFLICT")
            }
            AppErr::Identity(IdentityError::InvalidCredentials) => {
                ApiError::unauthorized("INVALID_CREDENTIALS")
            }
            AppErr::Identity(IdentityError::AccountExists) => {
                ApiError::new(StatusCode::CONFLICT, "ALREADY_REGISTERED")
            }
            AppErr::PartialLinkFailure {
                principal_id,
                message,
            } => {
                tracing::error!(
                    principal_id = %principal_id,
                    error = %message,
                    "account created but employee link failed, manual reconciliation required"
                );
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "LINK_FAILED")
            }
            err @ (AppErr::Repository(RepositoryError::Storage { .. })
            | AppErr::Identity(IdentityError::Upstream(_))) => {
                tracing::error!(error = %err, "upstream failure");
                ApiError::upstream()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request("INVALID_BODY").with_detail(rejection.body_text())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .into_keys()
            .map(|field| field.to_string())
            .collect();
        fields.sort_unstable();
        ApiError::bad_request("MISSING_FIELDS").with_detail(fields.join(","))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
