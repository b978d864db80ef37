use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use dto::{PolicyDeniedResponse, UpgradeOption};
use models::DenyReason;
use serde_json::json;

/// HTTP-facing error taxonomy (spec §7): validation/authz surface as 4xx,
/// policy denials as 402 with the upgrade-options envelope, external/
/// internal failures as 5xx.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("policy denied")]
    PolicyDenied(DenyReason),
    #[error("conflict")]
    Conflict,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<scenario::ScenarioError> for ApiError {
    fn from(err: scenario::ScenarioError) -> Self {
        match err {
            scenario::ScenarioError::NotFound => ApiError::NotFound,
            scenario::ScenarioError::Forbidden => ApiError::Forbidden,
            scenario::ScenarioError::Validation(msg) => ApiError::BadRequest(msg),
            scenario::ScenarioError::Conflict => ApiError::Conflict,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        // A same-second custom-scenario id collision (spec §4.1) surfaces as
        // a unique-violation from the database; every other database error
        // is unexpected.
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return ApiError::Conflict;
            }
        }
        ApiError::Unexpected(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found").into_response(),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden").into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Conflict => (StatusCode::CONFLICT, "conflict").into_response(),
            ApiError::PolicyDenied(reason) => {
                let upgrade_options = usage::upgrade_options()
                    .iter()
                    .map(|o| UpgradeOption {
                        plan: o.plan.to_string(),
                        price: o.price.to_string(),
                        calls: o.calls.to_string(),
                        product_id: o.product_id.to_string(),
                    })
                    .collect();
                let body = PolicyDeniedResponse {
                    error: reason.code().to_string(),
                    message: deny_message(reason),
                    upgrade_options,
                };
                (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
            }
            ApiError::Unexpected(error) => {
                tracing::error!(?error, "unexpected api error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "internal_error"})),
                )
                    .into_response()
            }
        }
    }
}

fn deny_message(reason: DenyReason) -> String {
    match reason {
        DenyReason::TrialExhausted => "You've used all your trial calls.".to_string(),
        DenyReason::WeeklyLimit => "You've reached your weekly call limit.".to_string(),
        DenyReason::MonthlyLimit => "You've reached your monthly call limit.".to_string(),
        DenyReason::SubscriptionRequired => "An active subscription is required.".to_string(),
    }
}
