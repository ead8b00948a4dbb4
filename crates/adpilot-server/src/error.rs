use adpilot_core::error::AdpilotError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Carries an explicit 409 through the `anyhow::Error` chain.
#[derive(Debug)]
struct ConflictError(String);

impl std::fmt::Display for ConflictError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ConflictError {}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(AdpilotError::InvalidInput(msg.into()).into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self(ConflictError(msg.into()).into())
    }
}

fn status_for(e: &AdpilotError) -> StatusCode {
    match e {
        AdpilotError::JobNotFound(_)
        | AdpilotError::ScheduleNotFound(_)
        | AdpilotError::InitializationNotFound(_)
        | AdpilotError::DetailNotFound(_)
        | AdpilotError::ApprovalNotFound(_) => StatusCode::NOT_FOUND,
        AdpilotError::InitializationExists(_)
        | AdpilotError::CycleInProgress(_)
        | AdpilotError::AutomationStopped { .. } => StatusCode::CONFLICT,
        AdpilotError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        AdpilotError::NotInitialized
        | AdpilotError::InvalidInput(_)
        | AdpilotError::UnknownTimezone(_) => StatusCode::BAD_REQUEST,
        AdpilotError::Backpressure { .. } => StatusCode::TOO_MANY_REQUESTS,
        AdpilotError::TransientApi(_) => StatusCode::SERVICE_UNAVAILABLE,
        AdpilotError::FatalApi(_) => StatusCode::BAD_GATEWAY,
        AdpilotError::Storage(_)
        | AdpilotError::Io(_)
        | AdpilotError::Yaml(_)
        | AdpilotError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.0.downcast_ref::<ConflictError>().is_some() {
            StatusCode::CONFLICT
        } else if let Some(e) = self.0.downcast_ref::<AdpilotError>() {
            status_for(e)
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            tracing::warn!(error = %self.0, "request failed");
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(e: AdpilotError) -> StatusCode {
        AppError(e.into()).into_response().status()
    }

    #[test]
    fn not_found_variants_map_to_404() {
        assert_eq!(status(AdpilotError::JobNotFound("j".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(AdpilotError::ScheduleNotFound("s".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(AdpilotError::ApprovalNotFound("a".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(AdpilotError::DetailNotFound("d".into())), StatusCode::NOT_FOUND);
    }

    #[test]
    fn stopped_automation_maps_to_409() {
        let e = AdpilotError::AutomationStopped {
            account_id: "a".into(),
            reason: "halt".into(),
        };
        assert_eq!(status(e), StatusCode::CONFLICT);
    }

    #[test]
    fn concurrent_cycle_maps_to_409() {
        assert_eq!(status(AdpilotError::CycleInProgress("a".into())), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_transition_maps_to_422() {
        let e = AdpilotError::InvalidTransition {
            from: "completed".into(),
            to: "cancelled".into(),
            reason: "job already finished".into(),
        };
        assert_eq!(status(e), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn backpressure_maps_to_429() {
        assert_eq!(status(AdpilotError::Backpressure { depth: 100 }), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn api_failures_map_to_gateway_statuses() {
        assert_eq!(status(AdpilotError::TransientApi("503".into())), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status(AdpilotError::FatalApi("401".into())), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn bad_request_constructor_maps_to_400() {
        assert_eq!(
            AppError::bad_request("nope").into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn conflict_constructor_maps_to_409() {
        assert_eq!(
            AppError::conflict("backfill already running").into_response().status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn other_errors_map_to_500() {
        let response = AppError(anyhow::anyhow!("something unexpected")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
