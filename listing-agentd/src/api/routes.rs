use std::sync::Arc;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use listing_client::{RegistrationController, RegistrationError};
use shared::protocol::API_PREFIX;
use shared::types::StatusReport;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<RegistrationController>,
}

/// Partial edit of the server status; absent fields are left alone
#[derive(Debug, Default, Deserialize)]
pub struct StatusPatch {
    pub name: Option<String>,
    pub player_count: Option<u32>,
    pub player_capacity: Option<u32>,
    pub extra: Option<String>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/status", get(get_status))
        .route("/server", patch(patch_server))
        .route("/register", post(register))
        .route("/update", post(update))
        .route("/deregister", post(deregister));

    Router::new().nest(API_PREFIX, v1).with_state(state)
}

async fn get_status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.controller.report())
}

async fn patch_server(
    State(state): State<AppState>,
    Json(edit): Json<StatusPatch>,
) -> Json<StatusReport> {
    let report = state.controller.edit_status(|status| {
        if let Some(name) = edit.name {
            status.name = name;
        }
        if let Some(player_count) = edit.player_count {
            status.player_count = player_count;
        }
        if let Some(player_capacity) = edit.player_capacity {
            status.player_capacity = player_capacity;
        }
        if let Some(extra) = edit.extra {
            status.extra = extra;
        }
    });
    Json(report)
}

async fn register(State(state): State<AppState>) -> Response {
    outcome(state.controller.register().await)
}

async fn update(State(state): State<AppState>) -> Response {
    outcome(state.controller.update().await)
}

async fn deregister(State(state): State<AppState>) -> Response {
    outcome(state.controller.deregister().await)
}

fn error_status(error: &RegistrationError) -> StatusCode {
    match error {
        RegistrationError::Busy => StatusCode::CONFLICT,
        RegistrationError::NotRegistered => StatusCode::PRECONDITION_FAILED,
        RegistrationError::Transport { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn outcome(result: Result<(), RegistrationError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (
            error_status(&e),
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;
    use uuid::Uuid;
    use listing_client::{
        DirectoryClient, Endpoint, ExchangeFailure, ExchangeResult, RegistrationSettings,
        TokioScheduler,
    };
    use shared::types::{Credentials, FormFields, RegistrationState, ServerRecord, ServerStatus};

    struct StaticClient {
        outcome: ExchangeResult,
        calls: Mutex<Vec<Endpoint>>,
    }

    #[async_trait]
    impl DirectoryClient for StaticClient {
        async fn send(&self, endpoint: Endpoint, _fields: FormFields) -> ExchangeResult {
            self.calls.lock().unwrap().push(endpoint);
            self.outcome.clone()
        }
    }

    fn test_app(outcome: ExchangeResult) -> (Router, Arc<StaticClient>) {
        let client = Arc::new(StaticClient {
            outcome,
            calls: Mutex::new(Vec::new()),
        });
        let controller = RegistrationController::new(
            client.clone(),
            Arc::new(TokioScheduler::new(CancellationToken::new())),
            Credentials::new("secret"),
            ServerRecord::new(
                Uuid::new_v4(),
                7777,
                ServerStatus {
                    name: "Foo".to_string(),
                    player_count: 0,
                    player_capacity: 10,
                    extra: String::new(),
                },
            ),
            RegistrationSettings {
                retry_registration_as_update_on_fail: false,
                update_server_periodically: false,
                ..RegistrationSettings::default()
            },
        );
        (router(AppState { controller }), client)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                request = request.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn current_state(app: &Router) -> RegistrationState {
        let (_, body) = call(app, "GET", "/v1/status", None).await;
        let report: StatusReport = serde_json::from_slice(&body).unwrap();
        report.state
    }

    #[tokio::test]
    async fn test_register_then_deregister() {
        let (app, client) = test_app(Ok(200));
        assert_eq!(current_state(&app).await, RegistrationState::Unregistered);

        let (status, _) = call(&app, "POST", "/v1/register", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(current_state(&app).await, RegistrationState::Registered);

        let (status, _) = call(&app, "POST", "/v1/deregister", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(current_state(&app).await, RegistrationState::Unregistered);

        assert_eq!(*client.calls.lock().unwrap(), vec![Endpoint::Add, Endpoint::Remove]);
    }

    #[tokio::test]
    async fn test_update_before_register_is_precondition_failed() {
        let (app, client) = test_app(Ok(200));

        let (status, _) = call(&app, "POST", "/v1/update", None).await;

        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_is_bad_gateway() {
        let (app, _client) = test_app(Err(ExchangeFailure::status(500, "boom")));

        let (status, body) = call(&app, "POST", "/v1/register", None).await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("boom"));
        assert_eq!(current_state(&app).await, RegistrationState::Unregistered);
    }

    #[tokio::test]
    async fn test_patch_server_edits_without_exchange() {
        let (app, client) = test_app(Ok(200));

        let (status, body) = call(
            &app,
            "PATCH",
            "/v1/server",
            Some(r#"{"player_count": 5, "extra": "{\"mode\":\"ctf\"}"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let report: StatusReport = serde_json::from_slice(&body).unwrap();
        assert_eq!(report.record.status.player_count, 5);
        assert_eq!(report.record.status.extra, r#"{"mode":"ctf"}"#);
        assert_eq!(report.record.status.name, "Foo");
        assert!(client.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_busy_maps_to_conflict() {
        assert_eq!(error_status(&RegistrationError::Busy), StatusCode::CONFLICT);
    }
}
