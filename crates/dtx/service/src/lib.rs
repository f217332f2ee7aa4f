#![deny(unsafe_code)]

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dtx_adapters::{SqlxProvider, SqlxProviderConfig};
use dtx_core::{
    CallbackDispatcher, Decision, DtxError, ResourceConfig, ResourceError, ResourceProvider,
    TransBase, RESULT_FAILURE, RESULT_ONGOING, RESULT_SUCCESS,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

pub struct ServiceState<P> {
    pub dispatcher: Arc<CallbackDispatcher<P>>,
    pub resource: ResourceConfig,
}

impl<P> Clone for ServiceState<P> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            resource: self.resource.clone(),
        }
    }
}

impl<P: ResourceProvider> ServiceState<P> {
    pub fn new(provider: Arc<P>, resource: ResourceConfig) -> Self {
        Self {
            dispatcher: Arc::new(CallbackDispatcher::new(provider, resource.clone())),
            resource,
        }
    }
}

impl ServiceState<SqlxProvider> {
    /// State backed by a real MySQL/PostgreSQL resource.
    pub fn sqlx(resource: ResourceConfig, provider: SqlxProviderConfig) -> Self {
        Self::new(Arc::new(SqlxProvider::new(provider)), resource)
    }
}

pub fn build_router<P>(state: ServiceState<P>) -> Router
where
    P: ResourceProvider + 'static,
{
    Router::new()
        .route("/api/health", get(health::<P>))
        .route("/api/xa/callback", post(xa_callback::<P>))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Dtx(#[from] DtxError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Http { status, .. } => *status,
            ApiError::Dtx(DtxError::InvalidBranch(_)) => StatusCode::BAD_REQUEST,
            ApiError::Dtx(DtxError::Ongoing { .. }) => StatusCode::TOO_EARLY,
            ApiError::Dtx(DtxError::Failure { .. }) => StatusCode::CONFLICT,
            ApiError::Dtx(_) | ApiError::Resource(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut message = self.to_string();
        if status != StatusCode::CONFLICT && status != StatusCode::TOO_EARLY {
            // The coordinator reads these markers from any body, whatever the status.
            message = without_markers(&message);
        }
        if status.is_server_error() {
            warn!(error = %self, "callback failed, coordinator will retry");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

fn without_markers(message: &str) -> String {
    message
        .replace(RESULT_FAILURE, "failure")
        .replace(RESULT_ONGOING, "ongoing")
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    driver: &'static str,
}

async fn health<P>(State(state): State<ServiceState<P>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "dtx-service",
        driver: state.resource.driver.as_str(),
    })
}

#[derive(Debug, Clone, Serialize)]
struct CallbackResponse {
    dtm_result: &'static str,
}

/// Coordinator decision for one branch: `?gid=..&branch_id=..&op=commit|rollback`.
async fn xa_callback<P: ResourceProvider>(
    State(state): State<ServiceState<P>>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<CallbackResponse>, ApiError> {
    let trans = TransBase::from_query(&query)?;
    let decision = trans.op().parse::<Decision>()?;
    state
        .dispatcher
        .apply_decision(trans.identity(), decision)
        .await?;
    Ok(Json(CallbackResponse {
        dtm_result: RESULT_SUCCESS,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use dtx_adapters::{BranchState, MemoryXaResource};
    use dtx_core::{BranchIdentity, ResourceBranchDriver, ResourceHandle, XaAction};
    use serde_json::Value;
    use tower::ServiceExt;

    fn resource_config() -> ResourceConfig {
        ResourceConfig::mysql("memory", 0, "bank")
    }

    fn app(resource: &MemoryXaResource) -> Router {
        build_router(ServiceState::new(
            Arc::new(resource.clone()),
            resource_config(),
        ))
    }

    async fn prepare_branch(resource: &MemoryXaResource, gid: &str, branch_id: &str) {
        let driver = ResourceBranchDriver::new(Arc::new(resource.clone()), resource_config());
        let identity = BranchIdentity::new(gid, branch_id).unwrap();
        driver
            .run_local_branch(&identity, |handle| {
                Box::pin(async move {
                    handle
                        .execute_raw("update account set money = money + 30")
                        .await?;
                    Ok::<(), DtxError>(())
                })
            })
            .await
            .unwrap();
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_reports_driver() {
        let resource = MemoryXaResource::new();
        let (status, body) = call(app(&resource), "GET", "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["driver"], "mysql");
    }

    #[tokio::test]
    async fn commit_callback_finalizes_prepared_branch() {
        let resource = MemoryXaResource::new();
        prepare_branch(&resource, "g1", "01").await;

        let (status, body) = call(
            app(&resource),
            "POST",
            "/api/xa/callback?gid=g1&branch_id=01&op=commit",
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"dtm_result": "SUCCESS"}));
        assert_eq!(resource.branch_state("g1-01"), Some(BranchState::Committed));
    }

    #[tokio::test]
    async fn redelivered_decisions_stay_successful() {
        let resource = MemoryXaResource::new();
        prepare_branch(&resource, "g2", "01").await;
        let uri = "/api/xa/callback?gid=g2&branch_id=01&op=rollback";

        for _ in 0..2 {
            let (status, _) = call(app(&resource), "POST", uri).await;
            assert_eq!(status, StatusCode::OK);
        }
        assert_eq!(
            resource.branch_state("g2-01"),
            Some(BranchState::RolledBack)
        );
    }

    #[tokio::test]
    async fn malformed_callbacks_are_rejected_without_touching_the_resource() {
        let resource = MemoryXaResource::new();

        for uri in [
            "/api/xa/callback?branch_id=01&op=commit",
            "/api/xa/callback?gid=g3&op=commit",
            "/api/xa/callback?gid=g3&branch_id=01&op=forget",
            "/api/xa/callback?gid=g3&branch_id=01",
        ] {
            let (status, body) = call(app(&resource), "POST", uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            let error = body["error"].as_str().unwrap();
            assert!(error.contains("invalid branch info"), "{}", error);
        }
        assert!(resource.statements().is_empty());
        assert_eq!(resource.acquisitions(), 0);
    }

    #[tokio::test]
    async fn resource_failure_is_a_server_error() {
        let resource = MemoryXaResource::new();
        prepare_branch(&resource, "g4", "01").await;
        resource.fail_on(
            XaAction::Commit,
            "2013 (HY000): Lost connection to MySQL server",
        );

        let (status, body) = call(
            app(&resource),
            "POST",
            "/api/xa/callback?gid=g4&branch_id=01&op=commit",
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("Lost connection"));
        assert_eq!(resource.branch_state("g4-01"), Some(BranchState::Prepared));
    }

    #[tokio::test]
    async fn ids_carrying_statement_text_are_rejected() {
        let resource = MemoryXaResource::new();
        prepare_branch(&resource, "victim", "01").await;
        let before = resource.statements().len();

        for uri in [
            "/api/xa/callback?gid=g5&branch_id=b%5C%27%3B%20xa%20commit%20%27victim-01%27%3B%20--%20&op=commit",
            "/api/xa/callback?gid=g5%27&branch_id=01&op=rollback",
        ] {
            let (status, body) = call(app(&resource), "POST", uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
            let error = body["error"].as_str().unwrap();
            assert!(error.contains("may only contain"), "{}", error);
        }
        assert_eq!(resource.statements().len(), before);
        assert_eq!(
            resource.branch_state("victim-01"),
            Some(BranchState::Prepared)
        );
    }

    #[tokio::test]
    async fn server_error_bodies_never_carry_outcome_markers() {
        let resource = MemoryXaResource::new();
        prepare_branch(&resource, "g6", "01").await;
        resource.fail_on(XaAction::Commit, "replica said FAILURE, then ONGOING");

        let (status, body) = call(
            app(&resource),
            "POST",
            "/api/xa/callback?gid=g6&branch_id=01&op=commit",
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let error = body["error"].as_str().unwrap();
        assert!(error.contains("replica said failure, then ongoing"));
        assert!(!error.contains(RESULT_FAILURE));
        assert!(!error.contains(RESULT_ONGOING));
    }

    #[test]
    fn classified_errors_map_back_to_status_codes() {
        assert_eq!(
            ApiError::from(DtxError::ongoing("busy")).status(),
            StatusCode::TOO_EARLY
        );
        assert_eq!(
            ApiError::from(DtxError::failure("no")).status(),
            StatusCode::CONFLICT
        );
    }
}
