use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    self,
    error::DeploymentError,
    model::{WorkloadRequest, WorkloadSpec},
    reconcile, workloads, Event, ReconciliationService,
};

/// Set by the authenticating proxy in front of the console.
pub const OWNER_HEADER: &str = "x-user-id";

type Service = State<Arc<ReconciliationService>>;

pub fn router(reconciliation: ReconciliationService) -> Router {
    let api = Router::new()
        .route("/workloads", get(list_workloads).post(create_workload))
        .route(
            "/workloads/:id",
            get(get_workload).put(update_workload).delete(delete_workload),
        )
        .route("/deployment/deploy/:workload_id", post(deploy_workload))
        .route("/deployment/status/:workload_id", get(deployment_status))
        .route("/deployment/stop/:workload_id", post(stop_deployment))
        .route("/deployment/remove/:workload_id", delete(remove_deployment))
        .route("/deployment/my-deployments", get(my_deployments))
        .route("/deployment/containers", get(my_containers));
    Router::new()
        .nest("/api", api)
        .with_state(Arc::new(reconciliation))
}

/// Caller identity, every operation is scoped to it.
pub struct Owner(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .map(Owner)
            .ok_or(ApiError {
                status: StatusCode::UNAUTHORIZED,
                message: "Missing or invalid user identity".to_string(),
            })
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResponse {
    pub success: bool,
    pub message: String,
    pub access_url: Option<String>,
    pub container_id: Option<String>,
    pub deployed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub search: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn during(operation: &str, e: DeploymentError) -> Self {
        let status = match e {
            DeploymentError::WorkloadNotFound(_) | DeploymentError::ContainerNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DeploymentError::ImageRequired | DeploymentError::Invalid(_) => StatusCode::BAD_REQUEST,
            DeploymentError::Busy(_) => StatusCode::CONFLICT,
            DeploymentError::Runtime(_) | DeploymentError::Store(_) => {
                error!("Error during {} {:?}", operation, e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(MessageResponse {
                success: false,
                message: self.message,
            }),
        )
            .into_response()
    }
}

fn ok(message: &str) -> Json<MessageResponse> {
    Json(MessageResponse {
        success: true,
        message: message.to_string(),
    })
}

async fn list_workloads(
    State(service): Service,
    Owner(owner): Owner,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    workloads::list(owner, params.search.as_deref(), &service)
        .await
        .map(Json)
        .map_err(|e| ApiError::during("list_workloads", e))
}

async fn get_workload(
    State(service): Service,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    workloads::get(id, owner, &service)
        .await
        .map(Json)
        .map_err(|e| ApiError::during("get_workload", e))
}

async fn create_workload(
    State(service): Service,
    Owner(owner): Owner,
    Json(payload): Json<WorkloadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = match WorkloadSpec::try_from(payload) {
        Ok(spec) => workloads::create(owner, spec, &service).await,
        Err(message) => Err(DeploymentError::Invalid(message)),
    };
    created
        .map(|workload| (StatusCode::CREATED, Json(workload)))
        .map_err(|e| ApiError::during("create_workload", e))
}

async fn update_workload(
    State(service): Service,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
    Json(payload): Json<WorkloadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = match WorkloadSpec::try_from(payload) {
        Ok(spec) => workloads::update(id, owner, spec, &service).await,
        Err(message) => Err(DeploymentError::Invalid(message)),
    };
    updated
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| ApiError::during("update_workload", e))
}

async fn delete_workload(
    State(service): Service,
    Owner(owner): Owner,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    workloads::delete(id, owner, &service)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| ApiError::during("delete_workload", e))
}

async fn deploy_workload(
    State(service): Service,
    Owner(owner): Owner,
    Path(workload_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    match reconcile(Event::Deploy(workload_id), owner, &service).await {
        Ok(workload) => Ok(Json(DeploymentResponse {
            success: true,
            message: "Workload deployed successfully".to_string(),
            access_url: workload.access_url,
            container_id: workload.container_id,
            deployed_at: workload.deployed_at,
        })),
        Err(e @ DeploymentError::Runtime(_)) => {
            let mut failure = ApiError::during("deploy_workload", e);
            failure.message = format!("Deployment failed: {}", failure.message);
            Err(failure)
        }
        Err(e) => Err(ApiError::during("deploy_workload", e)),
    }
}

async fn deployment_status(
    State(service): Service,
    Owner(owner): Owner,
    Path(workload_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    domain::deployment_status(workload_id, owner, &service)
        .await
        .map(Json)
        .map_err(|e| ApiError::during("deployment_status", e))
}

async fn stop_deployment(
    State(service): Service,
    Owner(owner): Owner,
    Path(workload_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    reconcile(Event::Stop(workload_id), owner, &service)
        .await
        .map(|_| ok("Workload stopped successfully"))
        .map_err(|e| ApiError::during("stop_deployment", e))
}

async fn remove_deployment(
    State(service): Service,
    Owner(owner): Owner,
    Path(workload_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    reconcile(Event::Remove(workload_id), owner, &service)
        .await
        .map(|_| ok("Workload removed successfully"))
        .map_err(|e| ApiError::during("remove_deployment", e))
}

async fn my_deployments(
    State(service): Service,
    Owner(owner): Owner,
) -> Result<impl IntoResponse, ApiError> {
    domain::list_deployments(owner, &service)
        .await
        .map(Json)
        .map_err(|e| ApiError::during("my_deployments", e))
}

async fn my_containers(
    State(service): Service,
    Owner(owner): Owner,
) -> Result<impl IntoResponse, ApiError> {
    domain::list_containers(owner, &service)
        .await
        .map(Json)
        .map_err(|e| ApiError::during("my_containers", e))
}
