//! Management HTTP API
//!
//! JSON endpoints served next to the NVMe/TCP listener:
//!
//! - `GET /sessions` lists live connections
//! - `GET /targets` lists exported subsystems
//! - `POST /api/v1/<Request>` manages file-backed volumes, where the path
//!   names the request body type

pub mod types;
pub mod volumes;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use thiserror::Error;
use uuid::Uuid;
use warp_nvmeof::{NvmeOfError, Registry, SessionInfo};

use types::{
    CreateVolumeRequest, CreateVolumeResponse, DeleteVolumeRequest, DeleteVolumeResponse,
    ErrorResponse, GetVolumeRequest, GetVolumeResponse, ListVolumeRequest, ListVolumeResponse,
    Status, TargetView,
};
use volumes::VolumeStore;

/// Management API errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("volume {0} not found")]
    VolumeNotFound(Uuid),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("NVMe-oF error: {0}")]
    NvmeOf(#[from] NvmeOfError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::VolumeNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NvmeOf(NvmeOfError::InvalidNqn(_) | NvmeOfError::Subsystem(_)) => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(ErrorResponse {
            status: Status {
                code: status.as_u16(),
                message: self.to_string(),
            },
        });

        (status, body).into_response()
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    registry: Arc<Registry>,
    volumes: Arc<VolumeStore>,
}

impl ApiState {
    pub fn new(registry: Arc<Registry>, volumes: VolumeStore) -> Self {
        Self {
            registry,
            volumes: Arc::new(volumes),
        }
    }
}

/// Create the API router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/sessions", get(sessions_handler))
        .route("/targets", get(targets_handler))
        .route("/api/v1/CreateVolumeRequest", post(create_volume_handler))
        .route("/api/v1/GetVolumeRequest", post(get_volume_handler))
        .route("/api/v1/DeleteVolumeRequest", post(delete_volume_handler))
        .route("/api/v1/ListVolumeRequest", post(list_volumes_handler))
        .with_state(state)
}

/// Bind `addr` and serve the API until `shutdown` resolves
pub async fn run(
    addr: SocketAddr,
    state: ApiState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Management API listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn sessions_handler(State(state): State<ApiState>) -> Json<Vec<SessionInfo>> {
    Json(state.registry.sessions())
}

async fn targets_handler(State(state): State<ApiState>) -> Json<Vec<TargetView>> {
    let targets = state
        .registry
        .list_subsystems()
        .into_iter()
        .filter_map(|nqn| state.registry.subsystem(&nqn))
        .map(|subsystem| TargetView {
            nqn: subsystem.nqn().to_string(),
            kind: subsystem.kind().to_string(),
            details: subsystem.runtime_details(),
        })
        .collect();
    Json(targets)
}

async fn create_volume_handler(
    State(state): State<ApiState>,
    Json(request): Json<CreateVolumeRequest>,
) -> ApiResult<Json<CreateVolumeResponse>> {
    let volume = state.volumes.create(request)?;
    Ok(Json(CreateVolumeResponse {
        status: Status::ok(),
        volume,
    }))
}

async fn get_volume_handler(
    State(state): State<ApiState>,
    Json(request): Json<GetVolumeRequest>,
) -> ApiResult<Json<GetVolumeResponse>> {
    let volume = state.volumes.get(request.uuid)?;
    Ok(Json(GetVolumeResponse {
        status: Status::ok(),
        volume,
    }))
}

async fn delete_volume_handler(
    State(state): State<ApiState>,
    Json(request): Json<DeleteVolumeRequest>,
) -> ApiResult<Json<DeleteVolumeResponse>> {
    state.volumes.delete(request.uuid).await?;
    Ok(Json(DeleteVolumeResponse {
        status: Status::ok(),
    }))
}

async fn list_volumes_handler(
    State(state): State<ApiState>,
    Json(_): Json<ListVolumeRequest>,
) -> Json<ListVolumeResponse> {
    Json(ListVolumeResponse {
        status: Status::ok(),
        volumes: state.volumes.list(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde::de::DeserializeOwned;
    use serde::Serialize;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use warp_nvmeof::DISCOVERY_NQN;

    fn state(dir: &TempDir) -> ApiState {
        let registry = Registry::new();
        let volumes = VolumeStore::open(dir.path(), registry.clone()).unwrap();
        ApiState::new(registry, volumes)
    }

    async fn call<T: DeserializeOwned>(
        state: &ApiState,
        request: Request<Body>,
    ) -> (StatusCode, T) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_json(uri: &str, body: &impl Serialize) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_volume_lifecycle() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let create = CreateVolumeRequest {
            name: "db".to_string(),
            description: "database volume".to_string(),
            size: 1 << 20,
        };
        let (status, created): (_, CreateVolumeResponse) =
            call(&state, post_json("/api/v1/CreateVolumeRequest", &create)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created.status, Status::ok());
        assert_eq!(created.volume.name, "db");
        assert_eq!(created.volume.size, 1 << 20);
        let uuid = created.volume.uuid;

        let (status, fetched): (_, GetVolumeResponse) =
            call(&state, post_json("/api/v1/GetVolumeRequest", &GetVolumeRequest { uuid })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched.volume, created.volume);

        let (_, listed): (_, ListVolumeResponse) =
            call(&state, post_json("/api/v1/ListVolumeRequest", &ListVolumeRequest {})).await;
        assert_eq!(listed.volumes, vec![created.volume.clone()]);

        let (_, targets): (_, Vec<TargetView>) = call(&state, get_request("/targets")).await;
        let nqns: Vec<_> = targets.iter().map(|t| t.nqn.as_str()).collect();
        assert!(nqns.contains(&DISCOVERY_NQN));
        assert!(nqns.contains(&created.volume.nqn.as_str()));

        let (status, deleted): (_, DeleteVolumeResponse) = call(
            &state,
            post_json("/api/v1/DeleteVolumeRequest", &DeleteVolumeRequest { uuid }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted.status, Status::ok());

        let (status, missing): (_, ErrorResponse) =
            call(&state, post_json("/api/v1/GetVolumeRequest", &GetVolumeRequest { uuid })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(missing.status.code, 404);
    }

    #[tokio::test]
    async fn test_invalid_volume_size() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let create = CreateVolumeRequest {
            name: "odd".to_string(),
            description: String::new(),
            size: 777,
        };
        let (status, error): (_, ErrorResponse) =
            call(&state, post_json("/api/v1/CreateVolumeRequest", &create)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error.status.message.contains("777"));
    }

    #[tokio::test]
    async fn test_sessions_empty() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir);

        let (status, sessions): (_, Vec<serde_json::Value>) =
            call(&state, get_request("/sessions")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(sessions.is_empty());
    }
}
