//! HTTP API for Trellis.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use trellis_cache::CacheCounters;
use trellis_engine::{
    PlacementEngine, PlacementError, PlacementReceipt, PlacementRequest, RootRequest, SlotSource,
};
use trellis_tree::{DownlineStats, IntegrityReport, Node, NodeId, TreeStore, TreeViewNode};

/// Shared state for API handlers.
pub struct AppState<S> {
    pub engine: Arc<PlacementEngine<S>>,
    /// Deepest tree view a client may request
    pub tree_depth_cap: u32,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            tree_depth_cap: self.tree_depth_cap,
        }
    }
}

/// Build the API router.
pub fn build_router<S: TreeStore + 'static>(state: AppState<S>) -> Router {
    // CORS layer for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status::<S>))
        // Tree writes
        .route("/api/v1/root", post(create_root::<S>))
        .route("/api/v1/placements", post(place::<S>))
        .route("/api/v1/members/:user_id", get(get_member::<S>))
        .route("/api/v1/members/:user_id/active", put(set_active::<S>))
        // Reads
        .route("/api/v1/nodes/:id", get(get_node::<S>))
        .route("/api/v1/stats/:user_id", get(get_stats::<S>))
        .route("/api/v1/tree/:user_id", get(get_tree::<S>))
        .route("/api/v1/integrity", get(integrity::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// --- Errors ---

/// An error rendered as `{error, code}`.
#[derive(Debug)]
pub enum ApiError {
    Placement(PlacementError),
    /// The blocking task running the engine call failed
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl From<PlacementError> for ApiError {
    fn from(e: PlacementError) -> Self {
        ApiError::Placement(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code) = match &self {
            ApiError::Placement(e) => (status_for(e), e.to_string(), e.code()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), "Internal"),
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", error);
        }
        (status, Json(ErrorBody { error, code })).into_response()
    }
}

fn status_for(e: &PlacementError) -> StatusCode {
    match e {
        PlacementError::SponsorNotFound(_)
        | PlacementError::UserNotFound(_)
        | PlacementError::NodeNotFound(_) => StatusCode::NOT_FOUND,
        PlacementError::UserAlreadyPlaced(_)
        | PlacementError::RootExists(_)
        | PlacementError::DuplicateReferralCode(_)
        | PlacementError::DuplicateId(_)
        | PlacementError::PlacementConflict { .. }
        | PlacementError::NoAvailableSlot(_) => StatusCode::CONFLICT,
        PlacementError::PlacementTimeout | PlacementError::TraversalTimeout => {
            StatusCode::GATEWAY_TIMEOUT
        }
        PlacementError::InvalidParent { .. } | PlacementError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Run an engine call on the blocking pool; the stores do synchronous IO.
async fn blocking<S, T, F>(state: &AppState<S>, f: F) -> ApiResult<T>
where
    S: TreeStore + 'static,
    T: Send + 'static,
    F: FnOnce(&PlacementEngine<S>) -> trellis_engine::Result<T> + Send + 'static,
{
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

// --- Health endpoints ---

async fn health() -> &'static str {
    "OK"
}

/// Node status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub nodes: usize,
    pub root: Option<NodeId>,
    pub cache_enabled: bool,
    pub cache: CacheCounters,
}

async fn status<S: TreeStore + 'static>(
    State(state): State<AppState<S>>,
) -> ApiResult<Json<StatusResponse>> {
    let status = blocking(&state, |engine| {
        let store = engine.store();
        Ok(StatusResponse {
            nodes: store.len()?,
            root: store.root()?.map(|n| n.id),
            cache_enabled: engine.cache().is_enabled(),
            cache: engine.cache().counters(),
        })
    })
    .await?;
    Ok(Json(status))
}

// --- Placement endpoints ---

async fn create_root<S: TreeStore + 'static>(
    State(state): State<AppState<S>>,
    Json(req): Json<RootRequest>,
) -> ApiResult<(StatusCode, Json<Node>)> {
    let root = blocking(&state, move |engine| engine.seed_root_request(&req)).await?;
    Ok((StatusCode::CREATED, Json(root)))
}

/// Placement response: the receipt plus how the slot was found
#[derive(Debug, Serialize, Deserialize)]
pub struct PlacementResponse {
    #[serde(flatten)]
    pub receipt: PlacementReceipt,
    pub source: SlotSource,
}

async fn place<S: TreeStore + 'static>(
    State(state): State<AppState<S>>,
    Json(req): Json<PlacementRequest>,
) -> ApiResult<(StatusCode, Json<PlacementResponse>)> {
    let outcome = blocking(&state, move |engine| engine.place_request(&req)).await?;
    Ok((
        StatusCode::CREATED,
        Json(PlacementResponse {
            receipt: outcome.receipt(),
            source: outcome.source,
        }),
    ))
}

// --- Member endpoints ---

async fn get_member<S: TreeStore + 'static>(
    State(state): State<AppState<S>>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Node>> {
    let node = blocking(&state, move |engine| engine.member(&user_id)).await?;
    Ok(Json(node))
}

#[derive(Debug, Deserialize)]
struct ActiveRequest {
    active: bool,
}

async fn set_active<S: TreeStore + 'static>(
    State(state): State<AppState<S>>,
    Path(user_id): Path<String>,
    Json(req): Json<ActiveRequest>,
) -> ApiResult<Json<Node>> {
    let node = blocking(&state, move |engine| engine.set_active(&user_id, req.active)).await?;
    Ok(Json(node))
}

// --- Read endpoints ---

async fn get_node<S: TreeStore + 'static>(
    State(state): State<AppState<S>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<Node>> {
    let node = blocking(&state, move |engine| engine.node(NodeId(id))).await?;
    Ok(Json(node))
}

async fn get_stats<S: TreeStore + 'static>(
    State(state): State<AppState<S>>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<DownlineStats>> {
    let stats = blocking(&state, move |engine| engine.stats(&user_id)).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
struct TreeQuery {
    depth: Option<u32>,
}

async fn get_tree<S: TreeStore + 'static>(
    State(state): State<AppState<S>>,
    Path(user_id): Path<String>,
    Query(query): Query<TreeQuery>,
) -> ApiResult<Json<TreeViewNode>> {
    let depth = query
        .depth
        .unwrap_or(state.tree_depth_cap)
        .min(state.tree_depth_cap);
    let view = blocking(&state, move |engine| engine.tree(&user_id, depth)).await?;
    Ok(Json(view))
}

async fn integrity<S: TreeStore + 'static>(
    State(state): State<AppState<S>>,
) -> ApiResult<Json<IntegrityReport>> {
    let report = blocking(&state, |engine| engine.integrity()).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use trellis_cache::{CachePolicy, PositionCache};
    use trellis_engine::EngineConfig;
    use trellis_tree::MemoryTreeStore;

    fn test_router() -> Router {
        let engine = PlacementEngine::new(
            Arc::new(MemoryTreeStore::new()),
            Arc::new(PositionCache::in_memory(CachePolicy::default())),
            EngineConfig::default(),
        );
        build_router(AppState {
            engine: Arc::new(engine),
            tree_depth_cap: 3,
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn seeded() -> (Router, String) {
        let app = test_router();
        let (status, root) = send(
            &app,
            "POST",
            "/api/v1/root",
            Some(json!({"user_id": "root", "referral_code": "ROOT"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(root["level"], 0);
        (app, "ROOT".to_string())
    }

    #[tokio::test]
    async fn health() {
        let app = test_router();
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn placements_fill_breadth_first() {
        let (app, code) = seeded().await;

        let mut levels = Vec::new();
        for i in 0..7 {
            let (status, body) = send(
                &app,
                "POST",
                "/api/v1/placements",
                Some(json!({"sponsor_code": code, "user_id": format!("m{i}")})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            levels.push(body["level"].as_u64().unwrap());
        }
        assert_eq!(levels, vec![1, 1, 2, 2, 2, 2, 3]);

        let (status, stats) = send(&app, "GET", "/api/v1/stats/root", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_downline"], 7);
        assert_eq!(stats["left_side_count"], 4);
        assert_eq!(stats["right_side_count"], 3);
        assert_eq!(stats["max_depth"], 3);

        let (_, report) = send(&app, "GET", "/api/v1/integrity", None).await;
        assert_eq!(report["valid"], true);

        let (_, status) = send(&app, "GET", "/api/v1/status", None).await;
        assert_eq!(status["nodes"], 8);
        assert_eq!(status["cache_enabled"], true);
    }

    #[tokio::test]
    async fn errors_carry_taxonomy_codes() {
        let (app, code) = seeded().await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/placements",
            Some(json!({"sponsor_code": "MISSING", "user_id": "a"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "SponsorNotFound");

        let place = json!({"sponsor_code": code, "user_id": "a"});
        send(&app, "POST", "/api/v1/placements", Some(place.clone())).await;
        let (status, body) = send(&app, "POST", "/api/v1/placements", Some(place)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "UserAlreadyPlaced");

        let (status, body) = send(&app, "GET", "/api/v1/stats/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "UserNotFound");

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/root",
            Some(json!({"user_id": "second"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "RootExists");
    }

    #[tokio::test]
    async fn tree_view_depth_is_capped() {
        let (app, code) = seeded().await;
        for i in 0..15 {
            send(
                &app,
                "POST",
                "/api/v1/placements",
                Some(json!({"sponsor_code": code, "user_id": format!("m{i}")})),
            )
            .await;
        }

        let (status, tree) = send(&app, "GET", "/api/v1/tree/root?depth=50", None).await;
        assert_eq!(status, StatusCode::OK);
        // Cap is 3: the level-3 nodes are present but their children are not.
        let level3 = &tree["children"][0]["children"][0]["children"][0];
        assert_eq!(level3["level"], 3);
        assert_eq!(level3["children"], json!([]));
        assert_eq!(level3["truncated"], true);

        let (_, shallow) = send(&app, "GET", "/api/v1/tree/root?depth=1", None).await;
        assert_eq!(shallow["children"].as_array().unwrap().len(), 2);
        assert_eq!(shallow["children"][0]["children"], json!([]));
    }

    #[tokio::test]
    async fn toggle_member_active() {
        let (app, code) = seeded().await;
        let (_, placed) = send(
            &app,
            "POST",
            "/api/v1/placements",
            Some(json!({"sponsor_code": code, "user_id": "a", "display_name": "Alice"})),
        )
        .await;
        let id = placed["node_id"].as_u64().unwrap();

        let (status, node) = send(
            &app,
            "PUT",
            "/api/v1/members/a/active",
            Some(json!({"active": false})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(node["active"], false);

        let (_, node) = send(&app, "GET", &format!("/api/v1/nodes/{id}"), None).await;
        assert_eq!(node["active"], false);
        assert_eq!(node["display_name"], "Alice");
    }
}
