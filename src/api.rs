//! Thin HTTP surface over the ingestion coordinator.
//!
//! Every route is a direct caller of `Ingestor` / store reads; no pipeline
//! logic lives here.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::error::{FolioError, Result};
use crate::ingest::{store, IngestRequest, Ingestor, PROFILE_NAMES};

#[derive(Clone)]
pub struct ApiState {
    pub ingestor: Arc<Ingestor>,
}

/// Build the API router.
pub fn router(ingestor: Arc<Ingestor>) -> Router {
    Router::new()
        .route("/v1/healthz", get(healthz))
        .route("/v1/profiles", get(profiles))
        .route("/v1/works", get(works_list))
        .route("/v1/works/:work_id", get(work_get))
        .route("/v1/works/:work_id/scenes", get(scenes_list))
        .route("/v1/works/:work_id/chunks", get(chunks_list))
        .route("/v1/works/:work_id/slice", get(work_slice))
        .route("/v1/works/:work_id/resegment", post(work_resegment))
        .route("/v1/ingest", post(ingest_doc))
        .layer(CorsLayer::permissive())
        .with_state(ApiState { ingestor })
}

/// Bind and serve until the process exits.
pub async fn serve(ingestor: Arc<Ingestor>, port: u16) -> Result<()> {
    let app = router(ingestor);
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(FolioError::Io)?;
    log::info!("serving API on http://{addr}");
    axum::serve(listener, app).await.map_err(FolioError::Io)?;
    Ok(())
}

/// Error wrapper mapping the taxonomy onto HTTP statuses.
struct ApiError(FolioError);

impl From<FolioError> for ApiError {
    fn from(err: FolioError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FolioError::NotFound(_) => StatusCode::NOT_FOUND,
            FolioError::RangeOutOfBounds { .. } | FolioError::Config(_) => StatusCode::BAD_REQUEST,
            FolioError::ConflictingRun(_) => StatusCode::CONFLICT,
            FolioError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            FolioError::Extraction(_) | FolioError::Encoding(_) => StatusCode::UNPROCESSABLE_ENTITY,
            FolioError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            FolioError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "error": self.0.to_string(),
            "stage": self.0.stage(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn profiles() -> Json<serde_json::Value> {
    Json(json!({ "profiles": PROFILE_NAMES }))
}

#[derive(Deserialize)]
struct WorksQuery {
    q: Option<String>,
    limit: Option<usize>,
}

async fn works_list(
    State(state): State<ApiState>,
    Query(params): Query<WorksQuery>,
) -> ApiResult<Json<Vec<store::WorkSummary>>> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let works = store::list_works(state.ingestor.db(), params.q, limit).await?;
    Ok(Json(works))
}

async fn work_get(
    State(state): State<ApiState>,
    Path(work_id): Path<String>,
) -> ApiResult<Json<store::WorkSummary>> {
    let work = store::get_work(state.ingestor.db(), &work_id)
        .await?
        .ok_or(FolioError::NotFound(work_id))?;
    Ok(Json(work))
}

async fn scenes_list(
    State(state): State<ApiState>,
    Path(work_id): Path<String>,
) -> ApiResult<Json<Vec<store::SceneRow>>> {
    store::get_work(state.ingestor.db(), &work_id)
        .await?
        .ok_or_else(|| FolioError::NotFound(work_id.clone()))?;
    let scenes = store::list_scenes(state.ingestor.db(), &work_id).await?;
    Ok(Json(scenes))
}

async fn chunks_list(
    State(state): State<ApiState>,
    Path(work_id): Path<String>,
) -> ApiResult<Json<Vec<store::ChunkRow>>> {
    store::get_work(state.ingestor.db(), &work_id)
        .await?
        .ok_or_else(|| FolioError::NotFound(work_id.clone()))?;
    let chunks = store::list_chunks(state.ingestor.db(), &work_id).await?;
    Ok(Json(chunks))
}

#[derive(Deserialize)]
struct SliceQuery {
    start: usize,
    end: usize,
}

async fn work_slice(
    State(state): State<ApiState>,
    Path(work_id): Path<String>,
    Query(params): Query<SliceQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let text = state
        .ingestor
        .slice(&work_id, params.start, params.end)
        .await?;
    Ok(Json(json!({ "text": text })))
}

#[derive(Deserialize)]
struct IngestBody {
    path: String,
    title: Option<String>,
    author: Option<String>,
    profile: Option<String>,
    window_chars: Option<usize>,
    stride_chars: Option<usize>,
}

async fn ingest_doc(
    State(state): State<ApiState>,
    Json(body): Json<IngestBody>,
) -> ApiResult<(StatusCode, Json<crate::ingest::IngestOutcome>)> {
    let outcome = state
        .ingestor
        .ingest(IngestRequest {
            path: PathBuf::from(body.path),
            title: body.title,
            author: body.author,
            profile: body.profile,
            window_chars: body.window_chars,
            stride_chars: body.stride_chars,
            invoked_by: "http".to_string(),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Deserialize)]
struct ResegmentBody {
    profile: String,
    window_chars: Option<usize>,
    stride_chars: Option<usize>,
}

async fn work_resegment(
    State(state): State<ApiState>,
    Path(work_id): Path<String>,
    Json(body): Json<ResegmentBody>,
) -> ApiResult<Json<crate::ingest::ResegmentOutcome>> {
    let outcome = state
        .ingestor
        .resegment(
            &work_id,
            &body.profile,
            body.window_chars.unwrap_or(512),
            body.stride_chars.unwrap_or(384),
        )
        .await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestConfig;
    use crate::db::{migrate, Db};
    use crate::events::EventEmitter;
    use axum::body::Body;
    use axum::http::Request;
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn setup_router() -> (Router, Arc<Ingestor>, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = Db::new(tmp.path().join("test.db"));
        let migrations_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations");
        db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
            .await
            .unwrap();
        let ingestor = Arc::new(Ingestor::new(
            db,
            EventEmitter::Null,
            IngestConfig::default(),
        ));
        (router(ingestor.clone()), ingestor, tmp)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_healthz_and_profiles() {
        let (app, _ingestor, _tmp) = setup_router().await;

        let res = app.clone().oneshot(get_req("/v1/healthz")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = app.oneshot(get_req("/v1/profiles")).await.unwrap();
        let body = body_json(res).await;
        let profiles: Vec<&str> = body["profiles"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(profiles.contains(&"markdown"));
        assert!(profiles.contains(&"pdf_pages"));
    }

    #[tokio::test]
    async fn test_ingest_then_browse_and_slice() {
        let (app, _ingestor, tmp) = setup_router().await;
        let doc = tmp.path().join("doc.txt");
        fs::write(&doc, "CHAPTER I\nHello over there\n\n\nSecond scene body").unwrap();

        let res = app
            .clone()
            .oneshot(post_json(
                "/v1/ingest",
                serde_json::json!({ "path": doc.to_str().unwrap(), "title": "Doc" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let created = body_json(res).await;
        let work_id = created["work_id"].as_str().unwrap().to_string();
        let chars = created["char_count"].as_u64().unwrap() as usize;
        assert!(created["scene_count"].as_u64().unwrap() >= 2);

        let res = app
            .clone()
            .oneshot(get_req(&format!("/v1/works/{work_id}/scenes")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let scenes = body_json(res).await;
        assert!(scenes.as_array().unwrap().len() >= 2);

        let res = app
            .clone()
            .oneshot(get_req(&format!(
                "/v1/works/{work_id}/slice?start=0&end={chars}"
            )))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert!(body["text"].as_str().unwrap().starts_with("CHAPTER I"));

        // Inverted range
        let res = app
            .clone()
            .oneshot(get_req(&format!("/v1/works/{work_id}/slice?start=5&end=2")))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        // Unknown work
        let res = app
            .oneshot(get_req("/v1/works/missing/slice?start=0&end=1"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resegment_endpoint() {
        let (app, _ingestor, tmp) = setup_router().await;
        let doc = tmp.path().join("doc.txt");
        fs::write(&doc, "Alpha paragraph.\n\nBeta paragraph.\n\nGamma.").unwrap();

        let res = app
            .clone()
            .oneshot(post_json(
                "/v1/ingest",
                serde_json::json!({ "path": doc.to_str().unwrap() }),
            ))
            .await
            .unwrap();
        let work_id = body_json(res).await["work_id"].as_str().unwrap().to_string();

        let res = app
            .clone()
            .oneshot(post_json(
                &format!("/v1/works/{work_id}/resegment"),
                serde_json::json!({ "profile": "sparse", "window_chars": 16, "stride_chars": 8 }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = body_json(res).await;
        assert!(body["scene_count"].as_u64().unwrap() >= 3);

        let res = app
            .oneshot(post_json(
                "/v1/works/missing/resegment",
                serde_json::json!({ "profile": "default" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ingest_unsupported_type_maps_to_415() {
        let (app, _ingestor, tmp) = setup_router().await;
        let doc = tmp.path().join("doc.bin");
        fs::write(&doc, "data").unwrap();

        let res = app
            .oneshot(post_json(
                "/v1/ingest",
                serde_json::json!({ "path": doc.to_str().unwrap() }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
