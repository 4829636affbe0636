use crate::{
    engine::{EngineError, IncidentService},
    incidents::{IncidentDraft, IncidentRecord, IngestResult, SearchResponse},
    upload::{self, UploadError},
};
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    service: Arc<IncidentService>,
}

async fn start_app(service: Arc<IncidentService>, listen_addr: &str) {
    let signal = shutdown_signal(service.clone());
    let shared_state = Arc::new(SharedState {
        service: service.clone(),
    });

    async fn shutdown_signal(service: Arc<IncidentService>) {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        if service.is_initialized() {
            log::warn!("shutting down, persisting incident store");
            if let Err(err) = service.save() {
                log::error!("failed to persist incident store on shutdown: {err}");
            }
        }
    }

    let app = Router::new()
        .route("/api/status", get(status))
        .route("/api/incidents/upload", post(upload_csv))
        .route("/api/incidents/ingest", post(ingest))
        .route("/api/incidents/search", post(search))
        .route("/api/incidents/:id", get(get_incident))
        .route("/api/debug/embed", post(debug_embed))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await.unwrap();
    log::info!("listening on {listen_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .unwrap();
}

pub fn start_daemon(service: Arc<IncidentService>, listen_addr: String) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(service, &listen_addr).await });
}

/// Wraps engine and upload errors for axum.
#[derive(Debug)]
enum HttpError {
    Engine(EngineError),
    Upload(UploadError),
    NotFound(String),
}

impl From<EngineError> for HttpError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<UploadError> for HttpError {
    fn from(err: UploadError) -> Self {
        Self::Upload(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        match self {
            HttpError::NotFound(what) => (
                axum::http::StatusCode::NOT_FOUND,
                json!({"error": format!("{what} not found")}).to_string(),
            ),
            // Malformed input: the caller can fix it
            HttpError::Upload(err) => (
                axum::http::StatusCode::BAD_REQUEST,
                json!({"error": err.to_string()}).to_string(),
            ),
            HttpError::Engine(err) if err.is_user_error() => (
                axum::http::StatusCode::BAD_REQUEST,
                json!({"error": err.to_string()}).to_string(),
            ),
            // Everything else is a service-level failure
            HttpError::Engine(err) => {
                log::error!("{err:?}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": err.to_string()}).to_string(),
                )
            }
        }
        .into_response()
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    message: String,
    model: String,
    incidents: usize,
}

async fn status(State(state): State<Arc<SharedState>>) -> axum::Json<StatusResponse> {
    let service = &state.service;

    StatusResponse {
        message: "incident-assist is running".to_string(),
        model: service.model_name().to_string(),
        incidents: service.incident_count(),
    }
    .into()
}

async fn upload_csv(
    State(state): State<Arc<SharedState>>,
    body: String,
) -> Result<axum::Json<Vec<IngestResult>>, HttpError> {
    let service = state.service.clone();

    let rows = upload::parse_csv(body.as_bytes())?;
    log::debug!("upload parsed into {} rows", rows.len());

    tokio::task::block_in_place(move || {
        service.ingest_batch(rows).map(Into::into).map_err(Into::into)
    })
}

async fn ingest(
    State(state): State<Arc<SharedState>>,
    Json(rows): Json<Vec<IncidentDraft>>,
) -> Result<axum::Json<Vec<IngestResult>>, HttpError> {
    let service = state.service.clone();

    tokio::task::block_in_place(move || {
        service.ingest_batch(rows).map(Into::into).map_err(Into::into)
    })
}

#[derive(Debug, Clone, Deserialize)]
struct SearchRequest {
    query: String,

    /// Maximum matches to return (config default if omitted)
    #[serde(default)]
    k: Option<usize>,

    /// Minimum similarity [0.0, 1.0] (config default if omitted)
    #[serde(default)]
    min_similarity: Option<f32>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<SearchRequest>,
) -> Result<axum::Json<SearchResponse>, HttpError> {
    let service = state.service.clone();

    log::debug!("payload: {payload:?}");

    tokio::task::block_in_place(move || {
        service
            .search_one(&payload.query, payload.k, payload.min_similarity)
            .map(Into::into)
            .map_err(Into::into)
    })
}

async fn get_incident(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<u64>,
) -> Result<axum::Json<IncidentRecord>, HttpError> {
    let service = state.service.clone();

    let record = tokio::task::block_in_place(move || service.get(id))?;

    // get() reports absence as None rather than an error; surface it as 404
    match record {
        Some(record) => Ok(record.into()),
        None => Err(HttpError::NotFound(format!("incident {id}"))),
    }
}

#[derive(Debug, Deserialize)]
struct EmbedRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct EmbedResponse {
    dimension: usize,
    vector: Vec<f32>,
}

async fn debug_embed(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<EmbedRequest>,
) -> Result<axum::Json<EmbedResponse>, HttpError> {
    let service = state.service.clone();

    tokio::task::block_in_place(move || {
        let vector = service.debug_embed(&payload.text)?;
        Ok(EmbedResponse {
            dimension: vector.len(),
            vector,
        }
        .into())
    })
}
