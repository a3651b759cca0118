use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Router,
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::{
    app_state::{AppState, Status},
    cache::CacheStats,
    models::RegionMusic,
    rag::ChatRequest,
    regions,
    vector_store::IndexStats,
};

/// Intervalo entre actualizaciones del stream de países.
const UPDATE_PERIOD: Duration = Duration::from_secs(30);
const KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(15);
const MAX_SEARCH_LIMIT: usize = 200;

#[derive(Deserialize)]
pub struct SearchPayload {
    query: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
}

fn default_search_limit() -> usize {
    10
}

type ApiError = (StatusCode, Json<Value>);

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/countries", get(list_countries_handler))
        .route("/countries/:code", get(country_handler))
        .route("/search", post(search_handler))
        .route("/stream", get(stream_handler))
        .route("/chat", post(chat_handler))
        .route("/rag/stats", get(rag_stats_handler))
        .route("/rag/summary", get(rag_summary_handler))
        .route("/cache/stats", get(cache_stats_handler))
        .route("/api/status", get(status_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let llm = state.orchestrator.llm();
    let available_llms: Vec<Value> = llm
        .available()
        .into_iter()
        .map(|handle| {
            json!({
                "id": handle.role.id(),
                "name": handle.display_name(),
                "provider": handle.provider.id(),
            })
        })
        .collect();

    Json(json!({
        "status": "ok",
        "service": "GlobeBeats API",
        "countries": state.cache.len(),
        "music_source": state.fetcher.source_label(),
        "search_enabled": true,
        "update_interval_secs": state.config.update_interval.as_secs(),
        "ai_enabled": llm.is_configured(),
        "rag_stats": state.index.stats(),
        "available_llms": available_llms,
    }))
}

#[axum::debug_handler]
async fn list_countries_handler(State(state): State<AppState>) -> Json<Vec<RegionMusic>> {
    Json(state.cache.all_sorted())
}

#[axum::debug_handler]
async fn country_handler(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<RegionMusic>, ApiError> {
    let cached = regions::find(&code).and_then(|region| state.cache.get(region.code));
    cached.map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Country not found"})),
        )
    })
}

#[axum::debug_handler]
async fn search_handler(
    State(state): State<AppState>,
    Json(payload): Json<SearchPayload>,
) -> Result<Json<Value>, ApiError> {
    let query = payload.query.trim();
    if query.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "La consulta de búsqueda no puede estar vacía."})),
        ));
    }

    let limit = payload.limit.clamp(1, MAX_SEARCH_LIMIT);
    match state.fetcher.search_tracks(query, limit).await {
        Ok(tracks) => Ok(Json(json!({
            "query": payload.query,
            "count": tracks.len(),
            "tracks": tracks,
            "source": "iTunes",
        }))),
        Err(e) => {
            error!("Error en la búsqueda de '{}': {}", query, e);
            Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": format!("Error al buscar canciones: {}", e)})),
            ))
        }
    }
}

/// Emite todas las instantáneas en caché cada 30 segundos.
async fn stream_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("Nuevo cliente SSE conectado al stream de países");

    let stream = async_stream::stream! {
        loop {
            let regions = state.cache.all_sorted();
            if !regions.is_empty() {
                match serde_json::to_string(&regions) {
                    Ok(data) => {
                        debug!("SSE: enviando {} países", regions.len());
                        yield Ok(Event::default().event("update").data(data));
                    }
                    Err(e) => warn!("SSE: no se pudo serializar la caché: {}", e),
                }
            }
            tokio::time::sleep(UPDATE_PERIOD).await;
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_PERIOD))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = state
        .orchestrator
        .clone()
        .converse(request)
        .map(|event| Ok(Event::default().event("message").data(event.to_json().to_string())));

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_PERIOD))
}

#[axum::debug_handler]
async fn rag_stats_handler(State(state): State<AppState>) -> Json<IndexStats> {
    Json(state.index.stats())
}

#[axum::debug_handler]
async fn rag_summary_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "summary": state.index.summary() }))
}

#[axum::debug_handler]
async fn cache_stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(
        state
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone(),
    )
}
