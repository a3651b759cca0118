use std::sync::{Arc, Mutex};

use crate::{
    cache::RegionCache, config::AppConfig, itunes::ContentFetcher, rag::ChatOrchestrator,
    vector_store::RetrievalIndex,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub cache: Arc<RegionCache>,
    pub index: Arc<RetrievalIndex>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub status: Arc<Mutex<Status>>,
}

/// Estado del refresco en curso, tal como lo consulta el frontend.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}
