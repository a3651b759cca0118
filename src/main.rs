// Módulos de la aplicación
mod actions;
mod api;
mod app_state;
mod cache;
mod config;
mod embedding;
mod itunes;
mod llm;
mod models;
mod prompt;
mod rag;
mod refresher;
mod regions;
mod vector_store;

use crate::app_state::{AppState, Status};
use anyhow::{Context, Result};
use axum::{http::HeaderValue, Router};
use std::sync::{Arc, Mutex};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Índice de recuperación, caché y proveedores
    let embedder = embedding::Embedder::from_config(&cfg).context("Error inicializando el embedder")?;
    let index = Arc::new(vector_store::RetrievalIndex::new(embedder));
    let cache = Arc::new(cache::RegionCache::new());
    let llm_manager = llm::LlmManager::from_config(&cfg);
    let orchestrator = Arc::new(rag::ChatOrchestrator::new(
        index.clone(),
        llm_manager,
        cfg.rag_context_limit,
        cfg.generation_timeout,
    ));
    let fetcher: Arc<dyn itunes::ContentFetcher> =
        Arc::new(itunes::ITunesFetcher::new().context("Error creando el cliente HTTP de iTunes")?);

    // 4. Estado compartido de la aplicación
    let status = Arc::new(Mutex::new(Status {
        is_busy: false,
        message: "Servidor listo.".to_string(),
        progress: 0.0,
    }));
    let app_state = AppState {
        config: cfg.clone(),
        cache: cache.clone(),
        index: index.clone(),
        orchestrator,
        fetcher: fetcher.clone(),
        status: status.clone(),
    };

    // 5. Primera carga completa antes de aceptar peticiones; después, refresco periódico
    let refresher = Arc::new(refresher::Refresher::new(
        fetcher,
        cache,
        index,
        status,
        cfg.refresh_batch_size,
        cfg.refresh_batch_delay,
    ));
    if let Err(e) = refresher.refresh(regions::REGIONS).await {
        error!("La carga inicial falló, se reintentará en el próximo ciclo: {e}");
    }
    tokio::spawn(refresher.clone().run_periodic(regions::REGIONS, cfg.update_interval));

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state))
        .fallback_service(ServeDir::new(&cfg.static_dir))
        .layer(cors_layer(&cfg.cors_origins));

    // 7. Iniciar el servidor
    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    info!("🚀 Servidor escuchando en http://{}", cfg.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .context("Error en el servidor HTTP")?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Origen CORS ignorado por no ser válido: {origin}");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
