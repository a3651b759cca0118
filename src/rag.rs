//! Orquestación del chat RAG en streaming.
//!
//! Flujo por petición:
//!   1. Recupera los N documentos más relevantes del índice.
//!   2. Construye el prompt (acciones, playlists del usuario, contexto).
//!   3. Elige proveedor según la preferencia del cliente.
//!   4. Reenvía los fragmentos según llegan, pasando por el guard de directivas.
//!   5. Ante sobrecarga o rate limit del primario, avisa y repite la
//!      generación completa en el secundario. Un único salto.
//!   6. Cierra siempre con un registro final con la respuesta completa y los contextos.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    actions::DirectiveGuard,
    llm::{LlmError, LlmManager, ProviderHandle},
    models::{ChatTurn, PlaylistHint, ScoredDocument},
    prompt::{build_system_prompt, conversation_turns},
    vector_store::{IndexError, RetrievalIndex},
};

pub const NOT_CONFIGURED_MESSAGE: &str =
    "AI service not configured. Please add OpenAI or Anthropic API key to .env file.";
const BOTH_UNAVAILABLE_MESSAGE: &str = "⚠️ Both AI providers are unavailable. Please try again in a moment.";
const ERROR_EXCERPT_CHARS: usize = 150;

/// Petición de chat tal como la envía el cliente.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
    #[serde(default)]
    pub preferred_llm: Option<String>,
    #[serde(default)]
    pub playlists: Vec<PlaylistHint>,
}

impl ChatRequest {
    pub fn preference(&self) -> ProviderPreference {
        ProviderPreference::parse(self.preferred_llm.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPreference {
    /// Sin preferencia: primario con cambio automático al secundario.
    Auto,
    Primary,
    Fallback,
}

impl ProviderPreference {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("fallback") => Self::Fallback,
            Some("primary") => Self::Primary,
            _ => Self::Auto,
        }
    }
}

/// Eventos que se entregan al cliente, en orden.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Fragmento de texto generado o mensaje de error visible.
    Chunk(String),
    /// Aviso de cambio de proveedor: cierra un sub-mensaje, no el stream.
    Notice(String),
    /// Registro final: respuesta completa del camino que terminó y contextos usados.
    Final {
        full_response: String,
        contexts: Vec<ScoredDocument>,
    },
    /// No hay ningún proveedor configurado.
    NotConfigured,
}

impl ChatEvent {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Chunk(text) => json!({ "chunk": text, "done": false }),
            Self::Notice(text) => json!({ "chunk": text, "done": true }),
            Self::Final { full_response, contexts } => json!({
                "chunk": "",
                "done": true,
                "full_response": full_response,
                "contexts": contexts,
            }),
            Self::NotConfigured => json!({
                "chunk": NOT_CONFIGURED_MESSAGE,
                "done": true,
                "full_response": "",
                "contexts": [],
                "error": "not_configured",
            }),
        }
    }
}

/// Estados de una generación.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    StreamingPrimary,
    NotifyingSwitch,
    StreamingSecondary,
    Failed,
    Done,
}

pub struct ChatOrchestrator {
    index: Arc<RetrievalIndex>,
    llm: LlmManager,
    context_limit: usize,
    generation_timeout: Duration,
}

impl ChatOrchestrator {
    pub fn new(
        index: Arc<RetrievalIndex>,
        llm: LlmManager,
        context_limit: usize,
        generation_timeout: Duration,
    ) -> Self {
        Self { index, llm, context_limit, generation_timeout }
    }

    pub fn llm(&self) -> &LlmManager {
        &self.llm
    }

    /// Recupera contexto pidiendo como mucho lo que el índice contiene.
    async fn retrieve(&self, query: &str) -> Vec<ScoredDocument> {
        let k = self.context_limit.min(self.index.len());
        match self.index.search(query, k).await {
            Ok(contexts) => contexts,
            // El índice se reconstruyó entre la lectura del tamaño y la búsqueda.
            Err(IndexError::CapacityExceeded { available, .. }) => self
                .index
                .search(query, available.min(k))
                .await
                .unwrap_or_default(),
            Err(e) => {
                warn!("No se pudo recuperar contexto para el chat: {e}");
                Vec::new()
            }
        }
    }

    /// Genera la respuesta como una secuencia finita de eventos.
    ///
    /// Soltar el stream cancela la llamada en curso al proveedor.
    pub fn converse(self: Arc<Self>, request: ChatRequest) -> impl Stream<Item = ChatEvent> + Send + 'static {
        async_stream::stream! {
            let request_id = Uuid::new_v4();
            let Some(primary) = self.llm.primary.clone() else {
                warn!("[chat {request_id}] Petición rechazada: no hay proveedor LLM configurado");
                yield ChatEvent::NotConfigured;
                return;
            };
            let secondary = self.llm.secondary.clone();
            let preference = request.preference();
            let contexts = self.retrieve(&request.message).await;
            info!(
                "[chat {request_id}] {} contextos recuperados, preferencia {:?}",
                contexts.len(),
                preference
            );

            let mut phase = Phase::Idle;
            let mut switched = false;
            let mut failed_on: Option<(&'static str, LlmError)> = None;
            let mut full_response = String::new();

            loop {
                match phase {
                    Phase::Idle => {
                        phase = match (preference, secondary.is_some()) {
                            (ProviderPreference::Fallback, true) => Phase::StreamingSecondary,
                            _ => Phase::StreamingPrimary,
                        };
                    }
                    Phase::StreamingPrimary | Phase::StreamingSecondary => {
                        let handle: ProviderHandle = match (phase, &secondary) {
                            (Phase::StreamingSecondary, Some(handle)) => handle.clone(),
                            _ => primary.clone(),
                        };

                        // Cada camino empieza de cero: la respuesta parcial del primario se descarta.
                        full_response.clear();
                        let mut guard = DirectiveGuard::new(&request.playlists);
                        let system_prompt = build_system_prompt(&contexts, &request.playlists);
                        let turns = conversation_turns(&request.conversation_history);
                        let deadline = Instant::now() + self.generation_timeout;
                        let timeout_secs = self.generation_timeout.as_secs();

                        let outcome: Result<(), LlmError> = match timeout_at(
                            deadline,
                            handle.backend.stream_chat(system_prompt, turns, request.message.clone()),
                        )
                        .await
                        {
                            Err(_) => Err(LlmError::Timeout(timeout_secs)),
                            Ok(Err(e)) => Err(e),
                            Ok(Ok(mut upstream)) => loop {
                                match timeout_at(deadline, upstream.next()).await {
                                    Err(_) => break Err(LlmError::Timeout(timeout_secs)),
                                    Ok(None) => break Ok(()),
                                    Ok(Some(Err(e))) => break Err(e),
                                    Ok(Some(Ok(fragment))) => {
                                        let text = guard.push(&fragment);
                                        if !text.is_empty() {
                                            full_response.push_str(&text);
                                            yield ChatEvent::Chunk(text);
                                        }
                                    }
                                }
                            },
                        };

                        let tail = guard.finish();
                        if !tail.is_empty() {
                            full_response.push_str(&tail);
                            yield ChatEvent::Chunk(tail);
                        }
                        for dropped in guard.dropped() {
                            info!("[chat {request_id}] Directiva descartada: {dropped}");
                        }

                        phase = match outcome {
                            Ok(()) => {
                                if let Some(directive) = guard.emitted() {
                                    info!("[chat {request_id}] Directiva emitida: {directive}");
                                }
                                Phase::Done
                            }
                            Err(e) => {
                                warn!("[chat {request_id}] Error de {}: {e}", handle.display_name());
                                let can_switch = phase == Phase::StreamingPrimary
                                    && preference == ProviderPreference::Auto
                                    && secondary.is_some()
                                    && e.is_transient();
                                if can_switch {
                                    Phase::NotifyingSwitch
                                } else {
                                    failed_on = Some((handle.display_name(), e));
                                    Phase::Failed
                                }
                            }
                        };
                    }
                    Phase::NotifyingSwitch => {
                        let fallback_name = secondary.as_ref().map(|h| h.display_name()).unwrap_or_default();
                        warn!(
                            "[chat {request_id}] {} sobrecargado, cambiando a {fallback_name}",
                            primary.display_name()
                        );
                        switched = true;
                        yield ChatEvent::Notice(format!(
                            "⚠️ {} is overloaded. Switching to {fallback_name}...",
                            primary.display_name()
                        ));
                        phase = Phase::StreamingSecondary;
                    }
                    Phase::Failed => {
                        let message = match &failed_on {
                            _ if switched => BOTH_UNAVAILABLE_MESSAGE.to_string(),
                            Some((provider, e)) => {
                                let excerpt: String = e.to_string().chars().take(ERROR_EXCERPT_CHARS).collect();
                                format!("⚠️ {provider} error: {excerpt}")
                            }
                            None => BOTH_UNAVAILABLE_MESSAGE.to_string(),
                        };
                        yield ChatEvent::Chunk(message);
                        phase = Phase::Done;
                    }
                    Phase::Done => {
                        yield ChatEvent::Final {
                            full_response: std::mem::take(&mut full_response),
                            contexts: contexts.clone(),
                        };
                        break;
                    }
                }
            }
        }
    }
}
