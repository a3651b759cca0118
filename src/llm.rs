//! Abstracción sobre Rig para hablar en streaming con los proveedores de LLM
//! (OpenAI y Anthropic), configurados como primario y secundario.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use rig::completion::{CompletionModel, Message};
use rig::streaming::StreamedAssistantContent;
use thiserror::Error;
use tracing::info;

use crate::config::{AppConfig, LlmProvider};
use crate::models::{ChatRole, ChatTurn};

const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u64 = 1000;

/// Marcadores de sobrecarga o límite de peticiones en el texto del error.
const TRANSIENT_MARKERS: [&str; 4] = ["overloaded", "rate_limit", "rate limit", "too many requests"];

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("{0}")]
    Provider(String),
    #[error("generation timed out after {0} s")]
    Timeout(u64),
}

impl LlmError {
    /// Sobrecarga o rate limit: candidatos a cambiar de proveedor.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider(text) => {
                let text = text.to_lowercase();
                TRANSIENT_MARKERS.iter().any(|marker| text.contains(marker))
            }
            Self::Timeout(_) => false,
        }
    }
}

pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

/// Capacidad única de un proveedor: generar en streaming a partir del
/// prompt de sistema, los turnos previos y la consulta actual.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn stream_chat(
        &self,
        system_prompt: String,
        turns: Vec<ChatTurn>,
        query: String,
    ) -> Result<TextStream, LlmError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRole {
    Primary,
    Secondary,
}

impl ProviderRole {
    /// Identificador que usa el cliente ("primary" / "fallback").
    pub fn id(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "fallback",
        }
    }
}

/// Proveedor configurado. Inmutable tras el arranque y compartido entre peticiones.
#[derive(Clone)]
pub struct ProviderHandle {
    pub role: ProviderRole,
    pub provider: LlmProvider,
    pub model: String,
    pub backend: Arc<dyn ChatBackend>,
}

impl ProviderHandle {
    pub fn display_name(&self) -> &'static str {
        self.provider.display_name()
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("role", &self.role)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish()
    }
}

/// Gestor de LLMs: primario y, opcionalmente, secundario.
#[derive(Debug, Clone, Default)]
pub struct LlmManager {
    pub primary: Option<ProviderHandle>,
    pub secondary: Option<ProviderHandle>,
}

impl LlmManager {
    /// Construye los handles a partir de la configuración.
    ///
    /// El primario es `LLM_PROVIDER` si tiene clave; el secundario es el otro
    /// proveedor cuando el fallback está activo y tiene clave.
    pub fn from_config(cfg: &AppConfig) -> Self {
        let handle = |role: ProviderRole, provider: LlmProvider| {
            cfg.api_key_for(provider).map(|key| ProviderHandle {
                role,
                provider,
                model: cfg.model_for(provider).to_string(),
                backend: Arc::new(RigBackend {
                    provider,
                    api_key: key.to_string(),
                    model: cfg.model_for(provider).to_string(),
                }) as Arc<dyn ChatBackend>,
            })
        };

        let primary = handle(ProviderRole::Primary, cfg.llm_provider);
        let secondary = if primary.is_some() && cfg.llm_fallback_enabled {
            handle(ProviderRole::Secondary, cfg.llm_provider.other())
        } else {
            None
        };

        match (&primary, &secondary) {
            (Some(p), Some(s)) => info!("LLM primario: {} ({}), secundario: {} ({})", p.display_name(), p.model, s.display_name(), s.model),
            (Some(p), None) => info!("LLM primario: {} ({}), sin secundario", p.display_name(), p.model),
            _ => info!("Ningún proveedor LLM configurado: el chat responderá con un error de configuración"),
        }

        Self { primary, secondary }
    }

    pub fn is_configured(&self) -> bool {
        self.primary.is_some()
    }

    /// Proveedores disponibles para el endpoint de salud.
    pub fn available(&self) -> Vec<&ProviderHandle> {
        self.primary.iter().chain(self.secondary.iter()).collect()
    }
}

/// Backend real: cliente de Rig según el proveedor.
#[derive(Debug, Clone)]
pub struct RigBackend {
    provider: LlmProvider,
    api_key: String,
    model: String,
}

#[async_trait]
impl ChatBackend for RigBackend {
    async fn stream_chat(
        &self,
        system_prompt: String,
        turns: Vec<ChatTurn>,
        query: String,
    ) -> Result<TextStream, LlmError> {
        use rig::client::CompletionClient as _;
        use rig::providers::{anthropic, openai};

        let history: Vec<Message> = turns.into_iter().map(to_message).collect();

        match self.provider {
            LlmProvider::OpenAI => {
                let client = openai::Client::new(&self.api_key);
                let model = client.completion_model(&self.model);
                stream_with(model, system_prompt, history, query).await
            }
            LlmProvider::Anthropic => {
                let client = anthropic::Client::new(&self.api_key);
                let model = client.completion_model(&self.model);
                stream_with(model, system_prompt, history, query).await
            }
        }
    }
}

async fn stream_with<M>(
    model: M,
    system_prompt: String,
    history: Vec<Message>,
    query: String,
) -> Result<TextStream, LlmError>
where
    M: CompletionModel + 'static,
    M::StreamingResponse: Send + 'static,
{
    let response = model
        .completion_request(Message::user(query))
        .preamble(system_prompt)
        .messages(history)
        .temperature(TEMPERATURE)
        .max_tokens(MAX_TOKENS)
        .stream()
        .await
        .map_err(|e| LlmError::Provider(e.to_string()))?;

    // Sólo interesan los deltas de texto; llamadas a herramientas y
    // razonamiento se descartan.
    Ok(response
        .filter_map(|item| async move {
            match item {
                Ok(StreamedAssistantContent::Text(text)) => Some(Ok(text.text)),
                Ok(_) => None,
                Err(e) => Some(Err(LlmError::Provider(e.to_string()))),
            }
        })
        .boxed())
}

fn to_message(turn: ChatTurn) -> Message {
    match turn.role {
        ChatRole::User => Message::user(turn.content),
        ChatRole::Assistant => Message::assistant(turn.content),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Guion de una llamada: fragmentos emitidos y error final opcional.
    #[derive(Clone, Default)]
    pub(crate) struct Script {
        pub chunks: Vec<&'static str>,
        pub error: Option<&'static str>,
    }

    impl Script {
        pub(crate) fn ok(chunks: &[&'static str]) -> Self {
            Self { chunks: chunks.to_vec(), error: None }
        }

        pub(crate) fn failing(chunks: &[&'static str], error: &'static str) -> Self {
            Self { chunks: chunks.to_vec(), error: Some(error) }
        }
    }

    /// Backend de pruebas que reproduce guiones y registra las llamadas.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        scripts: Mutex<VecDeque<Script>>,
        pub calls: Mutex<Vec<(String, Vec<ChatTurn>, String)>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self { scripts: Mutex::new(scripts.into()), calls: Mutex::default() })
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn stream_chat(
            &self,
            system_prompt: String,
            turns: Vec<ChatTurn>,
            query: String,
        ) -> Result<TextStream, LlmError> {
            self.calls.lock().unwrap().push((system_prompt, turns, query));
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Script::failing(&[], "no quedan guiones"));
            let mut items: Vec<Result<String, LlmError>> =
                script.chunks.iter().map(|c| Ok(c.to_string())).collect();
            if let Some(error) = script.error {
                items.push(Err(LlmError::Provider(error.to_string())));
            }
            Ok(stream::iter(items).boxed())
        }
    }

    pub(crate) fn handle(role: ProviderRole, provider: LlmProvider, backend: Arc<ScriptedBackend>) -> ProviderHandle {
        ProviderHandle { role, provider, model: "test-model".into(), backend }
    }

    #[test]
    fn classifies_overload_and_rate_limit_errors() {
        let overloaded = LlmError::Provider(r#"ProviderError: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#.into());
        assert!(overloaded.is_transient());
        assert!(LlmError::Provider("Rate_Limit_Exceeded".into()).is_transient());
        assert!(LlmError::Provider("HTTP 429 Too Many Requests".into()).is_transient());
        assert!(!LlmError::Provider("invalid x-api-key".into()).is_transient());
        assert!(!LlmError::Timeout(180).is_transient());
    }

    #[test]
    fn timeout_message_is_user_facing_english() {
        assert_eq!(LlmError::Timeout(180).to_string(), "generation timed out after 180 s");
    }

    #[test]
    fn manager_selects_primary_and_secondary_from_keys() {
        let cfg = AppConfig::from_lookup(|key| match key {
            "LLM_PROVIDER" => Some("anthropic".into()),
            "ANTHROPIC_API_KEY" => Some("sk-ant".into()),
            "OPENAI_API_KEY" => Some("sk-oai".into()),
            _ => None,
        })
        .unwrap();
        let manager = LlmManager::from_config(&cfg);
        assert_eq!(manager.primary.as_ref().map(|h| h.provider), Some(LlmProvider::Anthropic));
        assert_eq!(manager.secondary.as_ref().map(|h| h.provider), Some(LlmProvider::OpenAI));
        assert_eq!(manager.available().len(), 2);
    }

    #[test]
    fn manager_without_primary_key_has_no_handles() {
        let cfg = AppConfig::from_lookup(|key| match key {
            "LLM_PROVIDER" => Some("openai".into()),
            "ANTHROPIC_API_KEY" => Some("sk-ant".into()),
            _ => None,
        })
        .unwrap();
        let manager = LlmManager::from_config(&cfg);
        assert!(!manager.is_configured());
        assert!(manager.secondary.is_none());
    }

    #[test]
    fn fallback_disabled_leaves_only_primary() {
        let cfg = AppConfig::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-oai".into()),
            "ANTHROPIC_API_KEY" => Some("sk-ant".into()),
            "LLM_FALLBACK_ENABLED" => Some("false".into()),
            _ => None,
        })
        .unwrap();
        let manager = LlmManager::from_config(&cfg);
        assert!(manager.is_configured());
        assert!(manager.secondary.is_none());
    }
}
