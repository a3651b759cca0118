//! Carga y gestión de configuración de la aplicación (refresco de caché,
//! índice de recuperación y proveedores LLM).

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    /// El otro proveedor, candidato a secundario.
    pub fn other(self) -> Self {
        match self {
            Self::OpenAI => Self::Anthropic,
            Self::Anthropic => Self::OpenAI,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    /// Nombre legible que ve el usuario en los avisos del chat.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI (GPT-4)",
            Self::Anthropic => "Anthropic (Claude)",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Embeddings locales por hashing de términos, deterministas y sin red.
    Local,
    OpenAI,
}

impl EmbeddingProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "openai" => Ok(Self::OpenAI),
            other => Err(anyhow!("Proveedor de embeddings no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub cors_origins: Vec<String>,
    pub static_dir: String,

    pub llm_provider: LlmProvider,
    pub openai_api_key: String,
    pub anthropic_api_key: String,
    pub openai_model: String,
    pub anthropic_model: String,
    pub llm_fallback_enabled: bool,

    pub embedding_provider: EmbeddingProvider,
    pub local_embedding_model: String,
    pub llm_embedding_model: String,

    pub update_interval: Duration,
    pub refresh_batch_size: usize,
    pub refresh_batch_delay: Duration,
    pub rag_context_limit: usize,
    pub generation_timeout: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de claves.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let llm_provider = LlmProvider::from_str(&var("LLM_PROVIDER", "openai"))?;
        let embedding_provider = EmbeddingProvider::from_str(&var("EMBEDDING_PROVIDER", "local"))?;

        let cors_origins = var("CORS_ORIGINS", "http://localhost:5173,http://localhost:5174")
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let refresh_batch_size: usize = parse_number(&var("REFRESH_BATCH_SIZE", "5"), "REFRESH_BATCH_SIZE")?;
        if refresh_batch_size == 0 {
            return Err(anyhow!("REFRESH_BATCH_SIZE debe ser mayor que cero"));
        }

        Ok(Self {
            server_addr: var("SERVER_ADDR", "0.0.0.0:8000"),
            cors_origins,
            static_dir: var("STATIC_DIR", "frontend"),
            llm_provider,
            openai_api_key: var("OPENAI_API_KEY", ""),
            anthropic_api_key: var("ANTHROPIC_API_KEY", ""),
            openai_model: var("OPENAI_MODEL", "gpt-4-turbo-preview"),
            anthropic_model: var("ANTHROPIC_MODEL", "claude-sonnet-4-5-20250929"),
            llm_fallback_enabled: parse_bool(&var("LLM_FALLBACK_ENABLED", "true"))
                .ok_or_else(|| anyhow!("LLM_FALLBACK_ENABLED debe ser true/false"))?,
            embedding_provider,
            local_embedding_model: var("LOCAL_EMBEDDING_MODEL", "all-minilm-l6-v2"),
            llm_embedding_model: var("LLM_EMBEDDING_MODEL", "text-embedding-3-small"),
            update_interval: Duration::from_secs(parse_number(&var("UPDATE_INTERVAL", "300"), "UPDATE_INTERVAL")?),
            refresh_batch_size,
            refresh_batch_delay: Duration::from_millis(parse_number(
                &var("REFRESH_BATCH_DELAY_MS", "1000"),
                "REFRESH_BATCH_DELAY_MS",
            )?),
            rag_context_limit: parse_number(&var("RAG_CONTEXT_LIMIT", "10"), "RAG_CONTEXT_LIMIT")?,
            generation_timeout: Duration::from_secs(parse_number(
                &var("GENERATION_TIMEOUT_SECS", "180"),
                "GENERATION_TIMEOUT_SECS",
            )?),
        })
    }

    /// Clave configurada para un proveedor, si la hay.
    pub fn api_key_for(&self, provider: LlmProvider) -> Option<&str> {
        let key = match provider {
            LlmProvider::OpenAI => &self.openai_api_key,
            LlmProvider::Anthropic => &self.anthropic_api_key,
        };
        (!key.is_empty()).then_some(key.as_str())
    }

    pub fn model_for(&self, provider: LlmProvider) -> &str {
        match provider {
            LlmProvider::OpenAI => &self.openai_model,
            LlmProvider::Anthropic => &self.anthropic_model,
        }
    }
}

fn parse_number<T>(raw: &str, key: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.parse::<T>()
        .with_context(|| format!("Valor numérico inválido en {key}: '{raw}'"))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
