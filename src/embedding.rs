//! Embeddings de texto para el índice de recuperación.
//!
//! `Local` ejecuta un modelo de sentence embeddings en local con fastembed
//! (all-MiniLM-L6-v2 por defecto, 384 dimensiones). El modelo se descarga la
//! primera vez y se reutiliza. `OpenAI` delega en Rig.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::config::{AppConfig, EmbeddingProvider};

pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";
const LOCAL_BATCH_SIZE: usize = 32;

#[derive(Clone)]
pub enum Embedder {
    Local {
        model_name: String,
        model: EmbeddingModel,
        // Se inicializa en el primer uso, dentro de `spawn_blocking`.
        session: Arc<Mutex<Option<TextEmbedding>>>,
    },
    OpenAI { api_key: String, model: String },
    #[cfg(test)]
    Hashed { dims: usize },
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local { model_name, .. } => f.debug_struct("Local").field("model_name", model_name).finish(),
            Self::OpenAI { model, .. } => f.debug_struct("OpenAI").field("model", model).finish(),
            #[cfg(test)]
            Self::Hashed { dims } => f.debug_struct("Hashed").field("dims", dims).finish(),
        }
    }
}

impl Embedder {
    pub fn local(model_name: &str) -> Result<Self> {
        let name = model_name.trim().to_lowercase();
        let model = local_model(&name)?;
        Ok(Self::Local { model_name: name, model, session: Arc::new(Mutex::new(None)) })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        match cfg.embedding_provider {
            EmbeddingProvider::Local => Self::local(&cfg.local_embedding_model),
            EmbeddingProvider::OpenAI => {
                let api_key = cfg.openai_api_key.clone();
                if api_key.is_empty() {
                    return Err(anyhow!("EMBEDDING_PROVIDER=openai requiere OPENAI_API_KEY"));
                }
                Ok(Self::OpenAI { api_key, model: cfg.llm_embedding_model.clone() })
            }
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            Self::Local { model_name, .. } => model_name,
            Self::OpenAI { model, .. } => model,
            #[cfg(test)]
            Self::Hashed { .. } => "test-hashing",
        }
    }

    /// Calcula un embedding por texto, en el mismo orden.
    pub async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            Self::Local { model_name, model, session } => {
                embed_with_fastembed(model_name.clone(), model.clone(), session.clone(), texts).await
            }
            Self::OpenAI { api_key, model } => embed_with_openai(api_key, model, texts).await,
            #[cfg(test)]
            Self::Hashed { dims } => Ok(texts.iter().map(|t| tests::hashed_embedding(t, *dims)).collect()),
        }
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No se pudo generar embedding de la consulta"))
    }
}

/// Modelos locales soportados por nombre de configuración.
fn local_model(name: &str) -> Result<EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(EmbeddingModel::MultilingualE5Small),
        other => bail!(
            "Modelo de embeddings local desconocido: '{other}'. Soportados: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, multilingual-e5-small"
        ),
    }
}

async fn embed_with_fastembed(
    model_name: String,
    model: EmbeddingModel,
    session: Arc<Mutex<Option<TextEmbedding>>>,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>> {
    tokio::task::spawn_blocking(move || {
        let mut guard = session.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            info!("Cargando modelo de embeddings local {model_name}...");
            let loaded = TextEmbedding::try_new(InitOptions::new(model).with_show_download_progress(false))
                .map_err(|e| anyhow!("No se pudo inicializar el modelo de embeddings local: {e}"))?;
            *guard = Some(loaded);
        }
        let Some(embedding) = guard.as_mut() else {
            bail!("modelo de embeddings local no disponible");
        };
        embedding
            .embed(texts, Some(LOCAL_BATCH_SIZE))
            .map_err(|e| anyhow!("Error en el embedding local: {e}"))
    })
    .await?
}

async fn embed_with_openai(api_key: &str, model: &str, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
    use rig::client::EmbeddingsClient as _;
    use rig::embeddings::EmbeddingModel as _;
    use rig::providers::openai;

    let client = openai::Client::new(api_key);
    let embedding_model = client.embedding_model(model);
    let expected = texts.len();
    let embeddings = embedding_model.embed_texts(texts).await?;

    if embeddings.len() != expected {
        return Err(anyhow!(
            "Número de embeddings ({}) distinto al número de textos ({})",
            embeddings.len(),
            expected
        ));
    }

    Ok(embeddings
        .into_iter()
        .map(|e| e.vec.into_iter().map(|x| x as f32).collect())
        .collect())
}

/// Similitud coseno en `[-1.0, 1.0]`; `0.0` para vectores vacíos o de distinta longitud.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}
