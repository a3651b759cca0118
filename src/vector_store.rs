//! Índice de recuperación en memoria sobre las instantáneas de la caché.
//!
//! API pública:
//!   - `RetrievalIndex::rebuild(&RegionMap)`: reconstruye todo y publica de golpe.
//!   - `RetrievalIndex::search(&str, usize)`: top-k por similitud coseno.
//!
//! Cada reconstrucción produce una generación nueva e inmutable. Los lectores
//! toman la referencia actual y nunca ven una mezcla de dos generaciones.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    cache::RegionMap,
    embedding::{cosine_similarity, Embedder},
    models::{DocumentMetadata, RegionMusic, RetrievalDocument, ScoredDocument},
};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("se pidieron {requested} resultados pero el índice sólo contiene {available} documentos")]
    CapacityExceeded { requested: usize, available: usize },
    #[error("error generando embeddings: {0}")]
    Embedding(#[from] anyhow::Error),
}

struct IndexedDocument {
    document: RetrievalDocument,
    vector: Vec<f32>,
}

#[derive(Default)]
struct IndexGeneration {
    generation: u64,
    documents: Vec<IndexedDocument>,
    built_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_countries: usize,
    pub generation: u64,
    pub last_updated: Option<String>,
}

pub struct RetrievalIndex {
    embedder: Embedder,
    current: RwLock<Arc<IndexGeneration>>,
    writer: Mutex<()>,
}

impl RetrievalIndex {
    pub fn new(embedder: Embedder) -> Self {
        Self {
            embedder,
            current: RwLock::new(Arc::new(IndexGeneration::default())),
            writer: Mutex::new(()),
        }
    }

    fn current(&self) -> Arc<IndexGeneration> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Sustituye todos los documentos por los derivados de `snapshots`.
    ///
    /// La generación nueva se construye completa antes de publicarse; si el
    /// cálculo de embeddings falla, la generación anterior sigue visible.
    pub async fn rebuild(&self, snapshots: &RegionMap) -> Result<usize, IndexError> {
        let _writer = self.writer.lock().await;

        let mut documents: Vec<RetrievalDocument> = snapshots.values().map(render_document).collect();
        documents.sort_by(|a, b| a.id.cmp(&b.id));

        let texts = documents.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embedder.embed_texts(texts).await?;
        if vectors.len() != documents.len() {
            return Err(IndexError::Embedding(anyhow::anyhow!(
                "se esperaban {} embeddings y llegaron {}",
                documents.len(),
                vectors.len()
            )));
        }

        let generation = IndexGeneration {
            generation: self.current().generation + 1,
            documents: documents
                .into_iter()
                .zip(vectors)
                .map(|(document, vector)| IndexedDocument { document, vector })
                .collect(),
            built_at: Some(Utc::now()),
        };
        let count = generation.documents.len();
        let number = generation.generation;

        *self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(generation);
        info!("Índice de recuperación reconstruido: generación {number}, {count} documentos ({}).", self.embedder.model_name());
        Ok(count)
    }

    /// Devuelve como mucho `k` documentos ordenados por similitud descendente;
    /// los empates se resuelven por id.
    ///
    /// Pedir más resultados de los que contiene el índice es un error del llamador.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>, IndexError> {
        let generation = self.current();
        let available = generation.documents.len();
        if k > available {
            return Err(IndexError::CapacityExceeded { requested: k, available });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed_query(query).await?;
        let mut scored: Vec<(f32, &IndexedDocument)> = generation
            .documents
            .iter()
            .map(|doc| (cosine_similarity(&query_vector, &doc.vector), doc))
            .collect();
        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .total_cmp(score_a)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, doc)| ScoredDocument::new(doc.document.clone(), score))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.current().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> IndexStats {
        let generation = self.current();
        IndexStats {
            total_countries: generation.documents.len(),
            generation: generation.generation,
            last_updated: generation.built_at.map(|t| t.to_rfc3339()),
        }
    }

    /// Resumen legible de los países disponibles.
    pub fn summary(&self) -> String {
        let generation = self.current();
        if generation.documents.is_empty() {
            return "No music data available yet.".to_string();
        }
        let mut names: Vec<&str> = generation
            .documents
            .iter()
            .map(|d| d.document.metadata.country_name.as_str())
            .collect();
        names.sort_unstable();
        format!("I have music data for {} countries: {}", names.len(), names.join(", "))
    }
}

/// Representación textual de una instantánea, tal como se indexa y se pasa al LLM.
pub fn render_document(region: &RegionMusic) -> RetrievalDocument {
    let tracks_text = region
        .tracks
        .iter()
        .map(|t| format!("- {} by {}", t.name, t.artist))
        .collect::<Vec<_>>()
        .join("\n");

    let text = format!(
        "Country: {} ({})\nData Source: {}\nTop Tracks:\n{}\nUpdated: {}",
        region.country_name, region.country_code, region.source, tracks_text, region.updated_at
    );

    RetrievalDocument {
        id: region.country_code.clone(),
        text,
        metadata: DocumentMetadata {
            country_code: region.country_code.clone(),
            country_name: region.country_name.clone(),
            source: region.source.clone(),
            track_count: region.tracks.len(),
            updated_at: region.updated_at.clone(),
        },
    }
}
