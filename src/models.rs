//! Modelos de dominio: canciones, instantáneas por país, documentos de
//! recuperación y entradas del chat.

use serde::{Deserialize, Serialize};

/// Canción dentro de una instantánea. Sin identidad propia más allá de su posición.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
}

/// Última instantánea obtenida con éxito para un país.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionMusic {
    pub country_code: String,
    pub country_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub flag: Option<String>,
    pub tracks: Vec<Track>,
    /// Etiqueta de la fuente: "itunes" o "none".
    pub source: String,
    pub updated_at: String,
}

impl RegionMusic {
    pub fn preview_count(&self) -> usize {
        self.tracks.iter().filter(|t| t.preview_url.is_some()).count()
    }
}

/// Metadatos de un documento del índice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub country_code: String,
    pub country_name: String,
    pub source: String,
    pub track_count: usize,
    pub updated_at: String,
}

/// Documento de recuperación, uno por país. Su id es el código de país.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalDocument {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// Resultado de búsqueda: documento, similitud coseno con la consulta y su
/// distancia (`1 - similitud`), que es el campo que lee el frontend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    #[serde(flatten)]
    pub document: RetrievalDocument,
    pub score: f32,
    pub distance: f32,
}

impl ScoredDocument {
    pub fn new(document: RetrievalDocument, score: f32) -> Self {
        Self { document, score, distance: 1.0 - score }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// Turno de la conversación enviado por el cliente.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    #[serde(alias = "text")]
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Playlist ya creada por el usuario; sólo sirve para sesgar el prompt.
///
/// El cliente puede mandar el recuento explícito o la lista de canciones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaylistHint {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "track_count")]
    pub item_count: Option<usize>,
    #[serde(default, skip_serializing)]
    pub tracks: Vec<serde_json::Value>,
}

impl PlaylistHint {
    pub fn named(name: &str, item_count: usize) -> Self {
        Self {
            name: Some(name.to_string()),
            item_count: Some(item_count),
            ..Self::default()
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed")
    }

    pub fn track_count(&self) -> usize {
        self.item_count.unwrap_or(self.tracks.len())
    }
}
