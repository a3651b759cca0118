//! Directivas de acción embebidas en el texto generado: `[ACTION:NOMBRE|ARG]`.
//!
//! El parser reconoce las directivas dentro del texto normal. El guard se
//! aplica mientras se reenvían los fragmentos del LLM y descarta las
//! directivas que la UI no debe ejecutar.

use std::fmt;

use crate::models::PlaylistHint;

const OPEN: &str = "[ACTION:";
/// Más allá de esta longitud un `[ACTION:` sin cerrar se reenvía tal cual.
const MAX_DIRECTIVE_LEN: usize = 160;

/// Acciones reconocidas, en orden de prioridad descendente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    /// Centra el globo en un país y muestra sus tendencias. Argumento: código de país.
    SelectCountry,
    /// Crea una playlist nueva. Argumento: consulta libre.
    ShowSongList,
    /// Busca en las listas de tendencias. Argumento: consulta libre.
    SearchAndPlay,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [Self::SelectCountry, Self::ShowSongList, Self::SearchAndPlay];

    pub fn name(self) -> &'static str {
        match self {
            Self::SelectCountry => "SELECT_COUNTRY",
            Self::ShowSongList => "SHOW_SONG_LIST",
            Self::SearchAndPlay => "SEARCH_AND_PLAY",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name.trim())
    }

    /// 1 es la prioridad más alta.
    pub fn priority(self) -> u8 {
        match self {
            Self::SelectCountry => 1,
            Self::ShowSongList => 2,
            Self::SearchAndPlay => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDirective {
    pub kind: ActionKind,
    pub argument: String,
}

impl ActionDirective {
    /// Interpreta un token completo `[ACTION:NOMBRE|ARG]`.
    pub fn parse(token: &str) -> Option<Self> {
        let body = token.strip_prefix(OPEN)?.strip_suffix(']')?;
        let (name, argument) = body.split_once('|')?;
        let kind = ActionKind::from_name(name)?;
        let argument = argument.trim();
        if argument.is_empty() {
            return None;
        }
        let argument = match kind {
            ActionKind::SelectCountry => argument.to_uppercase(),
            _ => argument.to_string(),
        };
        Some(Self { kind, argument })
    }
}

impl fmt::Display for ActionDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}|{}]", OPEN, self.kind.name(), self.argument)
    }
}

/// Todas las directivas reconocidas de un texto, en orden de aparición.
pub fn parse_directives(text: &str) -> Vec<ActionDirective> {
    let mut found = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        let candidate = &rest[start..];
        match candidate.find(']') {
            Some(end) => {
                if let Some(directive) = ActionDirective::parse(&candidate[..=end]) {
                    found.push(directive);
                }
                rest = &candidate[end + 1..];
            }
            None => break,
        }
    }
    found
}

/// Filtro en streaming de directivas.
///
/// Descarta una `SHOW_SONG_LIST` cuya playlist ya existe y cualquier
/// directiva posterior a la primera del turno. Sólo retiene texto mientras
/// puede ser el comienzo de una directiva.
#[derive(Debug)]
pub struct DirectiveGuard {
    existing_playlists: Vec<Vec<String>>,
    pending: String,
    emitted: Option<ActionDirective>,
    dropped: Vec<ActionDirective>,
}

impl DirectiveGuard {
    pub fn new(playlists: &[PlaylistHint]) -> Self {
        Self {
            existing_playlists: playlists
                .iter()
                .filter_map(|p| p.name.as_deref())
                .map(words)
                .filter(|name| !name.is_empty())
                .collect(),
            pending: String::new(),
            emitted: None,
            dropped: Vec::new(),
        }
    }

    /// Procesa un fragmento y devuelve el texto que ya se puede reenviar.
    pub fn push(&mut self, fragment: &str) -> String {
        self.pending.push_str(fragment);
        let mut output = String::new();

        loop {
            let Some(start) = self.pending.find('[') else {
                output.push_str(&self.pending);
                self.pending.clear();
                break;
            };
            output.push_str(&self.pending[..start]);
            let rest = self.pending[start..].to_string();

            if rest.starts_with(OPEN) {
                if let Some(end) = rest.find(']') {
                    let token = &rest[..=end];
                    if let Some(kept) = self.admit(token) {
                        output.push_str(&kept);
                    }
                    self.pending = rest[end + 1..].to_string();
                    continue;
                }
                if rest.len() > MAX_DIRECTIVE_LEN {
                    // No es una directiva: se reenvía el corchete y se sigue analizando.
                    output.push('[');
                    self.pending = rest[1..].to_string();
                    continue;
                }
                self.pending = rest;
                break;
            }

            if rest.len() < OPEN.len() && OPEN.starts_with(rest.as_str()) {
                self.pending = rest;
                break;
            }

            output.push('[');
            self.pending = rest[1..].to_string();
        }

        output
    }

    /// Vacía lo retenido al terminar el stream.
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Directiva que llegó a emitirse en este turno.
    pub fn emitted(&self) -> Option<&ActionDirective> {
        self.emitted.as_ref()
    }

    pub fn dropped(&self) -> &[ActionDirective] {
        &self.dropped
    }

    fn admit(&mut self, token: &str) -> Option<String> {
        let Some(directive) = ActionDirective::parse(token) else {
            return Some(token.to_string());
        };

        let duplicate_playlist = directive.kind == ActionKind::ShowSongList
            && self.playlist_exists(&directive.argument);
        if self.emitted.is_some() || duplicate_playlist {
            self.dropped.push(directive);
            return None;
        }

        self.emitted = Some(directive);
        Some(token.to_string())
    }

    /// Coincide si una de las dos secuencias de palabras contiene a la otra:
    /// "Shakira" cubre "Shakira hits" y "shakira" cubre la playlist "Shakira Hits".
    fn playlist_exists(&self, query: &str) -> bool {
        let query = words(query);
        !query.is_empty()
            && self
                .existing_playlists
                .iter()
                .any(|name| contains_run(name, &query) || contains_run(&query, name))
    }
}

fn words(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}
