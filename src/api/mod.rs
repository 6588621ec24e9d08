// Catalog references accepted by the downloader: open.spotify.com URLs,
// spotify: URIs and bare base62 IDs (treated as tracks).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Track,
    Album,
    Playlist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogReference {
    pub kind: ReferenceKind,
    pub id: String,
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^https?://open\.spotify\.com/(?:intl-[a-z]{2}/)?(track|album|playlist)/([a-zA-Z0-9]+)")
            .expect("static regex")
    })
}

fn uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^spotify:(track|album|playlist):([a-zA-Z0-9]+)$").expect("static regex")
    })
}

fn id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]{22}$").expect("static regex"))
}

impl ReferenceKind {
    fn parse(kind: &str) -> Result<Self> {
        match kind {
            "track" => Ok(ReferenceKind::Track),
            "album" => Ok(ReferenceKind::Album),
            "playlist" => Ok(ReferenceKind::Playlist),
            other => Err(AppError::InvalidInput(format!("Invalid Spotify reference type: {}", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Track => "track",
            ReferenceKind::Album => "album",
            ReferenceKind::Playlist => "playlist",
        }
    }
}

impl CatalogReference {
    /// Parses a Spotify URL like `https://open.spotify.com/album/1A2GTWGtFfWp7KSQTwWOyo`,
    /// a `spotify:track:...` URI or a bare 22-character track ID.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        let captures = url_pattern()
            .captures(input)
            .or_else(|| uri_pattern().captures(input));

        if let Some(captures) = captures {
            return Ok(Self {
                kind: ReferenceKind::parse(&captures[1])?,
                id: captures[2].to_string(),
            });
        }

        if id_pattern().is_match(input) {
            return Ok(Self {
                kind: ReferenceKind::Track,
                id: input.to_string(),
            });
        }

        Err(AppError::InvalidInput(format!("Invalid Spotify reference: {}", input)))
    }

    pub fn url(&self) -> String {
        format!("https://open.spotify.com/{}/{}", self.kind.as_str(), self.id)
    }
}

/// Turns a track identifier into the argument handed to the downloader.
/// Anything that doesn't parse is passed through untouched.
pub fn invocation_target(reference: &str) -> String {
    match CatalogReference::parse(reference) {
        Ok(parsed) if !reference.contains("://") => parsed.url(),
        _ => reference.trim().to_string(),
    }
}
