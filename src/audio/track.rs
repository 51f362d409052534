use regex::Regex;
use serenity::model::id::UserId;
use std::{sync::OnceLock, time::Duration};

/// Metadata for a playable item as resolved by an audio node, before anyone
/// has requested it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    /// Opaque node-side playback handle (Lavalink's `encoded` blob).
    pub handle: String,
    /// Node-scoped identifier.
    pub identifier: String,
    pub title: String,
    pub duration: Duration,
    pub uri: Option<String>,
    pub thumbnail: Option<String>,
}

/// A resolved track plus the member that asked for it. Never mutated after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    info: TrackInfo,
    requester: UserId,
}

impl Track {
    pub fn new(info: TrackInfo, requester: UserId) -> Self {
        Self { info, requester }
    }

    pub fn handle(&self) -> &str {
        &self.info.handle
    }

    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn duration(&self) -> Duration {
        self.info.duration
    }

    pub fn uri(&self) -> Option<&str> {
        self.info.uri.as_deref()
    }

    pub fn thumbnail(&self) -> Option<&str> {
        self.info.thumbnail.as_deref()
    }

    pub fn requester(&self) -> UserId {
        self.requester
    }
}

/// What a node returned for a search/load request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadResult {
    Empty,
    /// A direct lookup resolved to one track.
    Track(TrackInfo),
    /// Search results, best match first.
    Search(Vec<TrackInfo>),
    Playlist { name: String, tracks: Vec<TrackInfo> },
}

impl LoadResult {
    /// Tracks a `play` request should enqueue, in order: a search contributes
    /// only its best match, a playlist all its entries.
    pub fn into_playable(self) -> Vec<TrackInfo> {
        match self {
            Self::Empty => Vec::new(),
            Self::Track(info) => vec![info],
            Self::Search(results) => results.into_iter().take(1).collect(),
            Self::Playlist { tracks, .. } => tracks,
        }
    }
}

fn is_url(raw: &str) -> bool {
    static URL: OnceLock<Option<Regex>> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"^https?://(?:www\.)?.+").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(raw))
}

/// A user query normalised for the node: URIs are looked up directly, bare
/// terms become a YouTube search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    Direct(String),
    Search(String),
}

impl SearchQuery {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim().trim_start_matches('<').trim_end_matches('>').trim();
        if is_url(trimmed) {
            Self::Direct(trimmed.to_string())
        } else {
            Self::Search(trimmed.to_string())
        }
    }

    /// Identifier understood by the node's load endpoint.
    pub fn identifier(&self) -> String {
        match self {
            Self::Direct(uri) => uri.clone(),
            Self::Search(terms) => format!("ytsearch:{}", terms),
        }
    }
}
