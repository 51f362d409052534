//! Error taxonomy for the music subsystem.
//!
//! Validation failures are reported before any node RPC is issued, node and
//! transport failures collapse into [`SessionError::NodeUnavailable`] so no
//! internal detail reaches the user.

use serenity::model::id::ChannelId;
use thiserror::Error;

/// Errors surfaced by [`GuildAudioSession`](crate::session::GuildAudioSession) commands.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no voice channel to connect to")]
    NoChannelAvailable,

    #[error("volume {0} is outside 1..=100")]
    OutOfRange(i64),

    #[error("unknown equalizer preset `{0}`")]
    UnknownPreset(String),

    #[error("command issued outside the session channel")]
    IncorrectChannel(ChannelPlacement),

    #[error("audio node unavailable")]
    NodeUnavailable(#[from] NodeError),

    #[error("favourites storage failed")]
    Storage(#[from] StorageError),
}

/// Which channel the requester should have used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPlacement {
    Text(ChannelId),
    Voice(ChannelId),
}

impl SessionError {
    /// Text safe to show in chat.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoChannelAvailable => {
                "You must be in a voice channel or provide one to connect to.".to_string()
            }
            Self::OutOfRange(_) => "Please enter a value between 1 and 100.".to_string(),
            Self::UnknownPreset(_) => format!(
                "Invalid EQ provided. Valid EQs:\n\n{}",
                crate::audio::equalizer::EqualizerPreset::names().join("\n")
            ),
            Self::IncorrectChannel(ChannelPlacement::Text(channel)) => {
                format!("You must be in <#{}> for this session.", channel)
            }
            Self::IncorrectChannel(ChannelPlacement::Voice(channel)) => {
                format!("You must be in <#{}> to use voice commands.", channel)
            }
            Self::NodeUnavailable(_) => {
                "Something went wrong while talking to the music node. Please try again.".to_string()
            }
            Self::Storage(StorageError::FavouritesFull(max)) => {
                format!("You already have {} favourites. Remove one first.", max)
            }
            Self::Storage(StorageError::NoSuchFavourite(position)) => {
                format!("There is no favourite at position {}.", position)
            }
            Self::Storage(_) => "Could not access your favourites right now.".to_string(),
        }
    }
}

/// Failures talking to an audio node.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("node answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode node payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid node url: {0}")]
    Url(#[from] url::ParseError),

    #[error("no audio node is ready")]
    NoNodeAvailable,

    #[error("guild {0} is not bound to a node")]
    NotBound(u64),

    #[error("voice gateway join failed: {0}")]
    Gateway(String),

    #[error("node websocket: {0}")]
    Socket(String),

    #[error("track load failed: {0}")]
    LoadFailed(String),
}

/// Failures from the chat platform (message I/O, reactions).
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("chat platform request failed: {0}")]
    Request(String),

    #[error("message not found")]
    UnknownMessage,

    #[error("missing permissions")]
    Forbidden,
}

/// Failures of the favourites store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("favourites list is full ({0} entries)")]
    FavouritesFull(usize),

    #[error("no favourite at position {0}")]
    NoSuchFavourite(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_errors_do_not_leak_into_user_text() {
        let err = SessionError::from(NodeError::Status {
            status: 500,
            body: "java.lang.NullPointerException".to_string(),
        });
        assert!(!err.user_message().contains("NullPointer"));
    }

    #[test]
    fn unknown_preset_lists_valid_names() {
        let msg = SessionError::UnknownPreset("jazz".into()).user_message();
        for name in ["flat", "boost", "metal", "piano"] {
            assert!(msg.contains(name));
        }
    }
}
