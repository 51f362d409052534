//! The live "now playing" message of a session and its reaction controls.

use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::time::Duration;

use crate::session::platform::VoiceMember;

/// Reaction inputs on the control surface, in the order they are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlAction {
    Resume,
    Pause,
    Stop,
    Skip,
    Shuffle,
    VolumeUp,
    VolumeDown,
    ShowQueue,
    MarkFavourite,
}

impl ControlAction {
    pub const ALL: [ControlAction; 9] = [
        Self::Resume,
        Self::Pause,
        Self::Stop,
        Self::Skip,
        Self::Shuffle,
        Self::VolumeUp,
        Self::VolumeDown,
        Self::ShowQueue,
        Self::MarkFavourite,
    ];

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Resume => "\u{25B6}",
            Self::Pause => "\u{23F8}",
            Self::Stop => "\u{23F9}",
            Self::Skip => "\u{23ED}",
            Self::Shuffle => "\u{1F500}",
            Self::VolumeUp => "\u{2795}",
            Self::VolumeDown => "\u{2796}",
            Self::ShowQueue => "\u{1F1F6}",
            Self::MarkFavourite => "\u{2B50}",
        }
    }

    /// Clients may append the emoji presentation selector (U+FE0F); it is ignored.
    pub fn from_emoji(emoji: &str) -> Option<Self> {
        let bare = emoji.trim_end_matches('\u{FE0F}');
        Self::ALL.into_iter().find(|action| action.emoji() == bare)
    }

    /// Whether the member's reaction is taken off the message after handling.
    /// Stop tears the surface down, so there is nothing left to clean.
    pub fn removes_reaction(self) -> bool {
        !matches!(self, Self::Stop)
    }
}

/// Render state for the control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceView {
    pub voice_channel: ChannelId,
    pub title: String,
    pub duration: Duration,
    pub queue_len: usize,
    pub volume: u8,
    pub requester: UserId,
    pub dj: Option<UserId>,
    pub uri: Option<String>,
    pub thumbnail: Option<String>,
}

/// Where the live surface lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSurface {
    pub channel: ChannelId,
    pub message: MessageId,
}

/// A reaction added to some message in a guild.
#[derive(Debug, Clone)]
pub struct ReactionInput {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub member: VoiceMember,
    /// Holds the elevated guild permission (kick members).
    pub elevated: bool,
    pub emoji: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_action_round_trips_through_its_emoji() {
        for action in ControlAction::ALL {
            assert_eq!(ControlAction::from_emoji(action.emoji()), Some(action));
        }
    }

    #[test]
    fn presentation_selector_is_ignored() {
        assert_eq!(
            ControlAction::from_emoji("\u{23F8}\u{FE0F}"),
            Some(ControlAction::Pause)
        );
    }

    #[test]
    fn unknown_emoji_maps_to_nothing() {
        assert_eq!(ControlAction::from_emoji("🎉"), None);
    }

    #[test]
    fn only_stop_keeps_its_reaction() {
        let kept: Vec<_> = ControlAction::ALL
            .into_iter()
            .filter(|a| !a.removes_reaction())
            .collect();
        assert_eq!(kept, vec![ControlAction::Stop]);
    }
}
