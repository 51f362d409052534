//! What a session needs from the chat platform, and what it tells users.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};

use crate::{
    error::PlatformError,
    session::{
        surface::{ControlAction, SurfaceView},
        vote::VoteAction,
    },
};

/// Someone present in a voice channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceMember {
    pub id: UserId,
    pub bot: bool,
}

/// The member issuing a command, with where they issued it from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub id: UserId,
    pub bot: bool,
    /// Holds the elevated guild permission (kick members).
    pub elevated: bool,
    pub text_channel: ChannelId,
    pub voice_channel: Option<ChannelId>,
}

/// Message and voice-state I/O against the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Members currently in `channel`, in the platform's iteration order.
    fn voice_members(&self, guild_id: GuildId, channel: ChannelId) -> Vec<VoiceMember>;

    /// Ids of the newest `limit` messages in `channel`, newest first.
    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<MessageId>, PlatformError>;

    /// Posts a new control surface and attaches its reaction controls.
    async fn post_surface(
        &self,
        channel: ChannelId,
        view: &SurfaceView,
    ) -> Result<MessageId, PlatformError>;

    async fn edit_surface(
        &self,
        channel: ChannelId,
        message: MessageId,
        view: &SurfaceView,
    ) -> Result<(), PlatformError>;

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError>;

    async fn remove_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        user: UserId,
        action: ControlAction,
    ) -> Result<(), PlatformError>;

    /// Short user-facing feedback in `channel`.
    async fn announce(&self, channel: ChannelId, notice: &Notice) -> Result<(), PlatformError>;
}

/// Who made a gated action happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authority {
    /// The DJ or an elevated member.
    Privileged,
    /// The member who requested the current track (skip only).
    Requester,
    Vote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeLimit {
    Max,
    Muted,
}

/// Why a command did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclineReason {
    NotPrivileged,
    QueueTooShort,
    NoMembersToSwap,
    TargetNotInVoice,
    AlreadyDj,
    NothingPlaying,
    QueueEmpty,
}

/// Outcome of a session command, rendered by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Nothing to tell the user.
    Silent,
    Connected { channel: ChannelId },
    Enqueued { title: String },
    PlaylistEnqueued { name: String, count: usize },
    NoMatches,
    ActionTaken { action: VoteAction, by: Authority },
    VoteRegistered { action: VoteAction, voter: UserId, votes: usize, required: usize },
    VolumeChanged { volume: u8, limit: Option<VolumeLimit> },
    EqualizerSet { preset: String },
    DjSwapped { dj: UserId },
    Declined(DeclineReason),
    Queue { titles: Vec<String> },
    Favourites { uris: Vec<String> },
    FavouritesEnqueued { count: usize },
    FavouriteAdded { position: usize },
    FavouriteRemoved { uri: String },
    /// A command failed; carries text safe to show.
    Failed(String),
}

impl Notice {
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Silent)
    }
}
