//! Boundary to the external audio-processing node.
//!
//! Sessions only see the [`AudioNode`] trait; [`LavalinkClient`](super::lavalink::LavalinkClient)
//! is the production implementation.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use crate::{
    audio::{
        equalizer::EqualizerPreset,
        track::{LoadResult, SearchQuery, Track},
    },
    error::NodeError,
};

/// Control RPCs a session issues against its node, keyed by guild.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AudioNode: Send + Sync {
    /// Joins `channel_id` and binds the guild to a node.
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), NodeError>;

    /// Leaves voice and releases the guild's node binding.
    async fn disconnect(&self, guild_id: GuildId) -> Result<(), NodeError>;

    async fn search(&self, query: &SearchQuery) -> Result<LoadResult, NodeError>;

    async fn play(&self, guild_id: GuildId, track: &Track) -> Result<(), NodeError>;

    async fn pause(&self, guild_id: GuildId) -> Result<(), NodeError>;

    async fn resume(&self, guild_id: GuildId) -> Result<(), NodeError>;

    /// Stops the current track; the node answers with a track-ended event.
    async fn stop(&self, guild_id: GuildId) -> Result<(), NodeError>;

    async fn seek(&self, guild_id: GuildId, position: Duration) -> Result<(), NodeError>;

    /// `volume` is a percentage, 0..=100.
    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> Result<(), NodeError>;

    async fn set_equalizer(
        &self,
        guild_id: GuildId,
        preset: EqualizerPreset,
    ) -> Result<(), NodeError>;
}

/// Why a track stopped, as reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Finished,
    LoadFailed,
    Stopped,
    Cleanup,
}

/// Track lifecycle events a session reacts to. All three advance the queue.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackEvent {
    Ended(EndReason),
    Stuck { threshold: Duration },
    Errored { message: String },
}

/// Everything the node side emits.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    TrackStarted { guild_id: GuildId },
    /// `track` is the node handle of the track the event is about.
    Track {
        guild_id: GuildId,
        track: String,
        event: TrackEvent,
    },
    NodeReady { node_id: String, resumed: bool },
    NodeLost { node_id: String },
}
