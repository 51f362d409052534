use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    audio::node::NodeEvent,
    error::SessionError,
    session::{
        platform::{Notice, VoiceMember},
        surface::ReactionInput,
        GuildAudioSession, SessionDeps, VoiceOutcome,
    },
};

pub(crate) type SessionMap = DashMap<GuildId, Arc<GuildAudioSession>>;

/// Map de sesiones activas, una por guild
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<SessionMap>,
    deps: SessionDeps,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            deps,
        }
    }

    /// Returns the guild's session, creating one bound to `text_channel` on first use.
    pub fn get_or_create(&self, guild_id: GuildId, text_channel: ChannelId) -> Arc<GuildAudioSession> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| {
                debug!(guild_id = %guild_id, "🆕 New session in {}", text_channel);
                Arc::new(GuildAudioSession::new(
                    guild_id,
                    text_channel,
                    self.deps.clone(),
                    Arc::downgrade(&self.sessions),
                ))
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<GuildAudioSession>> {
        self.sessions.get(&guild_id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Routes one node event. Events for guilds without a session are dropped.
    ///
    /// The session's state changes before this returns, so a guild's events
    /// take effect in the order the node sent them.
    pub fn dispatch(&self, event: NodeEvent) {
        match event {
            NodeEvent::Track {
                guild_id,
                track,
                event,
            } => {
                let Some(session) = self.get(guild_id) else {
                    debug!(guild_id = %guild_id, "Track event without a session: {:?}", event);
                    return;
                };
                session.on_track_event(&track, event);
            }
            NodeEvent::TrackStarted { guild_id } => {
                debug!(guild_id = %guild_id, "▶️ Node started track");
            }
            NodeEvent::NodeReady { node_id, resumed } => {
                info!("✅ Node {} ready (resumed: {})", node_id, resumed);
            }
            NodeEvent::NodeLost { node_id } => {
                warn!("⚠️ Node {} lost", node_id);
            }
        }
    }

    /// Drains node events until the stream ends or shutdown is requested.
    pub async fn run_event_pump(
        self,
        mut events: mpsc::UnboundedReceiver<NodeEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
            }
        }
        debug!("Node event pump stopped");
    }

    /// A member's voice state changed in `guild_id`.
    pub fn handle_voice_state(
        &self,
        guild_id: GuildId,
        member: VoiceMember,
        now_in: Option<ChannelId>,
    ) -> VoiceOutcome {
        let Some(session) = self.get(guild_id) else {
            return VoiceOutcome::Unchanged;
        };

        let outcome = session.on_voice_state(member, now_in);
        if outcome == VoiceOutcome::Orphaned {
            info!(guild_id = %guild_id, "👻 Session orphaned, tearing down");
            tokio::spawn(async move { session.teardown().await });
        }
        outcome
    }

    /// The bot itself was removed from voice by someone else.
    pub fn handle_forced_disconnect(&self, guild_id: GuildId) {
        if let Some(session) = self.get(guild_id) {
            info!(guild_id = %guild_id, "🔌 Disconnected from voice externally");
            tokio::spawn(async move { session.teardown().await });
        }
    }

    pub async fn handle_reaction(&self, input: ReactionInput) {
        if let Some(session) = self.get(input.guild_id) {
            session.handle_reaction(input).await;
        }
    }

    pub async fn list_favourites(&self, user_id: UserId) -> Result<Notice, SessionError> {
        let uris = self.deps.favourites.favourites(user_id).await?;
        Ok(Notice::Favourites { uris })
    }

    /// `position` is 1-based, as shown to users.
    pub async fn remove_favourite(
        &self,
        user_id: UserId,
        position: usize,
    ) -> Result<Notice, SessionError> {
        let index = position
            .checked_sub(1)
            .ok_or(crate::error::StorageError::NoSuchFavourite(position))?;
        let uri = self.deps.favourites.remove_favourite(user_id, index).await?;
        Ok(Notice::FavouriteRemoved { uri })
    }

    /// Tears down every live session.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<_> = self.sessions.iter().map(|entry| entry.value().clone()).collect();
        if !sessions.is_empty() {
            info!("🛑 Closing {} session(s)", sessions.len());
        }
        futures::future::join_all(sessions.iter().map(|session| session.teardown())).await;
    }
}
