//! # Session Module
//!
//! One [`GuildAudioSession`] per guild drives playback for that guild: it owns
//! the pending-track queue, the vote sets, the DJ and the live control surface,
//! and it reacts to track lifecycle events from the audio node.
//!
//! ## Concurrency
//!
//! Commands for the same guild may interleave at every `.await`. Session state
//! sits behind a synchronous mutex that is never held across an await, so each
//! check-and-update (vote casting, state transitions) happens atomically between
//! suspension points. The `waiting` and `updating` flags are atomics flipped with
//! a single swap or compare-exchange for the same reason.
//!
//! ## Lifecycle
//!
//! Sessions are created by [`SessionRegistry`] on first use and torn down on a
//! stop, on an idle timeout while waiting for the next track, or when orphaned.
//! A torn-down session is never reused; the registry builds a fresh one.

pub mod platform;
pub mod registry;
pub mod surface;
pub mod vote;

use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        equalizer::EqualizerPreset,
        node::{AudioNode, TrackEvent},
        queue::{QueueWait, SessionQueue},
        track::{LoadResult, SearchQuery, Track},
    },
    config::Config,
    error::{ChannelPlacement, PlatformError, SessionError},
    storage::FavouritesStore,
};

pub use registry::SessionRegistry;

use platform::{
    Authority, ChatPlatform, DeclineReason, Notice, Requester, VoiceMember, VolumeLimit,
};
use registry::SessionMap;
use surface::{ControlAction, ControlSurface, ReactionInput, SurfaceView};
use vote::{required_votes, VoteAction, VoteGate};

/// Tunables shared by every session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub history_depth: u8,
    pub default_volume: u8,
    pub volume_step: u8,
    pub max_queue: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            history_depth: 5,
            default_volume: 100,
            volume_step: 10,
            max_queue: 1000,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            idle_timeout: config.idle_timeout,
            history_depth: config.control_history_depth,
            default_volume: config.default_volume,
            volume_step: 10,
            max_queue: config.max_queue_size,
        }
    }
}

/// Collaborators injected into every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub node: Arc<dyn AudioNode>,
    pub platform: Arc<dyn ChatPlatform>,
    pub favourites: Arc<dyn FavouritesStore>,
    pub settings: SessionSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
    Paused,
}

/// What a voice-state change meant for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceOutcome {
    Unchanged,
    DjReassigned(UserId),
    DjClaimed(UserId),
    /// The session has nothing to play into anymore and should be removed.
    Orphaned,
}

#[derive(Debug)]
struct SessionState {
    connection: ConnectionState,
    playback: PlaybackState,
    current: Option<Track>,
    dj: Option<UserId>,
    voice_channel: Option<ChannelId>,
    text_channel: ChannelId,
    volume: u8,
    equalizer: EqualizerPreset,
    votes: VoteGate,
    surface: Option<ControlSurface>,
    torn_down: bool,
}

/// Result of putting a gated action to the vote.
enum Gate {
    Execute(Authority),
    Pending { votes: usize, required: usize },
}

pub struct GuildAudioSession {
    guild_id: GuildId,
    state: Mutex<SessionState>,
    queue: SessionQueue,
    waiting: AtomicBool,
    updating: AtomicBool,
    deps: SessionDeps,
    registry: Weak<SessionMap>,
}

impl GuildAudioSession {
    pub(crate) fn new(
        guild_id: GuildId,
        text_channel: ChannelId,
        deps: SessionDeps,
        registry: Weak<SessionMap>,
    ) -> Self {
        Self {
            guild_id,
            state: Mutex::new(SessionState {
                connection: ConnectionState::Disconnected,
                playback: PlaybackState::Idle,
                current: None,
                dj: None,
                voice_channel: None,
                text_channel,
                volume: deps.settings.default_volume,
                equalizer: EqualizerPreset::default(),
                votes: VoteGate::default(),
                surface: None,
                torn_down: false,
            }),
            queue: SessionQueue::new(deps.settings.max_queue),
            waiting: AtomicBool::new(false),
            updating: AtomicBool::new(false),
            deps,
            registry,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn connection(&self) -> ConnectionState {
        self.state.lock().connection
    }

    pub fn playback(&self) -> PlaybackState {
        self.state.lock().playback
    }

    pub fn dj(&self) -> Option<UserId> {
        self.state.lock().dj
    }

    pub fn volume(&self) -> u8 {
        self.state.lock().volume
    }

    pub fn equalizer(&self) -> EqualizerPreset {
        self.state.lock().equalizer
    }

    pub fn voice_channel(&self) -> Option<ChannelId> {
        self.state.lock().voice_channel
    }

    pub fn text_channel(&self) -> ChannelId {
        self.state.lock().text_channel
    }

    pub fn current(&self) -> Option<Track> {
        self.state.lock().current.clone()
    }

    pub fn surface(&self) -> Option<ControlSurface> {
        self.state.lock().surface
    }

    pub fn votes(&self, action: VoteAction) -> usize {
        self.state.lock().votes.count(action)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.lock().torn_down
    }

    // -----------------------------------------------------------------------
    // Guards
    // -----------------------------------------------------------------------

    fn is_privileged(state: &SessionState, requester: &Requester) -> bool {
        requester.elevated || state.dj == Some(requester.id)
    }

    /// Rejects commands issued from the wrong text channel, or by unprivileged
    /// members outside the bound voice channel.
    fn check_placement(&self, requester: &Requester) -> Result<(), SessionError> {
        let state = self.state.lock();

        if requester.text_channel != state.text_channel {
            return Err(SessionError::IncorrectChannel(ChannelPlacement::Text(
                state.text_channel,
            )));
        }

        if Self::is_privileged(&state, requester) {
            return Ok(());
        }

        match (state.connection, state.voice_channel) {
            (ConnectionState::Connected, Some(bound)) if requester.voice_channel != Some(bound) => {
                Err(SessionError::IncorrectChannel(ChannelPlacement::Voice(bound)))
            }
            _ => Ok(()),
        }
    }

    fn non_bot_members(&self, channel: Option<ChannelId>) -> usize {
        channel.map_or(0, |channel| {
            self.deps
                .platform
                .voice_members(self.guild_id, channel)
                .iter()
                .filter(|m| !m.bot)
                .count()
        })
    }

    /// Privilege first, then the skip-requester bypass, then the vote.
    fn decide(&self, state: &mut SessionState, action: VoteAction, requester: &Requester) -> Gate {
        if Self::is_privileged(state, requester) {
            state.votes.clear(action);
            return Gate::Execute(Authority::Privileged);
        }

        let requested_current = state
            .current
            .as_ref()
            .is_some_and(|track| track.requester() == requester.id);
        if action == VoteAction::Skip && requested_current {
            state.votes.clear(action);
            return Gate::Execute(Authority::Requester);
        }

        let required = required_votes(action, self.non_bot_members(state.voice_channel));
        let votes = state.votes.cast(action, requester.id);
        debug!(guild_id = %self.guild_id, "🗳️ {} vote {}/{}", action, votes, required);

        if votes >= required {
            state.votes.clear(action);
            Gate::Execute(Authority::Vote)
        } else {
            Gate::Pending { votes, required }
        }
    }

    fn pending(action: VoteAction, requester: &Requester, votes: usize, required: usize) -> Notice {
        Notice::VoteRegistered {
            action,
            voter: requester.id,
            votes,
            required,
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Joins the requester's voice channel, or `explicit` when they are not in one.
    pub async fn connect(
        self: &Arc<Self>,
        requester: &Requester,
        explicit: Option<ChannelId>,
    ) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        let (channel, first) = {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Disconnected || state.torn_down {
                return Ok(Notice::Silent);
            }
            let first = state.voice_channel.is_none();
            match requester.voice_channel.or(explicit) {
                Some(channel) => {
                    state.connection = ConnectionState::Connecting;
                    (channel, first)
                }
                None => {
                    drop(state);
                    if first {
                        self.abandon();
                    }
                    return Err(SessionError::NoChannelAvailable);
                }
            }
        };

        if let Err(e) = self.deps.node.connect(self.guild_id, channel).await {
            error!(guild_id = %self.guild_id, "❌ Voice connect failed: {}", e);
            self.state.lock().connection = ConnectionState::Disconnected;
            if first {
                self.abandon();
            }
            return Err(e.into());
        }

        let pending = {
            let mut state = self.state.lock();
            state.connection = ConnectionState::Connected;
            state.voice_channel = Some(channel);
            if state.dj.is_none() {
                state.dj = Some(requester.id);
            }
            !self.queue.is_empty()
        };
        info!(guild_id = %self.guild_id, "🔊 Session connected to {}", channel);

        // Otro comando pudo encolar mientras conectábamos
        if pending {
            self.spawn_advance();
        }

        Ok(Notice::Connected { channel })
    }

    /// Resolves `query` and appends the result, connecting first when needed.
    pub async fn enqueue(
        self: &Arc<Self>,
        requester: &Requester,
        query: &str,
    ) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        if self.connection() == ConnectionState::Disconnected {
            self.connect(requester, None).await?;
        }

        let query = SearchQuery::parse(query);
        let result = self.deps.node.search(&query).await?;

        let playlist_name = match &result {
            LoadResult::Playlist { name, .. } => Some(name.clone()),
            _ => None,
        };
        let tracks: Vec<Track> = result
            .into_playable()
            .into_iter()
            .map(|info| Track::new(info, requester.id))
            .collect();

        let Some(first_title) = tracks.first().map(|t| t.title().to_string()) else {
            return Ok(Notice::NoMatches);
        };

        let added = self.queue.extend(tracks);
        info!(guild_id = %self.guild_id, "🎵 Queued {} track(s) for {}", added, requester.id);

        let notice = match playlist_name {
            Some(name) => Notice::PlaylistEnqueued { name, count: added },
            None => Notice::Enqueued { title: first_title },
        };

        self.advance().await?;
        Ok(notice)
    }

    pub async fn pause(self: &Arc<Self>, requester: &Requester) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        let gate = {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Connected
                || state.playback == PlaybackState::Paused
            {
                return Ok(Notice::Silent);
            }
            if state.current.is_none() {
                return Ok(Notice::Declined(DeclineReason::NothingPlaying));
            }
            self.decide(&mut state, VoteAction::Pause, requester)
        };

        match gate {
            Gate::Pending { votes, required } => {
                Ok(Self::pending(VoteAction::Pause, requester, votes, required))
            }
            Gate::Execute(by) => {
                self.deps.node.pause(self.guild_id).await?;
                self.state.lock().playback = PlaybackState::Paused;
                info!(guild_id = %self.guild_id, "⏸️ Paused ({:?})", by);
                Ok(Notice::ActionTaken {
                    action: VoteAction::Pause,
                    by,
                })
            }
        }
    }

    pub async fn resume(self: &Arc<Self>, requester: &Requester) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        let gate = {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Connected
                || state.playback != PlaybackState::Paused
            {
                return Ok(Notice::Silent);
            }
            self.decide(&mut state, VoteAction::Resume, requester)
        };

        match gate {
            Gate::Pending { votes, required } => {
                Ok(Self::pending(VoteAction::Resume, requester, votes, required))
            }
            Gate::Execute(by) => {
                self.deps.node.resume(self.guild_id).await?;
                {
                    let mut state = self.state.lock();
                    if state.playback == PlaybackState::Paused {
                        state.playback = PlaybackState::Playing;
                    }
                }
                info!(guild_id = %self.guild_id, "▶️ Resumed ({:?})", by);
                Ok(Notice::ActionTaken {
                    action: VoteAction::Resume,
                    by,
                })
            }
        }
    }

    /// Stops the current track; the node's ended event then advances the queue.
    pub async fn skip(self: &Arc<Self>, requester: &Requester) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        let gate = {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Connected {
                return Ok(Notice::Silent);
            }
            if state.current.is_none() {
                return Ok(Notice::Declined(DeclineReason::NothingPlaying));
            }
            self.decide(&mut state, VoteAction::Skip, requester)
        };

        match gate {
            Gate::Pending { votes, required } => {
                Ok(Self::pending(VoteAction::Skip, requester, votes, required))
            }
            Gate::Execute(by) => {
                self.deps.node.stop(self.guild_id).await?;
                info!(guild_id = %self.guild_id, "⏭️ Skipped ({:?})", by);
                Ok(Notice::ActionTaken {
                    action: VoteAction::Skip,
                    by,
                })
            }
        }
    }

    /// Ends the session.
    pub async fn stop(self: &Arc<Self>, requester: &Requester) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        let gate = {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Connected {
                return Ok(Notice::Silent);
            }
            self.decide(&mut state, VoteAction::Stop, requester)
        };

        match gate {
            Gate::Pending { votes, required } => {
                Ok(Self::pending(VoteAction::Stop, requester, votes, required))
            }
            Gate::Execute(by) => {
                info!(guild_id = %self.guild_id, "⏹️ Stopped ({:?})", by);
                self.teardown().await;
                Ok(Notice::ActionTaken {
                    action: VoteAction::Stop,
                    by,
                })
            }
        }
    }

    pub async fn shuffle(self: &Arc<Self>, requester: &Requester) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        let gate = {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Connected {
                return Ok(Notice::Silent);
            }
            if self.queue.len() < 3 {
                return Ok(Notice::Declined(DeclineReason::QueueTooShort));
            }
            self.decide(&mut state, VoteAction::Shuffle, requester)
        };

        match gate {
            Gate::Pending { votes, required } => {
                Ok(Self::pending(VoteAction::Shuffle, requester, votes, required))
            }
            Gate::Execute(by) => {
                self.queue.shuffle();
                Ok(Notice::ActionTaken {
                    action: VoteAction::Shuffle,
                    by,
                })
            }
        }
    }

    /// Sets the volume to `value` percent. Privileged only, no vote.
    pub async fn set_volume(
        self: &Arc<Self>,
        requester: &Requester,
        value: i64,
    ) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        {
            let state = self.state.lock();
            if state.connection != ConnectionState::Connected {
                return Ok(Notice::Silent);
            }
            if !Self::is_privileged(&state, requester) {
                return Ok(Notice::Declined(DeclineReason::NotPrivileged));
            }
        }

        let volume = u8::try_from(value)
            .ok()
            .filter(|v| (1..=100).contains(v))
            .ok_or(SessionError::OutOfRange(value))?;

        self.apply_volume(volume).await?;
        Ok(Notice::VolumeChanged {
            volume,
            limit: None,
        })
    }

    /// One step of the control surface's volume buttons. Unprivileged presses are ignored.
    pub async fn nudge_volume(
        self: &Arc<Self>,
        requester: &Requester,
        up: bool,
    ) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        let (target, limit) = {
            let state = self.state.lock();
            if state.connection != ConnectionState::Connected
                || !Self::is_privileged(&state, requester)
            {
                return Ok(Notice::Silent);
            }
            let step = i16::from(self.deps.settings.volume_step);
            let wanted = i16::from(state.volume) + if up { step } else { -step };
            match wanted {
                v if v > 100 => (100, Some(VolumeLimit::Max)),
                v if v < 0 => (0, Some(VolumeLimit::Muted)),
                v => (v as u8, None),
            }
        };

        self.apply_volume(target).await?;
        Ok(match limit {
            Some(limit) => Notice::VolumeChanged {
                volume: target,
                limit: Some(limit),
            },
            None => Notice::Silent,
        })
    }

    async fn apply_volume(self: &Arc<Self>, volume: u8) -> Result<(), SessionError> {
        self.deps.node.set_volume(self.guild_id, volume).await?;
        self.state.lock().volume = volume;
        debug!(guild_id = %self.guild_id, "🔊 Volume {}%", volume);
        self.refresh_surface().await;
        Ok(())
    }

    pub async fn set_equalizer(
        self: &Arc<Self>,
        requester: &Requester,
        name: &str,
    ) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        {
            let state = self.state.lock();
            if state.connection != ConnectionState::Connected {
                return Ok(Notice::Silent);
            }
            if !Self::is_privileged(&state, requester) {
                return Ok(Notice::Declined(DeclineReason::NotPrivileged));
            }
        }

        let preset: EqualizerPreset = name.parse().map_err(SessionError::UnknownPreset)?;
        self.deps.node.set_equalizer(self.guild_id, preset).await?;
        self.state.lock().equalizer = preset;

        info!(guild_id = %self.guild_id, "🎛️ Equalizer set to {}", preset);
        Ok(Notice::EqualizerSet {
            preset: preset.to_string(),
        })
    }

    /// Hands DJ to `target`, or to the first other human in the channel.
    pub async fn swap_dj(
        self: &Arc<Self>,
        requester: &Requester,
        target: Option<UserId>,
    ) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        let outcome = {
            let mut state = self.state.lock();
            if state.connection != ConnectionState::Connected {
                return Ok(Notice::Silent);
            }
            if !Self::is_privileged(&state, requester) {
                return Ok(Notice::Declined(DeclineReason::NotPrivileged));
            }

            let members = state.voice_channel.map_or_else(Vec::new, |channel| {
                self.deps.platform.voice_members(self.guild_id, channel)
            });

            let outcome = match target {
                Some(target) if !members.iter().any(|m| m.id == target) => {
                    Err(DeclineReason::TargetNotInVoice)
                }
                Some(target) if state.dj == Some(target) => Err(DeclineReason::AlreadyDj),
                _ if members.len() < 3 => Err(DeclineReason::NoMembersToSwap),
                Some(target) => Ok(target),
                None => members
                    .iter()
                    .find(|m| !m.bot && Some(m.id) != state.dj)
                    .map(|m| m.id)
                    .ok_or(DeclineReason::NoMembersToSwap),
            };
            if let Ok(dj) = outcome {
                state.dj = Some(dj);
            }
            outcome
        };

        match outcome {
            Ok(dj) => {
                info!(guild_id = %self.guild_id, "🎧 DJ is now {}", dj);
                self.refresh_surface().await;
                Ok(Notice::DjSwapped { dj })
            }
            Err(reason) => Ok(Notice::Declined(reason)),
        }
    }

    /// Read-only view of the pending titles.
    pub fn queue_snapshot(&self, requester: &Requester) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        if self.connection() != ConnectionState::Connected {
            return Ok(Notice::Silent);
        }
        let titles: Vec<String> = self
            .queue
            .snapshot()
            .iter()
            .map(|t| t.title().to_string())
            .collect();
        if titles.is_empty() {
            return Ok(Notice::Declined(DeclineReason::QueueEmpty));
        }
        Ok(Notice::Queue { titles })
    }

    /// Re-renders the control surface on request.
    pub async fn now_playing(self: &Arc<Self>, requester: &Requester) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        if self.connection() == ConnectionState::Connected {
            self.refresh_surface().await;
        }
        Ok(Notice::Silent)
    }

    /// Enqueues every favourite of the requester, in stored order.
    pub async fn enqueue_favourites(
        self: &Arc<Self>,
        requester: &Requester,
    ) -> Result<Notice, SessionError> {
        self.check_placement(requester)?;

        let uris = self.deps.favourites.favourites(requester.id).await?;
        if uris.is_empty() {
            return Ok(Notice::Favourites { uris });
        }

        if self.connection() == ConnectionState::Disconnected {
            self.connect(requester, None).await?;
        }

        let mut tracks = Vec::with_capacity(uris.len());
        for uri in &uris {
            match self.deps.node.search(&SearchQuery::parse(uri)).await {
                Ok(result) => tracks.extend(
                    result
                        .into_playable()
                        .into_iter()
                        .take(1)
                        .map(|info| Track::new(info, requester.id)),
                ),
                Err(e) => warn!(guild_id = %self.guild_id, "⚠️ Favourite {} did not load: {}", uri, e),
            }
        }

        let count = self.queue.extend(tracks);
        self.advance().await?;
        Ok(Notice::FavouritesEnqueued { count })
    }

    /// Stores the current track's source in the requester's favourites.
    pub async fn mark_favourite(
        self: &Arc<Self>,
        requester: &Requester,
    ) -> Result<Notice, SessionError> {
        let uri = self
            .state
            .lock()
            .current
            .as_ref()
            .and_then(|t| t.uri().map(str::to_string));
        let Some(uri) = uri else {
            return Ok(Notice::Declined(DeclineReason::NothingPlaying));
        };

        let position = self.deps.favourites.add_favourite(requester.id, &uri).await?;
        Ok(Notice::FavouriteAdded { position })
    }

    // -----------------------------------------------------------------------
    // Playback loop
    // -----------------------------------------------------------------------

    fn spawn_advance(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = session.advance().await {
                warn!(guild_id = %session.guild_id, "⚠️ Could not start next track: {}", e);
            }
        });
    }

    /// Starts the next queued track when nothing is playing, waiting for one
    /// up to the idle timeout. Only one caller waits at a time.
    pub async fn advance(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let state = self.state.lock();
            if state.torn_down
                || state.connection != ConnectionState::Connected
                || state.current.is_some()
            {
                return Ok(());
            }
        }
        if self.waiting.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let track = match self.queue.take_next(self.deps.settings.idle_timeout).await {
            Ok(track) => track,
            Err(QueueWait::TimedOut) => {
                self.waiting.store(false, Ordering::Release);
                info!(guild_id = %self.guild_id, "💤 Idle for {:?}, leaving", self.deps.settings.idle_timeout);
                self.teardown().await;
                return Ok(());
            }
            Err(QueueWait::Closed) => {
                self.waiting.store(false, Ordering::Release);
                return Ok(());
            }
        };

        {
            let mut state = self.state.lock();
            if state.torn_down {
                self.waiting.store(false, Ordering::Release);
                return Ok(());
            }
            state.current = Some(track.clone());
            state.playback = PlaybackState::Loading;
        }

        match self.deps.node.play(self.guild_id, &track).await {
            Ok(()) => {
                let still_current = {
                    let mut state = self.state.lock();
                    let still_current = state
                        .current
                        .as_ref()
                        .is_some_and(|t| t.handle() == track.handle());
                    if still_current {
                        state.playback = PlaybackState::Playing;
                        state.votes.clear_all();
                    }
                    still_current
                };
                self.waiting.store(false, Ordering::Release);
                if !still_current {
                    // Terminó antes de que el nodo confirmara el play
                    debug!(guild_id = %self.guild_id, "⏭️ {} ended while starting", track.title());
                    self.spawn_advance();
                    return Ok(());
                }
                info!(guild_id = %self.guild_id, "🎶 Now playing: {}", track.title());
                self.refresh_surface().await;
                Ok(())
            }
            Err(e) => {
                {
                    let mut state = self.state.lock();
                    state.current = None;
                    state.playback = PlaybackState::Idle;
                }
                self.waiting.store(false, Ordering::Release);
                error!(guild_id = %self.guild_id, "❌ Could not play {}: {}", track.title(), e);
                // Sigue con la cola (o el temporizador de inactividad)
                self.spawn_advance();
                Err(e.into())
            }
        }
    }

    /// Ended, stuck and errored tracks all move on to the next one. Events
    /// about any track other than the current one are ignored.
    pub async fn handle_track_event(self: &Arc<Self>, track: &str, event: TrackEvent) {
        if !self.finish_track(track, &event) {
            return;
        }
        if let Err(e) = self.advance().await {
            warn!(guild_id = %self.guild_id, "⚠️ Could not start next track: {}", e);
        }
    }

    /// Like [`handle_track_event`](Self::handle_track_event), but the
    /// current track is released before returning and the next one is
    /// started in the background.
    pub fn on_track_event(self: &Arc<Self>, track: &str, event: TrackEvent) {
        if self.finish_track(track, &event) {
            self.spawn_advance();
        }
    }

    /// Clears the current track when `track` is its handle.
    fn finish_track(&self, track: &str, event: &TrackEvent) -> bool {
        let title = {
            let mut state = self.state.lock();
            let is_current = state.current.as_ref().is_some_and(|t| t.handle() == track);
            if !is_current {
                debug!(guild_id = %self.guild_id, "Stale track event ignored: {:?}", event);
                return false;
            }
            state.playback = PlaybackState::Idle;
            state.current.take().map(|t| t.title().to_string()).unwrap_or_default()
        };

        match event {
            TrackEvent::Ended(reason) => {
                info!(guild_id = %self.guild_id, "🏁 Track ended ({:?}): {}", reason, title)
            }
            TrackEvent::Stuck { threshold } => {
                warn!(guild_id = %self.guild_id, "🐌 Track stuck for {:?}: {}", threshold, title)
            }
            TrackEvent::Errored { message } => {
                error!(guild_id = %self.guild_id, "💥 Track failed: {} ({})", title, message)
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Voice state
    // -----------------------------------------------------------------------

    /// Keeps the DJ role inside the bound voice channel.
    pub fn on_voice_state(&self, member: VoiceMember, now_in: Option<ChannelId>) -> VoiceOutcome {
        if member.bot {
            return VoiceOutcome::Unchanged;
        }

        let mut state = self.state.lock();
        if state.torn_down {
            return VoiceOutcome::Unchanged;
        }
        let Some(bound) = state.voice_channel else {
            return if state.connection == ConnectionState::Disconnected {
                VoiceOutcome::Orphaned
            } else {
                VoiceOutcome::Unchanged
            };
        };

        let members = self.deps.platform.voice_members(self.guild_id, bound);

        if state.dj == Some(member.id) && now_in != Some(bound) {
            let successor = members
                .iter()
                .find(|m| !m.bot && m.id != member.id)
                .map(|m| m.id);
            return match successor {
                Some(dj) => {
                    state.dj = Some(dj);
                    info!(guild_id = %self.guild_id, "🎧 DJ left, {} takes over", dj);
                    VoiceOutcome::DjReassigned(dj)
                }
                None => {
                    info!(guild_id = %self.guild_id, "👻 DJ left an empty channel");
                    VoiceOutcome::Orphaned
                }
            };
        }

        let dj_present = state
            .dj
            .is_some_and(|dj| members.iter().any(|m| m.id == dj));
        if now_in == Some(bound) && !dj_present {
            state.dj = Some(member.id);
            info!(guild_id = %self.guild_id, "🎧 {} joined a DJ-less channel and is now DJ", member.id);
            return VoiceOutcome::DjClaimed(member.id);
        }

        VoiceOutcome::Unchanged
    }

    // -----------------------------------------------------------------------
    // Control surface
    // -----------------------------------------------------------------------

    fn view(&self, state: &SessionState) -> Option<SurfaceView> {
        let track = state.current.as_ref()?;
        Some(SurfaceView {
            voice_channel: state.voice_channel?,
            title: track.title().to_string(),
            duration: track.duration(),
            queue_len: self.queue.len(),
            volume: state.volume,
            requester: track.requester(),
            dj: state.dj,
            uri: track.uri().map(str::to_string),
            thumbnail: track.thumbnail().map(str::to_string),
        })
    }

    /// Posts, re-posts or edits the control surface. A refresh requested while
    /// another is in flight is dropped.
    pub async fn refresh_surface(self: &Arc<Self>) {
        if self
            .updating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(guild_id = %self.guild_id, "Surface refresh already running");
            return;
        }

        if let Err(e) = self.refresh_inner().await {
            warn!(guild_id = %self.guild_id, "⚠️ Control surface refresh failed: {}", e);
        }

        self.updating.store(false, Ordering::Release);
    }

    async fn refresh_inner(self: &Arc<Self>) -> Result<(), PlatformError> {
        let (view, existing, channel) = {
            let state = self.state.lock();
            if state.torn_down {
                return Ok(());
            }
            let Some(view) = self.view(&state) else {
                return Ok(());
            };
            (view, state.surface, state.text_channel)
        };
        let platform = &self.deps.platform;

        if let Some(surface) = existing {
            let fresh = match platform
                .recent_messages(surface.channel, self.deps.settings.history_depth)
                .await
            {
                Ok(recent) => recent.contains(&surface.message),
                Err(_) => false,
            };

            if fresh {
                match platform.edit_surface(surface.channel, surface.message, &view).await {
                    Ok(()) => return Ok(()),
                    Err(PlatformError::UnknownMessage) => {}
                    Err(e) => return Err(e),
                }
            } else if let Err(e) = platform.delete_message(surface.channel, surface.message).await {
                debug!(guild_id = %self.guild_id, "Old surface not deleted: {}", e);
            }
        }

        let message = platform.post_surface(channel, &view).await?;

        let torn_down = {
            let mut state = self.state.lock();
            if !state.torn_down {
                state.surface = Some(ControlSurface { channel, message });
            }
            state.torn_down
        };
        if torn_down {
            // La sesión terminó mientras publicábamos
            let _ = platform.delete_message(channel, message).await;
        }
        Ok(())
    }

    /// Routes a reaction on the live surface to the matching command.
    pub async fn handle_reaction(self: &Arc<Self>, input: ReactionInput) {
        if input.member.bot {
            return;
        }

        let (surface, voice_channel, text_channel) = {
            let state = self.state.lock();
            (state.surface, state.voice_channel, state.text_channel)
        };
        let Some(surface) = surface.filter(|s| s.message == input.message_id) else {
            return;
        };
        let Some(voice_channel) = voice_channel else {
            return;
        };
        let present = self
            .deps
            .platform
            .voice_members(self.guild_id, voice_channel)
            .iter()
            .any(|m| m.id == input.member.id);
        if !present {
            return;
        }
        let Some(action) = ControlAction::from_emoji(&input.emoji) else {
            return;
        };

        let requester = Requester {
            id: input.member.id,
            bot: false,
            elevated: input.elevated,
            text_channel,
            voice_channel: Some(voice_channel),
        };
        debug!(guild_id = %self.guild_id, "🎛️ {:?} from {}", action, requester.id);

        let notice = self
            .dispatch_control(action, &requester)
            .await
            .unwrap_or_else(|e| Notice::Failed(e.user_message()));
        if !notice.is_silent() {
            if let Err(e) = self.deps.platform.announce(text_channel, &notice).await {
                debug!(guild_id = %self.guild_id, "Notice not sent: {}", e);
            }
        }

        if action.removes_reaction() {
            let removed = self
                .deps
                .platform
                .remove_reaction(surface.channel, surface.message, requester.id, action)
                .await;
            if let Err(e) = removed {
                debug!(guild_id = %self.guild_id, "Reaction not removed: {}", e);
            }
        }
    }

    async fn dispatch_control(
        self: &Arc<Self>,
        action: ControlAction,
        requester: &Requester,
    ) -> Result<Notice, SessionError> {
        match action {
            ControlAction::Resume => self.resume(requester).await,
            ControlAction::Pause => self.pause(requester).await,
            ControlAction::Stop => self.stop(requester).await,
            ControlAction::Skip => self.skip(requester).await,
            ControlAction::Shuffle => self.shuffle(requester).await,
            ControlAction::VolumeUp => self.nudge_volume(requester, true).await,
            ControlAction::VolumeDown => self.nudge_volume(requester, false).await,
            ControlAction::ShowQueue => self.queue_snapshot(requester),
            ControlAction::MarkFavourite => self.mark_favourite(requester).await,
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Best effort: every step runs even when an earlier one fails.
    pub async fn teardown(self: &Arc<Self>) {
        let surface = {
            let mut state = self.state.lock();
            if state.torn_down {
                return;
            }
            state.torn_down = true;
            state.connection = ConnectionState::Disconnected;
            state.playback = PlaybackState::Idle;
            state.current = None;
            state.votes.clear_all();
            state.surface.take()
        };

        self.queue.close();

        if let Some(surface) = surface {
            if let Err(e) = self
                .deps
                .platform
                .delete_message(surface.channel, surface.message)
                .await
            {
                debug!(guild_id = %self.guild_id, "Surface already gone: {}", e);
            }
        }

        if let Err(e) = self.deps.node.disconnect(self.guild_id).await {
            warn!(guild_id = %self.guild_id, "⚠️ Node disconnect failed: {}", e);
        }

        self.deregister();
        info!(guild_id = %self.guild_id, "👋 Session closed");
    }

    /// Drops a session that never reached voice, so the guild's next
    /// command starts a fresh one bound to its own text channel.
    fn abandon(&self) {
        {
            let mut state = self.state.lock();
            state.torn_down = true;
            state.connection = ConnectionState::Disconnected;
        }
        self.queue.close();
        self.deregister();
        debug!(guild_id = %self.guild_id, "🗑️ Session dropped before its first connect");
    }

    fn deregister(&self) {
        if let Some(sessions) = self.registry.upgrade() {
            sessions.remove_if(&self.guild_id, |_, session| std::ptr::eq(Arc::as_ptr(session), self));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::node::{EndReason, MockAudioNode},
        error::NodeError,
        testing::{
            handle, harness, harness_with_node, member, requester, NodeCall, DJ, GUILD, TEXT,
            VOICE,
        },
    };
    use pretty_assertions::assert_eq;
    use serenity::model::id::MessageId;

    fn ended() -> TrackEvent {
        TrackEvent::Ended(EndReason::Finished)
    }

    #[tokio::test]
    async fn enqueue_order_is_playback_order() {
        let h = harness();
        let dj = requester(DJ);
        for query in ["A", "B", "C"] {
            h.session.enqueue(&dj, query).await.unwrap();
        }
        assert_eq!(h.node.plays(), vec!["A"]);

        h.session.handle_track_event(&handle("A"), ended()).await;
        h.session.handle_track_event(&handle("B"), ended()).await;

        assert_eq!(h.node.plays(), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn failed_track_advances_only_once() {
        let h = harness();
        let dj = requester(DJ);
        for query in ["A", "B", "C"] {
            h.session.enqueue(&dj, query).await.unwrap();
        }

        h.session
            .handle_track_event(
                &handle("A"),
                TrackEvent::Errored {
                    message: "This video is unavailable".into(),
                },
            )
            .await;
        h.session
            .handle_track_event(&handle("A"), TrackEvent::Ended(EndReason::LoadFailed))
            .await;

        assert_eq!(h.node.plays(), vec!["A", "B"]);
        assert_eq!(h.session.current().unwrap().title(), "B");
        assert_eq!(h.session.queue_len(), 1);
    }

    #[tokio::test]
    async fn late_event_after_idle_keeps_waiting() {
        let h = harness();
        let dj = requester(DJ);
        h.session.enqueue(&dj, "A").await.unwrap();
        h.session.on_track_event(&handle("A"), ended());
        assert!(h.session.current().is_none());

        h.session.on_track_event(&handle("A"), TrackEvent::Ended(EndReason::Cleanup));
        h.session.enqueue(&dj, "B").await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(h.node.plays(), vec!["A", "B"]);
        assert_eq!(h.session.current().unwrap().title(), "B");
    }

    #[tokio::test]
    async fn first_connect_makes_the_requester_dj() {
        let h = harness();
        let notice = h.session.connect(&requester(DJ), None).await.unwrap();

        assert_eq!(notice, Notice::Connected { channel: VOICE });
        assert_eq!(h.session.dj(), Some(DJ));
        assert_eq!(h.session.connection(), ConnectionState::Connected);

        let again = h.session.connect(&requester(UserId::new(2)), None).await.unwrap();
        assert_eq!(again, Notice::Silent);
        assert_eq!(h.session.dj(), Some(DJ));
    }

    #[tokio::test]
    async fn connect_without_any_channel_fails() {
        let h = harness();
        let lost = Requester {
            voice_channel: None,
            ..requester(DJ)
        };
        let err = h.session.connect(&lost, None).await.unwrap_err();
        assert!(matches!(err, SessionError::NoChannelAvailable));
        assert_eq!(h.session.connection(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn failed_first_connect_frees_the_guild() {
        let h = harness();
        let lost = Requester {
            voice_channel: None,
            ..requester(DJ)
        };
        let err = h.session.enqueue(&lost, "A").await.unwrap_err();
        assert!(matches!(err, SessionError::NoChannelAvailable));
        assert!(h.session.is_torn_down());
        assert!(h.registry.get(GUILD).is_none());

        let elsewhere = ChannelId::new(2001);
        let fresh = h.registry.get_or_create(GUILD, elsewhere);
        let author = Requester {
            text_channel: elsewhere,
            ..requester(DJ)
        };
        fresh.enqueue(&author, "A").await.unwrap();
        assert_eq!(fresh.connection(), ConnectionState::Connected);
        assert_eq!(h.node.plays(), vec!["A"]);
    }

    #[tokio::test]
    async fn node_refusing_first_connect_frees_the_guild() {
        let mut node = MockAudioNode::new();
        node.expect_connect()
            .times(1)
            .returning(|_, _| Err(NodeError::NoNodeAvailable));
        node.expect_play().never();
        let h = harness_with_node(Arc::new(node));

        let err = h.session.connect(&requester(DJ), None).await.unwrap_err();
        assert!(matches!(err, SessionError::NodeUnavailable(_)));
        assert!(h.registry.get(GUILD).is_none());
    }

    #[tokio::test]
    async fn five_member_pause_needs_two_votes() {
        let h = harness();
        h.platform.set_members(VOICE, &[(1, false), (2, false), (3, false), (4, false), (5, false)]);
        h.session.enqueue(&requester(DJ), "A").await.unwrap();

        let first = h.session.pause(&requester(UserId::new(2))).await.unwrap();
        assert_eq!(
            first,
            Notice::VoteRegistered {
                action: VoteAction::Pause,
                voter: UserId::new(2),
                votes: 1,
                required: 2
            }
        );
        assert_eq!(h.session.playback(), PlaybackState::Playing);

        // Votar dos veces no suma
        h.session.pause(&requester(UserId::new(2))).await.unwrap();
        assert_eq!(h.session.votes(VoteAction::Pause), 1);

        let second = h.session.pause(&requester(UserId::new(3))).await.unwrap();
        assert_eq!(
            second,
            Notice::ActionTaken {
                action: VoteAction::Pause,
                by: Authority::Vote
            }
        );
        assert_eq!(h.session.playback(), PlaybackState::Paused);
        assert_eq!(h.session.votes(VoteAction::Pause), 0);
        assert!(h.node.calls().contains(&NodeCall::Pause));
    }

    #[tokio::test]
    async fn privileged_skip_plays_the_next_track() {
        let h = harness();
        h.platform.set_members(VOICE, &[(1, false), (2, false), (3, false), (4, false)]);
        let dj = requester(DJ);
        for query in ["X", "Y", "Z"] {
            h.session.enqueue(&dj, query).await.unwrap();
        }
        h.session.skip(&requester(UserId::new(2))).await.unwrap();
        assert_eq!(h.session.votes(VoteAction::Skip), 1);

        let notice = h.session.skip(&dj).await.unwrap();
        assert_eq!(
            notice,
            Notice::ActionTaken {
                action: VoteAction::Skip,
                by: Authority::Privileged
            }
        );
        h.session
            .handle_track_event(&handle("X"), TrackEvent::Ended(EndReason::Stopped))
            .await;

        let calls = h.node.calls();
        let stop_at = calls.iter().position(|c| *c == NodeCall::Stop).unwrap();
        assert_eq!(calls[stop_at + 1], NodeCall::Play("Y".into()));
        assert_eq!(h.session.votes(VoteAction::Skip), 0);
        assert_eq!(h.session.current().unwrap().title(), "Y");
    }

    #[tokio::test]
    async fn requester_can_skip_their_own_track() {
        let h = harness();
        h.platform.set_members(VOICE, &[(1, false), (2, false), (3, false), (4, false)]);
        let listener = requester(UserId::new(2));
        h.session.connect(&requester(DJ), None).await.unwrap();
        h.session.enqueue(&listener, "mine").await.unwrap();

        let notice = h.session.skip(&listener).await.unwrap();
        assert_eq!(
            notice,
            Notice::ActionTaken {
                action: VoteAction::Skip,
                by: Authority::Requester
            }
        );
    }

    #[tokio::test]
    async fn new_track_clears_every_vote() {
        let h = harness();
        h.platform.set_members(VOICE, &[(1, false), (2, false), (3, false), (4, false), (5, false)]);
        let dj = requester(DJ);
        h.session.enqueue(&dj, "A").await.unwrap();
        h.session.enqueue(&dj, "B").await.unwrap();

        let listener = requester(UserId::new(2));
        h.session.skip(&listener).await.unwrap();
        h.session.stop(&listener).await.unwrap();
        h.session.pause(&listener).await.unwrap();

        h.session.handle_track_event(&handle("A"), ended()).await;

        for action in VoteAction::ALL {
            assert_eq!(h.session.votes(action), 0, "{}", action);
        }
    }

    #[tokio::test]
    async fn stop_with_two_members_needs_both() {
        let h = harness();
        h.platform.set_members(VOICE, &[(1, false), (2, false), (99, true)]);
        h.session.enqueue(&requester(DJ), "A").await.unwrap();

        let listener = requester(UserId::new(2));
        let notice = h.session.stop(&listener).await.unwrap();
        assert!(matches!(notice, Notice::VoteRegistered { required: 2, .. }));
        assert!(!h.session.is_torn_down());
    }

    #[tokio::test]
    async fn shuffle_needs_three_queued_tracks() {
        let h = harness();
        let dj = requester(DJ);
        for query in ["A", "B", "C"] {
            h.session.enqueue(&dj, query).await.unwrap();
        }
        assert_eq!(
            h.session.shuffle(&dj).await.unwrap(),
            Notice::Declined(DeclineReason::QueueTooShort)
        );

        h.session.enqueue(&dj, "D").await.unwrap();
        assert!(matches!(
            h.session.shuffle(&dj).await.unwrap(),
            Notice::ActionTaken { action: VoteAction::Shuffle, .. }
        ));
        assert_eq!(h.session.queue_len(), 3);
    }

    #[tokio::test]
    async fn volume_bounds_are_checked_before_any_rpc() {
        let mut node = MockAudioNode::new();
        node.expect_connect().times(1).returning(|_, _| Ok(()));
        node.expect_set_volume()
            .withf(|_, volume| *volume == 1 || *volume == 100)
            .times(2)
            .returning(|_, _| Ok(()));
        let h = harness_with_node(Arc::new(node));
        let dj = requester(DJ);
        h.session.connect(&dj, None).await.unwrap();

        for bad in [0, 101, -5] {
            let err = h.session.set_volume(&dj, bad).await.unwrap_err();
            assert!(matches!(err, SessionError::OutOfRange(v) if v == bad));
        }
        h.session.set_volume(&dj, 1).await.unwrap();
        h.session.set_volume(&dj, 100).await.unwrap();
        assert_eq!(h.session.volume(), 100);
    }

    #[tokio::test]
    async fn volume_is_privileged_only() {
        let mut node = MockAudioNode::new();
        node.expect_connect().returning(|_, _| Ok(()));
        node.expect_set_volume().never();
        let h = harness_with_node(Arc::new(node));
        h.session.connect(&requester(DJ), None).await.unwrap();

        let listener = requester(UserId::new(2));
        assert_eq!(
            h.session.set_volume(&listener, 50).await.unwrap(),
            Notice::Declined(DeclineReason::NotPrivileged)
        );
        assert_eq!(
            h.session.nudge_volume(&listener, true).await.unwrap(),
            Notice::Silent
        );
    }

    #[tokio::test]
    async fn volume_buttons_clamp_and_report_limits() {
        let h = harness();
        let dj = requester(DJ);
        h.session.connect(&dj, None).await.unwrap();

        assert_eq!(
            h.session.nudge_volume(&dj, true).await.unwrap(),
            Notice::VolumeChanged {
                volume: 100,
                limit: Some(VolumeLimit::Max)
            }
        );
        h.session.set_volume(&dj, 5).await.unwrap();
        assert_eq!(
            h.session.nudge_volume(&dj, false).await.unwrap(),
            Notice::VolumeChanged {
                volume: 0,
                limit: Some(VolumeLimit::Muted)
            }
        );
        assert_eq!(h.session.nudge_volume(&dj, true).await.unwrap(), Notice::Silent);
        assert_eq!(h.session.volume(), 10);
    }

    #[tokio::test]
    async fn equalizer_accepts_only_known_presets() {
        let h = harness();
        let dj = requester(DJ);
        h.session.connect(&dj, None).await.unwrap();

        let err = h.session.set_equalizer(&dj, "jazz").await.unwrap_err();
        assert!(matches!(err, SessionError::UnknownPreset(_)));
        assert!(!h.node.calls().iter().any(|c| matches!(c, NodeCall::Equalizer(_))));

        h.session.set_equalizer(&dj, "Metal").await.unwrap();
        assert_eq!(h.session.equalizer(), EqualizerPreset::Metal);
    }

    #[tokio::test]
    async fn commands_from_another_text_channel_are_rejected() {
        let h = harness();
        let elsewhere = Requester {
            text_channel: ChannelId::new(777),
            ..requester(DJ)
        };
        let err = h.session.enqueue(&elsewhere, "A").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::IncorrectChannel(ChannelPlacement::Text(channel)) if channel == TEXT
        ));
        assert!(h.node.calls().is_empty());
    }

    #[tokio::test]
    async fn listeners_outside_voice_are_rejected() {
        let h = harness();
        h.session.connect(&requester(DJ), None).await.unwrap();
        let outsider = Requester {
            voice_channel: Some(ChannelId::new(555)),
            ..requester(UserId::new(2))
        };
        let err = h.session.pause(&outsider).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::IncorrectChannel(ChannelPlacement::Voice(channel)) if channel == VOICE
        ));
    }

    #[tokio::test]
    async fn commands_are_silent_while_disconnected() {
        let h = harness();
        let dj = requester(DJ);
        assert_eq!(h.session.pause(&dj).await.unwrap(), Notice::Silent);
        assert_eq!(h.session.skip(&dj).await.unwrap(), Notice::Silent);
        assert_eq!(h.session.set_volume(&dj, 0).await.unwrap(), Notice::Silent);
        assert!(h.node.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_play_leaves_nothing_current() {
        let h = harness();
        h.node.fail_play(true);

        let err = h.session.enqueue(&requester(DJ), "A").await.unwrap_err();

        assert!(matches!(err, SessionError::NodeUnavailable(_)));
        assert!(h.session.current().is_none());
        assert_eq!(h.session.playback(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn no_matches_enqueue_nothing() {
        let h = harness();
        h.node.set_result("ytsearch:nothing", crate::audio::track::LoadResult::Empty);
        let notice = h.session.enqueue(&requester(DJ), "nothing").await.unwrap();
        assert_eq!(notice, Notice::NoMatches);
        assert!(h.node.plays().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_tears_down_and_is_rebuilt_fresh() {
        let h = harness();
        let dj = requester(DJ);
        h.session.enqueue(&dj, "A").await.unwrap();
        h.session.set_volume(&dj, 40).await.unwrap();

        let waiter = {
            let session = Arc::clone(&h.session);
            tokio::spawn(async move { session.handle_track_event(&handle("A"), ended()).await })
        };

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert!(h.registry.get(GUILD).is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        waiter.await.unwrap();

        assert!(h.session.is_torn_down());
        assert_eq!(h.session.connection(), ConnectionState::Disconnected);
        assert!(h.registry.get(GUILD).is_none());
        assert!(h.node.calls().contains(&NodeCall::Disconnect));

        let fresh = h.registry.get_or_create(GUILD, TEXT);
        assert!(!Arc::ptr_eq(&fresh, &h.session));
        assert_eq!(fresh.dj(), None);
        assert_eq!(fresh.volume(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn track_arriving_while_idle_wakes_the_waiter() {
        let h = harness();
        let dj = requester(DJ);
        h.session.enqueue(&dj, "A").await.unwrap();
        let waiter = {
            let session = Arc::clone(&h.session);
            tokio::spawn(async move { session.handle_track_event(&handle("A"), ended()).await })
        };
        tokio::time::sleep(Duration::from_secs(60)).await;

        h.session.enqueue(&dj, "B").await.unwrap();
        waiter.await.unwrap();

        assert_eq!(h.node.plays(), vec!["A", "B"]);
        assert!(!h.session.is_torn_down());
    }

    #[tokio::test]
    async fn dj_leaving_hands_over_to_a_remaining_member() {
        let h = harness();
        h.session.connect(&requester(DJ), None).await.unwrap();
        h.platform.set_members(VOICE, &[(2, false), (3, false)]);

        let outcome = h.session.on_voice_state(member(DJ), None);

        assert_eq!(outcome, VoiceOutcome::DjReassigned(UserId::new(2)));
        assert_eq!(h.session.dj(), Some(UserId::new(2)));
    }

    #[tokio::test]
    async fn dj_leaving_an_empty_channel_orphans_the_session() {
        let h = harness();
        h.session.connect(&requester(DJ), None).await.unwrap();
        h.platform.set_members(VOICE, &[(42, true)]);

        assert_eq!(h.session.on_voice_state(member(DJ), None), VoiceOutcome::Orphaned);
    }

    #[tokio::test]
    async fn joining_a_dj_less_channel_claims_dj() {
        let h = harness();
        h.session.connect(&requester(DJ), None).await.unwrap();
        h.platform.set_members(VOICE, &[(3, false)]);

        let outcome = h.session.on_voice_state(member(UserId::new(3)), Some(VOICE));

        assert_eq!(outcome, VoiceOutcome::DjClaimed(UserId::new(3)));
    }

    #[tokio::test]
    async fn swap_dj_picks_first_other_human() {
        let h = harness();
        h.platform.set_members(VOICE, &[(1, false), (50, true), (3, false)]);
        let dj = requester(DJ);
        h.session.connect(&dj, None).await.unwrap();

        assert_eq!(
            h.session.swap_dj(&dj, None).await.unwrap(),
            Notice::DjSwapped { dj: UserId::new(3) }
        );
        assert_eq!(
            h.session.swap_dj(&requester(UserId::new(3)), Some(UserId::new(8))).await.unwrap(),
            Notice::Declined(DeclineReason::TargetNotInVoice)
        );
    }

    #[tokio::test]
    async fn swap_dj_declines_in_small_channels() {
        let h = harness();
        h.platform.set_members(VOICE, &[(1, false), (2, false)]);
        let dj = requester(DJ);
        h.session.connect(&dj, None).await.unwrap();

        assert_eq!(
            h.session.swap_dj(&dj, None).await.unwrap(),
            Notice::Declined(DeclineReason::NoMembersToSwap)
        );
        assert_eq!(
            h.session.swap_dj(&dj, Some(DJ)).await.unwrap(),
            Notice::Declined(DeclineReason::AlreadyDj)
        );
    }

    #[tokio::test]
    async fn surface_is_posted_then_edited_in_place() {
        let h = harness();
        let dj = requester(DJ);
        h.session.enqueue(&dj, "A").await.unwrap();
        assert_eq!(h.platform.posted().len(), 1);

        h.session.now_playing(&dj).await.unwrap();

        assert_eq!(h.platform.posted().len(), 1);
        assert_eq!(h.platform.edited().len(), 1);
    }

    #[tokio::test]
    async fn buried_surface_is_replaced() {
        let h = harness();
        let dj = requester(DJ);
        h.session.enqueue(&dj, "A").await.unwrap();
        let first = h.session.surface().unwrap().message;

        h.platform.chatter(TEXT, 5);
        h.session.now_playing(&dj).await.unwrap();

        let second = h.session.surface().unwrap().message;
        assert_ne!(first, second);
        assert_eq!(h.platform.deleted(), vec![first]);
        assert_eq!(h.platform.posted().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_refreshes_are_dropped() {
        let h = harness();
        h.platform.set_post_delay(Duration::from_secs(1));
        let dj = requester(DJ);
        h.session.connect(&dj, None).await.unwrap();
        h.session.enqueue(&dj, "A").await.unwrap();
        assert_eq!(h.platform.posted().len(), 1);

        h.platform.chatter(TEXT, 5);
        tokio::join!(h.session.refresh_surface(), h.session.refresh_surface());

        assert_eq!(h.platform.posted().len(), 2);
    }

    #[tokio::test]
    async fn reactions_drive_session_commands() {
        let h = harness();
        let dj = requester(DJ);
        h.session.enqueue(&dj, "A").await.unwrap();
        let surface = h.session.surface().unwrap();

        h.session
            .handle_reaction(ReactionInput {
                guild_id: GUILD,
                channel_id: TEXT,
                message_id: surface.message,
                member: member(DJ),
                elevated: false,
                emoji: ControlAction::Pause.emoji().to_string(),
            })
            .await;

        assert_eq!(h.session.playback(), PlaybackState::Paused);
        assert_eq!(h.platform.removed_reactions(), vec![(DJ, ControlAction::Pause)]);
    }

    #[tokio::test]
    async fn foreign_and_bot_reactions_are_ignored() {
        let h = harness();
        h.platform.set_members(VOICE, &[(1, false), (9, true)]);
        let dj = requester(DJ);
        h.session.enqueue(&dj, "A").await.unwrap();
        let surface = h.session.surface().unwrap();

        let reaction = |message_id: MessageId, member: VoiceMember| ReactionInput {
            guild_id: GUILD,
            channel_id: TEXT,
            message_id,
            member,
            elevated: true,
            emoji: ControlAction::Stop.emoji().to_string(),
        };

        h.session.handle_reaction(reaction(MessageId::new(4242), member(DJ))).await;
        h.session
            .handle_reaction(reaction(surface.message, VoiceMember { id: UserId::new(9), bot: true }))
            .await;
        h.session.handle_reaction(reaction(surface.message, member(UserId::new(7)))).await;

        assert!(!h.session.is_torn_down());
        assert!(h.platform.removed_reactions().is_empty());
    }

    #[tokio::test]
    async fn stop_tears_everything_down() {
        let h = harness();
        let dj = requester(DJ);
        h.session.enqueue(&dj, "A").await.unwrap();
        h.session.enqueue(&dj, "B").await.unwrap();
        let surface = h.session.surface().unwrap();

        h.session.stop(&dj).await.unwrap();

        assert!(h.session.is_torn_down());
        assert_eq!(h.session.queue_len(), 0);
        assert!(h.registry.get(GUILD).is_none());
        assert_eq!(h.platform.deleted(), vec![surface.message]);
        assert!(h.node.calls().contains(&NodeCall::Disconnect));
    }

    #[tokio::test]
    async fn teardown_survives_failing_steps() {
        let h = harness();
        let dj = requester(DJ);
        h.session.enqueue(&dj, "A").await.unwrap();
        h.platform.fail_deletes(true);
        h.node.fail_disconnect(true);

        h.session.teardown().await;

        assert!(h.session.is_torn_down());
        assert!(h.registry.get(GUILD).is_none());
    }

    #[tokio::test]
    async fn marking_a_favourite_stores_the_current_uri() {
        let h = harness();
        let dj = requester(DJ);
        h.session.enqueue(&dj, "A").await.unwrap();

        assert_eq!(
            h.session.mark_favourite(&dj).await.unwrap(),
            Notice::FavouriteAdded { position: 1 }
        );
        assert_eq!(
            h.favourites.favourites(DJ).await.unwrap(),
            vec!["https://example.com/A"]
        );
    }

    #[tokio::test]
    async fn favourites_are_enqueued_in_order() {
        let h = harness();
        let dj = requester(DJ);
        for uri in ["https://example.com/one", "https://example.com/two"] {
            h.favourites.add_favourite(DJ, uri).await.unwrap();
        }

        let notice = h.session.enqueue_favourites(&dj).await.unwrap();

        assert_eq!(notice, Notice::FavouritesEnqueued { count: 2 });
        assert_eq!(h.node.plays(), vec!["https://example.com/one"]);
        assert_eq!(h.session.queue_len(), 1);
    }
}
