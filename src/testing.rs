//! In-memory collaborators for session tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    audio::{
        equalizer::EqualizerPreset,
        node::AudioNode,
        track::{LoadResult, SearchQuery, Track, TrackInfo},
    },
    error::{NodeError, PlatformError, StorageError},
    session::{
        platform::{ChatPlatform, Notice, Requester, VoiceMember},
        surface::{ControlAction, SurfaceView},
        GuildAudioSession, SessionDeps, SessionRegistry, SessionSettings,
    },
    storage::FavouritesStore,
};

pub const GUILD: GuildId = GuildId::new(1000);
pub const TEXT: ChannelId = ChannelId::new(2000);
pub const VOICE: ChannelId = ChannelId::new(3000);
pub const DJ: UserId = UserId::new(1);

/// Node handle the fakes give a track titled `title`.
pub fn handle(title: &str) -> String {
    format!("enc-{}", title)
}

pub fn info(title: &str, secs: u64) -> TrackInfo {
    TrackInfo {
        handle: handle(title),
        identifier: title.to_string(),
        title: title.to_string(),
        duration: Duration::from_secs(secs),
        uri: Some(format!("https://example.com/{}", title)),
        thumbnail: None,
    }
}

pub fn track(title: &str, secs: u64) -> Track {
    Track::new(info(title, secs), DJ)
}

/// A member typing in the session channel while sitting in the session's voice channel.
pub fn requester(id: UserId) -> Requester {
    Requester {
        id,
        bot: false,
        elevated: false,
        text_channel: TEXT,
        voice_channel: Some(VOICE),
    }
}

pub fn member(id: UserId) -> VoiceMember {
    VoiceMember { id, bot: false }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeCall {
    Connect(ChannelId),
    Disconnect,
    Search(String),
    Play(String),
    Pause,
    Resume,
    Stop,
    Seek(Duration),
    Volume(u8),
    Equalizer(EqualizerPreset),
}

/// Records every RPC. Unknown searches resolve to one track named after the query.
#[derive(Default)]
pub struct FakeNode {
    calls: Mutex<Vec<NodeCall>>,
    results: Mutex<HashMap<String, LoadResult>>,
    fail_play: AtomicBool,
    fail_disconnect: AtomicBool,
}

impl FakeNode {
    pub fn calls(&self) -> Vec<NodeCall> {
        self.calls.lock().clone()
    }

    /// Titles sent to `play`, in order.
    pub fn plays(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                NodeCall::Play(title) => Some(title.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn set_result(&self, identifier: &str, result: LoadResult) {
        self.results.lock().insert(identifier.to_string(), result);
    }

    pub fn fail_play(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::SeqCst);
    }

    pub fn fail_disconnect(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    fn record(&self, call: NodeCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl AudioNode for FakeNode {
    async fn connect(&self, _guild_id: GuildId, channel_id: ChannelId) -> Result<(), NodeError> {
        self.record(NodeCall::Connect(channel_id));
        Ok(())
    }

    async fn disconnect(&self, _guild_id: GuildId) -> Result<(), NodeError> {
        self.record(NodeCall::Disconnect);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(NodeError::NoNodeAvailable);
        }
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<LoadResult, NodeError> {
        let identifier = query.identifier();
        self.record(NodeCall::Search(identifier.clone()));
        if let Some(result) = self.results.lock().get(&identifier) {
            return Ok(result.clone());
        }
        let term = identifier.trim_start_matches("ytsearch:");
        Ok(LoadResult::Search(vec![info(term, 180)]))
    }

    async fn play(&self, _guild_id: GuildId, track: &Track) -> Result<(), NodeError> {
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(NodeError::LoadFailed(track.title().to_string()));
        }
        self.record(NodeCall::Play(track.title().to_string()));
        Ok(())
    }

    async fn pause(&self, _guild_id: GuildId) -> Result<(), NodeError> {
        self.record(NodeCall::Pause);
        Ok(())
    }

    async fn resume(&self, _guild_id: GuildId) -> Result<(), NodeError> {
        self.record(NodeCall::Resume);
        Ok(())
    }

    async fn stop(&self, _guild_id: GuildId) -> Result<(), NodeError> {
        self.record(NodeCall::Stop);
        Ok(())
    }

    async fn seek(&self, _guild_id: GuildId, position: Duration) -> Result<(), NodeError> {
        self.record(NodeCall::Seek(position));
        Ok(())
    }

    async fn set_volume(&self, _guild_id: GuildId, volume: u8) -> Result<(), NodeError> {
        self.record(NodeCall::Volume(volume));
        Ok(())
    }

    async fn set_equalizer(
        &self,
        _guild_id: GuildId,
        preset: EqualizerPreset,
    ) -> Result<(), NodeError> {
        self.record(NodeCall::Equalizer(preset));
        Ok(())
    }
}

/// Chat platform with per-channel message history and voice membership.
#[derive(Default)]
pub struct FakePlatform {
    members: Mutex<HashMap<ChannelId, Vec<VoiceMember>>>,
    history: Mutex<HashMap<ChannelId, Vec<MessageId>>>,
    next_id: AtomicU64,
    posted: Mutex<Vec<MessageId>>,
    edited: Mutex<Vec<MessageId>>,
    deleted: Mutex<Vec<MessageId>>,
    removed: Mutex<Vec<(UserId, ControlAction)>>,
    notices: Mutex<Vec<Notice>>,
    post_delay: Mutex<Option<Duration>>,
    fail_deletes: AtomicBool,
}

impl FakePlatform {
    /// Replaces the members of `channel` with `(user id, is bot)` pairs, in order.
    pub fn set_members(&self, channel: ChannelId, members: &[(u64, bool)]) {
        let members = members
            .iter()
            .map(|(id, bot)| VoiceMember {
                id: UserId::new(*id),
                bot: *bot,
            })
            .collect();
        self.members.lock().insert(channel, members);
    }

    /// Other users post `count` messages in `channel`.
    pub fn chatter(&self, channel: ChannelId, count: usize) {
        for _ in 0..count {
            self.append(channel);
        }
    }

    pub fn set_post_delay(&self, delay: Duration) {
        *self.post_delay.lock() = Some(delay);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn posted(&self) -> Vec<MessageId> {
        self.posted.lock().clone()
    }

    pub fn edited(&self) -> Vec<MessageId> {
        self.edited.lock().clone()
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        self.deleted.lock().clone()
    }

    pub fn removed_reactions(&self) -> Vec<(UserId, ControlAction)> {
        self.removed.lock().clone()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    fn append(&self, channel: ChannelId) -> MessageId {
        let id = MessageId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.history.lock().entry(channel).or_default().push(id);
        id
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    fn voice_members(&self, _guild_id: GuildId, channel: ChannelId) -> Vec<VoiceMember> {
        self.members.lock().get(&channel).cloned().unwrap_or_default()
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<MessageId>, PlatformError> {
        Ok(self
            .history
            .lock()
            .get(&channel)
            .map(|ids| ids.iter().rev().take(usize::from(limit)).copied().collect())
            .unwrap_or_default())
    }

    async fn post_surface(
        &self,
        channel: ChannelId,
        _view: &SurfaceView,
    ) -> Result<MessageId, PlatformError> {
        let delay = *self.post_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let id = self.append(channel);
        self.posted.lock().push(id);
        Ok(id)
    }

    async fn edit_surface(
        &self,
        channel: ChannelId,
        message: MessageId,
        _view: &SurfaceView,
    ) -> Result<(), PlatformError> {
        let exists = self
            .history
            .lock()
            .get(&channel)
            .is_some_and(|ids| ids.contains(&message));
        if !exists {
            return Err(PlatformError::UnknownMessage);
        }
        self.edited.lock().push(message);
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(PlatformError::Forbidden);
        }
        if let Some(ids) = self.history.lock().get_mut(&channel) {
            ids.retain(|id| *id != message);
        }
        self.deleted.lock().push(message);
        Ok(())
    }

    async fn remove_reaction(
        &self,
        _channel: ChannelId,
        _message: MessageId,
        user: UserId,
        action: ControlAction,
    ) -> Result<(), PlatformError> {
        self.removed.lock().push((user, action));
        Ok(())
    }

    async fn announce(&self, channel: ChannelId, notice: &Notice) -> Result<(), PlatformError> {
        self.append(channel);
        self.notices.lock().push(notice.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryFavourites {
    lists: Mutex<HashMap<UserId, Vec<String>>>,
}

#[async_trait]
impl FavouritesStore for MemoryFavourites {
    async fn favourites(&self, user_id: UserId) -> Result<Vec<String>, StorageError> {
        Ok(self.lists.lock().get(&user_id).cloned().unwrap_or_default())
    }

    async fn add_favourite(&self, user_id: UserId, uri: &str) -> Result<usize, StorageError> {
        let mut lists = self.lists.lock();
        let list = lists.entry(user_id).or_default();
        list.push(uri.to_string());
        Ok(list.len())
    }

    async fn remove_favourite(
        &self,
        user_id: UserId,
        index: usize,
    ) -> Result<String, StorageError> {
        let mut lists = self.lists.lock();
        let list = lists.entry(user_id).or_default();
        if index >= list.len() {
            return Err(StorageError::NoSuchFavourite(index + 1));
        }
        Ok(list.remove(index))
    }
}

pub struct Harness<N = FakeNode> {
    pub session: Arc<GuildAudioSession>,
    pub registry: SessionRegistry,
    pub node: Arc<N>,
    pub platform: Arc<FakePlatform>,
    pub favourites: Arc<MemoryFavourites>,
}

/// A registered session for [`GUILD`] whose voice channel holds only [`DJ`].
pub fn harness() -> Harness {
    harness_with_node(Arc::new(FakeNode::default()))
}

pub fn harness_with_node<N: AudioNode + 'static>(node: Arc<N>) -> Harness<N> {
    let platform = Arc::new(FakePlatform::default());
    platform.set_members(VOICE, &[(DJ.get(), false)]);
    let favourites = Arc::new(MemoryFavourites::default());

    let registry = SessionRegistry::new(SessionDeps {
        node: node.clone(),
        platform: platform.clone(),
        favourites: favourites.clone(),
        settings: SessionSettings::default(),
    });
    let session = registry.get_or_create(GUILD, TEXT);

    Harness {
        session,
        registry,
        node,
        platform,
        favourites,
    }
}
