//! Lavalink v4 implementation of [`AudioNode`].
//!
//! Control goes over REST (`/v4/loadtracks`, `/v4/sessions/{sid}/players/{guild}`),
//! lifecycle events arrive on one websocket per node. Discord's voice gateway is
//! joined through songbird without its driver, and the resulting voice
//! credentials are handed to the node that owns the guild.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::{header::AUTHORIZATION, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::Songbird;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::HeaderValue,
    protocol::Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    audio::{
        equalizer::{Band, EqualizerPreset},
        node::{AudioNode, EndReason, NodeEvent, TrackEvent},
        track::{LoadResult, SearchQuery, Track, TrackInfo},
    },
    config::NodeConfig,
    error::NodeError,
};

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const CLIENT_NAME: &str = concat!("shuwy/", env!("CARGO_PKG_VERSION"));

/// One configured node and what we know about its socket session.
#[derive(Debug)]
struct NodeLink {
    config: NodeConfig,
    session_id: RwLock<Option<String>>,
    players: AtomicUsize,
}

impl NodeLink {
    fn new(config: NodeConfig) -> Self {
        Self {
            config,
            session_id: RwLock::new(None),
            players: AtomicUsize::new(0),
        }
    }

    fn id(&self) -> &str {
        &self.config.id
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    fn is_ready(&self) -> bool {
        self.session_id.read().is_some()
    }

    /// Forgets the socket session. Returns whether there was one.
    fn clear_session(&self) -> bool {
        self.session_id.write().take().is_some()
    }

    fn player_url(&self, guild_id: GuildId) -> Result<Url, NodeError> {
        let session_id = self.session_id().ok_or(NodeError::NoNodeAvailable)?;
        Ok(rest_base(&self.config)?.join(&format!(
            "v4/sessions/{}/players/{}",
            session_id, guild_id
        ))?)
    }
}

fn rest_base(config: &NodeConfig) -> Result<Url, NodeError> {
    let scheme = if config.ssl { "https" } else { "http" };
    Ok(Url::parse(&format!("{}://{}:{}/", scheme, config.host, config.port))?)
}

fn socket_url(config: &NodeConfig) -> String {
    let scheme = if config.ssl { "wss" } else { "ws" };
    format!("{}://{}:{}/v4/websocket", scheme, config.host, config.port)
}

/// Asks a node for its version. Used by `--health-check`.
pub async fn probe_node(http: &reqwest::Client, config: &NodeConfig) -> Result<String, NodeError> {
    let url = rest_base(config)?.join("version")?;
    let response = http
        .get(url)
        .header(AUTHORIZATION, &config.password)
        .send()
        .await?;
    Ok(ensure_success(response).await?.text().await?)
}

async fn ensure_success(response: Response) -> Result<Response, NodeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NodeError::Status {
        status: status.as_u16(),
        body,
    })
}

pub struct LavalinkClient {
    http: reqwest::Client,
    nodes: Vec<Arc<NodeLink>>,
    bindings: DashMap<GuildId, Arc<NodeLink>>,
    songbird: Arc<Songbird>,
    user_id: UserId,
    shutdown: CancellationToken,
}

impl LavalinkClient {
    pub fn new(
        nodes: &[NodeConfig],
        user_id: UserId,
        songbird: Arc<Songbird>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            nodes: nodes.iter().cloned().map(NodeLink::new).map(Arc::new).collect(),
            bindings: DashMap::new(),
            songbird,
            user_id,
            shutdown,
        }
    }

    /// Opens one socket per node and returns the merged event stream.
    pub fn start(self: &Arc<Self>) -> mpsc::UnboundedReceiver<NodeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        for link in &self.nodes {
            let client = Arc::clone(self);
            let link = Arc::clone(link);
            let tx = tx.clone();
            tokio::spawn(async move { client.run_socket(link, tx).await });
        }
        rx
    }

    async fn run_socket(&self, link: Arc<NodeLink>, events: mpsc::UnboundedSender<NodeEvent>) {
        let mut attempt = 0u32;

        loop {
            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                outcome = self.socket_session(&link, &events) => outcome,
            };

            if link.clear_session() {
                // Llegó a estar listo: el presupuesto de reintentos vuelve a empezar
                attempt = 0;
                let _ = events.send(NodeEvent::NodeLost {
                    node_id: link.id().to_string(),
                });
            }

            attempt += 1;
            if attempt > MAX_RECONNECT_ATTEMPTS {
                error!(
                    "❌ Node {}: giving up after {} reconnect attempts",
                    link.id(),
                    MAX_RECONNECT_ATTEMPTS
                );
                return;
            }

            let backoff = Duration::from_millis(1000 * 2u64.pow((attempt - 1).min(3)));
            match outcome {
                Ok(()) => warn!(
                    "🔌 Node {} socket closed, reconnecting in {:?} ({}/{})",
                    link.id(),
                    backoff,
                    attempt,
                    MAX_RECONNECT_ATTEMPTS
                ),
                Err(e) => warn!(
                    "🔌 Node {} socket error: {}. Retrying in {:?} ({}/{})",
                    link.id(),
                    e,
                    backoff,
                    attempt,
                    MAX_RECONNECT_ATTEMPTS
                ),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    /// Runs one websocket connection until it closes.
    async fn socket_session(
        &self,
        link: &NodeLink,
        events: &mpsc::UnboundedSender<NodeEvent>,
    ) -> Result<(), NodeError> {
        let mut request = socket_url(&link.config)
            .into_client_request()
            .map_err(|e| NodeError::Socket(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert("Authorization", header_value(&link.config.password)?);
        headers.insert("User-Id", header_value(&self.user_id.to_string())?);
        headers.insert("Client-Name", HeaderValue::from_static(CLIENT_NAME));

        debug!("🔗 Connecting to node {} at {}", link.id(), socket_url(&link.config));
        let (mut socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| NodeError::Socket(e.to_string()))?;

        while let Some(message) = socket.next().await {
            let text = match message.map_err(|e| NodeError::Socket(e.to_string()))? {
                Message::Text(text) => text,
                Message::Close(frame) => {
                    debug!("Node {} closed the socket: {:?}", link.id(), frame);
                    break;
                }
                _ => continue,
            };

            match parse_message(&text) {
                Ok(Some(Inbound::Ready { session_id, resumed })) => {
                    *link.session_id.write() = Some(session_id);
                    let _ = events.send(NodeEvent::NodeReady {
                        node_id: link.id().to_string(),
                        resumed,
                    });
                }
                Ok(Some(Inbound::Event(event))) => {
                    let _ = events.send(event);
                }
                Ok(Some(Inbound::VoiceClosed {
                    guild_id,
                    code,
                    reason,
                })) => {
                    warn!(guild_id = %guild_id, "🔇 Voice socket closed on node {} ({}: {})", link.id(), code, reason);
                }
                Ok(None) => {}
                Err(e) => warn!("⚠️ Node {} sent an unreadable message: {}", link.id(), e),
            }
        }

        Ok(())
    }

    /// Returns the node already serving `guild_id`, or binds the least-loaded ready node.
    fn bind(&self, guild_id: GuildId) -> Result<Arc<NodeLink>, NodeError> {
        if let Some(link) = self.bindings.get(&guild_id) {
            return Ok(Arc::clone(link.value()));
        }

        let link = self
            .nodes
            .iter()
            .filter(|link| link.is_ready())
            .min_by_key(|link| link.players.load(Ordering::Relaxed))
            .cloned()
            .ok_or(NodeError::NoNodeAvailable)?;

        let bound = Arc::clone(
            self.bindings
                .entry(guild_id)
                .or_insert_with(|| {
                    link.players.fetch_add(1, Ordering::Relaxed);
                    link
                })
                .value(),
        );
        debug!(guild_id = %guild_id, "📌 Bound to node {}", bound.id());
        Ok(bound)
    }

    fn release(&self, guild_id: GuildId) -> Option<Arc<NodeLink>> {
        let (_, link) = self.bindings.remove(&guild_id)?;
        link.players.fetch_sub(1, Ordering::Relaxed);
        Some(link)
    }

    fn bound(&self, guild_id: GuildId) -> Result<Arc<NodeLink>, NodeError> {
        self.bindings
            .get(&guild_id)
            .map(|link| Arc::clone(link.value()))
            .ok_or(NodeError::NotBound(guild_id.get()))
    }

    /// Any ready node can answer searches.
    fn any_ready(&self) -> Result<Arc<NodeLink>, NodeError> {
        self.nodes
            .iter()
            .filter(|link| link.is_ready())
            .min_by_key(|link| link.players.load(Ordering::Relaxed))
            .cloned()
            .ok_or(NodeError::NoNodeAvailable)
    }

    async fn update_player(&self, guild_id: GuildId, update: &PlayerUpdate) -> Result<(), NodeError> {
        let link = self.bound(guild_id)?;
        self.patch(&link, guild_id, update).await
    }

    async fn patch(
        &self,
        link: &NodeLink,
        guild_id: GuildId,
        update: &PlayerUpdate,
    ) -> Result<(), NodeError> {
        let response = self
            .http
            .patch(link.player_url(guild_id)?)
            .header(AUTHORIZATION, &link.config.password)
            .json(update)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, NodeError> {
    HeaderValue::from_str(raw).map_err(|e| NodeError::Socket(e.to_string()))
}

#[async_trait]
impl AudioNode for LavalinkClient {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), NodeError> {
        let link = self.bind(guild_id)?;

        let joined = async {
            let (connection, _call) = self
                .songbird
                .join_gateway(guild_id, channel_id)
                .await
                .map_err(|e| NodeError::Gateway(e.to_string()))?;

            let update = PlayerUpdate {
                voice: Some(VoiceUpdate {
                    token: connection.token,
                    endpoint: connection.endpoint,
                    session_id: connection.session_id,
                }),
                ..Default::default()
            };
            self.patch(&link, guild_id, &update).await
        }
        .await;

        match joined {
            Ok(()) => {
                info!(guild_id = %guild_id, "🔊 Voice connected to {} via node {}", channel_id, link.id());
                Ok(())
            }
            Err(e) => {
                self.release(guild_id);
                Err(e)
            }
        }
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<(), NodeError> {
        let mut outcome = Ok(());

        if let Some(link) = self.release(guild_id) {
            let destroyed = async {
                let response = self
                    .http
                    .delete(link.player_url(guild_id)?)
                    .header(AUTHORIZATION, &link.config.password)
                    .send()
                    .await?;
                ensure_success(response).await.map(|_| ())
            }
            .await;
            if let Err(e) = destroyed {
                warn!(guild_id = %guild_id, "⚠️ Could not destroy player on node {}: {}", link.id(), e);
                outcome = Err(e);
            }
        }

        if let Err(e) = self.songbird.remove(guild_id).await {
            debug!(guild_id = %guild_id, "Voice leave: {}", e);
        }

        info!(guild_id = %guild_id, "🔇 Voice disconnected");
        outcome
    }

    async fn search(&self, query: &SearchQuery) -> Result<LoadResult, NodeError> {
        let link = self.any_ready()?;
        let mut url = rest_base(&link.config)?.join("v4/loadtracks")?;
        url.query_pairs_mut()
            .append_pair("identifier", &query.identifier());

        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, &link.config.password)
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;
        let result = decode_load(&body)?;

        debug!("🔍 {:?} -> {}", query, describe(&result));
        Ok(result)
    }

    async fn play(&self, guild_id: GuildId, track: &Track) -> Result<(), NodeError> {
        let update = PlayerUpdate {
            track: Some(TrackUpdate {
                encoded: Some(track.handle().to_string()),
            }),
            paused: Some(false),
            ..Default::default()
        };
        self.update_player(guild_id, &update).await
    }

    async fn pause(&self, guild_id: GuildId) -> Result<(), NodeError> {
        let update = PlayerUpdate {
            paused: Some(true),
            ..Default::default()
        };
        self.update_player(guild_id, &update).await
    }

    async fn resume(&self, guild_id: GuildId) -> Result<(), NodeError> {
        let update = PlayerUpdate {
            paused: Some(false),
            ..Default::default()
        };
        self.update_player(guild_id, &update).await
    }

    async fn stop(&self, guild_id: GuildId) -> Result<(), NodeError> {
        let update = PlayerUpdate {
            track: Some(TrackUpdate { encoded: None }),
            ..Default::default()
        };
        self.update_player(guild_id, &update).await
    }

    async fn seek(&self, guild_id: GuildId, position: Duration) -> Result<(), NodeError> {
        let update = PlayerUpdate {
            position: Some(position.as_millis() as u64),
            ..Default::default()
        };
        self.update_player(guild_id, &update).await
    }

    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> Result<(), NodeError> {
        // Lavalink usa 0..1000 con 100 = 100 %, así que el porcentaje pasa tal cual
        let update = PlayerUpdate {
            volume: Some(u16::from(volume.min(100))),
            ..Default::default()
        };
        self.update_player(guild_id, &update).await
    }

    async fn set_equalizer(
        &self,
        guild_id: GuildId,
        preset: EqualizerPreset,
    ) -> Result<(), NodeError> {
        let update = PlayerUpdate {
            filters: Some(Filters {
                equalizer: preset.bands(),
            }),
            ..Default::default()
        };
        self.update_player(guild_id, &update).await
    }
}

fn describe(result: &LoadResult) -> String {
    match result {
        LoadResult::Empty => "no matches".to_string(),
        LoadResult::Track(info) => format!("track `{}`", info.title),
        LoadResult::Search(results) => format!("{} search results", results.len()),
        LoadResult::Playlist { name, tracks } => {
            format!("playlist `{}` ({} tracks)", name, tracks.len())
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
struct PlayerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    track: Option<TrackUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<VoiceUpdate>,
}

/// `encoded: null` stops the current track.
#[derive(Debug, Serialize)]
struct TrackUpdate {
    encoded: Option<String>,
}

#[derive(Debug, Serialize)]
struct Filters {
    equalizer: Vec<Band>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceUpdate {
    token: String,
    endpoint: String,
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadResponse {
    load_type: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct WireTrack {
    encoded: String,
    info: WireTrackInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTrackInfo {
    identifier: String,
    title: String,
    length: u64,
    #[serde(default)]
    is_stream: bool,
    uri: Option<String>,
    artwork_url: Option<String>,
    source_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePlaylist {
    info: WirePlaylistInfo,
    tracks: Vec<WireTrack>,
}

#[derive(Debug, Deserialize)]
struct WirePlaylistInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WireTrackRef {
    encoded: String,
}

#[derive(Debug, Deserialize)]
struct WireException {
    message: Option<String>,
}

impl From<WireTrack> for TrackInfo {
    fn from(wire: WireTrack) -> Self {
        let info = wire.info;
        let thumbnail = info.artwork_url.or_else(|| {
            (info.source_name.as_deref() == Some("youtube"))
                .then(|| format!("https://img.youtube.com/vi/{}/hqdefault.jpg", info.identifier))
        });

        TrackInfo {
            handle: wire.encoded,
            identifier: info.identifier,
            title: info.title,
            duration: if info.is_stream {
                Duration::ZERO
            } else {
                Duration::from_millis(info.length)
            },
            uri: info.uri,
            thumbnail,
        }
    }
}

fn decode_load(body: &str) -> Result<LoadResult, NodeError> {
    let response: LoadResponse = serde_json::from_str(body)?;

    match response.load_type.as_str() {
        "track" => {
            let track: WireTrack = serde_json::from_value(response.data)?;
            Ok(LoadResult::Track(track.into()))
        }
        "search" => {
            let tracks: Vec<WireTrack> = serde_json::from_value(response.data)?;
            Ok(LoadResult::Search(tracks.into_iter().map(Into::into).collect()))
        }
        "playlist" => {
            let playlist: WirePlaylist = serde_json::from_value(response.data)?;
            Ok(LoadResult::Playlist {
                name: playlist.info.name,
                tracks: playlist.tracks.into_iter().map(Into::into).collect(),
            })
        }
        "empty" => Ok(LoadResult::Empty),
        "error" => {
            let exception: WireException = serde_json::from_value(response.data)?;
            Err(NodeError::LoadFailed(
                exception.message.unwrap_or_else(|| "unknown".to_string()),
            ))
        }
        other => Err(NodeError::LoadFailed(format!("unexpected load type `{}`", other))),
    }
}

/// What a socket frame means to us.
#[derive(Debug, PartialEq)]
enum Inbound {
    Ready { session_id: String, resumed: bool },
    Event(NodeEvent),
    VoiceClosed { guild_id: GuildId, code: u16, reason: String },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    op: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadyOp {
    session_id: String,
    #[serde(default)]
    resumed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventOp {
    #[serde(rename = "type")]
    kind: String,
    guild_id: String,
    track: Option<WireTrackRef>,
    reason: Option<Value>,
    threshold_ms: Option<u64>,
    exception: Option<WireException>,
    code: Option<u16>,
}

fn parse_guild(raw: &str) -> Result<GuildId, NodeError> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(GuildId::new)
        .ok_or_else(|| NodeError::Socket(format!("invalid guild id `{}`", raw)))
}

/// Translates one socket frame. `stats` and `playerUpdate` carry nothing we use.
fn parse_message(text: &str) -> Result<Option<Inbound>, NodeError> {
    let envelope: Envelope = serde_json::from_str(text)?;

    match envelope.op.as_str() {
        "ready" => {
            let ready: ReadyOp = serde_json::from_str(text)?;
            Ok(Some(Inbound::Ready {
                session_id: ready.session_id,
                resumed: ready.resumed,
            }))
        }
        "event" => {
            let event: EventOp = serde_json::from_str(text)?;
            let guild_id = parse_guild(&event.guild_id)?;
            let reason = event
                .reason
                .as_ref()
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let handle = event.track.map(|t| t.encoded);
            let track = |kind| {
                handle.clone().map(|track| {
                    Inbound::Event(NodeEvent::Track {
                        guild_id,
                        track,
                        event: kind,
                    })
                })
            };

            Ok(match event.kind.as_str() {
                "TrackStartEvent" => Some(Inbound::Event(NodeEvent::TrackStarted { guild_id })),
                "TrackEndEvent" => match reason.as_str() {
                    "finished" => track(TrackEvent::Ended(EndReason::Finished)),
                    "loadFailed" => track(TrackEvent::Ended(EndReason::LoadFailed)),
                    "stopped" => track(TrackEvent::Ended(EndReason::Stopped)),
                    "cleanup" => track(TrackEvent::Ended(EndReason::Cleanup)),
                    // Otro track ya ocupa el reproductor; avanzar aquí saltaría uno
                    _ => None,
                },
                "TrackStuckEvent" => track(TrackEvent::Stuck {
                    threshold: Duration::from_millis(event.threshold_ms.unwrap_or_default()),
                }),
                "TrackExceptionEvent" => track(TrackEvent::Errored {
                    message: event
                        .exception
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "unknown".to_string()),
                }),
                "WebSocketClosedEvent" => Some(Inbound::VoiceClosed {
                    guild_id,
                    code: event.code.unwrap_or_default(),
                    reason,
                }),
                _ => None,
            })
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn guild() -> GuildId {
        GuildId::new(81384788765712384)
    }

    fn end_event(reason: &str) -> String {
        json!({
            "op": "event",
            "type": "TrackEndEvent",
            "guildId": "81384788765712384",
            "track": {"encoded": "QAAAjQIAJVJpY2sg"},
            "reason": reason,
        })
        .to_string()
    }

    #[test]
    fn ready_records_session() {
        let text = r#"{"op":"ready","resumed":false,"sessionId":"la3kfsdf5eafe848"}"#;
        assert_eq!(
            parse_message(text).unwrap(),
            Some(Inbound::Ready {
                session_id: "la3kfsdf5eafe848".into(),
                resumed: false
            })
        );
    }

    #[test]
    fn end_reasons_map_to_ended_events() {
        assert_eq!(
            parse_message(&end_event("finished")).unwrap(),
            Some(Inbound::Event(NodeEvent::Track {
                guild_id: guild(),
                track: "QAAAjQIAJVJpY2sg".into(),
                event: TrackEvent::Ended(EndReason::Finished)
            }))
        );
        assert_eq!(
            parse_message(&end_event("stopped")).unwrap(),
            Some(Inbound::Event(NodeEvent::Track {
                guild_id: guild(),
                track: "QAAAjQIAJVJpY2sg".into(),
                event: TrackEvent::Ended(EndReason::Stopped)
            }))
        );
    }

    #[test]
    fn replaced_tracks_do_not_advance() {
        assert_eq!(parse_message(&end_event("replaced")).unwrap(), None);
    }

    #[test]
    fn stuck_and_exception_events_carry_detail() {
        let stuck = json!({
            "op": "event", "type": "TrackStuckEvent",
            "guildId": "81384788765712384", "thresholdMs": 10000,
            "track": {"encoded": "QAAAjQIAJVJpY2sg"}
        });
        assert_eq!(
            parse_message(&stuck.to_string()).unwrap(),
            Some(Inbound::Event(NodeEvent::Track {
                guild_id: guild(),
                track: "QAAAjQIAJVJpY2sg".into(),
                event: TrackEvent::Stuck {
                    threshold: Duration::from_secs(10)
                }
            }))
        );

        let failed = json!({
            "op": "event", "type": "TrackExceptionEvent",
            "guildId": "81384788765712384",
            "track": {"encoded": "QAAAjQIAJVJpY2sg"},
            "exception": {"message": "This video is unavailable", "severity": "common", "cause": "..."}
        });
        assert_eq!(
            parse_message(&failed.to_string()).unwrap(),
            Some(Inbound::Event(NodeEvent::Track {
                guild_id: guild(),
                track: "QAAAjQIAJVJpY2sg".into(),
                event: TrackEvent::Errored {
                    message: "This video is unavailable".into()
                }
            }))
        );
    }

    #[test]
    fn stats_and_player_updates_are_ignored() {
        assert_eq!(parse_message(r#"{"op":"stats","players":1}"#).unwrap(), None);
        assert_eq!(
            parse_message(r#"{"op":"playerUpdate","guildId":"1","state":{}}"#).unwrap(),
            None
        );
    }

    #[test]
    fn track_events_without_a_track_are_dropped() {
        let text = json!({
            "op": "event", "type": "TrackEndEvent",
            "guildId": "81384788765712384", "reason": "finished"
        });
        assert_eq!(parse_message(&text.to_string()).unwrap(), None);
    }

    #[test]
    fn zero_guild_id_is_rejected() {
        let text = json!({"op": "event", "type": "TrackStartEvent", "guildId": "0"}).to_string();
        assert!(parse_message(&text).is_err());
    }

    #[test]
    fn search_results_decode_with_youtube_thumbnail() {
        let body = json!({
            "loadType": "search",
            "data": [{
                "encoded": "QAAAjQIAJVJpY2sgQXN0bGV5",
                "info": {
                    "identifier": "dQw4w9WgXcQ",
                    "isSeekable": true,
                    "author": "RickAstleyVEVO",
                    "length": 212000,
                    "isStream": false,
                    "position": 0,
                    "title": "Never Gonna Give You Up",
                    "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
                    "artworkUrl": null,
                    "isrc": null,
                    "sourceName": "youtube"
                }
            }]
        });

        let LoadResult::Search(results) = decode_load(&body.to_string()).unwrap() else {
            panic!("expected search results");
        };
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].duration, Duration::from_secs(212));
        assert_eq!(
            results[0].thumbnail.as_deref(),
            Some("https://img.youtube.com/vi/dQw4w9WgXcQ/hqdefault.jpg")
        );
    }

    #[test]
    fn playlists_keep_name_and_order() {
        let entry = |id: &str| {
            json!({"encoded": id, "info": {"identifier": id, "title": id, "length": 1000, "uri": null}})
        };
        let body = json!({
            "loadType": "playlist",
            "data": {"info": {"name": "Mix", "selectedTrack": -1}, "pluginInfo": {}, "tracks": [entry("a"), entry("b")]}
        });

        let LoadResult::Playlist { name, tracks } = decode_load(&body.to_string()).unwrap() else {
            panic!("expected playlist");
        };
        assert_eq!(name, "Mix");
        let ids: Vec<_> = tracks.iter().map(|t| t.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn load_errors_surface_as_load_failed() {
        let body = json!({"loadType": "error", "data": {"message": "boom", "severity": "fault"}});
        assert!(matches!(
            decode_load(&body.to_string()),
            Err(NodeError::LoadFailed(message)) if message == "boom"
        ));
        assert_eq!(
            decode_load(r#"{"loadType":"empty","data":{}}"#).unwrap(),
            LoadResult::Empty
        );
    }

    #[test]
    fn stop_serializes_a_null_track() {
        let update = PlayerUpdate {
            track: Some(TrackUpdate { encoded: None }),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"track": {"encoded": null}})
        );
    }

    #[test]
    fn only_set_fields_are_sent() {
        let update = PlayerUpdate {
            volume: Some(40),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&update).unwrap(), json!({"volume": 40}));
    }

    #[test]
    fn urls_follow_the_ssl_flag() {
        let mut config = NodeConfig {
            id: "MAIN".into(),
            host: "lava.local".into(),
            port: 2333,
            password: "pw".into(),
            ssl: false,
        };
        assert_eq!(socket_url(&config), "ws://lava.local:2333/v4/websocket");
        config.ssl = true;
        assert_eq!(rest_base(&config).unwrap().as_str(), "https://lava.local:2333/");
    }
}
