use async_trait::async_trait;
use serenity::{
    all::{Cache, Http, HttpError, ReactionType},
    builder::{CreateMessage, EditMessage, GetMessages},
    model::id::{ChannelId, GuildId, MessageId, UserId},
};
use std::sync::Arc;
use tracing::debug;

use crate::{
    error::PlatformError,
    session::{
        platform::{ChatPlatform, Notice, VoiceMember},
        surface::{ControlAction, SurfaceView},
    },
    ui::embeds,
};

// Códigos JSON de error de Discord
const UNKNOWN_MESSAGE: isize = 10008;
const MISSING_PERMISSIONS: isize = 50013;

/// [`ChatPlatform`] over the serenity cache and REST client.
pub struct SerenityPlatform {
    cache: Arc<Cache>,
    http: Arc<Http>,
}

impl SerenityPlatform {
    pub fn new(cache: Arc<Cache>, http: Arc<Http>) -> Self {
        Self { cache, http }
    }

    fn channel_name(&self, channel: ChannelId) -> String {
        self.cache
            .channel(channel)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| channel.to_string())
    }

    fn reaction(action: ControlAction) -> ReactionType {
        ReactionType::Unicode(action.emoji().to_string())
    }
}

fn platform_error(e: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) = &e {
        match response.error.code {
            UNKNOWN_MESSAGE => return PlatformError::UnknownMessage,
            MISSING_PERMISSIONS => return PlatformError::Forbidden,
            _ => {}
        }
    }
    PlatformError::Request(e.to_string())
}

#[async_trait]
impl ChatPlatform for SerenityPlatform {
    fn voice_members(&self, guild_id: GuildId, channel: ChannelId) -> Vec<VoiceMember> {
        let Some(guild) = self.cache.guild(guild_id) else {
            return Vec::new();
        };

        guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel))
            .map(|state| {
                let bot = guild
                    .members
                    .get(&state.user_id)
                    .map(|m| m.user.bot)
                    .or_else(|| state.member.as_ref().map(|m| m.user.bot))
                    .unwrap_or(false);
                VoiceMember {
                    id: state.user_id,
                    bot,
                }
            })
            .collect()
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: u8,
    ) -> Result<Vec<MessageId>, PlatformError> {
        let messages = channel
            .messages(&self.http, GetMessages::new().limit(limit))
            .await
            .map_err(platform_error)?;
        Ok(messages.into_iter().map(|m| m.id).collect())
    }

    async fn post_surface(
        &self,
        channel: ChannelId,
        view: &SurfaceView,
    ) -> Result<MessageId, PlatformError> {
        let embed = embeds::create_surface_embed(view, &self.channel_name(view.voice_channel));
        let message = CreateMessage::new()
            .embed(embed)
            .reactions(ControlAction::ALL.into_iter().map(Self::reaction));

        let sent = channel
            .send_message((&self.cache, self.http.as_ref()), message)
            .await
            .map_err(platform_error)?;
        debug!("🎛️ Control surface posted as {}", sent.id);
        Ok(sent.id)
    }

    async fn edit_surface(
        &self,
        channel: ChannelId,
        message: MessageId,
        view: &SurfaceView,
    ) -> Result<(), PlatformError> {
        let embed = embeds::create_surface_embed(view, &self.channel_name(view.voice_channel));
        channel
            .edit_message((&self.cache, self.http.as_ref()), message, EditMessage::new().embed(embed))
            .await
            .map_err(platform_error)?;
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError> {
        channel
            .delete_message(&self.http, message)
            .await
            .map_err(platform_error)
    }

    async fn remove_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        user: UserId,
        action: ControlAction,
    ) -> Result<(), PlatformError> {
        channel
            .delete_reaction(&self.http, message, Some(user), Self::reaction(action))
            .await
            .map_err(platform_error)
    }

    async fn announce(&self, channel: ChannelId, notice: &Notice) -> Result<(), PlatformError> {
        let Some(embed) = embeds::create_notice_embed(notice) else {
            return Ok(());
        };
        channel
            .send_message((&self.cache, self.http.as_ref()), CreateMessage::new().embed(embed))
            .await
            .map_err(platform_error)?;
        Ok(())
    }
}
