//! # Bot Module
//!
//! Discord gateway glue for shuwy.
//!
//! [`ShuwyBot`] implements Serenity's [`EventHandler`] and forwards everything
//! session-related to the [`SessionRegistry`] stored in the client's type map:
//!
//! - Slash commands through [`commands::handle_command`]
//! - Reactions on a control surface
//! - Voice state changes, which keep the DJ role and session lifetime in sync
//!
//! [`platform::SerenityPlatform`] is the other direction: how sessions read voice
//! membership and post or edit messages.

use anyhow::Result;
use serenity::{
    all::{
        Context, EventHandler, GuildId, Interaction, Permissions, Reaction, ReactionType, Ready,
        VoiceState,
    },
    async_trait,
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod platform;

use crate::{
    config::Config,
    session::{platform::VoiceMember, surface::ReactionInput, SessionRegistry},
};

/// Type-map slot holding the session registry.
pub struct RegistryKey;

impl TypeMapKey for RegistryKey {
    type Value = SessionRegistry;
}

async fn registry(ctx: &Context) -> Option<SessionRegistry> {
    let registry = ctx.data.read().await.get::<RegistryKey>().cloned();
    if registry.is_none() {
        error!("❌ Session registry missing from client data");
    }
    registry
}

/// Main Discord event handler.
pub struct ShuwyBot {
    config: Arc<Config>,
}

impl ShuwyBot {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Registers slash commands globally, or for one guild when `GUILD_ID` is set
    /// (faster propagation, meant for development).
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }
                commands::register_guild_commands(ctx, guild_id).await?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for ShuwyBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        let Some(registry) = registry(&ctx).await else {
            return;
        };

        if let Err(e) = commands::handle_command(&ctx, command, &registry).await {
            error!("Error manejando comando: {:?}", e);
        }
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        let (Some(guild_id), Some(user_id)) = (reaction.guild_id, reaction.user_id) else {
            return;
        };
        if user_id == ctx.cache.current_user().id {
            return;
        }
        let Some(registry) = registry(&ctx).await else {
            return;
        };

        let (bot, elevated) = {
            let guild = ctx.cache.guild(guild_id);
            let member = reaction
                .member
                .as_ref()
                .or_else(|| guild.as_ref().and_then(|g| g.members.get(&user_id)));
            let bot = member.is_some_and(|m| m.user.bot);
            let elevated = match (guild.as_ref(), member) {
                (Some(guild), Some(member)) => guild
                    .channels
                    .get(&reaction.channel_id)
                    .map(|channel| guild.user_permissions_in(channel, member))
                    .is_some_and(|p| p.contains(Permissions::KICK_MEMBERS)),
                _ => false,
            };
            (bot, elevated)
        };

        registry
            .handle_reaction(ReactionInput {
                guild_id,
                channel_id: reaction.channel_id,
                message_id: reaction.message_id,
                member: VoiceMember { id: user_id, bot },
                elevated,
                emoji: emoji_text(&reaction.emoji),
            })
            .await;
    }

    /// The cache already holds `new` when this runs, so member lists reflect the change.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id.or_else(|| old.as_ref().and_then(|o| o.guild_id)) else {
            return;
        };
        let Some(registry) = registry(&ctx).await else {
            return;
        };

        if new.user_id == ctx.cache.current_user().id {
            if old.is_some() && new.channel_id.is_none() {
                registry.handle_forced_disconnect(guild_id);
            }
            return;
        }

        let bot = new.member.as_ref().is_some_and(|m| m.user.bot);
        let outcome = registry.handle_voice_state(
            guild_id,
            VoiceMember {
                id: new.user_id,
                bot,
            },
            new.channel_id,
        );
        debug!(guild_id = %guild_id, "🎙️ Voice update for {}: {:?}", new.user_id, outcome);
    }
}

/// Unicode text of a reaction; custom emoji never match a control.
fn emoji_text(emoji: &ReactionType) -> String {
    match emoji {
        ReactionType::Unicode(text) => text.clone(),
        other => other.to_string(),
    }
}
