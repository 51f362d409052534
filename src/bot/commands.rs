use anyhow::Result;
use serenity::{
    all::{ChannelType, CommandInteraction, Permissions},
    builder::{
        CreateCommand, CreateCommandOption, CreateEmbed, CreateInteractionResponse,
        CreateInteractionResponseMessage, EditInteractionResponse,
    },
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};
use tracing::{info, warn};

use crate::{
    audio::equalizer::EqualizerPreset,
    error::SessionError,
    session::{
        platform::{DeclineReason, Notice, Requester},
        SessionRegistry,
    },
    ui::embeds,
};

const DM_ONLY_MESSAGE: &str = "Music commands are not available in private messages.";

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }
    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        connect_command(),
        CreateCommand::new("pause").description("Pause the current song"),
        CreateCommand::new("resume").description("Resume a paused song"),
        CreateCommand::new("skip").description("Skip the current song"),
        CreateCommand::new("stop").description("Stop the player and clear the queue"),
        volume_command(),
        equalizer_command(),
        CreateCommand::new("shuffle").description("Shuffle the queue"),
        queue_command(),
        CreateCommand::new("nowplaying").description("Re-post the music controller"),
        swap_dj_command(),
        CreateCommand::new("favourites").description("List your favourite songs"),
        CreateCommand::new("playfavourites").description("Queue all your favourite songs"),
        unfavourite_command(),
    ]
}

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play or queue a song or playlist")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "URL or search terms")
                .required(true),
        )
}

fn connect_command() -> CreateCommand {
    CreateCommand::new("connect")
        .description("Join your voice channel, or the one given")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Channel, "channel", "Voice channel")
                .channel_types(vec![ChannelType::Voice, ChannelType::Stage]),
        )
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Set the player volume (DJ only)")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "value", "Volume, 1 to 100")
                .required(true),
        )
}

fn equalizer_command() -> CreateCommand {
    let option = EqualizerPreset::ALL.iter().fold(
        CreateCommandOption::new(CommandOptionType::String, "preset", "Equalizer preset")
            .required(true),
        |option, preset| option.add_string_choice(preset.name(), preset.name()),
    );
    CreateCommand::new("equalizer")
        .description("Change the equalizer preset (DJ only)")
        .add_option(option)
}

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Show the upcoming songs")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Page number")
                .min_int_value(1),
        )
}

fn swap_dj_command() -> CreateCommand {
    CreateCommand::new("swap_dj")
        .description("Hand the DJ role to another member (DJ only)")
        .add_option(CreateCommandOption::new(
            CommandOptionType::User,
            "member",
            "New DJ",
        ))
}

fn unfavourite_command() -> CreateCommand {
    CreateCommand::new("unfavourite")
        .description("Remove one of your favourites")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "position", "Position in /favourites")
                .required(true)
                .min_int_value(1),
        )
}

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    registry: &SessionRegistry,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .embed(embeds::create_error_embed(DM_ONLY_MESSAGE))
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // Defer la respuesta ya que puede tomar tiempo
    command.defer(&ctx.http).await?;

    let requester = requester(ctx, &command, guild_id);
    let embed = match run(&command, registry, guild_id, &requester).await {
        Ok(embed) => embed,
        Err(e) => {
            warn!(guild_id = %guild_id, "⚠️ /{} failed: {}", command.data.name, e);
            embeds::create_error_embed(&e.user_message())
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

async fn run(
    command: &CommandInteraction,
    registry: &SessionRegistry,
    guild_id: GuildId,
    requester: &Requester,
) -> Result<CreateEmbed, SessionError> {
    let name = command.data.name.as_str();

    // Comandos que no necesitan sesión
    let notice = match name {
        "favourites" => Some(registry.list_favourites(requester.id).await?),
        "unfavourite" => {
            let position = int_option(command, "position").unwrap_or(0);
            let position = usize::try_from(position).unwrap_or(0);
            Some(registry.remove_favourite(requester.id, position).await?)
        }
        _ => None,
    };
    if let Some(notice) = notice {
        return Ok(render(&notice));
    }

    let session = match name {
        "play" | "connect" | "playfavourites" => {
            Some(registry.get_or_create(guild_id, command.channel_id))
        }
        _ => registry.get(guild_id),
    };
    let Some(session) = session else {
        return Ok(render(&Notice::Declined(DeclineReason::NothingPlaying)));
    };

    let notice = match name {
        "play" => {
            let query = str_option(command, "query").unwrap_or_default();
            session.enqueue(requester, query).await?
        }
        "connect" => {
            let channel = command
                .data
                .options
                .iter()
                .find(|opt| opt.name == "channel")
                .and_then(|opt| opt.value.as_channel_id());
            session.connect(requester, channel).await?
        }
        "pause" => session.pause(requester).await?,
        "resume" => session.resume(requester).await?,
        "skip" => session.skip(requester).await?,
        "stop" => session.stop(requester).await?,
        "shuffle" => session.shuffle(requester).await?,
        "volume" => {
            let value = int_option(command, "value").unwrap_or(0);
            session.set_volume(requester, value).await?
        }
        "equalizer" => {
            let preset = str_option(command, "preset").unwrap_or_default();
            session.set_equalizer(requester, preset).await?
        }
        "queue" => {
            let page = int_option(command, "page")
                .and_then(|p| usize::try_from(p).ok())
                .unwrap_or(1);
            match session.queue_snapshot(requester)? {
                Notice::Queue { titles } => return Ok(embeds::create_queue_embed(&titles, page)),
                other => other,
            }
        }
        "nowplaying" => session.now_playing(requester).await?,
        "swap_dj" => {
            let target = command
                .data
                .options
                .iter()
                .find(|opt| opt.name == "member")
                .and_then(|opt| opt.value.as_user_id());
            session.swap_dj(requester, target).await?
        }
        "playfavourites" => session.enqueue_favourites(requester).await?,
        other => {
            warn!("❓ Comando no reconocido: {}", other);
            Notice::Failed("Unknown command.".to_string())
        }
    };

    Ok(render(&notice))
}

fn render(notice: &Notice) -> CreateEmbed {
    embeds::create_notice_embed(notice).unwrap_or_else(|| {
        CreateEmbed::default()
            .description("👌")
            .color(embeds::colors::NEUTRAL_GRAY)
    })
}

fn str_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}

/// Builds the command's requester from the interaction and the voice-state cache.
fn requester(ctx: &Context, command: &CommandInteraction, guild_id: GuildId) -> Requester {
    let elevated = command
        .member
        .as_ref()
        .and_then(|m| m.permissions)
        .is_some_and(|p| p.contains(Permissions::KICK_MEMBERS));
    let voice_channel = ctx.cache.guild(guild_id).and_then(|guild| {
        guild
            .voice_states
            .get(&command.user.id)
            .and_then(|state| state.channel_id)
    });

    Requester {
        id: command.user.id,
        bot: command.user.bot,
        elevated,
        text_channel: command.channel_id,
        voice_channel,
    }
}
