use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::session::{
    platform::{Authority, DeclineReason, Notice, VolumeLimit},
    surface::{ControlAction, SurfaceView},
    vote::VoteAction,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 shuwy";

/// Titles shown per queue page.
pub const QUEUE_PAGE_SIZE: usize = 8;

/// The control surface: what is playing and who controls it.
pub fn create_surface_embed(view: &SurfaceView, channel_name: &str) -> CreateEmbed {
    let duration = if view.duration.is_zero() {
        "🔴 Live".to_string()
    } else {
        format_duration(view.duration)
    };
    let dj = view
        .dj
        .map_or_else(|| "Nobody".to_string(), |dj| format!("<@{}>", dj));

    let mut embed = CreateEmbed::default()
        .title(format!("Music Controller | {}", channel_name))
        .description(format!("Now Playing:\n```ini\n{}\n```", view.title))
        .color(colors::MUSIC_PURPLE)
        .field("Duration", duration, true)
        .field("Queue Length", view.queue_len.to_string(), true)
        .field("Volume", format!("**`{}%`**", view.volume), true)
        .field("Requested By", format!("<@{}>", view.requester), true)
        .field("DJ", dj, true);

    if let Some(uri) = &view.uri {
        embed = embed.field("Video URL", format!("[Click Here!]({})", uri), true);
    }
    if let Some(thumbnail) = &view.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed.footer(CreateEmbedFooter::new(controls_legend()))
}

fn controls_legend() -> String {
    ControlAction::ALL
        .iter()
        .map(|action| action.emoji())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pending titles, [`QUEUE_PAGE_SIZE`] per page. `page` is 1-based and clamped.
pub fn create_queue_embed(titles: &[String], page: usize) -> CreateEmbed {
    let (body, page, pages) = queue_page(titles, page);
    CreateEmbed::default()
        .title(format!("Coming Up... Next {}", titles.len()))
        .description(body)
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(format!("Page {} of {}", page, pages)))
        .timestamp(Timestamp::now())
}

fn queue_page(titles: &[String], page: usize) -> (String, usize, usize) {
    let pages = titles.len().div_ceil(QUEUE_PAGE_SIZE).max(1);
    let page = page.clamp(1, pages);
    let start = (page - 1) * QUEUE_PAGE_SIZE;

    let body = titles
        .iter()
        .enumerate()
        .skip(start)
        .take(QUEUE_PAGE_SIZE)
        .map(|(i, title)| format!("**{}**. {}", i + 1, title))
        .collect::<Vec<_>>()
        .join("\n");
    (body, page, pages)
}

/// Embed for a command outcome. `None` for [`Notice::Silent`].
pub fn create_notice_embed(notice: &Notice) -> Option<CreateEmbed> {
    if let Notice::Queue { titles } = notice {
        return Some(create_queue_embed(titles, 1));
    }

    let text = notice_text(notice)?;
    let colour = match notice {
        Notice::Failed(_) | Notice::NoMatches => colors::ERROR_RED,
        Notice::Declined(_) | Notice::VolumeChanged { limit: Some(_), .. } => {
            colors::WARNING_ORANGE
        }
        Notice::VoteRegistered { .. } => colors::NEUTRAL_GRAY,
        Notice::Enqueued { .. } | Notice::PlaylistEnqueued { .. } => colors::SUCCESS_GREEN,
        _ => colors::MUSIC_PURPLE,
    };

    Some(
        CreateEmbed::default()
            .description(text)
            .color(colour)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER)),
    )
}

pub fn create_error_embed(description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("❌ Error")
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// User-facing text of a notice.
pub fn notice_text(notice: &Notice) -> Option<String> {
    let text = match notice {
        Notice::Silent => return None,
        Notice::Connected { channel } => format!("🔊 Connected to <#{}>.", channel),
        Notice::Enqueued { title } => format!("```ini\nAdded {} to the Queue\n```", title),
        Notice::PlaylistEnqueued { name, count } => format!(
            "```ini\nAdded the playlist {} with {} songs to the queue.\n```",
            name, count
        ),
        Notice::NoMatches => "No songs were found with that query. Please try again.".to_string(),
        Notice::ActionTaken { action, by } => action_taken(*action, *by),
        Notice::VoteRegistered {
            action,
            voter,
            votes,
            required,
        } => format!(
            "<@{}> has voted to {} {}. ({}/{})",
            voter,
            action,
            object(*action),
            votes,
            required
        ),
        Notice::VolumeChanged { limit: Some(VolumeLimit::Max), .. } => {
            "Maximum volume reached".to_string()
        }
        Notice::VolumeChanged { limit: Some(VolumeLimit::Muted), .. } => {
            "Player is currently muted".to_string()
        }
        Notice::VolumeChanged { volume, limit: None } => {
            format!("Set the volume to **{}**%", volume)
        }
        Notice::EqualizerSet { preset } => format!("Successfully changed equalizer to {}", preset),
        Notice::DjSwapped { dj } => format!("<@{}> is now the DJ.", dj),
        Notice::Declined(reason) => declined(*reason).to_string(),
        Notice::Queue { titles } => queue_page(titles, 1).0,
        Notice::Favourites { uris } if uris.is_empty() => format!(
            "You have no favourites yet. React with {} on the player to save one.",
            ControlAction::MarkFavourite.emoji()
        ),
        Notice::Favourites { uris } => uris
            .iter()
            .enumerate()
            .map(|(i, uri)| format!("**{}**. {}", i + 1, uri))
            .collect::<Vec<_>>()
            .join("\n"),
        Notice::FavouritesEnqueued { count } => {
            format!("Added {} of your favourites to the queue.", count)
        }
        Notice::FavouriteAdded { position } => format!("⭐ Saved as favourite #{}.", position),
        Notice::FavouriteRemoved { uri } => format!("Removed {} from your favourites.", uri),
        Notice::Failed(message) => message.clone(),
    };
    Some(text)
}

fn object(action: VoteAction) -> &'static str {
    match action {
        VoteAction::Skip => "the song",
        VoteAction::Shuffle => "the playlist",
        _ => "the player",
    }
}

fn action_taken(action: VoteAction, by: Authority) -> String {
    let (past, gerund) = match action {
        VoteAction::Pause => ("paused", "Pausing"),
        VoteAction::Resume => ("resumed", "Resuming"),
        VoteAction::Skip => ("skipped", "Skipping"),
        VoteAction::Shuffle => ("shuffled", "Shuffling"),
        VoteAction::Stop => ("stopped", "Stopping"),
    };
    let object = object(action);

    match by {
        Authority::Privileged => format!("An admin or DJ has {} {}.", past, object),
        Authority::Requester => format!("The song requester has {} {}.", past, object),
        Authority::Vote => format!("Vote to {} passed. {} {}.", action, gerund, object),
    }
}

fn declined(reason: DeclineReason) -> &'static str {
    match reason {
        DeclineReason::NotPrivileged => "Only the DJ or admins may use this command.",
        DeclineReason::QueueTooShort => "Add more songs to the queue before shuffling.",
        DeclineReason::NoMembersToSwap => "No more members to swap to.",
        DeclineReason::TargetNotInVoice => {
            "That member is not currently in voice, so can not be a DJ."
        }
        DeclineReason::AlreadyDj => "Cannot swap DJ to the current DJ... :)",
        DeclineReason::NothingPlaying => "Nothing is playing right now.",
        DeclineReason::QueueEmpty => "There are no more songs in the queue.",
    }
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
