//! Guild audio session manager: per-guild music playback for a Discord bot,
//! backed by Lavalink nodes.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod session;
pub mod storage;
pub mod ui;

#[cfg(test)]
pub(crate) mod testing;
