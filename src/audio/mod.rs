//! # Audio Module
//!
//! Everything between a session and the audio node that actually decodes and
//! streams music.
//!
//! ## Architecture
//!
//! ### [`node`] - Node boundary
//! - The [`AudioNode`](node::AudioNode) control RPCs sessions issue
//! - Track lifecycle events the node reports back
//!
//! ### [`lavalink`] - Lavalink v4 client
//! - REST player updates and track loading
//! - One websocket per node, reconnected with backoff
//! - Guild to node binding, least-loaded node first
//!
//! ### [`queue`] - Session queue
//! - FIFO pending tracks with a bounded wait for the next one
//!
//! ### [`track`] / [`equalizer`]
//! - Resolved track metadata, search query normalisation and EQ presets

pub mod equalizer;
pub mod lavalink;
pub mod node;
pub mod queue;
pub mod track;
