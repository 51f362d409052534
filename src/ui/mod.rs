//! Presentation of sessions in chat: the control surface embed and command feedback.

pub mod embeds;
