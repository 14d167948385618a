//! Data models for conversations, messages and profiles

mod conversation;
mod message;
mod profile;

pub use conversation::*;
pub use message::*;
pub use profile::*;
