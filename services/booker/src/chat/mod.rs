//! Chat front-end contract.
//!
//! The bot talks to users through a [`ChatFrontend`]. The Discord adapter
//! lives outside this crate; [`ConsoleFrontend`] drives the bot from a
//! terminal and [`RecordingFrontend`] captures output in tests.

mod console;
mod recording;

pub use console::ConsoleFrontend;
pub use recording::{RecordingFrontend, Sent};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("chat send failed: {0}")]
    Send(String),

    #[error("unknown user {0}")]
    UnknownUser(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

/// An inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub user_id: String,
    pub channel_id: String,
    pub text: String,
    /// Sent in a direct-message channel.
    pub is_private: bool,
    /// Permission bits of the author in the channel's guild.
    pub permissions: i64,
}

/// Who invoked a command and where to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub user_id: String,
    pub channel_id: String,
    pub is_private: bool,
    pub permissions: i64,
}

impl CommandInfo {
    pub fn mention(&self) -> String {
        format!("<@{}>", self.user_id)
    }
}

impl From<&MessageEvent> for CommandInfo {
    fn from(event: &MessageEvent) -> Self {
        Self {
            user_id: event.user_id.clone(),
            channel_id: event.channel_id.clone(),
            is_private: event.is_private,
            permissions: event.permissions,
        }
    }
}

/// Presence indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Structured reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Embed {
    pub title: String,
    pub fields: Vec<EmbedField>,
}

impl Embed {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub username: String,
    pub discriminator: String,
}

/// Outbound operations the bot needs from a chat service.
#[async_trait]
pub trait ChatFrontend: Send + Sync {
    /// The bot's own user id, used to ignore its own messages.
    fn self_user_id(&self) -> &str;

    async fn reply_channel(&self, channel_id: &str, text: &str) -> ChatResult<()>;

    /// Direct-message a user, opening the DM channel if needed.
    async fn reply_user(&self, user_id: &str, text: &str) -> ChatResult<()>;

    async fn reply_embed(&self, channel_id: &str, embed: &Embed) -> ChatResult<()>;

    async fn set_presence(&self, status: PresenceStatus, text: &str) -> ChatResult<()>;

    async fn user_info(&self, user_id: &str) -> ChatResult<UserInfo>;
}
