//! Front-end that records everything sent, for tests.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{ChatFrontend, ChatResult, Embed, PresenceStatus, UserInfo};

/// One outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Channel { channel_id: String, text: String },
    Direct { user_id: String, text: String },
    Embed { channel_id: String, embed: Embed },
    Presence { status: PresenceStatus, text: String },
}

pub struct RecordingFrontend {
    self_id: String,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingFrontend {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sent>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Direct messages sent to `user_id`, in order.
    pub fn direct_to(&self, user_id: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Direct { user_id: to, text } if to == user_id => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Channel messages sent to `channel_id`, in order.
    pub fn channel(&self, channel_id: &str) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Channel {
                    channel_id: to,
                    text,
                } if to == channel_id => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn embeds(&self) -> Vec<Embed> {
        self.lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Embed { embed, .. } => Some(embed.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_presence(&self) -> Option<(PresenceStatus, String)> {
        self.lock().iter().rev().find_map(|s| match s {
            Sent::Presence { status, text } => Some((*status, text.clone())),
            _ => None,
        })
    }
}

#[async_trait]
impl ChatFrontend for RecordingFrontend {
    fn self_user_id(&self) -> &str {
        &self.self_id
    }

    async fn reply_channel(&self, channel_id: &str, text: &str) -> ChatResult<()> {
        self.lock().push(Sent::Channel {
            channel_id: channel_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn reply_user(&self, user_id: &str, text: &str) -> ChatResult<()> {
        self.lock().push(Sent::Direct {
            user_id: user_id.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn reply_embed(&self, channel_id: &str, embed: &Embed) -> ChatResult<()> {
        self.lock().push(Sent::Embed {
            channel_id: channel_id.to_string(),
            embed: embed.clone(),
        });
        Ok(())
    }

    async fn set_presence(&self, status: PresenceStatus, text: &str) -> ChatResult<()> {
        self.lock().push(Sent::Presence {
            status,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn user_info(&self, user_id: &str) -> ChatResult<UserInfo> {
        Ok(UserInfo {
            username: format!("user{user_id}"),
            discriminator: "0".to_string(),
        })
    }
}
