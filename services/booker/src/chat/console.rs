//! Terminal front-end for operators and local development.
//!
//! Each stdin line becomes a message from the configured operator user.
//! Replies are written to stdout, prefixed with their destination.

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

use super::{ChatError, ChatFrontend, ChatResult, Embed, MessageEvent, PresenceStatus, UserInfo};

/// Channel id used for console input.
pub const CONSOLE_CHANNEL: &str = "console";

pub struct ConsoleFrontend {
    operator_id: String,
    operator_permissions: i64,
    out: Mutex<Stdout>,
}

impl ConsoleFrontend {
    pub fn new(operator_id: impl Into<String>, operator_permissions: i64) -> Self {
        Self {
            operator_id: operator_id.into(),
            operator_permissions,
            out: Mutex::new(tokio::io::stdout()),
        }
    }

    /// Wrap a typed line as a message from the operator.
    pub fn event(&self, line: &str) -> MessageEvent {
        MessageEvent {
            user_id: self.operator_id.clone(),
            channel_id: CONSOLE_CHANNEL.to_string(),
            text: line.to_string(),
            is_private: false,
            permissions: self.operator_permissions,
        }
    }

    async fn write(&self, line: String) -> ChatResult<()> {
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| ChatError::Send(e.to_string()))?;
        out.flush().await.map_err(|e| ChatError::Send(e.to_string()))
    }
}

#[async_trait]
impl ChatFrontend for ConsoleFrontend {
    fn self_user_id(&self) -> &str {
        "booker"
    }

    async fn reply_channel(&self, channel_id: &str, text: &str) -> ChatResult<()> {
        self.write(format!("[#{channel_id}] {text}\n")).await
    }

    async fn reply_user(&self, user_id: &str, text: &str) -> ChatResult<()> {
        self.write(format!("[@{user_id}] {text}\n")).await
    }

    async fn reply_embed(&self, channel_id: &str, embed: &Embed) -> ChatResult<()> {
        let mut text = format!("[#{channel_id}] == {} ==\n", embed.title);
        for field in &embed.fields {
            text.push_str(&format!("  {}: {}\n", field.name, field.value));
        }
        self.write(text).await
    }

    async fn set_presence(&self, status: PresenceStatus, text: &str) -> ChatResult<()> {
        self.write(format!("[presence:{status:?}] {text}\n")).await
    }

    async fn user_info(&self, user_id: &str) -> ChatResult<UserInfo> {
        Ok(UserInfo {
            username: user_id.to_string(),
            discriminator: "0".to_string(),
        })
    }
}
