//! WhatsApp Web session
//!
//! The sender only sees [`MessengerClient`]: a stream of lifecycle events plus
//! the three calls it needs once the session is ready. [`WebClient`] is the
//! production implementation, driving WhatsApp Web in a Chromium profile that
//! persists the login between runs.

pub mod browser;
pub mod cdp;
pub mod client;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::chat::{Chat, ChatId, SendReceipt};
use crate::config::Config;
use crate::error::Result;

pub use client::WebClient;

/// Lifecycle events emitted by a session before it can be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Interactive login required; the token must be scanned by a paired phone.
    LoginCode(String),
    Ready,
    AuthFailure(String),
}

/// Messaging session as consumed by the sender.
#[async_trait]
pub trait MessengerClient: Send {
    /// Next lifecycle event, `None` once the session stopped emitting.
    async fn next_event(&mut self) -> Option<SessionEvent>;

    async fn list_chats(&mut self) -> Result<Vec<Chat>>;

    async fn send_message(&mut self, chat: &ChatId, text: &str) -> Result<SendReceipt>;

    /// Release the session and everything it owns.
    async fn destroy(&mut self) -> Result<()>;
}

/// Persistent local authentication: one browser profile per client id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAuth {
    pub client_id: String,
    pub user_data_dir: PathBuf,
}

impl LocalAuth {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_id: config.client_id.clone(),
            user_data_dir: config.session_dir(),
        }
    }
}
