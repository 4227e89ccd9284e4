//! WhatsApp notifier library
//!
//! This library provides tools to:
//! - Drive a WhatsApp Web session through a local Chromium profile
//! - Look up a chat by display name or phone number and send it one message
//! - Render login codes in the terminal
//! - Watch patient pages for changes and announce them on WhatsApp

pub mod chat;
pub mod config;
pub mod error;
pub mod login_code;
pub mod session;
pub mod whatsapp;

// Re-export common types
pub use chat::{find_chat, normalize_recipient, Chat, ChatId, SendReceipt};
pub use config::Config;
pub use error::{Error, Result};
pub use session::{has_cached_session, SessionLock};
pub use whatsapp::{MessengerClient, SessionEvent, WebClient};

// Commands module uses re-exported types, so it must be declared after the re-exports
pub mod commands;
