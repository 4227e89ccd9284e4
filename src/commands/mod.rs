//! Command implementations
//!
//! Each module backs one binary: `send_message` for `send_whatsapp`,
//! `watch` for `patient_watcher`.

pub mod send_message;
pub mod watch;

// Re-export commonly used types
pub use send_message::{execute as send_execute, ExitStatus, Invocation, SendOptions};
pub use watch::{load_config as load_watch_config, WatchConfig, Watcher};
