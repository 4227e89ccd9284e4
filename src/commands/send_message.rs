//! Send one WhatsApp message and exit
//!
//! Usage:
//!   send_whatsapp "Dr. Smith" Patient stable
//!   send_whatsapp "+1 555 123 4567" "Reminder"

use std::future::Future;
use std::process::ExitCode;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::chat::{find_chat, Chat, SendReceipt};
use crate::config::SEND_DELAY_SECS;
use crate::error::{Error, Result};
use crate::login_code;
use crate::whatsapp::{MessengerClient, SessionEvent};

pub const USAGE: &str = "Usage: send_whatsapp \"<recipient>\" \"<message>\"";

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Usage,
    NotFound,
    Failure,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Usage => 1,
            ExitStatus::NotFound => 2,
            ExitStatus::Failure => 3,
        }
    }
}

/// Exit status for a run that ended in `err`.
impl From<&Error> for ExitStatus {
    fn from(err: &Error) -> Self {
        match err {
            Error::ChatNotFound(_) => ExitStatus::NotFound,
            _ => ExitStatus::Failure,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Validated command-line arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub recipient: String,
    pub message: String,
}

impl Invocation {
    /// Recipient plus message words, joined with single spaces.
    pub fn parse(recipient: Option<&str>, words: &[String]) -> Result<Self> {
        let recipient = recipient.unwrap_or_default();
        let message = words.join(" ");

        if recipient.is_empty() || message.is_empty() {
            return Err(Error::InvalidArgument(USAGE.to_string()));
        }

        Ok(Self {
            recipient: recipient.to_string(),
            message,
        })
    }
}

/// Validate arguments, printing the usage line on failure.
pub fn validate(
    recipient: Option<&str>,
    words: &[String],
) -> std::result::Result<Invocation, ExitStatus> {
    Invocation::parse(recipient, words).map_err(|_| {
        eprintln!("{}", USAGE);
        ExitStatus::Usage
    })
}

#[derive(Debug, Clone)]
pub struct SendOptions {
    /// Wait after a successful send before tearing the session down
    pub settle_delay: Duration,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(SEND_DELAY_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent { chat: Chat, receipt: SendReceipt },
    NotFound,
}

/// Look the recipient up in the chat list and send to it.
pub async fn deliver<C>(client: &mut C, invocation: &Invocation) -> Result<Delivery>
where
    C: MessengerClient + ?Sized,
{
    let chats = client.list_chats().await?;
    debug!(count = chats.len(), "chat list loaded");

    let Some(chat) = find_chat(&chats, &invocation.recipient) else {
        return Ok(Delivery::NotFound);
    };

    let receipt = client.send_message(&chat.id, &invocation.message).await?;
    Ok(Delivery::Sent {
        chat: chat.clone(),
        receipt,
    })
}

async fn on_ready<C>(client: &mut C, invocation: &Invocation, options: &SendOptions) -> ExitStatus
where
    C: MessengerClient + ?Sized,
{
    info!("session ready");

    match deliver(client, invocation).await {
        Ok(Delivery::Sent { chat, receipt }) => {
            info!(chat = %chat.id.serialized, message_id = %receipt.id.id, "message sent");
            println!("✓ Message sent to {} (id {})", invocation.recipient, receipt.id.id);
            if !options.settle_delay.is_zero() {
                tokio::time::sleep(options.settle_delay).await;
            }
            ExitStatus::Success
        }
        Ok(Delivery::NotFound) => fail(Error::ChatNotFound(invocation.recipient.clone())),
        Err(err) => fail(err),
    }
}

fn fail(err: Error) -> ExitStatus {
    error!("{}", err);
    eprintln!("❌ {}", err);
    ExitStatus::from(&err)
}

async fn handle_events<C>(
    client: &mut C,
    invocation: &Invocation,
    options: &SendOptions,
) -> ExitStatus
where
    C: MessengerClient + ?Sized,
{
    while let Some(event) = client.next_event().await {
        match event {
            SessionEvent::LoginCode(code) => {
                info!("login required");
                login_code::present(&code);
            }
            SessionEvent::AuthFailure(reason) => {
                return fail(Error::AuthenticationFailed(reason));
            }
            SessionEvent::Ready => return on_ready(client, invocation, options).await,
        }
    }

    error!("session closed before becoming ready");
    ExitStatus::Failure
}

/// Release the session and hand back the exit status; release errors never mask it.
pub async fn shutdown<C>(client: &mut C, status: ExitStatus) -> ExitStatus
where
    C: MessengerClient + ?Sized,
{
    if let Err(err) = client.destroy().await {
        debug!("session release failed: {}", err);
    }
    status
}

/// Drive an initialized session to completion. The session is destroyed exactly once.
pub async fn run<C>(client: &mut C, invocation: &Invocation, options: &SendOptions) -> ExitStatus
where
    C: MessengerClient + ?Sized,
{
    let status = handle_events(client, invocation, options).await;
    shutdown(client, status).await
}

/// Create the session with `connect`, then run.
pub async fn execute<C, F, Fut>(invocation: &Invocation, options: &SendOptions, connect: F) -> ExitStatus
where
    C: MessengerClient,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<C>>,
{
    let mut client = match connect().await {
        Ok(client) => client,
        Err(err) => {
            error!("session initialization failed: {}", err);
            eprintln!("❌ Could not start WhatsApp session: {}", err);
            return ExitStatus::Failure;
        }
    };

    run(&mut client, invocation, options).await
}
