//! Tests for the send_message command flow against a scripted session

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use patient_notifier::chat::MessageId;
use patient_notifier::commands::send_message::{execute, run, ExitStatus, Invocation, SendOptions};
use patient_notifier::{Chat, ChatId, Error, MessengerClient, Result, SendReceipt, SessionEvent};

#[derive(Default)]
struct Calls {
    destroyed: AtomicUsize,
    sent: Mutex<Vec<(String, String)>>,
}

struct FakeClient {
    events: VecDeque<SessionEvent>,
    chats: Vec<Chat>,
    fail_send: bool,
    fail_destroy: bool,
    calls: Arc<Calls>,
}

impl FakeClient {
    fn new(events: Vec<SessionEvent>, chats: Vec<Chat>) -> (Self, Arc<Calls>) {
        let calls = Arc::new(Calls::default());
        let client = Self {
            events: events.into(),
            chats,
            fail_send: false,
            fail_destroy: false,
            calls: calls.clone(),
        };
        (client, calls)
    }
}

#[async_trait]
impl MessengerClient for FakeClient {
    async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.pop_front()
    }

    async fn list_chats(&mut self) -> Result<Vec<Chat>> {
        Ok(self.chats.clone())
    }

    async fn send_message(&mut self, chat: &ChatId, text: &str) -> Result<SendReceipt> {
        if self.fail_send {
            return Err(Error::Script("Error: WA send rejected".into()));
        }
        self.calls
            .sent
            .lock()
            .unwrap()
            .push((chat.serialized.clone(), text.to_string()));
        Ok(SendReceipt {
            id: MessageId {
                id: "3EB0ABCDEF".into(),
                serialized: format!("true_{}_3EB0ABCDEF", chat.serialized),
            },
        })
    }

    async fn destroy(&mut self) -> Result<()> {
        self.calls.destroyed.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy {
            return Err(Error::BrowserLaunch("already gone".into()));
        }
        Ok(())
    }
}

fn chat(name: &str, user: &str) -> Chat {
    Chat {
        id: ChatId::new(user, "c.us"),
        name: name.to_string(),
        is_group: false,
    }
}

fn contacts() -> Vec<Chat> {
    vec![
        chat("Nurse Station", "15550000001"),
        chat("Dr. Smith", "15550000002"),
        chat("Mom", "15551234567"),
    ]
}

fn invocation(recipient: &str, message: &str) -> Invocation {
    Invocation {
        recipient: recipient.to_string(),
        message: message.to_string(),
    }
}

fn no_delay() -> SendOptions {
    SendOptions {
        settle_delay: Duration::ZERO,
    }
}

#[tokio::test]
async fn test_send_by_display_name() {
    let (mut client, calls) = FakeClient::new(vec![SessionEvent::Ready], contacts());

    let status = run(&mut client, &invocation("Dr. Smith", "Patient stable"), &no_delay()).await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(status.code(), 0);
    assert_eq!(
        *calls.sent.lock().unwrap(),
        vec![("15550000002@c.us".to_string(), "Patient stable".to_string())]
    );
    assert_eq!(calls.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_send_by_formatted_phone_number() {
    let (mut client, calls) = FakeClient::new(vec![SessionEvent::Ready], contacts());

    let status = run(&mut client, &invocation("+1 555 123 4567", "Reminder"), &no_delay()).await;

    assert_eq!(status, ExitStatus::Success);
    let sent = calls.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "15551234567@c.us");
    assert_eq!(sent[0].1, "Reminder");
}

#[tokio::test]
async fn test_name_match_wins_over_number_match() {
    // The first chat's number equals the second chat's name.
    let chats = vec![chat("Lab", "12345"), chat("12345", "99999")];
    let (mut client, calls) = FakeClient::new(vec![SessionEvent::Ready], chats);

    let status = run(&mut client, &invocation("12345", "ping"), &no_delay()).await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(calls.sent.lock().unwrap()[0].0, "99999@c.us");
}

#[tokio::test]
async fn test_unknown_recipient_exits_not_found_without_sending() {
    let (mut client, calls) = FakeClient::new(vec![SessionEvent::Ready], contacts());

    let status = run(&mut client, &invocation("Dr. Who", "hello"), &no_delay()).await;

    assert_eq!(status, ExitStatus::NotFound);
    assert_eq!(status.code(), 2);
    assert!(calls.sent.lock().unwrap().is_empty());
    assert_eq!(calls.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_send_error_exits_failure_and_destroys_once() {
    let (mut client, calls) = FakeClient::new(vec![SessionEvent::Ready], contacts());
    client.fail_send = true;

    let status = run(&mut client, &invocation("Dr. Smith", "Patient stable"), &no_delay()).await;

    assert_eq!(status, ExitStatus::Failure);
    assert_eq!(status.code(), 3);
    assert_eq!(calls.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_destroy_error_does_not_mask_success() {
    let (mut client, calls) = FakeClient::new(vec![SessionEvent::Ready], contacts());
    client.fail_destroy = true;

    let status = run(&mut client, &invocation("Mom", "Reminder"), &no_delay()).await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(calls.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_login_codes_then_ready() {
    let events = vec![
        SessionEvent::LoginCode("2@first,token".into()),
        SessionEvent::LoginCode("2@second,token".into()),
        SessionEvent::Ready,
    ];
    let (mut client, calls) = FakeClient::new(events, contacts());

    let status = run(&mut client, &invocation("Dr. Smith", "Patient stable"), &no_delay()).await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(calls.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_auth_failure_is_terminal() {
    let events = vec![
        SessionEvent::AuthFailure("restore failed".into()),
        SessionEvent::Ready,
    ];
    let (mut client, calls) = FakeClient::new(events, contacts());

    let status = run(&mut client, &invocation("Dr. Smith", "Patient stable"), &no_delay()).await;

    assert_eq!(status, ExitStatus::Failure);
    assert!(calls.sent.lock().unwrap().is_empty());
    assert_eq!(calls.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_event_stream_ending_before_ready_fails() {
    let events = vec![SessionEvent::LoginCode("2@only,token".into())];
    let (mut client, calls) = FakeClient::new(events, contacts());

    let status = run(&mut client, &invocation("Dr. Smith", "Patient stable"), &no_delay()).await;

    assert_eq!(status, ExitStatus::Failure);
    assert_eq!(calls.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_execute_connect_failure_exits_failure() {
    let status = execute::<FakeClient, _, _>(
        &invocation("Dr. Smith", "Patient stable"),
        &no_delay(),
        || async { Err(Error::SessionLocked) },
    )
    .await;

    assert_eq!(status, ExitStatus::Failure);
}

#[tokio::test]
async fn test_execute_runs_connected_session() {
    let (client, calls) = FakeClient::new(vec![SessionEvent::Ready], contacts());

    let status = execute(
        &invocation("Dr. Smith", "Patient stable"),
        &no_delay(),
        || async move { Ok(client) },
    )
    .await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(calls.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_usage_error_never_connects() {
    use patient_notifier::commands::send_message::validate;

    let connected = Arc::new(AtomicUsize::new(0));
    let args: Vec<String> = Vec::new();

    let status = match validate(Some("Dr. Smith"), &args) {
        Ok(inv) => {
            let counter = connected.clone();
            execute::<FakeClient, _, _>(&inv, &no_delay(), || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::SessionLocked)
            })
            .await
        }
        Err(status) => status,
    };

    assert_eq!(status, ExitStatus::Usage);
    assert_eq!(status.code(), 1);
    assert_eq!(connected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_settle_delay_applies_after_send() {
    let (mut client, _calls) = FakeClient::new(vec![SessionEvent::Ready], contacts());
    let options = SendOptions {
        settle_delay: Duration::from_millis(200),
    };

    let started = std::time::Instant::now();
    let status = run(&mut client, &invocation("Dr. Smith", "Patient stable"), &options).await;

    assert_eq!(status, ExitStatus::Success);
    assert!(started.elapsed() >= Duration::from_millis(200));
}
