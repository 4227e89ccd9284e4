//! WhatsApp Web client on top of a DevTools page session

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::browser::{Browser, LaunchOptions};
use super::cdp::CdpConnection;
use super::{LocalAuth, MessengerClient, SessionEvent};
use crate::chat::{Chat, ChatId, SendReceipt};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::{has_cached_session, SessionLock};

const PROBE_JS: &str = include_str!("js/probe.js");
const INSTALL_JS: &str = include_str!("js/install.js");

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// A page target attached with a flattened session.
pub struct Page {
    conn: Arc<CdpConnection>,
    session_id: String,
}

impl Page {
    pub async fn open(conn: Arc<CdpConnection>) -> Result<Self> {
        let target = conn
            .call("Target.createTarget", json!({ "url": "about:blank" }), None)
            .await?;
        let target_id = target["targetId"]
            .as_str()
            .ok_or_else(|| Error::Cdp("Target.createTarget returned no targetId".into()))?
            .to_string();

        let attached = conn
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
                None,
            )
            .await?;
        let session_id = attached["sessionId"]
            .as_str()
            .ok_or_else(|| Error::Cdp("Target.attachToTarget returned no sessionId".into()))?
            .to_string();

        Ok(Self { conn, session_id })
    }

    pub async fn navigate(&self, url: &str) -> Result<()> {
        let reply = self
            .conn
            .call("Page.navigate", json!({ "url": url }), Some(&self.session_id))
            .await?;
        if let Some(text) = reply["errorText"].as_str() {
            return Err(Error::Cdp(format!("navigation to {} failed: {}", url, text)));
        }
        Ok(())
    }

    /// Evaluate an expression, awaiting promises, and decode its JSON value.
    pub async fn evaluate<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
        let reply = self
            .conn
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                }),
                Some(&self.session_id),
            )
            .await?;
        decode_evaluation(reply)
    }
}

pub fn decode_evaluation<T: DeserializeOwned>(reply: Value) -> Result<T> {
    if let Some(details) = reply.get("exceptionDetails") {
        let message = details
            .pointer("/exception/description")
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("uncaught exception");
        return Err(Error::Script(message.to_string()));
    }
    let value = reply.pointer("/result/value").cloned().unwrap_or(Value::Null);
    Ok(serde_json::from_value(value)?)
}

/// Page state as reported by the probe script.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Probe {
    Loading,
    Login { code: String },
    Ready,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStep {
    /// Same token still on screen
    Repeat,
    Issue(String),
    Exhausted,
}

/// Counts distinct login tokens against the retry limit.
#[derive(Debug, Default)]
pub struct LoginTracker {
    last: Option<String>,
    issued: u32,
    max_retries: u32,
}

impl LoginTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn observe(&mut self, code: String) -> LoginStep {
        if self.last.as_deref() == Some(code.as_str()) {
            return LoginStep::Repeat;
        }
        if self.max_retries > 0 && self.issued >= self.max_retries {
            return LoginStep::Exhausted;
        }
        self.issued += 1;
        self.last = Some(code.clone());
        LoginStep::Issue(code)
    }
}

#[derive(Debug, Clone)]
struct AuthPolicy {
    poll_interval: Duration,
    timeout: Option<Duration>,
    qr_max_retries: u32,
}

impl AuthPolicy {
    fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: POLL_INTERVAL,
            timeout: (!config.auth_timeout.is_zero()).then_some(config.auth_timeout),
            qr_max_retries: config.qr_max_retries,
        }
    }
}

/// What the authentication driver needs from the page.
#[async_trait]
pub trait PageProbe: Send + Sync {
    /// Current login state of the page.
    async fn probe(&self) -> Result<Probe>;

    /// Expose the helper functions used by [`MessengerClient`] calls.
    async fn install(&self) -> Result<()>;
}

#[async_trait]
impl PageProbe for Page {
    async fn probe(&self) -> Result<Probe> {
        self.evaluate(PROBE_JS).await
    }

    async fn install(&self) -> Result<()> {
        self.evaluate::<bool>(INSTALL_JS).await.map(|_| ())
    }
}

/// Poll the page until it is usable or authentication is given up on.
async fn drive_authentication<P>(page: Arc<P>, policy: AuthPolicy, events: mpsc::Sender<SessionEvent>)
where
    P: PageProbe + ?Sized,
{
    let deadline = policy.timeout.map(|t| Instant::now() + t);
    let mut ticker = tokio::time::interval(policy.poll_interval);
    let mut tracker = LoginTracker::new(policy.qr_max_retries);

    loop {
        ticker.tick().await;

        if let (Some(deadline), Some(timeout)) = (deadline, policy.timeout) {
            if Instant::now() >= deadline {
                let reason = format!("not authenticated within {}s", timeout.as_secs());
                let _ = events.send(SessionEvent::AuthFailure(reason)).await;
                return;
            }
        }

        let probe = match page.probe().await {
            Ok(probe) => probe,
            Err(err) => {
                // Navigation in progress destroys the execution context.
                debug!("page probe failed: {}", err);
                continue;
            }
        };

        match probe {
            Probe::Loading => {}
            Probe::Login { code } => match tracker.observe(code) {
                LoginStep::Repeat => {}
                LoginStep::Issue(code) => {
                    if events.send(SessionEvent::LoginCode(code)).await.is_err() {
                        return;
                    }
                }
                LoginStep::Exhausted => {
                    let reason = "max login code retries reached".to_string();
                    let _ = events.send(SessionEvent::AuthFailure(reason)).await;
                    return;
                }
            },
            Probe::Ready => {
                let event = match page.install().await {
                    Ok(()) => SessionEvent::Ready,
                    Err(err) => SessionEvent::AuthFailure(format!("chat store unavailable: {}", err)),
                };
                let _ = events.send(event).await;
                return;
            }
        }
    }
}

/// WhatsApp Web session in a dedicated Chromium profile.
pub struct WebClient {
    browser: Option<Browser>,
    conn: Arc<CdpConnection>,
    page: Arc<Page>,
    events: mpsc::Receiver<SessionEvent>,
    driver: JoinHandle<()>,
    _lock: SessionLock,
}

impl WebClient {
    /// Lock the profile, start the browser and begin authenticating.
    pub async fn initialize(config: &Config) -> Result<Self> {
        let lock = SessionLock::acquire(config)?;
        let auth = LocalAuth::from_config(config);

        if has_cached_session(config) {
            info!(client_id = %auth.client_id, "restoring persisted session");
        } else {
            info!(client_id = %auth.client_id, "no persisted session, expect a login code");
        }

        let browser = Browser::launch(&LaunchOptions::new(config, &auth)).await?;
        let conn = Arc::new(CdpConnection::connect(browser.ws_url(), CALL_TIMEOUT).await?);
        let page = Arc::new(Page::open(conn.clone()).await?);
        page.navigate(&config.web_url).await?;

        let (tx, events) = mpsc::channel(8);
        let driver = tokio::spawn(drive_authentication(
            page.clone(),
            AuthPolicy::from_config(config),
            tx,
        ));

        Ok(Self {
            browser: Some(browser),
            conn,
            page,
            events,
            driver,
            _lock: lock,
        })
    }
}

#[async_trait]
impl MessengerClient for WebClient {
    async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    async fn list_chats(&mut self) -> Result<Vec<Chat>> {
        self.page.evaluate("window.__notifier.listChats()").await
    }

    async fn send_message(&mut self, chat: &ChatId, text: &str) -> Result<SendReceipt> {
        let expression = format!(
            "window.__notifier.sendMessage({}, {})",
            serde_json::to_string(&chat.serialized)?,
            serde_json::to_string(text)?
        );
        self.page.evaluate(&expression).await
    }

    async fn destroy(&mut self) -> Result<()> {
        self.driver.abort();

        let Some(browser) = self.browser.take() else {
            return Ok(());
        };

        let closed = self.conn.call("Browser.close", json!({}), None).await;
        if let Err(err) = &closed {
            warn!("Browser.close failed: {}", err);
        }
        let exited = browser.close(CLOSE_GRACE).await;

        closed.and(exited)
    }
}
