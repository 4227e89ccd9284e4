//! Patient page watcher
//!
//! Polls each patient's page, archives a snapshot whenever the normalised
//! text changes and asks the sender binary to announce it on WhatsApp:
//!
//! ```text
//! <archive_dir>/<id>/last_hash.txt
//! <archive_dir>/<id>/<YYYYMMDD_HHMMSS_TZ>.html
//! <archive_dir>/<id>/<YYYYMMDD_HHMMSS_TZ>.sha256
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use reqwest::Client;
use scraper::{ElementRef, Html, Node, Selector};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

pub const DEFAULT_TEMPLATE: &str = "Update detected for patient {id} at {time}";
pub const SENDER_BINARY: &str = "send_whatsapp";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%Z";

static MAIN_FORM: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("form#form1").expect("valid form selector"));

#[derive(Debug, Deserialize)]
struct WatcherFile {
    base_url: Option<String>,
    #[serde(default = "default_patient_list")]
    patient_list_file: String,
    #[serde(default = "default_interval")]
    check_every_sec: u64,
    #[serde(default = "default_timezone")]
    timezone: String,
    #[serde(default = "default_archive_dir")]
    archive_dir: PathBuf,
    #[serde(default = "default_request_timeout")]
    request_timeout_sec: u64,
    #[serde(default)]
    whatsapp: NotifyFile,
}

#[derive(Debug, Default, Deserialize)]
struct NotifyFile {
    #[serde(default)]
    enabled: bool,
    recipient: Option<String>,
    template: Option<String>,
    command: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct PatientListFile {
    #[serde(default)]
    patient_ids: Vec<serde_yaml::Value>,
}

fn default_patient_list() -> String {
    "patients.txt".to_string()
}

fn default_interval() -> u64 {
    600
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("patient")
}

fn default_request_timeout() -> u64 {
    30
}

/// Where and how change notifications are sent.
#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub enabled: bool,
    pub recipient: Option<String>,
    pub template: String,
    pub command: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub base_url: String,
    pub patient_ids: Vec<String>,
    pub interval: Duration,
    pub timezone: Tz,
    pub archive_dir: PathBuf,
    pub request_timeout: Duration,
    pub notify: NotifySettings,
}

/// The sender binary installed next to the running executable.
pub fn default_sender_command() -> PathBuf {
    let file_name = format!("{}{}", SENDER_BINARY, std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
        .unwrap_or_else(|| PathBuf::from(file_name))
}

/// Load and validate the watcher configuration.
pub fn load_config(path: &Path) -> Result<WatchConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Config file not found: {} ({})", path.display(), e)))?;
    if content.trim().is_empty() {
        return Err(Error::Config(format!("{} is empty", path.display())));
    }
    let file: WatcherFile = serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid YAML in {}: {}", path.display(), e)))?;

    let base_url = file
        .base_url
        .filter(|url| url.contains("{id}"))
        .ok_or_else(|| Error::Config("`base_url` missing or lacks the {id} placeholder".into()))?;

    let timezone: Tz = file
        .timezone
        .parse()
        .map_err(|_| Error::Config(format!("Unknown timezone `{}`", file.timezone)))?;

    let config_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let patient_ids = read_patient_ids(&config_dir.join(&file.patient_list_file))?;
    if patient_ids.is_empty() {
        return Err(Error::Config("Patient list is empty".into()));
    }

    Ok(WatchConfig {
        base_url,
        patient_ids,
        interval: Duration::from_secs(file.check_every_sec),
        timezone,
        archive_dir: file.archive_dir,
        request_timeout: Duration::from_secs(file.request_timeout_sec),
        notify: NotifySettings {
            enabled: file.whatsapp.enabled,
            recipient: file.whatsapp.recipient.filter(|r| !r.trim().is_empty()),
            template: file
                .whatsapp
                .template
                .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
            command: file.whatsapp.command.unwrap_or_else(default_sender_command),
        },
    })
}

/// Patient ids from a YAML file (`patient_ids: [...]`) or one id per line.
pub fn read_patient_ids(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "Patient list file not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)?;

    let is_yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("yml") || ext.eq_ignore_ascii_case("yaml"))
        .unwrap_or(false);

    if !is_yaml {
        return Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect());
    }

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let list: PatientListFile = serde_yaml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid YAML in {}: {}", path.display(), e)))?;

    list.patient_ids
        .into_iter()
        .map(|value| match value {
            serde_yaml::Value::String(s) => Ok(s),
            serde_yaml::Value::Number(n) => Ok(n.to_string()),
            other => Err(Error::Config(format!("Unsupported patient id: {:?}", other))),
        })
        .collect()
}

/// Elements whose text is code or markup rather than page content.
const NON_CONTENT: &[&str] = &["script", "style", "template", "noscript"];

fn visible_text(root: ElementRef<'_>) -> String {
    root.descendants()
        .filter_map(|node| match node.value() {
            Node::Text(text) => Some((node, text)),
            _ => None,
        })
        .filter(|(node, _)| {
            !node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| NON_CONTENT.contains(&el.name()))
            })
        })
        .map(|(_, text)| text.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Visible text of the main form (or the whole page), whitespace-trimmed and concatenated.
pub fn normalize(html: &str) -> String {
    let document = Html::parse_document(html);
    match document.select(&MAIN_FORM).next() {
        Some(form) => visible_text(form),
        None => visible_text(document.root_element()),
    }
}

pub fn sha256_hex(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

pub fn render_template(template: &str, patient_id: &str, stamp: &str) -> String {
    template.replace("{id}", patient_id).replace("{time}", stamp)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Unchanged,
    /// First snapshot ever archived for this patient
    Baseline { snapshot: PathBuf, stamp: String },
    Changed { snapshot: PathBuf, stamp: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Disabled,
    MissingRecipient,
    Spawned,
    Failed(String),
}

/// Launch the sender for one change. The child runs detached with null stdio.
pub fn notify(settings: &NotifySettings, patient_id: &str, stamp: &str) -> NotifyOutcome {
    if !settings.enabled {
        return NotifyOutcome::Disabled;
    }
    let Some(recipient) = settings.recipient.as_deref() else {
        warn!("WhatsApp recipient not configured; skipping notification");
        return NotifyOutcome::MissingRecipient;
    };

    let message = render_template(&settings.template, patient_id, stamp);
    match Command::new(&settings.command)
        .arg(recipient)
        .arg(&message)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(_child) => {
            info!(patient = patient_id, "WhatsApp notify triggered");
            NotifyOutcome::Spawned
        }
        Err(err) => {
            error!(
                command = %settings.command.display(),
                "cannot start WhatsApp sender: {}", err
            );
            NotifyOutcome::Failed(err.to_string())
        }
    }
}

pub struct Watcher {
    http: Client,
    config: WatchConfig,
}

impl Watcher {
    pub fn new(config: WatchConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent("patient-watcher/0.1")
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn patient_url(&self, patient_id: &str) -> String {
        self.config.base_url.replace("{id}", patient_id)
    }

    /// Fetch one page and archive it if its digest moved.
    pub async fn check(&self, patient_id: &str) -> Result<CheckOutcome> {
        let url = self.patient_url(patient_id);
        let html = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let digest = sha256_hex(&normalize(&html));
        let dir = self.config.archive_dir.join(patient_id);
        fs::create_dir_all(&dir).await?;

        let hash_file = dir.join("last_hash.txt");
        let previous = match fs::read_to_string(&hash_file).await {
            Ok(hash) => Some(hash),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        if previous.as_deref() == Some(digest.as_str()) {
            return Ok(CheckOutcome::Unchanged);
        }

        let stamp = Utc::now()
            .with_timezone(&self.config.timezone)
            .format(STAMP_FORMAT)
            .to_string();
        let snapshot = dir.join(format!("{}.html", stamp));
        fs::write(&snapshot, &html).await?;
        fs::write(dir.join(format!("{}.sha256", stamp)), &digest).await?;
        fs::write(&hash_file, &digest).await?;

        Ok(match previous {
            None => CheckOutcome::Baseline { snapshot, stamp },
            Some(_) => CheckOutcome::Changed { snapshot, stamp },
        })
    }

    /// Check one patient, log the outcome and notify on new snapshots.
    pub async fn check_and_notify(&self, patient_id: &str) -> Option<CheckOutcome> {
        let outcome = match self.check(patient_id).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(patient = patient_id, "check failed: {}", err);
                return None;
            }
        };

        match &outcome {
            CheckOutcome::Unchanged => info!(patient = patient_id, "no change"),
            CheckOutcome::Baseline { snapshot, stamp } => {
                info!(patient = patient_id, snapshot = %snapshot.display(), "first run, baseline saved");
                notify(&self.config.notify, patient_id, stamp);
            }
            CheckOutcome::Changed { snapshot, stamp } => {
                warn!(patient = patient_id, snapshot = %snapshot.display(), "⚠️  change detected");
                notify(&self.config.notify, patient_id, stamp);
            }
        }
        Some(outcome)
    }

    /// One pass over every configured patient.
    pub async fn check_all(&self) {
        for patient_id in &self.config.patient_ids {
            self.check_and_notify(patient_id).await;
        }
    }

    /// Check every patient, sleep, repeat until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// Loop until `shutdown` resolves; a pass in flight is abandoned at that point.
    pub async fn run_until<F: Future>(&self, shutdown: F) -> Result<()> {
        info!(
            patients = self.config.patient_ids.len(),
            interval_secs = self.config.interval.as_secs(),
            "monitoring, Ctrl-C to stop"
        );

        // Polled across iterations so a signal during a pass is not missed.
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = self.check_all() => {}
                _ = &mut shutdown => break,
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                _ = &mut shutdown => break,
            }
        }

        info!("stopped by user");
        Ok(())
    }
}
