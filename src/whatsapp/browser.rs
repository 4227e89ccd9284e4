//! Chromium process management
//!
//! The browser is started with `--remote-debugging-port=0`; the port it picks
//! is announced on stderr as `DevTools listening on ws://...`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::LocalAuth;
use crate::config::Config;
use crate::error::{Error, Result};

/// Desktop user agent; WhatsApp Web refuses the default headless one.
pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const CANDIDATES: &[&str] = &[
    "google-chrome-stable",
    "google-chrome",
    "chromium",
    "chromium-browser",
    "chrome",
];

const MAC_CHROME: &str = "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome";

static DEVTOOLS_BANNER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"DevTools listening on (ws://\S+)").expect("valid DevTools banner regex")
});

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: Option<PathBuf>,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub timeout: Duration,
}

impl LaunchOptions {
    pub fn new(config: &Config, auth: &LocalAuth) -> Self {
        Self {
            executable: config.browser_path.clone(),
            user_data_dir: auth.user_data_dir.clone(),
            headless: config.headless,
            timeout: config.launch_timeout,
        }
    }
}

/// Command-line flags for a dedicated, persistent profile.
pub fn launch_args(opts: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        "--remote-debugging-port=0".to_string(),
        format!("--user-data-dir={}", opts.user_data_dir.display()),
        format!("--user-agent={}", USER_AGENT),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-extensions".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
    ];
    if opts.headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

/// Extract the websocket endpoint from a stderr line.
pub fn parse_devtools_banner(line: &str) -> Option<String> {
    DEVTOOLS_BANNER
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Resolve the browser executable: explicit path, then well-known names on PATH.
pub fn find_executable(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::BrowserNotFound(format!("{} does not exist", path.display())));
    }

    if let Some(paths) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths) {
            for name in CANDIDATES {
                let candidate = dir.join(format!("{}{}", name, std::env::consts::EXE_SUFFIX));
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
    }

    let mac = Path::new(MAC_CHROME);
    if mac.is_file() {
        return Ok(mac.to_path_buf());
    }

    Err(Error::BrowserNotFound(format!(
        "none of {} found on PATH",
        CANDIDATES.join(", ")
    )))
}

async fn read_devtools_url(lines: &mut Lines<BufReader<ChildStderr>>) -> Result<String> {
    while let Some(line) = lines.next_line().await? {
        trace!(line = %line, "browser stderr");
        if let Some(url) = parse_devtools_banner(&line) {
            return Ok(url);
        }
    }
    Err(Error::BrowserLaunch(
        "browser exited before exposing DevTools".into(),
    ))
}

/// A running browser; killed when dropped.
pub struct Browser {
    child: Child,
    ws_url: String,
    stderr_drain: JoinHandle<()>,
}

impl Browser {
    pub async fn launch(opts: &LaunchOptions) -> Result<Self> {
        let executable = find_executable(opts.executable.as_deref())?;
        tokio::fs::create_dir_all(&opts.user_data_dir).await?;

        info!(
            browser = %executable.display(),
            profile = %opts.user_data_dir.display(),
            headless = opts.headless,
            "launching browser"
        );

        let mut child = Command::new(&executable)
            .args(launch_args(opts))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::BrowserLaunch(format!("{}: {}", executable.display(), e)))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::BrowserLaunch("browser stderr was not captured".into()))?;
        let mut lines = BufReader::new(stderr).lines();

        let ws_url = tokio::time::timeout(opts.timeout, read_devtools_url(&mut lines))
            .await
            .map_err(|_| {
                Error::Timeout(format!("browser did not expose DevTools within {:?}", opts.timeout))
            })??;
        debug!(%ws_url, "browser DevTools endpoint");

        // Keep the pipe drained so a chatty browser never blocks on stderr.
        let stderr_drain = tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(line = %line, "browser stderr");
            }
        });

        Ok(Self {
            child,
            ws_url,
            stderr_drain,
        })
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Wait for the process to exit after `Browser.close`, killing it after `grace`.
    pub async fn close(mut self, grace: Duration) -> Result<()> {
        let result = match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => status.map(|_| ()).map_err(Error::from),
            Err(_) => {
                warn!("browser did not exit within {:?}, killing it", grace);
                self.child.kill().await.map_err(Error::from)
            }
        };
        self.stderr_drain.abort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn options(headless: bool) -> LaunchOptions {
        LaunchOptions {
            executable: None,
            user_data_dir: PathBuf::from("/tmp/profile"),
            headless,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn args_point_at_persistent_profile() {
        let args = launch_args(&options(true));
        assert!(args.contains(&"--remote-debugging-port=0".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/profile".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-agent=Mozilla/5.0")));
        assert!(args.contains(&"--headless=new".to_string()));
    }

    #[test]
    fn headed_mode_omits_headless_flag() {
        let args = launch_args(&options(false));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn parses_devtools_banner() {
        let line = "DevTools listening on ws://127.0.0.1:40123/devtools/browser/5c1e-77aa";
        assert_eq!(
            parse_devtools_banner(line).as_deref(),
            Some("ws://127.0.0.1:40123/devtools/browser/5c1e-77aa")
        );
    }

    #[test]
    fn ignores_unrelated_stderr_lines() {
        assert!(parse_devtools_banner("[1234:ERROR:gpu_init.cc(523)] Passthrough is not supported").is_none());
        assert!(parse_devtools_banner("").is_none());
    }

    #[test]
    fn explicit_executable_must_exist() {
        let err = find_executable(Some(Path::new("/nonexistent/chrome"))).unwrap_err();
        assert!(matches!(err, Error::BrowserNotFound(_)));
    }

    #[test]
    fn explicit_executable_is_used_verbatim() {
        let temp = tempdir().expect("tempdir");
        let fake = temp.path().join("my-chrome");
        std::fs::write(&fake, b"").unwrap();

        assert_eq!(find_executable(Some(&fake)).unwrap(), fake);
    }
}
