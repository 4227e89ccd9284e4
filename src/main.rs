//! send_whatsapp - send one WhatsApp message and exit
//!
//! Exit codes: 0 sent, 1 usage error, 2 chat not found, 3 any other failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use patient_notifier::commands::send_message::{self, ExitStatus, SendOptions};
use patient_notifier::{Config, WebClient};

#[derive(Parser)]
#[command(name = "send_whatsapp")]
#[command(about = "Send a single WhatsApp message to a chat by name or number", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config.yml (defaults to ./config.yml, then ../config.yml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session identifier; each id keeps its own browser profile
    #[arg(long)]
    client_id: Option<String>,

    /// Directory holding persisted sessions
    #[arg(long)]
    auth_dir: Option<PathBuf>,

    /// Show the browser window instead of running headless
    #[arg(long, default_value_t = false)]
    headed: bool,

    /// Seconds to wait after sending before closing the session
    #[arg(long)]
    send_delay_secs: Option<u64>,

    /// Chat display name or phone number, e.g. "Dr. Smith" or "+1 555 123 4567"
    recipient: Option<String>,

    /// Message text; several words are joined with single spaces
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    message: Vec<String>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(client_id) = &self.client_id {
            config.client_id = client_id.clone();
        }
        if let Some(auth_dir) = &self.auth_dir {
            config.auth_dir = auth_dir.clone();
        }
        if self.headed {
            config.headless = false;
        }
        if let Some(secs) = self.send_delay_secs {
            config.send_delay = Duration::from_secs(secs);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::from_default_env().add_directive(
        "patient_notifier=info"
            .parse()
            .unwrap_or_else(|_| LevelFilter::INFO.into()),
    );
    // stdout is reserved for the login code and the result line
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                eprintln!("{}", send_message::USAGE);
                ExitStatus::Usage.into()
            } else {
                ExitStatus::Success.into()
            };
        }
    };

    // Load .env for local development
    let _ = dotenvy::dotenv();
    init_logging();

    let invocation = match send_message::validate(cli.recipient.as_deref(), &cli.message) {
        Ok(invocation) => invocation,
        Err(status) => return status.into(),
    };

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            eprintln!("❌ {}", err);
            return ExitStatus::Failure.into();
        }
    };
    cli.apply_overrides(&mut config);
    debug!(
        client_id = %config.client_id,
        auth_dir = %config.auth_dir.display(),
        headless = config.headless,
        "configuration loaded"
    );

    let options = SendOptions {
        settle_delay: config.send_delay,
    };
    let status = send_message::execute(&invocation, &options, || WebClient::initialize(&config)).await;
    status.into()
}
