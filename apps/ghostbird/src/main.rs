use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ghostbird::config::Config;
use ghostbird::editor::{FileEditor, LogIndicator};
use ghostbird::heart::IntervalHeart;
use ghostbird::runner::GhostTextRunner;
use ghostbird::session::SessionStatus;
use ghostbird::telemetry::logging::{self, LogConfig, LogLevel};
use ghostbird::transport::{ReqwestWebClient, WebSocketConnector};
use tracing::info;

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(25);

#[derive(Parser, Debug)]
#[command(
    name = "ghostbird",
    about = "Edit a local text file in an external editor through GhostText"
)]
struct Cli {
    /// File to keep in sync with the external editor
    #[arg(long, short = 'f')]
    file: PathBuf,

    /// Title shown by the external editor (defaults to the file name)
    #[arg(long)]
    title: Option<String>,

    /// Port of a GhostText server on localhost [env: GHOSTBIRD_SERVER_PORT]
    #[arg(long, conflicts_with = "server_url")]
    server_port: Option<u16>,

    /// Full URL of the GhostText server [env: GHOSTBIRD_SERVER_URL]
    #[arg(long)]
    server_url: Option<String>,

    /// Identifies this client to the server as <id>.localhost [env: GHOSTBIRD_CLIENT_ID]
    #[arg(long)]
    client_id: Option<String>,

    /// How often the file is checked for local edits
    #[arg(long, default_value_t = 250)]
    poll_ms: u64,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[arg(long, help = "Write logs to a file instead of stderr")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })?;

    let mut config = Config::from_env()?;
    if let Some(port) = cli.server_port {
        config = config.with_server_port(port)?;
    }
    if let Some(url) = cli.server_url.as_deref() {
        config = config.with_server_url(url)?;
    }
    if let Some(client_id) = cli.client_id.clone() {
        config = config.with_client_id(client_id);
    }
    let options = config.client_options()?;

    let title = cli.title.clone().unwrap_or_else(|| {
        cli.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let editor = Arc::new(
        FileEditor::open(
            &cli.file,
            title,
            options.client_host_name.clone(),
            Duration::from_millis(cli.poll_ms.max(1)),
        )
        .await
        .with_context(|| format!("failed to open {}", cli.file.display()))?,
    );
    let indicator = LogIndicator::new(cli.file.display().to_string());

    let connector = Arc::new(WebSocketConnector::new(Arc::new(ReqwestWebClient::new()?)));
    let runner = GhostTextRunner::new(
        connector,
        options.server_url.clone(),
        Arc::new(IntervalHeart::new(HEARTBEAT_PERIOD)),
    );

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let editor = editor.clone();
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            info!("interrupted; closing session");
            interrupted.store(true, Ordering::SeqCst);
            editor.close();

            // A second interrupt skips teardown.
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("ghostbird: interrupted twice, exiting");
                std::process::exit(130);
            }
        });
    }

    info!(server = %options.server_url, file = %cli.file.display(), "starting");
    let status = runner.run(&indicator, editor.as_ref()).await;
    eprintln!("ghostbird: session {status}");

    if status == SessionStatus::Finished || interrupted.load(Ordering::SeqCst) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
