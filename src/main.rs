mod config;
mod directory;
mod error;
mod metadata;
mod player;
mod session;
mod station;
mod ui;

use anyhow::Result;
use config::Config;
use directory::StationDirectory;
use player::RodioPlayback;
use reqwest::Client;
use session::Session;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Logs go to a file; the terminal belongs to the UI.
fn init_logging() -> Result<std::path::PathBuf> {
    let data_dir = config::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("tag-radio.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tag_radio_tui=debug")),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let log_path = init_logging()?;
    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config: {:?}", Config::config_path());

    let client = Client::builder()
        .user_agent(config.http.user_agent.clone())
        .timeout(config.http_timeout())
        .build()?;

    let directory = StationDirectory::new(
        client.clone(),
        config.directory.endpoint.clone(),
        config.directory.cache_file.clone(),
    );
    info!("Station cache: {:?}", directory.cache_file());

    let (session, snapshots) = Session::new(
        RodioPlayback::new(),
        directory,
        client,
        config.poll_settings(),
        config.default_station(),
    );

    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let ui_task = tokio::task::spawn_blocking(move || ui::run_ui(snapshots, cmd_tx));

    // The audio output is tied to this thread, so the session runs here.
    session.run(cmd_rx).await;

    match ui_task.await? {
        Ok(()) => println!("Thanks for listening!"),
        Err(e) => {
            error!("UI error: {:?}", e);
            eprintln!("UI error: {:?}", e);
        }
    }

    Ok(())
}
