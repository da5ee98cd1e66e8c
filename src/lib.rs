// Segment Player - segment-precise playback for listening practice
// Module declarations
pub mod audio;
pub mod commands;
pub mod playback;
pub mod settings;
pub mod state;
pub mod transcript;

#[cfg(test)]
mod testing;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use audio::SharedOutput;
use commands::ShellCommand;
use playback::{decoding_element_factory, FileSource, HttpSource, PlayerService, ResourceSource};
use settings::AppSettings;
use state::AppState;

#[derive(Debug, Parser)]
#[command(name = "segment-player", version, about = "Play labelled segments of long recordings")]
pub struct Cli {
    /// Settings file (defaults to settings.json in the config directory)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Resource to open on startup
    #[arg(long)]
    pub resource: Option<String>,

    /// Transcript JSON to load on startup
    #[arg(long)]
    pub transcript: Option<PathBuf>,

    /// Render without an audio device
    #[arg(long)]
    pub headless: bool,

    /// Log filter, e.g. "debug" or "segment_player_lib=trace"
    #[arg(long)]
    pub log: Option<String>,
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_settings(cli: &Cli) -> anyhow::Result<(AppSettings, Option<PathBuf>)> {
    let app_dir = AppSettings::default_dir();
    let mut settings = match (&cli.settings, &app_dir) {
        (Some(path), _) => AppSettings::load_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        (None, Some(dir)) => AppSettings::load(dir).context("Failed to load settings")?,
        (None, None) => AppSettings::default(),
    };

    if cli.headless {
        settings.output.headless = true;
    }
    if let Some(filter) = &cli.log {
        settings.logging.filter = filter.clone();
    }
    Ok((settings, app_dir))
}

fn resource_source(settings: &AppSettings) -> Arc<dyn ResourceSource> {
    match &settings.resource.local_dir {
        Some(dir) => Arc::new(FileSource::new(dir.clone())),
        None => Arc::new(HttpSource::new(settings.resource.base_url.clone())),
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (settings, app_dir) = load_settings(&cli)?;
    init_tracing(&settings.logging.filter);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("segment-player")
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(serve(cli, settings, app_dir))
}

async fn serve(cli: Cli, settings: AppSettings, app_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let source = resource_source(&settings);
    let output = Arc::new(SharedOutput::new(settings.output.clone()));
    let factory = decoding_element_factory(
        Arc::clone(&source),
        Arc::clone(&output),
        tokio::runtime::Handle::current(),
        settings.playback.time_update_interval(),
    );
    let player = PlayerService::start(settings.playback.clone(), source, output, factory);

    let state = AppState::new(player.clone(), settings, app_dir);
    if let Some(path) = cli.transcript {
        let count = commands::load_transcript(path, &state).map_err(anyhow::Error::msg)?;
        info!("Loaded {} transcript lines", count);
    }
    if let Some(resource) = cli.resource {
        commands::open_resource(resource, &state).map_err(anyhow::Error::msg)?;
    }

    let mut states = player.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let snapshot = states.borrow_and_update().clone();
            info!(
                "Player {:?} (engine {:?}, segment {:?})",
                snapshot.state, snapshot.engine, snapshot.current_segment
            );
        }
    });

    shell(&state).await?;

    player.shutdown();
    Ok(())
}

/// Read commands from stdin until `quit` or end of input
async fn shell(state: &AppState) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"segment-player ready, type help\n").await?;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let command = match ShellCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                stdout.write_all(format!("error: {}\n", e).as_bytes()).await?;
                continue;
            }
        };
        if command == ShellCommand::Quit {
            break;
        }

        let reply = match commands::execute(command, state).await {
            Ok(Some(text)) => format!("{}\n", text),
            Ok(None) => continue,
            Err(e) => format!("error: {}\n", e),
        };
        stdout.write_all(reply.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
