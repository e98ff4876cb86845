use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use cadenza::presence::{DiscordPresence, PresenceClient, PresenceOpener};
use cadenza::share::HttpShareTransport;
use cadenza::term::{Interrupted, RawModeGuard};
use cadenza::{weights, Config, Player, PresenceBridge, RodioEngine, ShareBridge};

#[derive(Parser)]
#[command(name = "cadenza")]
#[command(about = "A lightweight terminal music player")]
struct Args {
    /// Play this track first, before any weighted selection
    first_track: Option<String>,

    /// JSON file mapping track name or prefix to a numeric weight
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Skip connecting to Discord entirely
    #[arg(long)]
    disable_discord: bool,

    /// Skip the enrichment API; thumbnails fall back to the deterministic URL
    #[arg(long)]
    disable_api: bool,

    /// Mirror playback progress to the listen-along server
    #[arg(long)]
    enable_share: bool,

    /// Print the selection percentages the weights produce, then exit
    #[arg(long)]
    show_weights: bool,

    /// Keep stderr and enable debug output
    #[arg(long)]
    dev: bool,
}

fn init_logging(dev: bool) -> Result<()> {
    let log_dir = Config::state_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotating file appender; stdout stays untouched for the redraw.
    let file_appender = tracing_appender::rolling::daily(&log_dir, "cadenza.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if dev { "debug" } else { "info" }));

    let subscriber = tracing_subscriber::fmt()
        .with_writer(file_writer)
        .with_target(true)
        .with_level(true)
        .with_ansi(false)
        .with_env_filter(base_filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Keep the writer alive for the process lifetime.
    std::mem::forget(guard);

    Ok(())
}

fn show_weights(weights_file: Option<&std::path::Path>) -> Result<()> {
    let files = cadenza::library::list_audio_files(".")?;
    let (tracks, table) = weights::build_weights(weights_file, files)?;

    for (track, percent) in weights::weight_report(&tracks, table.as_deref()) {
        println!("{track}: {percent:.2}%");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.dev)?;
    let config = Config::load()?;

    if args.show_weights {
        return show_weights(args.weights.as_deref());
    }

    // ALSA spews onto stderr and would tear up the redraw.
    if !args.dev {
        if let Err(e) = redirect_stderr_to_null() {
            debug!("could not silence stderr: {e}");
        }
    }

    // Sharing was explicitly requested, so failing to establish the session
    // is fatal; everything network-bound after this point is best-effort.
    let share = if args.enable_share {
        let server_url = config.share.server_url.clone();
        let bridge = tokio::task::spawn_blocking(move || {
            let transport = HttpShareTransport::new(&server_url)?;
            ShareBridge::start(Box::new(transport), &server_url)
        })
        .await??;
        Some(bridge)
    } else {
        None
    };

    let app_id = config.presence.app_id.clone();
    let opener: PresenceOpener = Box::new(move || {
        Ok(Box::new(DiscordPresence::connect(&app_id)?) as Box<dyn PresenceClient>)
    });
    let presence = PresenceBridge::new(
        opener,
        share.clone(),
        args.disable_api,
        config.presence.clone(),
    )?;
    if !args.disable_discord {
        presence.connect_initial();
    }

    let engine = RodioEngine::new()?;

    info!("cadenza starting in {:?}", std::env::current_dir()?);
    println!();

    let mut guard = RawModeGuard::acquire()?;
    let mut player = Player::new(
        Box::new(engine),
        presence.clone(),
        share,
        args.weights,
        args.first_track,
        config.playback,
    );

    let outcome = player.run().await;

    guard.release();
    presence.shutdown();

    match outcome {
        Err(e) if e.is::<Interrupted>() => {
            warn!("interrupted, shutting down");
            Ok(())
        }
        other => other,
    }
}

/// Point stderr at /dev/null so ALSA noise cannot corrupt the status block.
#[cfg(unix)]
fn redirect_stderr_to_null() -> Result<()> {
    unsafe {
        let null_fd = libc::open(
            b"/dev/null\0".as_ptr() as *const libc::c_char,
            libc::O_WRONLY,
        );
        if null_fd == -1 {
            return Err(anyhow::anyhow!("Failed to open /dev/null"));
        }

        if libc::dup2(null_fd, libc::STDERR_FILENO) == -1 {
            libc::close(null_fd);
            return Err(anyhow::anyhow!("Failed to redirect stderr"));
        }

        libc::close(null_fd);
    }

    Ok(())
}

#[cfg(not(unix))]
fn redirect_stderr_to_null() -> Result<()> {
    Ok(())
}
