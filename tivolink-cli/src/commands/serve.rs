//! Serve command - run the TiVoConnect HTTP server.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tivolink::server::{self, AppState};
use tivolink::transcode::{FfmpegTranscoder, Transcoder};
use tokio::sync::Notify;

use crate::error::CliError;
use crate::runner::CliRunner;

/// How often idle transcode sessions are swept.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Arguments for the serve command.
pub struct ServeArgs {
    pub port: Option<u16>,
}

/// Run the serve command until Ctrl+C.
pub fn run(mut runner: CliRunner, args: ServeArgs) -> Result<(), CliError> {
    if let Some(port) = args.port {
        runner.config_mut().server.port = port;
    }
    runner.log_startup("serve");

    let (config, _log_guard) = runner.into_config();
    if config.shares.is_empty() {
        tracing::warn!("No shares configured; only the root container will be served");
    }

    let port = config.server.port;
    let ffmpeg = Arc::new(FfmpegTranscoder::new(config.server.clone()));
    let transcoder: Arc<dyn Transcoder> = ffmpeg.clone();
    let state = Arc::new(AppState::new(config, transcoder));

    println!("TivoLink v{}", tivolink::VERSION);
    println!("=============");
    println!();
    for share in &state.config.shares {
        println!("  {:<20} {:<6} {}", share.name, share.kind, share.path.display());
    }
    println!();
    println!("Listening on port {}. Press Ctrl+C to stop.", port);

    let shutdown = Arc::new(Notify::new());
    let signal = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        println!();
        println!("Received shutdown signal, stopping...");
        signal.notify_one();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Serve)?;

    runtime.block_on(async move {
        let reaper = tokio::spawn(async move {
            let mut tick = tokio::time::interval(REAP_INTERVAL);
            loop {
                tick.tick().await;
                ffmpeg.sessions().reap_idle();
            }
        });

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let result = server::serve(state, addr, async move { shutdown.notified().await }).await;
        reaper.abort();
        result.map_err(CliError::Serve)
    })?;

    println!("Server stopped.");
    Ok(())
}
