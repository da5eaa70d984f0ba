mod archive;
mod capture;
mod capture_loop;
mod channel;
mod classifier;
mod mute;

use admute_common::config::Config;
use archive::FrameArchive;
use capture_loop::CaptureLoop;
use classifier::Classifier;
use mute::MuteController;
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        backend = ?config.classifier.backend,
        camera_index = config.camera.index,
        camera_source = ?config.camera.source,
        port = config.channel.port,
        period_secs = config.capture.period_seconds,
        mute = %config.channel.mute,
        unmute = %config.channel.unmute,
        "starting admute"
    );

    let classifier = match Classifier::from_config(&config.classifier) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build classifier");
            std::process::exit(1);
        }
    };

    let source = match capture::from_config(&config.camera) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to set up camera");
            std::process::exit(1);
        }
    };

    // Without the actuation device there is nothing useful to do.
    let channel = match channel::connect_serial(&config.channel).await {
        Ok(c) => c,
        Err(e) => {
            error!(
                error = %e,
                port = config.channel.port,
                "cannot reach the actuation device; check that it is plugged in, \
                 that the port is correct, and that no other program holds it open"
            );
            std::process::exit(1);
        }
    };

    let archive = config.archive.enabled.then(|| {
        let archive = FrameArchive::new(&config.archive.dir);
        info!(dir = archive.dir().display().to_string(), "archiving classified frames");
        archive
    });

    let controller = MuteController::new(
        channel,
        config.channel.mute.clone(),
        config.channel.unmute.clone(),
    );
    let period = config.capture.period();

    let stats = CaptureLoop::new(source, classifier, controller, archive, period)
        .run(shutdown_signal())
        .await;

    info!(
        commands_sent = stats.commands_sent,
        command_failures = stats.command_failures,
        "admute stopped"
    );
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
