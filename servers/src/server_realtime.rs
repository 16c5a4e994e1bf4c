use anyhow::Result;
use lib_common::core::Dispatcher;
use servers::realtime_logic::{config, downstream, logger};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Pick up REALTIME_* variables from a local .env before clap reads the environment.
    let _ = dotenvy::dotenv();

    let settings = config::load_config();
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    log::info!(
        "Starting realtime server (grace period {:?}, host takeover {:?})",
        settings.grace_period,
        settings.host_takeover
    );

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let dispatcher = Dispatcher::new(settings.dispatcher_options());

    let mut downstream_handle = tokio::spawn(downstream::run(
        settings.clone(),
        dispatcher.clone(),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        result = &mut downstream_handle => {
            // The server stopped on its own, most likely a bind or TLS failure.
            dispatcher.shutdown();
            return result?;
        }
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());

    // Wait for the server to drain, then drop any pending session teardown.
    downstream_handle.await??;
    dispatcher.shutdown();

    log::info!("Shutdown complete.");
    Ok(())
}
