use tgconsole_control::config::ControlConfig;
use tgconsole_control::state::AppState;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Returns the file writer guard; dropping it stops file logging.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer());

    match std::env::var_os("TGC_LOG_DIR") {
        Some(dir) => {
            let file = tracing_appender::rolling::daily(dir, "tgconsole-control.log");
            let (writer, guard) = tracing_appender::non_blocking(file);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let config = ControlConfig::from_env()?;
    let addr = config.listen_addr;
    tracing::info!(
        scripts_dir = %config.scripts_dir.display(),
        data_dir = %config.data_dir.display(),
        python = %config.python.display(),
        "configuration loaded"
    );

    let state = AppState::from_config(config);
    let app = tgconsole_control::router(state);

    tracing::info!(%addr, "tgconsole-control HTTP listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    // Workers run in their own sessions and survive shutdown; the stop route finds them again.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
