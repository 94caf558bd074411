//! Voice Turn entry point
//!
//! Configuration priority: env vars > config/{env}.yaml > config/default.yaml > defaults

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use voice_turn_config::{load_settings, Settings};
use voice_turn_server::{init_metrics, Engine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("VOICE_TURN_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized
            eprintln!(
                "Loaded configuration from files (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        },
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        },
    };

    init_tracing(&config);

    tracing::info!("Starting Voice Turn v{}", env!("CARGO_PKG_VERSION"));

    if let Some(addr) = init_metrics(&config.observability)? {
        tracing::info!("Prometheus metrics at http://{}/metrics", addr);
    }

    let engine = Engine::build(&config).await?;
    let mut source = engine.open_source()?;

    let stats = engine.run(source.as_mut(), shutdown_signal()).await?;
    tracing::info!(
        turns = stats.turns,
        skipped = stats.skipped,
        listen_failures = stats.listen_failures,
        "Shutdown complete"
    );
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.observability.log_level;
        format!("voice_turn={}", level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if config.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}
