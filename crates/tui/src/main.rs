mod app;

use std::{fs::OpenOptions, path::Path, sync::Arc};

use anyhow::{Context, Result};
use tarot_core::{
    config::{self, AppConfig},
    CardCatalog, GameSession, PersistedCounter,
};
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    config::ensure_default_config()?;
    let config = AppConfig::load()?;
    init_logging(&config.log_dir())?;

    let rules = config.rules();
    let counter = PersistedCounter::open(
        config.store(),
        rules.quota_key.clone(),
        rules.initial_draws,
    );
    let mut session = GameSession::new(rules, CardCatalog::standard(), counter);
    if let Some(seed) = config.seed {
        session = session.with_seed(seed);
    }

    let quota_rx = match session.counter_mut().watch() {
        Ok(receiver) => Some(receiver),
        Err(err) => {
            tracing::warn!(?err, "Cross-window quota sync disabled");
            None
        }
    };

    let mut app = app::TarotApp::new(session);
    if let Some(receiver) = quota_rx {
        app.attach_quota(receiver);
    }
    app.run().await
}

fn init_logging(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;
    let log_path = log_dir.join("tarot.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_writer(Arc::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    Ok(())
}
