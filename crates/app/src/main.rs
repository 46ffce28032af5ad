mod config;
mod controller;
mod encoding;
mod i18n;
mod registry;
mod schedule;
mod sensors;
mod session;
mod settings;
mod state;
mod store;
mod sync;
mod voice;
mod web;

use anyhow::Result;
use std::{env, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use session::App;
use settings::SettingsDb;
use voice::LogSpeaker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:shrimptech.db?mode=rwc".to_string());
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let web_port: u16 = env::var("WEB_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8080);

    // ── Config file (backend profiles) ──────────────────────────────
    let cfg = config::load(&config_path)?;
    info!(profiles = cfg.profiles.len(), "config loaded");

    // ── Local settings ──────────────────────────────────────────────
    let db = SettingsDb::connect(&db_url).await?;
    db.migrate().await?;

    // ── Session for the last used profile ───────────────────────────
    let app = Arc::new(App::open(cfg, db, Arc::new(LogSpeaker)).await?);
    {
        let session = app.session().await;
        let mut st = session.shared.write().await;
        st.record_system(format!("controller started on {}", session.profile));
    }

    // ── HTTP API ────────────────────────────────────────────────────
    web::serve(app, web_port).await
}
