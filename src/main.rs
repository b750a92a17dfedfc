use std::sync::Arc;

use postcard_bot::channels::{Channel, CliChannel, Presenter, TelegramChannel};
use postcard_bot::config::BotConfig;
use postcard_bot::logging::init_logging;
use postcard_bot::store::{CompletionStore, LibSqlCompletionStore};
use postcard_bot::wizard::{
    AssetResolver, SessionStore, StepEngine, WizardDispatcher, WizardRouteState, WizardService,
    spawn_expiry_task, wizard_routes,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env()?;
    let _logging = init_logging(&config.log)?;

    eprintln!("🖼  Postcard bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Assets: {}", config.wizard.assets_dir.display());
    eprintln!("   Database: {}", config.db_path.display());

    // ── Wizard definition ───────────────────────────────────────────────
    let table = config.wizard.load_step_table()?;
    let texts = Arc::new(config.wizard.load_texts()?);
    let resolver = AssetResolver::new(&config.wizard.assets_dir);

    match resolver.validate_canvas(&table)? {
        Some((width, height)) => {
            tracing::info!(width, height, steps = table.total_steps(), "Asset tree validated")
        }
        None => tracing::warn!("No assets found; every step will fail until assets are added"),
    }

    // ── Database ────────────────────────────────────────────────────────
    let completions: Arc<dyn CompletionStore> =
        Arc::new(LibSqlCompletionStore::new_local(&config.db_path).await?);

    // ── Channel ─────────────────────────────────────────────────────────
    let (channel, presenter): (Arc<dyn Channel>, Arc<dyn Presenter>) = match &config.telegram {
        Some(telegram) => {
            let channel = Arc::new(TelegramChannel::new(
                telegram.bot_token.clone(),
                telegram.allowed_users.clone(),
                Arc::clone(&texts),
            ));
            if let Err(e) = channel.health_check().await {
                tracing::warn!("Telegram health check failed: {e}");
            }
            eprintln!("   Channel: telegram");
            let presenter: Arc<dyn Presenter> = channel.clone();
            (channel as Arc<dyn Channel>, presenter)
        }
        None => {
            let channel = Arc::new(CliChannel::new(
                Arc::clone(&texts),
                &config.wizard.cli_out_dir,
            ));
            eprintln!(
                "   Channel: cli (images in {})",
                config.wizard.cli_out_dir.display()
            );
            let presenter: Arc<dyn Presenter> = channel.clone();
            (channel as Arc<dyn Channel>, presenter)
        }
    };

    // ── Sessions + service ──────────────────────────────────────────────
    let sessions = SessionStore::new();
    let _expiry_handle = spawn_expiry_task(
        Arc::clone(&sessions),
        config.wizard.sweep_interval,
        config.wizard.session_idle_timeout,
    );

    let mut service = WizardService::new(
        StepEngine::new(Arc::new(table), resolver),
        sessions,
        presenter,
        Arc::clone(&completions),
    );
    if let Some(dir) = &config.wizard.scratch_dir {
        service = service.with_scratch_dir(dir);
    }
    let service = Arc::new(service);

    // ── Status REST ─────────────────────────────────────────────────────
    if let Some(port) = config.status_port {
        let app = wizard_routes(WizardRouteState {
            service: Arc::clone(&service),
            completions: Arc::clone(&completions),
        });
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        eprintln!("   Status API: http://0.0.0.0:{port}/api/wizard/health");
        tokio::spawn(async move {
            tracing::info!(port, "Status server started");
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Status server stopped: {e}");
            }
        });
    }

    // ── Main loop ───────────────────────────────────────────────────────
    let dispatcher = WizardDispatcher::new(service);
    let stream = channel.start().await?;

    tokio::select! {
        _ = dispatcher.run(stream) => {
            tracing::info!("Channel input ended");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    channel.shutdown().await?;
    Ok(())
}
