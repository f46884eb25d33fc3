use std::{net::SocketAddr, process::ExitCode, sync::Arc};

use teloxide::Bot;
use tracing::{error, info, warn};

use relay_core::{
    config::Config,
    dispatcher::Dispatcher,
    keepalive,
    messaging::{
        port::MessagingPort,
        pacing::{PacedMessenger, Pacing},
    },
    thread_store::JsonFileThreadStore,
};
use relay_openai::{OpenAiAssistantClient, OpenAiAssistantConfig};
use relay_telegram::{
    webhook::{self, WebhookState},
    TelegramMessenger,
};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = relay_core::logging::init("relay") {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    // Missing secrets are fatal before anything binds.
    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!(error = %e, "refusing to start");
            return ExitCode::FAILURE;
        }
    };

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "relay stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: Arc<Config>) -> anyhow::Result<()> {
    let store = Arc::new(JsonFileThreadStore::load(&cfg.threads_file));
    let assistant = Arc::new(OpenAiAssistantClient::new(OpenAiAssistantConfig::from(
        cfg.as_ref(),
    ))?);

    let telegram = TelegramMessenger::new(Bot::new(cfg.telegram_bot_token.clone()));
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(telegram.clone());
    let messenger: Arc<dyn MessagingPort> = Arc::new(PacedMessenger::new(
        raw_messenger,
        Pacing::default(),
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        store,
        assistant,
        messenger,
        cfg.bot_mention.clone(),
    ));
    let app = webhook::router(Arc::new(WebhookState { dispatcher }), &cfg.webhook_path());

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, mention = %cfg.bot_mention, "relay listening");

    match (&cfg.public_url, cfg.webhook_url()) {
        (Some(public_url), Some(webhook_url)) => {
            if let Err(e) = telegram.register_webhook(&webhook_url).await {
                error!(error = %e, "failed to register telegram webhook");
            }
            keepalive::spawn(public_url.clone(), cfg.keepalive_interval);
        }
        _ => warn!("PUBLIC_URL not set; skipping webhook registration and keep-alive"),
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
