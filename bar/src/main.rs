use std::sync::Arc;

use log::{error, info, warn};

use crate::api::build_bar;
use crate::config::Config;
use crate::filters::routes;
use crate::notify::{Dispatcher, SlackNotifier, SmtpNotifier};

mod access;
mod api;
mod config;
mod error;
mod filters;
mod menu;
mod notify;
mod repository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("could not read .env: {}", e);
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;

    let repository = repository::connect(&config).await?;
    info!("using {} storage", repository.name());

    let slack = SlackNotifier::new(config.slack_webhook_url.clone());
    if !slack.is_configured() {
        warn!("SLACK_WEBHOOK_URL not set, order notifications are disabled");
    }
    let smtp = SmtpNotifier::new(&config.smtp)?;
    if smtp.is_configured() {
        info!("ready emails go out through {}:{}", config.smtp.host, config.smtp.port);
    } else {
        warn!("SMTP_USER/SMTP_PASS not set, ready emails are disabled");
    }

    let bar = build_bar(repository, Dispatcher::new(Arc::new(slack), Arc::new(smtp)));
    let routes = routes(bar, config.static_dir.clone());

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(([0, 0, 0, 0], config.port), shutdown_signal())?;
    info!("bar listening on http://{}", addr);
    server.await;
    info!("bar shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received ctrl+c, shutting down"),
            Err(e) => {
                error!("could not listen for ctrl+c: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("received terminate signal, shutting down");
            }
            Err(e) => {
                error!("could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
