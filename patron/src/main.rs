use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use common::api::{Order, OrderPlaced, OrderRequest, OrderStats, OrderStatus, OrderUpdated};
use futures::future::join_all;
use log::{error, info};
use rand::seq::SliceRandom;
use reqwest::Client;

/// Drives a running bar through a busy night: guests order, staff serve.
#[derive(Parser, Debug)]
#[command(name = "patron", about = "Load and smoke test for the bar service")]
struct Args {
    /// Base URL of the bar service.
    #[arg(long, default_value = "http://localhost:3000")]
    url: String,

    /// How many guests order at the same time.
    #[arg(long, default_value_t = 20)]
    guests: usize,

    /// Address that receives the "drink ready" emails.
    #[arg(long)]
    email: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let client = Client::new();

    let drinks: Vec<String> = client
        .get(format!("{}/api/drinks", args.url))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
        .context("bar returned an unexpected menu")?;
    if drinks.is_empty() {
        bail!("the bar has nothing on the menu");
    }
    info!("menu has {} drinks", drinks.len());

    let drinks = Arc::new(drinks);
    let now = Instant::now();
    let handles = (0..args.guests).map(|guest| {
        let client = client.clone();
        let url = args.url.clone();
        let drinks = drinks.clone();
        let email = args.email.clone();
        tokio::spawn(async move { serve_guest(&client, &url, guest + 1, &drinks, email).await })
    });

    let mut served = 0;
    for result in join_all(handles).await {
        match result {
            Ok(Ok(order)) => {
                info!("guest {} got their {}", order.name, order.drink);
                served += 1;
            }
            Ok(Err(e)) => error!("guest failed: {:#}", e),
            Err(e) => error!("guest task panicked: {}", e),
        }
    }
    info!("served {}/{} guests in {:.2?}", served, args.guests, now.elapsed());

    let stats: OrderStats = client
        .get(format!("{}/api/admin/stats", args.url))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    info!(
        "stats: {} total, {} pending, {} ready, {} completed",
        stats.total, stats.pending, stats.ready, stats.completed
    );

    if served != args.guests {
        bail!("{} guests were not served", args.guests - served);
    }
    Ok(())
}

async fn serve_guest(
    client: &Client,
    url: &str,
    guest: usize,
    drinks: &[String],
    email: Option<String>,
) -> Result<Order> {
    let drink = drinks
        .choose(&mut rand::thread_rng())
        .cloned()
        .context("empty menu")?;
    let placed: OrderPlaced = client
        .post(format!("{}/api/orders", url))
        .json(&OrderRequest {
            name: format!("Guest {}", guest),
            drink,
            email,
        })
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    for step in ["ready", "complete"] {
        let updated: OrderUpdated = client
            .put(format!("{}/api/orders/{}/{}", url, placed.id, step))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!("order {}: {}", placed.id, updated.message);
    }

    let order: Order = client
        .get(format!("{}/api/orders/{}", url, placed.id))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    if order.status != OrderStatus::Completed {
        bail!("order {} ended up {}", order.id, order.status);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_a_local_bar() {
        let args = Args::try_parse_from(["patron"]).unwrap();
        assert_eq!(args.url, "http://localhost:3000");
        assert_eq!(args.guests, 20);
        assert_eq!(args.email, None);
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::try_parse_from([
            "patron",
            "--url",
            "http://bar.local:8080",
            "--guests",
            "5",
            "--email",
            "me@example.com",
        ])
        .unwrap();
        assert_eq!(args.url, "http://bar.local:8080");
        assert_eq!(args.guests, 5);
        assert_eq!(args.email.as_deref(), Some("me@example.com"));
    }
}
