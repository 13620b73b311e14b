mod config;
mod dashboard;
mod fetcher;
mod market;
mod poller;
mod state;
mod view;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

use crate::{config::Settings, fetcher::Fetcher, market::AssetId, state::SharedState};

#[derive(Debug, Parser)]
#[command(name = "pricewatch", version)]
struct Cli {
    /// Refresh once, print the view as JSON and exit
    #[arg(long)]
    once: bool,

    /// Amount in NGN to convert (raw input, coerced like a form field)
    #[arg(long)]
    amount: Option<String>,

    /// Selected asset (btc|eth|usdt); overrides DEFAULT_ASSET
    #[arg(long)]
    asset: Option<String>,

    /// Override DASHBOARD_PORT
    #[arg(long)]
    port: Option<u16>,

    /// Run the poller without serving the dashboard
    #[arg(long)]
    no_dashboard: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(a) = cli.asset.as_deref() {
        settings.default_asset =
            AssetId::parse(a).ok_or_else(|| anyhow!("--asset must be btc|eth|usdt (got {a})"))?;
    }
    if let Some(p) = cli.port {
        settings.dashboard_port = p;
    }
    if cli.no_dashboard {
        settings.dashboard_enabled = false;
    }

    let state = SharedState::new(settings.default_asset);
    let fetcher = Arc::new(Fetcher::from_settings(&settings, state.clone())?);

    if cli.once {
        let amount = cli.amount.as_deref().map(view::parse_amount).unwrap_or(0.0);
        let outcome = fetcher.refresh().await;
        let vm = view::render(&state.snapshot(), amount);
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "outcome": outcome, "view": vm }))?
        );
        return Ok(());
    }

    log::info!(
        "app.start target={} routes={} interval_secs={} timeout_secs={} dashboard={}",
        settings.ticker_api_url,
        settings.routes.len(),
        settings.refresh_interval_secs,
        settings.route_timeout_secs,
        settings.dashboard_enabled
    );

    if settings.dashboard_enabled {
        let st = settings.clone();
        let f = fetcher.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve_dashboard(st, f).await {
                log::error!("dashboard.error {:#}", e);
            }
        });
    }

    let every = Duration::from_secs(settings.refresh_interval_secs);
    tokio::select! {
        _ = poller::run(fetcher, every) => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("app.stop reason=ctrl_c");
        }
    }
    Ok(())
}
