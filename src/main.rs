use clap::{Parser, Subcommand};
use peregrine::agents::IndicatorRuleProvider;
use peregrine::config::AppConfig;
use peregrine::engine::Orchestrator;
use peregrine::error::Result;
use peregrine::events::{run_alert_forwarder, EventBus, LogNotifier};
use peregrine::exchange::{BinanceFuturesClient, LatencyTracker};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "peregrine", about = "Multi-agent perpetual futures trading engine")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "Peregrine.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the trading loop with the live monitor and sentinel
    Run,
    /// Print venue connectivity, balance, and open positions, then exit
    Status,
    /// Close every open position and exit
    Flatten,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_engine(config).await,
        Commands::Status => show_status(config).await,
        Commands::Flatten => flatten(config).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,peregrine=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run_engine(config: AppConfig) -> Result<()> {
    config.require_credentials()?;

    let events = EventBus::default();
    let latency = Arc::new(LatencyTracker::new(config.risk.latency_window));
    let exchange = Arc::new(BinanceFuturesClient::new(&config.exchange, latency.clone())?);
    let oracle = Arc::new(IndicatorRuleProvider::new());

    let (mut orchestrator, live_monitor, sentinel) =
        Orchestrator::init(config, exchange, oracle, events.clone(), latency).await?;

    tokio::spawn(run_alert_forwarder(events.clone(), Arc::new(LogNotifier)));
    live_monitor.start();
    sentinel.start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            warn!("shutdown signal listener failed: {}", e);
            return;
        }
        info!("shutdown signal received, draining");
        let _ = shutdown_tx.send(true);
    });

    let result = orchestrator.run_loop(shutdown_rx).await;

    live_monitor.stop();
    sentinel.stop();
    info!("engine stopped; open venue orders left in place by policy");
    result
}

async fn show_status(config: AppConfig) -> Result<()> {
    config.require_credentials()?;
    let latency = Arc::new(LatencyTracker::new(config.risk.latency_window));
    let exchange = BinanceFuturesClient::new(&config.exchange, latency)?;

    use peregrine::exchange::ExchangeApi;
    let balance = exchange.get_balance().await?;
    println!(
        "balance: {} {} (available {})",
        balance.balance, balance.asset, balance.available
    );
    for symbol in &config.trading.symbols {
        match exchange.get_position_info(symbol).await? {
            Some(info) => println!(
                "{}: {} @ {} (mark {}, uPnL {})",
                symbol, info.position_amt, info.entry_price, info.mark_price, info.unrealized_pnl
            ),
            None => println!("{}: flat", symbol),
        }
    }
    Ok(())
}

async fn flatten(config: AppConfig) -> Result<()> {
    config.require_credentials()?;
    let events = EventBus::default();
    let latency = Arc::new(LatencyTracker::new(config.risk.latency_window));
    let exchange = Arc::new(BinanceFuturesClient::new(&config.exchange, latency.clone())?);
    let oracle = Arc::new(IndicatorRuleProvider::new());

    let (mut orchestrator, _monitor, _sentinel) =
        Orchestrator::init(config, exchange, oracle, events, latency).await?;
    // Adopt whatever the venue holds, then close it all.
    orchestrator.run_cycle().await.ok();
    orchestrator.flatten_all().await
}
