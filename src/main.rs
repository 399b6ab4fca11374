use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};

use triarb::cli::{Cli, Command, RunMode};
use triarb::config::{load_trading_pairs, CapitalAllocation, StrategyConfig};
use triarb::coordinator::{CoordinatorConfig, OrderCoordinator};
use triarb::engine::{recovery, CycleExecutionEngine, EngineConfig};
use triarb::model::{Currency, Cycle, Market};
use triarb::risk::{RiskController, RiskControllerConfig};
use triarb::router::{Router, RouterConfig, ScoringWeights};
use triarb::store::{StateStore, StateStoreConfig};
use triarb::venues::{BacktestVenue, Balances, LiveVenue, PaperVenue, Venue};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("triarb=info".parse()?))
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    let code = rt.block_on(dispatch(cli))?;
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = StrategyConfig::load(&cli.config)?;
    let data_dir = state_dir(&config.name);
    std::fs::create_dir_all(&data_dir)?;

    let exit_code = match cli.command {
        Command::Run { mode, data_dir: backtest_dir } => {
            run(config, &data_dir, mode, backtest_dir).await?;
            0
        }
        Command::Active => {
            let store = StateStore::open(&data_dir.join("state.db"), StateStoreConfig::default())?;
            let active = store.get_active_cycles(Some(&config.name)).await?;
            for record in &active {
                println!("{}  {}  step={}  amount={}  {:?}", record.id, record.cycle, record.current_step, record.current_amount, record.state);
            }
            println!("{} active cycles", active.len());
            0
        }
        Command::History { limit } => {
            let store = StateStore::open(&data_dir.join("state.db"), StateStoreConfig::default())?;
            let conn = store.pool().acquire().await?;
            let mut stmt = conn.prepare("SELECT id, state, current_amount, initial_amount, realized_pnl FROM cycles WHERE state IN ('completed','failed') ORDER BY started_at DESC LIMIT ?1")?;
            let rows = stmt.query_map([limit as i64], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, f64>(2)?, r.get::<_, f64>(3)?, r.get::<_, Option<f64>>(4)?))
            })?;
            for row in rows {
                let (id, state, current, initial, pnl) = row?;
                println!("{id}  {state}  {initial} -> {current}  pnl={pnl:?}");
            }
            0
        }
        Command::Cooldowns => {
            let mut risk = build_risk_controller(&config, &data_dir)?;
            risk.cooldowns.load(None).ok();
            for (key, remaining) in risk.cooldowns.active() {
                println!("{key}  {remaining:.1}s remaining");
            }
            0
        }
        Command::ClearCooldown { key } => {
            let mut risk = build_risk_controller(&config, &data_dir)?;
            risk.cooldowns.load(None).ok();
            let cleared = risk.cooldowns.clear(&key);
            risk.cooldowns.save(None)?;
            println!("{}", if cleared { "cleared" } else { "no such cooldown" });
            0
        }
        Command::ExtendCooldown { key, seconds } => {
            let mut risk = build_risk_controller(&config, &data_dir)?;
            risk.cooldowns.load(None).ok();
            let ok = risk.cooldowns.extend(&key, seconds);
            risk.cooldowns.save(None)?;
            println!("{}", if ok { "extended" } else { "no such cooldown" });
            0
        }
        Command::ShortenCooldown { key, seconds } => {
            let mut risk = build_risk_controller(&config, &data_dir)?;
            risk.cooldowns.load(None).ok();
            let ok = risk.cooldowns.extend(&key, -seconds);
            risk.cooldowns.save(None)?;
            println!("{}", if ok { "shortened" } else { "no such cooldown" });
            0
        }
        Command::ClearAllCooldowns => {
            let mut risk = build_risk_controller(&config, &data_dir)?;
            risk.cooldowns.load(None).ok();
            let count = risk.cooldowns.clear_all();
            risk.cooldowns.save(None)?;
            println!("cleared {count} cooldowns");
            0
        }
        Command::RiskStats { hours } => {
            let risk = build_risk_controller(&config, &data_dir)?;
            let counts = risk.journal.violation_counts_by_type()?;
            println!("violation counts over the journal (trailing {hours}h window not separately tracked on disk):");
            for (kind, count) in counts {
                println!("  {kind:?}: {count}");
            }
            0
        }
        Command::Suppressed { limit } => {
            let risk = build_risk_controller(&config, &data_dir)?;
            for (cycle_id, kind, dup_count) in risk.journal.recent_suppressed(limit) {
                println!("{cycle_id}  {kind:?}  x{dup_count}");
            }
            0
        }
        Command::SuppressionSummary { window_secs } => {
            let risk = build_risk_controller(&config, &data_dir)?;
            let (suppressed, tracked) = risk.journal.suppression_stats();
            println!("window={window_secs}s suppressed={suppressed} tracked_keys={tracked}");
            0
        }
        Command::Snapshot { window, recent } => {
            let store = StateStore::open(&data_dir.join("state.db"), StateStoreConfig::default())?;
            let risk = build_risk_controller(&config, &data_dir)?;
            let active = store.get_active_cycles(Some(&config.name)).await?;
            let (suppressed, tracked) = risk.journal.suppression_stats();
            println!("=== snapshot (window={window}s) ===");
            println!("active cycles: {}", active.len());
            println!("suppressed violations: {suppressed} (tracked keys: {tracked})");
            for (cycle_id, kind, dup_count) in risk.journal.recent_suppressed(recent) {
                println!("  recent suppressed: {cycle_id} {kind:?} x{dup_count}");
            }
            0
        }
        Command::Health { window, max_suppression_rate } => {
            let store = StateStore::open(&data_dir.join("state.db"), StateStoreConfig::default())?;
            let risk = build_risk_controller(&config, &data_dir)?;
            let active = store.get_active_cycles(Some(&config.name)).await?;
            let (suppressed, tracked) = risk.journal.suppression_stats();
            let suppression_rate = if tracked == 0 { 0.0 } else { suppressed as f64 / tracked as f64 };

            let mut healthy = true;
            for record in &active {
                if !record.check_order_count_invariant() {
                    println!("VIOLATION: cycle {} has an inconsistent order count", record.id);
                    healthy = false;
                }
            }
            if suppression_rate > max_suppression_rate {
                println!("VIOLATION: suppression rate {suppression_rate:.3} exceeds {max_suppression_rate:.3} (window={window}s)");
                healthy = false;
            }
            println!("{}", if healthy { "OK" } else { "UNHEALTHY" });
            if healthy {
                0
            } else {
                1
            }
        }
    };

    Ok(exit_code)
}

fn state_dir(strategy_name: &str) -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("triarb").join(strategy_name)
}

fn build_risk_controller(config: &StrategyConfig, data_dir: &PathBuf) -> anyhow::Result<RiskController> {
    Ok(RiskController::new(RiskControllerConfig {
        max_leg_latency_ms: config.max_leg_latency_ms.unwrap_or(500) as f64,
        max_slippage_bps: config.max_slippage_bps as f64,
        slippage_cooldown_seconds: config.risk_controls.slippage_cooldown_seconds,
        log_dir: data_dir.join("risk_logs"),
        duplicate_suppression_window: 2.0,
    })?)
}

fn build_coordinator(config: &StrategyConfig) -> OrderCoordinator {
    let monitoring = &config.order.monitoring;
    let coordinator_config = CoordinatorConfig {
        max_retries: config.order.max_retries,
        base_backoff: Duration::from_millis(config.order.retry_delay_ms),
        rapid_check_threshold: Duration::from_millis(monitoring.rapid_check_threshold_ms),
        rapid_check_interval: Duration::from_millis(monitoring.rapid_check_interval_ms),
        initial_delay: Duration::from_millis(monitoring.initial_delay_ms),
        backoff_mul: monitoring.backoff_multiplier,
        max_delay: Duration::from_millis(monitoring.max_delay_ms),
        jitter_factor: monitoring.jitter_factor,
        min_request_interval: Duration::from_millis(monitoring.min_request_interval_ms),
        cache_ttl: Duration::from_millis(monitoring.cache_ttl_ms),
        min_partial_fill_ratio: config.order.min_partial_fill_percentage,
        allow_partial_fills: config.order.allow_partial_fills,
    };
    OrderCoordinator::new(coordinator_config, 10.0, monitoring.rate_limit_buffer)
}

fn build_router(config: &StrategyConfig) -> anyhow::Result<Router> {
    let targets: Vec<Currency> = config.panic_sell.base_currencies.iter().map(|c| Currency::new(c)).collect::<Result<_, _>>()?;
    let intermediaries: Vec<Currency> = config.panic_sell.preferred_intermediaries.iter().map(|c| Currency::new(c)).collect::<Result<_, _>>()?;

    Ok(Router::new(RouterConfig {
        targets,
        preferred_intermediaries: intermediaries,
        max_hops: config.panic_sell.max_hops as usize,
        k_paths: 3,
        single_leg_slippage_cap_bps: config.panic_sell.max_single_hop_slippage_bps,
        multi_leg_slippage_cap_bps: config.panic_sell.max_total_slippage_bps,
        weights: ScoringWeights::default(),
        max_attempts: config.panic_sell.retry_attempts as usize,
        partial_fill_threshold: config.panic_sell.partial_fill_threshold,
        impact_coef: 0.5,
        graph_ttl: Duration::from_secs(30),
        blacklist_duration: Duration::from_secs(60),
    }))
}

/// Builds a venue backend for `mode`. Live and Paper both need exchange
/// credentials; Backtest replays a CSV feed against synthetic markets
/// derived from the configured trading pairs since a recorded feed has no
/// venue to ask for live market metadata.
async fn build_venue(config: &StrategyConfig, mode: RunMode, backtest_dir: Option<PathBuf>, pairs: &[[String; 3]]) -> anyhow::Result<Box<dyn Venue>> {
    let api_key = std::env::var("TRIARB_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("TRIARB_API_SECRET").unwrap_or_default();
    let starting_balances: Balances = HashMap::new();

    match mode {
        RunMode::Live => Ok(Box::new(LiveVenue::new(api_key, api_secret, &config.exchange))),
        RunMode::Paper => {
            let quote_source = LiveVenue::new(api_key, api_secret, &config.exchange);
            Ok(Box::new(PaperVenue::new(quote_source, Default::default(), starting_balances)))
        }
        RunMode::Backtest => {
            let dir = backtest_dir.ok_or_else(|| anyhow::anyhow!("backtest mode requires --data-dir"))?;
            let synthetic_markets = synthetic_markets(pairs);
            Ok(Box::new(BacktestVenue::from_csv(&dir.join("ticks.csv"), synthetic_markets, Default::default(), starting_balances)?))
        }
    }
}

fn synthetic_markets(pairs: &[[String; 3]]) -> HashMap<String, Market> {
    let mut markets = HashMap::new();
    for triangle in pairs {
        for i in 0..3 {
            let a = &triangle[i];
            let b = &triangle[(i + 1) % 3];
            let (base, quote) = (a.clone(), b.clone());
            let symbol = format!("{base}/{quote}");
            markets.entry(symbol).or_insert_with(|| Market {
                base: Currency::new(&base).unwrap_or_else(|_| Currency::new("UNKNOWN").unwrap()),
                quote: Currency::new(&quote).unwrap_or_else(|_| Currency::new("UNKNOWN").unwrap()),
                min_amount: 0.0001,
                min_notional: 10.0,
                taker_fee: 0.001,
                maker_fee: 0.0008,
                price_precision: 8,
                amount_precision: 8,
            });
        }
    }
    markets
}

fn initial_amount(allocation: &CapitalAllocation, balance: f64) -> f64 {
    match allocation {
        CapitalAllocation::FixedFraction { fraction } => balance * fraction,
        CapitalAllocation::FixedAmount { amount } => *amount,
    }
}

async fn run(config: StrategyConfig, data_dir: &PathBuf, mode: RunMode, backtest_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let pairs = load_trading_pairs(&PathBuf::from(&config.trading_pairs_file))?;
    if pairs.is_empty() {
        warn!("trading pairs file has no usable triangles");
    }

    let venue = Arc::new(AsyncMutex::new(build_venue(&config, mode, backtest_dir, &pairs).await?));
    let store = Arc::new(StateStore::open(&data_dir.join("state.db"), StateStoreConfig::default())?);
    let coordinator = Arc::new(build_coordinator(&config));
    let risk = Arc::new(AsyncMutex::new(build_risk_controller(&config, data_dir)?));
    let router = Arc::new(build_router(&config)?);

    let engine = Arc::new(CycleExecutionEngine::new(
        EngineConfig {
            max_open_cycles: config.risk_controls.max_open_cycles,
            reservation_ttl: Duration::from_secs(30),
            max_consecutive_losses: config.risk_controls.stop_after_consecutive_losses,
            order_timeout: Duration::from_secs(30),
            max_cycle_age: Duration::from_secs(3_600),
            stale_order_age: Duration::from_secs(300),
        },
        config.name.clone(),
        venue.clone(),
        coordinator.clone(),
        store.clone(),
        risk.clone(),
        router.clone(),
    ));
    engine.refresh_markets().await?;

    {
        let markets = venue.lock().await.load_markets().await.unwrap_or_default();
        if let Err(err) = recovery::recover_active_cycles(&store, &venue, &coordinator, &router, &markets, Duration::from_secs(3_600), Duration::from_secs(300)).await {
            error!(error = %err, "crash recovery pass failed");
        }
    }

    let flush_handle = store.spawn_flush_task();

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })?;

    let cycles: Vec<Cycle> = pairs
        .iter()
        .filter_map(|p| Some(Cycle::new(Currency::new(&p[0]).ok()?, Currency::new(&p[1]).ok()?, Currency::new(&p[2]).ok()?)))
        .collect();

    info!(strategy = %config.name, triangles = cycles.len(), "starting cycle scan loop");

    'outer: loop {
        for cycle in &cycles {
            if *shutdown_rx.borrow() {
                break 'outer;
            }
            let balances = venue.lock().await.fetch_balance().await.unwrap_or_default();
            let available = *balances.get(cycle.starting_currency().as_str()).unwrap_or(&0.0);
            let amount = initial_amount(&config.capital_allocation, available);
            if amount <= 0.0 {
                continue;
            }

            let record = engine.run_cycle(cycle.clone(), amount).await;
            info!(cycle = %cycle, state = ?record.state, pnl = ?record.realized_pnl, "cycle finished");

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                _ = shutdown_rx.changed() => break 'outer,
            }
        }
        if cycles.is_empty() {
            break;
        }
    }

    info!("shutting down, flushing outstanding state");
    flush_handle.abort();
    store.flush().await.ok();
    risk.lock().await.cooldowns.save(None).ok();
    Ok(())
}
