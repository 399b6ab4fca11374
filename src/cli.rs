use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Triangular arbitrage execution engine — run cycles live, on paper, or
/// against recorded history, and inspect risk-controller state.
#[derive(Parser)]
#[command(name = "triarb", version, about)]
pub struct Cli {
    /// Path to the strategy config YAML file
    #[arg(long, global = true, default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum RunMode {
    Live,
    Paper,
    Backtest,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the engine continuously, scanning configured triangles
    Run {
        #[arg(long, value_enum, default_value = "paper")]
        mode: RunMode,

        /// Only used in backtest mode: CSV directory fed to the simulated venue
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// List currently in-flight cycles
    Active,

    /// Show the most recent terminal cycles
    History {
        #[arg(default_value_t = 20)]
        limit: usize,
    },

    /// List active slippage cooldowns
    Cooldowns,

    /// Clear a single cycle's cooldown
    ClearCooldown { key: String },

    /// Push a cooldown's expiry further into the future
    ExtendCooldown { key: String, seconds: f64 },

    /// Pull a cooldown's expiry earlier
    ShortenCooldown { key: String, seconds: f64 },

    /// Clear every active cooldown
    ClearAllCooldowns,

    /// Summarize latency/slippage violations over the trailing window
    RiskStats {
        #[arg(default_value_t = 24)]
        hours: u64,
    },

    /// List the most recently suppressed duplicate violations
    Suppressed {
        #[arg(default_value_t = 20)]
        limit: usize,
    },

    /// Summarize the suppression rate over a trailing window
    SuppressionSummary {
        #[arg(default_value_t = 3600)]
        window_secs: u64,
    },

    /// One-shot point-in-time dump of engine state
    Snapshot {
        #[arg(long, default_value_t = 3600)]
        window: u64,
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },

    /// Checks invariants and exits non-zero if any are violated
    Health {
        #[arg(long, default_value_t = 3600)]
        window: u64,
        #[arg(long, default_value_t = 0.2)]
        max_suppression_rate: f64,
    },
}
