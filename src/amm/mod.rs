pub mod math;
pub mod pool;
pub mod scanner;

pub use math::{AmmError, adaptive_multiplier, max_trade_size_for_slippage_cap, price_impact, slippage_tolerance, swap_out, two_leg_tolerance};
pub use pool::{Pool, PoolKind};
pub use scanner::{QualityScore, quality_score};
