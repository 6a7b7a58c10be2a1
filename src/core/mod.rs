mod compare;
mod engine;
mod error;
mod money;
mod rules;
mod transfer;
mod types;

pub use compare::{
    ComparisonCell, ComparisonReport, ComparisonRequest, ComparisonRow, ComparisonTable,
    compare_strategies,
};
pub use engine::{
    MAX_PROJECTION_YEARS, project_balance, simulate, strategy_1, strategy_2, strategy_3, strategy_3a, strategy_4,
    strategy_5,
};
pub use error::SimulationError;
pub use money::round_money;
pub use rules::{MAX_AGE_SPAN, TaxRuleSet};
pub use transfer::contribute_from_savings_to_pension;
pub use types::{AdhocWithdrawals, Strategy, StrategyInputs, TransferResult, YearSnapshot};
