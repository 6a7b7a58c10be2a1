use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::SimulationError;

/// Extra one-off spending keyed by age.
pub type AdhocWithdrawals = BTreeMap<u32, Decimal>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Savings first, then a one-off lump sum, then taxed drawdown.
    SavingsFirstLumpSum,
    /// Savings first, then UFPLS drawdown.
    SavingsFirstUfpls,
    /// Tax-free drawdown inside the allowance, savings, then taxed UFPLS.
    AllowanceFirst,
    /// `AllowanceFirst` plus an annual relief-at-source contribution.
    AllowanceFirstWithContribution,
    /// Fill the allowance and the basic-rate band every year.
    BasicRateBandFiller,
    /// UFPLS for the whole need, savings only for a shortfall.
    PensionFirstUfpls,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::SavingsFirstLumpSum,
        Strategy::SavingsFirstUfpls,
        Strategy::AllowanceFirst,
        Strategy::AllowanceFirstWithContribution,
        Strategy::BasicRateBandFiller,
        Strategy::PensionFirstUfpls,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Strategy::SavingsFirstLumpSum => "Strategy1",
            Strategy::SavingsFirstUfpls => "Strategy2",
            Strategy::AllowanceFirst => "Strategy3",
            Strategy::AllowanceFirstWithContribution => "Strategy3A",
            Strategy::BasicRateBandFiller => "Strategy4",
            Strategy::PensionFirstUfpls => "Strategy5",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Strategy::SavingsFirstLumpSum => {
                "Use savings first. When savings run out, move a one-off 25% tax-free lump sum \
                 into savings. When that is spent, draw the remaining pension taxed above the allowance."
            }
            Strategy::SavingsFirstUfpls => {
                "Use savings first, then draw from the pension 25% tax-free, 75% taxed."
            }
            Strategy::AllowanceFirst => {
                "Draw from the pension while the taxable part stays inside the allowance, use \
                 savings for the rest. When savings run out, draw the pension 25% tax-free, 75% taxed."
            }
            Strategy::AllowanceFirstWithContribution => {
                "As Strategy 3, and first contribute the no-income limit from savings to the \
                 pension each year, grossed up with basic-rate relief."
            }
            Strategy::BasicRateBandFiller => {
                "Draw the most possible without leaving the basic-rate band. Anything not spent \
                 goes into savings."
            }
            Strategy::PensionFirstUfpls => {
                "Draw the need from the pension 25% tax-free, 75% taxed. Savings only cover a shortfall."
            }
        }
    }
}

/// Arguments shared by every strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyInputs {
    pub savings: Decimal,
    pub pension: Decimal,
    pub required_net: Decimal,
    pub adhoc: AdhocWithdrawals,
    /// Only read by `AllowanceFirstWithContribution`.
    pub contribute: bool,
}

impl StrategyInputs {
    pub fn new(savings: Decimal, pension: Decimal, required_net: Decimal) -> Self {
        Self {
            savings,
            pension,
            required_net,
            adhoc: AdhocWithdrawals::new(),
            contribute: true,
        }
    }

    pub fn with_adhoc(mut self, adhoc: AdhocWithdrawals) -> Self {
        self.adhoc = adhoc;
        self
    }

    pub fn with_contribution(mut self, contribute: bool) -> Self {
        self.contribute = contribute;
        self
    }

    /// Builds inputs from possibly-absent arguments. Absence is reported before
    /// any value check.
    pub fn from_optional(
        savings: Option<Decimal>,
        pension: Option<Decimal>,
        required_net: Option<Decimal>,
    ) -> Result<Self, SimulationError> {
        let savings = savings.ok_or(SimulationError::MissingArgument("savings"))?;
        let pension = pension.ok_or(SimulationError::MissingArgument("pension"))?;
        let required_net = required_net.ok_or(SimulationError::MissingArgument("requiredAmount"))?;
        let inputs = Self::new(savings, pension, required_net);
        inputs.validate()?;
        Ok(inputs)
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        validate_amount("savings", self.savings)?;
        validate_amount("pension", self.pension)?;
        validate_amount("requiredAmount", self.required_net)?;
        for (&age, &amount) in &self.adhoc {
            if amount < Decimal::ZERO {
                return Err(SimulationError::NegativeAdhocWithdrawal { age });
            }
        }
        Ok(())
    }

    pub(crate) fn extra_for(&self, age: u32) -> Decimal {
        self.adhoc.get(&age).copied().unwrap_or(Decimal::ZERO)
    }
}

pub(crate) fn validate_amount(name: &'static str, value: Decimal) -> Result<(), SimulationError> {
    if value < Decimal::ZERO {
        return Err(SimulationError::NegativeAmount { name });
    }
    Ok(())
}

/// Balances and tax for one simulated age, rounded to pennies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSnapshot {
    pub age: u32,
    pub pension_start: Decimal,
    pub pension_end: Decimal,
    pub savings_start: Decimal,
    pub savings_end: Decimal,
    pub tax_paid: Decimal,
    pub extra_spending: Decimal,
}

impl YearSnapshot {
    pub fn total_start(&self) -> Decimal {
        self.pension_start + self.savings_start
    }

    pub fn total_end(&self) -> Decimal {
        self.pension_end + self.savings_end
    }
}

/// Outcome of a one-shot savings to pension contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub savings_end: Decimal,
    pub pension_end: Decimal,
    pub gross_contribution_added: Decimal,
    pub tax_relief_added: Decimal,
}
