use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::error::SimulationError;
use super::money::{add, div, floor_zero, mul, working};

/// Income-tax and account rules for one simulation run.
///
/// Treated as an immutable value: every engine entry point borrows it, so a
/// run can never observe a rule change made elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaxRuleSet {
    pub personal_allowance: Decimal,
    pub state_pension_annual: Decimal,
    pub state_pension_age: u32,
    pub basic_rate: Decimal,
    /// Width of the band of taxable income charged at `basic_rate`.
    pub basic_rate_band: Decimal,
    /// Applied to the pension pot at the end of every year. Savings do not grow.
    pub pension_growth_rate: Decimal,
    /// Gross annual contribution cap for someone with no relevant earnings.
    pub no_income_contribution_limit: Decimal,
    /// Contributions made at or after this age get no relief at source.
    pub relief_cutoff_age: u32,
    /// Share of each UFPLS withdrawal that is tax-free.
    pub tax_free_fraction: Decimal,
    /// Share of the pension moved to savings by the one-off lump sum.
    pub lump_sum_fraction: Decimal,
    pub start_age: u32,
    pub end_age: u32,
}

impl Default for TaxRuleSet {
    fn default() -> Self {
        Self {
            personal_allowance: dec!(12570.00),
            state_pension_annual: dec!(11973.00),
            state_pension_age: 67,
            basic_rate: dec!(0.20),
            basic_rate_band: dec!(37700.00),
            pension_growth_rate: dec!(0.04),
            no_income_contribution_limit: dec!(3600.00),
            relief_cutoff_age: 75,
            tax_free_fraction: dec!(0.25),
            lump_sum_fraction: dec!(0.25),
            start_age: 61,
            end_age: 99,
        }
    }
}

/// Longest age range a single run may cover, in years after the start age.
pub const MAX_AGE_SPAN: u32 = 150;

impl TaxRuleSet {
    pub fn validate(&self) -> Result<(), SimulationError> {
        for (name, value) in [
            ("personalAllowance", self.personal_allowance),
            ("statePensionAnnual", self.state_pension_annual),
            ("basicRateBand", self.basic_rate_band),
            ("noIncomeContributionLimit", self.no_income_contribution_limit),
        ] {
            if value < Decimal::ZERO {
                return Err(SimulationError::InvalidRules(format!("{name} must be >= 0")));
            }
        }

        if self.basic_rate < Decimal::ZERO || self.basic_rate >= Decimal::ONE {
            return Err(SimulationError::InvalidRules(
                "basicRate must be in [0, 1)".to_string(),
            ));
        }
        if self.tax_free_fraction < Decimal::ZERO || self.tax_free_fraction >= Decimal::ONE {
            return Err(SimulationError::InvalidRules(
                "taxFreeFraction must be in [0, 1)".to_string(),
            ));
        }
        if self.lump_sum_fraction < Decimal::ZERO || self.lump_sum_fraction > Decimal::ONE {
            return Err(SimulationError::InvalidRules(
                "lumpSumFraction must be in [0, 1]".to_string(),
            ));
        }
        if self.pension_growth_rate <= Decimal::NEGATIVE_ONE {
            return Err(SimulationError::InvalidRules(
                "pensionGrowthRate must be > -1".to_string(),
            ));
        }
        if self.start_age > self.end_age {
            return Err(SimulationError::InvalidRules(
                "startAge must be <= endAge".to_string(),
            ));
        }
        if self.end_age - self.start_age > MAX_AGE_SPAN {
            return Err(SimulationError::InvalidRules(format!(
                "endAge must be at most {MAX_AGE_SPAN} years after startAge"
            )));
        }
        Ok(())
    }

    /// Number of simulated ages; zero for an inverted range.
    pub fn years(&self) -> usize {
        self.end_age
            .checked_sub(self.start_age)
            .map_or(0, |span| span as usize + 1)
    }

    pub fn state_pension_for(&self, age: u32) -> Decimal {
        if age >= self.state_pension_age {
            self.state_pension_annual
        } else {
            Decimal::ZERO
        }
    }

    /// Personal allowance left once this age's state pension has used its share.
    pub fn allowance_remaining(&self, age: u32) -> Decimal {
        floor_zero(self.personal_allowance - self.state_pension_for(age))
    }

    /// Basic-rate band left once state pension above the allowance has been
    /// taxed in it. State pension is assumed to be taxed before any pension
    /// withdrawal.
    pub fn basic_band_remaining(&self, age: u32) -> Decimal {
        let taxed_state_pension = floor_zero(self.state_pension_for(age) - self.personal_allowance);
        floor_zero(self.basic_rate_band - taxed_state_pension)
    }

    pub fn taxable_fraction(&self) -> Decimal {
        Decimal::ONE - self.tax_free_fraction
    }

    /// Share of a taxed pound that survives basic-rate tax.
    pub fn net_of_basic_rate(&self) -> Decimal {
        Decimal::ONE - self.basic_rate
    }

    /// Net received per pound of UFPLS gross once the allowance is exhausted
    /// (0.85 under the default rules).
    pub fn ufpls_net_factor(&self) -> Result<Decimal, SimulationError> {
        add(
            self.tax_free_fraction,
            mul(self.taxable_fraction(), self.net_of_basic_rate())?,
        )
    }

    /// Largest UFPLS gross whose taxable share fits in `allowance`.
    pub fn ufpls_gross_within(&self, allowance: Decimal) -> Result<Decimal, SimulationError> {
        div(allowance, self.taxable_fraction())
    }

    /// Gross UFPLS withdrawal that nets `net`, given `allowance` still unused
    /// against the taxable share.
    ///
    /// Beyond the allowance, `net = factor * gross + rate * allowance`.
    pub fn ufpls_gross_for_net(
        &self,
        net: Decimal,
        allowance: Decimal,
    ) -> Result<Decimal, SimulationError> {
        if net <= self.ufpls_gross_within(allowance)? {
            return Ok(net);
        }
        let adjusted = floor_zero(working(net - mul(allowance, self.basic_rate)?));
        div(adjusted, self.ufpls_net_factor()?)
    }

    /// Gross withdrawal, wholly taxable above `allowance`, that nets `net`.
    pub fn taxable_gross_for_net(
        &self,
        net: Decimal,
        allowance: Decimal,
    ) -> Result<Decimal, SimulationError> {
        if net <= allowance {
            return Ok(net);
        }
        add(allowance, div(net - allowance, self.net_of_basic_rate())?)
    }
}
