use rust_decimal::Decimal;
use tracing::debug;

use super::error::SimulationError;
use super::money::{add, clamp_gross, div, floor_zero, mul, round_money, working};
use super::rules::TaxRuleSet;
use super::types::{AdhocWithdrawals, Strategy, StrategyInputs, YearSnapshot, validate_amount};

/// Longest compounding run `project_balance` accepts.
pub const MAX_PROJECTION_YEARS: i64 = 1_000;

/// The two running balances of a simulation. Never rounded between years.
#[derive(Debug, Clone, Copy)]
struct Pots {
    pension: Decimal,
    savings: Decimal,
}

/// State that lives for one tax year.
#[derive(Debug)]
struct TaxYear<'a> {
    rules: &'a TaxRuleSet,
    need: Decimal,
    allowance_left: Decimal,
    tax_paid: Decimal,
}

impl<'a> TaxYear<'a> {
    fn open(rules: &'a TaxRuleSet, age: u32, spending: Decimal) -> Self {
        let state_pension = rules.state_pension_for(age);
        Self {
            rules,
            need: floor_zero(spending - state_pension),
            allowance_left: rules.allowance_remaining(age),
            tax_paid: Decimal::ZERO,
        }
    }

    fn is_short(&self) -> bool {
        self.need > Decimal::ZERO
    }

    /// Puts `net` towards the need and returns whatever is left over.
    fn apply_net(&mut self, net: Decimal) -> Decimal {
        if net >= self.need {
            let surplus = net - self.need;
            self.need = Decimal::ZERO;
            surplus
        } else {
            self.need -= net;
            Decimal::ZERO
        }
    }

    fn spend_savings(&mut self, pots: &mut Pots) {
        let from_savings = self.need.min(pots.savings);
        if from_savings > Decimal::ZERO {
            pots.savings -= from_savings;
            self.need -= from_savings;
        }
    }

    fn take_lump_sum(&mut self, pots: &mut Pots) -> Result<(), SimulationError> {
        let lump = round_money(mul(pots.pension, self.rules.lump_sum_fraction)?).min(pots.pension);
        pots.pension -= lump;
        pots.savings = add(pots.savings, lump)?;
        Ok(())
    }

    /// Draws a pension gross that is wholly taxable above the allowance.
    fn draw_taxable(&mut self, pots: &mut Pots) -> Result<(), SimulationError> {
        let target = self
            .rules
            .taxable_gross_for_net(self.need, self.allowance_left)?;
        let gross = clamp_gross(target, pots.pension);

        let zero_rated = gross.min(self.allowance_left);
        let basic_rated = floor_zero(gross - zero_rated);
        let net = add(zero_rated, mul(basic_rated, self.rules.net_of_basic_rate())?)?;
        let tax = round_money(mul(basic_rated, self.rules.basic_rate)?);
        self.tax_paid = add(self.tax_paid, tax)?;
        self.allowance_left = floor_zero(self.allowance_left - zero_rated);

        pots.pension -= gross;
        self.apply_net(net);
        Ok(())
    }

    /// Takes a UFPLS gross of up to `target` and returns the net received.
    fn draw_ufpls(&mut self, pots: &mut Pots, target: Decimal) -> Result<Decimal, SimulationError> {
        let gross = clamp_gross(target, pots.pension);
        if gross <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }

        let taxable = mul(gross, self.rules.taxable_fraction())?;
        let covered = taxable.min(self.allowance_left);
        let taxed = floor_zero(taxable - covered);
        let tax = round_money(mul(taxed, self.rules.basic_rate)?);

        self.tax_paid = add(self.tax_paid, tax)?;
        self.allowance_left = floor_zero(self.allowance_left - covered);
        pots.pension -= gross;
        Ok(gross - tax)
    }

    /// UFPLS sized so the net meets the whole remaining need.
    fn draw_ufpls_for_need(&mut self, pots: &mut Pots) -> Result<Decimal, SimulationError> {
        let target = self
            .rules
            .ufpls_gross_for_net(self.need, self.allowance_left)?;
        self.draw_ufpls(pots, target)
    }

    /// Tax-free UFPLS, bounded by the allowance left and by `limit` if given.
    fn draw_within_allowance(
        &mut self,
        pots: &mut Pots,
        limit: Option<Decimal>,
    ) -> Result<Decimal, SimulationError> {
        let mut target = self.rules.ufpls_gross_within(self.allowance_left)?;
        if let Some(limit) = limit {
            target = target.min(limit);
        }
        self.draw_ufpls(pots, target)
    }

    /// UFPLS that uses up the remaining allowance and basic-rate band.
    fn fill_basic_rate_band(
        &mut self,
        pots: &mut Pots,
        age: u32,
    ) -> Result<Decimal, SimulationError> {
        let band = self.rules.basic_band_remaining(age);
        if band <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let headroom = working(add(band, self.allowance_left)?);
        let target = div(headroom, self.rules.taxable_fraction())?;
        self.draw_ufpls(pots, target)
    }
}

/// State carried across years within one run.
#[derive(Debug)]
struct RunState {
    pots: Pots,
    lump_sum_taken: bool,
}

/// Runs `strategy` from `rules.start_age` to `rules.end_age` inclusive.
///
/// Fails with [`SimulationError::Overflow`] if a balance outgrows `Decimal`.
pub fn simulate(
    strategy: Strategy,
    rules: &TaxRuleSet,
    inputs: &StrategyInputs,
) -> Result<Vec<YearSnapshot>, SimulationError> {
    rules.validate()?;
    inputs.validate()?;

    debug!(
        strategy = strategy.label(),
        savings = %inputs.savings,
        pension = %inputs.pension,
        required = %inputs.required_net,
        "starting simulation"
    );

    let mut state = RunState {
        pots: Pots {
            pension: inputs.pension,
            savings: inputs.savings,
        },
        lump_sum_taken: false,
    };
    let growth = working(add(Decimal::ONE, rules.pension_growth_rate)?);
    let mut timeline = Vec::with_capacity(rules.years());

    for age in rules.start_age..=rules.end_age {
        let pension_start = round_money(state.pots.pension);
        let savings_start = round_money(state.pots.savings);
        let extra = inputs.extra_for(age);

        let mut year = TaxYear::open(rules, age, add(inputs.required_net, extra)?);
        run_year(strategy, inputs, age, &mut year, &mut state)?;

        if year.is_short() {
            debug!(
                strategy = strategy.label(),
                age,
                unmet = %round_money(year.need),
                "spending need not fully met"
            );
        }

        state.pots.pension = mul(state.pots.pension, growth)?;

        let snapshot = YearSnapshot {
            age,
            pension_start,
            pension_end: round_money(state.pots.pension),
            savings_start,
            savings_end: round_money(state.pots.savings),
            tax_paid: round_money(year.tax_paid),
            extra_spending: round_money(extra),
        };
        // Both totals must be representable so callers can sum the pots freely.
        add(snapshot.pension_start, snapshot.savings_start)?;
        add(snapshot.pension_end, snapshot.savings_end)?;
        timeline.push(snapshot);
    }

    Ok(timeline)
}

fn run_year(
    strategy: Strategy,
    inputs: &StrategyInputs,
    age: u32,
    year: &mut TaxYear<'_>,
    state: &mut RunState,
) -> Result<(), SimulationError> {
    let rules = year.rules;
    let pots = &mut state.pots;
    match strategy {
        Strategy::SavingsFirstLumpSum => {
            year.spend_savings(pots);
            if year.is_short() && !state.lump_sum_taken && pots.pension > Decimal::ZERO {
                year.take_lump_sum(pots)?;
                state.lump_sum_taken = true;
                debug!(age, savings = %round_money(pots.savings), "one-off lump sum taken");
                year.spend_savings(pots);
            }
            if year.is_short() && pots.pension > Decimal::ZERO {
                year.draw_taxable(pots)?;
            }
        }
        Strategy::SavingsFirstUfpls => {
            year.spend_savings(pots);
            if year.is_short() && pots.pension > Decimal::ZERO {
                let net = year.draw_ufpls_for_need(pots)?;
                year.apply_net(net);
            }
        }
        Strategy::AllowanceFirst => allowance_first(year, pots)?,
        Strategy::AllowanceFirstWithContribution => {
            if inputs.contribute && pots.savings > Decimal::ZERO {
                let net = pots.savings.min(no_income_net_cap(rules)?);
                pots.savings -= net;
                pots.pension = add(pots.pension, gross_up(rules, net)?)?;
            }
            allowance_first(year, pots)?;
        }
        Strategy::BasicRateBandFiller => {
            let mut net = Decimal::ZERO;
            if pots.pension > Decimal::ZERO && year.allowance_left > Decimal::ZERO {
                net = add(net, year.draw_within_allowance(pots, None)?)?;
            }
            if pots.pension > Decimal::ZERO {
                net = add(net, year.fill_basic_rate_band(pots, age)?)?;
            }
            pots.savings = add(pots.savings, year.apply_net(net))?;
            year.spend_savings(pots);
        }
        Strategy::PensionFirstUfpls => {
            if year.is_short() && pots.pension > Decimal::ZERO {
                let net = year.draw_ufpls_for_need(pots)?;
                pots.savings = add(pots.savings, year.apply_net(net))?;
            }
            year.spend_savings(pots);
        }
    }
    Ok(())
}

fn allowance_first(year: &mut TaxYear<'_>, pots: &mut Pots) -> Result<(), SimulationError> {
    if year.is_short() && pots.pension > Decimal::ZERO {
        let limit = year.need;
        let net = year.draw_within_allowance(pots, Some(limit))?;
        year.apply_net(net);

        year.spend_savings(pots);

        if year.is_short() && pots.pension > Decimal::ZERO {
            let net = year.draw_ufpls_for_need(pots)?;
            year.apply_net(net);
        }
    }
    year.spend_savings(pots);
    Ok(())
}

/// Net contribution that grosses up to the no-income limit.
pub(crate) fn no_income_net_cap(rules: &TaxRuleSet) -> Result<Decimal, SimulationError> {
    mul(rules.no_income_contribution_limit, rules.net_of_basic_rate())
}

/// Gross pension credit for a net contribution with basic-rate relief at source.
pub(crate) fn gross_up(rules: &TaxRuleSet, net: Decimal) -> Result<Decimal, SimulationError> {
    div(net, rules.net_of_basic_rate())
}

pub fn strategy_1(
    rules: &TaxRuleSet,
    savings: Decimal,
    pension: Decimal,
    required_net: Decimal,
    adhoc: &AdhocWithdrawals,
) -> Result<Vec<YearSnapshot>, SimulationError> {
    let inputs = StrategyInputs::new(savings, pension, required_net).with_adhoc(adhoc.clone());
    simulate(Strategy::SavingsFirstLumpSum, rules, &inputs)
}

pub fn strategy_2(
    rules: &TaxRuleSet,
    savings: Decimal,
    pension: Decimal,
    required_net: Decimal,
    adhoc: &AdhocWithdrawals,
) -> Result<Vec<YearSnapshot>, SimulationError> {
    let inputs = StrategyInputs::new(savings, pension, required_net).with_adhoc(adhoc.clone());
    simulate(Strategy::SavingsFirstUfpls, rules, &inputs)
}

pub fn strategy_3(
    rules: &TaxRuleSet,
    savings: Decimal,
    pension: Decimal,
    required_net: Decimal,
    adhoc: &AdhocWithdrawals,
) -> Result<Vec<YearSnapshot>, SimulationError> {
    let inputs = StrategyInputs::new(savings, pension, required_net).with_adhoc(adhoc.clone());
    simulate(Strategy::AllowanceFirst, rules, &inputs)
}

pub fn strategy_3a(
    rules: &TaxRuleSet,
    savings: Decimal,
    pension: Decimal,
    required_net: Decimal,
    adhoc: &AdhocWithdrawals,
    contribute: bool,
) -> Result<Vec<YearSnapshot>, SimulationError> {
    let inputs = StrategyInputs::new(savings, pension, required_net)
        .with_adhoc(adhoc.clone())
        .with_contribution(contribute);
    simulate(Strategy::AllowanceFirstWithContribution, rules, &inputs)
}

pub fn strategy_4(
    rules: &TaxRuleSet,
    savings: Decimal,
    pension: Decimal,
    required_net: Decimal,
    adhoc: &AdhocWithdrawals,
) -> Result<Vec<YearSnapshot>, SimulationError> {
    let inputs = StrategyInputs::new(savings, pension, required_net).with_adhoc(adhoc.clone());
    simulate(Strategy::BasicRateBandFiller, rules, &inputs)
}

pub fn strategy_5(
    rules: &TaxRuleSet,
    savings: Decimal,
    pension: Decimal,
    required_net: Decimal,
    adhoc: &AdhocWithdrawals,
) -> Result<Vec<YearSnapshot>, SimulationError> {
    let inputs = StrategyInputs::new(savings, pension, required_net).with_adhoc(adhoc.clone());
    simulate(Strategy::PensionFirstUfpls, rules, &inputs)
}

/// Compounds `starting_balance` once a year at `annual_rate_percent`,
/// rounding only the final result.
pub fn project_balance(
    starting_balance: Decimal,
    annual_rate_percent: Decimal,
    years: i64,
) -> Result<Decimal, SimulationError> {
    validate_amount("startingBalance", starting_balance)?;
    if years < 0 {
        return Err(SimulationError::NegativeYears(years));
    }
    if years > MAX_PROJECTION_YEARS {
        return Err(SimulationError::TooManyYears {
            years,
            max: MAX_PROJECTION_YEARS,
        });
    }

    let rate = div(annual_rate_percent, Decimal::ONE_HUNDRED)?;
    let factor = working(add(Decimal::ONE, rate)?);
    let mut balance = starting_balance;
    for _ in 0..years {
        let next = mul(balance, factor)?;
        if next == balance {
            break;
        }
        balance = next;
    }
    Ok(round_money(balance))
}
