use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use super::engine::simulate;
use super::error::SimulationError;
use super::money::add;
use super::rules::TaxRuleSet;
use super::types::{AdhocWithdrawals, Strategy, StrategyInputs, YearSnapshot, validate_amount};

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRequest {
    pub savings: Decimal,
    pub pension: Decimal,
    pub required_amounts: Vec<Decimal>,
    /// Empty means the last simulated age only.
    pub target_ages: Vec<u32>,
    pub adhoc: AdhocWithdrawals,
    pub contribute: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonCell {
    pub total_end: Decimal,
    /// Tax paid from the start age up to and including the table's age.
    pub tax_to_date: Decimal,
    pub best: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonRow {
    pub strategy: Strategy,
    pub label: &'static str,
    pub cells: Vec<ComparisonCell>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonTable {
    pub age: u32,
    pub rows: Vec<ComparisonRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub savings: Decimal,
    pub pension: Decimal,
    pub required_amounts: Vec<Decimal>,
    pub target_ages: Vec<u32>,
    pub adhoc_withdrawals: AdhocWithdrawals,
    pub tables: Vec<ComparisonTable>,
}

/// Runs every strategy for every required amount and tabulates the end-of-age
/// totals for each target age.
pub fn compare_strategies(
    rules: &TaxRuleSet,
    request: &ComparisonRequest,
) -> Result<ComparisonReport, SimulationError> {
    rules.validate()?;
    let target_ages = validate_request(rules, request)?;

    // timelines[strategy][amount]
    let mut timelines: Vec<Vec<Vec<YearSnapshot>>> = Vec::with_capacity(Strategy::ALL.len());
    for strategy in Strategy::ALL {
        let mut by_amount = Vec::with_capacity(request.required_amounts.len());
        for &required in &request.required_amounts {
            let inputs = StrategyInputs::new(request.savings, request.pension, required)
                .with_adhoc(request.adhoc.clone())
                .with_contribution(request.contribute);
            by_amount.push(simulate(strategy, rules, &inputs)?);
        }
        timelines.push(by_amount);
    }

    let tables = target_ages
        .iter()
        .map(|&age| build_table(rules, age, &timelines))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(
        amounts = request.required_amounts.len(),
        tables = tables.len(),
        "comparison built"
    );

    Ok(ComparisonReport {
        savings: request.savings,
        pension: request.pension,
        required_amounts: request.required_amounts.clone(),
        target_ages,
        adhoc_withdrawals: request.adhoc.clone(),
        tables,
    })
}

fn build_table(
    rules: &TaxRuleSet,
    age: u32,
    timelines: &[Vec<Vec<YearSnapshot>>],
) -> Result<ComparisonTable, SimulationError> {
    let idx = (age - rules.start_age) as usize;
    let columns = timelines.first().map(Vec::len).unwrap_or(0);

    let best_per_column = (0..columns)
        .map(|col| {
            timelines
                .iter()
                .map(|by_amount| by_amount[col][idx].total_end())
                .max()
                .unwrap_or(Decimal::ZERO)
        })
        .collect::<Vec<_>>();

    let mut rows = Vec::with_capacity(timelines.len());
    for (&strategy, by_amount) in Strategy::ALL.iter().zip(timelines) {
        let mut cells = Vec::with_capacity(by_amount.len());
        for (col, timeline) in by_amount.iter().enumerate() {
            let total_end = timeline[idx].total_end();
            cells.push(ComparisonCell {
                total_end,
                tax_to_date: tax_to_date(&timeline[..=idx])?,
                best: total_end == best_per_column[col],
            });
        }
        rows.push(ComparisonRow {
            strategy,
            label: strategy.label(),
            cells,
        });
    }

    Ok(ComparisonTable { age, rows })
}

fn tax_to_date(years: &[YearSnapshot]) -> Result<Decimal, SimulationError> {
    years
        .iter()
        .try_fold(Decimal::ZERO, |total, w| add(total, w.tax_paid))
}

fn validate_request(
    rules: &TaxRuleSet,
    request: &ComparisonRequest,
) -> Result<Vec<u32>, SimulationError> {
    validate_amount("savings", request.savings)?;
    validate_amount("pension", request.pension)?;
    if request.required_amounts.is_empty() {
        return Err(SimulationError::EmptyRequiredAmounts);
    }
    for &amount in &request.required_amounts {
        validate_amount("requiredAmount", amount)?;
    }
    for (&age, &amount) in &request.adhoc {
        if amount < Decimal::ZERO {
            return Err(SimulationError::NegativeAdhocWithdrawal { age });
        }
    }

    if request.target_ages.is_empty() {
        return Ok(vec![rules.end_age]);
    }
    for &age in &request.target_ages {
        if age < rules.start_age || age > rules.end_age {
            return Err(SimulationError::TargetAgeOutOfRange {
                age,
                start: rules.start_age,
                end: rules.end_age,
            });
        }
    }
    Ok(request.target_ages.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(amounts: Vec<Decimal>, ages: Vec<u32>) -> ComparisonRequest {
        ComparisonRequest {
            savings: dec!(74000.00),
            pension: dec!(425000.00),
            required_amounts: amounts,
            target_ages: ages,
            adhoc: AdhocWithdrawals::new(),
            contribute: true,
        }
    }

    #[test]
    fn defaults_to_end_age_table() {
        let report = compare_strategies(&TaxRuleSet::default(), &request(vec![dec!(23000)], vec![]))
            .expect("valid request");
        assert_eq!(report.target_ages, vec![99]);
        assert_eq!(report.tables.len(), 1);
        assert_eq!(report.tables[0].rows.len(), 6);
        assert_eq!(report.tables[0].rows[0].label, "Strategy1");
        assert_eq!(report.tables[0].rows[3].label, "Strategy3A");
    }

    #[test]
    fn cells_match_individual_strategy_runs() {
        let report = compare_strategies(
            &TaxRuleSet::default(),
            &request(vec![dec!(23000), dec!(30000)], vec![61, 64, 80]),
        )
        .expect("valid request");
        assert_eq!(report.tables.len(), 3);

        let first = &report.tables[0];
        assert_eq!(first.age, 61);
        assert_eq!(first.rows[0].cells[0].total_end, dec!(493000.00));
        assert_eq!(first.rows[2].cells[0].total_end, dec!(492329.60));
        assert_eq!(first.rows[4].cells[0].tax_to_date, dec!(7540.00));
        assert_eq!(first.rows[5].cells[0].tax_to_date, dec!(1101.18));

        let at_64 = &report.tables[1];
        assert_eq!(at_64.rows[1].cells[0].total_end, dec!(478242.32));
        assert_eq!(at_64.rows[1].cells[0].tax_to_date, dec!(218.82));
    }

    #[test]
    fn best_marks_column_maximum() {
        let report = compare_strategies(
            &TaxRuleSet::default(),
            &request(vec![dec!(23000), dec!(40000)], vec![61, 99]),
        )
        .expect("valid request");

        for table in &report.tables {
            for col in 0..2 {
                let max = table
                    .rows
                    .iter()
                    .map(|r| r.cells[col].total_end)
                    .max()
                    .expect("six rows");
                let best = table.rows.iter().filter(|r| r.cells[col].best).collect::<Vec<_>>();
                assert!(!best.is_empty());
                assert!(best.iter().all(|r| r.cells[col].total_end == max));
            }
        }

        // At 61 with 23,000 a year the contribution's relief puts 3A ahead.
        let first = &report.tables[0];
        assert_eq!(first.rows[3].cells[0].total_end, dec!(493193.60));
        assert!(first.rows[3].cells[0].best);
        assert!(!first.rows[0].cells[0].best);
        assert!(!first.rows[4].cells[0].best);
    }

    #[test]
    fn rejects_invalid_requests_before_running() {
        let rules = TaxRuleSet::default();
        assert_eq!(
            compare_strategies(&rules, &request(vec![], vec![])),
            Err(SimulationError::EmptyRequiredAmounts)
        );
        assert_eq!(
            compare_strategies(&rules, &request(vec![dec!(23000), dec!(-1)], vec![])),
            Err(SimulationError::NegativeAmount {
                name: "requiredAmount"
            })
        );
        assert_eq!(
            compare_strategies(&rules, &request(vec![dec!(23000)], vec![61, 100])),
            Err(SimulationError::TargetAgeOutOfRange {
                age: 100,
                start: 61,
                end: 99
            })
        );
        assert_eq!(
            compare_strategies(&rules, &request(vec![dec!(23000)], vec![60])),
            Err(SimulationError::TargetAgeOutOfRange {
                age: 60,
                start: 61,
                end: 99
            })
        );
    }

    #[test]
    fn tax_to_date_reports_overflow() {
        let year = |tax_paid| YearSnapshot {
            age: 61,
            pension_start: Decimal::ZERO,
            pension_end: Decimal::ZERO,
            savings_start: Decimal::ZERO,
            savings_end: Decimal::ZERO,
            tax_paid,
            extra_spending: Decimal::ZERO,
        };
        assert_eq!(
            tax_to_date(&[year(dec!(1.25)), year(dec!(2.50))]),
            Ok(dec!(3.75))
        );
        assert_eq!(
            tax_to_date(&[year(Decimal::MAX), year(dec!(1))]),
            Err(SimulationError::Overflow)
        );
    }

    #[test]
    fn overflowing_strategy_fails_the_comparison() {
        let mut huge = request(vec![dec!(23000)], vec![]);
        huge.pension = dec!(50000000000000000000000000000);
        assert_eq!(
            compare_strategies(&TaxRuleSet::default(), &huge),
            Err(SimulationError::Overflow)
        );
    }
}
