use rust_decimal::Decimal;
use tracing::debug;

use super::engine::{gross_up, no_income_net_cap};
use super::error::SimulationError;
use super::money::{add, round_money, working};
use super::rules::TaxRuleSet;
use super::types::{TransferResult, validate_amount};

/// Moves a net contribution from savings to pension, grossed up with
/// basic-rate relief at source below `rules.relief_cutoff_age`.
///
/// `apply_cap` limits the net to what grosses up to the no-income limit; it
/// only bites where relief applies. From the cutoff age the transfer is 1:1.
pub fn contribute_from_savings_to_pension(
    rules: &TaxRuleSet,
    savings: Decimal,
    pension: Decimal,
    requested_net: Decimal,
    age: u32,
    apply_cap: bool,
) -> Result<TransferResult, SimulationError> {
    rules.validate()?;
    validate_amount("savings", savings)?;
    validate_amount("pension", pension)?;
    validate_amount("requestedNet", requested_net)?;

    if savings.is_zero() || requested_net.is_zero() {
        return Ok(TransferResult {
            savings_end: round_money(savings),
            pension_end: round_money(pension),
            gross_contribution_added: round_money(Decimal::ZERO),
            tax_relief_added: round_money(Decimal::ZERO),
        });
    }

    let relief_applies = age < rules.relief_cutoff_age;
    let mut net = requested_net.min(savings);
    if apply_cap && relief_applies {
        net = net.min(no_income_net_cap(rules)?);
    }

    let (gross, relief) = if relief_applies {
        let gross = gross_up(rules, net)?;
        (gross, working(gross - net))
    } else {
        (net, Decimal::ZERO)
    };

    debug!(age, net = %net, gross = %gross, "savings moved to pension");

    Ok(TransferResult {
        savings_end: round_money(savings - net),
        pension_end: round_money(add(pension, gross)?),
        gross_contribution_added: round_money(gross),
        tax_relief_added: round_money(relief),
    })
}
