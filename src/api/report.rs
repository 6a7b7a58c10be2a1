use std::fmt;

use rust_decimal::Decimal;

use crate::core::{ComparisonReport, ComparisonTable, Strategy, TaxRuleSet, round_money};

const STYLE: &str = "\
body { font-family: Arial, sans-serif; margin: 20px; background-color: #f5f5f5; }
.container { max-width: 1200px; margin: 0 auto; background-color: white; padding: 20px; border-radius: 8px; }
h1 { color: #2c3e50; text-align: center; }
.summary { background-color: #ecf0f1; padding: 15px; border-radius: 5px; margin-bottom: 30px; }
table { width: 100%; border-collapse: collapse; margin-top: 10px; }
th, td { border: 1px solid #ddd; padding: 8px; text-align: right; }
th { background-color: #3498db; color: white; }
.strategy { text-align: left; font-weight: bold; }
.currency { font-family: 'Courier New', monospace; }
.tax { display: block; font-size: 12px; color: #7f8c8d; }
.best { background-color: #55efc4; font-weight: bold; }
.notes { margin-top: 30px; padding: 15px; background-color: #d5dbdb; border-radius: 5px; font-size: 14px; }
";

/// Renders a comparison as a standalone HTML page.
pub fn render_comparison_html(report: &ComparisonReport, rules: &TaxRuleSet) -> String {
    ComparisonPage { report, rules }.to_string()
}

struct ComparisonPage<'a> {
    report: &'a ComparisonReport,
    rules: &'a TaxRuleSet,
}

impl fmt::Display for ComparisonPage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<!DOCTYPE html>")?;
        writeln!(f, "<html lang=\"en\">")?;
        writeln!(f, "<head>")?;
        writeln!(f, "<meta charset=\"UTF-8\">")?;
        writeln!(f, "<title>Pension Strategy Comparison</title>")?;
        writeln!(f, "<style>\n{STYLE}</style>")?;
        writeln!(f, "</head>")?;
        writeln!(f, "<body>")?;
        writeln!(f, "<div class=\"container\">")?;
        writeln!(f, "<h1>Pension Strategy Comparison</h1>")?;

        self.write_summary(f)?;
        for table in &self.report.tables {
            self.write_table(f, table)?;
        }
        self.write_notes(f)?;

        writeln!(f, "</div>")?;
        writeln!(f, "</body>")?;
        writeln!(f, "</html>")
    }
}

impl ComparisonPage<'_> {
    fn write_summary(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.report;
        writeln!(f, "<div class=\"summary\">")?;
        writeln!(f, "<h2>Starting position</h2>")?;
        writeln!(f, "<p><strong>Savings:</strong> £{}</p>", format_money(report.savings))?;
        writeln!(f, "<p><strong>Pension:</strong> £{}</p>", format_money(report.pension))?;

        let amounts = report
            .required_amounts
            .iter()
            .map(|a| format!("£{}", format_money(*a)))
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "<p><strong>Annual spending:</strong> {amounts}</p>")?;

        let ages = report
            .target_ages
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "<p><strong>Target ages:</strong> {ages}</p>")?;

        let adhoc = if report.adhoc_withdrawals.is_empty() {
            "None".to_string()
        } else {
            report
                .adhoc_withdrawals
                .iter()
                .map(|(age, amount)| format!("Age {age}: £{}", format_money(*amount)))
                .collect::<Vec<_>>()
                .join("; ")
        };
        writeln!(f, "<p><strong>Ad hoc withdrawals:</strong> {adhoc}</p>")?;
        writeln!(f, "</div>")
    }

    fn write_table(&self, f: &mut fmt::Formatter<'_>, table: &ComparisonTable) -> fmt::Result {
        writeln!(f, "<h2>Results at age {}</h2>", table.age)?;
        writeln!(f, "<table>")?;
        write!(f, "<thead><tr><th class=\"strategy\">Strategy</th>")?;
        for amount in &self.report.required_amounts {
            write!(f, "<th>£{}</th>", format_money(*amount))?;
        }
        writeln!(f, "</tr></thead>")?;
        writeln!(f, "<tbody>")?;
        for row in &table.rows {
            write!(f, "<tr><td class=\"strategy\">{}</td>", row.label)?;
            for cell in &row.cells {
                let class = if cell.best { "currency best" } else { "currency" };
                write!(
                    f,
                    "<td class=\"{class}\">£{}<span class=\"tax\">tax £{}</span></td>",
                    format_money(cell.total_end),
                    format_money(cell.tax_to_date)
                )?;
            }
            writeln!(f, "</tr>")?;
        }
        writeln!(f, "</tbody>")?;
        writeln!(f, "</table>")
    }

    fn write_notes(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rules = self.rules;
        writeln!(f, "<div class=\"notes\">")?;
        writeln!(f, "<h3>Strategies</h3>")?;
        writeln!(f, "<ul>")?;
        for strategy in Strategy::ALL {
            writeln!(
                f,
                "<li><strong>{}:</strong> {}</li>",
                strategy.label(),
                strategy.description()
            )?;
        }
        writeln!(f, "</ul>")?;

        writeln!(f, "<h3>Assumptions</h3>")?;
        writeln!(f, "<ul>")?;
        writeln!(
            f,
            "<li><strong>Pension growth above inflation:</strong> {}%</li>",
            format_percent(rules.pension_growth_rate)
        )?;
        writeln!(
            f,
            "<li><strong>Personal allowance:</strong> £{}</li>",
            format_money(rules.personal_allowance)
        )?;
        writeln!(
            f,
            "<li><strong>State pension:</strong> £{} a year from age {}</li>",
            format_money(rules.state_pension_annual),
            rules.state_pension_age
        )?;
        writeln!(
            f,
            "<li><strong>Basic rate:</strong> {}% on a band of £{}</li>",
            format_percent(rules.basic_rate),
            format_money(rules.basic_rate_band)
        )?;
        writeln!(
            f,
            "<li><strong>No-income contribution limit:</strong> £{} gross a year (Strategy 3A)</li>",
            format_money(rules.no_income_contribution_limit)
        )?;
        writeln!(f, "<li><strong>Savings interest:</strong> none, and no inflation</li>")?;
        writeln!(f, "</ul>")?;
        writeln!(f, "</div>")
    }
}

/// Two decimal places with thousands separators, e.g. `1,234,567.80`.
fn format_money(value: Decimal) -> String {
    let rounded = round_money(value);
    let text = rounded.abs().to_string();
    let (whole, pennies) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{sign}{grouped}.{pennies}")
}

fn format_percent(fraction: Decimal) -> String {
    (fraction * Decimal::ONE_HUNDRED).normalize().to_string()
}
