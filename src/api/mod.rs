use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::{
    Router,
    extract::{Json, Query},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, ValueEnum};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::{
    AdhocWithdrawals, ComparisonReport, ComparisonRequest, MAX_AGE_SPAN, SimulationError,
    Strategy, StrategyInputs, TaxRuleSet, TransferResult, YearSnapshot, compare_strategies,
    contribute_from_savings_to_pension, project_balance, simulate,
};

pub mod report;

pub use report::render_comparison_html;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliStrategy {
    S1,
    S2,
    S3,
    S3a,
    S4,
    S5,
}

impl From<CliStrategy> for Strategy {
    fn from(value: CliStrategy) -> Self {
        match value {
            CliStrategy::S1 => Strategy::SavingsFirstLumpSum,
            CliStrategy::S2 => Strategy::SavingsFirstUfpls,
            CliStrategy::S3 => Strategy::AllowanceFirst,
            CliStrategy::S3a => Strategy::AllowanceFirstWithContribution,
            CliStrategy::S4 => Strategy::BasicRateBandFiller,
            CliStrategy::S5 => Strategy::PensionFirstUfpls,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ApiStrategy {
    #[serde(alias = "1", alias = "strategy1", alias = "savings-first-lump-sum")]
    S1,
    #[serde(alias = "2", alias = "strategy2", alias = "savings-first-ufpls")]
    S2,
    #[serde(alias = "3", alias = "strategy3", alias = "allowance-first")]
    S3,
    #[serde(
        alias = "3a",
        alias = "strategy3a",
        alias = "allowance-first-with-contribution"
    )]
    S3a,
    #[serde(alias = "4", alias = "strategy4", alias = "basic-rate-band-filler")]
    S4,
    #[serde(alias = "5", alias = "strategy5", alias = "pension-first-ufpls")]
    S5,
}

impl From<ApiStrategy> for CliStrategy {
    fn from(value: ApiStrategy) -> Self {
        match value {
            ApiStrategy::S1 => CliStrategy::S1,
            ApiStrategy::S2 => CliStrategy::S2,
            ApiStrategy::S3 => CliStrategy::S3,
            ApiStrategy::S3a => CliStrategy::S3a,
            ApiStrategy::S4 => CliStrategy::S4,
            ApiStrategy::S5 => CliStrategy::S5,
        }
    }
}

/// Ad hoc withdrawals as a JSON object keyed by age, or as
/// `AGE=AMOUNT,AGE=AMOUNT` text in a query string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AdhocPayload {
    ByAge(BTreeMap<String, Decimal>),
    Text(String),
}

/// Rule overrides. Rates are in percent, as on the command line.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RulesPayload {
    personal_allowance: Option<Decimal>,
    state_pension: Option<Decimal>,
    state_pension_age: Option<u32>,
    basic_rate: Option<Decimal>,
    basic_rate_band: Option<Decimal>,
    growth_rate: Option<Decimal>,
    contribution_limit: Option<Decimal>,
    relief_cutoff_age: Option<u32>,
    start_age: Option<u32>,
    end_age: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SimulatePayload {
    strategy: Option<ApiStrategy>,
    savings: Option<Decimal>,
    pension: Option<Decimal>,
    required_amount: Option<Decimal>,
    adhoc: Option<AdhocPayload>,
    contribute: Option<bool>,
    rules: Option<RulesPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ComparePayload {
    savings: Option<Decimal>,
    pension: Option<Decimal>,
    required_amounts: Option<Vec<Decimal>>,
    target_ages: Option<Vec<u32>>,
    adhoc: Option<AdhocPayload>,
    contribute: Option<bool>,
    rules: Option<RulesPayload>,
}

/// Query form of a comparison, with comma-separated lists.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ReportQuery {
    savings: Option<Decimal>,
    pension: Option<Decimal>,
    required: Option<String>,
    ages: Option<String>,
    adhoc: Option<String>,
    contribute: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TransferPayload {
    savings: Option<Decimal>,
    pension: Option<Decimal>,
    requested_net: Option<Decimal>,
    age: Option<u32>,
    apply_cap: Option<bool>,
    rules: Option<RulesPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectQuery {
    starting_balance: Option<Decimal>,
    annual_rate_percent: Option<Decimal>,
    years: Option<i64>,
}

#[derive(Parser, Debug)]
#[command(
    name = "drawdown",
    about = "Year-by-year UK pension drawdown simulator (savings + pension, six withdrawal strategies)"
)]
pub struct Cli {
    #[arg(long, help = "Savings balance at the start age")]
    savings: Decimal,
    #[arg(long, help = "Pension pot at the start age")]
    pension: Decimal,
    #[arg(
        long,
        value_delimiter = ',',
        required = true,
        help = "Net annual spending, comma-separated for several columns"
    )]
    required: Vec<Decimal>,
    #[arg(
        long = "target-age",
        value_delimiter = ',',
        help = "Ages to tabulate, comma-separated; defaults to --end-age"
    )]
    target_ages: Vec<u32>,
    #[arg(
        long,
        value_parser = parse_adhoc,
        help = "Extra spending at one age as AGE=AMOUNT; may repeat"
    )]
    adhoc: Vec<(u32, Decimal)>,
    #[arg(long, value_enum, help = "Print one strategy's timeline instead of the comparison")]
    strategy: Option<CliStrategy>,
    #[arg(long, help = "Render the comparison as an HTML page")]
    html: bool,
    #[arg(long, help = "Disable the annual Strategy 3A contribution")]
    no_contribution: bool,
    #[arg(long, default_value = "12570")]
    personal_allowance: Decimal,
    #[arg(long, default_value = "11973", help = "Annual state pension")]
    state_pension: Decimal,
    #[arg(long, default_value_t = 67)]
    state_pension_age: u32,
    #[arg(long, default_value = "20", help = "Basic income tax rate in percent")]
    basic_rate: Decimal,
    #[arg(long, default_value = "37700", help = "Width of the basic-rate band")]
    basic_rate_band: Decimal,
    #[arg(
        long,
        default_value = "4",
        help = "Annual pension growth above inflation in percent"
    )]
    growth_rate: Decimal,
    #[arg(
        long,
        default_value = "3600",
        help = "Gross annual contribution limit without earnings"
    )]
    contribution_limit: Decimal,
    #[arg(
        long,
        default_value_t = 75,
        help = "Age from which contributions get no tax relief"
    )]
    relief_cutoff_age: u32,
    #[arg(long, default_value_t = 61)]
    start_age: u32,
    #[arg(long, default_value_t = 99)]
    end_age: u32,
}

#[derive(Debug)]
struct SimulateRequest {
    strategy: Strategy,
    rules: TaxRuleSet,
    inputs: StrategyInputs,
}

#[derive(Debug)]
struct CompareRequest {
    rules: TaxRuleSet,
    request: ComparisonRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulateResponse {
    strategy: Strategy,
    label: &'static str,
    description: &'static str,
    rules: TaxRuleSet,
    years: Vec<YearSnapshot>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompareResponse {
    rules: TaxRuleSet,
    #[serde(flatten)]
    report: ComparisonReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransferResponse {
    age: u32,
    #[serde(flatten)]
    result: TransferResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    starting_balance: Decimal,
    annual_rate_percent: Decimal,
    years: i64,
    balance: Decimal,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn parse_adhoc(value: &str) -> Result<(u32, Decimal), String> {
    let (age, amount) = value
        .split_once('=')
        .ok_or_else(|| format!("ad hoc withdrawal '{value}' must look like AGE=AMOUNT"))?;
    let age = age
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("ad hoc age '{}' is not a whole number", age.trim()))?;
    let amount = amount
        .trim()
        .parse::<Decimal>()
        .map_err(|_| format!("ad hoc amount '{}' is not a number", amount.trim()))?;
    Ok((age, amount))
}

fn parse_list<T: std::str::FromStr>(name: &str, value: &str) -> Result<Vec<T>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<T>()
                .map_err(|_| format!("{name} entry '{item}' is not valid"))
        })
        .collect()
}

fn adhoc_from_pairs(pairs: &[(u32, Decimal)]) -> AdhocWithdrawals {
    // A repeated age keeps its last amount.
    pairs.iter().copied().collect()
}

fn adhoc_from_payload(payload: AdhocPayload) -> Result<AdhocWithdrawals, String> {
    match payload {
        AdhocPayload::ByAge(by_age) => by_age
            .into_iter()
            .map(|(age, amount)| {
                let age = age
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| format!("ad hoc age '{age}' is not a whole number"))?;
                Ok::<_, String>((age, amount))
            })
            .collect(),
        AdhocPayload::Text(text) => {
            let pairs = text
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(parse_adhoc)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(adhoc_from_pairs(&pairs))
        }
    }
}

fn missing(name: &'static str) -> String {
    SimulationError::MissingArgument(name).to_string()
}

fn build_rules(cli: &Cli) -> Result<TaxRuleSet, String> {
    for (name, value) in [
        ("--personal-allowance", cli.personal_allowance),
        ("--state-pension", cli.state_pension),
        ("--basic-rate-band", cli.basic_rate_band),
        ("--contribution-limit", cli.contribution_limit),
    ] {
        if value < Decimal::ZERO {
            return Err(format!("{name} must be >= 0"));
        }
    }

    if !(Decimal::ZERO..Decimal::ONE_HUNDRED).contains(&cli.basic_rate) {
        return Err("--basic-rate must be >= 0 and < 100".to_string());
    }

    if cli.growth_rate <= -Decimal::ONE_HUNDRED {
        return Err("--growth-rate must be > -100".to_string());
    }

    if cli.end_age < cli.start_age {
        return Err("--end-age must be >= --start-age".to_string());
    }
    if cli.end_age - cli.start_age > MAX_AGE_SPAN {
        return Err(format!(
            "--end-age must be at most {MAX_AGE_SPAN} years after --start-age"
        ));
    }

    let defaults = TaxRuleSet::default();
    let rules = TaxRuleSet {
        personal_allowance: cli.personal_allowance,
        state_pension_annual: cli.state_pension,
        state_pension_age: cli.state_pension_age,
        basic_rate: cli.basic_rate / Decimal::ONE_HUNDRED,
        basic_rate_band: cli.basic_rate_band,
        pension_growth_rate: cli.growth_rate / Decimal::ONE_HUNDRED,
        no_income_contribution_limit: cli.contribution_limit,
        relief_cutoff_age: cli.relief_cutoff_age,
        start_age: cli.start_age,
        end_age: cli.end_age,
        ..defaults
    };
    rules.validate().map_err(|e| e.to_string())?;
    Ok(rules)
}

fn validate_balances(cli: &Cli) -> Result<(), String> {
    if cli.savings < Decimal::ZERO {
        return Err("--savings must be >= 0".to_string());
    }
    if cli.pension < Decimal::ZERO {
        return Err("--pension must be >= 0".to_string());
    }
    if cli.required.is_empty() {
        return Err("--required needs at least one amount".to_string());
    }
    if cli.required.iter().any(|amount| *amount < Decimal::ZERO) {
        return Err("--required amounts must be >= 0".to_string());
    }
    if let Some((age, _)) = cli.adhoc.iter().find(|(_, amount)| *amount < Decimal::ZERO) {
        return Err(format!("--adhoc amount for age {age} must be >= 0"));
    }
    Ok(())
}

fn build_strategy_inputs(cli: &Cli) -> Result<StrategyInputs, String> {
    validate_balances(cli)?;
    let [required] = cli.required.as_slice() else {
        return Err("--strategy takes a single --required amount".to_string());
    };
    Ok(StrategyInputs::new(cli.savings, cli.pension, *required)
        .with_adhoc(adhoc_from_pairs(&cli.adhoc))
        .with_contribution(!cli.no_contribution))
}

fn build_comparison_request(cli: &Cli) -> Result<ComparisonRequest, String> {
    validate_balances(cli)?;
    if let Some(age) = cli
        .target_ages
        .iter()
        .find(|age| **age < cli.start_age || **age > cli.end_age)
    {
        return Err(format!(
            "--target-age {age} must be between --start-age and --end-age"
        ));
    }
    Ok(ComparisonRequest {
        savings: cli.savings,
        pension: cli.pension,
        required_amounts: cli.required.clone(),
        target_ages: cli.target_ages.clone(),
        adhoc: adhoc_from_pairs(&cli.adhoc),
        contribute: !cli.no_contribution,
    })
}

/// Runs a parsed command line and returns what should be printed.
pub fn run_cli(cli: Cli) -> Result<String, String> {
    let rules = build_rules(&cli)?;

    if let Some(strategy) = cli.strategy {
        let inputs = build_strategy_inputs(&cli)?;
        let response = build_simulate_response(strategy.into(), rules, &inputs)?;
        return serde_json::to_string_pretty(&response).map_err(|e| e.to_string());
    }

    let request = build_comparison_request(&cli)?;
    let report = compare_strategies(&rules, &request).map_err(|e| e.to_string())?;
    info!(
        tables = report.tables.len(),
        columns = report.required_amounts.len(),
        "comparison complete"
    );
    if cli.html {
        Ok(render_comparison_html(&report, &rules))
    } else {
        serde_json::to_string_pretty(&CompareResponse { rules, report }).map_err(|e| e.to_string())
    }
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/simulate",
            get(simulate_get_handler).post(simulate_post_handler),
        )
        .route("/api/compare", post(compare_handler))
        .route("/api/transfer", post(transfer_handler))
        .route("/api/project", get(project_handler))
        .route("/report", get(report_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "drawdown HTTP API listening");
    info!("local access: http://127.0.0.1:{port}/report?savings=74000&pension=425000&required=23000");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn simulate_get_handler(Query(payload): Query<SimulatePayload>) -> Response {
    simulate_handler_impl(payload)
}

async fn simulate_post_handler(Json(payload): Json<SimulatePayload>) -> Response {
    simulate_handler_impl(payload)
}

fn simulate_handler_impl(payload: SimulatePayload) -> Response {
    let result = simulate_request_from_payload(payload).and_then(|request| {
        build_simulate_response(request.strategy, request.rules, &request.inputs)
    });
    match result {
        Ok(response) => {
            info!(
                strategy = response.label,
                years = response.years.len(),
                "simulate served"
            );
            json_response(StatusCode::OK, response)
        }
        Err(msg) => rejected("/api/simulate", msg),
    }
}

async fn compare_handler(Json(payload): Json<ComparePayload>) -> Response {
    compare_handler_impl(payload)
}

fn compare_handler_impl(payload: ComparePayload) -> Response {
    let result = compare_request_from_payload(payload).and_then(|request| {
        let report =
            compare_strategies(&request.rules, &request.request).map_err(|e| e.to_string())?;
        Ok(CompareResponse {
            rules: request.rules,
            report,
        })
    });
    match result {
        Ok(response) => {
            info!(tables = response.report.tables.len(), "compare served");
            json_response(StatusCode::OK, response)
        }
        Err(msg) => rejected("/api/compare", msg),
    }
}

async fn report_handler(Query(query): Query<ReportQuery>) -> Response {
    let result = compare_payload_from_query(query)
        .and_then(compare_request_from_payload)
        .and_then(|request| {
            let report =
                compare_strategies(&request.rules, &request.request).map_err(|e| e.to_string())?;
            Ok(render_comparison_html(&report, &request.rules))
        });
    match result {
        Ok(page) => {
            info!("report served");
            with_cache_control(Html(page))
        }
        Err(msg) => rejected("/report", msg),
    }
}

async fn transfer_handler(Json(payload): Json<TransferPayload>) -> Response {
    match transfer_from_payload(payload) {
        Ok(response) => {
            info!(age = response.age, "transfer served");
            json_response(StatusCode::OK, response)
        }
        Err(msg) => rejected("/api/transfer", msg),
    }
}

async fn project_handler(Query(query): Query<ProjectQuery>) -> Response {
    match project_from_query(query) {
        Ok(response) => {
            info!(years = response.years, "projection served");
            json_response(StatusCode::OK, response)
        }
        Err(msg) => rejected("/api/project", msg),
    }
}

fn rejected(route: &'static str, msg: String) -> Response {
    warn!(route, error = %msg, "request rejected");
    error_response(StatusCode::BAD_REQUEST, &msg)
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    with_cache_control((status, Json(body)))
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

fn rules_from_payload(payload: Option<RulesPayload>) -> Result<TaxRuleSet, String> {
    let mut cli = default_cli_for_api();
    let Some(payload) = payload else {
        return build_rules(&cli);
    };

    if let Some(v) = payload.personal_allowance {
        cli.personal_allowance = v;
    }
    if let Some(v) = payload.state_pension {
        cli.state_pension = v;
    }
    if let Some(v) = payload.state_pension_age {
        cli.state_pension_age = v;
    }
    if let Some(v) = payload.basic_rate {
        cli.basic_rate = v;
    }
    if let Some(v) = payload.basic_rate_band {
        cli.basic_rate_band = v;
    }
    if let Some(v) = payload.growth_rate {
        cli.growth_rate = v;
    }
    if let Some(v) = payload.contribution_limit {
        cli.contribution_limit = v;
    }
    if let Some(v) = payload.relief_cutoff_age {
        cli.relief_cutoff_age = v;
    }
    if let Some(v) = payload.start_age {
        cli.start_age = v;
    }
    if let Some(v) = payload.end_age {
        cli.end_age = v;
    }

    build_rules(&cli)
}

#[cfg(test)]
fn simulate_request_from_json(json: &str) -> Result<SimulateRequest, String> {
    let payload = serde_json::from_str::<SimulatePayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    simulate_request_from_payload(payload)
}

fn simulate_request_from_payload(payload: SimulatePayload) -> Result<SimulateRequest, String> {
    let strategy = payload.strategy.ok_or_else(|| missing("strategy"))?;
    let mut inputs =
        StrategyInputs::from_optional(payload.savings, payload.pension, payload.required_amount)
            .map_err(|e| e.to_string())?;
    if let Some(adhoc) = payload.adhoc {
        inputs.adhoc = adhoc_from_payload(adhoc)?;
    }
    if let Some(v) = payload.contribute {
        inputs.contribute = v;
    }
    inputs.validate().map_err(|e| e.to_string())?;

    Ok(SimulateRequest {
        strategy: CliStrategy::from(strategy).into(),
        rules: rules_from_payload(payload.rules)?,
        inputs,
    })
}

fn compare_payload_from_query(query: ReportQuery) -> Result<ComparePayload, String> {
    let required_amounts = query
        .required
        .as_deref()
        .map(|text| parse_list::<Decimal>("required", text))
        .transpose()?;
    let target_ages = query
        .ages
        .as_deref()
        .map(|text| parse_list::<u32>("ages", text))
        .transpose()?;
    Ok(ComparePayload {
        savings: query.savings,
        pension: query.pension,
        required_amounts,
        target_ages,
        adhoc: query.adhoc.map(AdhocPayload::Text),
        contribute: query.contribute,
        rules: None,
    })
}

fn compare_request_from_payload(payload: ComparePayload) -> Result<CompareRequest, String> {
    let savings = payload.savings.ok_or_else(|| missing("savings"))?;
    let pension = payload.pension.ok_or_else(|| missing("pension"))?;
    let required_amounts = payload
        .required_amounts
        .ok_or_else(|| missing("requiredAmounts"))?;
    let adhoc = payload
        .adhoc
        .map(adhoc_from_payload)
        .transpose()?
        .unwrap_or_default();

    Ok(CompareRequest {
        rules: rules_from_payload(payload.rules)?,
        request: ComparisonRequest {
            savings,
            pension,
            required_amounts,
            target_ages: payload.target_ages.unwrap_or_default(),
            adhoc,
            contribute: payload.contribute.unwrap_or(true),
        },
    })
}

fn transfer_from_payload(payload: TransferPayload) -> Result<TransferResponse, String> {
    let savings = payload.savings.ok_or_else(|| missing("savings"))?;
    let pension = payload.pension.ok_or_else(|| missing("pension"))?;
    let requested_net = payload.requested_net.ok_or_else(|| missing("requestedNet"))?;
    let age = payload.age.ok_or_else(|| missing("age"))?;
    let rules = rules_from_payload(payload.rules)?;

    let result = contribute_from_savings_to_pension(
        &rules,
        savings,
        pension,
        requested_net,
        age,
        payload.apply_cap.unwrap_or(false),
    )
    .map_err(|e| e.to_string())?;
    Ok(TransferResponse { age, result })
}

fn project_from_query(query: ProjectQuery) -> Result<ProjectResponse, String> {
    let starting_balance = query
        .starting_balance
        .ok_or_else(|| missing("startingBalance"))?;
    let annual_rate_percent = query
        .annual_rate_percent
        .ok_or_else(|| missing("annualRatePercent"))?;
    let years = query.years.ok_or_else(|| missing("years"))?;

    let balance =
        project_balance(starting_balance, annual_rate_percent, years).map_err(|e| e.to_string())?;
    Ok(ProjectResponse {
        starting_balance,
        annual_rate_percent,
        years,
        balance,
    })
}

fn build_simulate_response(
    strategy: Strategy,
    rules: TaxRuleSet,
    inputs: &StrategyInputs,
) -> Result<SimulateResponse, String> {
    let years = simulate(strategy, &rules, inputs).map_err(|e| e.to_string())?;
    Ok(SimulateResponse {
        strategy,
        label: strategy.label(),
        description: strategy.description(),
        rules,
        years,
    })
}

fn default_cli_for_api() -> Cli {
    let rules = TaxRuleSet::default();
    Cli {
        savings: dec!(74000),
        pension: dec!(425000),
        required: vec![dec!(23000)],
        target_ages: Vec::new(),
        adhoc: Vec::new(),
        strategy: None,
        html: false,
        no_contribution: false,
        personal_allowance: rules.personal_allowance,
        state_pension: rules.state_pension_annual,
        state_pension_age: rules.state_pension_age,
        basic_rate: rules.basic_rate * Decimal::ONE_HUNDRED,
        basic_rate_band: rules.basic_rate_band,
        growth_rate: rules.pension_growth_rate * Decimal::ONE_HUNDRED,
        contribution_limit: rules.no_income_contribution_limit,
        relief_cutoff_age: rules.relief_cutoff_age,
        start_age: rules.start_age,
        end_age: rules.end_age,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn sample_cli() -> Cli {
        default_cli_for_api()
    }

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["drawdown"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("arguments should parse")
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_defaults_match_default_rules() {
        let cli = parse(&["--savings", "74000", "--pension", "425000", "--required", "23000"]);
        assert_eq!(build_rules(&cli), Ok(TaxRuleSet::default()));
        assert_eq!(build_rules(&sample_cli()), Ok(TaxRuleSet::default()));
    }

    #[test]
    fn cli_parses_lists_and_adhoc_pairs() {
        let cli = parse(&[
            "--savings",
            "74000",
            "--pension",
            "425000",
            "--required",
            "23000,30000",
            "--target-age",
            "70,80",
            "--adhoc",
            "62=10000",
            "--adhoc",
            "70=2500.50",
            "--strategy",
            "s3a",
        ]);
        assert_eq!(cli.required, vec![dec!(23000), dec!(30000)]);
        assert_eq!(cli.target_ages, vec![70, 80]);
        assert_eq!(cli.adhoc, vec![(62, dec!(10000)), (70, dec!(2500.50))]);
        assert_eq!(cli.strategy, Some(CliStrategy::S3a));
    }

    #[test]
    fn cli_rejects_malformed_adhoc() {
        let err = Cli::try_parse_from([
            "drawdown",
            "--savings",
            "1",
            "--pension",
            "1",
            "--required",
            "1",
            "--adhoc",
            "62:100",
        ])
        .expect_err("must reject missing '='");
        assert!(err.to_string().contains("AGE=AMOUNT"));
    }

    #[test]
    fn build_rules_converts_percent_flags() {
        let mut cli = sample_cli();
        cli.basic_rate = dec!(25);
        cli.growth_rate = dec!(2.5);
        let rules = build_rules(&cli).expect("valid rules");
        assert_eq!(rules.basic_rate, dec!(0.25));
        assert_eq!(rules.pension_growth_rate, dec!(0.025));
    }

    #[test]
    fn build_rules_rejects_invalid_basic_rate() {
        let mut cli = sample_cli();
        cli.basic_rate = dec!(100);
        let err = build_rules(&cli).expect_err("must reject 100% rate");
        assert!(err.contains("--basic-rate"));
    }

    #[test]
    fn build_rules_rejects_negative_allowance() {
        let mut cli = sample_cli();
        cli.personal_allowance = dec!(-1);
        let err = build_rules(&cli).expect_err("must reject negative allowance");
        assert!(err.contains("--personal-allowance"));
    }

    #[test]
    fn build_rules_rejects_inverted_age_range() {
        let mut cli = sample_cli();
        cli.start_age = 70;
        cli.end_age = 65;
        let err = build_rules(&cli).expect_err("must reject inverted ages");
        assert!(err.contains("--end-age"));
    }

    #[test]
    fn build_rules_rejects_unbounded_age_range() {
        let mut cli = sample_cli();
        cli.start_age = 0;
        cli.end_age = u32::MAX;
        let err = build_rules(&cli).expect_err("must reject a 4-billion-year run");
        assert!(err.contains("--end-age"));
        assert!(err.contains("150"));
    }

    #[test]
    fn build_comparison_request_rejects_target_age_outside_range() {
        let mut cli = sample_cli();
        cli.target_ages = vec![61, 100];
        let err = build_comparison_request(&cli).expect_err("must reject age 100");
        assert!(err.contains("--target-age 100"));
    }

    #[test]
    fn build_strategy_inputs_needs_single_amount() {
        let mut cli = sample_cli();
        cli.required = vec![dec!(20000), dec!(30000)];
        let err = build_strategy_inputs(&cli).expect_err("must reject two amounts");
        assert!(err.contains("--strategy"));

        cli.required = vec![dec!(20000)];
        cli.adhoc = vec![(65, dec!(-1))];
        let err = build_strategy_inputs(&cli).expect_err("must reject negative adhoc");
        assert!(err.contains("--adhoc"));
    }

    #[test]
    fn repeated_adhoc_age_keeps_last_amount() {
        let adhoc = adhoc_from_pairs(&[(62, dec!(100)), (62, dec!(250))]);
        assert_eq!(adhoc.get(&62), Some(&dec!(250)));
        assert_eq!(adhoc.len(), 1);
    }

    #[test]
    fn run_cli_prints_strategy_timeline() {
        let mut cli = sample_cli();
        cli.strategy = Some(CliStrategy::S2);
        let out = run_cli(cli).expect("valid run");
        assert!(out.contains("\"label\": \"Strategy2\""));
        assert!(out.contains("\"pensionEnd\": \"442000.00\""));
    }

    #[test]
    fn run_cli_renders_html_comparison() {
        let mut cli = sample_cli();
        cli.html = true;
        cli.target_ages = vec![61];
        let out = run_cli(cli).expect("valid run");
        assert!(out.contains("Results at age 61"));
        assert!(out.contains("currency best"));
    }

    #[test]
    fn simulate_request_from_json_parses_web_keys() {
        let json = r#"{
          "strategy": "s3a",
          "savings": "74000",
          "pension": 425000,
          "requiredAmount": "23000",
          "adhoc": { "62": "10000", "70": 2500 },
          "contribute": false,
          "rules": { "basicRate": 20, "growthRate": "3", "endAge": 90 }
        }"#;
        let request = simulate_request_from_json(json).expect("json should parse");

        assert_eq!(request.strategy, Strategy::AllowanceFirstWithContribution);
        assert_eq!(request.inputs.savings, dec!(74000));
        assert_eq!(request.inputs.pension, dec!(425000));
        assert_eq!(request.inputs.required_net, dec!(23000));
        assert_eq!(request.inputs.adhoc.get(&62), Some(&dec!(10000)));
        assert_eq!(request.inputs.adhoc.get(&70), Some(&dec!(2500)));
        assert!(!request.inputs.contribute);
        assert_eq!(request.rules.pension_growth_rate, dec!(0.03));
        assert_eq!(request.rules.end_age, 90);
        assert_eq!(request.rules.personal_allowance, dec!(12570));
    }

    #[test]
    fn simulate_request_accepts_strategy_aliases() {
        for (alias, expected) in [
            ("1", Strategy::SavingsFirstLumpSum),
            ("strategy4", Strategy::BasicRateBandFiller),
            ("pension-first-ufpls", Strategy::PensionFirstUfpls),
        ] {
            let json = format!(
                r#"{{"strategy": "{alias}", "savings": 1, "pension": 1, "requiredAmount": 1}}"#
            );
            let request = simulate_request_from_json(&json).expect("json should parse");
            assert_eq!(request.strategy, expected);
        }
    }

    #[test]
    fn simulate_request_reports_missing_before_negative() {
        let err = simulate_request_from_json(
            r#"{"strategy": "s1", "savings": -5, "pension": 1}"#,
        )
        .expect_err("required amount missing");
        assert!(err.contains("requiredAmount must not be null"));

        let err = simulate_request_from_json(r#"{"savings": 1, "pension": 1, "requiredAmount": 1}"#)
            .expect_err("strategy missing");
        assert!(err.contains("strategy"));

        let err = simulate_request_from_json(
            r#"{"strategy": "s1", "savings": 1, "pension": 1, "requiredAmount": 1, "adhoc": {"70": -1}}"#,
        )
        .expect_err("negative adhoc");
        assert!(err.contains("age 70"));
    }

    #[test]
    fn adhoc_text_form_parses() {
        let adhoc = adhoc_from_payload(AdhocPayload::Text("62=10000, 70=2500.5".to_string()))
            .expect("valid text");
        assert_eq!(adhoc.get(&62), Some(&dec!(10000)));
        assert_eq!(adhoc.get(&70), Some(&dec!(2500.5)));

        let err = adhoc_from_payload(AdhocPayload::Text("sixty=1".to_string()))
            .expect_err("bad age");
        assert!(err.contains("sixty"));
    }

    #[test]
    fn report_query_lists_are_split() {
        let payload = compare_payload_from_query(ReportQuery {
            savings: Some(dec!(74000)),
            pension: Some(dec!(425000)),
            required: Some("23000, 30000".to_string()),
            ages: Some("61,75".to_string()),
            adhoc: None,
            contribute: None,
        })
        .expect("valid query");
        let request = compare_request_from_payload(payload).expect("valid payload");
        assert_eq!(
            request.request.required_amounts,
            vec![dec!(23000), dec!(30000)]
        );
        assert_eq!(request.request.target_ages, vec![61, 75]);
        assert!(request.request.contribute);

        let err = compare_payload_from_query(ReportQuery {
            ages: Some("61,old".to_string()),
            ..ReportQuery::default()
        })
        .expect_err("bad age");
        assert!(err.contains("ages entry 'old'"));
    }

    #[test]
    fn compare_response_serialization_contains_expected_fields() {
        let payload = serde_json::from_str::<ComparePayload>(
            r#"{"savings": 74000, "pension": 425000, "requiredAmounts": [23000], "targetAges": [61]}"#,
        )
        .expect("json should parse");
        let request = compare_request_from_payload(payload).expect("valid payload");
        let report = compare_strategies(&request.rules, &request.request).expect("valid request");
        let json = serde_json::to_string(&CompareResponse {
            rules: request.rules,
            report,
        })
        .expect("response should serialize");

        assert!(json.contains("\"rules\""));
        assert!(json.contains("\"personalAllowance\""));
        assert!(json.contains("\"tables\""));
        assert!(json.contains("\"totalEnd\""));
        assert!(json.contains("\"taxToDate\""));
        assert!(json.contains("\"best\""));
        assert!(json.contains("\"adhocWithdrawals\""));
    }

    #[test]
    fn transfer_payload_applies_cap_and_relief() {
        let payload = serde_json::from_str::<TransferPayload>(
            r#"{"savings": 74000, "pension": 425000, "requestedNet": 5000, "age": 60, "applyCap": true}"#,
        )
        .expect("json should parse");
        let response = transfer_from_payload(payload).expect("valid transfer");
        assert_eq!(response.result.savings_end, dec!(71120.00));
        assert_eq!(response.result.gross_contribution_added, dec!(3600.00));

        let payload = serde_json::from_str::<TransferPayload>(
            r#"{"savings": 74000, "pension": 425000, "requestedNet": 5000}"#,
        )
        .expect("json should parse");
        let err = transfer_from_payload(payload).expect_err("age missing");
        assert!(err.contains("age must not be null"));
    }

    #[test]
    fn project_query_validates_years() {
        let response = project_from_query(ProjectQuery {
            starting_balance: Some(dec!(1000)),
            annual_rate_percent: Some(dec!(5)),
            years: Some(2),
        })
        .expect("valid query");
        assert_eq!(response.balance, dec!(1102.50));

        let err = project_from_query(ProjectQuery {
            starting_balance: Some(dec!(1000)),
            annual_rate_percent: Some(dec!(5)),
            years: Some(-1),
        })
        .expect_err("negative years");
        assert!(err.contains("years must be >= 0"));

        let err = project_from_query(ProjectQuery {
            starting_balance: Some(dec!(1000)),
            annual_rate_percent: Some(dec!(0)),
            years: Some(i64::MAX),
        })
        .expect_err("too many years");
        assert!(err.contains("years must be at most 1000"));

        let err = project_from_query(ProjectQuery {
            starting_balance: Some(dec!(1000)),
            annual_rate_percent: Some(dec!(100)),
            years: Some(100),
        })
        .expect_err("balance overflows");
        assert!(err.contains("representable"));
    }

    #[tokio::test]
    async fn handlers_set_no_store_and_status() {
        let response = simulate_handler_impl(SimulatePayload::default());
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );

        let response = not_found_handler().await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = report_handler(Query(ReportQuery {
            savings: Some(dec!(74000)),
            pension: Some(dec!(425000)),
            required: Some("23000".to_string()),
            ..ReportQuery::default()
        }))
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL),
            Some(&HeaderValue::from_static("no-store"))
        );
    }
}
