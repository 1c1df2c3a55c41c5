use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::net::TcpListener;

use crate::core::{Assumptions, CogsBreakdown, ForecastResult, MatChurnMode, Quarter, run_forecast};

/// Identical assumption sets always produce identical forecasts, so resolved
/// requests are memoized on their serialized form. The map is cleared outright
/// when it fills rather than evicting piecemeal.
const FORECAST_CACHE_CAPACITY: usize = 128;

/// Ceilings on the timeline length and the integer count parameters. They
/// keep every series and accumulator comfortably inside u32/f64 range and
/// bound the work a single request can ask for.
const MAX_TIMELINE_QUARTERS: i64 = 400;
const MAX_COUNT_PARAMETER: u32 = 1_000_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliCogsBreakdown {
    Detailed,
    Simple,
}

impl From<CliCogsBreakdown> for CogsBreakdown {
    fn from(value: CliCogsBreakdown) -> Self {
        match value {
            CliCogsBreakdown::Detailed => CogsBreakdown::Detailed,
            CliCogsBreakdown::Simple => CogsBreakdown::Simple,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliMatChurnMode {
    AnnualDecay,
    None,
}

impl From<CliMatChurnMode> for MatChurnMode {
    fn from(value: CliMatChurnMode) -> Self {
        match value {
            CliMatChurnMode::AnnualDecay => MatChurnMode::AnnualDecay,
            CliMatChurnMode::None => MatChurnMode::None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiCogsBreakdown {
    Detailed,
    Simple,
}

impl From<ApiCogsBreakdown> for CliCogsBreakdown {
    fn from(value: ApiCogsBreakdown) -> Self {
        match value {
            ApiCogsBreakdown::Detailed => CliCogsBreakdown::Detailed,
            ApiCogsBreakdown::Simple => CliCogsBreakdown::Simple,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiMatChurnMode {
    #[serde(alias = "annualDecay", alias = "annual_decay")]
    AnnualDecay,
    None,
}

impl From<ApiMatChurnMode> for CliMatChurnMode {
    fn from(value: ApiMatChurnMode) -> Self {
        match value {
            ApiMatChurnMode::AnnualDecay => CliMatChurnMode::AnnualDecay,
            ApiMatChurnMode::None => CliMatChurnMode::None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ForecastPayload {
    start_quarter: Option<String>,
    min_quarters: Option<u32>,

    starting_uk_schools: Option<u32>,
    hyper_growth_factor: Option<f64>,
    hyper_growth_quarters: Option<u32>,
    taper_growth_rate: Option<f64>,
    school_price_y1: Option<f64>,
    school_price_y2: Option<f64>,
    school_price_y3: Option<f64>,

    mat_trials_per_quarter: Option<u32>,
    mat_conversion_rate: Option<f64>,
    schools_per_mat: Option<u32>,
    mat_annual_churn: Option<f64>,
    mat_churn_mode: Option<ApiMatChurnMode>,

    us_launch_quarter: Option<String>,
    districts_per_quarter: Option<u32>,
    district_price_y1: Option<f64>,
    district_price_y2: Option<f64>,

    eal_launch_quarter: Option<String>,
    initial_eal_learners: Option<f64>,
    eal_growth_multiplier: Option<f64>,
    eal_price_per_learner: Option<f64>,

    initial_employees: Option<u32>,
    launch_hire_batch: Option<u32>,
    quarterly_hires: Option<u32>,
    avg_new_hire_salary: Option<f64>,
    salary_inflation: Option<f64>,
    payroll_oncost: Option<f64>,

    sales_marketing_pct: Option<f64>,
    cogs_breakdown: Option<ApiCogsBreakdown>,
    cogs_pct_y1: Option<f64>,
    cogs_pct_y2: Option<f64>,
    cogs_pct_y3: Option<f64>,
    infrastructure_pct: Option<f64>,
    support_pct: Option<f64>,
    payment_processing_pct: Option<f64>,
    other_variable_pct: Option<f64>,

    office_rent_monthly: Option<f64>,
    other_opex_monthly: Option<f64>,
    operational_inflation: Option<f64>,
    rd_quarterly: Option<f64>,
    us_launch_cost: Option<f64>,
    eal_launch_cost: Option<f64>,
}

#[derive(Parser, Debug)]
#[command(
    name = "runway",
    about = "Quarterly SaaS revenue and cash-flow forecaster (UK schools + MATs + US districts + EAL licensing)"
)]
struct Cli {
    #[arg(
        long,
        default_value = "Q3 2025",
        help = "First quarter of the forecast, e.g. 'Q3 2025' or '2025Q3'"
    )]
    start_quarter: String,
    #[arg(
        long,
        default_value_t = 14,
        help = "Minimum forecast length in quarters; extended to cover late launches"
    )]
    min_quarters: u32,
    #[arg(long, default_value_t = 25)]
    starting_uk_schools: u32,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Annualized UK school growth multiple during the hyper-growth phase"
    )]
    hyper_growth_factor: f64,
    #[arg(
        long,
        default_value_t = 8,
        help = "Length of the UK hyper-growth phase in quarters"
    )]
    hyper_growth_quarters: u32,
    #[arg(
        long,
        default_value_t = 20.0,
        help = "Annual UK school growth after the hyper-growth phase in percent"
    )]
    taper_growth_rate: f64,
    #[arg(
        long,
        default_value_t = 5000.0,
        help = "Annual price per UK school in its first year"
    )]
    school_price_y1: f64,
    #[arg(
        long,
        default_value_t = 10000.0,
        help = "Annual price per UK school in its second year"
    )]
    school_price_y2: f64,
    #[arg(
        long,
        default_value_t = 15000.0,
        help = "Annual price per UK school from its third year"
    )]
    school_price_y3: f64,
    #[arg(
        long,
        default_value_t = 20,
        help = "New MAT trials opened each quarter; doubled in the first quarter"
    )]
    mat_trials_per_quarter: u32,
    #[arg(
        long,
        default_value_t = 70.0,
        help = "Share of MAT trials that convert after two quarters, in percent"
    )]
    mat_conversion_rate: f64,
    #[arg(long, default_value_t = 10, help = "Average schools per converted MAT")]
    schools_per_mat: u32,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "Annual MAT churn in percent, applied as quarterly decay"
    )]
    mat_annual_churn: f64,
    #[arg(long, value_enum, default_value_t = CliMatChurnMode::AnnualDecay)]
    mat_churn_mode: CliMatChurnMode,
    #[arg(
        long,
        default_value = "Q1 2027",
        help = "Quarter the US district stream launches"
    )]
    us_launch_quarter: String,
    #[arg(
        long,
        default_value_t = 15,
        help = "US districts added each quarter after the launch pilot"
    )]
    districts_per_quarter: u32,
    #[arg(
        long,
        default_value_t = 100000.0,
        help = "Annual price per US district in its first year"
    )]
    district_price_y1: f64,
    #[arg(
        long,
        default_value_t = 150000.0,
        help = "Annual price per US district from its second year"
    )]
    district_price_y2: f64,
    #[arg(
        long,
        default_value = "Q1 2028",
        help = "Quarter the EAL consumer stream launches"
    )]
    eal_launch_quarter: String,
    #[arg(
        long,
        default_value_t = 1000000.0,
        help = "EAL learner pool in the launch quarter"
    )]
    initial_eal_learners: f64,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Quarter-on-quarter EAL learner pool multiplier"
    )]
    eal_growth_multiplier: f64,
    #[arg(
        long,
        default_value_t = 30.0,
        help = "Annual price per EAL learner"
    )]
    eal_price_per_learner: f64,
    #[arg(long, default_value_t = 3)]
    initial_employees: u32,
    #[arg(
        long,
        default_value_t = 4,
        help = "One-off hires landing in the second quarter, post-funding"
    )]
    launch_hire_batch: u32,
    #[arg(
        long,
        default_value_t = 2,
        help = "Steady hires per quarter from the third quarter on"
    )]
    quarterly_hires: u32,
    #[arg(
        long,
        default_value_t = 80000.0,
        help = "Annual salary for hires beyond the founding team"
    )]
    avg_new_hire_salary: f64,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Annual salary inflation in percent"
    )]
    salary_inflation: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Employer on-costs on top of salary in percent (NI, pension)"
    )]
    payroll_oncost: f64,
    #[arg(
        long,
        default_value_t = 12.0,
        help = "Sales and marketing spend as percent of revenue"
    )]
    sales_marketing_pct: f64,
    #[arg(long, value_enum, default_value_t = CliCogsBreakdown::Detailed)]
    cogs_breakdown: CliCogsBreakdown,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "AI API cost as percent of revenue in year 1"
    )]
    cogs_pct_y1: f64,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "AI API cost as percent of revenue in year 2"
    )]
    cogs_pct_y2: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "AI API cost as percent of revenue from year 3"
    )]
    cogs_pct_y3: f64,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Hosting and infrastructure as percent of revenue"
    )]
    infrastructure_pct: f64,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Customer support as percent of revenue"
    )]
    support_pct: f64,
    #[arg(
        long,
        default_value_t = 2.5,
        help = "Payment processing as percent of revenue"
    )]
    payment_processing_pct: f64,
    #[arg(
        long,
        default_value_t = 2.0,
        help = "Other variable costs as percent of revenue"
    )]
    other_variable_pct: f64,
    #[arg(long, default_value_t = 5000.0, help = "Monthly office rent")]
    office_rent_monthly: f64,
    #[arg(
        long,
        default_value_t = 10000.0,
        help = "Other monthly operating expenses"
    )]
    other_opex_monthly: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Annual inflation on rent and other opex in percent"
    )]
    operational_inflation: f64,
    #[arg(
        long,
        default_value_t = 150000.0,
        help = "Flat quarterly research and development spend"
    )]
    rd_quarterly: f64,
    #[arg(
        long,
        default_value_t = 500000.0,
        help = "One-off cost booked in the US launch quarter"
    )]
    us_launch_cost: f64,
    #[arg(
        long,
        default_value_t = 250000.0,
        help = "One-off cost booked in the EAL launch quarter"
    )]
    eal_launch_cost: f64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_assumptions(cli: Cli) -> Result<Assumptions, String> {
    let start_quarter =
        Quarter::parse(&cli.start_quarter).map_err(|e| format!("--start-quarter: {e}"))?;
    let us_launch_quarter =
        Quarter::parse(&cli.us_launch_quarter).map_err(|e| format!("--us-launch-quarter: {e}"))?;
    let eal_launch_quarter = Quarter::parse(&cli.eal_launch_quarter)
        .map_err(|e| format!("--eal-launch-quarter: {e}"))?;

    if us_launch_quarter.index_from(start_quarter) < 0 {
        return Err("--us-launch-quarter must not precede --start-quarter".to_string());
    }

    if eal_launch_quarter.index_from(start_quarter) < 0 {
        return Err("--eal-launch-quarter must not precede --start-quarter".to_string());
    }

    for (name, launch) in [
        ("--us-launch-quarter", us_launch_quarter),
        ("--eal-launch-quarter", eal_launch_quarter),
    ] {
        if launch.index_from(start_quarter) > MAX_TIMELINE_QUARTERS {
            return Err(format!(
                "{name} must be within {MAX_TIMELINE_QUARTERS} quarters of --start-quarter"
            ));
        }
    }

    if !(1..=MAX_TIMELINE_QUARTERS as u32).contains(&cli.min_quarters) {
        return Err(format!(
            "--min-quarters must be between 1 and {MAX_TIMELINE_QUARTERS}"
        ));
    }

    if cli.starting_uk_schools == 0 {
        return Err("--starting-uk-schools must be > 0".to_string());
    }

    for (name, count) in [
        ("--starting-uk-schools", cli.starting_uk_schools),
        ("--hyper-growth-quarters", cli.hyper_growth_quarters),
        ("--mat-trials-per-quarter", cli.mat_trials_per_quarter),
        ("--schools-per-mat", cli.schools_per_mat),
        ("--districts-per-quarter", cli.districts_per_quarter),
        ("--initial-employees", cli.initial_employees),
        ("--launch-hire-batch", cli.launch_hire_batch),
        ("--quarterly-hires", cli.quarterly_hires),
    ] {
        if count > MAX_COUNT_PARAMETER {
            return Err(format!("{name} must be <= {MAX_COUNT_PARAMETER}"));
        }
    }

    if !cli.hyper_growth_factor.is_finite() || cli.hyper_growth_factor <= 0.0 {
        return Err("--hyper-growth-factor must be > 0".to_string());
    }

    if !cli.taper_growth_rate.is_finite() || cli.taper_growth_rate <= -100.0 {
        return Err("--taper-growth-rate must be > -100".to_string());
    }

    if !(0.0..=100.0).contains(&cli.mat_conversion_rate) {
        return Err("--mat-conversion-rate must be between 0 and 100".to_string());
    }

    if !(0.0..=100.0).contains(&cli.mat_annual_churn) {
        return Err("--mat-annual-churn must be between 0 and 100".to_string());
    }

    if cli.schools_per_mat == 0 {
        return Err("--schools-per-mat must be > 0".to_string());
    }

    if !cli.eal_growth_multiplier.is_finite() || cli.eal_growth_multiplier <= 0.0 {
        return Err("--eal-growth-multiplier must be > 0".to_string());
    }

    if !cli.initial_eal_learners.is_finite() || cli.initial_eal_learners < 0.0 {
        return Err("--initial-eal-learners must be >= 0".to_string());
    }

    if !cli.salary_inflation.is_finite() || cli.salary_inflation <= -100.0 {
        return Err("--salary-inflation must be > -100".to_string());
    }

    if !cli.payroll_oncost.is_finite() || cli.payroll_oncost < 0.0 {
        return Err("--payroll-oncost must be >= 0".to_string());
    }

    if !(0.0..=100.0).contains(&cli.sales_marketing_pct) {
        return Err("--sales-marketing-pct must be between 0 and 100".to_string());
    }

    for (name, pct) in [
        ("--cogs-pct-y1", cli.cogs_pct_y1),
        ("--cogs-pct-y2", cli.cogs_pct_y2),
        ("--cogs-pct-y3", cli.cogs_pct_y3),
        ("--infrastructure-pct", cli.infrastructure_pct),
        ("--support-pct", cli.support_pct),
        ("--payment-processing-pct", cli.payment_processing_pct),
        ("--other-variable-pct", cli.other_variable_pct),
    ] {
        if !(0.0..=100.0).contains(&pct) {
            return Err(format!("{name} must be between 0 and 100"));
        }
    }

    if !cli.operational_inflation.is_finite() || cli.operational_inflation <= -100.0 {
        return Err("--operational-inflation must be > -100".to_string());
    }

    for (name, amount) in [
        ("--school-price-y1", cli.school_price_y1),
        ("--school-price-y2", cli.school_price_y2),
        ("--school-price-y3", cli.school_price_y3),
        ("--district-price-y1", cli.district_price_y1),
        ("--district-price-y2", cli.district_price_y2),
        ("--eal-price-per-learner", cli.eal_price_per_learner),
        ("--avg-new-hire-salary", cli.avg_new_hire_salary),
        ("--office-rent-monthly", cli.office_rent_monthly),
        ("--other-opex-monthly", cli.other_opex_monthly),
        ("--rd-quarterly", cli.rd_quarterly),
        ("--us-launch-cost", cli.us_launch_cost),
        ("--eal-launch-cost", cli.eal_launch_cost),
    ] {
        if !amount.is_finite() || amount < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    Ok(Assumptions {
        start_quarter,
        min_quarters: cli.min_quarters,
        starting_uk_schools: cli.starting_uk_schools,
        hyper_growth_factor: cli.hyper_growth_factor,
        hyper_growth_quarters: cli.hyper_growth_quarters,
        taper_growth_rate: cli.taper_growth_rate / 100.0,
        school_price_y1: cli.school_price_y1,
        school_price_y2: cli.school_price_y2,
        school_price_y3: cli.school_price_y3,
        mat_trials_per_quarter: cli.mat_trials_per_quarter,
        mat_conversion_rate: cli.mat_conversion_rate / 100.0,
        schools_per_mat: cli.schools_per_mat,
        mat_annual_churn: cli.mat_annual_churn / 100.0,
        mat_churn_mode: cli.mat_churn_mode.into(),
        us_launch_quarter,
        districts_per_quarter: cli.districts_per_quarter,
        district_price_y1: cli.district_price_y1,
        district_price_y2: cli.district_price_y2,
        eal_launch_quarter,
        initial_eal_learners: cli.initial_eal_learners,
        eal_growth_multiplier: cli.eal_growth_multiplier,
        eal_price_per_learner: cli.eal_price_per_learner,
        initial_employees: cli.initial_employees,
        launch_hire_batch: cli.launch_hire_batch,
        quarterly_hires: cli.quarterly_hires,
        avg_new_hire_salary: cli.avg_new_hire_salary,
        salary_inflation: cli.salary_inflation / 100.0,
        payroll_oncost: 1.0 + cli.payroll_oncost / 100.0,
        sales_marketing_pct: cli.sales_marketing_pct / 100.0,
        cogs_breakdown: cli.cogs_breakdown.into(),
        cogs_pct_y1: cli.cogs_pct_y1 / 100.0,
        cogs_pct_y2: cli.cogs_pct_y2 / 100.0,
        cogs_pct_y3: cli.cogs_pct_y3 / 100.0,
        infrastructure_pct: cli.infrastructure_pct / 100.0,
        support_pct: cli.support_pct / 100.0,
        payment_processing_pct: cli.payment_processing_pct / 100.0,
        other_variable_pct: cli.other_variable_pct / 100.0,
        office_rent_monthly: cli.office_rent_monthly,
        other_opex_monthly: cli.other_opex_monthly,
        operational_inflation: cli.operational_inflation / 100.0,
        rd_quarterly: cli.rd_quarterly,
        us_launch_cost: cli.us_launch_cost,
        eal_launch_cost: cli.eal_launch_cost,
    })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route(
            "/api/forecast",
            get(forecast_get_handler).post(forecast_post_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("Runway HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/api/forecast");

    axum::serve(listener, app).await
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn forecast_get_handler(Query(payload): Query<ForecastPayload>) -> Response {
    forecast_handler_impl(payload).await
}

async fn forecast_post_handler(Json(payload): Json<ForecastPayload>) -> Response {
    forecast_handler_impl(payload).await
}

async fn forecast_handler_impl(payload: ForecastPayload) -> Response {
    let assumptions = match assumptions_from_payload(payload) {
        Ok(assumptions) => assumptions,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let result = cached_forecast(&assumptions);
    json_response(StatusCode::OK, result.as_ref())
}

fn forecast_cache() -> &'static Mutex<HashMap<String, Arc<ForecastResult>>> {
    static CACHE: OnceLock<Mutex<HashMap<String, Arc<ForecastResult>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn cached_forecast(assumptions: &Assumptions) -> Arc<ForecastResult> {
    let Ok(key) = serde_json::to_string(assumptions) else {
        return Arc::new(run_forecast(assumptions));
    };

    {
        let cache = forecast_cache().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = cache.get(&key) {
            return Arc::clone(hit);
        }
    }

    let result = Arc::new(run_forecast(assumptions));
    let mut cache = forecast_cache().lock().unwrap_or_else(|e| e.into_inner());
    if cache.len() >= FORECAST_CACHE_CAPACITY {
        cache.clear();
    }
    cache.insert(key, Arc::clone(&result));
    result
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn assumptions_from_json(json: &str) -> Result<Assumptions, String> {
    let payload = serde_json::from_str::<ForecastPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    assumptions_from_payload(payload)
}

fn assumptions_from_payload(payload: ForecastPayload) -> Result<Assumptions, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.start_quarter {
        cli.start_quarter = v;
    }
    if let Some(v) = payload.min_quarters {
        cli.min_quarters = v;
    }

    if let Some(v) = payload.starting_uk_schools {
        cli.starting_uk_schools = v;
    }
    if let Some(v) = payload.hyper_growth_factor {
        cli.hyper_growth_factor = v;
    }
    if let Some(v) = payload.hyper_growth_quarters {
        cli.hyper_growth_quarters = v;
    }
    if let Some(v) = payload.taper_growth_rate {
        cli.taper_growth_rate = v;
    }
    if let Some(v) = payload.school_price_y1 {
        cli.school_price_y1 = v;
    }
    if let Some(v) = payload.school_price_y2 {
        cli.school_price_y2 = v;
    }
    if let Some(v) = payload.school_price_y3 {
        cli.school_price_y3 = v;
    }

    if let Some(v) = payload.mat_trials_per_quarter {
        cli.mat_trials_per_quarter = v;
    }
    if let Some(v) = payload.mat_conversion_rate {
        cli.mat_conversion_rate = v;
    }
    if let Some(v) = payload.schools_per_mat {
        cli.schools_per_mat = v;
    }
    if let Some(v) = payload.mat_annual_churn {
        cli.mat_annual_churn = v;
    }
    if let Some(v) = payload.mat_churn_mode {
        cli.mat_churn_mode = v.into();
    }

    if let Some(v) = payload.us_launch_quarter {
        cli.us_launch_quarter = v;
    }
    if let Some(v) = payload.districts_per_quarter {
        cli.districts_per_quarter = v;
    }
    if let Some(v) = payload.district_price_y1 {
        cli.district_price_y1 = v;
    }
    if let Some(v) = payload.district_price_y2 {
        cli.district_price_y2 = v;
    }

    if let Some(v) = payload.eal_launch_quarter {
        cli.eal_launch_quarter = v;
    }
    if let Some(v) = payload.initial_eal_learners {
        cli.initial_eal_learners = v;
    }
    if let Some(v) = payload.eal_growth_multiplier {
        cli.eal_growth_multiplier = v;
    }
    if let Some(v) = payload.eal_price_per_learner {
        cli.eal_price_per_learner = v;
    }

    if let Some(v) = payload.initial_employees {
        cli.initial_employees = v;
    }
    if let Some(v) = payload.launch_hire_batch {
        cli.launch_hire_batch = v;
    }
    if let Some(v) = payload.quarterly_hires {
        cli.quarterly_hires = v;
    }
    if let Some(v) = payload.avg_new_hire_salary {
        cli.avg_new_hire_salary = v;
    }
    if let Some(v) = payload.salary_inflation {
        cli.salary_inflation = v;
    }
    if let Some(v) = payload.payroll_oncost {
        cli.payroll_oncost = v;
    }

    if let Some(v) = payload.sales_marketing_pct {
        cli.sales_marketing_pct = v;
    }
    if let Some(v) = payload.cogs_breakdown {
        cli.cogs_breakdown = v.into();
    }
    if let Some(v) = payload.cogs_pct_y1 {
        cli.cogs_pct_y1 = v;
    }
    if let Some(v) = payload.cogs_pct_y2 {
        cli.cogs_pct_y2 = v;
    }
    if let Some(v) = payload.cogs_pct_y3 {
        cli.cogs_pct_y3 = v;
    }
    if let Some(v) = payload.infrastructure_pct {
        cli.infrastructure_pct = v;
    }
    if let Some(v) = payload.support_pct {
        cli.support_pct = v;
    }
    if let Some(v) = payload.payment_processing_pct {
        cli.payment_processing_pct = v;
    }
    if let Some(v) = payload.other_variable_pct {
        cli.other_variable_pct = v;
    }

    if let Some(v) = payload.office_rent_monthly {
        cli.office_rent_monthly = v;
    }
    if let Some(v) = payload.other_opex_monthly {
        cli.other_opex_monthly = v;
    }
    if let Some(v) = payload.operational_inflation {
        cli.operational_inflation = v;
    }
    if let Some(v) = payload.rd_quarterly {
        cli.rd_quarterly = v;
    }
    if let Some(v) = payload.us_launch_cost {
        cli.us_launch_cost = v;
    }
    if let Some(v) = payload.eal_launch_cost {
        cli.eal_launch_cost = v;
    }

    build_assumptions(cli)
}

fn default_cli_for_api() -> Cli {
    Cli {
        start_quarter: "Q3 2025".to_string(),
        min_quarters: 14,
        starting_uk_schools: 25,
        hyper_growth_factor: 3.0,
        hyper_growth_quarters: 8,
        taper_growth_rate: 20.0,
        school_price_y1: 5_000.0,
        school_price_y2: 10_000.0,
        school_price_y3: 15_000.0,
        mat_trials_per_quarter: 20,
        mat_conversion_rate: 70.0,
        schools_per_mat: 10,
        mat_annual_churn: 10.0,
        mat_churn_mode: CliMatChurnMode::AnnualDecay,
        us_launch_quarter: "Q1 2027".to_string(),
        districts_per_quarter: 15,
        district_price_y1: 100_000.0,
        district_price_y2: 150_000.0,
        eal_launch_quarter: "Q1 2028".to_string(),
        initial_eal_learners: 1_000_000.0,
        eal_growth_multiplier: 2.0,
        eal_price_per_learner: 30.0,
        initial_employees: 3,
        launch_hire_batch: 4,
        quarterly_hires: 2,
        avg_new_hire_salary: 80_000.0,
        salary_inflation: 4.0,
        payroll_oncost: 15.0,
        sales_marketing_pct: 12.0,
        cogs_breakdown: CliCogsBreakdown::Detailed,
        cogs_pct_y1: 15.0,
        cogs_pct_y2: 10.0,
        cogs_pct_y3: 5.0,
        infrastructure_pct: 3.0,
        support_pct: 2.0,
        payment_processing_pct: 2.5,
        other_variable_pct: 2.0,
        office_rent_monthly: 5_000.0,
        other_opex_monthly: 10_000.0,
        operational_inflation: 5.0,
        rd_quarterly: 150_000.0,
        us_launch_cost: 500_000.0,
        eal_launch_cost: 250_000.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_cli() -> Cli {
        default_cli_for_api()
    }

    fn q(text: &str) -> Quarter {
        Quarter::parse(text).unwrap()
    }

    #[test]
    fn build_assumptions_converts_percent_units() {
        let assumptions = build_assumptions(sample_cli()).expect("valid assumptions");
        assert_approx(assumptions.taper_growth_rate, 0.20);
        assert_approx(assumptions.mat_conversion_rate, 0.70);
        assert_approx(assumptions.mat_annual_churn, 0.10);
        assert_approx(assumptions.salary_inflation, 0.04);
        assert_approx(assumptions.payroll_oncost, 1.15);
        assert_approx(assumptions.sales_marketing_pct, 0.12);
        assert_approx(assumptions.cogs_pct_y1, 0.15);
        assert_approx(assumptions.payment_processing_pct, 0.025);
        assert_approx(assumptions.operational_inflation, 0.05);
    }

    #[test]
    fn build_assumptions_parses_quarter_strings() {
        let mut cli = sample_cli();
        cli.start_quarter = "2025Q3".to_string();

        let assumptions = build_assumptions(cli).expect("valid assumptions");
        assert_eq!(assumptions.start_quarter, q("Q3 2025"));
        assert_eq!(assumptions.us_launch_quarter, q("Q1 2027"));
    }

    #[test]
    fn build_assumptions_rejects_malformed_quarter() {
        let mut cli = sample_cli();
        cli.start_quarter = "autumn 2025".to_string();

        let err = build_assumptions(cli).expect_err("must reject malformed quarter");
        assert!(err.contains("--start-quarter"));
    }

    #[test]
    fn build_assumptions_rejects_launch_before_start() {
        let mut cli = sample_cli();
        cli.us_launch_quarter = "Q1 2025".to_string();

        let err = build_assumptions(cli).expect_err("must reject pre-start launch");
        assert!(err.contains("--us-launch-quarter"));
    }

    #[test]
    fn build_assumptions_rejects_zero_min_quarters() {
        let mut cli = sample_cli();
        cli.min_quarters = 0;

        let err = build_assumptions(cli).expect_err("must reject empty timeline");
        assert!(err.contains("--min-quarters"));
    }

    #[test]
    fn build_assumptions_rejects_out_of_range_conversion_rate() {
        let mut cli = sample_cli();
        cli.mat_conversion_rate = 120.0;

        let err = build_assumptions(cli).expect_err("must reject conversion rate > 100");
        assert!(err.contains("--mat-conversion-rate"));
    }

    #[test]
    fn build_assumptions_rejects_oversized_min_quarters() {
        let mut cli = sample_cli();
        cli.min_quarters = 100_000;

        let err = build_assumptions(cli).expect_err("must reject oversized timeline");
        assert!(err.contains("--min-quarters"));
    }

    #[test]
    fn build_assumptions_rejects_oversized_counts() {
        let mut cli = sample_cli();
        cli.mat_trials_per_quarter = u32::MAX;
        let err = build_assumptions(cli).expect_err("must reject oversized trial count");
        assert!(err.contains("--mat-trials-per-quarter"));

        let mut cli = sample_cli();
        cli.quarterly_hires = u32::MAX;
        let err = build_assumptions(cli).expect_err("must reject oversized hire count");
        assert!(err.contains("--quarterly-hires"));

        let mut cli = sample_cli();
        cli.launch_hire_batch = MAX_COUNT_PARAMETER + 1;
        let err = build_assumptions(cli).expect_err("must reject oversized hire batch");
        assert!(err.contains("--launch-hire-batch"));
    }

    #[test]
    fn build_assumptions_rejects_far_future_launch_quarter() {
        let mut cli = sample_cli();
        cli.eal_launch_quarter = "Q1 3000".to_string();

        let err = build_assumptions(cli).expect_err("must reject far-future launch");
        assert!(err.contains("--eal-launch-quarter"));
    }

    #[test]
    fn assumptions_from_json_parses_web_keys() {
        let json = r#"{
          "startQuarter": "Q1 2026",
          "minQuarters": 16,
          "startingUkSchools": 40,
          "hyperGrowthFactor": 2.5,
          "taperGrowthRate": 15,
          "matTrialsPerQuarter": 12,
          "matConversionRate": 60,
          "matChurnMode": "none",
          "usLaunchQuarter": "Q3 2027",
          "districtsPerQuarter": 8,
          "ealLaunchQuarter": "2028Q2",
          "cogsBreakdown": "simple",
          "cogsPctY1": 25,
          "payrollOncost": 20,
          "rdQuarterly": 200000
        }"#;
        let assumptions = assumptions_from_json(json).expect("json should parse");

        assert_eq!(assumptions.start_quarter, q("Q1 2026"));
        assert_eq!(assumptions.min_quarters, 16);
        assert_eq!(assumptions.starting_uk_schools, 40);
        assert_approx(assumptions.hyper_growth_factor, 2.5);
        assert_approx(assumptions.taper_growth_rate, 0.15);
        assert_eq!(assumptions.mat_trials_per_quarter, 12);
        assert_approx(assumptions.mat_conversion_rate, 0.60);
        assert_eq!(assumptions.mat_churn_mode, MatChurnMode::None);
        assert_eq!(assumptions.us_launch_quarter, q("Q3 2027"));
        assert_eq!(assumptions.districts_per_quarter, 8);
        assert_eq!(assumptions.eal_launch_quarter, q("Q2 2028"));
        assert_eq!(assumptions.cogs_breakdown, CogsBreakdown::Simple);
        assert_approx(assumptions.cogs_pct_y1, 0.25);
        assert_approx(assumptions.payroll_oncost, 1.20);
        assert_approx(assumptions.rd_quarterly, 200_000.0);
    }

    #[test]
    fn assumptions_from_json_uses_defaults_for_missing_keys() {
        let assumptions = assumptions_from_json("{}").expect("empty payload is valid");
        let defaults = build_assumptions(sample_cli()).expect("valid assumptions");
        assert_eq!(assumptions, defaults);
    }

    #[test]
    fn assumptions_from_json_rejects_bad_quarter_string() {
        let err = assumptions_from_json(r#"{"usLaunchQuarter": "Q5 2027"}"#)
            .expect_err("must reject quarter out of range");
        assert!(err.contains("--us-launch-quarter"));
    }

    #[test]
    fn cached_forecast_returns_shared_result_for_identical_assumptions() {
        let mut cli = sample_cli();
        cli.starting_uk_schools = 123;
        cli.rd_quarterly = 98_765.0;
        let assumptions = build_assumptions(cli).expect("valid assumptions");

        let first = cached_forecast(&assumptions);
        let second = cached_forecast(&assumptions);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn cached_forecast_distinguishes_different_assumptions() {
        let mut cli = sample_cli();
        cli.starting_uk_schools = 321;
        let assumptions = build_assumptions(cli).expect("valid assumptions");

        let mut other_cli = sample_cli();
        other_cli.starting_uk_schools = 322;
        let other = build_assumptions(other_cli).expect("valid assumptions");

        let first = cached_forecast(&assumptions);
        let second = cached_forecast(&other);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.uk_schools[0], second.uk_schools[0]);
    }

    #[tokio::test]
    async fn forecast_handler_serves_defaults_with_ok_status() {
        let response = forecast_handler_impl(ForecastPayload::default()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    }

    #[tokio::test]
    async fn forecast_handler_rejects_invalid_payload_with_bad_request() {
        let payload = ForecastPayload {
            mat_conversion_rate: Some(250.0),
            ..ForecastPayload::default()
        };
        let response = forecast_handler_impl(payload).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn forecast_handler_survives_zero_growth_quarters() {
        let payload = ForecastPayload {
            hyper_growth_quarters: Some(0),
            ..ForecastPayload::default()
        };
        let response = forecast_handler_impl(payload).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn forecast_response_serialization_contains_expected_fields() {
        let assumptions = build_assumptions(sample_cli()).expect("valid assumptions");
        let result = run_forecast(&assumptions);
        let json = serde_json::to_string(&result).expect("result should serialize");

        assert!(json.contains("\"quarters\""));
        assert!(json.contains("\"Q3 2025\""));
        assert!(json.contains("\"ukSchools\""));
        assert!(json.contains("\"matRevenue\""));
        assert!(json.contains("\"usDistricts\""));
        assert!(json.contains("\"ealLearners\""));
        assert!(json.contains("\"totalRevenue\""));
        assert!(json.contains("\"arr\""));
        assert!(json.contains("\"cogsTotal\""));
        assert!(json.contains("\"grossProfit\""));
        assert!(json.contains("\"operatingCash\""));
        assert!(json.contains("\"cumulativeCash\""));
        assert!(json.contains("\"summary\""));
        assert!(json.contains("\"latestArr\""));
    }

    #[test]
    fn default_forecast_runs_fourteen_quarters() {
        let assumptions = build_assumptions(sample_cli()).expect("valid assumptions");
        let result = run_forecast(&assumptions);
        assert_eq!(result.quarters.len(), 14);
        assert_eq!(result.quarters[0], "Q3 2025");
        assert_eq!(result.quarters[13], "Q4 2028");
    }
}
