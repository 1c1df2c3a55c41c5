use serde::Serialize;

use super::timeline::Quarter;

/// How cost of goods sold is modelled: a detailed component breakdown or a
/// single year-tiered percentage of revenue.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CogsBreakdown {
    Detailed,
    Simple,
}

/// Whether MAT cohorts decay under an annual churn rate or are held flat.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatChurnMode {
    AnnualDecay,
    None,
}

/// Every tunable parameter of the forecast, resolved and validated once per
/// run. Never mutated after construction; a parameter change means deriving a
/// fresh set and recomputing from scratch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assumptions {
    pub start_quarter: Quarter,
    pub min_quarters: u32,

    pub starting_uk_schools: u32,
    pub hyper_growth_factor: f64,
    pub hyper_growth_quarters: u32,
    pub taper_growth_rate: f64,
    pub school_price_y1: f64,
    pub school_price_y2: f64,
    pub school_price_y3: f64,

    pub mat_trials_per_quarter: u32,
    pub mat_conversion_rate: f64,
    pub schools_per_mat: u32,
    pub mat_annual_churn: f64,
    pub mat_churn_mode: MatChurnMode,

    pub us_launch_quarter: Quarter,
    pub districts_per_quarter: u32,
    pub district_price_y1: f64,
    pub district_price_y2: f64,

    pub eal_launch_quarter: Quarter,
    pub initial_eal_learners: f64,
    pub eal_growth_multiplier: f64,
    pub eal_price_per_learner: f64,

    pub initial_employees: u32,
    pub launch_hire_batch: u32,
    pub quarterly_hires: u32,
    pub avg_new_hire_salary: f64,
    pub salary_inflation: f64,
    pub payroll_oncost: f64,

    pub sales_marketing_pct: f64,
    pub cogs_breakdown: CogsBreakdown,
    pub cogs_pct_y1: f64,
    pub cogs_pct_y2: f64,
    pub cogs_pct_y3: f64,
    pub infrastructure_pct: f64,
    pub support_pct: f64,
    pub payment_processing_pct: f64,
    pub other_variable_pct: f64,

    pub office_rent_monthly: f64,
    pub other_opex_monthly: f64,
    pub operational_inflation: f64,
    pub rd_quarterly: f64,
    pub us_launch_cost: f64,
    pub eal_launch_cost: f64,
}

/// Latest-quarter scalar metrics, the headline figures a dashboard shows
/// alongside the full series.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastSummary {
    pub latest_quarter: String,
    pub latest_arr: f64,
    pub latest_gross_margin: f64,
    pub latest_operating_cash: f64,
    pub latest_cash_position: f64,
    pub latest_headcount: u32,
    pub latest_uk_schools: u32,
    pub latest_active_mats: u32,
    pub latest_us_districts: u32,
    pub latest_eal_learners: u64,
}

/// The complete forecast: one value per quarter for every named series, plus
/// derived totals and the summary scalars. This is the whole contract the
/// presentation layer consumes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResult {
    pub quarters: Vec<String>,

    pub uk_schools: Vec<u32>,
    pub uk_revenue: Vec<f64>,
    pub mat_trials: Vec<u32>,
    pub mat_conversions: Vec<u32>,
    pub active_mats: Vec<u32>,
    pub mat_revenue: Vec<f64>,
    pub us_districts: Vec<u32>,
    pub us_revenue: Vec<f64>,
    pub eal_learners: Vec<u64>,
    pub eal_revenue: Vec<f64>,
    pub total_revenue: Vec<f64>,
    pub arr: Vec<f64>,

    pub headcount: Vec<u32>,
    pub payroll: Vec<f64>,
    pub cogs_api: Vec<f64>,
    pub cogs_infrastructure: Vec<f64>,
    pub cogs_support: Vec<f64>,
    pub cogs_payment: Vec<f64>,
    pub cogs_other: Vec<f64>,
    pub cogs_total: Vec<f64>,
    pub gross_profit: Vec<f64>,
    pub sales_marketing: Vec<f64>,
    pub office_rent: Vec<f64>,
    pub other_opex: Vec<f64>,
    pub rd: Vec<f64>,
    pub expansion: Vec<f64>,
    pub operating_cash: Vec<f64>,
    pub cumulative_cash: Vec<f64>,

    pub summary: ForecastSummary,
}
