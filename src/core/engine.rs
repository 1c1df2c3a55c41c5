use super::timeline::build_timeline;
use super::types::{Assumptions, CogsBreakdown, ForecastResult, ForecastSummary, MatChurnMode};

/// Individual salaries of the earliest hires. Headcount beyond this list is
/// paid the configured average new-hire salary.
const KNOWN_SALARIES: [f64; 4] = [100_000.0, 100_000.0, 90_000.0, 90_000.0];

/// The quarter index at which the one-off post-funding hire batch lands, and
/// the index from which steady quarterly hiring begins.
const HIRE_BATCH_INDEX: usize = 1;
const STEADY_HIRING_INDEX: usize = 2;

/// A group of customers that joined in the same quarter and ages together.
/// Owned by its stream's state; cohorts are never removed, only decayed.
#[derive(Debug)]
struct Cohort {
    joined_at: usize,
    current_size: f64,
}

#[derive(Debug, Clone, Copy)]
struct MatQuarter {
    trials: u32,
    conversions: u32,
    revenue: f64,
    active_mats: f64,
}

/// MAT funnel state: trial history plus the ordered cohort list. Advanced one
/// quarter at a time; no cohort reference escapes this struct.
#[derive(Debug)]
struct MatState {
    trials: Vec<u32>,
    cohorts: Vec<Cohort>,
}

impl MatState {
    fn new() -> Self {
        Self {
            trials: Vec::new(),
            cohorts: Vec::new(),
        }
    }

    fn advance(&mut self, assumptions: &Assumptions, index: usize) -> MatQuarter {
        // Churn cohorts that existed before this quarter; cohorts opened
        // below are not churned in their joining quarter.
        let retention = 1.0 - quarterly_churn(assumptions);
        for cohort in &mut self.cohorts {
            cohort.current_size *= retention;
        }

        // The first quarter doubles trials, modelling the initial marketing
        // push around launch.
        let trials = if index == 0 {
            assumptions.mat_trials_per_quarter * 2
        } else {
            assumptions.mat_trials_per_quarter
        };
        self.trials.push(trials);

        // Trials convert after a fixed two-quarter sales lag.
        let conversions = if index < 2 {
            0
        } else {
            (self.trials[index - 2] as f64 * assumptions.mat_conversion_rate) as u32
        };
        if conversions > 0 {
            self.cohorts.push(Cohort {
                joined_at: index,
                current_size: conversions as f64,
            });
        }

        let mut revenue = 0.0;
        let mut active_mats = 0.0;
        for cohort in &self.cohorts {
            active_mats += cohort.current_size;
            let year = years_of_service(index - cohort.joined_at);
            let price = school_annual_price(assumptions, year);
            revenue += cohort.current_size * assumptions.schools_per_mat as f64 * price / 4.0;
        }

        MatQuarter {
            trials,
            conversions,
            revenue,
            active_mats,
        }
    }

    #[cfg(test)]
    fn cohort_sizes(&self) -> Vec<f64> {
        self.cohorts.iter().map(|c| c.current_size).collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct DistrictQuarter {
    districts: u32,
    revenue: f64,
}

/// US district cohorts: incrementally added, billed on a two-tier tenure
/// price, never churned.
#[derive(Debug)]
struct DistrictState {
    cohorts: Vec<Cohort>,
}

impl DistrictState {
    fn new() -> Self {
        Self {
            cohorts: Vec::new(),
        }
    }

    fn advance(
        &mut self,
        assumptions: &Assumptions,
        index: usize,
        launch_index: usize,
    ) -> DistrictQuarter {
        if index < launch_index {
            return DistrictQuarter {
                districts: 0,
                revenue: 0.0,
            };
        }

        // The launch quarter opens a single pilot district; the steady
        // per-quarter addition applies from the next quarter on.
        let added = if index == launch_index {
            1
        } else {
            assumptions.districts_per_quarter
        };
        if added > 0 {
            self.cohorts.push(Cohort {
                joined_at: index,
                current_size: added as f64,
            });
        }

        let mut revenue = 0.0;
        let mut districts = 0.0;
        for cohort in &self.cohorts {
            districts += cohort.current_size;
            let price = if index - cohort.joined_at < 4 {
                assumptions.district_price_y1
            } else {
                assumptions.district_price_y2
            };
            revenue += cohort.current_size * price / 4.0;
        }

        DistrictQuarter {
            districts: districts as u32,
            revenue,
        }
    }
}

struct CogsSeries {
    api: Vec<f64>,
    infrastructure: Vec<f64>,
    support: Vec<f64>,
    payment: Vec<f64>,
    other: Vec<f64>,
    total: Vec<f64>,
}

/// Runs the full deterministic forecast: one pass over the quarter timeline,
/// each stream folded independently, then costs netted against revenue.
pub fn run_forecast(assumptions: &Assumptions) -> ForecastResult {
    let timeline = build_timeline(
        assumptions.start_quarter,
        assumptions.min_quarters,
        &[
            assumptions.us_launch_quarter,
            assumptions.eal_launch_quarter,
        ],
    );
    let quarters: Vec<String> = timeline.iter().map(|q| q.to_string()).collect();
    let n = timeline.len();

    let us_launch_index = assumptions
        .us_launch_quarter
        .index_from(assumptions.start_quarter) as usize;
    let eal_launch_index = assumptions
        .eal_launch_quarter
        .index_from(assumptions.start_quarter) as usize;

    let (uk_schools, uk_revenue) = uk_school_series(assumptions, n);

    let mut mat_state = MatState::new();
    let mut mat_trials = Vec::with_capacity(n);
    let mut mat_conversions = Vec::with_capacity(n);
    let mut active_mats = Vec::with_capacity(n);
    let mut mat_revenue = Vec::with_capacity(n);
    for i in 0..n {
        let q = mat_state.advance(assumptions, i);
        mat_trials.push(q.trials);
        mat_conversions.push(q.conversions);
        active_mats.push(q.active_mats as u32);
        mat_revenue.push(q.revenue);
    }

    let mut district_state = DistrictState::new();
    let mut us_districts = Vec::with_capacity(n);
    let mut us_revenue = Vec::with_capacity(n);
    for i in 0..n {
        let q = district_state.advance(assumptions, i, us_launch_index);
        us_districts.push(q.districts);
        us_revenue.push(q.revenue);
    }

    let (eal_learners, eal_revenue) = eal_series(assumptions, n, eal_launch_index);

    let total_revenue: Vec<f64> = (0..n)
        .map(|i| uk_revenue[i] + mat_revenue[i] + us_revenue[i] + eal_revenue[i])
        .collect();
    let arr: Vec<f64> = total_revenue.iter().map(|r| r * 4.0).collect();

    let headcount = headcount_series(assumptions, n);
    let payroll = payroll_series(assumptions, &headcount);
    let cogs = cogs_series(assumptions, &total_revenue);
    let gross_profit: Vec<f64> = (0..n).map(|i| total_revenue[i] - cogs.total[i]).collect();
    let sales_marketing: Vec<f64> = total_revenue
        .iter()
        .map(|r| r * assumptions.sales_marketing_pct)
        .collect();

    let mut office_rent = Vec::with_capacity(n);
    let mut other_opex = Vec::with_capacity(n);
    let mut rd = Vec::with_capacity(n);
    for i in 0..n {
        let inflation = operational_inflation_multiplier(assumptions, i);
        office_rent.push(assumptions.office_rent_monthly * 3.0 * inflation);
        other_opex.push(assumptions.other_opex_monthly * 3.0 * inflation);
        rd.push(assumptions.rd_quarterly);
    }

    let expansion: Vec<f64> = (0..n)
        .map(|i| {
            let mut cost = 0.0;
            if i == us_launch_index {
                cost += assumptions.us_launch_cost;
            }
            if i == eal_launch_index {
                cost += assumptions.eal_launch_cost;
            }
            cost
        })
        .collect();

    let mut operating_cash = Vec::with_capacity(n);
    let mut cumulative_cash = Vec::with_capacity(n);
    let mut running = 0.0;
    for i in 0..n {
        let op = gross_profit[i]
            - payroll[i]
            - sales_marketing[i]
            - office_rent[i]
            - other_opex[i]
            - rd[i]
            - expansion[i];
        operating_cash.push(op);
        running += op;
        cumulative_cash.push(running);
    }

    let last = n - 1;
    let summary = ForecastSummary {
        latest_quarter: quarters[last].clone(),
        latest_arr: arr[last],
        latest_gross_margin: if total_revenue[last] > 0.0 {
            gross_profit[last] / total_revenue[last]
        } else {
            0.0
        },
        latest_operating_cash: operating_cash[last],
        latest_cash_position: cumulative_cash[last],
        latest_headcount: headcount[last],
        latest_uk_schools: uk_schools[last],
        latest_active_mats: active_mats[last],
        latest_us_districts: us_districts[last],
        latest_eal_learners: eal_learners[last],
    };

    ForecastResult {
        quarters,
        uk_schools,
        uk_revenue,
        mat_trials,
        mat_conversions,
        active_mats,
        mat_revenue,
        us_districts,
        us_revenue,
        eal_learners,
        eal_revenue,
        total_revenue,
        arr,
        headcount,
        payroll,
        cogs_api: cogs.api,
        cogs_infrastructure: cogs.infrastructure,
        cogs_support: cogs.support,
        cogs_payment: cogs.payment,
        cogs_other: cogs.other,
        cogs_total: cogs.total,
        gross_profit,
        sales_marketing,
        office_rent,
        other_opex,
        rd,
        expansion,
        operating_cash,
        cumulative_cash,
        summary,
    }
}

/// Elapsed years of service after `quarters_elapsed` quarters, starting at 1.
fn years_of_service(quarters_elapsed: usize) -> u32 {
    (quarters_elapsed / 4 + 1) as u32
}

fn school_annual_price(assumptions: &Assumptions, year: u32) -> f64 {
    match year {
        1 => assumptions.school_price_y1,
        2 => assumptions.school_price_y2,
        _ => assumptions.school_price_y3,
    }
}

fn quarterly_churn(assumptions: &Assumptions) -> f64 {
    match assumptions.mat_churn_mode {
        MatChurnMode::AnnualDecay => 1.0 - (1.0 - assumptions.mat_annual_churn).powf(0.25),
        MatChurnMode::None => 0.0,
    }
}

/// UK school counts: hyper-growth curve for the first phase, compounding
/// quarterly growth after the taper. Counts truncate toward zero each
/// quarter; revenue prices the truncated count at the timeline-age tier.
fn uk_school_series(assumptions: &Assumptions, n: usize) -> (Vec<u32>, Vec<f64>) {
    let mut schools: Vec<u32> = Vec::with_capacity(n);
    let mut revenue = Vec::with_capacity(n);
    let quarterly_taper = (1.0 + assumptions.taper_growth_rate).powf(0.25);

    for i in 0..n {
        // Quarter 0 is always the configured starting count, even when the
        // hyper-growth phase has zero length.
        let count = if i == 0 || i < assumptions.hyper_growth_quarters as usize {
            assumptions.starting_uk_schools as f64
                * assumptions.hyper_growth_factor.powf(i as f64 / 4.0)
        } else {
            schools[i - 1] as f64 * quarterly_taper
        };
        let count = count as u32;
        schools.push(count);

        let price = school_annual_price(assumptions, years_of_service(i));
        revenue.push(count as f64 * price / 4.0);
    }

    (schools, revenue)
}

/// EAL learner pool: geometric growth from the launch quarter, billed per
/// learner per year. Zero before launch.
fn eal_series(assumptions: &Assumptions, n: usize, launch_index: usize) -> (Vec<u64>, Vec<f64>) {
    let mut learners = Vec::with_capacity(n);
    let mut revenue = Vec::with_capacity(n);

    for i in 0..n {
        if i < launch_index {
            learners.push(0);
            revenue.push(0.0);
            continue;
        }
        let pool = assumptions.initial_eal_learners
            * assumptions
                .eal_growth_multiplier
                .powi((i - launch_index) as i32);
        learners.push(pool as u64);
        revenue.push(pool * assumptions.eal_price_per_learner / 4.0);
    }

    (learners, revenue)
}

fn headcount_series(assumptions: &Assumptions, n: usize) -> Vec<u32> {
    let mut headcount = Vec::with_capacity(n);
    let mut staff = assumptions.initial_employees;
    for i in 0..n {
        if i == HIRE_BATCH_INDEX {
            staff += assumptions.launch_hire_batch;
        }
        if i >= STEADY_HIRING_INDEX {
            staff += assumptions.quarterly_hires;
        }
        headcount.push(staff);
    }
    headcount
}

/// Annual salary bill for a given headcount: known early-hire salaries first,
/// the rest at the average new-hire salary.
fn base_salary_bill(assumptions: &Assumptions, headcount: u32) -> f64 {
    let headcount = headcount as usize;
    let known: f64 = KNOWN_SALARIES.iter().take(headcount).sum();
    let beyond = headcount.saturating_sub(KNOWN_SALARIES.len());
    known + beyond as f64 * assumptions.avg_new_hire_salary
}

fn payroll_series(assumptions: &Assumptions, headcount: &[u32]) -> Vec<f64> {
    headcount
        .iter()
        .enumerate()
        .map(|(i, &staff)| {
            let inflation = (1.0 + assumptions.salary_inflation).powf(i as f64 / 4.0);
            base_salary_bill(assumptions, staff) * inflation * assumptions.payroll_oncost / 4.0
        })
        .collect()
}

fn cogs_tier_pct(assumptions: &Assumptions, index: usize) -> f64 {
    match years_of_service(index) {
        1 => assumptions.cogs_pct_y1,
        2 => assumptions.cogs_pct_y2,
        _ => assumptions.cogs_pct_y3,
    }
}

fn cogs_series(assumptions: &Assumptions, revenue: &[f64]) -> CogsSeries {
    let n = revenue.len();
    let mut series = CogsSeries {
        api: Vec::with_capacity(n),
        infrastructure: Vec::with_capacity(n),
        support: Vec::with_capacity(n),
        payment: Vec::with_capacity(n),
        other: Vec::with_capacity(n),
        total: Vec::with_capacity(n),
    };

    for (i, &rev) in revenue.iter().enumerate() {
        let tiered = rev * cogs_tier_pct(assumptions, i);
        let (infrastructure, support, payment, other) = match assumptions.cogs_breakdown {
            CogsBreakdown::Detailed => (
                rev * assumptions.infrastructure_pct,
                rev * assumptions.support_pct,
                rev * assumptions.payment_processing_pct,
                rev * assumptions.other_variable_pct,
            ),
            // Simple mode: the year-tiered percentage covers everything.
            CogsBreakdown::Simple => (0.0, 0.0, 0.0, 0.0),
        };

        series.api.push(tiered);
        series.infrastructure.push(infrastructure);
        series.support.push(support);
        series.payment.push(payment);
        series.other.push(other);
        series
            .total
            .push(tiered + infrastructure + support + payment + other);
    }

    series
}

fn operational_inflation_multiplier(assumptions: &Assumptions, index: usize) -> f64 {
    (1.0 + assumptions.operational_inflation).powf(index as f64 / 4.0)
}
