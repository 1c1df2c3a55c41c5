mod engine;
pub mod timeline;
mod types;

pub use engine::run_forecast;
pub use timeline::{Quarter, build_timeline};
pub use types::{Assumptions, CogsBreakdown, ForecastResult, ForecastSummary, MatChurnMode};
