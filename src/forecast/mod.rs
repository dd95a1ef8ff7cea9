pub mod alignment;
pub mod engine;
pub mod metrics;
pub mod penalty;
pub mod selection;

pub use alignment::{merge, prefer_observers, Alignment};
pub use engine::*;
pub use metrics::{
    aggregate, aggregate_with_generation_mean, summarize, DisplayMetrics, GroupBy, GroupKey,
    MetricAggregate, WindowSummary,
};
pub use penalty::*;
pub use selection::{select_forecasts, SelectionMode};
