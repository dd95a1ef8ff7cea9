pub mod types;
pub mod units;

pub use types::*;
pub use units::{fraction_to_watts, DisplayUnit};
