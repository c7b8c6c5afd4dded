pub mod sales;
pub mod stock;

pub use sales::SalesEngine;
pub use stock::StockEngine;

/// Trailing window, in days, for all fact-based computations
pub const ANALYSIS_WINDOW_DAYS: i64 = 90;
