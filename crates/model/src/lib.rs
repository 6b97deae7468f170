pub mod context;
pub mod progress;
pub mod report;
pub mod unit;
