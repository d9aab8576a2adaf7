pub mod aggregation;
pub mod calendar;
pub mod insight;
pub mod models;
pub mod period;
pub mod projection;
