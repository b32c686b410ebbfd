pub mod calltree;
pub mod input_metrics;
pub mod markdown;
pub mod style;
