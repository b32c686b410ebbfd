pub mod app;
pub mod config;
pub mod confirm;
pub mod display;
pub mod edit_diff;
pub mod engine;
pub mod error;
pub mod readline;
pub mod terminal;
pub mod test_support;
pub mod trust;
pub mod ui;
pub mod util;
