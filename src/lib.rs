pub mod aggregate;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod exit;
pub mod ledger;
pub mod render;
pub mod report;
pub mod ui;
pub mod xml;
