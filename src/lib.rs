pub mod ai;
pub mod cache;
pub mod cli;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod exit;
pub mod rules;
pub mod synth;
pub mod ui;
