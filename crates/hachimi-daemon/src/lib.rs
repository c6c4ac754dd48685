//! Hachimi CLI library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations and the JSON-line request server

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    execute, execute_at, init_logging, load_settings, open_engine, parse_observations, run, serve,
};
