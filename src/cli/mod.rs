//! Command line front end

pub mod commands;

pub use commands::{cmd_settings, cmd_start, load_settings, CliResult, Overrides};
