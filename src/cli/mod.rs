//! Command-line interface.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, WaitArgs};
pub use output::OutputFormatter;
