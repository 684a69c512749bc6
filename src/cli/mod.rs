pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{AnalyzeArgs, CliArgs, Commands, ConfigArgs, OutputFormatArg};
pub use output::{OutputFormat, OutputFormatter};
