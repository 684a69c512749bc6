use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Sandboxed multi-phase security analysis for smart contract projects
#[derive(Parser, Debug)]
#[command(
    name = "argus",
    about = "Sandboxed multi-phase security analysis for smart contract projects",
    version,
    author,
    long_about = "argus discovers the Solidity contracts of a project, runs semantic analysis \
                  through a reasoning service, drives Slither and Mythril inside network-isolated \
                  containers and writes a findings document plus a markdown report."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,

    #[arg(
        short = 'c',
        long,
        global = true,
        value_name = "FILE",
        help = "Configuration file (defaults to argus.json or argus.config.json in the working directory)"
    )]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Run the full analysis of a project",
        long_about = "Runs discovery, semantic analysis, sandboxed static analysis, endpoint \
                      extraction, test generation and reporting on a project directory.\n\n\
                      Examples:\n  \
                      argus analyze ./my-protocol\n  \
                      argus -v analyze ./my-protocol\n  \
                      argus --config audit.json analyze ./my-protocol --format json"
    )]
    Analyze(AnalyzeArgs),

    #[command(
        about = "Print the effective configuration",
        long_about = "Prints the effective configuration with defaults applied, or a single \
                      value addressed by a dotted path.\n\n\
                      Examples:\n  \
                      argus config\n  \
                      argus config --key server.tools.slither.docker.image"
    )]
    Config(ConfigArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct AnalyzeArgs {
    #[arg(value_name = "PROJECT_PATH", help = "Path to the project to analyze")]
    pub project_path: PathBuf,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Format of the session summary printed on stdout"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(
        short = 'k',
        long,
        value_name = "DOTTED.PATH",
        help = "Print one value, e.g. orchestrator.max_concurrency"
    )]
    pub key: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}
