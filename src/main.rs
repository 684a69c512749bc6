use argus::cli::commands::{CliArgs, Commands};
use argus::cli::handlers::{handle_analyze, handle_config};
use argus::util::logging::{init_logging, resolve_level, LoggingConfig};
use argus::VERSION;

use clap::Parser;
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("argus v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let config_path = args.config.as_deref();
    let exit_code = match &args.command {
        Commands::Analyze(analyze_args) => handle_analyze(analyze_args, config_path).await,
        Commands::Config(config_args) => handle_config(config_args, config_path),
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = resolve_level(args.log_level.as_deref(), args.verbose, args.quiet);
    let use_json = std::env::var(argus::util::logging::LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    init_logging(LoggingConfig {
        level,
        use_json,
        ..Default::default()
    });
}
