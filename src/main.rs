// Entrypoint for the CLI application.
// - Parses arguments, sets up logging and the Ctrl-C cancellation token.
// - Exits with status 1 if the command failed or any file failed to upload.

use clap::{CommandFactory, FromArgMatches};
use linear_cli::{exit_status, run, CancelToken, Cli, Config};
use tracing_subscriber::EnvFilter;

fn main() {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    init_tracing(&cli);

    // Ctrl-C stops the batch between files, between retries, or mid-transfer.
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_token.cancel()) {
        tracing::warn!(error = %e, "could not install Ctrl-C handler");
    }

    let config = Config::from_env();
    let outcome = run(cli, &matches, &config, cancel);
    if let Err(e) = &outcome {
        eprintln!("Error: {:#}", e);
    }
    std::process::exit(exit_status(&outcome));
}

/// Logs go to stderr so `--json` output on stdout stays parseable.
/// `RUST_LOG` takes precedence over the verbosity flags.
fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
