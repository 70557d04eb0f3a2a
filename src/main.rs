// src/main.rs

use clap::Parser;

use dagrun::cli::CliArgs;
use dagrun::logging::init_logging;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    if let Err(e) = init_logging(args.log_level) {
        eprintln!("failed to initialise logging: {e}");
        std::process::exit(1);
    }

    match dagrun::run(args).await {
        Ok(exit) => std::process::exit(exit.code()),
        Err(e) => {
            tracing::error!(error = %e, "dagrun failed");
            std::process::exit(1);
        }
    }
}
