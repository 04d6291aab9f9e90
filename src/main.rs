use clap::Parser;
use gallery_sync::cli::{run, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load environment
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // RUST_LOG wins over --log-level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("CLI application startup: tracing initialised, environment loaded");

    let code = match run(cli).await {
        Ok(outcome) => {
            tracing::info!(?outcome, "CLI completed successfully");
            outcome.exit_code()
        }
        Err(e) => {
            tracing::error!(code = e.code, error = %e, "CLI exited with error");
            e.code
        }
    };
    std::process::exit(code);
}
