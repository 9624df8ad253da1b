use alexandria_lib::cli::{self, Cli};
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    alexandria_lib::init_tracing(cli.log_level());

    tracing::debug!("Starting alexandria");
    cli::run(cli).await
}
