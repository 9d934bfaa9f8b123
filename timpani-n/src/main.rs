use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use timpani_n::config::{self, Cli};
use timpani_n::proxy::ProxyScheduler;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let config = config::load(&cli).context("failed to assemble run configuration")?;

    let stdout = std::io::stdout();
    let scheduler = ProxyScheduler::new(config.algorithm, config.runtime, &config.tasks, stdout)
        .context("failed to initialize scheduler resources")?;
    scheduler.run();

    Ok(())
}

fn init_tracing(cli: &Cli) {
    if cli.quiet {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
