mod cli;

use anyhow::{Context as _, Result};
use clap::Parser;
use rdmapair::{harness, verbs::Ibverbs};

fn init_env_log(filter_env: &str, default_level: &str) {
    let env = env_logger::Env::new().filter_or(filter_env, default_level);
    env_logger::Builder::from_env(env).init();
}

fn main() -> Result<()> {
    init_env_log("RUST_LOG", "info");

    let config = cli::Cli::parse().into_config()?;
    print!("{}", config);

    let report = harness::run(Ibverbs, &config).context("test failed")?;
    log::info!("test result is 0 ({:?} on {})", report.role, report.device_name);
    Ok(())
}
