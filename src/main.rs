mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use recovery_installer::install::{ConsoleUi, HeadlessUi, RecoveryUi};
use recovery_installer::{InstallConfig, InstallOutcome, InstallRequest, PackageInstaller};

fn main() {
    // Initialize logger with the same format the recovery log collector expects
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    match real_main() {
        Ok(outcome) => {
            if outcome.wipe_cache {
                println!("installer requested a cache wipe");
            }
            std::process::exit(outcome.result.exit_code());
        }
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    }
}

fn real_main() -> Result<InstallOutcome> {
    let args = cli::Args::parse();
    let config = InstallConfig::load(args.config.as_deref()).context("Failed to load config")?;

    let request = InstallRequest {
        package: args.package,
        install_log: args.install_log,
        needs_mount: !args.no_mount,
    };

    let mut ui: Box<dyn RecoveryUi> = if args.headless {
        Box::new(HeadlessUi::new())
    } else {
        Box::new(ConsoleUi::new().context("Failed to start the console UI")?)
    };

    let outcome = PackageInstaller::new(config, ui.as_mut()).install_package(&request);
    info!(
        "result {} (wipe_cache={}, modified_storage={})",
        outcome.result, outcome.wipe_cache, outcome.modified_storage
    );
    Ok(outcome)
}
