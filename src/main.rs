use std::process::ExitCode;
use std::time::Duration;

use auto_download_backup_lib::cli::{Action, Cli};
use auto_download_backup_lib::fetch::HttpTransport;
use auto_download_backup_lib::orchestrator::{AutoDownload, Invocation};
use auto_download_backup_lib::schedule::{recheck_delay, Ticker};
use auto_download_backup_lib::settings::TomlSettingsStore;

use chrono::Local;
use clap::Parser;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    if cli.dry_run {
        log::warn!("Running in dry-run mode");
    }

    let transport = match HttpTransport::new(Duration::from_secs(cli.timeout)) {
        Ok(transport) => transport,
        Err(e) => {
            log::error!("Setting up the HTTP client failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    let auto_download = AutoDownload::new(transport, &cli.site_path).dry_run(cli.dry_run);
    let mut store = TomlSettingsStore::new(cli.config);
    let mut ticker = Ticker::default();

    match cli.action.unwrap_or_default() {
        Action::Run => {
            let invocation =
                auto_download.run_once(&mut store, &mut ticker, Local::now().naive_local());
            report(&invocation, cli.json);

            if invocation.outcome.is_failed() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Action::Watch => loop {
            let invocation =
                auto_download.run_once(&mut store, &mut ticker, Local::now().naive_local());
            report(&invocation, cli.json);
            ticker.wait_or(recheck_delay());
        },
    }
}

fn report(invocation: &Invocation, json: bool) {
    if json {
        println!("{}", invocation.to_json());
    } else {
        match invocation.next_check {
            Some(next_check) => log::info!(
                "Backup download {}, next check at {next_check}",
                invocation.outcome.status()
            ),
            None => log::info!(
                "Backup download {}, no next check armed",
                invocation.outcome.status()
            ),
        }
    }
}
