use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Settings file with the remote site and its credentials.
    #[arg(
        long,
        short = 'c',
        env = "AUTO_DOWNLOAD_BACKUP_CONFIG",
        default_value = "auto_download_backup.toml"
    )]
    pub config: PathBuf,

    /// Directory of the site, backups are stored in its `live_backup` folder.
    #[arg(long, short = 's', env = "AUTO_DOWNLOAD_BACKUP_SITE", default_value = ".")]
    pub site_path: PathBuf,

    /// Seconds after which a request to the remote site is aborted.
    #[arg(long, default_value = "60")]
    pub timeout: u64,

    /// Simulative run: download but don't write, delete or store anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the status of every invocation as JSON.
    #[arg(long)]
    pub json: bool,

    #[command(subcommand)]
    pub action: Option<Action>,
}

#[derive(Subcommand, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Download a backup set if one is due. (Default)
    #[default]
    Run,
    /// Keep running and check again one hour after every invocation.
    Watch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_single_run() {
        let cli = Cli::try_parse_from(["auto_download_backup"]).unwrap();
        assert_eq!(cli.action.unwrap_or_default(), Action::Run);
        assert_eq!(cli.timeout, 60);
        assert!(!cli.dry_run);
    }

    #[test]
    fn watch_with_options() {
        let cli = Cli::try_parse_from([
            "auto_download_backup",
            "--site-path",
            "/srv/sites/erp",
            "--verbose",
            "debug",
            "--dry-run",
            "watch",
        ])
        .unwrap();
        assert_eq!(cli.action, Some(Action::Watch));
        assert_eq!(cli.site_path, PathBuf::from("/srv/sites/erp"));
        assert_eq!(cli.verbose, Some(LevelFilter::Debug));
        assert!(cli.dry_run);
    }
}
