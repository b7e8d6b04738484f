//! One invocation of the backup download: check, fetch, prune, persist, re-arm.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use derive_more::{Display, Error, From};
use serde_json::{json, Value};

use crate::fetch::{BackupSet, FetchError, Fetcher, Transport};
use crate::schedule::{self, Rearm};
use crate::settings::{ConfigError, SettingsStore};
use crate::util::retention::{self, PruneReport};

/// Directory below the site path the backup sets are stored in.
pub const LIVE_BACKUP_DIR: &str = "live_backup";

/// Errors ending an invocation early.
#[derive(Debug, Display, Error, From)]
pub enum RunError {
    #[display("{_0}")]
    Config(ConfigError),
    #[display("{_0}")]
    Fetch(FetchError),
}

/// A fetched backup set and what happened afterwards.
#[derive(Debug)]
pub struct Success {
    pub set: BackupSet,
    /// [None] if the backup directory couldn't be listed.
    pub pruned: Option<PruneReport>,
    /// If the new last backup time was stored.
    pub persisted: bool,
}

#[derive(Debug)]
pub enum Outcome {
    /// No backup due until `next_due`.
    Skipped { next_due: Option<NaiveDateTime> },
    Succeeded(Success),
    Failed(RunError),
}

impl Outcome {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Succeeded(_) => "success",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Result of [AutoDownload::run_once].
#[derive(Debug)]
pub struct Invocation {
    pub started: NaiveDateTime,
    pub outcome: Outcome,
    /// When the next check was re-armed for.
    ///
    /// [None] if the settings couldn't be loaded, the next external trigger retries.
    pub next_check: Option<NaiveDateTime>,
}

impl Invocation {
    /// Status object of the invocation, e.g. for the job runner's log.
    pub fn to_json(&self) -> Value {
        let mut status = json!({
            "status": self.outcome.status(),
            "started": self.started.to_string(),
            "next_check": self.next_check.map(|at| at.to_string()),
        });

        match &self.outcome {
            Outcome::Skipped { next_due } => {
                status["message"] = "Backup not due yet".into();
                status["next_due"] = next_due.map(|due| due.to_string()).into();
            }
            Outcome::Succeeded(Success {
                set,
                pruned,
                persisted,
            }) => {
                status["message"] = "Backup and files received successfully".into();
                status["files"] = set
                    .artifacts
                    .iter()
                    .map(|artifact| {
                        json!({
                            "kind": artifact.kind.key(),
                            "path": artifact.path.display().to_string(),
                            "size": artifact.size,
                            "status": artifact.status.to_string(),
                        })
                    })
                    .collect();
                status["persisted"] = (*persisted).into();
                if let Some(pruned) = pruned {
                    status["pruned"] = pruned
                        .deleted
                        .iter()
                        .map(|path| path.display().to_string())
                        .collect();
                    status["prune_failures"] = pruned
                        .failures
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                }
            }
            Outcome::Failed(e) => {
                status["message"] = e.to_string().into();
            }
        }

        status
    }
}

/// Downloads backup sets of a site into its [LIVE_BACKUP_DIR].
#[derive(Debug)]
pub struct AutoDownload<T> {
    fetcher: Fetcher<T>,
    dry_run: bool,
}

impl<T: Transport> AutoDownload<T> {
    pub fn new(transport: T, site_path: &Path) -> Self {
        Self::with_backup_dir(transport, site_path.join(LIVE_BACKUP_DIR))
    }

    pub fn with_backup_dir(transport: T, backup_dir: PathBuf) -> Self {
        Self {
            fetcher: Fetcher::new(transport, backup_dir),
            dry_run: false,
        }
    }

    /// On a dry run nothing is written, deleted or stored.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.fetcher = self.fetcher.dry_run(dry_run);
        self.dry_run = dry_run;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        self.fetcher.backup_dir()
    }

    /// Runs one invocation at `now`.
    ///
    /// Never fails: errors end up in the [Outcome]. The next check is re-armed
    /// one hour after `now` regardless of the outcome, unless the settings
    /// couldn't be loaded.
    pub fn run_once(
        &self,
        store: &mut impl SettingsStore,
        rearm: &mut impl Rearm,
        now: NaiveDateTime,
    ) -> Invocation {
        let outcome = self.attempt(store, now);
        match &outcome {
            Outcome::Failed(e) => {
                log::error!(target: "orchestrator", "Backup download failed: {e}")
            }
            outcome => {
                log::debug!(target: "orchestrator", "Invocation finished: {}", outcome.status())
            }
        }

        let next_check = match &outcome {
            Outcome::Failed(RunError::Config(_)) => {
                log::warn!(
                    target: "orchestrator",
                    "Not re-arming, waiting for the next external trigger"
                );
                None
            }
            _ => {
                let next_check = now + schedule::recheck_delay();
                rearm.rearm(next_check);
                Some(next_check)
            }
        };

        Invocation {
            started: now,
            outcome,
            next_check,
        }
    }

    fn attempt(&self, store: &mut impl SettingsStore, now: NaiveDateTime) -> Outcome {
        let settings = match store.load() {
            Ok(settings) => settings,
            Err(e) => return Outcome::Failed(e.into()),
        };

        let interval = settings.download_interval;
        if !schedule::is_due(settings.last_backup_time, interval, now) {
            let next_due = schedule::next_due(settings.last_backup_time, interval);
            log::info!(
                target: "orchestrator",
                "Backup not due, last backup {}, interval {interval}",
                settings
                    .last_backup_time
                    .map(|last| last.to_string())
                    .unwrap_or_default()
            );
            return Outcome::Skipped { next_due };
        }

        let set = match self.fetcher.fetch(&settings) {
            Ok(set) => set,
            // last backup time stays, so the next check retries
            Err(e) => return Outcome::Failed(e.into()),
        };

        let pruned = match retention::prune(
            self.backup_dir(),
            settings.max_backup_sets,
            self.dry_run,
        ) {
            Ok(report) => Some(report),
            Err(e) => {
                log::warn!(
                    target: "orchestrator",
                    "Unable to apply retention to {}: {e}",
                    self.backup_dir().display()
                );
                None
            }
        };

        let persisted = if self.dry_run {
            log::info!(target: "orchestrator", "Not storing last backup time on dry-run");
            false
        } else {
            match store.store_last_backup_time(now) {
                Ok(()) => true,
                Err(e) => {
                    log::error!(target: "orchestrator", "Storing last backup time failed: {e}");
                    false
                }
            }
        };

        Outcome::Succeeded(Success {
            set,
            pruned,
            persisted,
        })
    }
}
