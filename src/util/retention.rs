//! Caps the number of backup sets kept in a directory.
//!
//! Retention works on files rather than sets: a set is assumed to consist of
//! [ARTIFACTS_PER_SET] files, the oldest files by modification time go first.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use derive_more::{Display, Error};

/// Files making up one backup set.
pub const ARTIFACTS_PER_SET: usize = 3;

/// Deleting a file during pruning failed.
#[derive(Debug, Display, Error)]
#[display("Unable to delete {}: {source}", path.display())]
pub struct DeleteFailure {
    pub path: PathBuf,
    pub source: io::Error,
}

/// Result of a pruning pass.
#[derive(Debug, Default)]
pub struct PruneReport {
    /// Files deleted, oldest first. On a dry run the files that would have been.
    pub deleted: Vec<PathBuf>,
    /// Files that should have been deleted but couldn't.
    pub failures: Vec<DeleteFailure>,
    /// Files left in the directory, including those failing to delete.
    ///
    /// On a dry run the files that would have been left.
    pub kept: usize,
}

impl PruneReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Deletes the oldest files in `dir` exceeding `max_sets` backup sets.
///
/// Pruning is best effort: a failing deletion is recorded and the remaining
/// files are still deleted. On a dry run nothing is deleted but the report
/// lists the files that would have been.
pub fn prune(dir: &Path, max_sets: usize, dry_run: bool) -> io::Result<PruneReport> {
    if dry_run {
        prune_with(dir, max_sets, |path| {
            log::info!(target: "retention", "Would delete {}", path.display());
            Ok(())
        })
    } else {
        prune_with(dir, max_sets, |path| fs::remove_file(path))
    }
}

/// [prune] with a custom way to delete a file.
pub fn prune_with(
    dir: &Path,
    max_sets: usize,
    mut delete: impl FnMut(&Path) -> io::Result<()>,
) -> io::Result<PruneReport> {
    let files = oldest_first(dir)?;
    let keep = max_sets.saturating_mul(ARTIFACTS_PER_SET);
    let excess = files.len().saturating_sub(keep);
    log::debug!(
        target: "retention",
        "{} file(s) in {}, keeping {keep}",
        files.len(),
        dir.display()
    );

    let total = files.len();
    let mut report = PruneReport::default();
    for path in files.into_iter().take(excess) {
        match delete(&path) {
            Ok(()) => {
                log::debug!(target: "retention", "Deleted {}", path.display());
                report.deleted.push(path);
            }
            Err(source) => {
                let failure = DeleteFailure { path, source };
                log::warn!(target: "retention", "{failure}");
                report.failures.push(failure);
            }
        }
    }

    report.kept = total - report.deleted.len();

    if excess > 0 {
        log::info!(
            target: "retention",
            "Pruned {} of {excess} file(s) exceeding {max_sets} backup set(s)",
            report.deleted.len()
        );
    }

    Ok(report)
}

/// Regular files directly in `dir`, sorted by modification time and name.
///
/// A missing directory contains no files.
fn oldest_first(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            // vanished since listing
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            log::trace!(target: "retention", "Ignoring non-file {}", path.display());
            continue;
        }

        files.push((metadata.modified()?, path));
    }
    files.sort();

    Ok(files.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::{Duration, UNIX_EPOCH};

    use tempfile::TempDir;

    use super::*;

    /// Creates `name` with a modification time of `age` seconds after the epoch.
    fn touch(dir: &Path, name: &str, age: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(UNIX_EPOCH + Duration::from_secs(1_700_000_000 + age))
            .unwrap();
        path
    }

    fn remaining(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }

    /// Four sets with 3 files each, set 0 is the oldest.
    fn four_sets(dir: &Path) {
        for set in 0..4 {
            for (offset, artifact) in ["database.sql.gz", "files.tar", "private-files.tar"]
                .into_iter()
                .enumerate()
            {
                touch(dir, &format!("{set}-{artifact}"), set * 3600 + offset as u64);
            }
        }
    }

    #[test]
    fn deletes_oldest_set() {
        let dir = TempDir::new().unwrap();
        four_sets(dir.path());

        let report = prune(dir.path(), 3, false).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.kept, 9);
        assert_eq!(
            report.deleted,
            [
                dir.path().join("0-database.sql.gz"),
                dir.path().join("0-files.tar"),
                dir.path().join("0-private-files.tar"),
            ]
        );
        assert_eq!(remaining(dir.path()).len(), 9);
        assert!(remaining(dir.path()).iter().all(|name| !name.starts_with('0')));
    }

    #[test]
    fn keeps_most_recent_files() {
        let dir = TempDir::new().unwrap();
        four_sets(dir.path());
        // names sort in age order
        let by_age = remaining(dir.path());

        for max_sets in (1..=5).rev() {
            let report = prune(dir.path(), max_sets, false).unwrap();
            let expected = 12.min(max_sets * ARTIFACTS_PER_SET);

            assert_eq!(remaining(dir.path()), by_age[12 - expected..], "max_sets={max_sets}");
            assert_eq!(report.kept, expected);
        }
    }

    #[test]
    fn mtime_beats_name() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a-newest", 300);
        touch(dir.path(), "z-oldest", 100);
        touch(dir.path(), "m-middle", 200);
        touch(dir.path(), "b-tied", 200);

        let report = prune(dir.path(), 1, false).unwrap();
        assert_eq!(report.deleted, [dir.path().join("z-oldest")]);
        assert_eq!(remaining(dir.path()), ["a-newest", "b-tied", "m-middle"]);
    }

    #[test]
    fn ties_break_by_name() {
        let dir = TempDir::new().unwrap();
        for name in ["d", "c", "b", "a"] {
            touch(dir.path(), name, 0);
        }

        let report = prune(dir.path(), 1, false).unwrap();
        assert_eq!(report.deleted, [dir.path().join("a")]);
    }

    #[test]
    fn under_cap_is_noop() {
        let dir = TempDir::new().unwrap();
        four_sets(dir.path());

        let report = prune(dir.path(), 4, false).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.kept, 12);
        assert_eq!(remaining(dir.path()).len(), 12);
    }

    #[test]
    fn ignores_directories() {
        let dir = TempDir::new().unwrap();
        four_sets(dir.path());
        fs::create_dir(dir.path().join("0-older-dir")).unwrap();

        let report = prune(dir.path(), 3, false).unwrap();
        assert_eq!(report.deleted.len(), 3);
        assert!(dir.path().join("0-older-dir").is_dir());
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let report = prune(&dir.path().join("live_backup"), 1, false).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.kept, 0);
    }

    #[test]
    fn failed_delete_continues() {
        let dir = TempDir::new().unwrap();
        four_sets(dir.path());
        let stuck = dir.path().join("0-files.tar");

        let report = prune_with(dir.path(), 2, |path| {
            if path == stuck {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "stuck"))
            } else {
                fs::remove_file(path)
            }
        })
        .unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, stuck);
        assert_eq!(report.deleted.len(), 5);
        assert_eq!(report.kept, 7);
        assert_eq!(remaining(dir.path()).len(), 7);
        assert!(stuck.exists());
    }

    #[test]
    fn already_removed_is_reported() {
        let dir = TempDir::new().unwrap();
        four_sets(dir.path());

        let report = prune_with(dir.path(), 3, |path| {
            fs::remove_file(path)?;
            // a second deletion of the same file fails with NotFound
            fs::remove_file(path)
        })
        .unwrap();
        assert_eq!(report.failures.len(), 3);
        assert!(report
            .failures
            .iter()
            .all(|failure| failure.source.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn failing_deletes_are_kept() {
        let dir = TempDir::new().unwrap();
        for (age, name) in ["a", "b", "c", "d", "e", "f"].into_iter().enumerate() {
            touch(dir.path(), name, age as u64);
        }

        let report = prune_with(dir.path(), 1, |_| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        })
        .unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(report.failures.len(), 3);
        assert_eq!(report.kept, 6);
        assert_eq!(remaining(dir.path()).len(), report.kept);
    }

    #[test]
    fn dry_run_deletes_nothing() {
        let dir = TempDir::new().unwrap();
        four_sets(dir.path());

        let report = prune(dir.path(), 1, true).unwrap();
        assert_eq!(report.deleted.len(), 9);
        assert_eq!(report.kept, 3);
        assert_eq!(remaining(dir.path()).len(), 12);
    }
}
