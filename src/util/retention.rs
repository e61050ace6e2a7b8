//! Count based retention of backup artifacts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::backup::artifact::ArtifactName;

/// Result of a retention pass over the artifacts of one database.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Artifacts still present, oldest first.
    pub kept: Vec<PathBuf>,
    /// Artifacts deleted (or to be deleted on a dry-run).
    pub removed: Vec<PathBuf>,
    /// Artifacts whose deletion failed.
    pub failed: Vec<PathBuf>,
}

/// Keeps the newest `max_backups` artifacts of `database` in `backup_dir`.
///
/// Only entries parsing as artifacts of exactly `database` are considered, so
/// `shop` never touches artifacts of `shop_archive`. Artifacts are ordered by
/// modification time. Entries that aren't regular files still count towards
/// the limit, their deletion fails. A failing deletion is logged and the
/// remaining candidates are still processed.
///
/// # Dry Run
///
/// On a dry run (`dry_run=true`) nothing is deleted, the artifacts that would
/// be deleted are reported as `removed`.
pub fn prune(
    backup_dir: &Path,
    database: &str,
    max_backups: usize,
    dry_run: bool,
) -> io::Result<PruneReport> {
    let mut artifacts = artifacts_of(backup_dir, database)?;
    artifacts.sort();

    let mut report = PruneReport::default();
    if artifacts.len() <= max_backups {
        log::info!(target: "retention", "No old backups of {database} to delete ({} of {max_backups} kept)", artifacts.len());
        report.kept = artifacts.into_iter().map(|(_, path)| path).collect();
        return Ok(report);
    }

    let surplus = artifacts.len() - max_backups;
    let kept = artifacts.split_off(surplus);
    for (_, path) in artifacts {
        if dry_run {
            log::info!(target: "retention", "Would delete old backup: {}", path.display());
            report.removed.push(path);
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                log::info!(target: "retention", "Deleted old backup: {}", path.display());
                report.removed.push(path);
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                log::error!(target: "retention", "Permission denied: Cannot delete {}. Check file permissions.", path.display());
                report.failed.push(path);
            }
            Err(e) => {
                log::error!(target: "retention", "Error deleting old backup {}: {e}", path.display());
                report.failed.push(path);
            }
        }
    }
    report.kept = kept.into_iter().map(|(_, path)| path).collect();

    Ok(report)
}

/// Artifacts of `database` along with their modification time.
///
/// The file name is part of the key, so artifacts with equal modification
/// time are ordered by their creation timestamp.
fn artifacts_of(
    backup_dir: &Path,
    database: &str,
) -> io::Result<Vec<((SystemTime, String), PathBuf)>> {
    let mut artifacts = Vec::new();

    for entry in fs::read_dir(backup_dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let is_artifact =
            ArtifactName::parse(file_name).is_some_and(|name| name.database() == database);
        if !is_artifact {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            // removed concurrently
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        let modified = metadata.modified()?;

        artifacts.push(((modified, file_name.to_string()), entry.path()));
    }

    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::Duration;

    use super::*;

    /// Creates `file_name` in `dir` modified `age_secs` seconds before now.
    fn artifact(dir: &Path, file_name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(file_name);
        let file = File::create(&path).unwrap();
        let modified = SystemTime::now() - Duration::from_secs(age_secs);
        file.set_modified(modified).unwrap();
        path
    }

    #[test]
    fn keeps_the_newest() {
        let dir = tempfile::tempdir().unwrap();
        // mtime and name order disagree on purpose
        let oldest = artifact(dir.path(), "20240105000000_x.sql.gz", 500);
        let old = artifact(dir.path(), "20240104000000_x.sql.gz", 400);
        let middle = artifact(dir.path(), "20240103000000_x.sql.gz", 300);
        let new = artifact(dir.path(), "20240102000000_x.sql.gz", 200);
        let newest = artifact(dir.path(), "20240101000000_x.sql.gz", 100);

        let report = prune(dir.path(), "x", 3, false).unwrap();

        assert_eq!(report.removed, vec![oldest.clone(), old.clone()]);
        assert_eq!(report.kept, vec![middle.clone(), new.clone(), newest.clone()]);
        assert!(report.failed.is_empty());
        assert!(!oldest.exists() && !old.exists());
        assert!(middle.exists() && new.exists() && newest.exists());
    }

    #[test]
    fn nothing_to_delete_within_limit() {
        let dir = tempfile::tempdir().unwrap();
        let a = artifact(dir.path(), "20240101000000_x.sql.gz", 20);
        let b = artifact(dir.path(), "20240102000000_x.sql.gz", 10);

        let report = prune(dir.path(), "x", 2, false).unwrap();

        assert!(report.removed.is_empty());
        assert_eq!(report.kept, vec![a.clone(), b.clone()]);
        assert!(a.exists() && b.exists());
    }

    #[test]
    fn exact_database_match() {
        let dir = tempfile::tempdir().unwrap();
        let shop = artifact(dir.path(), "20240101000000_shop.sql.gz", 30);
        let shop_archive = artifact(dir.path(), "20240101000000_shop_archive.sql.gz", 40);
        let myshop = artifact(dir.path(), "20240101000000_myshop.sql.gz", 50);
        let unrelated = artifact(dir.path(), "shop.sql.gz", 60);
        let raw = artifact(dir.path(), "20240101000000_shop.sql", 70);

        let report = prune(dir.path(), "shop", 1, false).unwrap();

        assert!(report.removed.is_empty());
        assert_eq!(report.kept, vec![shop.clone()]);
        for path in [shop, shop_archive, myshop, unrelated, raw] {
            assert!(path.exists(), "{} should be kept", path.display());
        }
    }

    #[test]
    fn dry_run_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = artifact(dir.path(), "20240101000000_x.sql.gz", 20);
        let new = artifact(dir.path(), "20240102000000_x.sql.gz", 10);

        let report = prune(dir.path(), "x", 1, true).unwrap();

        assert_eq!(report.removed, vec![old.clone()]);
        assert_eq!(report.kept, vec![new]);
        assert!(old.exists());
    }

    #[cfg(unix)]
    #[test]
    fn failed_deletion_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        // a directory in place of the oldest artifact can't be removed as a file
        let stuck = dir.path().join("20240101000000_x.sql.gz");
        fs::create_dir(&stuck).unwrap();
        File::open(&stuck)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(300))
            .unwrap();
        let old = artifact(dir.path(), "20240102000000_x.sql.gz", 200);
        let new = artifact(dir.path(), "20240103000000_x.sql.gz", 100);

        let report = prune(dir.path(), "x", 1, false).unwrap();

        assert_eq!(report.failed, vec![stuck.clone()]);
        assert_eq!(report.removed, vec![old.clone()]);
        assert_eq!(report.kept, vec![new.clone()]);
        assert!(stuck.is_dir() && !old.exists() && new.exists());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(prune(&dir.path().join("missing"), "x", 3, false).is_err());
    }
}
