//! Naming of backup artifacts.
//!
//! Artifacts are named `<timestamp>_<database>.sql.gz` with a second precision
//! timestamp in the form `YYYYmmddHHMMSS`, so names of one database sort by
//! creation time.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{NaiveDateTime, Timelike};
use regex::Regex;

/// Timestamp pattern of artifact names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
/// Extension of the raw dump.
pub const DUMP_EXT: &str = "sql";
/// Extension of the compressed archive.
pub const ARCHIVE_EXT: &str = "gz";

static ARTIFACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?<timestamp>\d{14})_(?<database>.+)\.sql\.gz$")
        .expect("artifact pattern should be a valid regex")
});

/// Name of a backup artifact of a single database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactName {
    timestamp: NaiveDateTime,
    database: String,
}

impl ArtifactName {
    /// Create the artifact name of a backup of `database` created at `timestamp`.
    ///
    /// Sub-second precision of `timestamp` is dropped. Two backups of the same
    /// database in the same second share their name.
    pub fn new(database: &str, timestamp: NaiveDateTime) -> Self {
        let timestamp = timestamp.with_nanosecond(0).unwrap_or(timestamp);

        Self {
            timestamp,
            database: database.to_string(),
        }
    }

    /// Parses an artifact file name.
    ///
    /// Returns [None] if `file_name` doesn't follow the artifact naming scheme.
    pub fn parse(file_name: &str) -> Option<Self> {
        let captures = ARTIFACT_RE.captures(file_name)?;
        let timestamp =
            NaiveDateTime::parse_from_str(&captures["timestamp"], TIMESTAMP_FORMAT).ok()?;

        Some(Self {
            timestamp,
            database: captures["database"].to_string(),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn timestamp(&self) -> &NaiveDateTime {
        &self.timestamp
    }

    /// File name of the compressed artifact.
    pub fn file_name(&self) -> String {
        format!("{}.{ARCHIVE_EXT}", self.dump_file_name())
    }

    /// File name of the raw dump, i.e. the artifact without archive extension.
    pub fn dump_file_name(&self) -> String {
        format!(
            "{}_{}.{DUMP_EXT}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.database
        )
    }

    /// Full path of the artifact inside of `backup_dir`.
    pub fn artifact_path(&self, backup_dir: &Path) -> PathBuf {
        backup_dir.join(self.file_name())
    }

    /// Full path of the raw dump inside of `backup_dir`.
    pub fn dump_path(&self, backup_dir: &Path) -> PathBuf {
        backup_dir.join(self.dump_file_name())
    }
}
