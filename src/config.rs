//! Configuration of the databases to backup.
//!
//! The configuration is read from a TOML file and validated eagerly before
//! any backup is attempted.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fmt, io};

use derive_more::{Display, Error, From};

const DEFAULT_BACKUP_DIR: &str = "mysql_dbs_backups";
const DEFAULT_DUMP_COMMAND: &str = "mysqldump";
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 3306;
const DEFAULT_MAX_BACKUPS: usize = 3;
const DEFAULT_DUMP_TIMEOUT_SECS: u64 = 60 * 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Configuration of a whole backup run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BackupConfig {
    /// Directory the backup artifacts are stored in.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Name or path of the dump utility.
    ///
    /// The utility is expected to accept the arguments of `mysqldump`.
    #[serde(default = "default_dump_command")]
    pub dump_command: String,

    /// Upper bound on the runtime of a single database dump.
    #[serde(default = "default_dump_timeout_secs")]
    pub dump_timeout_secs: u64,

    /// Upper bound on establishing the connection of the connectivity probe.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Skip the dump of a database whose connectivity probe failed.
    ///
    /// By default the dump is still attempted, so a unreachable database
    /// reports two failures: one of the probe and one of the dump.
    #[serde(default)]
    pub skip_on_probe_failure: bool,

    /// Databases to backup in the order they are processed.
    #[serde(default, rename = "database")]
    pub databases: Vec<DatabaseTarget>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
            dump_command: default_dump_command(),
            dump_timeout_secs: default_dump_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            skip_on_probe_failure: false,
            databases: Vec::new(),
        }
    }
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BACKUP_DIR)
}

fn default_dump_command() -> String {
    DEFAULT_DUMP_COMMAND.to_string()
}

fn default_dump_timeout_secs() -> u64 {
    DEFAULT_DUMP_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// A single database to backup.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct DatabaseTarget {
    /// Name of the database. Also identifies its artifacts.
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum number of artifacts to keep of this database.
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

// keep the password out of the logs
impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseTarget")
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"***")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("max_backups", &self.max_backups)
            .finish()
    }
}

impl DatabaseTarget {
    /// Creates a target on `localhost` with the default retention.
    pub fn new(name: &str, user: &str, password: &str) -> Self {
        Self {
            name: name.to_string(),
            user: user.to_string(),
            password: password.to_string(),
            host: default_host(),
            port: default_port(),
            max_backups: default_max_backups(),
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_backups() -> usize {
    DEFAULT_MAX_BACKUPS
}

#[derive(Debug, Display, Error, From)]
/// Errors on loading the [BackupConfig].
pub enum ConfigError {
    /// The configuration file can't be read.
    #[display("Reading the config file failed: {_0}")]
    #[from]
    Read(io::Error),
    /// The configuration file is no valid TOML or misses required keys.
    #[display("Parsing the config file failed: {_0}")]
    #[from]
    Parse(toml::de::Error),
    /// Database entry without a name.
    #[display("Database entry #{_0} has no name")]
    MissingName(#[error(ignore)] usize),
    /// Database name that can't be part of a file name.
    #[display("Database name is not usable in a file name: {_0:?}")]
    InvalidName(#[error(ignore)] String),
    /// Database configured more than once.
    #[display("Database is configured more than once: {_0}")]
    DuplicateName(#[error(ignore)] String),
    /// Database entry without a user.
    #[display("Database {_0} has no user")]
    MissingUser(#[error(ignore)] String),
    /// Retention limit of zero, which would delete the fresh backup.
    #[display("Database {_0} must keep at least one backup")]
    ZeroRetention(#[error(ignore)] String),
    /// Dump command is empty.
    #[display("No dump command configured")]
    MissingDumpCommand,
}

impl BackupConfig {
    /// Reads and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path)?;
        config_str.parse()
    }

    /// Checks every database entry, failing on the first malformed one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dump_command.trim().is_empty() {
            return Err(ConfigError::MissingDumpCommand);
        }

        let mut names = HashSet::new();
        for (index, target) in self.databases.iter().enumerate() {
            let name = target.name.as_str();
            if name.trim().is_empty() {
                return Err(ConfigError::MissingName(index + 1));
            }
            if !is_valid_name(name) {
                return Err(ConfigError::InvalidName(name.to_string()));
            }
            if target.user.trim().is_empty() {
                return Err(ConfigError::MissingUser(name.to_string()));
            }
            if target.max_backups == 0 {
                return Err(ConfigError::ZeroRetention(name.to_string()));
            }
            if !names.insert(name) {
                return Err(ConfigError::DuplicateName(name.to_string()));
            }
        }

        Ok(())
    }

    pub fn dump_timeout(&self) -> Duration {
        Duration::from_secs(self.dump_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl std::str::FromStr for BackupConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;

        Ok(config)
    }
}

/// Database names end up in artifact file names, so path separators, control
/// characters and leading dots are rejected.
fn is_valid_name(name: &str) -> bool {
    !name.starts_with('.')
        && !name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control() || c.is_whitespace())
}
