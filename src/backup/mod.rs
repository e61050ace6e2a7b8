//! The per-database backup pipeline.
//!
//! A [Runner] processes the configured databases strictly one after another:
//!
//! 1. [Probe] the connectivity of the database.
//! 2. Dump it with the [DumpTool] into a raw dump named after an [ArtifactName].
//! 3. Compress the raw dump into the artifact, see [`archive`].
//! 4. Write the outcome with the [StatusReporter].
//! 5. Prune the oldest artifacts beyond the retention limit, see [`prune`].
//!
//! Failures of a single database are reported and the next database is
//! processed. [FatalError]s abort the whole run, as does a triggered
//! [Interrupt].
//!
//! Artifact names carry UTC timestamps, local time repeats an hour when
//! daylight saving time ends.

pub mod archive;
pub mod artifact;
pub mod dump;
pub mod interrupt;
pub mod probe;

use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{NaiveDateTime, Utc};
use derive_more::{Display, Error, From};

pub use artifact::ArtifactName;
pub use dump::{DumpError, DumpTool};
pub use interrupt::Interrupt;
pub use probe::{MySqlProbe, Probe, ProbeError};

use crate::config::{BackupConfig, DatabaseTarget};
use crate::status::StatusReporter;
use crate::util::retention::prune;

#[derive(Debug, Display, Error)]
/// Errors aborting the whole backup run.
pub enum FatalError {
    /// The backup directory can't be created.
    #[display("Error setting up directory {}: {source}", path.display())]
    BackupDir { path: PathBuf, source: io::Error },
    /// The dump utility is missing or broken.
    #[display("{_0}")]
    DumpToolUnavailable(DumpError),
    /// The backup directory isn't writable.
    #[display("{_0}")]
    PermissionDenied(DumpError),
    /// Unexpected I/O error while dumping.
    #[display("{_0}")]
    Io(DumpError),
    /// SIGINT or SIGTERM was received.
    #[display("Backup run interrupted")]
    Interrupted,
}

#[derive(Debug, Display, Error, From)]
/// Errors skipping the current database only.
pub enum DatabaseError {
    /// The dump utility failed or timed out.
    #[display("{_0}")]
    Dump(DumpError),
    /// Compressing the dump failed.
    #[display("Compressing the dump failed: {_0}")]
    Archive(io::Error),
}

/// Failure of a pipeline step, tagged by its consequence for the run.
#[derive(Debug, Display, Error, From)]
pub enum BackupError {
    #[display("{_0}")]
    Fatal(FatalError),
    #[display("{_0}")]
    Database(DatabaseError),
}

impl From<DumpError> for BackupError {
    fn from(err: DumpError) -> Self {
        match err {
            DumpError::ToolUnavailable { .. } => Self::Fatal(FatalError::DumpToolUnavailable(err)),
            DumpError::PermissionDenied(_) => Self::Fatal(FatalError::PermissionDenied(err)),
            DumpError::Io(_) => Self::Fatal(FatalError::Io(err)),
            DumpError::Interrupted => Self::Fatal(FatalError::Interrupted),
            DumpError::Execution { .. } | DumpError::TimedOut(_) => {
                Self::Database(DatabaseError::Dump(err))
            }
        }
    }
}

/// Progress of a [Runner].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum RunState {
    #[display("idle")]
    Idle,
    #[display("backup directory ready")]
    DirectoryReady,
    #[display("dump tool verified")]
    ToolVerified,
    /// Processing the database with the given position in the configuration.
    #[display("processing database #{_0}")]
    PerDatabase(usize),
    #[display("done")]
    Done,
    #[display("aborted")]
    FatalAbort,
}

/// Outcome of a complete run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Databases backed up successfully.
    pub succeeded: Vec<String>,
    /// Databases with at least one failed step.
    pub failed: Vec<String>,
}

/// Backs up all databases of a [BackupConfig].
pub struct Runner<P> {
    config: BackupConfig,
    probe: P,
    dry_run: bool,
    interrupt: Interrupt,
    clock: fn() -> NaiveDateTime,
    state: RunState,
}

fn utc_now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

impl<P: Probe> Runner<P> {
    pub fn new(config: BackupConfig, probe: P) -> Self {
        Self {
            config,
            probe,
            dry_run: false,
            interrupt: Interrupt::new(),
            clock: utc_now,
            state: RunState::Idle,
        }
    }

    /// Stops the run once `interrupt` is triggered.
    pub fn interruptible(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Source of the artifact timestamps, the current UTC time by default.
    pub fn clock(mut self, clock: fn() -> NaiveDateTime) -> Self {
        self.clock = clock;
        self
    }

    /// On a dry run the dumps are discarded and no files are altered.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, state: RunState) {
        log::debug!(target: "backup", "{} -> {state}", self.state);
        self.state = state;
    }

    /// Backs up every configured database.
    ///
    /// Returns an error only on fatal conditions, after writing a final
    /// failure record.
    pub fn run<W: Write>(
        &mut self,
        reporter: &mut StatusReporter<W>,
    ) -> Result<RunSummary, FatalError> {
        log::info!(target: "backup", "Backup run started");
        self.transition(RunState::Idle);

        if let Err(e) = self.prepare_backup_dir() {
            return Err(self.abort(reporter, None, e));
        }
        self.transition(RunState::DirectoryReady);

        let tool = match DumpTool::locate(&self.config.dump_command, self.config.dump_timeout()) {
            Ok(tool) => tool.interruptible(self.interrupt.clone()),
            Err(e) => return Err(self.abort(reporter, None, FatalError::DumpToolUnavailable(e))),
        };
        log::debug!(target: "backup", "Dumping with {}", tool.program().display());
        self.transition(RunState::ToolVerified);

        let mut summary = RunSummary::default();
        let databases = self.config.databases.clone();
        for (index, target) in databases.iter().enumerate() {
            if self.interrupt.is_triggered() {
                return Err(self.abort(reporter, None, FatalError::Interrupted));
            }
            self.transition(RunState::PerDatabase(index + 1));

            if self.backup_database(&tool, target, reporter)? {
                summary.succeeded.push(target.name.clone());
            } else {
                summary.failed.push(target.name.clone());
            }
        }

        self.transition(RunState::Done);
        log::info!(
            target: "backup",
            "Backup run finished: {} succeeded, {} failed",
            summary.succeeded.len(),
            summary.failed.len()
        );

        Ok(summary)
    }

    fn prepare_backup_dir(&self) -> Result<(), FatalError> {
        let backup_dir = &self.config.backup_dir;
        if backup_dir.is_relative() {
            log::warn!(target: "backup", "backup_dir is relative: {}", backup_dir.display());
        }
        if backup_dir.is_dir() {
            return Ok(());
        }

        if self.dry_run {
            log::warn!(target: "backup", "Backup directory {} doesn't exist and would be created", backup_dir.display());
            return Ok(());
        }

        std::fs::create_dir_all(backup_dir).map_err(|source| FatalError::BackupDir {
            path: backup_dir.clone(),
            source,
        })?;
        log::info!(target: "backup", "Directory {} created successfully.", backup_dir.display());

        Ok(())
    }

    fn abort<W: Write>(
        &mut self,
        reporter: &mut StatusReporter<W>,
        artifact: Option<&str>,
        err: FatalError,
    ) -> FatalError {
        log::error!(target: "backup", "{err}");
        reporter.failure(artifact, err.to_string());
        self.transition(RunState::FatalAbort);
        err
    }

    /// Runs the pipeline for a single database.
    ///
    /// Returns whether the database was backed up without any failure.
    fn backup_database<W: Write>(
        &mut self,
        tool: &DumpTool,
        target: &DatabaseTarget,
        reporter: &mut StatusReporter<W>,
    ) -> Result<bool, FatalError> {
        let name = &target.name;
        log::info!(target: "backup", "Processing database: {name}");

        let mut succeeded = true;
        if let Err(e) = self.probe.probe(target) {
            let message = format!("Database connection failed for '{name}': {e}");
            log::error!(target: "backup::probe", "{message}");
            reporter.failure(None, message);
            succeeded = false;

            if self.config.skip_on_probe_failure {
                log::warn!(target: "backup", "Skipping backup of {name}");
                return Ok(false);
            }
        }

        let artifact = ArtifactName::new(name, (self.clock)());
        let file_name = artifact.file_name();

        match self.dump_and_compress(tool, target, &artifact) {
            Ok(message) => {
                let file_name = (!self.dry_run).then_some(file_name.as_str());
                reporter.success(file_name, message);
            }
            Err(BackupError::Fatal(e)) => {
                return Err(self.abort(reporter, Some(&file_name), e));
            }
            Err(BackupError::Database(e)) => {
                let message = format!("Backup failed for database '{name}'. Error: {e}");
                log::error!(target: "backup", "{message}");
                reporter.failure(Some(&file_name), message);
                succeeded = false;
            }
        }

        log::info!(target: "backup", "Checking for old backups to delete for database: {name}...");
        let backup_dir = &self.config.backup_dir;
        match prune(backup_dir, name, target.max_backups, self.dry_run) {
            Ok(report) if !report.failed.is_empty() => {
                log::warn!(target: "backup", "{} old backup(s) of {name} could not be deleted", report.failed.len());
            }
            Ok(_) => {}
            Err(e) => log::error!(target: "backup", "Error cleaning old backups of {name}: {e}"),
        }

        Ok(succeeded)
    }

    /// Dumps `target` and compresses the dump into `artifact`.
    ///
    /// Returns the message of the success record.
    fn dump_and_compress(
        &self,
        tool: &DumpTool,
        target: &DatabaseTarget,
        artifact: &ArtifactName,
    ) -> Result<String, BackupError> {
        if self.dry_run {
            tool.dump(target, None)?;
            return Ok(format!(
                "Dry run: dump of database '{}' succeeded, output discarded",
                target.name
            ));
        }

        let backup_dir = &self.config.backup_dir;
        let dump_path = artifact.dump_path(backup_dir);
        tool.dump(target, Some(&dump_path))?;

        let archived = archive::compress(&dump_path, &artifact.artifact_path(backup_dir))
            .map_err(DatabaseError::Archive)?;
        log::info!(target: "backup", "Backup successful: {}", archived.path.display());

        Ok(format!("Backup successful: {}", archived.path.display()))
    }
}
