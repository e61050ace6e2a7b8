use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use mysql_backup_lib::backup::{FatalError, Interrupt, MySqlProbe, Runner};
use mysql_backup_lib::cli::Cli;
use mysql_backup_lib::config::BackupConfig;
use mysql_backup_lib::status::StatusReporter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // outcome records go to the same operational log as the log lines
    let status_sink: Box<dyn Write> = match &cli.log_file {
        Some(log_file) => match open_log(log_file) {
            Ok(file) => Box::new(file),
            Err(e) => {
                eprintln!("Opening log file {} failed: {e}", log_file.display());
                return ExitCode::FAILURE;
            }
        },
        None => Box::new(io::stdout()),
    };

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    } else {
        env_logger.filter_level(log::LevelFilter::Info);
        env_logger.parse_default_env();
    }
    if let Some(log_file) = &cli.log_file {
        match open_log(log_file) {
            Ok(file) => {
                env_logger.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("Opening log file {} failed: {e}", log_file.display());
                return ExitCode::FAILURE;
            }
        }
    }
    if let Err(e) = env_logger.try_init() {
        eprintln!("Initializing the logger failed: {e}");
    }

    let mut config = match load_config(&cli.config) {
        Some(config) => config,
        None => return ExitCode::FAILURE,
    };
    if let Some(backup_dir) = cli.backup_dir {
        config.backup_dir = backup_dir;
    }

    if cli.dry_run {
        log::warn!("Running in dry-run mode");
    }

    let probe = match MySqlProbe::new(config.connect_timeout()) {
        Ok(probe) => probe,
        Err(e) => {
            log::error!("Setting up the connectivity probe failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let interrupt = Interrupt::new();
    if let Err(e) = interrupt.listen() {
        log::warn!("Installing the signal handlers failed, interrupts won't clean up: {e}");
    }

    let mut reporter = StatusReporter::new(status_sink);
    let mut runner = Runner::new(config, probe)
        .dry_run(cli.dry_run)
        .interruptible(interrupt);
    match runner.run(&mut reporter) {
        Ok(summary) => {
            if !summary.failed.is_empty() {
                log::warn!("Backup of {} database(s) failed: {}", summary.failed.len(), summary.failed.join(", "));
            }
            ExitCode::SUCCESS
        }
        Err(FatalError::Interrupted) => {
            log::error!("Backup run interrupted");
            ExitCode::from(130)
        }
        Err(e) => {
            log::error!("Backup run aborted: {e}");
            ExitCode::FAILURE
        }
    }
}

fn open_log(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Loads the configuration, writing a default one if there is none yet.
fn load_config(path: &Path) -> Option<BackupConfig> {
    if std::fs::exists(path).is_ok_and(|b| !b) {
        log::debug!(
            "Writing default config to {} because it doesn't exist yet",
            path.display()
        );
        let default_config = BackupConfig::default();
        match toml::to_string_pretty(&default_config) {
            Ok(config_str) => {
                if let Err(e) = std::fs::write(path, config_str) {
                    log::warn!("Writing default config to {} failed {e}", path.display());
                }
            }
            Err(e) => log::warn!("Serializing the default config failed: {e}"),
        }
        log::warn!("No databases configured yet, add them to {}", path.display());

        return Some(default_config);
    }

    match BackupConfig::load(path) {
        Ok(config) => Some(config),
        Err(e) => {
            log::error!("{e}");
            None
        }
    }
}
