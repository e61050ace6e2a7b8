use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

/// Format of the written backups, shown below the options.
const ARTIFACT_HELP: &str = "\
Backups are written as <YYYYmmddHHMMSS>_<database>.sql.gz with the timestamp in UTC.
They are gzip files holding the plain SQL dump, not zip archives, so `unzip` can't
open them. Restore with: gunzip -c <backup>.sql.gz | mysql <database>";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None, after_help = ARTIFACT_HELP)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Configuration file listing the databases to backup.
    ///
    /// A default configuration is written if the file doesn't exist.
    #[arg(
        long,
        short = 'c',
        env = "MYSQL_BACKUP_CONFIG",
        default_value = "mysql_dbs_backup.toml"
    )]
    pub config: PathBuf,

    /// Operational log the log lines and outcome records are appended to.
    ///
    /// Defaults to stderr for log lines and stdout for outcome records.
    #[arg(long, env = "MYSQL_BACKUP_LOG")]
    pub log_file: Option<PathBuf>,

    /// Folder for the database backups. Overrides the configuration.
    #[arg(long, short = 'r')]
    pub backup_dir: Option<PathBuf>,

    /// Simulative backup run.
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn help_names_the_backup_format() {
        let help = Cli::command().render_help().to_string();
        assert!(help.contains("<YYYYmmddHHMMSS>_<database>.sql.gz"));
        assert!(help.contains("gunzip -c"));
        assert!(help.contains("not zip archives"));
    }

    #[test]
    fn parse_arguments() {
        let cli = Cli::try_parse_from([
            "mysql_backup",
            "--config",
            "/etc/mysql_backup.toml",
            "--verbose",
            "debug",
            "-r",
            "/srv/backups",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/mysql_backup.toml"));
        assert_eq!(cli.verbose, Some(LevelFilter::Debug));
        assert_eq!(cli.backup_dir, Some(PathBuf::from("/srv/backups")));
        assert!(cli.dry_run);
    }
}
