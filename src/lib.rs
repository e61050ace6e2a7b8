//! Library to backup a set of [MySQL][mysql] (or MariaDB) databases.
//!
//! Every configured database is probed, dumped with `mysqldump`, compressed
//! into a single gzip artifact and finally the oldest artifacts exceeding the
//! retention limit are removed. The pipeline lives in the [`backup`] module,
//! the outcome records consumed by monitoring in [`status`].
//!
//! Artifacts are gzip files named `<YYYYmmddHHMMSS>_<database>.sql.gz`, not
//! zip archives. `gunzip -c` restores the plain SQL dump, `unzip` can't read
//! them.
//!
//! [mysql]: https://www.mysql.com/

#![forbid(unsafe_code)]

pub mod backup;
pub mod cli;
pub mod config;
pub mod status;
pub mod util;
