//! Connectivity checks run before a database is dumped.

use std::io;
use std::time::Duration;

use derive_more::{Display, Error};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError};
use sqlx::Connection;
use tokio::runtime::{Builder, Runtime};

use crate::config::DatabaseTarget;

/// Access denied for user.
const ER_ACCESS_DENIED_ERROR: u16 = 1045;
/// Access denied for user to database.
const ER_DBACCESS_DENIED_ERROR: u16 = 1044;
/// Unknown database.
const ER_BAD_DB_ERROR: u16 = 1049;
/// Can't connect to local server through socket.
const CR_CONNECTION_ERROR: u16 = 2002;
/// Can't connect to server.
const CR_CONN_HOST_ERROR: u16 = 2003;
/// Unknown server host.
const CR_UNKNOWN_HOST: u16 = 2005;

/// Classified failure of a connectivity probe.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[display("{_0} (Check your username and password)")]
    Authentication(#[error(ignore)] String),
    #[display("{_0} (Database does not exist)")]
    UnknownDatabase(#[error(ignore)] String),
    #[display("{_0} (Cannot connect to the database server)")]
    Unreachable(#[error(ignore)] String),
    #[display("{_0}")]
    Other(#[error(ignore)] String),
}

impl ProbeError {
    /// Classifies a MySQL error by its error number.
    pub fn from_error_number(number: u16, message: String) -> Self {
        match number {
            ER_ACCESS_DENIED_ERROR | ER_DBACCESS_DENIED_ERROR => Self::Authentication(message),
            ER_BAD_DB_ERROR => Self::UnknownDatabase(message),
            CR_CONNECTION_ERROR | CR_CONN_HOST_ERROR | CR_UNKNOWN_HOST => {
                Self::Unreachable(message)
            }
            _ => Self::Other(message),
        }
    }
}

impl From<sqlx::Error> for ProbeError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let message = db_err.to_string();
                match db_err.try_downcast_ref::<MySqlDatabaseError>() {
                    Some(mysql_err) => Self::from_error_number(mysql_err.number(), message),
                    None => Self::Other(message),
                }
            }
            sqlx::Error::Io(e) => Self::Unreachable(e.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

/// Checks whether a database accepts connections with the configured
/// credentials.
pub trait Probe {
    fn probe(&self, target: &DatabaseTarget) -> Result<(), ProbeError>;
}

impl<P: Probe + ?Sized> Probe for &P {
    fn probe(&self, target: &DatabaseTarget) -> Result<(), ProbeError> {
        (**self).probe(target)
    }
}

/// [Probe] opening and immediately closing a MySQL connection.
#[derive(Debug)]
pub struct MySqlProbe {
    runtime: Runtime,
    connect_timeout: Duration,
}

impl MySqlProbe {
    pub fn new(connect_timeout: Duration) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;

        Ok(Self {
            runtime,
            connect_timeout,
        })
    }
}

impl Probe for MySqlProbe {
    fn probe(&self, target: &DatabaseTarget) -> Result<(), ProbeError> {
        let options = MySqlConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .username(&target.user)
            .password(&target.password)
            .database(&target.name);

        self.runtime.block_on(async {
            let connect = MySqlConnection::connect_with(&options);
            let connection = tokio::time::timeout(self.connect_timeout, connect)
                .await
                .map_err(|_| {
                    ProbeError::Unreachable(format!(
                        "no connection within {}s",
                        self.connect_timeout.as_secs()
                    ))
                })??;

            connection.close().await?;
            Ok::<_, ProbeError>(())
        })?;

        log::info!(target: "backup::probe", "Successfully connected to the database '{}' on host '{}'.", target.name, target.host);
        Ok(())
    }
}
