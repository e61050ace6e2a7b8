//! Machine readable outcome records.
//!
//! Every outcome of a backup run is written as a single line:
//!
//! ```text
//! FINAL_STATUS | SUCCESS | 2024-03-09 07:05:03 | 20240309070503_shop.sql.gz | Backup successful: ...
//! ```
//!
//! Monitoring greps for these lines, so the marker, the field order and the
//! delimiter must stay stable.

use std::io::Write;

use chrono::{Local, NaiveDateTime};
use derive_more::Display;

/// Marker starting every outcome line.
pub const STATUS_MARKER: &str = "FINAL_STATUS";
/// Delimiter between the fields of an outcome line.
pub const FIELD_DELIMITER: &str = " | ";
/// Placeholder for records without artifact.
pub const NO_ARTIFACT: &str = "N/A";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum Status {
    #[display("SUCCESS")]
    Success,
    #[display("FAILURE")]
    Failure,
}

/// Outcome of a single step of the backup of a database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub status: Status,
    pub timestamp: NaiveDateTime,
    /// File name of the artifact concerned, if there is one.
    pub artifact: Option<String>,
    pub message: String,
}

impl OutcomeRecord {
    /// Renders the record as outcome line, without line terminator.
    pub fn to_line(&self) -> String {
        let timestamp = self.timestamp.format(TIMESTAMP_FORMAT).to_string();
        let artifact = self.artifact.as_deref().unwrap_or(NO_ARTIFACT);
        let status = self.status.to_string();
        // messages may carry multi-line stderr output
        let message = self.message.trim().replace(['\r', '\n'], " ");

        [STATUS_MARKER, &status, &timestamp, artifact, &message].join(FIELD_DELIMITER)
    }
}

/// Writes [OutcomeRecord]s to a sink, usually the operational log.
///
/// All records written are kept, so the caller can inspect the outcome of a
/// run afterwards.
#[derive(Debug)]
pub struct StatusReporter<W: Write> {
    sink: W,
    records: Vec<OutcomeRecord>,
}

impl<W: Write> StatusReporter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            records: Vec::new(),
        }
    }

    /// Reports a successful step.
    pub fn success(&mut self, artifact: Option<&str>, message: impl Into<String>) {
        self.report(Status::Success, artifact, message.into());
    }

    /// Reports a failed step.
    pub fn failure(&mut self, artifact: Option<&str>, message: impl Into<String>) {
        self.report(Status::Failure, artifact, message.into());
    }

    fn report(&mut self, status: Status, artifact: Option<&str>, message: String) {
        let record = OutcomeRecord {
            status,
            timestamp: Local::now().naive_local(),
            artifact: artifact.map(str::to_string),
            message,
        };
        let line = record.to_line();

        // a lost status line is no reason to abort the backups
        if let Err(e) = writeln!(self.sink, "{line}").and_then(|()| self.sink.flush()) {
            log::error!(target: "status", "Writing outcome record failed: {e}");
        }

        self.records.push(record);
    }

    /// Records written so far, oldest first.
    pub fn records(&self) -> &[OutcomeRecord] {
        &self.records
    }

    pub fn into_sink(self) -> W {
        self.sink
    }
}
