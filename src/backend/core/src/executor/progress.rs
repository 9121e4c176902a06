//! Progress estimation from dump tool diagnostics.
//!
//! Dump tools do not report a total, so progress is an estimate: every line
//! that marks the start of a new table bumps the percentage by a fixed step.
//! The value stays below 100 while the tool runs and is forced to 100 once it
//! exits successfully.

use regex::Regex;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Percentage added per recognized table.
pub const PROGRESS_INCREMENT: f64 = 5.0;

/// Ceiling while the tool is still running.
pub const PROGRESS_CAP: f64 = 95.0;

/// Receives `(percent, current_step)` updates. Called from the executor task
/// while the subprocess runs.
#[derive(Clone)]
pub struct ProgressCallback(Arc<dyn Fn(f64, &str) + Send + Sync>);

impl ProgressCallback {
    pub fn new(f: impl Fn(f64, &str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn report(&self, update: &ProgressUpdate) {
        (self.0)(update.percent, &update.step)
    }
}

impl fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressCallback")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub step: String,
}

/// Turns diagnostic lines into progress updates. One implementation per engine.
pub trait ProgressEstimator: Send {
    /// Feed one stderr line. Returns an update when the line advanced progress.
    fn observe(&mut self, line: &str) -> Option<ProgressUpdate>;

    /// Final update after a successful exit.
    fn finish(&mut self) -> ProgressUpdate {
        ProgressUpdate {
            percent: 100.0,
            step: "Completed".to_string(),
        }
    }

    /// Tables seen so far, in order.
    fn tables(&self) -> &[String];
}

/// Shared table-counting logic.
#[derive(Debug, Default)]
struct TableCounter {
    percent: f64,
    tables: Vec<String>,
}

impl TableCounter {
    fn bump(&mut self, table: &str, verb: &str) -> ProgressUpdate {
        self.tables.push(table.to_string());
        self.percent = (self.percent + PROGRESS_INCREMENT).min(PROGRESS_CAP);
        ProgressUpdate {
            percent: self.percent,
            step: format!("{} {}", verb, table),
        }
    }
}

/// "pg_dump: dumping contents of table "public.users""; older releases omit quotes.
static PG_DUMP_TABLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"dumping contents of table "?(?P<table>[^"\s]+)"?"#)
        .expect("Invalid pg_dump progress regex")
});

/// "-- Retrieving table structure for table `users`..."
static MYSQLDUMP_TABLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Retrieving table structure for table `?(?P<table>[^`.\s]+)`?")
        .expect("Invalid mysqldump progress regex")
});

static PG_RESTORE_TABLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"processing data for table "?(?P<table>[^"\s]+)"?"#)
        .expect("Invalid pg_restore progress regex")
});

#[derive(Debug, Default)]
pub struct PgDumpProgress {
    counter: TableCounter,
}

impl PgDumpProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressEstimator for PgDumpProgress {
    fn observe(&mut self, line: &str) -> Option<ProgressUpdate> {
        let caps = PG_DUMP_TABLE_LINE.captures(line)?;
        Some(self.counter.bump(&caps["table"], "Dumping table"))
    }

    fn tables(&self) -> &[String] {
        &self.counter.tables
    }
}

#[derive(Debug, Default)]
pub struct MysqlDumpProgress {
    counter: TableCounter,
}

impl MysqlDumpProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressEstimator for MysqlDumpProgress {
    fn observe(&mut self, line: &str) -> Option<ProgressUpdate> {
        let caps = MYSQLDUMP_TABLE_LINE.captures(line)?;
        Some(self.counter.bump(&caps["table"], "Dumping table"))
    }

    fn tables(&self) -> &[String] {
        &self.counter.tables
    }
}

/// Restore-side estimator for `pg_restore --verbose`.
#[derive(Debug, Default)]
pub struct PgRestoreProgress {
    counter: TableCounter,
}

impl PgRestoreProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressEstimator for PgRestoreProgress {
    fn observe(&mut self, line: &str) -> Option<ProgressUpdate> {
        let caps = PG_RESTORE_TABLE_LINE.captures(line)?;
        Some(self.counter.bump(&caps["table"], "Restoring table"))
    }

    fn tables(&self) -> &[String] {
        &self.counter.tables
    }
}
