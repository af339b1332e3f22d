use std::path::PathBuf;
use std::str::FromStr;

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::errors::PipelineError;
use crate::event::DmlKind;
use crate::position::BinlogPosition;

/// Where the event stream comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Binlog files on local disk.
    File,
    /// Pull the stream from a live primary as a replica.
    Repl,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(Mode::File),
            "repl" => Ok(Mode::Repl),
            other => Err(format!("unknown mode {:?}, valid args are: file, repl", other)),
        }
    }
}

/// Which artifact the run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkType {
    /// Forward SQL reproducing the logged changes.
    TwoSql,
    /// Rollback SQL undoing the logged changes.
    Rollback,
    /// Per-table, per-time-bucket DML statistics only.
    Stats,
}

impl FromStr for WorkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2sql" => Ok(WorkType::TwoSql),
            "rollback" => Ok(WorkType::Rollback),
            "stats" => Ok(WorkType::Stats),
            other => Err(format!(
                "unknown work type {:?}, valid args are: 2sql, rollback, stats",
                other
            )),
        }
    }
}

/// Run configuration. Built once at startup (from flags, in the binary) and
/// read-only afterwards; `validate` derives the composite positions the
/// filters use.
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub work_type: WorkType,

    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub server_id: u32,
    pub mysql_type: String,

    pub binlog_dir: PathBuf,
    pub start_file: Option<String>,
    pub start_pos: Option<u32>,
    pub stop_file: Option<String>,
    pub stop_pos: Option<u32>,
    pub start_datetime: Option<u32>,
    pub stop_datetime: Option<u32>,

    pub databases: Vec<String>,
    pub tables: Vec<String>,
    pub ignore_databases: Vec<String>,
    pub ignore_tables: Vec<String>,
    /// Allowed DML subset; empty means all of insert/update/delete.
    pub sql: Vec<DmlKind>,

    pub threads: usize,
    pub rows_per_insert: usize,
    pub full_image: bool,
    pub ignore_primary_on_insert: bool,
    pub prefix_db: bool,
    pub extra_info: bool,
    pub stats_interval: u32,

    pub output_dir: PathBuf,
    pub output_to_screen: bool,

    /// Derived by `validate`: the inclusive start of the translated range.
    pub start_position: Option<BinlogPosition>,
    /// Derived by `validate`: the exclusive stop of the translated range.
    pub stop_position: Option<BinlogPosition>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: Mode::File,
            work_type: WorkType::TwoSql,
            host: "127.0.0.1".to_owned(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            server_id: 1113306,
            mysql_type: "mysql".to_owned(),
            binlog_dir: PathBuf::from("."),
            start_file: None,
            start_pos: None,
            stop_file: None,
            stop_pos: None,
            start_datetime: None,
            stop_datetime: None,
            databases: Vec::new(),
            tables: Vec::new(),
            ignore_databases: Vec::new(),
            ignore_tables: Vec::new(),
            sql: Vec::new(),
            threads: 2,
            rows_per_insert: 20,
            full_image: false,
            ignore_primary_on_insert: false,
            prefix_db: true,
            extra_info: false,
            stats_interval: 60,
            output_dir: PathBuf::from("."),
            output_to_screen: false,
            start_position: None,
            stop_position: None,
        }
    }
}

impl Config {
    /// Check cross-field consistency and derive the composite range
    /// positions. Must run once before the pipeline starts.
    pub fn validate(&mut self) -> Result<(), PipelineError> {
        let start_file = match &self.start_file {
            Some(f) if !f.is_empty() => f.clone(),
            _ => {
                return Err(PipelineError::Config(
                    "start_file is required".to_owned(),
                ))
            }
        };
        if self.threads == 0 {
            return Err(PipelineError::Config("threads must be at least 1".to_owned()));
        }
        if self.rows_per_insert == 0 {
            return Err(PipelineError::Config(
                "rows_per_insert must be at least 1".to_owned(),
            ));
        }
        if self.stats_interval == 0 {
            return Err(PipelineError::Config(
                "stats_interval must be at least 1 second".to_owned(),
            ));
        }
        if self.sql.contains(&DmlKind::Query) {
            return Err(PipelineError::Config(
                "sql filter accepts only insert, update, delete".to_owned(),
            ));
        }
        if self.mysql_type != "mysql" && self.mysql_type != "mariadb" {
            return Err(PipelineError::Config(format!(
                "unknown mysql_type {:?}, valid args are: mysql, mariadb",
                self.mysql_type
            )));
        }
        if let (Some(start), Some(stop)) = (self.start_datetime, self.stop_datetime) {
            if stop <= start {
                return Err(PipelineError::Config(
                    "stop_datetime must be after start_datetime".to_owned(),
                ));
            }
        }

        self.start_position = Some(BinlogPosition::new(
            start_file.clone(),
            self.start_pos.unwrap_or(4),
        ));
        self.stop_position = if self.stop_file.is_some() || self.stop_pos.is_some() {
            Some(BinlogPosition::new(
                self.stop_file.clone().unwrap_or(start_file),
                self.stop_pos.unwrap_or(u32::MAX),
            ))
        } else {
            None
        };
        Ok(())
    }

    /// Whether the DML-kind filter admits `kind`. An empty filter admits
    /// everything.
    pub fn is_target_dml(&self, kind: DmlKind) -> bool {
        self.sql.is_empty() || self.sql.contains(&kind)
    }
}

/// Parse a `YYYY-MM-DD HH:MM:SS` flag value into local-time epoch seconds.
pub fn parse_datetime_flag(s: &str) -> Result<u32, PipelineError> {
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| PipelineError::Config(format!("bad datetime {:?}: {}", s, e)))?;
    let local = Local
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| PipelineError::Config(format!("ambiguous local datetime {:?}", s)))?;
    Ok(local.timestamp() as u32)
}

/// Split a comma-separated flag value, dropping empty items.
pub fn comma_separated_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| item.to_owned())
        .collect()
}
