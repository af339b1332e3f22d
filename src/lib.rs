//! Streaming translator from the MySQL row-based binary log to SQL.
//!
//! Given a binlog range — read from files on disk or pulled from a live
//! primary as a replica — this crate produces one of three artifacts:
//!
//! - **forward SQL**: `INSERT`/`UPDATE`/`DELETE` statements reproducing the
//!   logged row changes;
//! - **rollback SQL**: inverse statements that undo them (flashback);
//! - **statistics**: per-table, per-time-bucket DML counters.
//!
//! # Limitations
//!
//! - Only row-based events are translated; query events merely bracket
//!   transactions, and DDL is counted in statistics but never replayed.
//! - Column names and keys come from the *current* primary via
//!   `SHOW COLUMNS`/`SHOW INDEX`, so DDL that happened inside the
//!   translated range can skew the generated SQL.
//! - Like most 5.6/5.7-era consumers, `UNSIGNED BIGINT` travels through an
//!   `i64` internally; generation undoes the wrap-around using the live
//!   schema's unsigned flag.
//!
//! # Example
//!
//! ```no_run
//! use binflash::{pipeline, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), binflash::PipelineError> {
//!     let cfg = Config {
//!         start_file: Some("mysql-bin.000001".to_owned()),
//!         ..Config::default()
//!     };
//!     pipeline::run(cfg).await
//! }
//! ```

pub mod binlog_file;
mod bit_set;
pub mod column_types;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod event;
pub mod filter;
mod jsonb;
mod packet_helpers;
pub mod pipeline;
pub mod position;
pub mod repl;
pub mod schema;
pub mod sink;
pub mod sqlgen;
pub mod stats;
pub mod table_map;
pub mod value;

pub use config::{Config, Mode, WorkType};
pub use errors::PipelineError;
pub use event::{BinEvent, DmlKind, TrxStatus};
pub use position::BinlogPosition;
