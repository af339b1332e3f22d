use std::io;

use thiserror::Error;

use crate::column_types::ColumnType;

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("column parse error: {0}")]
    ColumnParseError(#[from] ColumnParseError),
    #[error("unexpected EOF")]
    EofError,
    #[error("impossible event size {0}, must exceed the 19-byte header")]
    ImpossibleEventSize(u32),
    #[error("row event for table id {0} with no preceding table map event")]
    MissingTableMap(u64),
    #[error("unsupported value in replica stream: {0}")]
    UnsupportedStreamValue(String),
    #[error("I/O error reading event")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum JsonbParseError {
    #[error("invalid type byte {0}")]
    InvalidTypeByte(u8),
    #[error("invalid literal byte {0}")]
    InvalidLiteral(u16),
    #[error("error parsing opaque column in json record: {inner:?}")]
    OpaqueColumnParseError { inner: Box<ColumnParseError> },
    #[error("I/O error parsing json record")]
    Io(#[from] io::Error),
}

impl From<ColumnParseError> for JsonbParseError {
    fn from(e: ColumnParseError) -> Self {
        JsonbParseError::OpaqueColumnParseError { inner: Box::new(e) }
    }
}

#[derive(Debug, Error)]
pub enum ColumnParseError {
    #[error("unknown column type byte {0}")]
    UnknownTypeByte(u8),
    #[error("unimplemented column type: {column_type:?}")]
    UnimplementedTypeError { column_type: ColumnType },
    #[error("row bitmask inconsistent with the table map column list")]
    BitmaskMismatch,
    #[error("error parsing JSON column")]
    JsonError(#[from] JsonbParseError),
    #[error("error parsing DECIMAL column")]
    DecimalError(#[from] DecimalParseError),
    #[error("I/O error reading column")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum DecimalParseError {
    #[error("I/O error reading decimal")]
    Io(#[from] io::Error),
    #[error("malformed decimal digits")]
    Digits(#[from] bigdecimal::ParseBigDecimalError),
}

#[derive(Debug, Error)]
pub enum BinlogParseError {
    #[error("error parsing event")]
    EventParseError(#[from] EventParseError),
    #[error("bad magic value {0:x?} at start of binlog")]
    BadMagic([u8; 4]),
    #[error("bad first record in binlog")]
    BadFirstRecord,
    #[error("could not open binlog file")]
    OpenError(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("empty schema or table name")]
    EmptyName,
    #[error("could not connect to mysql for schema queries")]
    Connect(#[source] mysql_async::Error),
    #[error("schema query `{query}` failed")]
    Query {
        query: String,
        #[source]
        source: mysql_async::Error,
    },
    #[error("table struct not found for {0}, maybe it was dropped")]
    TableNotFound(String),
}

/// Top-level error for a translation run. Any of these is fatal: the queues
/// close, every stage drains and exits, and the process reports a single
/// diagnostic line.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Binlog(#[from] BinlogParseError),
    #[error(transparent)]
    Event(#[from] EventParseError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("replication stream error")]
    Replication(#[source] mysql_async::Error),
    #[error("could not write output")]
    Output(#[source] io::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("pipeline task failed")]
    Join(#[from] tokio::task::JoinError),
}
