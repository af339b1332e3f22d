use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use mysql_async::binlog::events::{Event, EventData as StreamEventData, TableMapEvent};
use mysql_async::binlog::jsonb::{self, JsonbToJsonError};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::binlog::EventType;
use mysql_async::{BinlogStream, BinlogStreamRequest, Conn, OptsBuilder, Value};
use tokio::time::timeout;
use tracing::info;

use crate::column_types::{ColumnSpec, ColumnType};
use crate::config::Config;
use crate::dispatch::{Admit, Dispatcher, Flow};
use crate::errors::{EventParseError, PipelineError};
use crate::event::{DmlKind, EventData, EventHeader, RowChange, TypeCode};
use crate::value::MySQLValue;

/// How long a file-bound run waits for the primary to produce another event
/// before calling the stream drained. Screen-bound runs tail forever.
const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Run an operation against every row-event variant of a `RowsEventData`.
macro_rules! rows_event_apply {
    (
        $event_data:expr,
        event.$($op:tt)*
    ) => {{
        use mysql_async::binlog::events::RowsEventData::*;
        match $event_data {
            WriteRowsEvent(event) => event.$($op)*,
            UpdateRowsEvent(event) => event.$($op)*,
            DeleteRowsEvent(event) => event.$($op)*,
            WriteRowsEventV1(event) => event.$($op)*,
            UpdateRowsEventV1(event) => event.$($op)*,
            DeleteRowsEventV1(event) => event.$($op)*,
            _ => unreachable!(),
        }
    }};
}

/// Pull the binlog from a live primary: register as a replica under the
/// configured server id and request the stream from the configured start
/// position. The driver decodes the wire format into typed events; those
/// are re-expressed in the translator's own event model so both reader
/// variants share one dispatch and synthesis path.
pub async fn run(cfg: Arc<Config>, mut dispatcher: Dispatcher) -> Result<(), PipelineError> {
    info!("start to get binlog from mysql");
    let start = cfg
        .start_position
        .clone()
        .ok_or_else(|| PipelineError::Config("start position not derived".to_owned()))?;

    let opts = OptsBuilder::default()
        .ip_or_hostname(cfg.host.clone())
        .tcp_port(cfg.port)
        .user(Some(cfg.user.clone()))
        .pass(Some(cfg.password.clone()))
        .prefer_socket(false);
    let conn = Conn::new(opts)
        .await
        .map_err(PipelineError::Replication)?;
    let request = BinlogStreamRequest::new(cfg.server_id)
        .with_filename(start.name.as_bytes())
        .with_pos(u64::from(start.pos));
    let mut stream = conn
        .get_binlog_stream(request)
        .await
        .map_err(PipelineError::Replication)?;

    loop {
        let item = if cfg.output_to_screen {
            stream.next().await
        } else {
            match timeout(EVENT_TIMEOUT, stream.next()).await {
                Ok(item) => item,
                Err(_) => {
                    info!("deadline exceeded waiting for binlog event, ending stream");
                    break;
                }
            }
        };
        let event = match item {
            Some(ev) => ev.map_err(PipelineError::Replication)?,
            None => {
                info!("binlog stream closed by server");
                break;
            }
        };

        let event_type = match event.header().event_type() {
            Ok(event_type) => event_type,
            // types this server knows but we do not are never translated
            Err(_) => continue,
        };
        let header = EventHeader {
            timestamp: event.header().timestamp(),
            type_code: TypeCode::from_byte(event_type as u8),
            server_id: event.header().server_id(),
            event_size: event.header().event_size(),
            log_pos: event.header().log_pos(),
            flags: event.header().flags().bits(),
        };
        match dispatcher.admit(&header) {
            Admit::Stop => break,
            Admit::Skip => continue,
            Admit::Decode => {}
        }
        let data = decode_stream_event(&event, event_type, &stream)?;
        match dispatcher.apply(&header, data).await? {
            Flow::Stop => break,
            Flow::Continue => {}
        }
    }
    info!("finish getting binlog from mysql");
    Ok(())
}

/// Decode one stream event through the driver's typed reader and convert
/// it into the translator's event model. Types with no counterpart map to
/// `None`.
fn decode_stream_event(
    event: &Event,
    event_type: EventType,
    stream: &BinlogStream,
) -> Result<Option<EventData>, PipelineError> {
    match event_type {
        EventType::ROTATE_EVENT
        | EventType::QUERY_EVENT
        | EventType::XID_EVENT
        | EventType::TABLE_MAP_EVENT
        | EventType::WRITE_ROWS_EVENT
        | EventType::WRITE_ROWS_EVENT_V1
        | EventType::UPDATE_ROWS_EVENT
        | EventType::UPDATE_ROWS_EVENT_V1
        | EventType::DELETE_ROWS_EVENT
        | EventType::DELETE_ROWS_EVENT_V1 => {}
        _ => return Ok(None),
    }
    let data = match event.read_data().map_err(EventParseError::from)? {
        Some(data) => data,
        None => return Ok(None),
    };
    Ok(match data {
        StreamEventData::RotateEvent(ev) => Some(EventData::Rotate {
            position: ev.position(),
            next_log_name: String::from_utf8_lossy(ev.name_raw()).into_owned(),
        }),
        StreamEventData::QueryEvent(ev) => Some(EventData::Query {
            schema: ev.schema().into_owned(),
            query: ev.query().into_owned(),
        }),
        StreamEventData::XidEvent(ev) => Some(EventData::Xid { xid: ev.xid }),
        StreamEventData::TableMapEvent(tme) => Some(EventData::TableMap {
            table_id: tme.table_id(),
            schema_name: tme.database_name().into_owned(),
            table_name: tme.table_name().into_owned(),
            columns: column_specs(&tme)?,
        }),
        StreamEventData::RowsEvent(rows) => convert_rows_event(&rows, stream)?,
        _ => None,
    })
}

/// Rebuild the raw `(type byte, meta)` column vector from a typed table
/// map event, so envelopes look the same in both reader modes.
fn column_specs(tme: &TableMapEvent<'_>) -> Result<Vec<ColumnSpec>, PipelineError> {
    let mut specs = Vec::new();
    let mut idx = 0;
    loop {
        let col = tme.get_column_type(idx).map_err(|e| {
            EventParseError::UnsupportedStreamValue(format!("column type: {:?}", e))
        })?;
        let col = match col {
            Some(col) => col,
            None => break,
        };
        let meta = tme.get_column_metadata(idx).unwrap_or(&[]);
        let spec = ColumnSpec::read_meta(col as u8, &mut Cursor::new(meta))
            .map_err(EventParseError::from)?;
        specs.push(spec);
        idx += 1;
    }
    Ok(specs)
}

fn convert_rows_event(
    rows: &mysql_async::binlog::events::RowsEventData<'_>,
    stream: &BinlogStream,
) -> Result<Option<EventData>, PipelineError> {
    use mysql_async::binlog::events::RowsEventData::*;
    let kind = match rows {
        WriteRowsEvent(_) | WriteRowsEventV1(_) => DmlKind::Insert,
        UpdateRowsEvent(_) | UpdateRowsEventV1(_) => DmlKind::Update,
        DeleteRowsEvent(_) | DeleteRowsEventV1(_) => DmlKind::Delete,
        _ => return Ok(None),
    };
    let table_id = rows_event_apply!(rows, event.table_id());
    let tme = stream
        .get_tme(table_id)
        .ok_or(EventParseError::MissingTableMap(table_id))?;
    let columns = column_specs(tme)?;

    let mut images = Vec::new();
    for row in rows_event_apply!(rows, event.rows(tme)) {
        let (before, after) = row.map_err(EventParseError::from)?;
        match kind {
            DmlKind::Insert => {
                images.push(convert_row(require_image(after, kind)?, &columns)?);
            }
            DmlKind::Delete => {
                images.push(convert_row(require_image(before, kind)?, &columns)?);
            }
            DmlKind::Update => {
                images.push(convert_row(require_image(before, kind)?, &columns)?);
                images.push(convert_row(require_image(after, kind)?, &columns)?);
            }
            DmlKind::Query => unreachable!(),
        }
    }
    Ok(Some(EventData::Rows {
        kind,
        change: RowChange {
            schema_name: tme.database_name().into_owned(),
            table_name: tme.table_name().into_owned(),
            columns,
            rows: images,
        },
    }))
}

fn require_image(image: Option<BinlogRow>, kind: DmlKind) -> Result<BinlogRow, EventParseError> {
    image.ok_or_else(|| {
        EventParseError::UnsupportedStreamValue(format!("missing row image in {} event", kind))
    })
}

fn convert_row(
    row: BinlogRow,
    columns: &[ColumnSpec],
) -> Result<Vec<MySQLValue>, EventParseError> {
    (0..row.len())
        .map(|idx| {
            let spec = columns
                .get(idx)
                .copied()
                // absent metadata decodes like the file path's unknown slot
                .unwrap_or_else(|| ColumnSpec::new(6, 0));
            match row.as_ref(idx) {
                None => Ok(MySQLValue::Null),
                Some(BinlogValue::Value(val)) => convert_plain_value(val, spec),
                Some(BinlogValue::Jsonb(val)) => convert_jsonb(val),
                Some(other) => Err(EventParseError::UnsupportedStreamValue(format!(
                    "{:?}",
                    other
                ))),
            }
        })
        .collect()
}

fn convert_plain_value(val: &Value, spec: ColumnSpec) -> Result<MySQLValue, EventParseError> {
    let col = ColumnType::from_spec(spec).map_err(EventParseError::from)?;
    Ok(match val {
        Value::NULL => MySQLValue::Null,
        Value::Int(i) => MySQLValue::SignedInteger(*i),
        Value::UInt(u) => MySQLValue::SignedInteger(*u as i64),
        Value::Float(f) => MySQLValue::Float(*f),
        Value::Double(d) => MySQLValue::Double(*d),
        Value::Date(year, month, day, hour, minute, second, micro) => match col {
            ColumnType::Date | ColumnType::NewDate => MySQLValue::Date {
                year: u32::from(*year),
                month: u32::from(*month),
                day: u32::from(*day),
            },
            _ => MySQLValue::DateTime {
                year: u32::from(*year),
                month: u32::from(*month),
                day: u32::from(*day),
                hour: u32::from(*hour),
                minute: u32::from(*minute),
                second: u32::from(*second),
                subsecond: *micro,
            },
        },
        Value::Time(_negative, days, hours, minutes, seconds, micro) => MySQLValue::Time {
            hours: days * 24 + u32::from(*hours),
            minutes: u32::from(*minutes),
            seconds: u32::from(*seconds),
            subseconds: *micro,
        },
        Value::Bytes(bytes) => convert_bytes_value(bytes, &col)?,
    })
}

/// The driver hands several types over as byte strings; the wire type from
/// the table map decides how they re-enter the value model.
fn convert_bytes_value(bytes: &[u8], col: &ColumnType) -> Result<MySQLValue, EventParseError> {
    Ok(match col {
        // encoded as seconds since the epoch, with an optional fractional
        // part when the column has sub-second precision
        ColumnType::Timestamp | ColumnType::Timestamp2(_) => {
            let text = String::from_utf8_lossy(bytes).into_owned();
            let (secs, micros) = match text.split_once('.') {
                Some((secs, frac)) => (secs.to_owned(), frac.to_owned()),
                None => (text, "0".to_owned()),
            };
            let unix_time = secs.parse::<i32>().map_err(|_| {
                EventParseError::UnsupportedStreamValue(format!("timestamp {:?}", secs))
            })?;
            let subsecond = micros.parse::<u32>().map_err(|_| {
                EventParseError::UnsupportedStreamValue(format!("timestamp fraction {:?}", micros))
            })?;
            MySQLValue::Timestamp {
                unix_time,
                subsecond,
            }
        }
        // decimal digits arrive pre-rendered
        ColumnType::Decimal | ColumnType::NewDecimal(..) => {
            let text = String::from_utf8_lossy(bytes);
            MySQLValue::Decimal(text.parse().map_err(|_| {
                EventParseError::UnsupportedStreamValue(format!("decimal {:?}", text))
            })?)
        }
        ColumnType::Bit(_) => {
            let mut val = 0u64;
            for byte in bytes {
                val = (val << 8) | u64::from(*byte);
            }
            MySQLValue::SignedInteger(val as i64)
        }
        ColumnType::Blob(_)
        | ColumnType::TinyBlob
        | ColumnType::MediumBlob
        | ColumnType::LongBlob
        | ColumnType::Geometry(_)
        | ColumnType::Null => MySQLValue::Blob(bytes.to_vec().into()),
        _ => MySQLValue::String(String::from_utf8_lossy(bytes).into_owned()),
    })
}

fn convert_jsonb(val: &jsonb::Value<'_>) -> Result<MySQLValue, EventParseError> {
    let json: Result<serde_json::Value, JsonbToJsonError> = val.clone().try_into();
    match json {
        Ok(json) => Ok(MySQLValue::Json(json)),
        Err(JsonbToJsonError::Opaque) => match val {
            jsonb::Value::Opaque(opaque) => Ok(MySQLValue::Json(serde_json::Value::String(
                String::from_utf8_lossy(opaque.data_raw().as_ref()).into_owned(),
            ))),
            _ => Err(EventParseError::UnsupportedStreamValue(
                "opaque json value of unexpected shape".to_owned(),
            )),
        },
        Err(e) => Err(EventParseError::UnsupportedStreamValue(e.to_string())),
    }
}
