use std::fmt;
use std::io::{self, Cursor, Read, Seek};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::Serialize;

use crate::bit_set::BitSet;
use crate::column_types::{ColumnSpec, ColumnType};
use crate::errors::{ColumnParseError, EventParseError};
use crate::packet_helpers::*;
use crate::position::BinlogPosition;
use crate::table_map::{SingleTableMap, TableMap};
use crate::value::MySQLValue;

/// Number of bytes in the fixed event header.
pub const EVENT_HEADER_SIZE: u32 = 19;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypeCode {
    Unknown,
    StartEventV3,
    QueryEvent,
    StopEvent,
    RotateEvent,
    IntvarEvent,
    LoadEvent,
    SlaveEvent,
    CreateFileEvent,
    AppendBlockEvent,
    ExecLoadEvent,
    DeleteFileEvent,
    NewLoadEvent,
    RandEvent,
    UserVarEvent,
    FormatDescriptionEvent,
    XidEvent,
    BeginLoadQueryEvent,
    ExecuteLoadQueryEvent,
    TableMapEvent,
    PreGaWriteRowsEvent,
    PreGaUpdateRowsEvent,
    PreGaDeleteRowsEvent,
    WriteRowsEventV1,
    UpdateRowsEventV1,
    DeleteRowsEventV1,
    IncidentEvent,
    HeartbeatLogEvent,
    IgnorableLogEvent,
    RowsQueryLogEvent,
    WriteRowsEventV2,
    UpdateRowsEventV2,
    DeleteRowsEventV2,
    GtidLogEvent,
    AnonymousGtidLogEvent,
    PreviousGtidsLogEvent,
    OtherUnknown(u8),
}

impl TypeCode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => TypeCode::Unknown,
            1 => TypeCode::StartEventV3,
            2 => TypeCode::QueryEvent,
            3 => TypeCode::StopEvent,
            4 => TypeCode::RotateEvent,
            5 => TypeCode::IntvarEvent,
            6 => TypeCode::LoadEvent,
            7 => TypeCode::SlaveEvent,
            8 => TypeCode::CreateFileEvent,
            9 => TypeCode::AppendBlockEvent,
            10 => TypeCode::ExecLoadEvent,
            11 => TypeCode::DeleteFileEvent,
            12 => TypeCode::NewLoadEvent,
            13 => TypeCode::RandEvent,
            14 => TypeCode::UserVarEvent,
            15 => TypeCode::FormatDescriptionEvent,
            16 => TypeCode::XidEvent,
            17 => TypeCode::BeginLoadQueryEvent,
            18 => TypeCode::ExecuteLoadQueryEvent,
            19 => TypeCode::TableMapEvent,
            20 => TypeCode::PreGaWriteRowsEvent,
            21 => TypeCode::PreGaUpdateRowsEvent,
            22 => TypeCode::PreGaDeleteRowsEvent,
            23 => TypeCode::WriteRowsEventV1,
            24 => TypeCode::UpdateRowsEventV1,
            25 => TypeCode::DeleteRowsEventV1,
            26 => TypeCode::IncidentEvent,
            27 => TypeCode::HeartbeatLogEvent,
            28 => TypeCode::IgnorableLogEvent,
            29 => TypeCode::RowsQueryLogEvent,
            30 => TypeCode::WriteRowsEventV2,
            31 => TypeCode::UpdateRowsEventV2,
            32 => TypeCode::DeleteRowsEventV2,
            33 => TypeCode::GtidLogEvent,
            34 => TypeCode::AnonymousGtidLogEvent,
            35 => TypeCode::PreviousGtidsLogEvent,
            i => TypeCode::OtherUnknown(i),
        }
    }

    /// The DML kind of a row event type, if this is one.
    pub fn dml_kind(&self) -> Option<DmlKind> {
        match self {
            TypeCode::WriteRowsEventV1 | TypeCode::WriteRowsEventV2 => Some(DmlKind::Insert),
            TypeCode::UpdateRowsEventV1 | TypeCode::UpdateRowsEventV2 => Some(DmlKind::Update),
            TypeCode::DeleteRowsEventV1 | TypeCode::DeleteRowsEventV2 => Some(DmlKind::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChecksumAlgorithm {
    None,
    CRC32,
    Other(u8),
}

impl From<u8> for ChecksumAlgorithm {
    fn from(byte: u8) -> Self {
        match byte {
            0x00 => ChecksumAlgorithm::None,
            0x01 => ChecksumAlgorithm::CRC32,
            other => ChecksumAlgorithm::Other(other),
        }
    }
}

/// The fixed 19-byte header every event starts with.
#[derive(Debug, Clone)]
pub struct EventHeader {
    pub timestamp: u32,
    pub type_code: TypeCode,
    pub server_id: u32,
    pub event_size: u32,
    pub log_pos: u32,
    pub flags: u16,
}

impl EventHeader {
    pub fn parse(buf: &[u8; 19]) -> Self {
        EventHeader {
            timestamp: LittleEndian::read_u32(&buf[0..4]),
            type_code: TypeCode::from_byte(buf[4]),
            server_id: LittleEndian::read_u32(&buf[5..9]),
            event_size: LittleEndian::read_u32(&buf[9..13]),
            log_pos: LittleEndian::read_u32(&buf[13..17]),
            flags: LittleEndian::read_u16(&buf[17..19]),
        }
    }

    /// Where this event started, derived from where it ends.
    pub fn start_pos(&self) -> u32 {
        self.log_pos.wrapping_sub(self.event_size)
    }
}

/// What a row event did, or `Query` for the statement events that bracket
/// transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DmlKind {
    Insert,
    Update,
    Delete,
    Query,
}

impl DmlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DmlKind::Insert => "insert",
            DmlKind::Update => "update",
            DmlKind::Delete => "delete",
            DmlKind::Query => "query",
        }
    }
}

impl fmt::Display for DmlKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DmlKind {
    type Err = String;

    /// Only the row kinds are nameable from the outside; `query` is an
    /// internal classification.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(DmlKind::Insert),
            "update" => Ok(DmlKind::Update),
            "delete" => Ok(DmlKind::Delete),
            other => Err(format!(
                "unknown dml kind {:?}, valid args are: insert, update, delete",
                other
            )),
        }
    }
}

/// Where an envelope sits relative to its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxStatus {
    Begin,
    InProgress,
    Commit,
    Rollback,
}

/// The decoded row images of one row event, with the table-map fields the
/// synthesiser needs copied in so the envelope owns everything it refers to.
///
/// For inserts and deletes there is one image per affected row; for updates
/// the before and after images sit in consecutive pairs, so `rows.len()` is
/// always even there.
#[derive(Debug, Clone)]
pub struct RowChange {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<Vec<MySQLValue>>,
}

impl RowChange {
    /// How many rows this change touches (update pairs count once).
    pub fn affected_rows(&self, kind: DmlKind) -> u32 {
        match kind {
            DmlKind::Update => (self.rows.len() / 2) as u32,
            _ => self.rows.len() as u32,
        }
    }
}

/// Payload of an envelope: decoded row images, or the captured SQL text of
/// a query event.
#[derive(Debug, Clone)]
pub enum EventBody {
    Rows(RowChange),
    Query(String),
}

/// The unit handed from the reader to the SQL workers: one event, tagged
/// with its positions, indices and transaction state. Produced once by the
/// reader and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct BinEvent {
    /// End position of the event.
    pub pos: BinlogPosition,
    /// For row events, the position of the preceding table map event.
    pub start_pos: u32,
    /// Monotonic, gap-free from 1 across the whole run.
    pub event_idx: u64,
    /// Increments on every observed BEGIN.
    pub trx_idx: u64,
    pub trx_status: TrxStatus,
    pub timestamp: u32,
    pub kind: DmlKind,
    pub body: EventBody,
}

/// Decoded event bodies, one variant per event type the translator acts on.
#[derive(Debug)]
pub enum EventData {
    FormatDescription {
        binlog_version: u16,
        server_version: String,
        checksum: ChecksumAlgorithm,
    },
    Rotate {
        position: u64,
        next_log_name: String,
    },
    TableMap {
        table_id: u64,
        schema_name: String,
        table_name: String,
        columns: Vec<ColumnSpec>,
    },
    Rows {
        kind: DmlKind,
        change: RowChange,
    },
    Query {
        schema: String,
        query: String,
    },
    Xid {
        xid: u64,
    },
}

fn parse_one_row<R: Read + Seek>(
    cursor: &mut R,
    this_table_map: &SingleTableMap,
    present_bitmask: &BitSet,
) -> Result<Vec<MySQLValue>, ColumnParseError> {
    let num_set_columns = present_bitmask.bits_set();
    let null_bitmask_size = (num_set_columns + 7) >> 3;
    let mut row = Vec::with_capacity(this_table_map.columns.len());
    let null_bitmask = BitSet::from_slice(num_set_columns, &read_nbytes(cursor, null_bitmask_size)?)
        .map_err(|_| ColumnParseError::BitmaskMismatch)?;
    let mut null_index = 0;
    for (i, spec) in this_table_map.columns.iter().enumerate() {
        // a corrupt event can declare fewer columns than its table map;
        // that is a decode error, not a crash
        let present = present_bitmask
            .try_is_set(i)
            .map_err(|_| ColumnParseError::BitmaskMismatch)?;
        if !present {
            row.push(MySQLValue::Null);
            continue;
        }
        let is_null = null_bitmask
            .try_is_set(null_index)
            .map_err(|_| ColumnParseError::BitmaskMismatch)?;
        let val = if is_null {
            MySQLValue::Null
        } else {
            ColumnType::from_spec(*spec)?.read_value(cursor)?
        };
        row.push(val);
        null_index += 1;
    }
    Ok(row)
}

fn parse_rows_event<R: Read + Seek>(
    type_code: TypeCode,
    kind: DmlKind,
    data_len: usize,
    cursor: &mut R,
    table_map: &TableMap,
) -> Result<EventData, EventParseError> {
    let mut table_id_buf = [0u8; 8];
    cursor.read_exact(&mut table_id_buf[0..6])?;
    let table_id = LittleEndian::read_u64(&table_id_buf);
    // two-byte reserved value
    cursor.seek(io::SeekFrom::Current(2))?;
    match type_code {
        TypeCode::WriteRowsEventV2 | TypeCode::UpdateRowsEventV2 | TypeCode::DeleteRowsEventV2 => {
            // v2 extra data, length includes its own two bytes
            let extra_len = cursor.read_u16::<LittleEndian>()?;
            if extra_len > 2 {
                cursor.seek(io::SeekFrom::Current(i64::from(extra_len) - 2))?;
            }
        }
        _ => {}
    }
    let num_columns = read_length_encoded_integer(cursor)? as usize;
    let bitmask_size = (num_columns + 7) >> 3;
    let before_column_bitmask = BitSet::from_slice(num_columns, &read_nbytes(cursor, bitmask_size)?)
        .map_err(|_| ColumnParseError::BitmaskMismatch)?;
    let after_column_bitmask = match kind {
        DmlKind::Update => Some(
            BitSet::from_slice(num_columns, &read_nbytes(cursor, bitmask_size)?)
                .map_err(|_| ColumnParseError::BitmaskMismatch)?,
        ),
        _ => None,
    };
    let this_table_map = table_map
        .get(table_id)
        .ok_or(EventParseError::MissingTableMap(table_id))?;
    let mut rows = Vec::with_capacity(1);
    loop {
        let pos = cursor.stream_position()? as usize;
        if data_len.saturating_sub(pos) < 1 {
            break;
        }
        match kind {
            DmlKind::Insert | DmlKind::Delete => {
                rows.push(parse_one_row(cursor, this_table_map, &before_column_bitmask)?);
            }
            DmlKind::Update => {
                rows.push(parse_one_row(cursor, this_table_map, &before_column_bitmask)?);
                rows.push(parse_one_row(
                    cursor,
                    this_table_map,
                    after_column_bitmask.as_ref().unwrap(),
                )?);
            }
            DmlKind::Query => unreachable!(),
        }
    }
    Ok(EventData::Rows {
        kind,
        change: RowChange {
            schema_name: this_table_map.schema_name.clone(),
            table_name: this_table_map.table_name.clone(),
            columns: this_table_map.columns.clone(),
            rows,
        },
    })
}

impl EventData {
    /// Decode one event body. Types the translator does not act on decode
    /// to `None`.
    pub fn from_data(
        type_code: TypeCode,
        data: &[u8],
        table_map: &TableMap,
    ) -> Result<Option<Self>, EventParseError> {
        let mut cursor = Cursor::new(data);
        match type_code {
            TypeCode::FormatDescriptionEvent => {
                let binlog_version = cursor.read_u16::<LittleEndian>()?;
                let mut server_version_buf = [0u8; 50];
                cursor.read_exact(&mut server_version_buf)?;
                let server_version = String::from_utf8_lossy(
                    server_version_buf
                        .split(|c| *c == 0x00)
                        .next()
                        .unwrap_or(&[]),
                )
                .into_owned();
                let _create_timestamp = cursor.read_u32::<LittleEndian>()?;
                let _common_header_len = cursor.read_u8()?;
                // servers from 5.6.1 on append a checksum algorithm byte and
                // the event's own CRC after the per-type header lengths
                let checksum = if version_at_least(&server_version, (5, 6, 1)) && data.len() >= 62 {
                    ChecksumAlgorithm::from(data[data.len() - 5])
                } else {
                    ChecksumAlgorithm::None
                };
                Ok(Some(EventData::FormatDescription {
                    binlog_version,
                    server_version,
                    checksum,
                }))
            }
            TypeCode::RotateEvent => {
                let position = cursor.read_u64::<LittleEndian>()?;
                let mut name = Vec::new();
                cursor.read_to_end(&mut name)?;
                Ok(Some(EventData::Rotate {
                    position,
                    next_log_name: String::from_utf8_lossy(&name).into_owned(),
                }))
            }
            TypeCode::QueryEvent => {
                let _thread_id = cursor.read_u32::<LittleEndian>()?;
                let _exec_time = cursor.read_u32::<LittleEndian>()?;
                let schema_len = cursor.read_u8()?;
                let _error_code = cursor.read_i16::<LittleEndian>()?;
                let _status_vars = read_two_byte_length_prefixed_bytes(&mut cursor)?;
                let schema =
                    String::from_utf8_lossy(&read_nbytes(&mut cursor, schema_len)?).into_owned();
                // nul byte
                cursor.seek(io::SeekFrom::Current(1))?;
                let mut statement = Vec::new();
                cursor.read_to_end(&mut statement)?;
                Ok(Some(EventData::Query {
                    schema,
                    query: String::from_utf8_lossy(&statement).into_owned(),
                }))
            }
            TypeCode::XidEvent => {
                let xid = cursor.read_u64::<LittleEndian>()?;
                Ok(Some(EventData::Xid { xid }))
            }
            TypeCode::TableMapEvent => {
                let mut table_id_buf = [0u8; 8];
                cursor.read_exact(&mut table_id_buf[0..6])?;
                let table_id = LittleEndian::read_u64(&table_id_buf);
                // two-byte reserved value
                cursor.seek(io::SeekFrom::Current(2))?;
                let schema_name = read_one_byte_length_prefixed_string(&mut cursor)?;
                // nul byte
                cursor.seek(io::SeekFrom::Current(1))?;
                let table_name = read_one_byte_length_prefixed_string(&mut cursor)?;
                // nul byte
                cursor.seek(io::SeekFrom::Current(1))?;
                let column_count = read_length_encoded_integer(&mut cursor)? as usize;
                let mut type_bytes = vec![0u8; column_count];
                cursor.read_exact(&mut type_bytes)?;
                let _metadata_length = read_length_encoded_integer(&mut cursor)?;
                let columns = type_bytes
                    .into_iter()
                    .map(|b| ColumnSpec::read_meta(b, &mut cursor))
                    .collect::<Result<Vec<_>, _>>()?;
                // trailing nullability bitmap, not needed for translation
                Ok(Some(EventData::TableMap {
                    table_id,
                    schema_name,
                    table_name,
                    columns,
                }))
            }
            TypeCode::WriteRowsEventV1
            | TypeCode::WriteRowsEventV2
            | TypeCode::UpdateRowsEventV1
            | TypeCode::UpdateRowsEventV2
            | TypeCode::DeleteRowsEventV1
            | TypeCode::DeleteRowsEventV2 => {
                let kind = type_code.dml_kind().unwrap();
                let ev = parse_rows_event(type_code, kind, data.len(), &mut cursor, table_map)?;
                Ok(Some(ev))
            }
            _ => Ok(None),
        }
    }
}

fn version_at_least(server_version: &str, (maj, min, patch): (u32, u32, u32)) -> bool {
    let mut parts = server_version
        .split(|c: char| !c.is_ascii_digit())
        .take(3)
        .map(|p| p.parse::<u32>().unwrap_or(0));
    let v = (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    );
    v >= (maj, min, patch)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::column_types::ColumnSpec;
    use crate::table_map::TableMap;

    fn header_bytes(
        timestamp: u32,
        type_byte: u8,
        event_size: u32,
        log_pos: u32,
    ) -> [u8; 19] {
        let mut buf = [0u8; 19];
        LittleEndian::write_u32(&mut buf[0..4], timestamp);
        buf[4] = type_byte;
        LittleEndian::write_u32(&mut buf[5..9], 1);
        LittleEndian::write_u32(&mut buf[9..13], event_size);
        LittleEndian::write_u32(&mut buf[13..17], log_pos);
        LittleEndian::write_u16(&mut buf[17..19], 0);
        buf
    }

    #[test]
    fn test_header_parse() {
        let h = EventHeader::parse(&header_bytes(1550192291, 19, 52, 398));
        assert_eq!(h.timestamp, 1550192291);
        assert_eq!(h.type_code, TypeCode::TableMapEvent);
        assert_eq!(h.event_size, 52);
        assert_eq!(h.log_pos, 398);
        assert_eq!(h.start_pos(), 346);
    }

    #[test]
    fn test_version_probe() {
        assert!(version_at_least("5.7.26-log", (5, 6, 1)));
        assert!(version_at_least("8.0.32", (5, 6, 1)));
        assert!(!version_at_least("5.5.62", (5, 6, 1)));
    }

    fn table_map_body(schema: &str, table: &str, table_id: u64) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&table_id.to_le_bytes()[0..6]);
        body.extend_from_slice(&[0, 0]); // flags
        body.push(schema.len() as u8);
        body.extend_from_slice(schema.as_bytes());
        body.push(0);
        body.push(table.len() as u8);
        body.extend_from_slice(table.as_bytes());
        body.push(0);
        body.push(2); // column count
        body.extend_from_slice(&[3, 15]); // INT, VARCHAR
        body.push(2); // metadata length
        body.extend_from_slice(&40u16.to_le_bytes()); // varchar max length
        body.push(0b0000_0010); // nullability bitmap
        body
    }

    #[test]
    fn test_table_map_decode() {
        let body = table_map_body("db1", "t", 7);
        let map = TableMap::new();
        let decoded = EventData::from_data(TypeCode::TableMapEvent, &body, &map)
            .unwrap()
            .unwrap();
        assert_matches!(decoded, EventData::TableMap { table_id: 7, ref schema_name, ref table_name, ref columns }
            if schema_name == "db1" && table_name == "t"
                && columns == &[ColumnSpec::new(3, 0), ColumnSpec::new(15, 40)]);
    }

    fn write_rows_body(table_id: u64, rows: &[(i32, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&table_id.to_le_bytes()[0..6]);
        body.extend_from_slice(&[0, 0]); // flags
        body.extend_from_slice(&2u16.to_le_bytes()); // v2 extra data length
        body.push(2); // column count
        body.push(0b0000_0011); // columns present
        for (a, b) in rows {
            body.push(0); // null bitmap
            body.extend_from_slice(&a.to_le_bytes());
            body.push(b.len() as u8);
            body.extend_from_slice(b.as_bytes());
        }
        body
    }

    #[test]
    fn test_write_rows_decode() {
        let mut map = TableMap::new();
        map.handle(
            7,
            "db1".to_owned(),
            "t".to_owned(),
            vec![ColumnSpec::new(3, 0), ColumnSpec::new(15, 40)],
        );
        let body = write_rows_body(7, &[(1, "x"), (2, "y")]);
        let decoded = EventData::from_data(TypeCode::WriteRowsEventV2, &body, &map)
            .unwrap()
            .unwrap();
        match decoded {
            EventData::Rows { kind, change } => {
                assert_eq!(kind, DmlKind::Insert);
                assert_eq!(change.schema_name, "db1");
                assert_eq!(change.rows.len(), 2);
                assert_matches!(change.rows[0][0], MySQLValue::SignedInteger(1));
                assert_matches!(change.rows[1][1], MySQLValue::String(ref s) if s == "y");
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_missing_table_map_is_an_error() {
        let map = TableMap::new();
        let body = write_rows_body(9, &[(1, "x")]);
        assert_matches!(
            EventData::from_data(TypeCode::WriteRowsEventV2, &body, &map),
            Err(EventParseError::MissingTableMap(9))
        );
    }

    #[test]
    fn test_narrow_column_bitmask_is_an_error() {
        // the event declares one column while its table map declared two:
        // the present-mask lookup for the second column must fail cleanly
        let mut map = TableMap::new();
        map.handle(
            7,
            "db1".to_owned(),
            "t".to_owned(),
            vec![ColumnSpec::new(3, 0), ColumnSpec::new(15, 40)],
        );
        let mut body = Vec::new();
        body.extend_from_slice(&7u64.to_le_bytes()[0..6]);
        body.extend_from_slice(&[0, 0]); // flags
        body.extend_from_slice(&2u16.to_le_bytes()); // v2 extra data length
        body.push(1); // column count, one short of the table map
        body.push(0b0000_0001); // columns present
        body.push(0); // null bitmap
        body.extend_from_slice(&1i32.to_le_bytes());
        assert_matches!(
            EventData::from_data(TypeCode::WriteRowsEventV2, &body, &map),
            Err(EventParseError::ColumnParseError(
                crate::errors::ColumnParseError::BitmaskMismatch
            ))
        );
    }

    #[test]
    fn test_query_decode() {
        let mut body = Vec::new();
        body.extend_from_slice(&42u32.to_le_bytes()); // thread id
        body.extend_from_slice(&0u32.to_le_bytes()); // exec time
        body.push(3); // schema length
        body.extend_from_slice(&0i16.to_le_bytes()); // error code
        body.extend_from_slice(&0u16.to_le_bytes()); // status vars length
        body.extend_from_slice(b"db1");
        body.push(0);
        body.extend_from_slice(b"BEGIN");
        let map = TableMap::new();
        let decoded = EventData::from_data(TypeCode::QueryEvent, &body, &map)
            .unwrap()
            .unwrap();
        assert_matches!(decoded, EventData::Query { ref schema, ref query }
            if schema == "db1" && query == "BEGIN");
    }
}
