use std::io::Read;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use crate::errors::ColumnParseError;
use crate::jsonb;
use crate::packet_helpers::*;
use crate::value::MySQLValue;

/// One column slot as reported by a table map event: the raw type byte plus
/// the packed 16-bit metadata that some types carry. Envelopes carry these
/// verbatim so that SQL generation can re-derive the typed view without
/// holding a reference into the reader's table map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub type_byte: u8,
    pub meta: u16,
}

impl ColumnSpec {
    pub fn new(type_byte: u8, meta: u16) -> Self {
        ColumnSpec { type_byte, meta }
    }

    /// How many metadata bytes this type occupies in the table map event.
    pub(crate) fn meta_len(type_byte: u8) -> usize {
        match type_byte {
            // pack length
            4 | 5 | 17 | 18 | 19 | 245 | 252 | 255 => 1,
            // max length / precision+scale / real-type+length / bit widths
            15 | 16 | 246 | 247 | 248 | 253 | 254 => 2,
            _ => 0,
        }
    }

    /// Read this column's metadata out of the table map metadata block.
    pub(crate) fn read_meta<R: Read>(type_byte: u8, r: &mut R) -> std::io::Result<ColumnSpec> {
        let meta = match type_byte {
            4 | 5 | 17 | 18 | 19 | 245 | 252 | 255 => u16::from(r.read_u8()?),
            15 | 253 | 16 => r.read_u16::<LittleEndian>()?,
            // for STRING-family and NEWDECIMAL the two bytes are packed
            // high-then-low; the high byte may encode the real type
            246 | 247 | 248 | 254 => {
                let b0 = r.read_u8()?;
                let b1 = r.read_u8()?;
                (u16::from(b0) << 8) | u16::from(b1)
            }
            _ => 0,
        };
        Ok(ColumnSpec { type_byte, meta })
    }
}

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum ColumnType {
    Decimal,
    Tiny,
    Short,
    Long,
    Float(u8),
    Double(u8),
    Null,
    Timestamp,
    LongLong,
    Int24,
    Date,
    Time,
    DateTime,
    Year,
    NewDate,
    Timestamp2(u8),
    DateTime2(u8),
    Time2(u8),
    VarChar(u16),
    Bit(u16),
    NewDecimal(u8, u8),
    Enum(u16),
    Set(u16),
    TinyBlob,
    MediumBlob,
    LongBlob,
    Blob(u8),
    MyString(u16),
    Geometry(u8),
    Json(u8),
}

impl ColumnType {
    /// Resolve a raw `(type byte, meta)` pair into the typed view used for
    /// value decoding and literal selection.
    ///
    /// `MYSQL_TYPE_STRING` packs a real type into the high metadata byte
    /// when `meta >= 256`: ENUM and SET hide behind it, and CHAR columns
    /// longer than 255 bytes smuggle two extra length bits there.
    pub fn from_spec(spec: ColumnSpec) -> Result<Self, ColumnParseError> {
        let (code, meta) = if spec.type_byte == 254 && spec.meta >= 256 {
            let b0 = (spec.meta >> 8) as u8;
            let b1 = spec.meta & 0xff;
            if b0 & 0x30 != 0x30 {
                (b0 | 0x30, u16::from((b0 & 0x30) ^ 0x30) << 4 | b1)
            } else {
                (b0, b1)
            }
        } else {
            (spec.type_byte, spec.meta)
        };
        Ok(match code {
            0 => ColumnType::Decimal,
            1 => ColumnType::Tiny,
            2 => ColumnType::Short,
            3 => ColumnType::Long,
            4 => ColumnType::Float(meta as u8),
            5 => ColumnType::Double(meta as u8),
            6 => ColumnType::Null,
            7 => ColumnType::Timestamp,
            8 => ColumnType::LongLong,
            9 => ColumnType::Int24,
            10 => ColumnType::Date,
            11 => ColumnType::Time,
            12 => ColumnType::DateTime,
            13 => ColumnType::Year,
            14 => ColumnType::NewDate, // not implemented (or documented)
            15 => ColumnType::VarChar(meta),
            16 => ColumnType::Bit(meta),
            17 => ColumnType::Timestamp2(meta as u8),
            18 => ColumnType::DateTime2(meta as u8),
            19 => ColumnType::Time2(meta as u8),
            245 => ColumnType::Json(meta as u8),
            246 => ColumnType::NewDecimal((meta >> 8) as u8, meta as u8),
            247 => ColumnType::Enum(meta),
            248 => ColumnType::Set(meta),
            249 => ColumnType::TinyBlob, // docs say these can't occur in
            250 => ColumnType::MediumBlob, // binlogs, but keep them nameable
            251 => ColumnType::LongBlob,
            252 => ColumnType::Blob(meta as u8),
            253 => ColumnType::VarChar(meta),
            254 => ColumnType::MyString(meta),
            255 => ColumnType::Geometry(meta as u8),
            i => return Err(ColumnParseError::UnknownTypeByte(i)),
        })
    }

    /// The normalised SQL type name this slot maps to, matching what
    /// `SHOW COLUMNS` reports before any `(len)` suffix. Used by the
    /// synthesiser to pick literal formatters and classify byte-valued
    /// columns.
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnType::Decimal | ColumnType::NewDecimal(..) => "decimal",
            ColumnType::Tiny => "tinyint",
            ColumnType::Short => "smallint",
            ColumnType::Long => "int",
            ColumnType::Int24 => "mediumint",
            ColumnType::LongLong => "bigint",
            ColumnType::Float(_) => "float",
            ColumnType::Double(_) => "double",
            ColumnType::Null => "unknown_type",
            ColumnType::Timestamp | ColumnType::Timestamp2(_) => "timestamp",
            ColumnType::Date | ColumnType::NewDate => "date",
            ColumnType::Time | ColumnType::Time2(_) => "time",
            ColumnType::DateTime | ColumnType::DateTime2(_) => "datetime",
            ColumnType::Year => "year",
            ColumnType::Bit(_) => "bit",
            ColumnType::Enum(_) => "enum",
            ColumnType::Set(_) => "set",
            ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Blob(_) => "blob",
            ColumnType::VarChar(_) => "varchar",
            ColumnType::MyString(_) => "char",
            ColumnType::Json(_) => "json",
            ColumnType::Geometry(_) => "geometry",
        }
    }

    /// Whether values of this type are compared as raw bytes (blob, json,
    /// geometry, unknown) rather than by value.
    pub fn is_byte_valued(&self) -> bool {
        matches!(
            self,
            ColumnType::Blob(_)
                | ColumnType::TinyBlob
                | ColumnType::MediumBlob
                | ColumnType::LongBlob
                | ColumnType::Json(_)
                | ColumnType::Geometry(_)
                | ColumnType::Null
        )
    }

    pub fn read_value<R: Read>(&self, r: &mut R) -> Result<MySQLValue, ColumnParseError> {
        match self {
            &ColumnType::Tiny => Ok(MySQLValue::SignedInteger(i64::from(r.read_i8()?))),
            &ColumnType::Short => Ok(MySQLValue::SignedInteger(i64::from(
                r.read_i16::<LittleEndian>()?,
            ))),
            &ColumnType::Long => Ok(MySQLValue::SignedInteger(i64::from(
                r.read_i32::<LittleEndian>()?,
            ))),
            &ColumnType::Timestamp => Ok(MySQLValue::Timestamp {
                unix_time: r.read_i32::<LittleEndian>()?,
                subsecond: 0,
            }),
            &ColumnType::LongLong => Ok(MySQLValue::SignedInteger(r.read_i64::<LittleEndian>()?)),
            &ColumnType::Int24 => {
                let val = i64::from(read_int24(r)?);
                Ok(MySQLValue::SignedInteger(val))
            }
            &ColumnType::Null => Ok(MySQLValue::Null),
            &ColumnType::VarChar(max_len) => {
                let value = if max_len > 255 {
                    read_two_byte_length_prefixed_string(r)?
                } else {
                    read_one_byte_length_prefixed_string(r)?
                };
                Ok(MySQLValue::String(value))
            }
            &ColumnType::MyString(max_len) => {
                let value = if max_len > 255 {
                    read_two_byte_length_prefixed_string(r)?
                } else {
                    read_one_byte_length_prefixed_string(r)?
                };
                Ok(MySQLValue::String(value))
            }
            &ColumnType::Year => Ok(MySQLValue::Year(u32::from(r.read_u8()?) + 1900)),
            &ColumnType::Date => {
                let val = read_uint24(r)?;
                if val == 0 {
                    Ok(MySQLValue::Null)
                } else {
                    let year = (val & ((1 << 15) - 1) << 9) >> 9;
                    let month = (val & ((1 << 4) - 1) << 5) >> 5;
                    let day = val & ((1 << 5) - 1);
                    if year == 0 || month == 0 || day == 0 {
                        Ok(MySQLValue::Null)
                    } else {
                        Ok(MySQLValue::Date { year, month, day })
                    }
                }
            }
            &ColumnType::Time => {
                let val = read_uint24(r)?;
                let hours = val / 10000;
                let minutes = (val % 10000) / 100;
                let seconds = val % 100;
                Ok(MySQLValue::Time {
                    hours,
                    minutes,
                    seconds,
                    subseconds: 0,
                })
            }
            &ColumnType::DateTime => {
                let value = r.read_u64::<LittleEndian>()?;
                if value == 0 {
                    Ok(MySQLValue::Null)
                } else {
                    let date = value / 1000000;
                    let time = value % 1000000;
                    let year = (date / 10000) as u32;
                    let month = ((date % 10000) / 100) as u32;
                    let day = (date % 100) as u32;
                    let hour = (time / 10000) as u32;
                    let minute = ((time % 10000) / 100) as u32;
                    let second = (time % 100) as u32;
                    if year == 0 || month == 0 || day == 0 {
                        Ok(MySQLValue::Null)
                    } else {
                        Ok(MySQLValue::DateTime {
                            year,
                            month,
                            day,
                            hour,
                            minute,
                            second,
                            subsecond: 0,
                        })
                    }
                }
            }
            // the *2 types are new in MySQL 5.6; layout per
            // https://dev.mysql.com/doc/internals/en/date-and-time-data-type-representation.html
            &ColumnType::DateTime2(pack_length) => {
                let mut buf = [0u8; 5];
                r.read_exact(&mut buf)?;
                let subsecond = read_fractional_seconds(r, pack_length)?;
                // one bit unused (sign, but always positive)
                buf[0] &= 0x7f;
                // 17 bits of yearmonth: all of buf[0], buf[1], top 2 bits of buf[2]
                let year_month: u32 =
                    ((buf[2] as u32) >> 6) + ((buf[1] as u32) << 2) + ((buf[0] as u32) << 10);
                let year = year_month / 13;
                let month = year_month % 13;
                // 5 bits day (bits 3-7 of buf[2])
                let day = ((buf[2] & 0x3e) as u32) >> 1;
                // 5 bits hour (last bit of buf[2], top 4 bits of buf[3])
                let hour = (((buf[3] & 0xf0) as u32) >> 4) + (((buf[2] & 0x01) as u32) << 4);
                // 6 bits minute (bottom 4 bits of buf[3], top 2 bits of buf[4])
                let minute = (buf[4] >> 6) as u32 + (((buf[3] & 0x0f) as u32) << 2);
                // 6 bits second (the rest of buf[4])
                let second = (buf[4] & 0x3f) as u32;
                Ok(MySQLValue::DateTime {
                    year,
                    month,
                    day,
                    hour,
                    minute,
                    second,
                    subsecond,
                })
            }
            &ColumnType::Timestamp2(pack_length) => {
                let whole_part = r.read_i32::<BigEndian>()?;
                let frac_part = read_fractional_seconds(r, pack_length)?;
                Ok(MySQLValue::Timestamp {
                    unix_time: whole_part,
                    subsecond: frac_part,
                })
            }
            &ColumnType::Time2(pack_length) => {
                // one bit sign, one bit unused, 10 bits hour, 6 bits minute,
                // 6 bits second
                let mut buf = [0u8; 3];
                r.read_exact(&mut buf)?;
                let hours = (((buf[0] & 0x3f) as u32) << 4) | (((buf[1] & 0xf0) as u32) >> 4);
                let minutes = (((buf[1] & 0x0f) as u32) << 2) | (((buf[2] & 0xb0) as u32) >> 6);
                let seconds = (buf[2] & 0x3f) as u32;
                let frac_part = read_fractional_seconds(r, pack_length)?;
                Ok(MySQLValue::Time {
                    hours,
                    minutes,
                    seconds,
                    subseconds: frac_part,
                })
            }
            &ColumnType::Blob(length_bytes) => {
                let val = read_var_byte_length_prefixed_bytes(r, length_bytes)?;
                Ok(MySQLValue::Blob(val.into()))
            }
            &ColumnType::Geometry(length_bytes) => {
                let val = read_var_byte_length_prefixed_bytes(r, length_bytes)?;
                Ok(MySQLValue::Blob(val.into()))
            }
            &ColumnType::Float(length) | &ColumnType::Double(length) => {
                if length == 4 {
                    Ok(MySQLValue::Float(r.read_f32::<LittleEndian>()?))
                } else if length == 8 {
                    Ok(MySQLValue::Double(r.read_f64::<LittleEndian>()?))
                } else {
                    Err(ColumnParseError::UnimplementedTypeError {
                        column_type: self.clone(),
                    })
                }
            }
            &ColumnType::NewDecimal(precision, decimal_places) => {
                let body = read_new_decimal(r, precision, decimal_places)?;
                Ok(MySQLValue::Decimal(body))
            }
            &ColumnType::Enum(meta) => {
                let enum_value = match (meta & 0xff) as u8 {
                    0x01 => i16::from(r.read_i8()?),
                    0x02 => r.read_i16::<LittleEndian>()?,
                    _ => {
                        return Err(ColumnParseError::UnimplementedTypeError {
                            column_type: self.clone(),
                        })
                    }
                };
                Ok(MySQLValue::Enum(enum_value))
            }
            &ColumnType::Set(meta) => {
                let n = (meta & 0xff) as usize;
                if n == 0 || n > 8 {
                    return Err(ColumnParseError::UnimplementedTypeError {
                        column_type: self.clone(),
                    });
                }
                let mut val = 0u64;
                for i in 0..n {
                    val |= u64::from(r.read_u8()?) << (8 * i);
                }
                Ok(MySQLValue::Set(val))
            }
            &ColumnType::Bit(meta) => {
                let nbits = (u32::from(meta) >> 8) * 8 + (u32::from(meta) & 0xff);
                let n = ((nbits + 7) / 8) as usize;
                // stored big-endian
                let mut val = 0u64;
                for _ in 0..n {
                    val = (val << 8) | u64::from(r.read_u8()?);
                }
                Ok(MySQLValue::SignedInteger(val as i64))
            }
            &ColumnType::Json(size) => {
                let body = read_var_byte_length_prefixed_bytes(r, size)?;
                Ok(MySQLValue::Json(jsonb::parse(body)?))
            }
            &ColumnType::Decimal
            | &ColumnType::NewDate
            | &ColumnType::TinyBlob
            | &ColumnType::MediumBlob
            | &ColumnType::LongBlob => {
                // the manual promises these never appear in row images
                Err(ColumnParseError::UnimplementedTypeError {
                    column_type: self.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::{ColumnSpec, ColumnType};
    use crate::value::MySQLValue;

    #[test]
    fn test_plain_types() {
        assert_eq!(
            ColumnType::from_spec(ColumnSpec::new(3, 0)).unwrap(),
            ColumnType::Long
        );
        assert_eq!(
            ColumnType::from_spec(ColumnSpec::new(15, 40)).unwrap(),
            ColumnType::VarChar(40)
        );
        assert_eq!(
            ColumnType::from_spec(ColumnSpec::new(246, (10 << 8) | 2)).unwrap(),
            ColumnType::NewDecimal(10, 2)
        );
    }

    #[test]
    fn test_string_meta_unpacking() {
        // CHAR(10): real type in the high byte, length <= 255
        let spec = ColumnSpec::new(254, (254 << 8) | 10);
        assert_eq!(
            ColumnType::from_spec(spec).unwrap(),
            ColumnType::MyString(10)
        );
        // ENUM with one-byte packed values
        let spec = ColumnSpec::new(254, (247 << 8) | 1);
        assert_eq!(ColumnType::from_spec(spec).unwrap(), ColumnType::Enum(1));
        // SET over one byte of members
        let spec = ColumnSpec::new(254, (248 << 8) | 1);
        assert_eq!(ColumnType::from_spec(spec).unwrap(), ColumnType::Set(1));
        // CHAR(255) utf8mb4: byte length 1020 > 255, so the two high length
        // bits displace bits 4-5 of the type byte (0xfe & !0x30 == 0xce)
        let spec = ColumnSpec::new(254, (0xce << 8) | (1020 & 0xff));
        assert_eq!(
            ColumnType::from_spec(spec).unwrap(),
            ColumnType::MyString(1020)
        );
    }

    #[test]
    fn test_unknown_type_byte() {
        assert_matches!(
            ColumnType::from_spec(ColumnSpec::new(244, 0)),
            Err(crate::errors::ColumnParseError::UnknownTypeByte(244))
        );
    }

    #[test]
    fn test_read_simple_values() {
        let mut cur = Cursor::new(vec![0x2a, 0x00, 0x00, 0x00]);
        assert_matches!(
            ColumnType::Long.read_value(&mut cur).unwrap(),
            MySQLValue::SignedInteger(42)
        );
        let mut cur = Cursor::new(vec![0x01, b'x']);
        assert_matches!(
            ColumnType::VarChar(10).read_value(&mut cur).unwrap(),
            MySQLValue::String(ref s) if s == "x"
        );
    }

    #[test]
    fn test_type_names() {
        assert_eq!(ColumnType::Long.type_name(), "int");
        assert_eq!(ColumnType::Blob(2).type_name(), "blob");
        assert!(ColumnType::Json(4).is_byte_valued());
        assert!(!ColumnType::VarChar(10).is_byte_valued());
    }
}
