use std::borrow::Cow;

use chrono::{Local, TimeZone};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq)]
/// Wrapper for the SQL BLOB (Binary Large OBject) type
///
/// Serializes as Base64
pub struct Blob(Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(v: Vec<u8>) -> Self {
        Blob(v)
    }
}

impl Blob {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Blob {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let serialized = base64::encode(&self.0);
        serializer.serialize_str(&serialized)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Normalized representation of types which are present in MySQL
pub enum MySQLValue {
    SignedInteger(i64),
    Float(f32),
    Double(f64),
    String(String),
    Enum(i16),
    Set(u64),
    Blob(Blob),
    Year(u32),
    Date {
        year: u32,
        month: u32,
        day: u32,
    },
    Time {
        hours: u32,
        minutes: u32,
        seconds: u32,
        subseconds: u32,
    },
    DateTime {
        year: u32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
        second: u32,
        subsecond: u32,
    },
    Json(serde_json::Value),
    Decimal(bigdecimal::BigDecimal),
    Timestamp {
        unix_time: i32,
        subsecond: u32,
    },
    Null,
}

/// Escape a string the way the MySQL client library does, so the result can
/// sit between single quotes in a statement.
pub(crate) fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

impl MySQLValue {
    /// Turn this type into a serde_json::Value
    ///
    /// Tries to avoid round-tripping through Serialize if it can
    pub(crate) fn as_value(&self) -> Result<Cow<serde_json::Value>, serde_json::error::Error> {
        match *self {
            MySQLValue::Json(ref j) => Ok(Cow::Borrowed(j)),
            MySQLValue::Null => Ok(Cow::Owned(serde_json::Value::Null)),
            ref j => Ok(Cow::Owned(serde_json::to_value(j)?)),
        }
    }

    /// The raw bytes of a byte-valued image, if this is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            MySQLValue::Blob(b) => Some(b.as_bytes()),
            _ => None,
        }
    }

    /// Render this value as a SQL literal: quoted and escaped for stringy
    /// types, hex for binary, `NULL` for null.
    pub fn to_sql_literal(&self) -> String {
        match self {
            MySQLValue::SignedInteger(i) => i.to_string(),
            MySQLValue::Float(f) => f.to_string(),
            MySQLValue::Double(d) => d.to_string(),
            MySQLValue::String(s) => format!("'{}'", escape_string(s)),
            MySQLValue::Enum(v) => v.to_string(),
            MySQLValue::Set(v) => v.to_string(),
            MySQLValue::Blob(b) => {
                if b.as_bytes().is_empty() {
                    "''".to_owned()
                } else {
                    format!("X'{}'", hex::encode(b.as_bytes()))
                }
            }
            MySQLValue::Year(y) => y.to_string(),
            MySQLValue::Date { year, month, day } => {
                format!("'{:04}-{:02}-{:02}'", year, month, day)
            }
            MySQLValue::Time {
                hours,
                minutes,
                seconds,
                subseconds,
            } => {
                if *subseconds > 0 {
                    format!(
                        "'{:02}:{:02}:{:02}.{:06}'",
                        hours, minutes, seconds, subseconds
                    )
                } else {
                    format!("'{:02}:{:02}:{:02}'", hours, minutes, seconds)
                }
            }
            MySQLValue::DateTime {
                year,
                month,
                day,
                hour,
                minute,
                second,
                subsecond,
            } => {
                if *subsecond > 0 {
                    format!(
                        "'{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}'",
                        year, month, day, hour, minute, second, subsecond
                    )
                } else {
                    format!(
                        "'{:04}-{:02}-{:02} {:02}:{:02}:{:02}'",
                        year, month, day, hour, minute, second
                    )
                }
            }
            MySQLValue::Json(v) => {
                let rendered =
                    serde_json::to_string(v).unwrap_or_else(|_| "null".to_owned());
                format!("'{}'", escape_string(&rendered))
            }
            MySQLValue::Decimal(d) => d.to_string(),
            MySQLValue::Timestamp {
                unix_time,
                subsecond,
            } => {
                // rendered in the local timezone, which is how the server
                // would display the column
                match Local.timestamp_opt(i64::from(*unix_time), 0).single() {
                    Some(dt) => {
                        if *subsecond > 0 {
                            format!(
                                "'{}.{:06}'",
                                dt.format("%Y-%m-%d %H:%M:%S"),
                                subsecond
                            )
                        } else {
                            format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S"))
                        }
                    }
                    None => format!("'{}'", unix_time),
                }
            }
            MySQLValue::Null => "NULL".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{escape_string, MySQLValue};

    #[test]
    fn test_escape_string() {
        assert_eq!(escape_string("plain"), "plain");
        assert_eq!(escape_string("it's"), "it\\'s");
        assert_eq!(escape_string("a\\b"), "a\\\\b");
        assert_eq!(escape_string("line\nbreak"), "line\\nbreak");
    }

    #[test]
    fn test_literals() {
        assert_eq!(MySQLValue::SignedInteger(-5).to_sql_literal(), "-5");
        assert_eq!(
            MySQLValue::String("x'y".to_owned()).to_sql_literal(),
            "'x\\'y'"
        );
        assert_eq!(MySQLValue::Null.to_sql_literal(), "NULL");
        assert_eq!(
            MySQLValue::Blob(vec![0xde, 0xad].into()).to_sql_literal(),
            "X'dead'"
        );
        assert_eq!(MySQLValue::Blob(vec![].into()).to_sql_literal(), "''");
        assert_eq!(
            MySQLValue::Date {
                year: 2020,
                month: 8,
                day: 3
            }
            .to_sql_literal(),
            "'2020-08-03'"
        );
        assert_eq!(
            MySQLValue::DateTime {
                year: 2020,
                month: 8,
                day: 3,
                hour: 14,
                minute: 17,
                second: 9,
                subsecond: 0
            }
            .to_sql_literal(),
            "'2020-08-03 14:17:09'"
        );
        // double quotes inside the rendered document are backslash-escaped
        assert_eq!(
            MySQLValue::Json(serde_json::json!({"a": 1})).to_sql_literal(),
            "'{\\\"a\\\":1}'"
        );
    }

    #[test]
    fn test_byte_equality() {
        let a = MySQLValue::Blob(vec![1, 2, 3].into());
        let b = MySQLValue::Blob(vec![1, 2, 3].into());
        let c = MySQLValue::Blob(vec![1, 2, 4].into());
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }
}
