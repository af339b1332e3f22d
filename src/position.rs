use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

/// A `(binlog name, byte offset)` coordinate.
///
/// Binlog files share a common basename and differ only in a zero-padded
/// numeric suffix (`mysql-bin.000011`), so comparing names lexicographically
/// and breaking ties on the offset yields the stream's total order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinlogPosition {
    pub name: String,
    pub pos: u32,
}

impl BinlogPosition {
    pub fn new(name: impl Into<String>, pos: u32) -> Self {
        BinlogPosition {
            name: name.into(),
            pos,
        }
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.name, self.pos)
    }
}

impl Ord for BinlogPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.pos.cmp(&other.pos))
    }
}

impl PartialOrd for BinlogPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Split a binlog file name into its basename and numeric suffix
/// (`mysql-bin.000004` → `("mysql-bin", 4)`).
pub fn basename_and_index(binlog: &str) -> Option<(String, u32)> {
    let (base, suffix) = binlog.rsplit_once('.')?;
    let index = suffix.parse::<u32>().ok()?;
    Some((base.to_owned(), index))
}

/// The name of the binlog file following `(base, index)`, with the suffix
/// zero-padded to six digits the way the server names them.
pub fn next_binlog_name(base: &str, index: u32) -> String {
    format!("{}.{:06}", base, index + 1)
}

#[cfg(test)]
mod tests {
    use super::{basename_and_index, next_binlog_name, BinlogPosition};

    #[test]
    fn test_ordering() {
        let a = BinlogPosition::new("mysql-bin.000010", 500);
        let b = BinlogPosition::new("mysql-bin.000010", 800);
        let c = BinlogPosition::new("mysql-bin.000011", 4);
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
        assert_eq!(a, BinlogPosition::new("mysql-bin.000010", 500));
    }

    #[test]
    fn test_basename_and_index() {
        assert_eq!(
            basename_and_index("mysql3306-bin.000004"),
            Some(("mysql3306-bin".to_owned(), 4))
        );
        assert_eq!(basename_and_index("no-suffix"), None);
        assert_eq!(next_binlog_name("mysql3306-bin", 4), "mysql3306-bin.000005");
    }
}
