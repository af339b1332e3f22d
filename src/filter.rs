use crate::config::Config;
use crate::event::TypeCode;
use crate::position::BinlogPosition;

/// Outcome of the pre-decode gates. Skip and stop are ordinary control
/// flow, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Pass,
    Skip,
    Stop,
}

/// Gate an event on its header alone: position range first, then time
/// range. Stop conditions are exclusive, start conditions inclusive.
pub fn check_header(cfg: &Config, pos: &BinlogPosition, timestamp: u32) -> Gate {
    if let Some(start) = &cfg.start_position {
        if pos < start {
            return Gate::Skip;
        }
    }
    if let Some(stop) = &cfg.stop_position {
        if pos >= stop {
            return Gate::Stop;
        }
    }
    if let Some(start_dt) = cfg.start_datetime {
        if timestamp < start_dt {
            return Gate::Skip;
        }
    }
    if let Some(stop_dt) = cfg.stop_datetime {
        if timestamp >= stop_dt {
            return Gate::Stop;
        }
    }
    Gate::Pass
}

/// Gate a row event on the DML-kind filter before its body is decoded.
/// Non-row events always pass so the table-map context stays coherent.
pub fn check_dml_kind(cfg: &Config, type_code: TypeCode) -> Gate {
    match type_code.dml_kind() {
        Some(kind) if !cfg.is_target_dml(kind) => Gate::Skip,
        _ => Gate::Pass,
    }
}

/// Apply the db/table allow- and deny-lists, in that order. Empty
/// allow-lists admit everything.
pub fn table_allowed(cfg: &Config, db: &str, tb: &str) -> bool {
    if !cfg.databases.is_empty() && !cfg.databases.iter().any(|d| d == db) {
        return false;
    }
    if !cfg.tables.is_empty() && !cfg.tables.iter().any(|t| t == tb) {
        return false;
    }
    if cfg.ignore_databases.iter().any(|d| d == db) {
        return false;
    }
    if cfg.ignore_tables.iter().any(|t| t == tb) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::event::DmlKind;

    fn ranged_config() -> Config {
        let mut cfg = Config {
            start_file: Some("bin.000001".to_owned()),
            start_pos: Some(100),
            stop_file: Some("bin.000002".to_owned()),
            stop_pos: Some(500),
            ..Config::default()
        };
        cfg.validate().unwrap();
        cfg
    }

    #[test]
    fn test_position_gate_boundaries() {
        let cfg = ranged_config();
        // strictly before the start is skipped, the start itself passes
        let before = BinlogPosition::new("bin.000001", 99);
        let at_start = BinlogPosition::new("bin.000001", 100);
        assert_eq!(check_header(&cfg, &before, 0), Gate::Skip);
        assert_eq!(check_header(&cfg, &at_start, 0), Gate::Pass);
        // reaching the stop position stops
        let at_stop = BinlogPosition::new("bin.000002", 500);
        let past_stop = BinlogPosition::new("bin.000003", 4);
        assert_eq!(check_header(&cfg, &at_stop, 0), Gate::Stop);
        assert_eq!(check_header(&cfg, &past_stop, 0), Gate::Stop);
    }

    #[test]
    fn test_time_gate_boundaries() {
        let mut cfg = Config {
            start_file: Some("bin.000001".to_owned()),
            start_datetime: Some(1000),
            stop_datetime: Some(2000),
            ..Config::default()
        };
        cfg.validate().unwrap();
        let pos = BinlogPosition::new("bin.000001", 200);
        assert_eq!(check_header(&cfg, &pos, 999), Gate::Skip);
        assert_eq!(check_header(&cfg, &pos, 1000), Gate::Pass);
        assert_eq!(check_header(&cfg, &pos, 1999), Gate::Pass);
        assert_eq!(check_header(&cfg, &pos, 2000), Gate::Stop);
    }

    #[test]
    fn test_dml_kind_gate() {
        let mut cfg = Config {
            start_file: Some("bin.000001".to_owned()),
            sql: vec![DmlKind::Insert],
            ..Config::default()
        };
        cfg.validate().unwrap();
        assert_eq!(
            check_dml_kind(&cfg, TypeCode::WriteRowsEventV2),
            Gate::Pass
        );
        assert_eq!(
            check_dml_kind(&cfg, TypeCode::DeleteRowsEventV2),
            Gate::Skip
        );
        // table maps are never filtered by kind
        assert_eq!(check_dml_kind(&cfg, TypeCode::TableMapEvent), Gate::Pass);
    }

    #[test]
    fn test_table_filters() {
        let mut cfg = Config::default();
        // empty lists admit everything
        assert!(table_allowed(&cfg, "any", "thing"));
        cfg.databases = vec!["db1".to_owned()];
        cfg.ignore_tables = vec!["noisy".to_owned()];
        assert!(table_allowed(&cfg, "db1", "t"));
        assert!(!table_allowed(&cfg, "db2", "t"));
        assert!(!table_allowed(&cfg, "db1", "noisy"));
    }
}
