use std::collections::BTreeMap;

use chrono::{Local, TimeZone};

use crate::event::DmlKind;

/// One observation handed to the aggregator: every event with a non-empty
/// DML kind produces one of these, whatever the work type.
#[derive(Debug, Clone)]
pub struct StatsEvent {
    pub timestamp: u32,
    pub binlog: String,
    pub start_pos: u32,
    pub stop_pos: u32,
    pub database: String,
    pub table: String,
    pub query_sql: String,
    pub row_cnt: u32,
    pub kind: DmlKind,
}

#[derive(Debug, Default)]
struct Bucket {
    binlog: String,
    start_time: u32,
    stop_time: u32,
    start_pos: u32,
    stop_pos: u32,
    inserts: u64,
    updates: u64,
    deletes: u64,
    queries: u64,
    rows: u64,
}

/// Per-`(db, table, time window)` DML counters. Events arrive in binlog
/// order, so the stop fields just track the latest observation; the whole
/// table is rendered once, on pipeline close.
pub struct StatsAggregator {
    interval: u32,
    buckets: BTreeMap<(String, String, u32), Bucket>,
}

impl StatsAggregator {
    pub const HEADER: &'static str =
        "binlog\tstarttime\tstoptime\tstartpos\tstoppos\tinserts\tupdates\tdeletes\tqueries\trows\tdatabase\ttable";

    pub fn new(interval: u32) -> Self {
        StatsAggregator {
            interval: interval.max(1),
            buckets: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, ev: StatsEvent) {
        let window = ev.timestamp - ev.timestamp % self.interval;
        let key = (ev.database.clone(), ev.table.clone(), window);
        let bucket = self.buckets.entry(key).or_insert_with(|| Bucket {
            binlog: ev.binlog.clone(),
            start_time: ev.timestamp,
            stop_time: ev.timestamp,
            start_pos: ev.start_pos,
            stop_pos: ev.stop_pos,
            ..Bucket::default()
        });
        bucket.stop_time = ev.timestamp;
        bucket.stop_pos = ev.stop_pos;
        match ev.kind {
            DmlKind::Insert => bucket.inserts += 1,
            DmlKind::Update => bucket.updates += 1,
            DmlKind::Delete => bucket.deletes += 1,
            DmlKind::Query => bucket.queries += 1,
        }
        bucket.rows += u64::from(ev.row_cnt);
    }

    /// Render the final table, one tab-separated line per bucket, ordered
    /// by database, table, then window start.
    pub fn rows(&self) -> Vec<String> {
        self.buckets
            .iter()
            .map(|((db, tb, _), b)| {
                format!(
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    b.binlog,
                    format_time(b.start_time),
                    format_time(b.stop_time),
                    b.start_pos,
                    b.stop_pos,
                    b.inserts,
                    b.updates,
                    b.deletes,
                    b.queries,
                    b.rows,
                    db,
                    tb
                )
            })
            .collect()
    }
}

fn format_time(ts: u32) -> String {
    match Local.timestamp_opt(i64::from(ts), 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(timestamp: u32, table: &str, kind: DmlKind, rows: u32) -> StatsEvent {
        StatsEvent {
            timestamp,
            binlog: "bin.000001".to_owned(),
            start_pos: 100,
            stop_pos: 200,
            database: "db1".to_owned(),
            table: table.to_owned(),
            query_sql: String::new(),
            row_cnt: rows,
            kind,
        }
    }

    #[test]
    fn test_same_window_accumulates() {
        let mut agg = StatsAggregator::new(60);
        agg.record(ev(1000, "t", DmlKind::Insert, 2));
        agg.record(ev(1030, "t", DmlKind::Insert, 1));
        agg.record(ev(1050, "t", DmlKind::Delete, 1));
        let rows = agg.rows();
        assert_eq!(rows.len(), 1);
        let fields: Vec<&str> = rows[0].split('\t').collect();
        assert_eq!(fields[5], "2"); // inserts
        assert_eq!(fields[7], "1"); // deletes
        assert_eq!(fields[9], "4"); // rows
    }

    #[test]
    fn test_windows_and_tables_split_buckets() {
        let mut agg = StatsAggregator::new(60);
        agg.record(ev(1000, "t", DmlKind::Insert, 1));
        agg.record(ev(1080, "t", DmlKind::Insert, 1)); // next minute
        agg.record(ev(1000, "u", DmlKind::Update, 1)); // other table
        assert_eq!(agg.rows().len(), 3);
    }

    #[test]
    fn test_header_matches_row_shape() {
        let mut agg = StatsAggregator::new(60);
        agg.record(ev(1000, "t", DmlKind::Query, 1));
        let header_fields = StatsAggregator::HEADER.split('\t').count();
        let row_fields = agg.rows()[0].split('\t').count();
        assert_eq!(header_fields, row_fields);
    }
}
