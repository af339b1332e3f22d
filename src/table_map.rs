use std::collections::BTreeMap;

use crate::column_types::ColumnSpec;

/// The subset of a table map event that row decoding needs. One of these is
/// held per table id for the duration of a reader run; envelopes copy the
/// fields they need instead of pointing back in here.
#[derive(Debug, Clone)]
pub struct SingleTableMap {
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnSpec>,
}

pub struct TableMap {
    inner: BTreeMap<u64, SingleTableMap>,
}

impl TableMap {
    pub fn new() -> Self {
        TableMap {
            inner: BTreeMap::new(),
        }
    }

    pub fn handle(
        &mut self,
        table_id: u64,
        schema_name: String,
        table_name: String,
        columns: Vec<ColumnSpec>,
    ) {
        let map = SingleTableMap {
            schema_name,
            table_name,
            columns,
        };
        self.inner.insert(table_id, map);
    }

    pub fn get(&self, table_id: u64) -> Option<&SingleTableMap> {
        self.inner.get(&table_id)
    }
}

impl Default for TableMap {
    fn default() -> Self {
        TableMap::new()
    }
}
