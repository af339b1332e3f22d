use std::collections::HashMap;
use std::sync::Arc;

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, Opts, OptsBuilder, Row};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::Config;
use crate::errors::SchemaError;

/// The `db.tb` key tables are cached under.
pub fn table_key(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type with any `(len)` suffix stripped, e.g. `int` from
    /// `int(11) unsigned`. The synthesiser matches substrings like `text`
    /// against this.
    pub type_name: String,
    pub unsigned: bool,
}

pub type KeyColumns = Vec<String>;

/// What the live server reports about one table: ordered columns, the
/// primary key, and any other unique keys in the order MySQL returns them.
#[derive(Debug, Clone, Default)]
pub struct TableDef {
    pub database: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: KeyColumns,
    pub unique_keys: Vec<KeyColumns>,
}

impl TableDef {
    /// The key a WHERE clause should use: the primary key if there is one,
    /// else the first unique key, else nothing (forcing full-image
    /// equality).
    pub fn where_key(&self) -> &[String] {
        if !self.primary_key.is_empty() {
            &self.primary_key
        } else if let Some(k) = self.unique_keys.first() {
            k
        } else {
            &[]
        }
    }

    /// Map key column names onto positions in the column list. Names that
    /// no longer resolve (schema drift) are dropped.
    pub fn key_column_indexes(&self, key: &[String]) -> Vec<usize> {
        key.iter()
            .filter_map(|name| self.columns.iter().position(|c| &c.name == name))
            .collect()
    }
}

fn normalized_type_name(raw: &str) -> String {
    raw.split('(').next().unwrap_or("").to_owned()
}

fn is_unsigned(raw: &str) -> bool {
    raw.to_lowercase().contains("unsigned")
}

/// Lazy cache of table definitions fetched from the configured MySQL
/// instance. Entries are added once and never mutated, so workers can share
/// it read-mostly; the single schema connection opens on first miss and
/// closes on shutdown.
pub struct SchemaCache {
    opts: Opts,
    tables: RwLock<HashMap<String, Arc<TableDef>>>,
    conn: Mutex<Option<Conn>>,
}

impl SchemaCache {
    pub fn from_config(cfg: &Config) -> Self {
        let opts = OptsBuilder::default()
            .ip_or_hostname(cfg.host.clone())
            .tcp_port(cfg.port)
            .user(Some(cfg.user.clone()))
            .pass(Some(cfg.password.clone()))
            .prefer_socket(false)
            .into();
        SchemaCache {
            opts,
            tables: RwLock::new(HashMap::new()),
            conn: Mutex::new(None),
        }
    }

    /// Seed the cache with a known definition, bypassing the live lookup.
    /// Used where no server is reachable, e.g. in tests.
    pub async fn preload(&self, def: TableDef) {
        let key = table_key(&def.database, &def.table);
        self.tables.write().await.insert(key, Arc::new(def));
    }

    /// Look up `db.tb`, querying the live server on first reference. The
    /// read path is the fast path: after the first row event for a table,
    /// every worker hit resolves against the map without touching MySQL.
    pub async fn get(&self, schema: &str, table: &str) -> Result<Arc<TableDef>, SchemaError> {
        let key = table_key(schema, table);
        if let Some(def) = self.tables.read().await.get(&key) {
            return Ok(def.clone());
        }
        if schema.is_empty() || table.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        let def = Arc::new(self.fetch(schema, table).await?);
        self.tables
            .write()
            .await
            .insert(key, def.clone());
        Ok(def)
    }

    async fn fetch(&self, schema: &str, table: &str) -> Result<TableDef, SchemaError> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            info!(host = %self.opts.ip_or_hostname(), "connecting to mysql for schema queries");
            *guard = Some(
                Conn::new(self.opts.clone())
                    .await
                    .map_err(SchemaError::Connect)?,
            );
        }
        let conn = guard.as_mut().unwrap();

        let query = format!("SHOW COLUMNS FROM `{}`.`{}`", schema, table);
        let rows: Vec<Row> = conn.query(&query).await.map_err(|e| SchemaError::Query {
            query: query.clone(),
            source: e,
        })?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            if let (Some(name), Some(raw_type)) =
                (row.get::<String, _>(0), row.get::<String, _>(1))
            {
                columns.push(ColumnInfo {
                    name,
                    type_name: normalized_type_name(&raw_type),
                    unsigned: is_unsigned(&raw_type),
                });
            }
        }
        if columns.is_empty() {
            return Err(SchemaError::TableNotFound(table_key(schema, table)));
        }

        let query = format!("SHOW INDEX FROM `{}`.`{}`", schema, table);
        let rows: Vec<Row> = conn.query(&query).await.map_err(|e| SchemaError::Query {
            query: query.clone(),
            source: e,
        })?;
        let mut primary_key = KeyColumns::new();
        let mut unique_keys: Vec<(String, KeyColumns)> = Vec::new();
        for row in &rows {
            // Non_unique, Key_name and Column_name are fixed positions in
            // the SHOW INDEX result shape
            let non_unique: i64 = row.get(1).unwrap_or(1);
            if non_unique != 0 {
                continue;
            }
            let key_name: String = match row.get(2) {
                Some(n) => n,
                None => continue,
            };
            let col_name: String = match row.get(4) {
                Some(n) => n,
                None => continue,
            };
            if key_name.eq_ignore_ascii_case("primary") {
                if !primary_key.contains(&col_name) {
                    primary_key.push(col_name);
                }
            } else if let Some((_, cols)) =
                unique_keys.iter_mut().find(|(name, _)| name == &key_name)
            {
                if !cols.contains(&col_name) {
                    cols.push(col_name);
                }
            } else {
                unique_keys.push((key_name, vec![col_name]));
            }
        }

        debug!(
            table = %table_key(schema, table),
            columns = columns.len(),
            "fetched table definition"
        );
        Ok(TableDef {
            database: schema.to_owned(),
            table: table.to_owned(),
            columns,
            primary_key,
            unique_keys: unique_keys.into_iter().map(|(_, cols)| cols).collect(),
        })
    }

    /// Drop the schema connection, if one was ever opened.
    pub async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            let _ = conn.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def_with_keys(primary: &[&str], uniques: &[&[&str]]) -> TableDef {
        TableDef {
            database: "db1".to_owned(),
            table: "t".to_owned(),
            columns: vec![
                ColumnInfo {
                    name: "a".to_owned(),
                    type_name: "int".to_owned(),
                    unsigned: false,
                },
                ColumnInfo {
                    name: "b".to_owned(),
                    type_name: "varchar".to_owned(),
                    unsigned: false,
                },
                ColumnInfo {
                    name: "c".to_owned(),
                    type_name: "int".to_owned(),
                    unsigned: true,
                },
            ],
            primary_key: primary.iter().map(|s| s.to_string()).collect(),
            unique_keys: uniques
                .iter()
                .map(|k| k.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn test_where_key_prefers_primary() {
        let def = def_with_keys(&["a"], &[&["b", "c"]]);
        assert_eq!(def.where_key(), &["a".to_owned()][..]);
        let def = def_with_keys(&[], &[&["b", "c"]]);
        assert_eq!(def.where_key(), &["b".to_owned(), "c".to_owned()][..]);
        let def = def_with_keys(&[], &[]);
        assert!(def.where_key().is_empty());
    }

    #[test]
    fn test_key_column_indexes() {
        let def = def_with_keys(&["c", "a"], &[]);
        assert_eq!(def.key_column_indexes(&def.primary_key), vec![2, 0]);
        // names that stopped resolving fall out
        assert_eq!(def.key_column_indexes(&["zzz".to_owned()]), Vec::<usize>::new());
    }

    #[test]
    fn test_type_normalisation() {
        assert_eq!(normalized_type_name("int(11) unsigned"), "int");
        assert_eq!(normalized_type_name("mediumtext"), "mediumtext");
        assert!(is_unsigned("bigint(20) UNSIGNED"));
        assert!(!is_unsigned("varchar(32)"));
    }
}
