use crate::column_types::ColumnType;
use crate::config::{Config, WorkType};
use crate::errors::ColumnParseError;
use crate::event::{DmlKind, RowChange};
use crate::schema::TableDef;
use crate::value::{escape_string, MySQLValue};

const DROPPED_FIELD_PREFIX: &str = "dropped_field_";

/// One column slot after reconciling the live schema against the row image:
/// the name and declared type from the server, the wire type from the table
/// map.
struct FieldSlot {
    name: String,
    declared_type: String,
    unsigned: bool,
    col: ColumnType,
}

impl FieldSlot {
    fn declared_as_text(&self) -> bool {
        self.declared_type.to_lowercase().contains("text")
    }
}

/// Line up the row image with the schema descriptor. A row wider than the
/// schema means columns were dropped on the live server after this event
/// was logged; the tail gets synthetic `dropped_field_<i>` names so the
/// generated SQL still lists every recorded value.
fn reconcile_fields(change: &RowChange, tbl: &TableDef) -> Result<Vec<FieldSlot>, ColumnParseError> {
    let mut slots = Vec::with_capacity(change.columns.len());
    for (i, spec) in change.columns.iter().enumerate() {
        let col = ColumnType::from_spec(*spec)?;
        match tbl.columns.get(i) {
            Some(info) => slots.push(FieldSlot {
                name: info.name.clone(),
                declared_type: info.type_name.clone(),
                unsigned: info.unsigned,
                col,
            }),
            None => slots.push(FieldSlot {
                name: format!("{}{}", DROPPED_FIELD_PREFIX, i - tbl.columns.len()),
                declared_type: "unknown_type".to_owned(),
                unsigned: false,
                col,
            }),
        }
    }
    Ok(slots)
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn table_ref(change: &RowChange, prefix_db: bool) -> String {
    if prefix_db && !change.schema_name.is_empty() {
        format!(
            "{}.{}",
            quote_ident(&change.schema_name),
            quote_ident(&change.table_name)
        )
    } else {
        quote_ident(&change.table_name)
    }
}

/// Render one image value as a literal, honouring two per-column quirks:
/// TEXT columns arrive as blobs but print as strings, and UNSIGNED integers
/// decoded through the signed wire format need their width's wrap-around
/// undone.
fn literal(slot: &FieldSlot, val: &MySQLValue) -> String {
    match val {
        MySQLValue::Blob(b) if slot.declared_as_text() => {
            format!("'{}'", escape_string(&String::from_utf8_lossy(b.as_bytes())))
        }
        MySQLValue::SignedInteger(i) if slot.unsigned && *i < 0 => match slot.col {
            ColumnType::Tiny => (i + (1 << 8)).to_string(),
            ColumnType::Short => (i + (1 << 16)).to_string(),
            ColumnType::Int24 => (i + (1 << 24)).to_string(),
            ColumnType::Long => (i + (1 << 32)).to_string(),
            ColumnType::LongLong => (*i as u64).to_string(),
            _ => i.to_string(),
        },
        _ => val.to_sql_literal(),
    }
}

/// Image equality: byte-wise for blob/json/geometry/unknown columns not
/// declared as TEXT, value equality otherwise.
fn values_equal(slot: &FieldSlot, a: &MySQLValue, b: &MySQLValue) -> bool {
    if slot.col.is_byte_valued() && !slot.declared_as_text() {
        if let (Some(ab), Some(bb)) = (a.as_bytes(), b.as_bytes()) {
            return ab == bb;
        }
    }
    a == b
}

/// `col=value` (or `col IS NULL`) pairs over the chosen key, or over the
/// whole image when no usable key exists or a full image was requested.
fn eq_conditions(
    slots: &[FieldSlot],
    row: &[MySQLValue],
    key_idx: &[usize],
    full_image: bool,
) -> Vec<String> {
    let indexes: Vec<usize> = if !full_image && !key_idx.is_empty() {
        key_idx.to_vec()
    } else {
        (0..slots.len().min(row.len())).collect()
    };
    indexes
        .into_iter()
        .map(|i| {
            let ident = quote_ident(&slots[i].name);
            match &row[i] {
                MySQLValue::Null => format!("{} IS NULL", ident),
                v => format!("{}={}", ident, literal(&slots[i], v)),
            }
        })
        .collect()
}

fn gen_inserts(
    change: &RowChange,
    slots: &[FieldSlot],
    primary_idx: &[usize],
    rows_per_insert: usize,
    prefix_db: bool,
    ignore_primary: bool,
) -> Vec<String> {
    let skip_primary = ignore_primary && !primary_idx.is_empty();
    let keep: Vec<usize> = (0..slots.len())
        .filter(|i| !(skip_primary && primary_idx.contains(i)))
        .collect();
    let col_list = keep
        .iter()
        .map(|&i| quote_ident(&slots[i].name))
        .collect::<Vec<_>>()
        .join(",");
    let table = table_ref(change, prefix_db);

    change
        .rows
        .chunks(rows_per_insert)
        .map(|batch| {
            let tuples = batch
                .iter()
                .map(|row| {
                    let vals = keep
                        .iter()
                        .map(|&i| literal(&slots[i], &row[i]))
                        .collect::<Vec<_>>()
                        .join(",");
                    format!("({})", vals)
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("INSERT INTO {} ({}) VALUES {};", table, col_list, tuples)
        })
        .collect()
}

fn gen_deletes(
    change: &RowChange,
    slots: &[FieldSlot],
    key_idx: &[usize],
    full_image: bool,
    prefix_db: bool,
) -> Vec<String> {
    let table = table_ref(change, prefix_db);
    change
        .rows
        .iter()
        .map(|row| {
            let cond = eq_conditions(slots, row, key_idx, full_image).join(" AND ");
            format!("DELETE FROM {} WHERE {};", table, cond)
        })
        .collect()
}

fn gen_updates(
    change: &RowChange,
    slots: &[FieldSlot],
    key_idx: &[usize],
    full_image: bool,
    rollback: bool,
    prefix_db: bool,
) -> Vec<String> {
    let table = table_ref(change, prefix_db);
    let mut out = Vec::with_capacity(change.rows.len() / 2);
    for pair in change.rows.chunks_exact(2) {
        let (before, after) = (&pair[0], &pair[1]);
        // a forward update sets the after image keyed on the before image;
        // the rollback reverses both
        let (set_from, other, where_row) = if rollback {
            (before, after, after)
        } else {
            (after, before, before)
        };
        let assignments: Vec<String> = (0..slots.len().min(set_from.len()))
            .filter(|&i| full_image || !values_equal(&slots[i], &set_from[i], &other[i]))
            .map(|i| {
                format!(
                    "{}={}",
                    quote_ident(&slots[i].name),
                    literal(&slots[i], &set_from[i])
                )
            })
            .collect();
        if assignments.is_empty() {
            continue;
        }
        let cond = eq_conditions(slots, where_row, key_idx, full_image).join(" AND ");
        out.push(format!(
            "UPDATE {} SET {} WHERE {};",
            table,
            assignments.join(","),
            cond
        ));
    }
    out
}

/// Convert one row-change envelope into its SQL statements, forward or
/// rollback depending on the configured work type.
///
/// Rollback semantics: an insert rolls back as a delete keyed on the
/// inserted image, a delete as an insert of the deleted image (primary key
/// included), an update as the reversed update keyed on the after image.
pub fn generate_statements(
    change: &RowChange,
    kind: DmlKind,
    tbl: &TableDef,
    cfg: &Config,
) -> Result<Vec<String>, ColumnParseError> {
    let slots = reconcile_fields(change, tbl)?;
    let clamp = |idx: Vec<usize>| -> Vec<usize> {
        idx.into_iter().filter(|i| *i < slots.len()).collect()
    };
    let key_idx = clamp(tbl.key_column_indexes(tbl.where_key()));
    let primary_idx = clamp(tbl.key_column_indexes(&tbl.primary_key));
    let rollback = cfg.work_type == WorkType::Rollback;

    Ok(match (kind, rollback) {
        (DmlKind::Insert, false) => gen_inserts(
            change,
            &slots,
            &primary_idx,
            cfg.rows_per_insert,
            cfg.prefix_db,
            cfg.ignore_primary_on_insert,
        ),
        (DmlKind::Insert, true) => {
            gen_deletes(change, &slots, &key_idx, cfg.full_image, cfg.prefix_db)
        }
        (DmlKind::Delete, false) => {
            gen_deletes(change, &slots, &key_idx, cfg.full_image, cfg.prefix_db)
        }
        (DmlKind::Delete, true) => gen_inserts(
            change,
            &slots,
            &primary_idx,
            cfg.rows_per_insert,
            cfg.prefix_db,
            false,
        ),
        (DmlKind::Update, _) => gen_updates(
            change,
            &slots,
            &key_idx,
            cfg.full_image,
            rollback,
            cfg.prefix_db,
        ),
        (DmlKind::Query, _) => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_types::ColumnSpec;
    use crate::schema::{ColumnInfo, TableDef};

    fn int_varchar_table(primary: &[&str]) -> TableDef {
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
            ],
            primary_key: primary.iter().map(|s| s.to_string()).collect(),
            unique_keys: Vec::new(),
        }
    }

    fn change_with_rows(rows: Vec<Vec<MySQLValue>>) -> RowChange {
        RowChange {
            schema_name: "db1".to_owned(),
            table_name: "t".to_owned(),
            columns: vec![ColumnSpec::new(3, 0), ColumnSpec::new(15, 40)],
            rows,
        }
    }

    fn row(a: i64, b: &str) -> Vec<MySQLValue> {
        vec![
            MySQLValue::SignedInteger(a),
            MySQLValue::String(b.to_owned()),
        ]
    }

    fn forward_config() -> Config {
        Config {
            rows_per_insert: 10,
            prefix_db: true,
            ..Config::default()
        }
    }

    fn rollback_config() -> Config {
        Config {
            work_type: WorkType::Rollback,
            rows_per_insert: 10,
            ..Config::default()
        }
    }

    #[test]
    fn test_insert_batches_rows() {
        let tbl = int_varchar_table(&["a"]);
        let change = change_with_rows(vec![row(1, "x"), row(2, "y")]);
        let stmts =
            generate_statements(&change, DmlKind::Insert, &tbl, &forward_config()).unwrap();
        assert_eq!(
            stmts,
            vec!["INSERT INTO `db1`.`t` (`a`,`b`) VALUES (1,'x'),(2,'y');".to_owned()]
        );
    }

    #[test]
    fn test_insert_respects_rows_per_insert() {
        let tbl = int_varchar_table(&["a"]);
        let change = change_with_rows(vec![row(1, "x"), row(2, "y"), row(3, "z")]);
        let cfg = Config {
            rows_per_insert: 2,
            ..Config::default()
        };
        let stmts = generate_statements(&change, DmlKind::Insert, &tbl, &cfg).unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(
            stmts[0],
            "INSERT INTO `db1`.`t` (`a`,`b`) VALUES (1,'x'),(2,'y');"
        );
        assert_eq!(stmts[1], "INSERT INTO `db1`.`t` (`a`,`b`) VALUES (3,'z');");
    }

    #[test]
    fn test_insert_can_omit_primary_key() {
        let tbl = int_varchar_table(&["a"]);
        let change = change_with_rows(vec![row(1, "x")]);
        let cfg = Config {
            ignore_primary_on_insert: true,
            ..Config::default()
        };
        let stmts = generate_statements(&change, DmlKind::Insert, &tbl, &cfg).unwrap();
        assert_eq!(stmts, vec!["INSERT INTO `db1`.`t` (`b`) VALUES ('x');"]);
        // without a known primary key the flag is a no-op
        let tbl = int_varchar_table(&[]);
        let stmts = generate_statements(&change, DmlKind::Insert, &tbl, &cfg).unwrap();
        assert_eq!(stmts, vec!["INSERT INTO `db1`.`t` (`a`,`b`) VALUES (1,'x');"]);
    }

    #[test]
    fn test_delete_uses_key_columns() {
        let tbl = int_varchar_table(&["a"]);
        let change = change_with_rows(vec![row(1, "x")]);
        let stmts =
            generate_statements(&change, DmlKind::Delete, &tbl, &forward_config()).unwrap();
        assert_eq!(stmts, vec!["DELETE FROM `db1`.`t` WHERE `a`=1;"]);
    }

    #[test]
    fn test_delete_without_key_uses_full_image() {
        let tbl = int_varchar_table(&[]);
        let change = change_with_rows(vec![row(1, "x")]);
        let stmts =
            generate_statements(&change, DmlKind::Delete, &tbl, &forward_config()).unwrap();
        assert_eq!(
            stmts,
            vec!["DELETE FROM `db1`.`t` WHERE `a`=1 AND `b`='x';"]
        );
    }

    #[test]
    fn test_update_sets_only_changed_columns() {
        let tbl = int_varchar_table(&["a"]);
        let change = change_with_rows(vec![row(1, "x"), row(1, "z")]);
        let stmts =
            generate_statements(&change, DmlKind::Update, &tbl, &forward_config()).unwrap();
        assert_eq!(stmts, vec!["UPDATE `db1`.`t` SET `b`='z' WHERE `a`=1;"]);
    }

    #[test]
    fn test_update_rollback_reverses_images() {
        let tbl = int_varchar_table(&["a"]);
        let change = change_with_rows(vec![row(1, "x"), row(1, "z")]);
        let stmts =
            generate_statements(&change, DmlKind::Update, &tbl, &rollback_config()).unwrap();
        assert_eq!(stmts, vec!["UPDATE `db1`.`t` SET `b`='x' WHERE `a`=1;"]);
    }

    #[test]
    fn test_update_full_image_sets_everything() {
        let tbl = int_varchar_table(&["a"]);
        let change = change_with_rows(vec![row(1, "x"), row(1, "z")]);
        let cfg = Config {
            full_image: true,
            ..Config::default()
        };
        let stmts = generate_statements(&change, DmlKind::Update, &tbl, &cfg).unwrap();
        assert_eq!(
            stmts,
            vec!["UPDATE `db1`.`t` SET `a`=1,`b`='z' WHERE `a`=1 AND `b`='x';"]
        );
    }

    #[test]
    fn test_insert_rollback_is_keyed_delete() {
        let tbl = int_varchar_table(&["a"]);
        let change = change_with_rows(vec![row(1, "x")]);
        let stmts =
            generate_statements(&change, DmlKind::Insert, &tbl, &rollback_config()).unwrap();
        assert_eq!(stmts, vec!["DELETE FROM `db1`.`t` WHERE `a`=1;"]);
    }

    #[test]
    fn test_delete_rollback_reinserts_primary_key() {
        let tbl = int_varchar_table(&["a"]);
        let change = change_with_rows(vec![row(1, "x")]);
        let cfg = Config {
            work_type: WorkType::Rollback,
            ignore_primary_on_insert: true,
            ..Config::default()
        };
        let stmts = generate_statements(&change, DmlKind::Delete, &tbl, &cfg).unwrap();
        // the rollback insert always carries the primary key
        assert_eq!(stmts, vec!["INSERT INTO `db1`.`t` (`a`,`b`) VALUES (1,'x');"]);
    }

    #[test]
    fn test_dropped_columns_get_synthetic_names() {
        let tbl = int_varchar_table(&[]);
        let mut change = change_with_rows(vec![vec![
            MySQLValue::SignedInteger(1),
            MySQLValue::String("x".to_owned()),
            MySQLValue::SignedInteger(9),
        ]]);
        change.columns.push(ColumnSpec::new(3, 0));
        let stmts =
            generate_statements(&change, DmlKind::Insert, &tbl, &forward_config()).unwrap();
        assert_eq!(
            stmts,
            vec!["INSERT INTO `db1`.`t` (`a`,`b`,`dropped_field_0`) VALUES (1,'x',9);"]
        );
    }

    #[test]
    fn test_null_in_where_uses_is_null() {
        let tbl = int_varchar_table(&[]);
        let change = change_with_rows(vec![vec![
            MySQLValue::SignedInteger(1),
            MySQLValue::Null,
        ]]);
        let stmts =
            generate_statements(&change, DmlKind::Delete, &tbl, &forward_config()).unwrap();
        assert_eq!(
            stmts,
            vec!["DELETE FROM `db1`.`t` WHERE `a`=1 AND `b` IS NULL;"]
        );
    }

    #[test]
    fn test_no_db_prefix() {
        let tbl = int_varchar_table(&["a"]);
        let change = change_with_rows(vec![row(1, "x")]);
        let cfg = Config {
            prefix_db: false,
            ..Config::default()
        };
        let stmts = generate_statements(&change, DmlKind::Insert, &tbl, &cfg).unwrap();
        assert_eq!(stmts, vec!["INSERT INTO `t` (`a`,`b`) VALUES (1,'x');"]);
    }

    #[test]
    fn test_unsigned_wraparound() {
        let mut tbl = int_varchar_table(&[]);
        tbl.columns[0].unsigned = true;
        let change = change_with_rows(vec![vec![
            MySQLValue::SignedInteger(-56),
            MySQLValue::String("x".to_owned()),
        ]]);
        let stmts =
            generate_statements(&change, DmlKind::Insert, &tbl, &forward_config()).unwrap();
        // -56 as an unsigned 32-bit INT
        assert_eq!(
            stmts,
            vec![format!(
                "INSERT INTO `db1`.`t` (`a`,`b`) VALUES ({},'x');",
                -56i64 + (1 << 32)
            )]
        );
    }

    #[test]
    fn test_rollback_mirrors_forward_of_inverse_change() {
        // the rollback of a change is the forward translation of the
        // inverse change, so applying forward then rollback SQL restores
        // the starting state
        let tbl = int_varchar_table(&["a"]);
        let forward = forward_config();
        let rollback = rollback_config();

        let insert = change_with_rows(vec![row(1, "x"), row(2, "y")]);
        assert_eq!(
            generate_statements(&insert, DmlKind::Insert, &tbl, &rollback).unwrap(),
            generate_statements(&insert, DmlKind::Delete, &tbl, &forward).unwrap()
        );
        assert_eq!(
            generate_statements(&insert, DmlKind::Delete, &tbl, &rollback).unwrap(),
            generate_statements(&insert, DmlKind::Insert, &tbl, &forward).unwrap()
        );

        let update = change_with_rows(vec![row(1, "x"), row(2, "y")]);
        let swapped = change_with_rows(vec![row(2, "y"), row(1, "x")]);
        assert_eq!(
            generate_statements(&update, DmlKind::Update, &tbl, &rollback).unwrap(),
            generate_statements(&swapped, DmlKind::Update, &tbl, &forward).unwrap()
        );
    }

    #[test]
    fn test_text_blob_renders_as_string() {
        let mut tbl = int_varchar_table(&[]);
        tbl.columns[1].type_name = "mediumtext".to_owned();
        let mut change = change_with_rows(vec![vec![
            MySQLValue::SignedInteger(1),
            MySQLValue::Blob(b"hello".to_vec().into()),
        ]]);
        change.columns[1] = ColumnSpec::new(252, 2);
        let stmts =
            generate_statements(&change, DmlKind::Insert, &tbl, &forward_config()).unwrap();
        assert_eq!(
            stmts,
            vec!["INSERT INTO `db1`.`t` (`a`,`b`) VALUES (1,'hello');"]
        );
    }
}
