//! SQL statement builders.
//!
//! Every statement is parameterized; identifiers come from a validated
//! `EntityConfig` and are always double-quoted. Placeholders are numbered
//! in the order the storage layer binds values.

use sync_core::EntityConfig;

/// PostgreSQL accepts at most this many bind parameters per statement.
pub const MAX_PARAMS: usize = 65_535;

/// Upper bound on rows per multi-row statement.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Rows per statement for a statement binding `columns` values per row.
pub fn rows_per_statement(columns: usize) -> usize {
    (MAX_PARAMS / columns.max(1)).clamp(1, DEFAULT_BATCH_SIZE)
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name (`schema.table`).
pub fn quote_table(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `($1, $2), ($3, $4)` style value tuples starting at `$start`.
fn value_tuples(rows: usize, columns: usize, start: usize) -> String {
    let mut param_idx = start;
    let mut tuples = Vec::with_capacity(rows);
    for _ in 0..rows {
        let row: Vec<String> = (0..columns)
            .map(|_| {
                let p = format!("${param_idx}");
                param_idx += 1;
                p
            })
            .collect();
        tuples.push(format!("({})", row.join(", ")));
    }
    tuples.join(", ")
}

/// `"k1" = $n AND "k2" = $n+1` starting at `$start`.
fn key_equals(entity: &EntityConfig, start: usize) -> String {
    entity
        .key_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_ident(c), start + i))
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Membership predicate for `keys` composite keys, placeholders from `$1`.
fn key_in(entity: &EntityConfig, keys: usize) -> String {
    if entity.key_columns.len() == 1 {
        let placeholders: Vec<String> = (1..=keys).map(|i| format!("${i}")).collect();
        format!(
            "{} IN ({})",
            quote_ident(&entity.key_columns[0]),
            placeholders.join(", ")
        )
    } else {
        format!(
            "({}) IN ({})",
            column_list(&entity.key_columns),
            value_tuples(keys, entity.key_columns.len(), 1)
        )
    }
}

fn source_columns(entity: &EntityConfig) -> Vec<&str> {
    entity
        .key_columns
        .iter()
        .chain(entity.tracked_columns.iter())
        .chain([&entity.created_column, &entity.modified_column])
        .map(String::as_str)
        .collect()
}

fn staging_columns(entity: &EntityConfig) -> Vec<&str> {
    let mut columns = source_columns(entity);
    columns.push(&entity.start_column);
    columns.push(&entity.end_column);
    columns
}

fn current_columns(entity: &EntityConfig) -> Vec<&str> {
    entity
        .key_columns
        .iter()
        .chain(entity.tracked_columns.iter())
        .map(String::as_str)
        .collect()
}

fn history_columns(entity: &EntityConfig) -> Vec<&str> {
    let mut columns = current_columns(entity);
    columns.push(&entity.start_column);
    columns.push(&entity.end_column);
    columns
}

/// Number of values bound per staging row.
pub fn staging_width(entity: &EntityConfig) -> usize {
    entity.key_columns.len() + entity.tracked_columns.len() + 4
}

/// Number of values bound per current-state row.
pub fn current_width(entity: &EntityConfig) -> usize {
    entity.key_columns.len() + entity.tracked_columns.len()
}

/// Number of values bound per version row.
pub fn history_width(entity: &EntityConfig) -> usize {
    current_width(entity) + 2
}

/// Select source rows; with `changed_since` the statement takes the
/// created watermark as `$1` and the modified watermark as `$2`.
pub fn select_source(entity: &EntityConfig, changed_since: bool) -> String {
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list(&source_columns(entity)),
        quote_table(&entity.source_table)
    );
    if changed_since {
        sql.push_str(&format!(
            " WHERE {} > $1 OR {} > $2",
            quote_ident(&entity.created_column),
            quote_ident(&entity.modified_column)
        ));
    }
    sql
}

pub fn delete_staging(entity: &EntityConfig) -> String {
    format!("DELETE FROM {}", quote_table(&entity.staging_table))
}

pub fn insert_staging(entity: &EntityConfig, rows: usize) -> String {
    let columns = staging_columns(entity);
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_table(&entity.staging_table),
        column_list(&columns),
        value_tuples(rows, columns.len(), 1)
    )
}

pub fn select_staging(entity: &EntityConfig) -> String {
    format!(
        "SELECT {} FROM {}",
        column_list(&staging_columns(entity)),
        quote_table(&entity.staging_table)
    )
}

pub fn select_current(entity: &EntityConfig, table: &str, keys: usize) -> String {
    format!(
        "SELECT {} FROM {} WHERE {}",
        column_list(&current_columns(entity)),
        quote_table(table),
        key_in(entity, keys)
    )
}

/// Insert-or-update on the key columns. Requires a unique constraint over
/// the key columns of the current-state table.
pub fn upsert_current(entity: &EntityConfig, table: &str, rows: usize) -> String {
    let columns = current_columns(entity);
    let assignments: Vec<String> = entity
        .tracked_columns
        .iter()
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({}) DO UPDATE SET {}",
        quote_table(table),
        column_list(&columns),
        value_tuples(rows, columns.len(), 1),
        column_list(&entity.key_columns),
        assignments.join(", ")
    )
}

pub fn select_open_versions(entity: &EntityConfig, table: &str, keys: usize) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} IS NULL AND {}",
        column_list(&history_columns(entity)),
        quote_table(table),
        quote_ident(&entity.end_column),
        key_in(entity, keys)
    )
}

/// `$1` is the end marker, then the key values, then the version start.
pub fn close_version(entity: &EntityConfig, table: &str) -> String {
    let start_idx = 2 + entity.key_columns.len();
    format!(
        "UPDATE {} SET {} = $1 WHERE {} IS NULL AND {} AND {} = ${}",
        quote_table(table),
        quote_ident(&entity.end_column),
        quote_ident(&entity.end_column),
        key_equals(entity, 2),
        quote_ident(&entity.start_column),
        start_idx
    )
}

/// Tracked values first, then the key values.
pub fn update_open_version(entity: &EntityConfig, table: &str) -> String {
    let assignments: Vec<String> = entity
        .tracked_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_ident(c), i + 1))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {} IS NULL AND {}",
        quote_table(table),
        assignments.join(", "),
        quote_ident(&entity.end_column),
        key_equals(entity, entity.tracked_columns.len() + 1)
    )
}

pub fn insert_versions(entity: &EntityConfig, table: &str, rows: usize) -> String {
    let columns = history_columns(entity);
    format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_table(table),
        column_list(&columns),
        value_tuples(rows, columns.len(), 1)
    )
}

/// Layout of the watermark (control) relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkTable {
    pub table: String,
    pub entity_column: String,
    pub created_column: String,
    pub modified_column: String,
}

impl Default for WatermarkTable {
    fn default() -> Self {
        Self {
            table: "control_table".to_string(),
            entity_column: "table_name".to_string(),
            created_column: "max_created_date".to_string(),
            modified_column: "max_modified_date".to_string(),
        }
    }
}

impl WatermarkTable {
    pub fn named(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// `$1` = entity.
    pub fn select_sql(&self) -> String {
        format!(
            "SELECT {}, {} FROM {} WHERE {} = $1",
            quote_ident(&self.created_column),
            quote_ident(&self.modified_column),
            quote_table(&self.table),
            quote_ident(&self.entity_column)
        )
    }

    /// `$1` = entity, `$2` = max created, `$3` = max modified.
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}, {}, {}) VALUES ($1, $2, $3)",
            quote_table(&self.table),
            quote_ident(&self.entity_column),
            quote_ident(&self.created_column),
            quote_ident(&self.modified_column)
        )
    }

    /// `$1` = entity, `$2` = max created, `$3` = max modified.
    pub fn update_sql(&self) -> String {
        format!(
            "UPDATE {} SET {} = $2, {} = $3 WHERE {} = $1",
            quote_table(&self.table),
            quote_ident(&self.created_column),
            quote_ident(&self.modified_column),
            quote_ident(&self.entity_column)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers() -> EntityConfig {
        EntityConfig::new(
            "customers",
            "src_customers",
            "stg_customers",
            vec!["id".to_string()],
            vec!["name".to_string()],
        )
        .with_current_table("customers")
        .with_history_table("dw.customers_history")
    }

    fn orders() -> EntityConfig {
        EntityConfig::new(
            "orders",
            "src_orders",
            "stg_orders",
            vec!["order_id".to_string(), "region".to_string()],
            vec!["status".to_string(), "amount".to_string()],
        )
        .with_current_table("orders")
    }

    #[test]
    fn test_quote_table_handles_schema() {
        assert_eq!(quote_table("customers"), "\"customers\"");
        assert_eq!(quote_table("dw.customers"), "\"dw\".\"customers\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_select_source_full_and_incremental() {
        let e = customers();
        assert_eq!(
            select_source(&e, false),
            "SELECT \"id\", \"name\", \"created_date\", \"modified_date\" FROM \"src_customers\""
        );
        assert_eq!(
            select_source(&e, true),
            "SELECT \"id\", \"name\", \"created_date\", \"modified_date\" FROM \"src_customers\" \
             WHERE \"created_date\" > $1 OR \"modified_date\" > $2"
        );
    }

    #[test]
    fn test_insert_staging_numbers_placeholders_across_rows() {
        let sql = insert_staging(&customers(), 2);
        assert_eq!(
            sql,
            "INSERT INTO \"stg_customers\" (\"id\", \"name\", \"created_date\", \"modified_date\", \
             \"start_date\", \"end_date\") VALUES ($1, $2, $3, $4, $5, $6), ($7, $8, $9, $10, $11, $12)"
        );
        assert_eq!(staging_width(&customers()), 6);
    }

    #[test]
    fn test_select_current_single_and_composite_keys() {
        assert_eq!(
            select_current(&customers(), "customers", 3),
            "SELECT \"id\", \"name\" FROM \"customers\" WHERE \"id\" IN ($1, $2, $3)"
        );
        assert_eq!(
            select_current(&orders(), "orders", 2),
            "SELECT \"order_id\", \"region\", \"status\", \"amount\" FROM \"orders\" \
             WHERE (\"order_id\", \"region\") IN (($1, $2), ($3, $4))"
        );
    }

    #[test]
    fn test_upsert_current_updates_only_tracked_columns() {
        let sql = upsert_current(&orders(), "orders", 1);
        assert_eq!(
            sql,
            "INSERT INTO \"orders\" (\"order_id\", \"region\", \"status\", \"amount\") \
             VALUES ($1, $2, $3, $4) ON CONFLICT (\"order_id\", \"region\") \
             DO UPDATE SET \"status\" = EXCLUDED.\"status\", \"amount\" = EXCLUDED.\"amount\""
        );
    }

    #[test]
    fn test_version_statements() {
        let e = customers();
        assert_eq!(
            select_open_versions(&e, "dw.customers_history", 1),
            "SELECT \"id\", \"name\", \"start_date\", \"end_date\" FROM \"dw\".\"customers_history\" \
             WHERE \"end_date\" IS NULL AND \"id\" IN ($1)"
        );
        assert_eq!(
            close_version(&e, "h"),
            "UPDATE \"h\" SET \"end_date\" = $1 WHERE \"end_date\" IS NULL AND \"id\" = $2 \
             AND \"start_date\" = $3"
        );
        assert_eq!(
            update_open_version(&orders(), "h"),
            "UPDATE \"h\" SET \"status\" = $1, \"amount\" = $2 WHERE \"end_date\" IS NULL \
             AND \"order_id\" = $3 AND \"region\" = $4"
        );
        assert_eq!(history_width(&e), 4);
    }

    #[test]
    fn test_watermark_table_defaults() {
        let wt = WatermarkTable::default();
        assert_eq!(
            wt.select_sql(),
            "SELECT \"max_created_date\", \"max_modified_date\" FROM \"control_table\" \
             WHERE \"table_name\" = $1"
        );
        assert_eq!(
            WatermarkTable::named("etl.watermarks").update_sql(),
            "UPDATE \"etl\".\"watermarks\" SET \"max_created_date\" = $2, \
             \"max_modified_date\" = $3 WHERE \"table_name\" = $1"
        );
    }

    #[test]
    fn test_rows_per_statement_respects_parameter_limit() {
        assert_eq!(rows_per_statement(6), DEFAULT_BATCH_SIZE);
        assert_eq!(rows_per_statement(1000), 65);
        assert_eq!(rows_per_statement(100_000), 1);
    }
}
