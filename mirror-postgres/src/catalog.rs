//! Catalog lookups shared by load actions and connections.

use mirror::error::SyncResult;
use sqlx::PgPool;

use crate::sql::{self, QualifiedTable};

const LIST_TABLES: &str = r#"
    select table_name::text
    from information_schema.tables
    where table_schema = $1 and table_type = 'BASE TABLE'
    order by table_name
"#;

const COLUMN_TYPE: &str = r#"
    select format_type(a.atttypid, a.atttypmod)
    from pg_attribute a
    where a.attrelid = $1::regclass
      and a.attname = $2
      and a.attnum > 0
      and not a.attisdropped
"#;

const TABLE_COLUMNS: &str = r#"
    select a.attname::text
    from pg_attribute a
    where a.attrelid = $1::regclass
      and a.attnum > 0
      and not a.attisdropped
    order by a.attnum
"#;

const PRIMARY_KEY: &str = r#"
    select a.attname::text
    from pg_index i
    join pg_attribute a on a.attrelid = i.indrelid and a.attnum = any(i.indkey)
    where i.indrelid = $1::regclass and i.indisprimary
    order by array_position(i.indkey::int2[], a.attnum)
"#;

/// Names of the base tables of `schema`, sorted.
pub async fn list_tables(pool: &PgPool, schema: &str) -> SyncResult<Vec<String>> {
    let tables = sqlx::query_scalar::<_, String>(LIST_TABLES)
        .bind(schema)
        .fetch_all(pool)
        .await?;

    Ok(tables)
}

/// SQL type of `column`, or `None` when `table` has no such column.
pub async fn column_type(
    pool: &PgPool,
    table: &QualifiedTable,
    column: &str,
) -> SyncResult<Option<String>> {
    let column_type = sqlx::query_scalar::<_, String>(COLUMN_TYPE)
        .bind(table.as_quoted_identifier())
        .bind(column)
        .fetch_optional(pool)
        .await?;

    Ok(column_type)
}

/// Column names of `table` in table order.
pub async fn table_columns(pool: &PgPool, table: &QualifiedTable) -> SyncResult<Vec<String>> {
    let columns = sqlx::query_scalar::<_, String>(TABLE_COLUMNS)
        .bind(table.as_quoted_identifier())
        .fetch_all(pool)
        .await?;

    Ok(columns)
}

/// Primary key columns of `table` in key order, empty without a primary key.
pub async fn primary_key(pool: &PgPool, table: &QualifiedTable) -> SyncResult<Vec<String>> {
    let columns = sqlx::query_scalar::<_, String>(PRIMARY_KEY)
        .bind(table.as_quoted_identifier())
        .fetch_all(pool)
        .await?;

    Ok(columns)
}

/// Highest value of `column` in `table` as text, `None` for an empty table.
pub async fn max_value(
    pool: &PgPool,
    table: &QualifiedTable,
    column: &str,
) -> SyncResult<Option<String>> {
    let max = sqlx::query_scalar::<_, Option<String>>(&sql::max_value(table, column))
        .fetch_one(pool)
        .await?;

    Ok(max)
}
