use std::fmt;

use pg_escape::quote_identifier;

/// Schema of tables named without one.
pub const DEFAULT_SCHEMA: &str = "public";

/// A table name split into schema and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedTable {
    pub schema: String,
    pub name: String,
}

impl QualifiedTable {
    /// Parses `schema.table`, or `table` which lives in [`DEFAULT_SCHEMA`].
    pub fn parse(table_name: &str) -> Self {
        match table_name.split_once('.') {
            Some((schema, name)) => Self {
                schema: schema.to_string(),
                name: name.to_string(),
            },
            None => Self {
                schema: DEFAULT_SCHEMA.to_string(),
                name: table_name.to_string(),
            },
        }
    }

    /// Returns the table name as a quoted Postgres identifier.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }
}

impl fmt::Display for QualifiedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Which source rows an extraction reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter<'a> {
    All,
    /// Rows with `column` above the bound passed as `$1`, if `bounded_below`, and at most the
    /// bound passed as the last parameter. Bounds are cast to `column_type`.
    Watermark {
        column: &'a str,
        column_type: &'a str,
        bounded_below: bool,
    },
    /// Rows with `column` at or after the timestamp passed as `$1`.
    Since { column: &'a str },
}

/// `select` returning every matching row of `table` as one JSON text value.
pub fn select_rows(table: &QualifiedTable, filter: &RowFilter<'_>) -> String {
    let table = table.as_quoted_identifier();
    let condition = match filter {
        RowFilter::All => String::new(),
        RowFilter::Watermark {
            column,
            column_type,
            bounded_below: true,
        } => {
            let column = quote_identifier(column);
            format!(" where t.{column} > $1::{column_type} and t.{column} <= $2::{column_type}")
        }
        RowFilter::Watermark {
            column,
            column_type,
            bounded_below: false,
        } => {
            let column = quote_identifier(column);
            format!(" where t.{column} <= $1::{column_type}")
        }
        RowFilter::Since { column } => {
            format!(" where t.{} >= $1", quote_identifier(column))
        }
    };

    format!("select row_to_json(t)::text from {table} as t{condition}")
}

/// Highest value of `column` in `table`, rendered as text.
pub fn max_value(table: &QualifiedTable, column: &str) -> String {
    format!(
        "select max({})::text from {}",
        quote_identifier(column),
        table.as_quoted_identifier()
    )
}

pub fn truncate(table: &QualifiedTable) -> String {
    format!("truncate table {}", table.as_quoted_identifier())
}

/// Deletes the rows of `table` with `column` at or after the timestamp passed as `$1`.
pub fn delete_since(table: &QualifiedTable, column: &str) -> String {
    format!(
        "delete from {} where {} >= $1",
        table.as_quoted_identifier(),
        quote_identifier(column)
    )
}

/// Inserts the rows of the JSON array passed as `$1`, matched to columns by name.
pub fn insert_json(table: &QualifiedTable) -> String {
    let table = table.as_quoted_identifier();

    format!("insert into {table} select * from json_populate_recordset(null::{table}, $1::json)")
}

/// Like [`insert_json`], but rows conflicting on `primary_key` replace the existing ones.
pub fn upsert_json(table: &QualifiedTable, columns: &[String], primary_key: &[String]) -> String {
    let insert = insert_json(table);
    let conflict = quote_list(primary_key);

    let updates: Vec<String> = columns
        .iter()
        .filter(|column| !primary_key.contains(column))
        .map(|column| {
            let column = quote_identifier(column);
            format!("{column} = excluded.{column}")
        })
        .collect();

    if updates.is_empty() {
        format!("{insert} on conflict ({conflict}) do nothing")
    } else {
        format!(
            "{insert} on conflict ({conflict}) do update set {}",
            updates.join(", ")
        )
    }
}

fn quote_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| quote_identifier(column).into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> QualifiedTable {
        QualifiedTable::parse("crm.accounts")
    }

    #[test]
    fn unqualified_tables_live_in_public() {
        let table = QualifiedTable::parse("accounts");

        assert_eq!(table.schema, "public");
        assert_eq!(table.to_string(), "public.accounts");
    }

    #[test]
    fn identifiers_are_quoted_when_needed() {
        let table = QualifiedTable::parse("Sales.order items");

        assert_eq!(table.as_quoted_identifier(), r#""Sales"."order items""#);
        assert_eq!(accounts().as_quoted_identifier(), "crm.accounts");
    }

    #[test]
    fn select_rows_applies_filters() {
        assert_eq!(
            select_rows(&accounts(), &RowFilter::All),
            "select row_to_json(t)::text from crm.accounts as t"
        );
        assert_eq!(
            select_rows(
                &accounts(),
                &RowFilter::Watermark {
                    column: "updated_at",
                    column_type: "timestamp with time zone",
                    bounded_below: true,
                }
            ),
            "select row_to_json(t)::text from crm.accounts as t where t.updated_at > \
             $1::timestamp with time zone and t.updated_at <= $2::timestamp with time zone"
        );
        assert_eq!(
            select_rows(
                &accounts(),
                &RowFilter::Watermark {
                    column: "id",
                    column_type: "bigint",
                    bounded_below: false,
                }
            ),
            "select row_to_json(t)::text from crm.accounts as t where t.id <= $1::bigint"
        );
        assert_eq!(
            select_rows(&accounts(), &RowFilter::Since { column: "createdAt" }),
            r#"select row_to_json(t)::text from crm.accounts as t where t."createdAt" >= $1"#
        );
    }

    #[test]
    fn upsert_updates_every_non_key_column() {
        let columns = vec!["id".to_string(), "email".to_string(), "score".to_string()];
        let primary_key = vec!["id".to_string()];

        assert_eq!(
            upsert_json(&accounts(), &columns, &primary_key),
            "insert into crm.accounts select * from json_populate_recordset(null::crm.accounts, \
             $1::json) on conflict (id) do update set email = excluded.email, score = excluded.score"
        );
    }

    #[test]
    fn upsert_of_key_only_tables_ignores_conflicts() {
        let columns = vec!["a".to_string(), "b".to_string()];

        assert!(upsert_json(&accounts(), &columns, &columns).ends_with("on conflict (a, b) do nothing"));
    }

    #[test]
    fn maintenance_statements() {
        assert_eq!(truncate(&accounts()), "truncate table crm.accounts");
        assert_eq!(
            delete_since(&accounts(), "updated_at"),
            "delete from crm.accounts where updated_at >= $1"
        );
        assert_eq!(
            max_value(&accounts(), "updated_at"),
            "select max(updated_at)::text from crm.accounts"
        );
    }
}
