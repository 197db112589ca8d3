use std::collections::HashSet;

use mirror_config::shared::SyncPlanConfig;
use tracing::{debug, info};

use crate::bail;
use crate::connection::{Connection, ConnectionCache, ConnectionFactory};
use crate::error::{ErrorKind, SyncResult};
use crate::plan::TableLoadSpec;

/// The tables a run operates on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TableSelection {
    /// Every table of the plan, with its configured settings.
    #[default]
    All,
    /// Only the named tables, forced into batch and refresh-recent runs.
    Only(Vec<String>),
}

impl TableSelection {
    /// Selects the given names, or every table when `names` is empty.
    pub fn from_names(names: Vec<String>) -> Self {
        if names.is_empty() {
            TableSelection::All
        } else {
            TableSelection::Only(names)
        }
    }
}

/// Resolves the configured sync plans into one table plan.
///
/// Plans are enumerated in order against their source connection. A table listed by more than
/// one plan keeps the spec of its first occurrence, later ones are dropped without merging.
pub async fn resolve_table_plan<F>(
    plans: &[SyncPlanConfig],
    connections: &mut ConnectionCache<F>,
) -> SyncResult<Vec<TableLoadSpec>>
where
    F: ConnectionFactory,
{
    let mut specs = Vec::new();
    for plan in plans {
        let connection = connections.source(&plan.source)?;
        specs.extend(enumerate_plan(plan, &connection).await?);
    }

    let specs = dedupe_by_table_name(specs);
    info!(tables = specs.len(), "table plan resolved");

    Ok(specs)
}

/// Narrows `plan` down to `selection`.
///
/// With [`TableSelection::Only`], every requested name must be part of the plan, otherwise the
/// call fails with [`ErrorKind::UnknownTable`] naming all unknown tables. Selected tables are
/// forced into batch loads and refresh-recent runs, keeping an explicitly configured
/// refresh-recent column.
pub fn select_tables(
    plan: &[TableLoadSpec],
    selection: &TableSelection,
) -> SyncResult<Vec<TableLoadSpec>> {
    let names = match selection {
        TableSelection::All => return Ok(plan.to_vec()),
        TableSelection::Only(names) => names,
    };

    let known: HashSet<&str> = plan.iter().map(|spec| spec.table_name.as_str()).collect();
    let mut unknown: Vec<&str> = Vec::new();
    for name in names {
        if !known.contains(name.as_str()) && !unknown.contains(&name.as_str()) {
            unknown.push(name);
        }
    }

    if !unknown.is_empty() {
        bail!(
            ErrorKind::UnknownTable,
            "Requested tables are not part of the table plan",
            unknown.join(", ")
        );
    }

    let requested: HashSet<&str> = names.iter().map(String::as_str).collect();
    let selected = plan
        .iter()
        .filter(|spec| requested.contains(spec.table_name.as_str()))
        .cloned()
        .map(|mut spec| {
            spec.batch_load = true;
            spec.refresh_recent = spec.refresh_recent.enabled();
            spec
        })
        .collect();

    Ok(selected)
}

/// Lists the specs of one plan: explicit tables first, then tables discovered in its schema.
async fn enumerate_plan<C>(plan: &SyncPlanConfig, connection: &C) -> SyncResult<Vec<TableLoadSpec>>
where
    C: Connection,
{
    let mut specs: Vec<TableLoadSpec> = plan
        .tables
        .iter()
        .map(|table| TableLoadSpec::from_config(&plan.source, table, &plan.defaults))
        .collect();

    if let Some(schema) = &plan.schema {
        let discovered = connection.list_tables(schema).await?;
        debug!(
            source = %plan.source,
            schema = %schema,
            tables = discovered.len(),
            "discovered source tables"
        );

        for table in discovered {
            let table_name = format!("{schema}.{table}");
            if specs.iter().all(|spec| spec.table_name != table_name) {
                specs.push(TableLoadSpec::with_defaults(
                    &plan.source,
                    table_name,
                    &plan.defaults,
                ));
            }
        }
    }

    Ok(specs)
}

fn dedupe_by_table_name(specs: Vec<TableLoadSpec>) -> Vec<TableLoadSpec> {
    let mut seen = HashSet::new();
    specs
        .into_iter()
        .filter(|spec| {
            let first = seen.insert(spec.table_name.clone());
            if !first {
                debug!(
                    table = %spec.table_name,
                    source = %spec.source,
                    "dropping duplicate table spec"
                );
            }
            first
        })
        .collect()
}
