//! SELECT execution and entity reconstruction.

use super::join::{JoinPlan, Route};
use super::{QueryState, Storage, merge_by_key};
use crate::callback::Operation;
use crate::table::{Entity, Table, TableColumn, TableInfo};
use relmap_core::{Result, Row, SqlValue, is_null_sentinel};
use relmap_query::{Expr, Select};

/// Rebuilds entities from flat joined rows.
///
/// A context stands for one position in the join plan: the table read there
/// and the alias its columns come back under. Relations are only descended
/// into when the plan joined them from this position.
pub(crate) struct LoadContext<'a> {
    plan: &'a JoinPlan,
    route: Route,
    alias: &'a str,
    info: &'a TableInfo,
}

impl<'a> LoadContext<'a> {
    fn root(plan: &'a JoinPlan, info: &'a TableInfo) -> Self {
        Self {
            plan,
            route: Route::new(),
            alias: info.name(),
            info,
        }
    }

    pub(crate) fn info(&self) -> &TableInfo {
        self.info
    }

    /// Result column name of `column` at this position.
    pub(crate) fn column(&self, column: &str) -> String {
        format!("{}.{}", self.alias, column)
    }

    /// Context for the reference at `index`, when the plan joined it.
    fn child(&self, index: usize) -> Option<LoadContext<'a>> {
        let info: &'a TableInfo = &self.info.references().get(index)?.target;
        let mut route = self.route.clone();
        route.push(index);
        let alias = self.plan.alias(&route)?;
        Some(LoadContext {
            plan: self.plan,
            route,
            alias,
            info,
        })
    }

    /// Read one entity of `table` from `row`; `None` when its key is NULL.
    pub(crate) fn read<N: Entity>(&self, table: &Table<N>, row: &Row) -> Result<Option<N>> {
        if row.is_null(&self.column(table.info().primary_key())) {
            return Ok(None);
        }

        let mut entity = table.empty_entity();
        let mut references = 0;
        for column in table.columns() {
            match column {
                TableColumn::Plain(plain) => {
                    let Some(raw) = row.get_by_name(&self.column(plain.name())) else {
                        continue;
                    };
                    if !is_null_sentinel(raw) {
                        plain.set_value(&mut entity, raw)?;
                    }
                }
                TableColumn::Reference(reference) => {
                    let index = references;
                    references += 1;
                    if let Some(nested) = self.child(index) {
                        reference.binding().load(&mut entity, row, self, &nested)?;
                    }
                }
            }
        }
        Ok(Some(entity))
    }
}

/// Who a select answers to. Only reads for the caller reach the
/// `Select` callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ReadFor {
    Caller,
    /// Existence checks and old-state reads inside another operation.
    Internal,
}

impl<E: Entity> Storage<E> {
    /// Run the configured query, consuming the query configuration.
    #[tracing::instrument(level = "debug", skip(self), fields(table = self.table.name()))]
    pub fn select(&mut self) -> Result<Vec<E>> {
        let query = std::mem::take(&mut self.query);
        self.run_select(query, ReadFor::Caller)
    }

    /// First entity of the configured query.
    pub fn get(&mut self) -> Result<Option<E>> {
        self.limit(1);
        Ok(self.select()?.into_iter().next())
    }

    /// Entity with the given primary key, relations loaded.
    ///
    /// The query configuration is left untouched.
    pub fn get_by_id<K: SqlValue>(&self, key: &K) -> Result<Option<E>> {
        self.fetch_by_key(&key.to_sql_string(), ReadFor::Caller)
    }

    /// Whether a row with the entity's primary key exists.
    ///
    /// An entity whose key is null is never stored. The query configuration
    /// is left untouched and no `Select` callback runs.
    pub fn contains(&self, entity: &E) -> Result<bool> {
        let primary_key = self.table.primary_key();
        if primary_key.is_null(entity) {
            return Ok(false);
        }
        let query = QueryState {
            condition: Some(self.key_condition(&primary_key.get_value(entity))),
            without_related: true,
            ..QueryState::default()
        };
        Ok(!self.run_select(query, ReadFor::Internal)?.is_empty())
    }

    /// Number of rows matching the configured query, which is consumed.
    pub fn count(&mut self) -> Result<usize> {
        let mut query = std::mem::take(&mut self.query);
        query.without_related = true;
        Ok(self.run_select(query, ReadFor::Internal)?.len())
    }

    pub(super) fn fetch_by_key(&self, key: &str, read_for: ReadFor) -> Result<Option<E>> {
        let query = QueryState {
            condition: Some(self.key_condition(key)),
            ..QueryState::default()
        };
        Ok(self.run_select(query, read_for)?.into_iter().next())
    }

    fn key_condition(&self, key: &str) -> Expr {
        self.table
            .col(self.table.info().primary_key())
            .eq(key.to_string())
    }

    fn run_select(&self, query: QueryState, read_for: ReadFor) -> Result<Vec<E>> {
        let info = self.table.info();
        let plan = JoinPlan::build(info, !query.without_related);
        let joined = !plan.joins.is_empty();
        let page_in_memory = plan.fans_out && (query.limit.is_some() || query.offset.is_some());

        let mut select = Select::new(info.table_ref()).columns(plan.columns.clone());
        for join in &plan.joins {
            select = select.join(join.clone());
        }
        if let Some(condition) = query.condition {
            select = select.filter(condition);
        }
        for order in query.order {
            select = select.order_by(order);
        }
        if !page_in_memory {
            if let Some(limit) = query.limit {
                select = select.limit(limit);
            }
            if let Some(offset) = query.offset {
                select = select.offset(offset);
            }
        }

        let rows = self.query_sql(&select.to_sql(self.driver.dialect()))?;
        let ctx = LoadContext::root(&plan, info);
        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(entity) = ctx.read(&self.table, row)? {
                entities.push(entity);
            }
        }
        if joined {
            entities = merge_by_key(&self.table, entities);
        }
        if page_in_memory {
            let offset = usize::try_from(query.offset.unwrap_or(0)).unwrap_or(usize::MAX);
            let limit = query
                .limit
                .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
            entities = entities.into_iter().skip(offset).take(limit).collect();
        }

        if read_for == ReadFor::Caller {
            for entity in &mut entities {
                self.after(Operation::Select, entity)?;
            }
        }
        tracing::debug!(
            table = self.table.name(),
            rows = rows.len(),
            entities = entities.len(),
            "Select completed"
        );
        Ok(entities)
    }
}
