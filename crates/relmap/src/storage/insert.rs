//! INSERT with cascading persistence.

use super::{OnError, Scope, Storage};
use crate::callback::Operation;
use crate::column::Cascade;
use crate::table::{Entity, TableColumn};
use relmap_core::{Error, Result, Row, is_null_sentinel};
use relmap_query::Insert;
use std::collections::HashSet;

impl<E: Entity> Storage<E> {
    /// Insert one entity, filling generated values back into it.
    #[tracing::instrument(level = "debug", skip_all, fields(table = self.table.name()))]
    pub fn insert(&mut self, entity: &mut E) -> Result<()> {
        self.within_transaction(OnError::Keep, |storage| {
            storage.insert_entities(std::slice::from_mut(entity))
        })
    }

    /// Insert a batch in one statement.
    #[tracing::instrument(level = "debug", skip_all, fields(table = self.table.name(), count = entities.len()))]
    pub fn insert_all(&mut self, entities: &mut [E]) -> Result<()> {
        self.within_transaction(OnError::Keep, |storage| storage.insert_entities(entities))
    }

    pub(super) fn insert_entities(&self, entities: &mut [E]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let scope = self.scope()?;

        let mut names = Vec::new();
        let mut rows = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            self.before(Operation::Insert, entity)?;
            let (row_names, row) = self.insert_row(entity, &scope)?;
            names = row_names;
            rows.push(row);
        }

        let returned = self.run_insert(names, rows)?;
        if returned.len() != entities.len() {
            return Err(Error::mismatch(
                format!("INSERT INTO {}", self.table.name()),
                format!(
                    "expected {} rows back from INSERT, got {}",
                    entities.len(),
                    returned.len()
                ),
            ));
        }
        for (entity, row) in entities.iter_mut().zip(&returned) {
            self.read_back(entity, row)?;
        }

        for entity in entities.iter_mut() {
            let key = self.table.key_of(entity);
            for reference in self.table.references() {
                if reference.relation_type().is_inverse() && reference.cascade(Cascade::PERSIST) {
                    reference.binding().upsert_children(entity, &key, &scope)?;
                }
            }
            self.after(Operation::Insert, entity)?;
        }

        tracing::debug!(
            table = self.table.name(),
            count = entities.len(),
            "Inserted entities"
        );
        Ok(())
    }

    /// Column names and values for one entity, persisting forward relations
    /// first when they cascade.
    fn insert_row(&self, entity: &mut E, scope: &Scope) -> Result<(Vec<String>, Vec<String>)> {
        let mut written = HashSet::new();
        let mut names = Vec::new();
        let mut values = Vec::new();
        for column in self.table.columns() {
            match column {
                TableColumn::Plain(plain) => {
                    if plain.settings().auto_increment || !written.insert(plain.name()) {
                        continue;
                    }
                    names.push(plain.name().to_string());
                    values.push(plain.sql_value(entity));
                }
                TableColumn::Reference(reference) if reference.relation_type().is_forward() => {
                    let binding = reference.binding();
                    if reference.cascade(Cascade::PERSIST) {
                        binding.upsert_nested(entity, scope)?;
                    }
                    if !written.insert(reference.name()) {
                        continue;
                    }
                    names.push(reference.name().to_string());
                    values.push(self.forward_value(reference, entity)?);
                }
                TableColumn::Reference(_) => {}
            }
        }
        Ok((names, values))
    }

    /// Execute the INSERT and return one row of physical columns per entity.
    fn run_insert(&self, names: Vec<String>, rows: Vec<Vec<String>>) -> Result<Vec<Row>> {
        let info = self.table.info();
        let dialect = self.driver.dialect();
        let returning: Vec<String> = info.columns().iter().map(|c| c.name.clone()).collect();

        let statements: Vec<Insert> = if names.is_empty() {
            // Nothing to bind: one DEFAULT VALUES insert per entity.
            rows.iter()
                .map(|_| Insert::new(info.table_ref()).returning(returning.clone()))
                .collect()
        } else {
            let mut insert = Insert::new(info.table_ref())
                .columns(names)
                .returning(returning);
            for row in rows {
                insert = insert.row(row);
            }
            vec![insert]
        };

        let mut returned = Vec::new();
        for insert in &statements {
            if self.driver.has_returning_capability() {
                returned.append(&mut self.query_sql(&insert.to_sql(dialect))?);
            } else {
                let fallback = insert.to_returning_fallback(dialect);
                tracing::trace!(statements = fallback.statements.len(), "insert via fallback");
                returned.append(&mut self.driver.returning_fallback(&self.target(), &fallback)?);
            }
        }
        Ok(returned)
    }

    /// Parse returned column values into the entity.
    fn read_back(&self, entity: &mut E, row: &Row) -> Result<()> {
        for column in self.table.columns() {
            let TableColumn::Plain(plain) = column else {
                continue;
            };
            match row.get_by_name(plain.name()) {
                Some(raw) if !is_null_sentinel(raw) => plain.set_value(entity, raw)?,
                _ => {}
            }
        }
        Ok(())
    }
}
