//! UPDATE and UPSERT with orphan handling.

use super::select::ReadFor;
use super::{OnError, Scope, Storage};
use crate::callback::Operation;
use crate::table::{Entity, TableColumn};
use relmap_core::Result;
use relmap_query::{Expr, Update};
use std::collections::HashSet;

impl<E: Entity> Storage<E> {
    /// Update one entity by primary key.
    ///
    /// On failure an implicitly opened transaction stays attached.
    #[tracing::instrument(level = "debug", skip_all, fields(table = self.table.name()))]
    pub fn update(&mut self, entity: &mut E) -> Result<()> {
        self.within_transaction(OnError::Keep, |storage| {
            let scope = storage.scope()?;
            storage.update_entity(entity, &scope)
        })
    }

    /// Update a batch; an implicitly opened transaction is rolled back on
    /// failure.
    #[tracing::instrument(level = "debug", skip_all, fields(table = self.table.name(), count = entities.len()))]
    pub fn update_all(&mut self, entities: &mut [E]) -> Result<()> {
        self.within_transaction(OnError::Rollback, |storage| {
            let scope = storage.scope()?;
            for entity in entities.iter_mut() {
                storage.update_entity(entity, &scope)?;
            }
            Ok(())
        })
    }

    /// Update the entity when its key is stored, insert it otherwise.
    #[tracing::instrument(level = "debug", skip_all, fields(table = self.table.name()))]
    pub fn upsert(&mut self, entity: &mut E) -> Result<()> {
        self.within_transaction(OnError::Keep, |storage| {
            let scope = storage.scope()?;
            storage.upsert_entity(entity, &scope)
        })
    }

    /// Upsert a batch inside one transaction.
    #[tracing::instrument(level = "debug", skip_all, fields(table = self.table.name(), count = entities.len()))]
    pub fn upsert_all(&mut self, entities: &mut [E]) -> Result<()> {
        self.within_transaction(OnError::Rollback, |storage| {
            let scope = storage.scope()?;
            for entity in entities.iter_mut() {
                storage.upsert_entity(entity, &scope)?;
            }
            Ok(())
        })
    }

    fn upsert_entity(&self, entity: &mut E, scope: &Scope) -> Result<()> {
        if self.contains(entity)? {
            self.update_entity(entity, scope)
        } else {
            self.insert_entities(std::slice::from_mut(entity))
        }
    }

    fn update_entity(&self, entity: &mut E, scope: &Scope) -> Result<()> {
        self.before(Operation::Update, entity)?;
        let table = &self.table;
        let info = table.info();
        let key = table.key_of(entity);

        if table.references().any(|r| r.relation_type().is_inverse()) {
            if let Some(stored) = self.fetch_by_key(&key, ReadFor::Internal)? {
                for reference in table.references() {
                    if reference.relation_type().is_inverse() {
                        reference
                            .binding()
                            .handle_orphans(&stored, entity, scope)?;
                    }
                }
            }
        }

        let mut written = HashSet::from([info.primary_key()]);
        let mut update = Update::new(info.table_ref());
        for column in table.columns() {
            match column {
                TableColumn::Plain(plain) => {
                    if written.insert(plain.name()) {
                        update = update.set(plain.name(), plain.sql_value(entity));
                    }
                }
                TableColumn::Reference(reference) if reference.relation_type().is_forward() => {
                    let binding = reference.binding();
                    if reference.cascade_flags().merges() {
                        binding.upsert_nested(entity, scope)?;
                    }
                    if written.insert(reference.name()) {
                        let value = self.forward_value(reference, entity)?;
                        update = update.set(reference.name(), value);
                    }
                }
                TableColumn::Reference(_) => {}
            }
        }

        if !update.is_empty() {
            let update = update.filter(Expr::col(info.primary_key()).eq(key.clone()));
            let affected = self.execute_sql(&update.to_sql(self.driver.dialect()))?;
            tracing::trace!(table = table.name(), affected, "row updated");
        }

        for reference in table.references() {
            if reference.relation_type().is_inverse() && reference.cascade_flags().merges() {
                reference.binding().upsert_children(entity, &key, scope)?;
            }
        }
        self.after(Operation::Update, entity)
    }
}
