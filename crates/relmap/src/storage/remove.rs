//! DELETE with cascading removal.

use super::{OnError, Storage};
use crate::callback::Operation;
use crate::column::Cascade;
use crate::table::Entity;
use relmap_core::Result;
use relmap_query::{Delete, Expr};

impl<E: Entity> Storage<E> {
    #[tracing::instrument(level = "debug", skip_all, fields(table = self.table.name()))]
    pub fn remove(&mut self, entity: &mut E) -> Result<()> {
        self.within_transaction(OnError::Keep, |storage| {
            storage.remove_entities(std::slice::from_mut(entity))
        })
    }

    /// Delete a batch with one statement.
    #[tracing::instrument(level = "debug", skip_all, fields(table = self.table.name(), count = entities.len()))]
    pub fn remove_all(&mut self, entities: &mut [E]) -> Result<()> {
        self.within_transaction(OnError::Keep, |storage| storage.remove_entities(entities))
    }

    fn remove_entities(&self, entities: &mut [E]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }
        let scope = self.scope()?;
        let table = &self.table;
        let info = table.info();

        for entity in entities.iter_mut() {
            self.before(Operation::Remove, entity)?;
        }

        // Rows pointing at the owners go first.
        for entity in entities.iter_mut() {
            for reference in table.references() {
                if reference.relation_type().is_forward() {
                    continue;
                }
                if reference.cascade(Cascade::REMOVE) {
                    reference.binding().remove_nested(entity, &scope)?;
                } else {
                    reference.binding().disassociate(entity, &scope)?;
                }
            }
        }

        let condition = Expr::any(
            entities
                .iter()
                .map(|entity| Expr::col(info.primary_key()).eq(table.key_of(entity))),
        );
        if let Some(condition) = condition {
            let sql = Delete::new(info.table_ref())
                .filter(condition)
                .to_sql(self.driver.dialect());
            let affected = self.execute_sql(&sql)?;
            tracing::debug!(
                table = table.name(),
                requested = entities.len(),
                affected,
                "Removed entities"
            );
        }

        // Rows the owners pointed at go last.
        for entity in entities.iter_mut() {
            for reference in table.references() {
                if reference.relation_type().is_forward() && reference.cascade(Cascade::REMOVE) {
                    reference.binding().remove_nested(entity, &scope)?;
                }
            }
        }

        for entity in entities.iter_mut() {
            self.after(Operation::Remove, entity)?;
        }
        Ok(())
    }
}
