//! Type-erased relations between tables.
//!
//! A [`ReferenceColumn`](crate::ReferenceColumn) on `E` holds a nested
//! `Table<N>` and a container property `C`. The storage engine only knows `E`,
//! so everything it needs from the nested side goes through
//! [`RelationBinding<E>`], implemented once for every `(E, N, C)`.

use crate::accessor::Accessor;
use crate::column::{Cascade, Column, Container, RelationType};
use crate::storage::{LoadContext, Scope};
use crate::table::{Entity, Table, TableInfo};
use relmap_core::error::{Error, Result, SchemaErrorKind};
use relmap_core::{Row, is_null_sentinel};
use std::collections::HashSet;
use std::sync::Arc;

pub(crate) trait RelationBinding<E>: Send + Sync {
    fn nested_info(&self) -> &Arc<TableInfo>;

    /// Inverse relations need a plain column in the nested table to hold
    /// the owner's key.
    fn check_back_reference(&self) -> Result<()>;

    /// Rebuild the nested value at `nested` from a joined row and assign it
    /// to the owner read at `owner_ctx`.
    fn load(
        &self,
        owner: &mut E,
        row: &Row,
        owner_ctx: &LoadContext<'_>,
        nested: &LoadContext<'_>,
    ) -> Result<()>;

    /// Fold the nested values of `others` into `base`, merging by key.
    fn merge(&self, base: &mut E, others: &mut [E]);

    /// Key of the nested value, or `None` when absent or null.
    fn forward_key(&self, owner: &E) -> Option<String>;

    /// Upsert the nested values as they are.
    fn upsert_nested(&self, owner: &mut E, scope: &Scope) -> Result<()>;

    /// Point every nested value at `owner_key`, then upsert them.
    fn upsert_children(&self, owner: &mut E, owner_key: &str, scope: &Scope) -> Result<()>;

    /// Handle members of `old` no longer present in `new`; returns how many.
    fn handle_orphans(&self, old: &E, new: &E, scope: &Scope) -> Result<usize>;

    /// Delete the nested values.
    fn remove_nested(&self, owner: &mut E, scope: &Scope) -> Result<()>;

    /// Clear the nested values' back reference and update them.
    fn disassociate(&self, owner: &mut E, scope: &Scope) -> Result<()>;
}

pub(crate) struct Relation<E, N, C> {
    column: String,
    accessor: Accessor<E, C>,
    table: Arc<Table<N>>,
    relation_type: RelationType,
    cascade: Cascade,
}

impl<E, N, C> Relation<E, N, C> {
    pub(crate) fn new(
        column: String,
        accessor: Accessor<E, C>,
        table: Arc<Table<N>>,
        relation_type: RelationType,
        cascade: Cascade,
    ) -> Self {
        Self {
            column,
            accessor,
            table,
            relation_type,
            cascade,
        }
    }
}

impl<E: Entity, N: Entity, C: Container<N>> Relation<E, N, C> {
    fn back_reference(&self) -> Result<&Column<N>> {
        self.table.plain_column(&self.column).ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::ColumnNotFound,
                self.table.name(),
                format!(
                    "{} relation expects column '{}' holding the owner's key",
                    self.relation_type, self.column
                ),
            )
        })
    }

    fn keys(&self, owner: &E) -> HashSet<String> {
        self.accessor.with(owner, |nested| {
            nested
                .items()
                .iter()
                .map(|item| self.table.key_of(item))
                .collect()
        })
    }

    /// Whether the nested row in `row` belongs to the owner row in `row`.
    ///
    /// Two relations reaching the same table share one OR-ed join, so a row
    /// can carry a nested entity that matched the other relation.
    fn row_links(
        &self,
        owner: &LoadContext<'_>,
        nested: &LoadContext<'_>,
        row: &Row,
        nested_key: &str,
    ) -> bool {
        let (owner_side, nested_side) = if self.relation_type.is_forward() {
            (row.get_by_name(&owner.column(&self.column)), Some(nested_key))
        } else {
            (
                row.get_by_name(&owner.column(owner.info().primary_key())),
                row.get_by_name(&nested.column(&self.column)),
            )
        };
        match (owner_side, nested_side) {
            (Some(owner), Some(nested)) => owner == nested,
            _ => true,
        }
    }
}

impl<E: Entity, N: Entity, C: Container<N>> RelationBinding<E> for Relation<E, N, C> {
    fn nested_info(&self) -> &Arc<TableInfo> {
        self.table.info()
    }

    fn check_back_reference(&self) -> Result<()> {
        self.back_reference().map(|_| ())
    }

    fn load(
        &self,
        owner: &mut E,
        row: &Row,
        owner_ctx: &LoadContext<'_>,
        nested: &LoadContext<'_>,
    ) -> Result<()> {
        let Some(key) = row
            .get_by_name(&nested.column(self.table.info().primary_key()))
            .filter(|key| !is_null_sentinel(key))
        else {
            return Ok(());
        };
        if !self.row_links(owner_ctx, nested, row, key) {
            return Ok(());
        }
        if let Some(nested) = nested.read(&self.table, row)? {
            self.accessor.set(owner, C::from_items(vec![nested]));
        }
        Ok(())
    }

    fn merge(&self, base: &mut E, others: &mut [E]) {
        let mut items = self.accessor.take(base).into_items();
        for other in others {
            items.extend(self.accessor.take(other).into_items());
        }
        let merged = crate::storage::merge_by_key(&self.table, items);
        self.accessor.set(base, C::from_items(merged));
    }

    fn forward_key(&self, owner: &E) -> Option<String> {
        self.accessor.with(owner, |nested| {
            let pk = self.table.primary_key();
            nested
                .items()
                .first()
                .filter(|item| !pk.is_null(item))
                .map(|item| pk.get_value(item))
        })
    }

    fn upsert_nested(&self, owner: &mut E, scope: &Scope) -> Result<()> {
        let mut storage = scope.storage(Arc::clone(&self.table));
        self.accessor
            .update(owner, |nested| storage.upsert_all(nested.items_mut()))
    }

    fn upsert_children(&self, owner: &mut E, owner_key: &str, scope: &Scope) -> Result<()> {
        let back_reference = self.back_reference()?;
        let mut storage = scope.storage(Arc::clone(&self.table));
        self.accessor.update(owner, |nested| {
            let children = nested.items_mut();
            for child in children.iter_mut() {
                back_reference.set_value(child, owner_key)?;
            }
            storage.upsert_all(children)
        })
    }

    fn handle_orphans(&self, old: &E, new: &E, scope: &Scope) -> Result<usize> {
        let current = self.keys(new);
        let mut orphans: Vec<N> = self.accessor.with(old, |nested| {
            nested
                .items()
                .iter()
                .filter(|item| !current.contains(&self.table.key_of(item)))
                .cloned()
                .collect()
        });
        if orphans.is_empty() {
            return Ok(0);
        }

        tracing::debug!(
            table = self.table.name(),
            orphans = orphans.len(),
            remove = self.cascade.contains(Cascade::MERGE_ORPHAN),
            "Handling orphans"
        );
        let mut storage = scope.storage(Arc::clone(&self.table));
        if self.cascade.contains(Cascade::MERGE_ORPHAN) {
            storage.remove_all(&mut orphans)?;
        } else {
            let back_reference = self.back_reference()?;
            for orphan in &mut orphans {
                back_reference.clear(orphan);
            }
            storage.update_all(&mut orphans)?;
        }
        Ok(orphans.len())
    }

    fn remove_nested(&self, owner: &mut E, scope: &Scope) -> Result<()> {
        let mut storage = scope.storage(Arc::clone(&self.table));
        self.accessor
            .update(owner, |nested| storage.remove_all(nested.items_mut()))
    }

    fn disassociate(&self, owner: &mut E, scope: &Scope) -> Result<()> {
        let back_reference = self.back_reference()?;
        let mut storage = scope.storage(Arc::clone(&self.table));
        self.accessor.update(owner, |nested| {
            let children = nested.items_mut();
            for child in children.iter_mut() {
                back_reference.clear(child);
            }
            storage.update_all(children)
        })
    }
}
