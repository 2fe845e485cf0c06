//! Folding joined rows back into entity graphs.

use crate::table::{Entity, Table};
use std::collections::HashMap;

/// Collapse entities sharing a primary key into one, in first-seen order.
///
/// The first entity of each group is kept; the related values of the others
/// are appended to it and merged recursively by their own keys.
pub(crate) fn merge_by_key<N: Entity>(table: &Table<N>, items: Vec<N>) -> Vec<N> {
    let mut order = Vec::new();
    let mut groups: HashMap<String, Vec<N>> = HashMap::new();
    for item in items {
        let key = table.key_of(&item);
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(item);
    }

    order
        .into_iter()
        .filter_map(|key| {
            let mut group = groups.remove(&key)?;
            let mut others = group.split_off(1);
            let mut base = group.pop()?;
            for reference in table.references() {
                reference.binding().merge(&mut base, &mut others);
            }
            Some(base)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::Accessor;
    use crate::column::{Cascade, Column, ColumnSettings, ReferenceColumn};
    use std::sync::Arc;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Line {
        id: i64,
        order_id: Option<i64>,
    }

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Order {
        id: i64,
        lines: Vec<Line>,
    }

    fn orders() -> Table<Order> {
        let lines = Table::builder("lines")
            .column(Column::new(
                "id",
                Accessor::field(|l: &Line| &l.id, |l: &mut Line| &mut l.id),
                ColumnSettings::new().primary_key(),
            ))
            .column(Column::new(
                "order_id",
                Accessor::field(|l: &Line| &l.order_id, |l: &mut Line| &mut l.order_id),
                ColumnSettings::new(),
            ))
            .build()
            .unwrap();
        Table::builder("orders")
            .column(Column::new(
                "id",
                Accessor::field(|o: &Order| &o.id, |o: &mut Order| &mut o.id),
                ColumnSettings::new().primary_key(),
            ))
            .column(ReferenceColumn::one_to_many(
                "order_id",
                Accessor::field(|o: &Order| &o.lines, |o: &mut Order| &mut o.lines),
                Arc::new(lines),
                Cascade::ALL,
            ))
            .build()
            .unwrap()
    }

    fn row(order: i64, line: i64) -> Order {
        Order {
            id: order,
            lines: vec![Line {
                id: line,
                order_id: Some(order),
            }],
        }
    }

    #[test]
    fn test_rows_of_one_owner_fold_into_one_entity() {
        let merged = merge_by_key(&orders(), vec![row(1, 10), row(1, 11), row(1, 12)]);
        assert_eq!(merged.len(), 1);
        let ids: Vec<_> = merged[0].lines.iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
    }

    #[test]
    fn test_first_seen_order_and_nested_dedup() {
        let merged = merge_by_key(
            &orders(),
            vec![row(2, 20), row(1, 10), row(2, 20), row(2, 21)],
        );
        let shape: Vec<_> = merged
            .iter()
            .map(|o| (o.id, o.lines.iter().map(|l| l.id).collect::<Vec<_>>()))
            .collect();
        assert_eq!(shape, vec![(2, vec![20, 21]), (1, vec![10])]);
    }

    #[test]
    fn test_owner_without_children_stays_empty() {
        let merged = merge_by_key(&orders(), vec![Order { id: 5, lines: vec![] }]);
        assert_eq!(merged, vec![Order { id: 5, lines: vec![] }]);
    }
}
