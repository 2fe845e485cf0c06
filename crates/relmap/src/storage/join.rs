//! Join planning for selects.
//!
//! Every reference column reachable from the root becomes a LEFT JOIN, and
//! every path is walked. When a later path reaches a table that is already
//! joined, its predicate is ORed into that join, unless the join would then
//! depend on itself; in that case the table is joined again under a fresh
//! alias. The plan records the alias each relation is read from, keyed by
//! its [`Route`], and row reconstruction follows exactly those routes.

use crate::column::RelationType;
use crate::table::{ReferenceInfo, TableInfo};
use relmap_query::{Expr, Join, SelectColumn};
use std::collections::{HashMap, HashSet};

/// Position of a relation in the entity graph: the index of each reference
/// followed from the root, counted in declaration order.
pub(crate) type Route = Vec<usize>;

/// Whether a relation pointing at `target` can be joined from `path`.
///
/// Tables already on the path from the root are skipped, which keeps
/// self-references and cycles out of the join graph.
fn can_join(path: &[&TableInfo], target: &TableInfo) -> bool {
    !path.iter().any(|table| table.same_table(target))
}

/// ON predicate for one relation between two aliases.
fn predicate(
    owner: &TableInfo,
    owner_alias: &str,
    reference: &ReferenceInfo,
    target_alias: &str,
) -> Expr {
    let target = &reference.target;
    if reference.relation_type.is_forward() {
        Expr::qualified(owner_alias, &reference.column)
            .eq(Expr::qualified(target_alias, target.primary_key()))
    } else {
        Expr::qualified(owner_alias, owner.primary_key())
            .eq(Expr::qualified(target_alias, &reference.column))
    }
}

struct PlannedJoin<'a> {
    table: &'a TableInfo,
    alias: String,
    alternatives: Vec<Expr>,
}

impl PlannedJoin<'_> {
    /// Aliases other than this one that the ON clause reads.
    fn dependencies(&self) -> Vec<&str> {
        let mut aliases = Vec::new();
        for alternative in &self.alternatives {
            for alias in alternative.referenced_tables() {
                if alias != self.alias && !aliases.contains(&alias) {
                    aliases.push(alias);
                }
            }
        }
        aliases
    }

    fn into_join(self) -> Join {
        let mut alternatives = self.alternatives.into_iter();
        let first = alternatives.next().unwrap_or_else(|| Expr::raw("1 = 1"));
        let mut join = Join::left(self.table.table_ref().aliased(self.alias), first);
        for alternative in alternatives {
            join.or_on(alternative);
        }
        join
    }
}

/// The joins and projected columns of one select.
#[derive(Debug, Clone, Default)]
pub(crate) struct JoinPlan {
    pub(crate) joins: Vec<Join>,
    pub(crate) columns: Vec<SelectColumn>,
    /// One root row can come back as several SQL rows.
    pub(crate) fans_out: bool,
    routes: HashMap<Route, String>,
}

impl JoinPlan {
    /// Plan for `root`, walking relations only when `related` is set.
    pub(crate) fn build(root: &TableInfo, related: bool) -> Self {
        let mut planner = Planner::new(root);
        if related {
            planner.walk(&mut vec![root], &mut Route::new(), root.name());
        }

        let mut tables = vec![(root, root.name().to_string())];
        let mut joins = Vec::with_capacity(planner.joins.len());
        for join in order_by_dependency(root, planner.joins) {
            tables.push((join.table, join.alias.clone()));
            joins.push(join.into_join());
        }

        let mut seen = HashSet::new();
        let columns = tables
            .iter()
            .flat_map(|(table, alias)| {
                table
                    .columns()
                    .iter()
                    .map(move |column| SelectColumn::aliased(alias.as_str(), &column.name))
            })
            .filter(|column| seen.insert(column.qualified_name()))
            .collect();

        tracing::trace!(
            table = root.name(),
            joins = joins.len(),
            routes = planner.routes.len(),
            fans_out = planner.fans_out,
            "Join plan built"
        );

        Self {
            joins,
            columns,
            fans_out: planner.fans_out,
            routes: planner.routes,
        }
    }

    /// Alias the relation at `route` is read from, if it was joined.
    pub(crate) fn alias(&self, route: &[usize]) -> Option<&str> {
        self.routes.get(route).map(String::as_str)
    }
}

struct Planner<'a> {
    joins: Vec<PlannedJoin<'a>>,
    routes: HashMap<Route, String>,
    taken: HashSet<String>,
    fans_out: bool,
}

impl<'a> Planner<'a> {
    fn new(root: &TableInfo) -> Self {
        Self {
            joins: Vec::new(),
            routes: HashMap::new(),
            taken: HashSet::from([root.name().to_string()]),
            fans_out: false,
        }
    }

    fn walk(&mut self, path: &mut Vec<&'a TableInfo>, route: &mut Route, owner_alias: &str) {
        let Some(&owner) = path.last() else {
            return;
        };
        for (index, reference) in owner.references().iter().enumerate() {
            let target: &'a TableInfo = &reference.target;
            if !can_join(path.as_slice(), target) {
                continue;
            }
            let alias = self.place(owner, owner_alias, reference);

            route.push(index);
            self.routes.insert(route.clone(), alias.clone());
            path.push(target);
            self.walk(path, route, &alias);
            path.pop();
            route.pop();
        }
    }

    /// Join `reference` from `owner_alias` and return the alias its target
    /// is read from.
    fn place(
        &mut self,
        owner: &TableInfo,
        owner_alias: &str,
        reference: &'a ReferenceInfo,
    ) -> String {
        let target: &'a TableInfo = &reference.target;
        for position in 0..self.joins.len() {
            if !self.joins[position].table.same_table(target) {
                continue;
            }
            let alias = self.joins[position].alias.clone();
            let on = predicate(owner, owner_alias, reference, &alias);
            if self.joins[position].alternatives.contains(&on) {
                return alias;
            }
            if self.depends_on(owner_alias, &alias) {
                continue;
            }
            self.joins[position].alternatives.push(on);
            self.fans_out = true;
            return alias;
        }

        let alias = self.fresh_alias(target.name());
        if reference.relation_type == RelationType::OneToMany {
            self.fans_out = true;
        }
        self.joins.push(PlannedJoin {
            table: target,
            alias: alias.clone(),
            alternatives: vec![predicate(owner, owner_alias, reference, &alias)],
        });
        alias
    }

    /// Whether the join under `from` reads `to`, directly or through other
    /// joins.
    fn depends_on(&self, from: &str, to: &str) -> bool {
        let mut pending = vec![from];
        let mut visited = HashSet::new();
        while let Some(alias) = pending.pop() {
            if alias == to {
                return true;
            }
            if !visited.insert(alias) {
                continue;
            }
            if let Some(join) = self.joins.iter().find(|join| join.alias == alias) {
                pending.extend(join.dependencies());
            }
        }
        false
    }

    fn fresh_alias(&mut self, name: &str) -> String {
        let mut alias = name.to_string();
        let mut n = 2;
        while self.taken.contains(&alias) {
            alias = format!("{name}_{n}");
            n += 1;
        }
        self.taken.insert(alias.clone());
        alias
    }
}

/// Order joins so each follows every alias its ON clause reads.
fn order_by_dependency<'a>(root: &TableInfo, joins: Vec<PlannedJoin<'a>>) -> Vec<PlannedJoin<'a>> {
    let mut placed: Vec<String> = vec![root.name().to_string()];
    let mut pending = joins;
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending.iter().position(|join| {
            join.dependencies()
                .iter()
                .all(|alias| placed.iter().any(|p| p.as_str() == *alias))
        });
        let Some(index) = ready else {
            tracing::warn!(
                table = root.name(),
                unresolved = pending.len(),
                "Join predicates form a cycle; keeping discovery order"
            );
            ordered.append(&mut pending);
            break;
        };
        let join = pending.remove(index);
        placed.push(join.alias.clone());
        ordered.push(join);
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::Accessor;
    use crate::column::{Cascade, Column, ColumnSettings, ReferenceColumn};
    use crate::table::Table;
    use relmap_core::Dialect;
    use std::sync::Arc;

    #[derive(Debug, Clone, Default)]
    struct Address {
        id: i64,
        street: String,
    }

    #[derive(Debug, Clone, Default)]
    struct Post {
        id: i64,
        author_id: Option<i64>,
    }

    #[derive(Debug, Clone, Default)]
    struct Author {
        id: i64,
        home: Option<Address>,
        work: Option<Address>,
        posts: Vec<Post>,
        mentor: Option<Box<Author>>,
    }

    fn addresses() -> Arc<Table<Address>> {
        Arc::new(
            Table::builder("addresses")
                .column(Column::new(
                    "id",
                    Accessor::field(|a: &Address| &a.id, |a: &mut Address| &mut a.id),
                    ColumnSettings::new().primary_key(),
                ))
                .column(Column::new(
                    "street",
                    Accessor::field(|a: &Address| &a.street, |a: &mut Address| &mut a.street),
                    ColumnSettings::new(),
                ))
                .build()
                .unwrap(),
        )
    }

    fn posts() -> Arc<Table<Post>> {
        Arc::new(
            Table::builder("posts")
                .column(Column::new(
                    "id",
                    Accessor::field(|p: &Post| &p.id, |p: &mut Post| &mut p.id),
                    ColumnSettings::new().primary_key(),
                ))
                .column(Column::new(
                    "author_id",
                    Accessor::field(|p: &Post| &p.author_id, |p: &mut Post| &mut p.author_id),
                    ColumnSettings::new(),
                ))
                .build()
                .unwrap(),
        )
    }

    fn author_id() -> Column<Author> {
        Column::new(
            "id",
            Accessor::field(|a: &Author| &a.id, |a: &mut Author| &mut a.id),
            ColumnSettings::new().primary_key(),
        )
    }

    fn render(plan: &JoinPlan) -> Vec<String> {
        plan.joins
            .iter()
            .map(|join| join.to_sql(Dialect::Sqlite))
            .collect()
    }

    #[test]
    fn test_forward_and_inverse_predicates() {
        let table = Table::builder("authors")
            .column(author_id())
            .column(ReferenceColumn::one_to_one(
                "home_id",
                Accessor::field(|a: &Author| &a.home, |a: &mut Author| &mut a.home),
                addresses(),
                Cascade::NONE,
            ))
            .column(ReferenceColumn::one_to_many(
                "author_id",
                Accessor::field(|a: &Author| &a.posts, |a: &mut Author| &mut a.posts),
                posts(),
                Cascade::NONE,
            ))
            .build()
            .unwrap();

        let plan = JoinPlan::build(table.info(), true);
        assert_eq!(
            render(&plan),
            vec![
                " LEFT JOIN \"addresses\" ON \"authors\".\"home_id\" = \"addresses\".\"id\"",
                " LEFT JOIN \"posts\" ON \"authors\".\"id\" = \"posts\".\"author_id\"",
            ]
        );
        assert!(plan.fans_out);
        let aliases: Vec<_> = plan
            .columns
            .iter()
            .filter_map(|c| c.alias.clone())
            .collect();
        assert_eq!(
            aliases,
            vec![
                "authors.id",
                "authors.home_id",
                "addresses.id",
                "addresses.street",
                "posts.id",
                "posts.author_id",
            ]
        );
    }

    #[test]
    fn test_two_paths_to_one_table_are_ored() {
        let addresses = addresses();
        let table = Table::builder("authors")
            .column(author_id())
            .column(ReferenceColumn::one_to_one(
                "home_id",
                Accessor::field(|a: &Author| &a.home, |a: &mut Author| &mut a.home),
                Arc::clone(&addresses),
                Cascade::NONE,
            ))
            .column(ReferenceColumn::one_to_one(
                "work_id",
                Accessor::field(|a: &Author| &a.work, |a: &mut Author| &mut a.work),
                addresses,
                Cascade::NONE,
            ))
            .build()
            .unwrap();

        let plan = JoinPlan::build(table.info(), true);
        assert_eq!(
            render(&plan),
            vec![
                " LEFT JOIN \"addresses\" ON \"authors\".\"home_id\" = \"addresses\".\"id\" \
                 OR \"authors\".\"work_id\" = \"addresses\".\"id\""
            ]
        );
        assert!(plan.fans_out);
    }

    #[test]
    fn test_self_reference_is_not_joined() {
        let mentors = Arc::new(Table::builder("authors").column(author_id()).build().unwrap());
        let table = Table::builder("authors")
            .column(author_id())
            .column(ReferenceColumn::many_to_one(
                "mentor_id",
                Accessor::property(
                    |a: &Author| a.mentor.as_deref().cloned(),
                    |a: &mut Author, m: Option<Author>| a.mentor = m.map(Box::new),
                ),
                mentors,
                Cascade::NONE,
            ))
            .build()
            .unwrap();

        let plan = JoinPlan::build(table.info(), true);
        assert!(plan.joins.is_empty());
        assert!(!plan.fans_out);
        assert_eq!(plan.columns.len(), 2);
    }

    #[test]
    fn test_without_related_selects_own_columns() {
        let table = Table::builder("authors")
            .column(author_id())
            .column(ReferenceColumn::one_to_many(
                "author_id",
                Accessor::field(|a: &Author| &a.posts, |a: &mut Author| &mut a.posts),
                posts(),
                Cascade::NONE,
            ))
            .build()
            .unwrap();

        let plan = JoinPlan::build(table.info(), false);
        assert!(plan.joins.is_empty());
        assert!(!plan.fans_out);
        assert_eq!(plan.columns.len(), 1);
    }

    #[derive(Debug, Clone, Default)]
    struct Leaf {
        id: i64,
    }

    #[derive(Debug, Clone, Default)]
    struct Entry {
        id: i64,
        author: Option<Leaf>,
    }

    #[derive(Debug, Clone, Default)]
    struct Member {
        id: i64,
        latest: Option<Entry>,
    }

    #[derive(Debug, Clone, Default)]
    struct Note {
        id: i64,
        member: Option<Member>,
        entry: Option<Entry>,
    }

    #[test]
    fn test_second_path_is_walked_and_aliased_when_or_would_cycle() {
        let leaves = Arc::new(
            Table::builder("users")
                .column(Column::new(
                    "id",
                    Accessor::field(|l: &Leaf| &l.id, |l: &mut Leaf| &mut l.id),
                    ColumnSettings::new().primary_key(),
                ))
                .build()
                .unwrap(),
        );
        let entries = Arc::new(
            Table::builder("posts")
                .column(Column::new(
                    "id",
                    Accessor::field(|e: &Entry| &e.id, |e: &mut Entry| &mut e.id),
                    ColumnSettings::new().primary_key(),
                ))
                .column(ReferenceColumn::many_to_one(
                    "author_id",
                    Accessor::field(|e: &Entry| &e.author, |e: &mut Entry| &mut e.author),
                    leaves,
                    Cascade::NONE,
                ))
                .build()
                .unwrap(),
        );
        let members = Arc::new(
            Table::builder("users")
                .column(Column::new(
                    "id",
                    Accessor::field(|m: &Member| &m.id, |m: &mut Member| &mut m.id),
                    ColumnSettings::new().primary_key(),
                ))
                .column(ReferenceColumn::many_to_one(
                    "latest_post_id",
                    Accessor::field(|m: &Member| &m.latest, |m: &mut Member| &mut m.latest),
                    Arc::clone(&entries),
                    Cascade::NONE,
                ))
                .build()
                .unwrap(),
        );
        let notes = Table::builder("comments")
            .column(Column::new(
                "id",
                Accessor::field(|n: &Note| &n.id, |n: &mut Note| &mut n.id),
                ColumnSettings::new().primary_key(),
            ))
            .column(ReferenceColumn::many_to_one(
                "user_id",
                Accessor::field(|n: &Note| &n.member, |n: &mut Note| &mut n.member),
                members,
                Cascade::NONE,
            ))
            .column(ReferenceColumn::many_to_one(
                "post_id",
                Accessor::field(|n: &Note| &n.entry, |n: &mut Note| &mut n.entry),
                entries,
                Cascade::NONE,
            ))
            .build()
            .unwrap();

        let plan = JoinPlan::build(notes.info(), true);
        assert_eq!(
            render(&plan),
            vec![
                " LEFT JOIN \"users\" ON \"comments\".\"user_id\" = \"users\".\"id\"",
                " LEFT JOIN \"posts\" ON \"users\".\"latest_post_id\" = \"posts\".\"id\" \
                 OR \"comments\".\"post_id\" = \"posts\".\"id\"",
                " LEFT JOIN \"users\" AS \"users_2\" ON \"posts\".\"author_id\" = \"users_2\".\"id\"",
            ]
        );
        assert_eq!(plan.alias(&[0]), Some("users"));
        assert_eq!(plan.alias(&[0, 0]), Some("posts"));
        // users is already on the path comments -> users -> posts.
        assert_eq!(plan.alias(&[0, 0, 0]), None);
        assert_eq!(plan.alias(&[1]), Some("posts"));
        assert_eq!(plan.alias(&[1, 0]), Some("users_2"));
        assert!(
            plan.columns
                .iter()
                .any(|c| c.alias.as_deref() == Some("users_2.id"))
        );
    }
}
