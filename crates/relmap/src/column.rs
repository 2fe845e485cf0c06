//! Column metadata: plain columns and reference columns.

use crate::accessor::Accessor;
use crate::relation::{Relation, RelationBinding};
use crate::table::{Entity, Table};
use relmap_core::error::{Error, Result};
use relmap_core::{Converter, NULL_SENTINEL, NullPredicate, SqlValue};
use std::fmt;
use std::sync::Arc;

/// Flags describing a physical column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ColumnSettings {
    pub primary_key: bool,
    pub not_null: bool,
    pub auto_increment: bool,
}

impl ColumnSettings {
    pub const fn new() -> Self {
        Self {
            primary_key: false,
            not_null: false,
            auto_increment: false,
        }
    }

    /// Primary key; implies NOT NULL.
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    pub const fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Value generated by the database on insert.
    pub const fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

/// Name and settings of a physical column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub settings: ColumnSettings,
}

/// Which side of a relation holds the foreign key, and the property's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationType {
    /// FK in the owning table; single nested value.
    OneToOne,
    /// FK in the owning table; single nested value shared by many owners.
    ManyToOne,
    /// FK in the target table; collection of nested values.
    OneToMany,
    /// FK in the target table; single nested value.
    OneToOneInverted,
}

impl RelationType {
    /// The foreign key lives in the owning table.
    pub const fn is_forward(self) -> bool {
        matches!(self, RelationType::OneToOne | RelationType::ManyToOne)
    }

    /// The foreign key lives in the target table.
    pub const fn is_inverse(self) -> bool {
        !self.is_forward()
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RelationType::OneToOne => "one_to_one",
            RelationType::ManyToOne => "many_to_one",
            RelationType::OneToMany => "one_to_many",
            RelationType::OneToOneInverted => "one_to_one_inverted",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags::bitflags! {
    /// Operations that propagate from an owner to its related entities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Cascade: u8 {
        /// Cascade on insert.
        const PERSIST = 0b0000_0001;
        /// Cascade on update.
        const MERGE = 0b0000_0010;
        /// Cascade on update and delete members removed from the relation.
        const MERGE_ORPHAN = 0b0000_0100;
        /// Cascade on delete.
        const REMOVE = 0b0000_1000;
        const ALL = Self::PERSIST.bits()
            | Self::MERGE.bits()
            | Self::MERGE_ORPHAN.bits()
            | Self::REMOVE.bits();
    }
}

impl Cascade {
    pub const NONE: Cascade = Cascade::empty();

    /// Cascades on update, with or without orphan removal.
    pub fn merges(self) -> bool {
        self.intersects(Cascade::MERGE | Cascade::MERGE_ORPHAN)
    }
}

/// Conversion between one related value and the collection form used when
/// reconstructing and merging rows.
pub trait Container<N>: Clone + Default + Send + Sync + 'static {
    /// Holds many values (one-to-many).
    const MANY: bool;

    fn from_items(items: Vec<N>) -> Self;

    fn into_items(self) -> Vec<N>;

    fn items(&self) -> &[N];

    fn items_mut(&mut self) -> &mut [N];
}

impl<N: Entity> Container<N> for Vec<N> {
    const MANY: bool = true;

    fn from_items(items: Vec<N>) -> Self {
        items
    }

    fn into_items(self) -> Vec<N> {
        self
    }

    fn items(&self) -> &[N] {
        self
    }

    fn items_mut(&mut self) -> &mut [N] {
        self
    }
}

impl<N: Entity> Container<N> for Option<N> {
    const MANY: bool = false;

    /// Keeps the first item.
    fn from_items(items: Vec<N>) -> Self {
        items.into_iter().next()
    }

    fn into_items(self) -> Vec<N> {
        self.into_iter().collect()
    }

    fn items(&self) -> &[N] {
        self.as_slice()
    }

    fn items_mut(&mut self) -> &mut [N] {
        self.as_mut_slice()
    }
}

/// Typed access to one scalar value of `E`, erased over the value type.
trait ValueBinding<E>: Send + Sync {
    fn encode(&self, entity: &E) -> String;

    fn decode(&self, entity: &mut E, raw: &str) -> Result<()>;

    fn is_null(&self, entity: &E) -> bool;

    fn reset(&self, entity: &mut E);
}

struct TypedValue<E, T> {
    accessor: Accessor<E, T>,
    converter: Converter<T>,
    null_predicate: NullPredicate<T>,
}

impl<E, T: Default> ValueBinding<E> for TypedValue<E, T> {
    fn encode(&self, entity: &E) -> String {
        self.accessor
            .with(entity, |value| self.converter.encode(value))
    }

    fn decode(&self, entity: &mut E, raw: &str) -> Result<()> {
        self.accessor
            .update(entity, |value| self.converter.decode(value, raw))
    }

    fn is_null(&self, entity: &E) -> bool {
        self.accessor
            .with(entity, |value| self.null_predicate.test(value))
    }

    fn reset(&self, entity: &mut E) {
        self.accessor.set(entity, T::default());
    }
}

/// A plain column: one entity value stored in one physical column.
pub struct Column<E> {
    name: String,
    settings: ColumnSettings,
    binding: Arc<dyn ValueBinding<E>>,
}

impl<E: 'static> Column<E> {
    /// Column using the native conversion and null policy of `T`.
    pub fn new<T>(name: impl Into<String>, accessor: Accessor<E, T>, settings: ColumnSettings) -> Self
    where
        T: SqlValue + Default + 'static,
    {
        Self::with_converter(
            name,
            accessor,
            Converter::native(),
            NullPredicate::native(),
            settings,
        )
    }

    /// Column with an explicit converter and null predicate.
    pub fn with_converter<T>(
        name: impl Into<String>,
        accessor: Accessor<E, T>,
        converter: Converter<T>,
        null_predicate: NullPredicate<T>,
        settings: ColumnSettings,
    ) -> Self
    where
        T: Default + 'static,
    {
        Self {
            name: name.into(),
            settings,
            binding: Arc::new(TypedValue {
                accessor,
                converter,
                null_predicate,
            }),
        }
    }
}

impl<E> Column<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> ColumnSettings {
        self.settings
    }

    pub fn column_info(&self) -> ColumnInfo {
        ColumnInfo {
            name: self.name.clone(),
            settings: self.settings,
        }
    }

    /// Converted value of this column.
    pub fn get_value(&self, entity: &E) -> String {
        self.binding.encode(entity)
    }

    /// Parse `raw` into the entity; type errors name this column.
    pub fn set_value(&self, entity: &mut E, raw: &str) -> Result<()> {
        self.binding.decode(entity, raw).map_err(|e| match e {
            Error::Type(mut type_error) => {
                type_error.column.get_or_insert_with(|| self.name.clone());
                Error::Type(type_error)
            }
            other => other,
        })
    }

    pub fn is_null(&self, entity: &E) -> bool {
        self.binding.is_null(entity)
    }

    /// Value to write: the null sentinel when the column is nullable and the
    /// null predicate matches, the converted value otherwise.
    pub fn sql_value(&self, entity: &E) -> String {
        if !self.settings.not_null && self.is_null(entity) {
            NULL_SENTINEL.to_string()
        } else {
            self.get_value(entity)
        }
    }

    /// Reset the value to its type's default.
    pub fn clear(&self, entity: &mut E) {
        self.binding.reset(entity);
    }
}

impl<E> Clone for Column<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            settings: self.settings,
            binding: Arc::clone(&self.binding),
        }
    }
}

impl<E> fmt::Debug for Column<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// A column whose value is another mapped entity, or a collection of them.
///
/// For forward relations (`OneToOne`, `ManyToOne`) the name is the foreign
/// key column of the owning table. For inverse relations (`OneToMany`,
/// `OneToOneInverted`) the name is the column of the nested table that holds
/// the owner's primary key.
pub struct ReferenceColumn<E> {
    name: String,
    settings: ColumnSettings,
    relation_type: RelationType,
    cascade: Cascade,
    /// The property holds a collection.
    many: bool,
    binding: Arc<dyn RelationBinding<E>>,
}

impl<E: Entity> ReferenceColumn<E> {
    /// Bind a nested table through a container property (`Option<N>` for
    /// single values, `Vec<N>` for collections).
    pub fn new<N, C>(
        name: impl Into<String>,
        accessor: Accessor<E, C>,
        nested: impl Into<Arc<Table<N>>>,
        relation_type: RelationType,
        cascade: Cascade,
    ) -> Self
    where
        N: Entity,
        C: Container<N>,
    {
        let name = name.into();
        Self {
            binding: Arc::new(Relation::new(
                name.clone(),
                accessor,
                nested.into(),
                relation_type,
                cascade,
            )),
            name,
            settings: ColumnSettings::new(),
            relation_type,
            cascade,
            many: C::MANY,
        }
    }

    pub fn one_to_one<N: Entity>(
        name: impl Into<String>,
        accessor: Accessor<E, Option<N>>,
        nested: impl Into<Arc<Table<N>>>,
        cascade: Cascade,
    ) -> Self {
        Self::new(name, accessor, nested, RelationType::OneToOne, cascade)
    }

    pub fn many_to_one<N: Entity>(
        name: impl Into<String>,
        accessor: Accessor<E, Option<N>>,
        nested: impl Into<Arc<Table<N>>>,
        cascade: Cascade,
    ) -> Self {
        Self::new(name, accessor, nested, RelationType::ManyToOne, cascade)
    }

    pub fn one_to_many<N: Entity>(
        name: impl Into<String>,
        accessor: Accessor<E, Vec<N>>,
        nested: impl Into<Arc<Table<N>>>,
        cascade: Cascade,
    ) -> Self {
        Self::new(name, accessor, nested, RelationType::OneToMany, cascade)
    }

    pub fn one_to_one_inverted<N: Entity>(
        name: impl Into<String>,
        accessor: Accessor<E, Option<N>>,
        nested: impl Into<Arc<Table<N>>>,
        cascade: Cascade,
    ) -> Self {
        Self::new(
            name,
            accessor,
            nested,
            RelationType::OneToOneInverted,
            cascade,
        )
    }

    /// Mark the foreign key column NOT NULL (forward relations only).
    pub fn not_null(mut self) -> Self {
        self.settings = self.settings.not_null();
        self
    }
}

impl<E> ReferenceColumn<E> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_info(&self) -> ColumnInfo {
        ColumnInfo {
            name: self.name.clone(),
            settings: self.settings,
        }
    }

    pub fn settings(&self) -> ColumnSettings {
        self.settings
    }

    pub fn relation_type(&self) -> RelationType {
        self.relation_type
    }

    pub fn cascade(&self, flag: Cascade) -> bool {
        self.cascade.intersects(flag)
    }

    pub fn cascade_flags(&self) -> Cascade {
        self.cascade
    }

    /// Whether the property holds a collection rather than a single value.
    pub fn is_many(&self) -> bool {
        self.many
    }

    /// Type-erased view of the nested table and container.
    pub(crate) fn binding(&self) -> &dyn RelationBinding<E> {
        self.binding.as_ref()
    }

    /// Name of the nested table.
    pub fn nested_table(&self) -> &str {
        self.binding.nested_info().name()
    }
}

impl<E> Clone for ReferenceColumn<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            settings: self.settings,
            relation_type: self.relation_type,
            cascade: self.cascade,
            many: self.many,
            binding: Arc::clone(&self.binding),
        }
    }
}

impl<E> fmt::Debug for ReferenceColumn<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceColumn")
            .field("name", &self.name)
            .field("relation_type", &self.relation_type)
            .field("cascade", &self.cascade)
            .field("nested_table", &self.nested_table())
            .finish()
    }
}
