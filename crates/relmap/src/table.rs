//! Table descriptors.
//!
//! A [`Table`] is an immutable description of how one entity type maps onto
//! one table: its ordered plain and reference columns, plus an untyped
//! [`TableInfo`] tree that join construction walks without knowing the
//! entity types involved.

use crate::column::{Column, ColumnInfo, ReferenceColumn, RelationType};
use relmap_core::error::{Error, Result, SchemaErrorKind};
use relmap_core::validate_identifier;
use relmap_query::{Expr, TableRef};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Types that can be mapped to a table.
///
/// Entities are default-constructed before rows are parsed into them, and
/// cloned when related entities are handed to cascading operations.
pub trait Entity: Clone + Default + Send + Sync + 'static {}

impl<T: Clone + Default + Send + Sync + 'static> Entity for T {}

/// A column of a table, dispatched by kind.
pub enum TableColumn<E> {
    Plain(Column<E>),
    Reference(ReferenceColumn<E>),
}

impl<E> TableColumn<E> {
    /// Declared name: the physical column, or for inverse relations the
    /// nested table's column pointing back.
    pub fn name(&self) -> &str {
        match self {
            TableColumn::Plain(column) => column.name(),
            TableColumn::Reference(column) => column.name(),
        }
    }
}

impl<E> Clone for TableColumn<E> {
    fn clone(&self) -> Self {
        match self {
            TableColumn::Plain(column) => TableColumn::Plain(column.clone()),
            TableColumn::Reference(column) => TableColumn::Reference(column.clone()),
        }
    }
}

impl<E> fmt::Debug for TableColumn<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableColumn::Plain(column) => column.fmt(f),
            TableColumn::Reference(column) => column.fmt(f),
        }
    }
}

impl<E> From<Column<E>> for TableColumn<E> {
    fn from(column: Column<E>) -> Self {
        TableColumn::Plain(column)
    }
}

impl<E> From<ReferenceColumn<E>> for TableColumn<E> {
    fn from(column: ReferenceColumn<E>) -> Self {
        TableColumn::Reference(column)
    }
}

/// Visits the columns of a table in declaration order.
pub trait ColumnVisitor<E> {
    fn visit_column(&mut self, _column: &Column<E>) {}

    fn visit_reference(&mut self, _column: &ReferenceColumn<E>) {}
}

/// A relation as seen by join construction.
#[derive(Debug, Clone)]
pub struct ReferenceInfo {
    pub column: String,
    pub relation_type: RelationType,
    pub target: Arc<TableInfo>,
}

/// Untyped shape of a table.
#[derive(Debug, Clone)]
pub struct TableInfo {
    name: String,
    schema: Option<String>,
    columns: Vec<ColumnInfo>,
    primary_key: String,
    references: Vec<ReferenceInfo>,
    duplicates: BTreeSet<String>,
}

impl TableInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    /// Physical columns, without duplicate foreign keys.
    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn references(&self) -> &[ReferenceInfo] {
        &self.references
    }

    /// Physical names declared by more than one column. The first
    /// declaration owns the column.
    pub fn duplicates(&self) -> impl Iterator<Item = &str> {
        self.duplicates.iter().map(String::as_str)
    }

    pub fn is_duplicate(&self, name: &str) -> bool {
        self.duplicates.contains(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Same physical table (name and schema).
    pub fn same_table(&self, other: &TableInfo) -> bool {
        self.name == other.name && self.schema == other.schema
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::with_schema(self.schema.clone(), self.name.clone())
    }

    /// Result alias of one of this table's columns.
    pub fn alias(&self, column: &str) -> String {
        format!("{}.{}", self.name, column)
    }
}

/// Mapping of entity type `E` onto one table.
pub struct Table<E> {
    info: Arc<TableInfo>,
    columns: Vec<TableColumn<E>>,
    primary_key: Column<E>,
}

impl<E: Entity> Table<E> {
    /// Build a table from its columns, validating the mapping.
    pub fn new(
        name: impl Into<String>,
        schema: Option<String>,
        columns: Vec<TableColumn<E>>,
    ) -> Result<Self> {
        let name = name.into();
        validate_identifier(&name, "table", &name)?;
        if let Some(schema) = &schema {
            validate_identifier(&name, "schema", schema)?;
        }

        // Physical name -> whether a plain column declared it.
        let mut registered: HashMap<String, bool> = HashMap::new();
        let mut physical = Vec::new();
        let mut duplicates = BTreeSet::new();
        let mut references = Vec::new();
        let mut primary_key: Option<Column<E>> = None;

        for column in &columns {
            validate_identifier(&name, "column", column.name())?;
            match column {
                TableColumn::Plain(plain) => {
                    match registered.get(plain.name()) {
                        Some(true) => {
                            return Err(Error::schema(
                                SchemaErrorKind::DuplicateColumn,
                                &name,
                                format!("column '{}' is declared twice", plain.name()),
                            ));
                        }
                        Some(false) => {
                            duplicates.insert(plain.name().to_string());
                        }
                        None => physical.push(plain.column_info()),
                    }
                    registered.insert(plain.name().to_string(), true);
                    if plain.settings().primary_key {
                        if primary_key.is_some() {
                            return Err(Error::schema(
                                SchemaErrorKind::MultiplePrimaryKeys,
                                &name,
                                "more than one column is marked as primary key",
                            ));
                        }
                        primary_key = Some(plain.clone());
                    }
                }
                TableColumn::Reference(reference) => {
                    let binding = reference.binding();
                    let relation_type = reference.relation_type();
                    if reference.is_many() != (relation_type == RelationType::OneToMany) {
                        return Err(Error::schema(
                            SchemaErrorKind::Invalid,
                            &name,
                            format!(
                                "{} relation '{}' needs a {} property",
                                relation_type,
                                reference.name(),
                                if relation_type == RelationType::OneToMany {
                                    "collection"
                                } else {
                                    "single-valued"
                                }
                            ),
                        ));
                    }
                    if relation_type.is_forward() {
                        if registered.contains_key(reference.name()) {
                            duplicates.insert(reference.name().to_string());
                        } else {
                            registered.insert(reference.name().to_string(), false);
                            physical.push(reference.column_info());
                        }
                    } else {
                        binding.check_back_reference()?;
                    }
                    references.push(ReferenceInfo {
                        column: reference.name().to_string(),
                        relation_type,
                        target: Arc::clone(binding.nested_info()),
                    });
                }
            }
        }

        let Some(primary_key) = primary_key else {
            return Err(Error::schema(
                SchemaErrorKind::MissingPrimaryKey,
                &name,
                "no column is marked as primary key",
            ));
        };

        tracing::trace!(
            table = %name,
            columns = physical.len(),
            references = references.len(),
            duplicates = duplicates.len(),
            "Table mapping built"
        );

        Ok(Self {
            info: Arc::new(TableInfo {
                primary_key: primary_key.name().to_string(),
                name,
                schema,
                columns: physical,
                references,
                duplicates,
            }),
            columns,
            primary_key,
        })
    }

    pub fn builder(name: impl Into<String>) -> TableBuilder<E> {
        TableBuilder {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
        }
    }

    /// A default-constructed entity.
    pub fn empty_entity(&self) -> E {
        E::default()
    }
}

impl<E> Table<E> {
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.info.schema()
    }

    pub fn info(&self) -> &Arc<TableInfo> {
        &self.info
    }

    pub fn columns(&self) -> &[TableColumn<E>] {
        &self.columns
    }

    pub fn primary_key(&self) -> &Column<E> {
        &self.primary_key
    }

    pub fn is_duplicate(&self, name: &str) -> bool {
        self.info.is_duplicate(name)
    }

    /// Table-qualified column operand for conditions.
    pub fn col(&self, name: &str) -> Expr {
        Expr::qualified(self.name(), name)
    }

    pub fn plain_column(&self, name: &str) -> Option<&Column<E>> {
        self.columns.iter().find_map(|column| match column {
            TableColumn::Plain(plain) if plain.name() == name => Some(plain),
            _ => None,
        })
    }

    pub fn references(&self) -> impl Iterator<Item = &ReferenceColumn<E>> {
        self.columns.iter().filter_map(|column| match column {
            TableColumn::Reference(reference) => Some(reference),
            TableColumn::Plain(_) => None,
        })
    }

    pub fn for_each(&self, visitor: &mut dyn ColumnVisitor<E>) {
        for column in &self.columns {
            match column {
                TableColumn::Plain(plain) => visitor.visit_column(plain),
                TableColumn::Reference(reference) => visitor.visit_reference(reference),
            }
        }
    }

    /// String form of the entity's primary key.
    pub fn key_of(&self, entity: &E) -> String {
        self.primary_key().get_value(entity)
    }
}

impl<E> fmt::Debug for Table<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.info.name)
            .field("schema", &self.info.schema)
            .field("columns", &self.columns)
            .finish()
    }
}

/// Incremental construction of a [`Table`].
pub struct TableBuilder<E> {
    name: String,
    schema: Option<String>,
    columns: Vec<TableColumn<E>>,
}

impl<E: Entity> TableBuilder<E> {
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(mut self, column: impl Into<TableColumn<E>>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn build(self) -> Result<Table<E>> {
        Table::new(self.name, self.schema, self.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::Accessor;
    use crate::column::{Cascade, ColumnSettings};

    #[derive(Debug, Clone, Default)]
    struct Country {
        code: String,
        name: String,
    }

    #[derive(Debug, Clone, Default)]
    struct City {
        id: i64,
        country_code: Option<String>,
        country: Option<Country>,
        capital_of: Option<Country>,
    }

    fn countries() -> Table<Country> {
        Table::builder("countries")
            .column(Column::new(
                "code",
                Accessor::field(|c: &Country| &c.code, |c: &mut Country| &mut c.code),
                ColumnSettings::new().primary_key(),
            ))
            .column(Column::new(
                "name",
                Accessor::field(|c: &Country| &c.name, |c: &mut Country| &mut c.name),
                ColumnSettings::new().not_null(),
            ))
            .build()
            .unwrap()
    }

    fn city_id() -> Column<City> {
        Column::new(
            "id",
            Accessor::field(|c: &City| &c.id, |c: &mut City| &mut c.id),
            ColumnSettings::new().primary_key(),
        )
    }

    #[test]
    fn test_duplicate_foreign_key_is_tracked() {
        let countries = Arc::new(countries());
        let table = Table::builder("cities")
            .column(city_id())
            .column(ReferenceColumn::many_to_one(
                "country_code",
                Accessor::field(|c: &City| &c.country, |c: &mut City| &mut c.country),
                Arc::clone(&countries),
                Cascade::NONE,
            ))
            .column(ReferenceColumn::one_to_one(
                "country_code",
                Accessor::field(|c: &City| &c.capital_of, |c: &mut City| &mut c.capital_of),
                countries,
                Cascade::NONE,
            ))
            .build()
            .unwrap();

        let info = table.info();
        assert_eq!(info.columns().len(), 2);
        assert!(table.is_duplicate("country_code"));
        assert_eq!(info.references().len(), 2);
        assert_eq!(info.primary_key(), "id");
        assert_eq!(info.alias("id"), "cities.id");
    }

    #[test]
    fn test_foreign_key_shared_with_plain_column_in_either_order() {
        let plain = || {
            Column::new(
                "country_code",
                Accessor::field(
                    |c: &City| &c.country_code,
                    |c: &mut City| &mut c.country_code,
                ),
                ColumnSettings::new(),
            )
        };
        let reference = || {
            ReferenceColumn::many_to_one(
                "country_code",
                Accessor::field(|c: &City| &c.country, |c: &mut City| &mut c.country),
                countries(),
                Cascade::NONE,
            )
        };

        let plain_first = Table::builder("cities")
            .column(city_id())
            .column(plain())
            .column(reference())
            .build()
            .unwrap();
        let reference_first = Table::builder("cities")
            .column(city_id())
            .column(reference())
            .column(plain())
            .build()
            .unwrap();

        for table in [&plain_first, &reference_first] {
            assert!(table.is_duplicate("country_code"));
            assert_eq!(table.info().columns().len(), 2);
            assert_eq!(table.info().references().len(), 1);
        }
    }

    #[test]
    fn test_container_must_match_relation_cardinality() {
        #[derive(Debug, Clone, Default)]
        struct Region {
            id: i64,
            cities: Vec<City>,
        }

        let single = Table::builder("cities")
            .column(city_id())
            .column(ReferenceColumn::new(
                "country_code",
                Accessor::field(|c: &City| &c.country, |c: &mut City| &mut c.country),
                countries(),
                RelationType::OneToMany,
                Cascade::NONE,
            ))
            .build()
            .unwrap_err();
        assert!(matches!(
            single,
            Error::Schema(ref e) if e.kind == SchemaErrorKind::Invalid && e.table == "cities"
        ));

        let cities = Table::builder("cities").column(city_id()).build().unwrap();
        let collection = Table::builder("regions")
            .column(Column::new(
                "id",
                Accessor::field(|r: &Region| &r.id, |r: &mut Region| &mut r.id),
                ColumnSettings::new().primary_key(),
            ))
            .column(ReferenceColumn::new(
                "capital_id",
                Accessor::field(|r: &Region| &r.cities, |r: &mut Region| &mut r.cities),
                cities,
                RelationType::ManyToOne,
                Cascade::NONE,
            ))
            .build()
            .unwrap_err();
        assert!(matches!(
            collection,
            Error::Schema(ref e) if e.kind == SchemaErrorKind::Invalid && e.table == "regions"
        ));
    }

    #[test]
    fn test_plain_column_collision_is_an_error() {
        let err = Table::builder("cities")
            .column(city_id())
            .column(Column::new(
                "id",
                Accessor::field(
                    |c: &City| &c.country_code,
                    |c: &mut City| &mut c.country_code,
                ),
                ColumnSettings::new(),
            ))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(ref e) if e.kind == SchemaErrorKind::DuplicateColumn
        ));
    }

    #[test]
    fn test_primary_key_is_required_and_unique() {
        let missing = Table::<City>::builder("cities")
            .column(Column::new(
                "country_code",
                Accessor::field(
                    |c: &City| &c.country_code,
                    |c: &mut City| &mut c.country_code,
                ),
                ColumnSettings::new(),
            ))
            .build()
            .unwrap_err();
        assert!(matches!(
            missing,
            Error::Schema(ref e) if e.kind == SchemaErrorKind::MissingPrimaryKey
        ));

        let twice = Table::builder("cities")
            .column(city_id())
            .column(Column::new(
                "country_code",
                Accessor::field(
                    |c: &City| &c.country_code,
                    |c: &mut City| &mut c.country_code,
                ),
                ColumnSettings::new().primary_key(),
            ))
            .build()
            .unwrap_err();
        assert!(matches!(
            twice,
            Error::Schema(ref e) if e.kind == SchemaErrorKind::MultiplePrimaryKeys
        ));
    }

    #[test]
    fn test_inverse_relation_needs_back_reference() {
        #[derive(Debug, Clone, Default)]
        struct Region {
            id: i64,
            cities: Vec<City>,
        }

        let cities = Table::builder("cities").column(city_id()).build().unwrap();
        let err = Table::builder("regions")
            .column(Column::new(
                "id",
                Accessor::field(|r: &Region| &r.id, |r: &mut Region| &mut r.id),
                ColumnSettings::new().primary_key(),
            ))
            .column(ReferenceColumn::one_to_many(
                "region_id",
                Accessor::field(|r: &Region| &r.cities, |r: &mut Region| &mut r.cities),
                cities,
                Cascade::ALL,
            ))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(ref e) if e.kind == SchemaErrorKind::ColumnNotFound && e.table == "cities"
        ));
    }

    #[test]
    fn test_invalid_identifier_is_rejected() {
        let err = Table::<Country>::builder("bad name").build().unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(ref e) if e.kind == SchemaErrorKind::InvalidIdentifier
        ));
    }

    #[test]
    fn test_visitor_sees_declaration_order() {
        struct Names(Vec<String>);

        impl ColumnVisitor<Country> for Names {
            fn visit_column(&mut self, column: &Column<Country>) {
                self.0.push(column.name().to_string());
            }
        }

        let table = countries();
        let mut names = Names(Vec::new());
        table.for_each(&mut names);
        assert_eq!(names.0, vec!["code", "name"]);
        assert_eq!(
            table.col("code").to_sql(relmap_core::Dialect::Sqlite),
            "\"countries\".\"code\""
        );
    }
}
