//! Database row representation.
//!
//! Rows hold every column in its string form; SQL NULL is stored as
//! [`NULL_SENTINEL`](crate::value::NULL_SENTINEL).

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::{SqlValue, is_null_sentinel};
use std::collections::HashMap;
use std::sync::Arc;

/// Column names shared across all rows in a result set.
///
/// Wrapped in `Arc` so all rows from the same query share one copy.
#[derive(Debug, Clone)]
pub struct ColumnNames {
    names: Vec<String>,
    name_to_index: HashMap<String, usize>,
}

impl ColumnNames {
    pub fn new(names: Vec<String>) -> Self {
        let name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// A single row returned from a database query.
#[derive(Debug, Clone)]
pub struct Row {
    values: Vec<String>,
    columns: Arc<ColumnNames>,
}

impl Row {
    /// Create a row with its own column list.
    ///
    /// For multiple rows from the same result set, prefer `with_columns`.
    pub fn new(column_names: Vec<String>, values: Vec<String>) -> Self {
        let columns = Arc::new(ColumnNames::new(column_names));
        Self { values, columns }
    }

    pub fn with_columns(columns: Arc<ColumnNames>, values: Vec<String>) -> Self {
        Self { values, columns }
    }

    pub fn column_names_shared(&self) -> Arc<ColumnNames> {
        Arc::clone(&self.columns)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&str> {
        self.columns
            .index_of(name)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    /// True when the column is absent or holds SQL NULL.
    pub fn is_null(&self, name: &str) -> bool {
        self.get_by_name(name).is_none_or(is_null_sentinel)
    }

    pub fn contains_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// Parse the value at `index` into a fresh `T`.
    pub fn get_as<T: SqlValue + Default>(&self, index: usize) -> Result<T> {
        let raw = self.get(index).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!(
                    "index {} out of bounds (row has {} columns)",
                    index,
                    self.len()
                ),
                column: None,
            })
        })?;
        let mut value = T::default();
        value.from_sql_string(raw)?;
        Ok(value)
    }

    /// Parse the value of column `name` into a fresh `T`.
    pub fn get_named<T: SqlValue + Default>(&self, name: &str) -> Result<T> {
        let raw = self.get_by_name(name).ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: format!("column '{}' not found", name),
                column: Some(name.to_string()),
            })
        })?;
        let mut value = T::default();
        value.from_sql_string(raw).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(name.to_string());
                Error::Type(te)
            }
            e => e,
        })?;
        Ok(value)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.names().iter().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }

    /// Iterate over (column_name, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::NULL_SENTINEL;

    fn sample() -> Row {
        Row::new(
            vec!["users.id".into(), "users.name".into(), "users.age".into()],
            vec!["1".into(), "Alice".into(), NULL_SENTINEL.into()],
        )
    }

    #[test]
    fn test_row_basic_access() {
        let row = sample();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0), Some("1"));
        assert_eq!(row.get_by_name("users.name"), Some("Alice"));
        assert_eq!(row.get_by_name("users.email"), None);
        assert!(row.contains_column("users.age"));
    }

    #[test]
    fn test_row_null_handling() {
        let row = sample();
        assert!(row.is_null("users.age"));
        assert!(row.is_null("missing"));
        assert!(!row.is_null("users.id"));
        let age: Option<i32> = row.get_named("users.age").unwrap();
        assert_eq!(age, None);
    }

    #[test]
    fn test_row_typed_access() {
        let row = sample();
        let id: i64 = row.get_as(0).unwrap();
        assert_eq!(id, 1);
        let name: String = row.get_named("users.name").unwrap();
        assert_eq!(name, "Alice");
    }

    #[test]
    fn test_row_type_errors_name_column() {
        let row = sample();
        let err = row.get_named::<i32>("users.name").unwrap_err();
        match err {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("users.name")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(row.get_as::<i32>(10).is_err());
    }

    #[test]
    fn test_row_shared_columns() {
        let columns = Arc::new(ColumnNames::new(vec!["a".into(), "b".into()]));
        let r1 = Row::with_columns(Arc::clone(&columns), vec!["1".into(), "2".into()]);
        let r2 = Row::with_columns(r1.column_names_shared(), vec!["3".into(), "4".into()]);
        assert!(Arc::ptr_eq(&r1.column_names_shared(), &r2.column_names_shared()));
        let pairs: Vec<_> = r2.iter().collect();
        assert_eq!(pairs, vec![("a", "3"), ("b", "4")]);
    }
}
