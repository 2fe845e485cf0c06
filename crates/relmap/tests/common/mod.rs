//! Shared mapping and schema for the SQLite integration tests.
#![allow(dead_code)]

use relmap::{Accessor, Cascade, Column, ColumnSettings, Dedicated, Driver, ReferenceColumn, Table};
use relmap_sqlite::SqliteConnection;
use std::sync::Arc;

pub const SCHEMA: &str = "
    CREATE TABLE publishers (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE TABLE authors (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        publisher_id INTEGER REFERENCES publishers(id)
    );
    CREATE TABLE books (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        author_id INTEGER REFERENCES authors(id)
    );
    CREATE TABLE profiles (
        id INTEGER PRIMARY KEY,
        bio TEXT NOT NULL,
        author_id INTEGER REFERENCES authors(id)
    );
";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Publisher {
    pub id: Option<i64>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Book {
    pub id: Option<i64>,
    pub title: String,
    pub author_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub id: Option<i64>,
    pub bio: String,
    pub author_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Author {
    pub id: Option<i64>,
    pub name: String,
    pub publisher: Option<Publisher>,
    pub books: Vec<Book>,
    pub profile: Option<Profile>,
}

/// Cascade flags of the three relations of `authors`.
#[derive(Debug, Clone, Copy)]
pub struct Cascades {
    pub publisher: Cascade,
    pub books: Cascade,
    pub profile: Cascade,
}

impl Default for Cascades {
    fn default() -> Self {
        Self {
            publisher: Cascade::PERSIST | Cascade::MERGE,
            books: Cascade::ALL,
            profile: Cascade::ALL,
        }
    }
}

pub fn database() -> Dedicated<SqliteConnection> {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    conn.execute_raw(SCHEMA).expect("create schema");
    Dedicated::new(conn)
}

pub fn count(driver: &impl Driver, sql_from: &str) -> i64 {
    let rows = driver
        .query(&format!("SELECT COUNT(*) AS n FROM {sql_from}"))
        .expect("count rows");
    rows[0].get_named::<i64>("n").expect("read count")
}

fn serial() -> ColumnSettings {
    ColumnSettings::new().primary_key().auto_increment()
}

pub fn publishers() -> Arc<Table<Publisher>> {
    let table = Table::builder("publishers")
        .column(Column::new(
            "id",
            Accessor::field(|p: &Publisher| &p.id, |p: &mut Publisher| &mut p.id),
            serial(),
        ))
        .column(Column::new(
            "name",
            Accessor::field(|p: &Publisher| &p.name, |p: &mut Publisher| &mut p.name),
            ColumnSettings::new().not_null(),
        ))
        .build()
        .expect("publishers mapping");
    Arc::new(table)
}

pub fn books() -> Arc<Table<Book>> {
    let table = Table::builder("books")
        .column(Column::new(
            "id",
            Accessor::field(|b: &Book| &b.id, |b: &mut Book| &mut b.id),
            serial(),
        ))
        .column(Column::new(
            "title",
            Accessor::field(|b: &Book| &b.title, |b: &mut Book| &mut b.title),
            ColumnSettings::new().not_null(),
        ))
        .column(Column::new(
            "author_id",
            Accessor::field(|b: &Book| &b.author_id, |b: &mut Book| &mut b.author_id),
            ColumnSettings::new(),
        ))
        .build()
        .expect("books mapping");
    Arc::new(table)
}

pub fn profiles() -> Arc<Table<Profile>> {
    let table = Table::builder("profiles")
        .column(Column::new(
            "id",
            Accessor::field(|p: &Profile| &p.id, |p: &mut Profile| &mut p.id),
            serial(),
        ))
        .column(Column::new(
            "bio",
            Accessor::field(|p: &Profile| &p.bio, |p: &mut Profile| &mut p.bio),
            ColumnSettings::new().not_null(),
        ))
        .column(Column::new(
            "author_id",
            Accessor::field(|p: &Profile| &p.author_id, |p: &mut Profile| &mut p.author_id),
            ColumnSettings::new(),
        ))
        .build()
        .expect("profiles mapping");
    Arc::new(table)
}

pub fn authors(cascades: Cascades) -> Arc<Table<Author>> {
    let table = Table::builder("authors")
        .column(Column::new(
            "id",
            Accessor::field(|a: &Author| &a.id, |a: &mut Author| &mut a.id),
            serial(),
        ))
        .column(Column::new(
            "name",
            Accessor::field(|a: &Author| &a.name, |a: &mut Author| &mut a.name),
            ColumnSettings::new().not_null(),
        ))
        .column(ReferenceColumn::many_to_one(
            "publisher_id",
            Accessor::field(|a: &Author| &a.publisher, |a: &mut Author| &mut a.publisher),
            publishers(),
            cascades.publisher,
        ))
        .column(ReferenceColumn::one_to_many(
            "author_id",
            Accessor::field(|a: &Author| &a.books, |a: &mut Author| &mut a.books),
            books(),
            cascades.books,
        ))
        .column(ReferenceColumn::one_to_one_inverted(
            "author_id",
            Accessor::field(|a: &Author| &a.profile, |a: &mut Author| &mut a.profile),
            profiles(),
            cascades.profile,
        ))
        .build()
        .expect("authors mapping");
    Arc::new(table)
}

pub fn book(title: &str) -> Book {
    Book {
        title: title.to_string(),
        ..Book::default()
    }
}

pub fn author(name: &str, titles: &[&str]) -> Author {
    Author {
        name: name.to_string(),
        books: titles.iter().map(|t| book(t)).collect(),
        ..Author::default()
    }
}

/// Sort nested collections so loaded graphs compare independent of row order.
pub fn normalized(mut author: Author) -> Author {
    author.books.sort_by_key(|b| b.id);
    author
}
