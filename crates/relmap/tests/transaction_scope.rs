//! Transaction scoping against a recording driver.

use relmap::prelude::*;
use relmap::{Dialect, Executor, QueryErrorKind, Row, TransactionOps};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct MockState {
    opened: usize,
    committed: usize,
    rolled_back: usize,
    statements: Vec<String>,
    fail_updates: bool,
    /// Answer every INSERT with one row fewer than it wrote.
    short_returning: bool,
}

#[derive(Clone, Default)]
struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    fn snapshot(&self) -> (usize, usize, usize) {
        let state = self.state.lock().unwrap();
        (state.opened, state.committed, state.rolled_back)
    }

    fn statements(&self) -> Vec<String> {
        self.state.lock().unwrap().statements.clone()
    }

    fn run(&self, sql: &str) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        state.statements.push(sql.to_string());
        if state.fail_updates && sql.starts_with("UPDATE") {
            return Err(Error::Custom("update refused".into()));
        }
        Ok(1)
    }

    /// Echo one RETURNING row per inserted entity; nothing is ever stored.
    fn answer(&self, sql: &str) -> Vec<Row> {
        if !sql.starts_with("INSERT") {
            return Vec::new();
        }
        let mut rows = sql.matches("), (").count() + 1;
        if self.state.lock().unwrap().short_returning {
            rows -= 1;
        }
        (0..rows)
            .map(|i| {
                Row::new(
                    vec!["id".into(), "name".into()],
                    vec![(i + 1).to_string(), format!("n{i}")],
                )
            })
            .collect()
    }
}

struct MockTransaction {
    driver: MockDriver,
    active: AtomicBool,
}

impl Executor for MockTransaction {
    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.driver.run(sql)?;
        Ok(self.driver.answer(sql))
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        self.driver.run(sql)
    }
}

impl TransactionOps for MockTransaction {
    fn commit(&self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        self.driver.state.lock().unwrap().committed += 1;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        self.driver.state.lock().unwrap().rolled_back += 1;
        Ok(())
    }

    fn savepoint(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn rollback_to_savepoint(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn release_savepoint(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.run(sql)?;
        Ok(self.answer(sql))
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        self.run(sql)
    }

    fn open_transaction(&self, _isolation: IsolationLevel) -> Result<Transaction> {
        self.state.lock().unwrap().opened += 1;
        Ok(Transaction::new(MockTransaction {
            driver: self.clone(),
            active: AtomicBool::new(true),
        }))
    }

    fn has_returning_capability(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Item {
    id: Option<i64>,
    name: String,
}

fn items() -> Table<Item> {
    Table::builder("items")
        .column(Column::new(
            "id",
            Accessor::field(|i: &Item| &i.id, |i: &mut Item| &mut i.id),
            ColumnSettings::new().primary_key().auto_increment(),
        ))
        .column(Column::new(
            "name",
            Accessor::field(|i: &Item| &i.name, |i: &mut Item| &mut i.name),
            ColumnSettings::new().not_null(),
        ))
        .build()
        .unwrap()
}

fn batch(n: usize) -> Vec<Item> {
    (0..n)
        .map(|i| Item {
            id: None,
            name: format!("n{i}"),
        })
        .collect()
}

#[test]
fn batch_insert_opens_and_commits_one_transaction() {
    let driver = MockDriver::default();
    let mut storage = Storage::new(items(), driver.clone());

    let mut entities = batch(5);
    storage.insert_all(&mut entities).unwrap();

    assert_eq!(driver.snapshot(), (1, 1, 0));
    let statements = driver.statements();
    assert_eq!(statements.len(), 1, "one multi-row INSERT");
    assert_eq!(
        statements[0],
        "INSERT INTO \"items\" (\"name\") VALUES ('n0'), ('n1'), ('n2'), ('n3'), ('n4') \
         RETURNING \"id\", \"name\""
    );
    let ids: Vec<_> = entities.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![Some(1), Some(2), Some(3), Some(4), Some(5)]);
    assert!(storage.transaction().is_none());
}

#[test]
fn supplied_transaction_is_never_committed() {
    let driver = MockDriver::default();
    let tx = driver.open_transaction(IsolationLevel::Serializable).unwrap();
    let mut storage = Storage::new(items(), driver.clone());
    storage.set_transaction(tx.clone());

    storage.insert_all(&mut batch(5)).unwrap();
    drop(storage);

    assert_eq!(driver.snapshot(), (1, 0, 0));
    assert!(tx.is_active());
}

#[test]
fn failed_single_update_keeps_the_transaction() {
    let driver = MockDriver::default();
    driver.state.lock().unwrap().fail_updates = true;
    let mut storage = Storage::new(items(), driver.clone());

    let mut item = Item {
        id: Some(7),
        name: "x".into(),
    };
    assert!(storage.update(&mut item).is_err());
    assert_eq!(driver.snapshot(), (1, 0, 0));
    assert!(storage.transaction().is_some());

    // Dropping without auto_commit rolls back.
    drop(storage);
    assert_eq!(driver.snapshot(), (1, 0, 1));
}

#[test]
fn failed_batch_update_rolls_back() {
    let driver = MockDriver::default();
    driver.state.lock().unwrap().fail_updates = true;
    let mut storage = Storage::new(items(), driver.clone());

    let mut entities = vec![
        Item {
            id: Some(1),
            name: "a".into(),
        },
        Item {
            id: Some(2),
            name: "b".into(),
        },
    ];
    let err = storage.update_all(&mut entities).unwrap_err();
    assert!(matches!(err, Error::Custom(_)));
    assert_eq!(driver.snapshot(), (1, 0, 1));
    assert!(storage.transaction().is_none());
}

#[test]
fn selects_run_outside_transactions() {
    let driver = MockDriver::default();
    let mut storage = Storage::new(items(), driver.clone());
    storage
        .condition(Expr::qualified("items", "name").eq("n1"))
        .sort(Expr::qualified("items", "id").desc())
        .limit(3)
        .offset(1);
    assert!(storage.select().unwrap().is_empty());

    assert_eq!(driver.snapshot(), (0, 0, 0));
    assert_eq!(
        driver.statements(),
        vec![
            "SELECT \"items\".\"id\" AS \"items.id\", \"items\".\"name\" AS \"items.name\" \
             FROM \"items\" WHERE \"items\".\"name\" = 'n1' ORDER BY \"items\".\"id\" DESC \
             LIMIT 3 OFFSET 1"
        ]
    );
}

#[test]
fn isolation_comes_from_config() {
    #[derive(Clone, Default)]
    struct Levels {
        driver: MockDriver,
        seen: Arc<Mutex<Vec<IsolationLevel>>>,
    }

    impl Driver for Levels {
        fn dialect(&self) -> Dialect {
            self.driver.dialect()
        }

        fn query(&self, sql: &str) -> Result<Vec<Row>> {
            self.driver.query(sql)
        }

        fn execute(&self, sql: &str) -> Result<u64> {
            self.driver.execute(sql)
        }

        fn open_transaction(&self, isolation: IsolationLevel) -> Result<Transaction> {
            self.seen.lock().unwrap().push(isolation);
            self.driver.open_transaction(isolation)
        }

        fn has_returning_capability(&self) -> bool {
            true
        }
    }

    let levels = Levels::default();
    let mut storage = Storage::new(items(), levels.clone())
        .with_config(StorageConfig::new().isolation(IsolationLevel::Serializable));
    storage.insert(&mut batch(1)[0]).unwrap();
    assert_eq!(*levels.seen.lock().unwrap(), vec![IsolationLevel::Serializable]);
}

#[test]
fn short_insert_result_is_a_mismatch() {
    let driver = MockDriver::default();
    driver.state.lock().unwrap().short_returning = true;
    let mut storage = Storage::new(items(), driver.clone());

    let mut entities = batch(3);
    let err = storage.insert_all(&mut entities).unwrap_err();
    assert!(matches!(
        err,
        Error::Query(ref e) if e.kind == QueryErrorKind::Mismatch
    ));
    assert!(entities.iter().all(|e| e.id.is_none()));
}

#[derive(Debug, Clone, Default)]
struct Tag {
    id: Option<i64>,
    item: Option<Item>,
}

fn tags() -> Table<Tag> {
    Table::builder("tags")
        .column(Column::new(
            "id",
            Accessor::field(|t: &Tag| &t.id, |t: &mut Tag| &mut t.id),
            ColumnSettings::new().primary_key().auto_increment(),
        ))
        .column(
            ReferenceColumn::many_to_one(
                "item_id",
                Accessor::field(|t: &Tag| &t.item, |t: &mut Tag| &mut t.item),
                items(),
                Cascade::NONE,
            )
            .not_null(),
        )
        .build()
        .unwrap()
}

#[test]
fn missing_required_reference_is_never_written() {
    let driver = MockDriver::default();
    let mut storage = Storage::new(tags(), driver.clone());

    let mut tag = Tag::default();
    let err = storage.insert(&mut tag).unwrap_err();
    assert!(matches!(
        err,
        Error::Query(ref e) if e.kind == QueryErrorKind::Constraint && e.message.contains("item_id")
    ));

    let mut stored = Tag {
        id: Some(4),
        item: None,
    };
    let err = storage.update(&mut stored).unwrap_err();
    assert!(matches!(
        err,
        Error::Query(ref e) if e.kind == QueryErrorKind::Constraint
    ));
    assert!(driver.statements().is_empty());

    let mut linked = Tag {
        id: Some(4),
        item: Some(Item {
            id: Some(9),
            name: "x".into(),
        }),
    };
    storage.update(&mut linked).unwrap();
    assert_eq!(
        driver.statements(),
        vec!["UPDATE \"tags\" SET \"item_id\" = '9' WHERE \"id\" = '4'"]
    );
}
