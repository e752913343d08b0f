//! Shared fixture for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use parking_lot::Mutex;

use coursedb_core::model::{
    schema, Address, Author, Course, File, Lecture, Order, OrderId, Resource, ResourceBase,
    Section, Text, Video,
};
use coursedb_core::storage::RowSet;
use coursedb_core::{
    RetryPolicy, SequenceHandle, SqliteStorage, Statement, Storage, StorageError, Store,
    StoreConfig,
};

/// SQLite storage that can fail on demand and shift generated ids.
pub struct Scripted {
    pub inner: SqliteStorage,
    failures: Mutex<Vec<StorageError>>,
    pub calls: AtomicUsize,
    id_offset: i64,
}

impl Scripted {
    fn new(id_offset: i64) -> Self {
        Self {
            inner: SqliteStorage::in_memory().unwrap(),
            failures: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            id_offset,
        }
    }

    /// Fail the next statements with these errors, in order.
    pub fn fail_next(&self, mut failures: Vec<StorageError>) {
        failures.reverse();
        *self.failures.lock() = failures;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_failure(&self) -> Result<(), StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock().pop() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Storage for Scripted {
    fn execute(&self, statement: &Statement) -> Result<RowSet, StorageError> {
        self.next_failure()?;
        self.inner.execute(statement)
    }

    fn execute_atomic(&self, statements: &[Statement]) -> Result<Vec<u64>, StorageError> {
        self.next_failure()?;
        self.inner.execute_atomic(statements)
    }

    fn begin_identity_sequence(&self, kind: &str) -> Result<SequenceHandle, StorageError> {
        self.inner.begin_identity_sequence(kind)
    }

    fn next_identity(&self, handle: &SequenceHandle) -> Result<i64, StorageError> {
        self.inner.next_identity(handle).map(|id| id + self.id_offset)
    }
}

pub struct TestContext {
    pub store: Store,
    pub storage: Arc<Scripted>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_id_offset(0)
    }

    pub fn with_id_offset(offset: i64) -> Self {
        init_tracing();
        let registry = Arc::new(schema::course_catalog().unwrap());
        let storage = Arc::new(Scripted::new(offset));
        storage.inner.create_schema(&registry).unwrap();
        let config = StoreConfig::new().with_retry(
            RetryPolicy::default().backoff(Duration::from_millis(1)),
        );
        let store = Store::new(registry, storage.clone(), config);
        Self { store, storage }
    }
}

/// Log to the test writer; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn date(month: u32, day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, month, day)
        .unwrap()
        .and_hms_opt(9, 30, 0)
        .unwrap()
}

pub fn resource_base(name: &str, size: i32) -> ResourceBase {
    ResourceBase::new(name, size, format!("https://cdn.example.com/{}", name))
}

/// Saved fixture rows.
pub struct Catalog {
    pub authors: Vec<Author>,
    pub rust: Course,
    pub java: Course,
    pub intro: Section,
    pub ownership: Section,
    pub entities: Section,
    pub video: Resource,
    pub text: Resource,
    pub file: Resource,
    pub orphan: Resource,
    pub lectures: Vec<Lecture>,
    pub orders: Vec<Order>,
}

/// Populate the course catalog fixture.
///
/// Authors: Mehul (28), Ada (36), Grace (45), Alan (41). Course "Rust
/// Basics" has Mehul, Ada and Grace; "Java JPA" has Mehul. Resources:
/// Video#1 (size 10), Text#1 (size 20), File#1 (size 5), and an orphaned
/// Text#2 (size 3). Lecture "Q&A" has no resource.
pub fn seed(ctx: &TestContext) -> Catalog {
    let store = &ctx.store;
    let authors: Vec<Author> = [
        ("Mehul", "Suthar", "mehul@example.com", 28),
        ("Ada", "Lovelace", "ada@example.com", 36),
        ("Grace", "Hopper", "grace@example.com", 45),
        ("Alan", "Turing", "alan@example.com", 41),
    ]
    .into_iter()
    .map(|(first, last, email, age)| store.save(Author::new(first, last, email, age)).unwrap())
    .collect();

    let rust = store
        .save(
            Course::new("Rust Basics")
                .with_description("Ownership and borrowing")
                .with_authors(authors[..3].to_vec()),
        )
        .unwrap();
    let java = store
        .save(Course::new("Java JPA").with_authors(vec![authors[0].clone()]))
        .unwrap();

    let intro = store.save(Section::new("Intro", 1).in_course(&rust)).unwrap();
    let ownership = store.save(Section::new("Ownership", 2).in_course(&rust)).unwrap();
    let entities = store.save(Section::new("Entities", 1).in_course(&java)).unwrap();

    let video = store
        .save(Resource::from(Video {
            base: resource_base("intro-video", 10),
            length: 300,
        }))
        .unwrap();
    let text = store
        .save(Resource::from(Text {
            base: resource_base("ownership-notes", 20),
            content: Some("Borrowing rules".into()),
        }))
        .unwrap();
    let file = store
        .save(Resource::from(File {
            base: resource_base("slides.pdf", 5),
            file_type: "pdf".into(),
        }))
        .unwrap();
    let orphan = store
        .save(Resource::from(Text {
            base: resource_base("cheatsheet", 3),
            content: None,
        }))
        .unwrap();

    let mut lectures = Vec::new();
    for (name, section, resource) in [
        ("Welcome", &intro, Some(&video)),
        ("Borrowing", &ownership, Some(&text)),
        ("Mapping", &entities, Some(&file)),
        ("Q&A", &intro, None),
    ] {
        let mut lecture = Lecture::new(name).in_section(section);
        lecture.set_resources(resource);
        lectures.push(store.save(lecture).unwrap());
    }

    let orders = vec![
        Order::new(OrderId::new("mehul", date(3, 1)), "books")
            .with_address(Address::new("Main St", "12")),
        Order::new(OrderId::new("mehul", date(3, 5)), "pens"),
        Order::new(OrderId::new("ada", date(2, 20)), "laptop")
            .with_address(Address::new("Elm St", "7")),
    ]
    .into_iter()
    .map(|order| store.save(order).unwrap())
    .collect();

    Catalog {
        authors,
        rust,
        java,
        intro,
        ownership,
        entities,
        video,
        text,
        file,
        orphan,
        lectures,
        orders,
    }
}
