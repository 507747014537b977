//! Integration tests for the migration execution pipeline.
//!
//! These tests create SQLite in-memory databases and execute real DDL against
//! them, verifying that:
//! - Tables and columns are created, altered, and dropped correctly
//! - The recorder table tracks applied migrations across executors
//! - Forward and backward execution follow the dependency graph
//! - Failures roll back and never leave a half-applied migration
//! - The state track and the database track stay congruent

use std::cell::RefCell;
use std::rc::Rc;

use strata_migrations::executor::{MigrationExecutor, MigrationTarget, Progress};
use strata_migrations::migration::{Migration, MigrationGraph, MigrationKey};
use strata_migrations::operations::{
    AddField, AddIndex, AlterField, AlterModelTable, AlterUniqueTogether, CreateModel, RenameField,
    RenameModel, RunRust, RunSql, SeparateDatabaseAndState,
};
use strata_migrations::schema_editor::{DatabaseSchemaEditor, Dialect, SchemaEditor};
use strata_migrations::state::{FieldKind, FieldSpec, IndexSpec, ProjectState};
use strata_migrations::{Connection, MigrationError, SqliteConnection};

fn char_field(max_length: usize) -> FieldSpec {
    FieldSpec::new(FieldKind::CharField { max_length })
}

fn create_book() -> Migration {
    Migration::new("library", "0001_initial")
        .initial()
        .add_operation(Box::new(CreateModel::new(
            "Book",
            vec![("id", FieldSpec::auto()), ("title", char_field(200))],
        )))
}

fn then(name: &str, previous: &str) -> Migration {
    Migration::new("library", name).depends_on("library", previous)
}

fn key(app: &str, name: &str) -> MigrationKey {
    (app.to_string(), name.to_string())
}

fn recorded(conn: &mut SqliteConnection) -> Vec<Vec<String>> {
    conn.query("SELECT app, name FROM strata_migrations ORDER BY id")
        .unwrap()
}

// ── 1. Create table and record it ───────────────────────────────────────

#[test]
fn test_create_model_creates_table_and_records() {
    let mut conn = SqliteConnection::memory().unwrap();
    let graph = MigrationGraph::build(vec![create_book()]).unwrap();
    let state = MigrationExecutor::new(&mut conn, graph)
        .migrate(&[MigrationTarget::to("library", "0001_initial")], false)
        .unwrap();

    let book = state.get_model("library", "Book").unwrap();
    assert_eq!(book.fields.len(), 2);
    assert_eq!(conn.table_columns("library_book").unwrap(), vec!["id", "title"]);
    assert_eq!(
        recorded(&mut conn),
        vec![vec!["library".to_string(), "0001_initial".to_string()]]
    );
}

// ── 2. Dependency order, forwards and backwards ─────────────────────────

#[test]
fn test_dependencies_apply_in_order_and_reverse_in_order() {
    let m2 = then("0002_isbn", "0001_initial")
        .add_operation(Box::new(AddField::new("Book", "isbn", char_field(13).nullable())));
    // Supplied out of order on purpose.
    let graph = MigrationGraph::build(vec![m2, create_book()]).unwrap();

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    let mut conn = SqliteConnection::memory().unwrap();
    {
        let mut executor = MigrationExecutor::new(&mut conn, graph).on_progress(move |event| {
            match event {
                Progress::ApplyStart(key) => sink.borrow_mut().push(("apply", key.clone())),
                Progress::UnapplyStart(key) => sink.borrow_mut().push(("unapply", key.clone())),
                _ => {}
            }
        });
        executor
            .migrate(&[MigrationTarget::to("library", "0002_isbn")], false)
            .unwrap();
        let state = executor
            .migrate(&[MigrationTarget::zero("library")], false)
            .unwrap();
        assert!(state.is_empty());
    }

    assert_eq!(
        *events.borrow(),
        vec![
            ("apply", key("library", "0001_initial")),
            ("apply", key("library", "0002_isbn")),
            ("unapply", key("library", "0002_isbn")),
            ("unapply", key("library", "0001_initial")),
        ]
    );
    assert!(!conn.table_exists("library_book").unwrap());
    assert!(recorded(&mut conn).is_empty());
}

#[test]
fn test_cross_app_dependency_is_applied_first() {
    let author = Migration::new("people", "0001_initial").add_operation(Box::new(
        CreateModel::new("Author", vec![("id", FieldSpec::auto()), ("name", char_field(100))]),
    ));
    let book = create_book().depends_on("people", "0001_initial");
    let with_author = then("0002_author", "0001_initial").add_operation(Box::new(AddField::new(
        "Book",
        "author",
        FieldSpec::new(FieldKind::ForeignKey {
            to: "people.Author".into(),
            on_delete: strata_migrations::OnDelete::Cascade,
        })
        .nullable(),
    )));
    let graph = MigrationGraph::build(vec![with_author, book, author]).unwrap();

    let mut conn = SqliteConnection::memory().unwrap();
    MigrationExecutor::new(&mut conn, graph)
        .migrate(&[MigrationTarget::to("library", "0002_author")], false)
        .unwrap();

    assert_eq!(
        recorded(&mut conn),
        vec![
            vec!["people".to_string(), "0001_initial".to_string()],
            vec!["library".to_string(), "0001_initial".to_string()],
            vec!["library".to_string(), "0002_author".to_string()],
        ]
    );
    assert_eq!(
        conn.table_columns("library_book").unwrap(),
        vec!["id", "title", "author_id"]
    );
}

// ── 3. Applied set persists in the recorder table ───────────────────────

#[test]
fn test_applied_migrations_persist_across_executors() {
    let build = || {
        MigrationGraph::build(vec![
            create_book(),
            then("0002_isbn", "0001_initial")
                .add_operation(Box::new(AddField::new("Book", "isbn", char_field(13).nullable()))),
        ])
        .unwrap()
    };
    let mut conn = SqliteConnection::memory().unwrap();
    MigrationExecutor::new(&mut conn, build())
        .migrate(&[MigrationTarget::to("library", "0001_initial")], false)
        .unwrap();

    let mut executor = MigrationExecutor::new(&mut conn, build());
    executor.load_applied().unwrap();
    let plan = executor.migration_plan(&executor.leaf_targets()).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.steps[0].migration, key("library", "0002_isbn"));

    let state = executor.run_plan(&plan, false).unwrap();
    assert!(state.get_model("library", "Book").unwrap().has_field("isbn"));
}

// ── 4. One-off defaults ─────────────────────────────────────────────────

#[test]
fn test_one_off_default_backfills_rows_but_not_state() {
    let mut conn = SqliteConnection::memory().unwrap();
    MigrationExecutor::new(&mut conn, MigrationGraph::build(vec![create_book()]).unwrap())
        .migrate(&[MigrationTarget::to("library", "0001_initial")], false)
        .unwrap();
    conn.execute("INSERT INTO library_book (title) VALUES ('Dune')")
        .unwrap();

    let graph = MigrationGraph::build(vec![
        create_book(),
        then("0002_pages", "0001_initial").add_operation(Box::new(
            AddField::new("Book", "pages", FieldSpec::new(FieldKind::IntegerField).default(0))
                .one_off_default(),
        )),
    ])
    .unwrap();
    let state = MigrationExecutor::new(&mut conn, graph)
        .migrate(&[MigrationTarget::to("library", "0002_pages")], false)
        .unwrap();

    let pages = state
        .get_model("library", "Book")
        .unwrap()
        .get_field("pages")
        .unwrap();
    assert!(pages.default.is_none());
    assert!(!pages.null);
    assert_eq!(
        conn.query("SELECT title, pages FROM library_book").unwrap(),
        vec![vec!["Dune".to_string(), "0".to_string()]]
    );

    let table_sql = conn
        .query("SELECT sql FROM sqlite_master WHERE name = 'library_book'")
        .unwrap();
    assert!(!table_sql[0][0].contains("DEFAULT"));
    let err = conn
        .execute("INSERT INTO library_book (title) VALUES ('Emma')")
        .unwrap_err();
    assert!(err.is_database_transition());
}

// ── 5. Unsupported alterations leave the database untouched ─────────────

#[test]
fn test_text_to_integer_is_unsupported_on_sqlite() {
    let alter = then("0002_title_int", "0001_initial").add_operation(Box::new(AlterField::new(
        "Book",
        "title",
        FieldSpec::new(FieldKind::IntegerField),
    )));
    let graph = MigrationGraph::build(vec![create_book(), alter]).unwrap();

    let mut conn = SqliteConnection::memory().unwrap();
    let mut executor = MigrationExecutor::new(&mut conn, graph);
    executor
        .migrate(&[MigrationTarget::to("library", "0001_initial")], false)
        .unwrap();
    let err = executor
        .migrate(&[MigrationTarget::to("library", "0002_title_int")], false)
        .unwrap_err();
    drop(executor);

    assert!(err.is_unsupported_alteration());
    match err.root_cause() {
        MigrationError::UnsupportedAlteration {
            old_kind, new_kind, ..
        } => {
            assert_eq!(old_kind, "CharField");
            assert_eq!(new_kind, "IntegerField");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    let types = conn.query("SELECT type FROM pragma_table_info('library_book')").unwrap();
    assert_eq!(types[1], vec!["TEXT".to_string()]);
    assert_eq!(recorded(&mut conn).len(), 1);
}

// ── 6. Special operations ───────────────────────────────────────────────

#[test]
fn test_separate_database_and_state_issues_no_ddl() {
    let state_only = then("0002_isbn_state", "0001_initial").add_operation(Box::new(
        SeparateDatabaseAndState::new(
            vec![],
            vec![Box::new(AddField::new("Book", "isbn", char_field(13).nullable()))],
        ),
    ));
    let graph = MigrationGraph::build(vec![create_book(), state_only]).unwrap();

    let mut conn = SqliteConnection::memory().unwrap();
    let state = MigrationExecutor::new(&mut conn, graph)
        .migrate(&[MigrationTarget::to("library", "0002_isbn_state")], false)
        .unwrap();

    assert!(state.get_model("library", "Book").unwrap().has_field("isbn"));
    assert_eq!(conn.table_columns("library_book").unwrap(), vec!["id", "title"]);
}

#[test]
fn test_run_sql_multiple_statements() {
    let raw = Migration::new("misc", "0001_raw").add_operation(Box::new(
        RunSql::new("CREATE TABLE notes (body TEXT); INSERT INTO notes VALUES ('a;b');")
            .reverse("DROP TABLE notes")
            .multiple(),
    ));
    let graph = MigrationGraph::build(vec![raw]).unwrap();

    let mut conn = SqliteConnection::memory().unwrap();
    let mut executor = MigrationExecutor::new(&mut conn, graph);
    executor
        .migrate(&[MigrationTarget::to("misc", "0001_raw")], false)
        .unwrap();
    executor.migrate(&[MigrationTarget::zero("misc")], false).unwrap();
    drop(executor);
    assert!(!conn.table_exists("notes").unwrap());

    let mut conn = SqliteConnection::memory().unwrap();
    let graph = MigrationGraph::build(vec![Migration::new("misc", "0001_raw").add_operation(
        Box::new(
            RunSql::new("CREATE TABLE notes (body TEXT); INSERT INTO notes VALUES ('a;b');")
                .multiple(),
        ),
    )])
    .unwrap();
    MigrationExecutor::new(&mut conn, graph)
        .migrate(&[MigrationTarget::to("misc", "0001_raw")], false)
        .unwrap();
    assert_eq!(
        conn.query("SELECT body FROM notes").unwrap(),
        vec![vec!["a;b".to_string()]]
    );
}

#[test]
fn test_run_rust_data_migration() {
    let seed = then("0002_seed", "0001_initial").add_operation(Box::new(
        RunRust::new("seed books", |registry, editor| {
            let book = registry.get_model("library", "Book")?;
            let title = book.column_for("title");
            editor.execute(&format!(
                "INSERT INTO \"{}\" (\"{title}\") VALUES ('Dune')",
                book.db_table
            ))
        })
        .reverse(|registry, editor| {
            let book = registry.get_model("library", "Book")?;
            editor.execute(&format!("DELETE FROM \"{}\"", book.db_table))
        }),
    ));
    let graph = MigrationGraph::build(vec![create_book(), seed]).unwrap();

    let mut conn = SqliteConnection::memory().unwrap();
    let mut executor = MigrationExecutor::new(&mut conn, graph);
    executor
        .migrate(&[MigrationTarget::to("library", "0002_seed")], false)
        .unwrap();
    executor
        .migrate(&[MigrationTarget::to("library", "0001_initial")], false)
        .unwrap();
    drop(executor);

    assert!(conn.query("SELECT * FROM library_book").unwrap().is_empty());
    assert_eq!(recorded(&mut conn).len(), 1);
}

// ── 7. Failures ─────────────────────────────────────────────────────────

#[test]
fn test_irreversible_migration_never_touches_database() {
    let seed = then("0002_seed", "0001_initial").add_operation(Box::new(RunSql::new(
        "INSERT INTO library_book (title) VALUES ('Dune')",
    )));
    let graph = MigrationGraph::build(vec![create_book(), seed]).unwrap();

    let mut conn = SqliteConnection::memory().unwrap();
    let mut executor = MigrationExecutor::new(&mut conn, graph);
    executor.migrate(&executor.leaf_targets(), false).unwrap();
    let err = executor
        .migrate(&[MigrationTarget::zero("library")], false)
        .unwrap_err();
    drop(executor);

    assert!(err.is_irreversible());
    assert!(err.to_string().contains("library.0002_seed"));
    assert!(conn.table_exists("library_book").unwrap());
    assert_eq!(conn.query("SELECT title FROM library_book").unwrap().len(), 1);
    assert_eq!(recorded(&mut conn).len(), 2);
}

#[test]
fn test_failed_migration_rolls_back() {
    let broken = create_book().add_operation(Box::new(RunSql::new(
        "INSERT INTO missing_table VALUES (1)",
    )));
    let graph = MigrationGraph::build(vec![broken]).unwrap();

    let mut conn = SqliteConnection::memory().unwrap();
    let mut executor = MigrationExecutor::new(&mut conn, graph);
    let err = executor
        .migrate(&[MigrationTarget::to("library", "0001_initial")], false)
        .unwrap_err();
    assert!(executor.recorder().applied().is_empty());
    drop(executor);

    assert!(err.is_database_transition());
    assert!(matches!(err, MigrationError::OperationFailed { index: 1, .. }));
    assert!(!conn.table_exists("library_book").unwrap());
    assert!(recorded(&mut conn).is_empty());
}

#[test]
fn test_fake_migration_records_without_ddl() {
    let graph = MigrationGraph::build(vec![create_book()]).unwrap();
    let mut conn = SqliteConnection::memory().unwrap();
    let state = MigrationExecutor::new(&mut conn, graph)
        .migrate(&[MigrationTarget::to("library", "0001_initial")], true)
        .unwrap();

    assert!(state.contains_model("library", "Book"));
    assert!(!conn.table_exists("library_book").unwrap());
    assert_eq!(recorded(&mut conn).len(), 1);
}

// ── 8. Renames on a populated table ─────────────────────────────────────

#[test]
fn test_renames_preserve_rows() {
    let mut conn = SqliteConnection::memory().unwrap();
    MigrationExecutor::new(&mut conn, MigrationGraph::build(vec![create_book()]).unwrap())
        .migrate(&[MigrationTarget::to("library", "0001_initial")], false)
        .unwrap();
    conn.execute("INSERT INTO library_book (title) VALUES ('Dune')")
        .unwrap();

    let graph = MigrationGraph::build(vec![
        create_book(),
        then("0002_rename", "0001_initial")
            .add_operation(Box::new(RenameField::new("Book", "title", "name")))
            .add_operation(Box::new(RenameModel::new("Book", "Volume"))),
    ])
    .unwrap();
    MigrationExecutor::new(&mut conn, graph)
        .migrate(&[MigrationTarget::to("library", "0002_rename")], false)
        .unwrap();
    assert_eq!(
        conn.query("SELECT name FROM library_volume").unwrap(),
        vec![vec!["Dune".to_string()]]
    );
    assert!(!conn.table_exists("library_book").unwrap());
}

// ── 9. Dual-track congruence ────────────────────────────────────────────

#[test]
fn test_migration_round_trip_restores_state() {
    let migration = create_book()
        .add_operation(Box::new(AddField::new("Book", "isbn", char_field(13).nullable())))
        .add_operation(Box::new(AlterField::new("Book", "title", char_field(255))))
        .add_operation(Box::new(RenameField::new("Book", "title", "name")))
        .add_operation(Box::new(AlterUniqueTogether::new("Book", &[&["name", "isbn"]])))
        .add_operation(Box::new(AddIndex::new(
            "Book",
            IndexSpec::new("library_book_isbn_idx", &["isbn"]),
        )))
        .add_operation(Box::new(RenameModel::new("Book", "Volume")))
        .add_operation(Box::new(AlterModelTable::new("Volume", Some("volumes"))));

    let start = ProjectState::new();
    let mut editor = DatabaseSchemaEditor::collecting(Dialect::Sqlite);
    let forwards = migration.apply(start.clone(), &mut editor, &mut ()).unwrap();
    assert!(forwards.contains_model("library", "Volume"));
    assert_eq!(forwards.get_model("library", "Volume").unwrap().db_table(), "volumes");

    let backwards = migration.unapply(start.clone(), &mut editor, &mut ()).unwrap();
    assert_eq!(backwards, start);
}

#[test]
fn test_sqlite_round_trip_through_executor() {
    let graph = MigrationGraph::build(vec![
        create_book(),
        then("0002_changes", "0001_initial")
            .add_operation(Box::new(AddField::new("Book", "isbn", char_field(13).nullable())))
            .add_operation(Box::new(AlterUniqueTogether::new("Book", &[&["title", "isbn"]])))
            .add_operation(Box::new(AlterModelTable::new("Book", Some("books")))),
    ])
    .unwrap();

    let mut conn = SqliteConnection::memory().unwrap();
    let mut executor = MigrationExecutor::new(&mut conn, graph);
    let before = executor
        .migrate(&[MigrationTarget::to("library", "0001_initial")], false)
        .unwrap();
    executor
        .migrate(&[MigrationTarget::to("library", "0002_changes")], false)
        .unwrap();
    let after = executor
        .migrate(&[MigrationTarget::to("library", "0001_initial")], false)
        .unwrap();
    drop(executor);

    assert_eq!(after, before);
    assert!(!conn.table_exists("books").unwrap());
    assert_eq!(conn.table_columns("library_book").unwrap(), vec!["id", "title"]);
}

// ── 10. Dry run ─────────────────────────────────────────────────────────

#[test]
fn test_collect_sql_does_not_execute() {
    let graph = MigrationGraph::build(vec![create_book()]).unwrap();
    let mut conn = SqliteConnection::memory().unwrap();
    let executor = MigrationExecutor::new(&mut conn, graph);
    let plan = executor
        .migration_plan(&[MigrationTarget::to("library", "0001_initial")])
        .unwrap();
    let sql = executor.collect_sql(&plan).unwrap();
    drop(executor);

    assert!(sql.iter().any(|s| s.starts_with("CREATE TABLE \"library_book\"")));
    assert_eq!(sql.iter().filter(|s| *s == "BEGIN;").count(), 1);
    assert!(!conn.table_exists("library_book").unwrap());
}
