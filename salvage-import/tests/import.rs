use std::cell::RefCell;
use std::fs;
use std::path::Path;

use salvage_core::{
    Entity, EntityStore, EntityType, FieldDescriptor, FieldKind, Filter, LegacyHosts, Schema,
};
use salvage_db::{SqliteCheckpoints, SqliteStore};
use salvage_fields::{FieldBuilder, IntegerField, TextField, ValidationError};
use salvage_finder::FinderRegistry;
use salvage_import::{
    CsvReader, ImportError, ImportOptions, ImportProgress, ImportSession, ImportSpec, JsonReader,
    PageEnd, PagePlacement, RowHooks, RowInfo, WindowOptions, route_finder,
};
use serde_json::{Value, json};

// ── Fixtures ────────────────────────────────────────────────────────────────

fn setup_store() -> SqliteStore {
    let store = SqliteStore::open_memory().unwrap();
    let mut home = Entity::new("page").with_slug("home").with_title("Home");
    store.save(&mut home).unwrap();
    store
        .add_site("example.com", 80, home.id.unwrap(), true)
        .unwrap();
    store
}

fn schema() -> Schema {
    Schema::new()
        .with(EntityType::new("page").field(FieldDescriptor::new("legacy_path", FieldKind::Text)))
        .unwrap()
}

fn hosts() -> LegacyHosts {
    LegacyHosts::new(["example.com"], ["media.example.com"])
}

fn news_spec() -> ImportSpec {
    ImportSpec::new("news", "article")
        .field(TextField::new("title"))
        .field(IntegerField::new("count").optional())
}

/// `id,title,count` rows 1 to 10; `bad_row` gets an unreadable count.
fn write_news(path: &Path, bad_row: Option<u64>) {
    let mut csv = String::from("id,title,count\n");
    for id in 1..=10u64 {
        let count = if Some(id) == bad_row { "lots".to_string() } else { id.to_string() };
        csv.push_str(&format!("{},Story {},{}\n", id, id, count));
    }
    fs::write(path, csv).unwrap();
}

fn articles(store: &SqliteStore) -> Vec<Entity> {
    store.query(&Filter::kinds(["article"])).unwrap()
}

fn article(store: &SqliteStore, legacy_id: i64) -> Entity {
    store
        .get_by_attribute(&["article".to_string()], "legacy_id", &json!(legacy_id))
        .unwrap()
}

/// Records the rows a run started.
#[derive(Default)]
struct RowRecorder {
    rows: RefCell<Vec<u64>>,
    pages: RefCell<Vec<(u64, Option<PageEnd>)>>,
}

impl ImportProgress for RowRecorder {
    fn on_row_started(&self, row: &RowInfo) {
        self.rows.borrow_mut().push(row.row);
    }
    fn on_row_completed(&self, _row: &RowInfo, _successful: bool) {}
    fn on_page_started(&self, _page: u64) {}
    fn on_page_completed(&self, page: u64, end: Option<&PageEnd>) {
        self.pages.borrow_mut().push((page, end.cloned()));
    }
    fn on_phase(&self, _message: &str) {}
    fn on_complete(&self, _message: &str) {}
}

// ── Row processing ──────────────────────────────────────────────────────────

#[test]
fn rows_create_then_update() {
    let store = setup_store();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.csv");
    write_news(&path, None);

    let mut session = ImportSession::new(&store);
    let mut spec = news_spec();
    let report = session
        .run(&mut spec, &mut CsvReader::new(&path), &ImportOptions::default())
        .unwrap();
    assert_eq!(report.stats.total_rows, 10);
    assert_eq!(report.stats.created, 10);
    assert!(report.errors.is_empty());

    let third = article(&store, 3);
    assert_eq!(third.title, "Story 3");
    assert_eq!(third.attr("count"), Some(json!(3)));
    assert!(third.attr_str("last_imported_at").is_some());

    let report = session
        .run(&mut spec, &mut CsvReader::new(&path), &ImportOptions::default())
        .unwrap();
    assert_eq!(report.stats.created, 0);
    assert_eq!(report.stats.updated, 10);
    assert_eq!(articles(&store).len(), 10);
}

#[test]
fn duplicate_source_ids_update_the_earlier_entity() {
    let store = setup_store();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dupes.csv");
    fs::write(&path, "id,title\n7,First\n07,Second\n").unwrap();

    let mut session = ImportSession::new(&store);
    let report = session
        .run(&mut news_spec(), &mut CsvReader::new(&path), &ImportOptions::default())
        .unwrap();
    assert_eq!((report.stats.created, report.stats.updated), (1, 1));
    assert_eq!(articles(&store).len(), 1);
    assert_eq!(article(&store, 7).title, "Second");
}

#[test]
fn stored_ids_match_their_normalized_spelling() {
    let store = setup_store();
    let mut existing = Entity::new("article")
        .with_title("Old")
        .with_attr("legacy_id", "07");
    store.save(&mut existing).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.csv");
    fs::write(&path, "id,title\n7,New\n").unwrap();

    let mut session = ImportSession::new(&store);
    let report = session
        .run(&mut news_spec(), &mut CsvReader::new(&path), &ImportOptions::default())
        .unwrap();
    assert_eq!((report.stats.created, report.stats.updated), (0, 1));
    assert_eq!(articles(&store).len(), 1);
    let updated = store.get(existing.id.unwrap()).unwrap().unwrap();
    assert_eq!(updated.title, "New");
}

#[test]
fn dry_run_saves_nothing() {
    let store = setup_store();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.csv");
    write_news(&path, None);

    let mut session = ImportSession::new(&store);
    let report = session
        .run(
            &mut news_spec(),
            &mut CsvReader::new(&path),
            &ImportOptions::default().dry_run(true),
        )
        .unwrap();
    assert!(report.dry_run);
    assert_eq!(report.stats.created, 10);
    assert!(articles(&store).is_empty());
}

#[test]
fn no_update_and_ignored_ids_skip_rows() {
    let store = setup_store();
    let mut existing = Entity::new("article")
        .with_title("Old")
        .with_attr("legacy_id", 1);
    store.save(&mut existing).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.csv");
    write_news(&path, None);

    let options = ImportOptions {
        no_update: true,
        source_ids_to_ignore: vec![json!("2"), json!(3)],
        ..ImportOptions::default()
    };
    let mut session = ImportSession::new(&store);
    let report = session
        .run(&mut news_spec(), &mut CsvReader::new(&path), &options)
        .unwrap();
    assert_eq!(report.stats.skipped, 3);
    assert_eq!(report.stats.created, 7);
    assert_eq!(article(&store, 1).title, "Old");
    assert_eq!(articles(&store).len(), 8);
}

struct NeverStale;

impl RowHooks for NeverStale {
    fn is_stale(&self, _entity: &Entity, _row: &Value) -> bool {
        false
    }
}

#[test]
fn fresh_entities_update_only_when_forced() {
    let store = setup_store();
    let mut existing = Entity::new("article")
        .with_title("Old")
        .with_attr("legacy_id", 1);
    store.save(&mut existing).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("one.csv");
    fs::write(&path, "id,title\n1,New\n").unwrap();

    let mut spec = news_spec().hooks(NeverStale);
    let mut session = ImportSession::new(&store);
    let report = session
        .run(&mut spec, &mut CsvReader::new(&path), &ImportOptions::default())
        .unwrap();
    assert_eq!(report.stats.skipped, 1);
    assert_eq!(article(&store, 1).title, "Old");

    let forced = ImportOptions {
        force_update: true,
        ..ImportOptions::default()
    };
    let report = session
        .run(&mut spec, &mut CsvReader::new(&path), &forced)
        .unwrap();
    assert_eq!(report.stats.updated, 1);
    assert_eq!(article(&store, 1).title, "New");
}

struct NoDrafts;

impl RowHooks for NoDrafts {
    fn sanitize_row(&self, row: &mut Value) {
        if let Some(title) = row.get_mut("title")
            && let Some(s) = title.as_str()
        {
            *title = json!(s.to_uppercase());
        }
    }

    fn validate(&self, entity: &Entity) -> Result<(), ValidationError> {
        if entity.title.starts_with("DRAFT") {
            return Err(ValidationError::invalid("drafts are not imported"));
        }
        Ok(())
    }
}

#[test]
fn hooks_sanitize_and_validate() {
    let store = setup_store();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.csv");
    fs::write(&path, "id,title\n1,hello\n2,draft: later\n").unwrap();

    let mut session = ImportSession::new(&store);
    let report = session
        .run(
            &mut news_spec().hooks(NoDrafts),
            &mut CsvReader::new(&path),
            &ImportOptions::default().resilient(true),
        )
        .unwrap();
    assert_eq!(report.stats.created, 1);
    assert_eq!(report.stats.invalid, 1);
    assert_eq!(article(&store, 1).title, "HELLO");
    assert!(report.errors[0].message.contains("drafts are not imported"));
}

// ── Failures ────────────────────────────────────────────────────────────────

#[test]
fn resilient_runs_collect_row_errors() {
    let store = setup_store();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.json");
    fs::write(
        &path,
        r#"[
            {"id": 1, "title": "One", "count": 1},
            {"id": 2, "count": "many"},
            {"id": 3, "title": "Three"}
        ]"#,
    )
    .unwrap();

    let mut session = ImportSession::new(&store);
    let report = session
        .run(
            &mut news_spec(),
            &mut JsonReader::new(&path),
            &ImportOptions::default().resilient(true),
        )
        .unwrap();
    assert_eq!(report.stats.created, 2);
    assert_eq!(report.stats.invalid, 1);
    assert_eq!(report.errors.len(), 1);

    let error = &report.errors[0];
    assert_eq!(error.row, 2);
    assert_eq!(error.page, None);
    assert_eq!(error.source_id.as_deref(), Some("2"));
    assert!(error.message.contains("title"));
    assert!(error.message.contains("count"));
}

#[test]
fn strict_runs_stop_at_the_first_invalid_row() {
    let store = setup_store();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.json");
    fs::write(
        &path,
        r#"[{"id": 1, "title": "One"}, {"id": 2, "count": "many"}, {"id": 3, "title": "Three"}]"#,
    )
    .unwrap();

    let mut session = ImportSession::new(&store);
    let err = session
        .run(&mut news_spec(), &mut JsonReader::new(&path), &ImportOptions::default())
        .unwrap_err();
    match err {
        ImportError::InvalidRow { row, source_id, errors } => {
            assert_eq!(row, 2);
            assert_eq!(source_id, "2");
            assert_eq!(errors.len(), 2);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(articles(&store).len(), 1);
}

#[test]
fn missing_source_ids_are_row_errors() {
    let store = setup_store();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.csv");
    fs::write(&path, "id,title\n,Nameless\n2,Two\n").unwrap();

    let mut session = ImportSession::new(&store);
    let report = session
        .run(
            &mut news_spec(),
            &mut CsvReader::new(&path),
            &ImportOptions::default().resilient(true),
        )
        .unwrap();
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.created, 1);
    assert!(report.errors[0].message.contains("No source id"));
}

// ── Windows and resume ──────────────────────────────────────────────────────

#[test]
fn row_windows_limit_the_rows_read() {
    let store = setup_store();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.csv");
    write_news(&path, None);

    let recorder = RowRecorder::default();
    let mut session = ImportSession::new(&store).progress(&recorder);
    let window = WindowOptions {
        start_row: Some(3),
        stop_row: Some(5),
        ..WindowOptions::default()
    };
    let report = session
        .run(
            &mut news_spec(),
            &mut CsvReader::new(&path),
            &ImportOptions::default().window(window),
        )
        .unwrap();
    assert_eq!(report.stats.created, 3);
    assert_eq!(*recorder.rows.borrow(), vec![3, 4, 5]);

    let paged = WindowOptions {
        page_size: Some(2),
        ..WindowOptions::default()
    };
    let err = session
        .run(
            &mut news_spec(),
            &mut CsvReader::new(&path),
            &ImportOptions::default().window(paged),
        )
        .unwrap_err();
    assert!(matches!(err, ImportError::Window(_)));
}

#[test]
fn sql_sources_are_paginated() {
    let store = setup_store();
    let source = rusqlite::Connection::open_in_memory().unwrap();
    source
        .execute_batch(
            "CREATE TABLE news (id INTEGER, title TEXT);
             INSERT INTO news VALUES (1, 'a'), (2, 'b'), (3, 'c'), (4, 'd'), (5, 'e');",
        )
        .unwrap();

    let recorder = RowRecorder::default();
    let mut session = ImportSession::new(&store).progress(&recorder);
    let options = ImportOptions {
        page_size: Some(2),
        ..ImportOptions::default()
    };
    let report = session
        .run(
            &mut news_spec(),
            &mut salvage_import::SqlReader::new(&source, "SELECT id, title FROM news ORDER BY id"),
            &options,
        )
        .unwrap();
    assert_eq!(report.stats.created, 5);
    assert_eq!(
        *recorder.pages.borrow(),
        vec![(1, None), (2, None), (3, Some(PageEnd::LastPage))]
    );
}

#[test]
fn resume_picks_up_at_the_failed_row() {
    let store = setup_store();
    let checkpoints = SqliteCheckpoints::open_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.csv");
    write_news(&path, Some(6));

    let mut spec = news_spec();
    let mut session = ImportSession::new(&store).checkpoints(&checkpoints);
    let err = session
        .run(&mut spec, &mut CsvReader::new(&path), &ImportOptions::default())
        .unwrap_err();
    assert!(matches!(err, ImportError::InvalidRow { row: 6, .. }));
    assert_eq!(articles(&store).len(), 5);

    write_news(&path, None);
    let recorder = RowRecorder::default();
    let mut session = ImportSession::new(&store)
        .checkpoints(&checkpoints)
        .progress(&recorder);
    let report = session
        .run(
            &mut spec,
            &mut CsvReader::new(&path),
            &ImportOptions::default().resume(true),
        )
        .unwrap();
    assert_eq!(report.stats.created, 5);
    assert_eq!(*recorder.rows.borrow(), vec![6, 7, 8, 9, 10]);
    assert_eq!(articles(&store).len(), 10);

    // Completed runs leave nothing to resume from.
    let err = session
        .run(
            &mut spec,
            &mut CsvReader::new(&path),
            &ImportOptions::default().resume(true),
        )
        .unwrap_err();
    assert!(matches!(err, ImportError::NoResumeProgress));
}

#[test]
fn resume_needs_a_checkpoint_store() {
    let store = setup_store();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news.csv");
    write_news(&path, None);

    let mut session = ImportSession::new(&store);
    let err = session
        .run(
            &mut news_spec(),
            &mut CsvReader::new(&path),
            &ImportOptions::default().resume(true),
        )
        .unwrap_err();
    assert!(matches!(err, ImportError::NoCheckpointStore));
}

// ── Pages ───────────────────────────────────────────────────────────────────

#[test]
fn pages_go_under_their_ideal_parent_when_it_exists() {
    let store = setup_store();
    let home = store.query(&Filter::kinds(["page"])).unwrap().remove(0);
    let finders = FinderRegistry::new().with(
        "pages",
        route_finder(&schema(), &hosts(), "page").unwrap(),
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pages.json");
    fs::write(
        &path,
        r#"[
            {"id": 1, "title": "About", "path": "/about/"},
            {"id": 2, "title": "Our Team", "path": "/about/our team/"},
            {"id": 3, "title": "Orphan", "path": "/missing/orphan/"},
            {"id": 4, "title": "About again", "path": "/elsewhere/about/"}
        ]"#,
    )
    .unwrap();

    let mut spec = ImportSpec::new("pages", "page")
        .field(TextField::new("title"))
        .field(TextField::new("legacy_path").source("path"))
        .pages(PagePlacement::new().finder("pages"));
    let mut session = ImportSession::new(&store).finders(finders);
    let report = session
        .run(&mut spec, &mut JsonReader::new(&path), &ImportOptions::default())
        .unwrap();
    assert_eq!(report.stats.created, 4);

    let page = |legacy_id: i64| {
        store
            .get_by_attribute(&["page".to_string()], "legacy_id", &json!(legacy_id))
            .unwrap()
    };
    let about = page(1);
    assert_eq!(about.parent_id, home.id);
    assert_eq!(about.url_path, "/home/about/");
    let team = page(2);
    assert_eq!(team.parent_id, about.id);
    assert_eq!(team.url_path, "/home/about/our-team/");
    let orphan = page(3);
    assert_eq!(orphan.parent_id, home.id);
    assert_eq!(orphan.slug, "orphan");
    let again = page(4);
    assert_eq!(again.parent_id, home.id);
    assert_eq!(again.slug, "about-2");
}

#[test]
fn unknown_page_finders_are_configuration_errors() {
    let store = setup_store();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pages.json");
    fs::write(&path, "[]").unwrap();

    let mut spec = ImportSpec::new("pages", "page")
        .field(TextField::new("title"))
        .pages(PagePlacement::new().finder("pages"));
    let err = ImportSession::new(&store)
        .run(&mut spec, &mut JsonReader::new(&path), &ImportOptions::default())
        .unwrap_err();
    assert!(!err.is_recoverable());
    assert!(matches!(&err, ImportError::UnknownFinder(name) if name == "pages"));
}
