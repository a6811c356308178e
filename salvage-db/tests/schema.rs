use salvage_db::{CURRENT_VERSION, SchemaError, create_schema, open_database, open_memory};

#[test]
fn create_schema_in_memory() {
    let conn = open_memory().unwrap();
    let version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(version, CURRENT_VERSION);
}

#[test]
fn schema_is_idempotent() {
    let conn = open_memory().unwrap();
    create_schema(&conn).unwrap();
}

#[test]
fn all_tables_exist() {
    let conn = open_memory().unwrap();
    for table in ["schema_version", "entities", "sites", "checkpoints"] {
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
                [table],
                |row| row.get(0),
            )
            .unwrap();
        assert!(exists, "table {table} should exist");
    }
}

#[test]
fn sql_functions_are_registered() {
    let conn = open_memory().unwrap();
    let matched: bool = conn
        .query_row("SELECT regexp('^ph.*\\.jpg$', 'photo.jpg')", [], |row| row.get(0))
        .unwrap();
    assert!(matched);
    let folded: String = conn
        .query_row("SELECT casefold('ÉCOLE')", [], |row| row.get(0))
        .unwrap();
    assert_eq!(folded, "école");
}

#[test]
fn reopening_a_file_database_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("salvage.db");
    {
        let conn = open_database(&path).unwrap();
        conn.execute("INSERT INTO entities (kind, slug) VALUES ('page', 'home')", [])
            .unwrap();
    }
    let conn = open_database(&path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn newer_database_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("salvage.db");
    {
        let conn = open_database(&path).unwrap();
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [CURRENT_VERSION + 1],
        )
        .unwrap();
    }
    match open_database(&path) {
        Err(SchemaError::VersionMismatch { found, .. }) => assert_eq!(found, CURRENT_VERSION + 1),
        other => panic!("expected version mismatch, got {:?}", other.map(|_| ())),
    }
}
