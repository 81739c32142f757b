use equip_core::{AssetStatus, EquipmentRecord};
use equip_loader::{LoadError, LoadPhase, LoadRequest, Loader, SourceEncoding, SourceOptions};
use equip_storage::{EquipStore, StoredAsset};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const EN_ROWS: usize = 6;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("equip.db");
    (dir, path)
}

fn loader_for(db_path: &Path) -> Loader {
    Loader::new(
        EquipStore::open(db_path).expect("open store"),
        SourceOptions::default(),
    )
}

fn load(csv: &str) -> LoadRequest {
    LoadRequest {
        csv: Some(fixture(csv)),
        ..LoadRequest::default()
    }
}

fn wipe_then_load(csv: &str) -> LoadRequest {
    LoadRequest {
        wipe: true,
        ..load(csv)
    }
}

type AssetContents = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    AssetStatus,
);

/// Table contents minus the columns the store mints on its own.
fn contents(store: &EquipStore) -> Vec<AssetContents> {
    store
        .list_assets(1_000, 0)
        .expect("list assets")
        .into_iter()
        .map(|asset: StoredAsset| {
            (
                asset.asset_tag,
                asset.name,
                asset.category,
                asset.location,
                asset.note,
                asset.status,
            )
        })
        .collect()
}

#[test]
fn wipe_empties_a_populated_table() {
    let (_dir, db_path) = temp_db();
    {
        let mut store = EquipStore::open(&db_path).expect("open store");
        let seed = (1..=5)
            .map(|n| EquipmentRecord::new(format!("S-{n:03}"), format!("Seed {n}")))
            .collect::<Vec<_>>();
        store.load(&seed).expect("seed");
        assert_eq!(store.asset_count().expect("count"), 5);
    }

    let mut loader = loader_for(&db_path);
    let request = LoadRequest {
        wipe: true,
        ..LoadRequest::default()
    };
    let summary = loader.run(&request).expect("wipe");
    assert_eq!(summary.wiped.expect("wiped").assets, 5);
    assert_eq!(loader.store().asset_count().expect("count"), 0);

    let again = loader.run(&request).expect("second wipe");
    assert_eq!(again.wiped.expect("wiped").assets, 0);
    assert_eq!(loader.store().asset_count().expect("count"), 0);
}

#[test]
fn load_after_wipe_inserts_every_row() {
    let (_dir, db_path) = temp_db();
    let mut loader = loader_for(&db_path);

    let summary = loader
        .run(&wipe_then_load("equip_import_test_en.csv"))
        .expect("load");

    assert_eq!(summary.phase, LoadPhase::Done);
    assert_eq!(summary.rows_read, EN_ROWS);
    assert_eq!(summary.inserted, EN_ROWS);
    assert_eq!(summary.updated, 0);
    assert!(summary.rejected.is_empty());
    assert_eq!(summary.categories_created, 5);
    assert_eq!(summary.locations_created, 4);

    let store = loader.into_store();
    assert_eq!(store.asset_count().expect("count"), EN_ROWS as i64);
    let monitor = store.asset_by_tag("EQ-0003").expect("get").expect("exists");
    assert_eq!(monitor.status, AssetStatus::Loaned);
    assert_eq!(monitor.location.as_deref(), Some("Shelf B"));
}

#[test]
fn repeated_append_load_does_not_duplicate_rows() {
    let (_dir, db_path) = temp_db();
    let mut loader = loader_for(&db_path);

    let first = loader.run(&load("equip_import_test_en.csv")).expect("first");
    let second = loader.run(&load("equip_import_test_en.csv")).expect("second");

    assert_eq!(first.inserted, EN_ROWS);
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, EN_ROWS);
    assert_eq!(loader.store().asset_count().expect("count"), EN_ROWS as i64);
}

#[test]
fn append_with_duplicate_and_invalid_row_commits_the_rest() {
    let (_dir, db_path) = temp_db();
    let mut loader = loader_for(&db_path);
    loader
        .run(&wipe_then_load("equip_import_test_en.csv"))
        .expect("baseline");

    let summary = loader
        .run(&load("equip_import_hogehoge.csv"))
        .expect("append is non-fatal");

    assert_eq!(summary.rows_read, 4);
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.rejected.len(), 1);
    assert_eq!(summary.rejected[0].row, 3);
    assert_eq!(summary.rejected[0].line, 4);
    assert_eq!(summary.rejected[0].reason, "missing required field `name`");

    let store = loader.store();
    assert_eq!(store.asset_count().expect("count"), EN_ROWS as i64 + 2);
    let hub = store.asset_by_tag("EQ-0002").expect("get").expect("exists");
    assert_eq!(hub.name, "USB-C Hub (rev.2)");
    assert_eq!(hub.location.as_deref(), Some("Shelf C"));
    assert!(store.asset_by_tag("HG-0002").expect("get").is_none());
    assert!(store
        .category_names()
        .expect("categories")
        .contains(&"Stationery".to_string()));
}

#[test]
fn column_order_does_not_change_table_contents() {
    let (_dir_a, db_a) = temp_db();
    let (_dir_b, db_b) = temp_db();

    let mut loader_a = loader_for(&db_a);
    loader_a
        .run(&load("equip_import_test_en.csv"))
        .expect("canonical order");
    let mut loader_b = loader_for(&db_b);
    loader_b
        .run(&load("equip_import_test_en_reordered.csv"))
        .expect("reordered");

    let a = contents(loader_a.store());
    let b = contents(loader_b.store());
    assert_eq!(a.len(), EN_ROWS);
    assert_eq!(a, b);
}

#[test]
fn failure_on_last_row_leaves_table_untouched() {
    let (_dir, db_path) = temp_db();
    let mut loader = loader_for(&db_path);
    loader
        .run(&load("equip_import_hogehoge.csv"))
        .expect("baseline");
    let before = contents(loader.store());

    {
        let conn = Connection::open(&db_path).expect("raw connection");
        conn.execute_batch(
            "
            CREATE TRIGGER reject_last_row BEFORE INSERT ON assets
            WHEN NEW.asset_tag = 'EQ-0006'
            BEGIN
                SELECT RAISE(ABORT, 'injected failure');
            END;
            ",
        )
        .expect("install trigger");
    }

    let failure = loader
        .run(&load("equip_import_test_en.csv"))
        .unwrap_err();

    assert_eq!(failure.error.exit_code(), 6);
    assert!(matches!(failure.error, LoadError::StoreWriteFailure(_)));
    assert_eq!(failure.summary.phase, LoadPhase::Failed);
    assert_eq!(failure.summary.inserted, 0);
    assert_eq!(loader.phase(), LoadPhase::Failed);
    assert_eq!(contents(loader.store()), before);
    assert!(!loader
        .store()
        .category_names()
        .expect("categories")
        .contains(&"Display".to_string()));
}

#[test]
fn shift_jis_fixture_loads_with_detected_encoding() {
    let (_dir, db_path) = temp_db();
    let mut loader = loader_for(&db_path);

    let summary = loader
        .run(&load("equip_import_test_ja_sjis.csv"))
        .expect("load japanese");

    assert_eq!(summary.inserted, 4);
    assert!(summary.rejected.is_empty());
    assert_eq!(summary.source.expect("source").encoding, "Shift_JIS");
    let monitor = loader
        .store()
        .asset_by_tag("JP-0003")
        .expect("get")
        .expect("exists");
    assert_eq!(monitor.name, "27インチモニター");
    assert_eq!(monitor.location.as_deref(), Some("棚B"));
    assert_eq!(monitor.status, AssetStatus::Loaned);
}

#[test]
fn declared_encoding_mismatch_is_a_decode_error() {
    let (_dir, db_path) = temp_db();
    let mut loader = Loader::new(
        EquipStore::open(&db_path).expect("open store"),
        SourceOptions {
            encoding: SourceEncoding::Declared(encoding_rs::UTF_8),
            delimiter: None,
        },
    );

    let failure = loader
        .run(&load("equip_import_test_ja_sjis.csv"))
        .unwrap_err();

    match failure.error {
        LoadError::DecodeError { offset, .. } => assert_eq!(offset, 0),
        other => panic!("expected decode error, got {other}"),
    }
    assert_eq!(loader.store().asset_count().expect("count"), 0);
}

#[test]
fn missing_csv_is_source_unavailable_after_wipe_commits() {
    let (_dir, db_path) = temp_db();
    let mut loader = loader_for(&db_path);
    loader
        .run(&load("equip_import_test_en.csv"))
        .expect("baseline");

    let failure = loader
        .run(&LoadRequest {
            wipe: true,
            csv: Some(fixture("does_not_exist.csv")),
            dry_run: false,
        })
        .unwrap_err();

    assert_eq!(failure.error.kind(), "source_unavailable");
    assert_eq!(failure.error.exit_code(), 2);
    assert_eq!(failure.summary.wiped.expect("wiped").assets, EN_ROWS);
    assert_eq!(loader.store().asset_count().expect("count"), 0);
}
