use chrono::Local;

use plate_watch::storage::NewDetection;
use plate_watch::{normalize, DetectionLogStore, SqliteStore, StoreError, TargetPlateStore};

#[test]
fn targets_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("plates.db");
    let db = db.to_str().unwrap();

    {
        let store = SqliteStore::open(db).unwrap();
        store.add("b 1001 zzz").unwrap();
        store.add("F 9012 HIJ").unwrap();
    }

    let store = SqliteStore::open(db).unwrap();
    let targets = store.list_targets().unwrap();
    assert_eq!(targets.len(), 2);
    assert!(targets.contains(&normalize("B1001ZZZ")));
    assert!(matches!(
        store.add("B 1001 ZZZ"),
        Err(StoreError::Duplicate(plate)) if plate == "B 1001 ZZZ"
    ));
}

#[test]
fn bulk_delete_removes_rows_and_screenshots() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("plates.db");
    let store = SqliteStore::open(db.to_str().unwrap()).unwrap();

    let shot = dir.path().join("B_1001_ZZZ_20240309_070502.jpg");
    std::fs::write(&shot, b"\xFF\xD8jpeg").unwrap();
    let missing = dir.path().join("already_gone.jpg");

    let now = Local::now();
    let with_shot = store
        .append(&NewDetection {
            at: now,
            plate: normalize("B1001ZZZ"),
            is_target: true,
            screenshot_path: Some(shot.clone()),
        })
        .unwrap();
    let with_missing = store
        .append(&NewDetection {
            at: now,
            plate: normalize("B1001ZZZ"),
            is_target: true,
            screenshot_path: Some(missing),
        })
        .unwrap();
    let kept = store
        .append(&NewDetection {
            at: now,
            plate: normalize("B2156TOR"),
            is_target: false,
            screenshot_path: None,
        })
        .unwrap();

    assert_eq!(store.delete_by_ids(&[with_shot, with_missing, 999]).unwrap(), 2);
    assert!(!shot.exists());

    let rows = DetectionLogStore::list(&store).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, kept);
    assert_eq!(rows[0].plat_nomor, "B 2156 TOR");
    assert!(matches!(store.delete_by_ids(&[]), Err(StoreError::NoIdsSelected)));
}

#[test]
fn log_timestamps_use_the_storage_format() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(dir.path().join("plates.db").to_str().unwrap()).unwrap();
    let at = Local::now();
    store
        .append(&NewDetection {
            at,
            plate: normalize("B2156TOR"),
            is_target: false,
            screenshot_path: None,
        })
        .unwrap();
    let rows = DetectionLogStore::list(&store).unwrap();
    assert_eq!(rows[0].timestamp, at.format("%Y-%m-%d %H:%M:%S").to_string());
    assert_eq!(rows[0].screenshot_path, None);
}
