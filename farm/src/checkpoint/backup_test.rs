use super::backup::{rotate, snapshot_name, BlobStore, MemBlobs};

#[test]
pub fn names_snapshots_by_index() {
    assert_eq!(snapshot_name("run", 0), "run-master-00.db");
    assert_eq!(snapshot_name("run", 11), "run-master-11.db");
}

#[test]
pub fn live_file_survives_rotation() {
    let mut blobs = MemBlobs::default();
    blobs.insert(&snapshot_name("run", 0), vec![1]);

    rotate(&mut blobs, "run", 3).unwrap();

    assert_eq!(blobs.get(&snapshot_name("run", 0)), Some(&vec![1]));
    assert_eq!(blobs.get(&snapshot_name("run", 1)), Some(&vec![1]));
}

#[test]
pub fn snapshots_shift_up_by_one() {
    let mut blobs = MemBlobs::default();
    blobs.insert(&snapshot_name("run", 0), vec![3]);
    blobs.insert(&snapshot_name("run", 1), vec![2]);

    rotate(&mut blobs, "run", 3).unwrap();

    assert_eq!(blobs.get(&snapshot_name("run", 0)), Some(&vec![3]));
    assert_eq!(blobs.get(&snapshot_name("run", 1)), Some(&vec![3]));
    assert_eq!(blobs.get(&snapshot_name("run", 2)), Some(&vec![2]));
}

#[test]
pub fn oldest_snapshot_falls_off() {
    let mut blobs = MemBlobs::default();
    for (i, byte) in [3u8, 2, 1].iter().enumerate() {
        blobs.insert(&snapshot_name("run", i), vec![*byte]);
    }

    rotate(&mut blobs, "run", 3).unwrap();

    // retention 3 keeps slots 0..=2; the old slot-1 overwrote slot 2
    assert_eq!(blobs.get(&snapshot_name("run", 2)), Some(&vec![2]));
    assert_eq!(blobs.get(&snapshot_name("run", 3)), None);
}

#[test]
pub fn no_rotation_below_two_files() {
    let mut blobs = MemBlobs::default();
    blobs.insert(&snapshot_name("run", 0), vec![1]);

    rotate(&mut blobs, "run", 1).unwrap();
    rotate(&mut blobs, "run", 0).unwrap();

    assert!(!blobs.exists(&snapshot_name("run", 1)));
}

#[test]
pub fn nothing_to_rotate_is_fine() {
    let mut blobs = MemBlobs::default();
    rotate(&mut blobs, "run", 4).unwrap();
    assert!(!blobs.exists(&snapshot_name("run", 0)));
}
