use super::*;
use std::ops::Bound;

#[test]
fn test_put_get_delete() {
    let eng = MemEngine::new();
    let mut batch = WriteBatch::new();
    batch.put(b"a".to_vec(), b"1".to_vec());
    batch.put(b"b".to_vec(), b"2".to_vec());
    eng.write(batch).unwrap();

    assert_eq!(eng.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(eng.get(b"z").unwrap(), None);

    let mut del = WriteBatch::new();
    del.delete(b"a".to_vec());
    eng.write(del).unwrap();
    assert_eq!(eng.get(b"a").unwrap(), None);
}

#[test]
fn test_snapshot_isolated_from_later_writes() {
    let eng = MemEngine::new();
    let mut batch = WriteBatch::new();
    batch.put(b"a".to_vec(), b"1".to_vec());
    eng.write(batch).unwrap();

    let snap = eng.snapshot();
    let mut batch2 = WriteBatch::new();
    batch2.put(b"a".to_vec(), b"2".to_vec());
    batch2.put(b"b".to_vec(), b"3".to_vec());
    eng.write(batch2).unwrap();

    assert_eq!(snap.get(b"a"), Some(b"1".to_vec()));
    assert_eq!(snap.get(b"b"), None);
    assert_eq!(eng.get(b"a").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_delete_range() {
    let eng = MemEngine::new();
    let mut batch = WriteBatch::new();
    for k in [1u8, 2, 3, 4, 5] {
        batch.put(vec![k], vec![k]);
    }
    eng.write(batch).unwrap();

    let mut del = WriteBatch::new();
    del.delete_range(vec![2], vec![4]);
    eng.write(del).unwrap();

    assert_eq!(eng.get(&[1]).unwrap(), Some(vec![1]));
    assert_eq!(eng.get(&[2]).unwrap(), None);
    assert_eq!(eng.get(&[3]).unwrap(), None);
    assert_eq!(eng.get(&[4]).unwrap(), Some(vec![4]));
}

#[test]
fn test_range_iteration_order() {
    let eng = MemEngine::new();
    let mut batch = WriteBatch::new();
    for k in [3u8, 1, 2] {
        batch.put(vec![k], vec![k]);
    }
    eng.write(batch).unwrap();

    let snap = eng.snapshot();
    let keys: Vec<u8> = snap
        .range(Bound::Unbounded, Bound::Unbounded)
        .map(|(k, _)| k[0])
        .collect();
    assert_eq!(keys, vec![1, 2, 3]);
}

#[test]
fn test_approx_size_grows_with_content() {
    let eng = MemEngine::new();
    let empty = eng.approx_size(Bound::Unbounded, Bound::Unbounded).unwrap();
    let mut batch = WriteBatch::new();
    batch.put(b"key".to_vec(), vec![0u8; 1000]);
    eng.write(batch).unwrap();
    let filled = eng.approx_size(Bound::Unbounded, Bound::Unbounded).unwrap();
    assert!(filled > empty);
}
